use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use pageshare::report::{snapshot_info, snapshot_info_record};
use pageshare::snapshot::save_snapshot_in;

use crate::util;

pub fn exec(
    requests: Vec<String>,
    count: Option<u32>,
    interval: Option<u64>,
    save: bool,
    dir: Option<PathBuf>,
    csv: bool,
    producer: Option<PathBuf>,
) -> Result<()> {
    let mut cfg = util::config(producer, dir);
    if let Some(n) = count {
        cfg = cfg.with_snapshot_count(n);
    }
    if let Some(t) = interval {
        cfg = cfg.with_interval_secs(t);
    }
    if save {
        cfg = cfg.with_autosave(true);
    }
    if csv {
        cfg = cfg.with_csv(true);
    }
    info!("capture: {}", cfg);

    for round in 0..cfg.snapshot_count {
        for req in &requests {
            let snaps = util::acquire_input(req, &cfg, false)
                .with_context(|| format!("round {}", round))?;
            for s in &snaps {
                if cfg.autosave {
                    let path = save_snapshot_in(&cfg.snapshot_dir, s)
                        .with_context(|| format!("save snapshot of pid {}", s.header.pid))?;
                    println!("saved {}", path.display());
                }
                if cfg.csv {
                    println!("{}", snapshot_info_record(s));
                } else {
                    print!("{}", snapshot_info(s));
                }
            }
            if cfg.interval_secs > 0 {
                thread::sleep(Duration::from_secs(cfg.interval_secs));
            }
        }
    }
    Ok(())
}
