use anyhow::{Context, Result};
use std::path::PathBuf;

use pageshare::report;
use pageshare::snapshot::io::load_snapshot_with;

use crate::cli::PrintWhat;
use crate::util;

pub fn exec(file: PathBuf, what: PrintWhat) -> Result<()> {
    let cfg = util::config(None, None);
    let snap = load_snapshot_with(&file, cfg.load_mmap)
        .with_context(|| format!("load {}", file.display()))?;

    match what {
        PrintWhat::All => print!("{}", report::render_snapshot(&snap)),
        PrintWhat::Info => print!("{}", report::snapshot_info(&snap)),
        PrintWhat::Regions => {
            for line in report::region_lines(&snap, 0, snap.regions().len())? {
                println!("{line}");
            }
        }
        PrintWhat::Pages => {
            for line in report::page_lines(&snap, 0, snap.available().len())? {
                println!("{line}");
            }
        }
    }
    Ok(())
}
