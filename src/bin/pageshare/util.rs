use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use pageshare::{acquire, KernelProducer, ShareConfig, Snapshot};

/// Env config with CLI overrides applied.
pub fn config(producer: Option<PathBuf>, dir: Option<PathBuf>) -> ShareConfig {
    let mut cfg = ShareConfig::from_env();
    if let Some(p) = producer {
        cfg = cfg.with_producer_path(p);
    }
    if let Some(d) = dir {
        cfg = cfg.with_snapshot_dir(d);
    }
    cfg.build()
}

/// Load or capture every snapshot an input names.
pub fn acquire_input(input: &str, cfg: &ShareConfig, mark: bool) -> Result<Vec<Snapshot>> {
    let producer = KernelProducer::from_config(cfg);
    let mut snaps = acquire(input, &producer, cfg.load_mmap)
        .with_context(|| format!("acquire {}", input))?;
    if mark {
        for s in snaps.iter_mut() {
            s.mark_heap_and_stack();
        }
    }
    Ok(snaps)
}

/// Exactly one snapshot (reference inputs of merge/probe/test).
pub fn acquire_one(input: &str, cfg: &ShareConfig, mark: bool) -> Result<Snapshot> {
    let mut snaps = acquire_input(input, cfg, mark)?;
    if snaps.len() != 1 {
        return Err(anyhow!(
            "{} yields {} snapshots, expected exactly one",
            input,
            snaps.len()
        ));
    }
    snaps.pop().ok_or_else(|| anyhow!("{} yields no snapshot", input))
}

pub fn print_json<T: Serialize>(v: &T) {
    let s = serde_json::to_string_pretty(v).unwrap_or_else(|_| "{}".to_string());
    println!("{s}");
}
