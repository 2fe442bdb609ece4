//! Centralized configuration for pageshare.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - ShareConfig::from_env() reads the PGS_* variables; CLI flags override them
//!   through the fluent setters.
//!
//! Defaults:
//! - producer_path = /proc/vm_snapshot
//! - snapshot_dir = "." (where autosaved snapshots land)
//! - interval_secs = 0, snapshot_count = 1 (one capture, no sleep)
//! - csv = false, autosave = false, load_mmap = true

use std::fmt;
use std::path::PathBuf;

use crate::consts::PRODUCER_PATH;

/// Parse a boolean env variable ("1|true|on|yes" => true). None if unset.
pub fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let s = v.trim().to_ascii_lowercase();
        s == "1" || s == "true" || s == "on" || s == "yes"
    })
}

#[derive(Clone, Debug)]
pub struct ShareConfig {
    /// Control file of the kernel producer.
    /// Env: PGS_PRODUCER_PATH (default /proc/vm_snapshot)
    pub producer_path: PathBuf,

    /// Directory for autosaved snapshots.
    /// Env: PGS_SNAPSHOT_DIR (default ".")
    pub snapshot_dir: PathBuf,

    /// Sleep between repeated captures, seconds.
    /// Env: PGS_INTERVAL_SECS (default 0)
    pub interval_secs: u64,

    /// Number of capture rounds.
    /// Env: PGS_SNAPSHOT_COUNT (default 1)
    pub snapshot_count: u32,

    /// Print snapshot info as `;` records instead of the human form.
    /// Env: PGS_CSV (default false)
    pub csv: bool,

    /// Save every captured snapshot into snapshot_dir.
    /// Env: PGS_AUTOSAVE (default false)
    pub autosave: bool,

    /// Map snapshot files instead of reading them into memory.
    /// Env: PGS_LOAD_MMAP (default true)
    pub load_mmap: bool,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            producer_path: PathBuf::from(PRODUCER_PATH),
            snapshot_dir: PathBuf::from("."),
            interval_secs: 0,
            snapshot_count: 1,
            csv: false,
            autosave: false,
            load_mmap: true,
        }
    }
}

impl ShareConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PGS_PRODUCER_PATH") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.producer_path = PathBuf::from(s);
            }
        }
        if let Ok(v) = std::env::var("PGS_SNAPSHOT_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.snapshot_dir = PathBuf::from(s);
            }
        }
        if let Ok(v) = std::env::var("PGS_INTERVAL_SECS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("PGS_SNAPSHOT_COUNT") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.snapshot_count = n;
            }
        }
        if let Some(on) = env_flag("PGS_CSV") {
            cfg.csv = on;
        }
        if let Some(on) = env_flag("PGS_AUTOSAVE") {
            cfg.autosave = on;
        }
        if let Some(on) = env_flag("PGS_LOAD_MMAP") {
            cfg.load_mmap = on;
        }

        cfg
    }

    pub fn with_producer_path<P: Into<PathBuf>>(mut self, p: P) -> Self {
        self.producer_path = p.into();
        self
    }

    pub fn with_snapshot_dir<P: Into<PathBuf>>(mut self, p: P) -> Self {
        self.snapshot_dir = p.into();
        self
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_snapshot_count(mut self, n: u32) -> Self {
        self.snapshot_count = n;
        self
    }

    pub fn with_csv(mut self, on: bool) -> Self {
        self.csv = on;
        self
    }

    pub fn with_autosave(mut self, on: bool) -> Self {
        self.autosave = on;
        self
    }

    pub fn with_load_mmap(mut self, on: bool) -> Self {
        self.load_mmap = on;
        self
    }

    pub fn build(self) -> Self {
        self
    }
}

impl fmt::Display for ShareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ShareConfig {{ \
             producer_path: {}, \
             snapshot_dir: {}, \
             interval_secs: {}, \
             snapshot_count: {}, \
             csv: {}, \
             autosave: {}, \
             load_mmap: {} \
             }}",
            self.producer_path.display(),
            self.snapshot_dir.display(),
            self.interval_secs,
            self.snapshot_count,
            self.csv,
            self.autosave,
            self.load_mmap,
        )
    }
}
