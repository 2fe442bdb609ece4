//! pageshare: memory-page sharing analysis over process snapshots.

// Base layer
pub mod consts;
pub mod error;
pub mod config;
pub mod digest;

// Snapshot model + on-disk format (src/snapshot/{mod,codec,io}.rs)
pub mod snapshot;

// Index and analysis
pub mod index;
pub mod classify;
pub mod ops;

// Producers and text output
pub mod producer;
pub mod report;

pub use classify::{classify, CollisionStats, SharingKind, StatClass, STATS_HEADER};
pub use config::ShareConfig;
pub use digest::{Digest, DigestKind};
pub use error::{Result, SnapError};
pub use index::{ContentIndex, IndexEntry, Insertion};
pub use ops::{add_snapshot, diff, merge, probe, test_snapshot, DiffReport};
pub use producer::{acquire, capture_all, CaptureError, CaptureRequest, KernelProducer, SnapshotProducer};
pub use snapshot::{
    load_snapshot, read_snapshot, save_snapshot, save_snapshot_in, write_snapshot, PageOrigin,
    PageRecord, PageRef, RegionKind, RegionRecord, Snapshot, SnapshotHeader,
};
