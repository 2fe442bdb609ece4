#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use oorandom::Rand64;

use pageshare::consts::{HEAP_MARK, STACK_MARK};
use pageshare::{Digest, PageOrigin, PageRecord, RegionRecord, Snapshot, SnapshotHeader};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("pgstest-{prefix}-{pid}-{t}-{id}"))
}

pub fn digest(n: u64) -> Digest {
    Digest::from_slice(&n.to_le_bytes()).unwrap()
}

pub fn page(frame: u64, d: Digest, region: u32) -> PageRecord {
    PageRecord {
        frame,
        reference_count: 1,
        mapping_count: 1,
        origin: PageOrigin::resident(region),
        digest: d,
        ..PageRecord::default()
    }
}

/// One path region owning every page.
pub fn single_region(pid: i32, pages: Vec<PageRecord>) -> Snapshot {
    let mut r = RegionRecord::with_label("/usr/lib/libfoo.so");
    r.page_count = pages.len() as u32;
    r.present_page_count = r.page_count;
    let h = SnapshotHeader {
        pid,
        ..SnapshotHeader::default()
    };
    Snapshot::new(h, vec![r], pages).unwrap()
}

/// Random snapshot: four regions (stack, heap, path, other), digests drawn from
/// a small alphabet and frames from a small range so collisions are common.
pub fn random_snapshot(rng: &mut Rand64, pid: i32, pages: usize, alphabet: u64) -> Snapshot {
    let labels: [&[u8]; 4] = [&[STACK_MARK], &[HEAP_MARK], b"/lib/x.so", b"[vdso]"];
    let per = pages / labels.len();
    let mut regions = Vec::new();
    for (i, l) in labels.iter().enumerate() {
        let mut r = RegionRecord::default();
        r.set_label(l);
        r.start_address = 0x1000_0000 * (i as u64 + 1);
        r.page_start_index = (i * per) as u32;
        r.page_count = if i + 1 == labels.len() {
            (pages - i * per) as u32
        } else {
            per as u32
        };
        r.present_page_count = r.page_count;
        regions.push(r);
    }

    let mut out = Vec::with_capacity(pages);
    for i in 0..pages {
        let region = (regions
            .iter()
            .position(|r| {
                let s = r.page_start_index as usize;
                i >= s && i < s + r.page_count as usize
            })
            .unwrap_or(0)
            + 1) as u32;
        let resident = rng.rand_range(0..5) != 0;
        out.push(PageRecord {
            frame: rng.rand_range(1..(pages as u64 / 2 + 2)),
            access_flags: rng.rand_range(0..4),
            inode: if rng.rand_range(0..2) == 0 { 0 } else { rng.rand_range(1..10) },
            reference_count: rng.rand_range(0..4) as i32,
            mapping_count: 1,
            origin: if resident {
                PageOrigin::resident(region)
            } else {
                PageOrigin::absent(region)
            },
            digest: digest(rng.rand_range(0..alphabet)),
            ..PageRecord::default()
        });
    }
    let h = SnapshotHeader {
        pid,
        ts_begin: rng.rand_range(1..1_000_000) as u32,
        ..SnapshotHeader::default()
    };
    Snapshot::new(h, regions, out).unwrap()
}
