//! Index operations over snapshots.
//!
//! - add_snapshot: fold a snapshot's resident pages into an index.
//! - merge / probe: fold (or only compare) one index into another.
//! - test_snapshot: two-tier comparison against a reference index.
//! - diff: digests present in one index and not the other.
//!
//! All traversals are single-threaded and synchronous; indexes and stats are
//! borrowed mutably for the duration of a call.

use std::collections::HashSet;

use log::debug;
use serde::Serialize;

use crate::classify::{classify, ClassifiedPage, CollisionStats, SharingKind};
use crate::digest::{Digest, StableState};
use crate::index::{ContentIndex, IndexEntry, Insertion};
use crate::snapshot::{PageRecord, Snapshot};

fn page_facts<'a>(snap: &'a Snapshot, p: &'a PageRecord) -> ClassifiedPage<'a> {
    ClassifiedPage {
        digest: &p.digest,
        inode: p.inode,
        writable: p.is_writable(),
        region: snap.region_of(p.origin).map(|r| r.kind()),
    }
}

/// Facts for a stored entry. Entries taken from `reference` read its live page
/// record; entries from elsewhere fall back to their copied facts, with the
/// region still resolved in `reference`.
fn entry_facts<'a>(reference: &'a Snapshot, e: &'a IndexEntry) -> ClassifiedPage<'a> {
    match reference.page(e.page) {
        Some(p) => page_facts(reference, p),
        None => ClassifiedPage {
            digest: &e.digest,
            inode: e.inode,
            writable: e.is_writable(),
            region: reference.region_of(e.origin).map(|r| r.kind()),
        },
    }
}

/// Frame-disambiguate a digest collision through `index.by_frame` and classify
/// the incoming page.
fn classify_collision(
    index: &mut ContentIndex,
    stored_frame: u64,
    entry: IndexEntry,
    page: ClassifiedPage<'_>,
    zero: &Digest,
    stats: &mut CollisionStats,
) {
    let kind = if stored_frame == entry.frame {
        SharingKind::Shared
    } else {
        let frame = entry.frame;
        match index.insert_frame(frame, entry) {
            Insertion::Collision(_) => SharingKind::Shared,
            Insertion::Fresh => SharingKind::SharingOp,
        }
    };
    classify(kind, page, zero, stats);
}

/// Insert every resident page of `snap` into `index`.
///
/// A page whose digest is new counts as unshareable. A repeated digest counts
/// as shareable and is classified: Shared when it sits on the stored page's
/// frame or on a frame already recorded for a collision, SharingOp otherwise.
/// Returns the updated `stats.shareable`.
pub fn add_snapshot(index: &mut ContentIndex, snap: &Snapshot, stats: &mut CollisionStats) -> u64 {
    let zero = snap.digest_kind().zero_page();
    let (mut fresh, mut dup) = (0u64, 0u64);

    for (pos, p) in snap.resident_pages() {
        stats.count_reference(p.reference_count, p.inode);

        let entry = IndexEntry::from_page(snap.page_ref(pos), p);
        let stored_frame = match index.insert(entry.clone()) {
            Insertion::Fresh => {
                stats.unshareable += 1;
                fresh += 1;
                continue;
            }
            Insertion::Collision(stored) => stored.frame,
        };
        stats.shareable += 1;
        dup += 1;
        classify_collision(index, stored_frame, entry, page_facts(snap, p), &zero, stats);
    }

    debug!(
        "add_snapshot: pid={} fresh={} dup={} index={} frames={}",
        snap.header.pid,
        fresh,
        dup,
        index.len(),
        index.frame_len()
    );
    stats.shareable
}

/// Classify a digest collision between a stored `dst` entry and an incoming
/// one. Only resident stored entries are counted.
fn classify_stored(
    stored: &IndexEntry,
    incoming_frame: u64,
    reference: &Snapshot,
    zero: &Digest,
    stats: &mut CollisionStats,
) -> bool {
    if !stored.is_resident() {
        return false;
    }
    stats.shareable += 1;
    let kind = if stored.frame == incoming_frame {
        SharingKind::Shared
    } else {
        SharingKind::SharingOp
    };
    classify(kind, entry_facts(reference, stored), zero, stats);
    true
}

/// Fold `src` into `dst`. `reference` is the snapshot `dst`'s colliding
/// entries resolve their regions in. `src` is not modified.
/// Returns the updated `stats.shareable`.
pub fn merge(
    dst: &mut ContentIndex,
    src: &ContentIndex,
    reference: &Snapshot,
    stats: &mut CollisionStats,
) -> u64 {
    let zero = reference.digest_kind().zero_page();
    let (mut added, mut hits) = (0u64, 0u64);

    for e in src.iter() {
        let mut copy = e.clone();
        copy.collisions = 0;
        match dst.insert(copy) {
            Insertion::Fresh => added += 1,
            Insertion::Collision(stored) => {
                if classify_stored(stored, e.frame, reference, &zero, stats) {
                    hits += 1;
                }
            }
        }
    }

    debug!(
        "merge: src={} added={} collisions={} dst={}",
        src.len(),
        added,
        hits,
        dst.len()
    );
    stats.shareable
}

/// Classify `b`'s entries against `a` as [`merge`] would, without modifying
/// `a`. Repeating a probe yields identical deltas.
pub fn probe(a: &ContentIndex, b: &ContentIndex, reference: &Snapshot, stats: &mut CollisionStats) {
    let zero = reference.digest_kind().zero_page();
    let mut hits = 0u64;

    for e in b.iter() {
        if let Some(stored) = a.find_by_digest(&e.digest) {
            if classify_stored(stored, e.frame, reference, &zero, stats) {
                hits += 1;
            }
        }
    }
    debug!("probe: a={} b={} hits={}", a.len(), b.len(), hits);
}

/// Two-tier comparison of `snap` against a reference index.
///
/// Pages found in `primary` are shareable and classified into
/// `primary_stats`: Shared on the stored frame or on a frame known to
/// `primary`'s frame map, otherwise decided by a per-call frame set (first
/// sighting SharingOp, repeats Shared). Pages missing from `primary` go into
/// `secondary`: a fresh digest counts as `primary_stats.unshareable`, a repeat
/// is shareable within `secondary_stats` and classified there.
/// Returns `primary_stats.shareable`.
pub fn test_snapshot(
    snap: &Snapshot,
    primary: &ContentIndex,
    secondary: &mut ContentIndex,
    primary_stats: &mut CollisionStats,
    secondary_stats: &mut CollisionStats,
) -> u64 {
    let zero = snap.digest_kind().zero_page();
    let mut new_frames: HashSet<u64, StableState> = HashSet::default();
    let (mut hits, mut misses) = (0u64, 0u64);

    for (pos, p) in snap.resident_pages() {
        primary_stats.count_reference(p.reference_count, p.inode);

        if let Some(stored) = primary.find_by_digest(&p.digest) {
            hits += 1;
            let kind = if stored.frame == p.frame || primary.find_by_frame(p.frame).is_some() {
                SharingKind::Shared
            } else if new_frames.insert(p.frame) {
                SharingKind::SharingOp
            } else {
                SharingKind::Shared
            };
            primary_stats.shareable += 1;
            classify(kind, page_facts(snap, p), &zero, primary_stats);
            continue;
        }

        misses += 1;
        let entry = IndexEntry::from_page(snap.page_ref(pos), p);
        let stored_frame = match secondary.insert(entry.clone()) {
            Insertion::Fresh => {
                primary_stats.unshareable += 1;
                continue;
            }
            Insertion::Collision(stored) => stored.frame,
        };
        secondary_stats.shareable += 1;
        classify_collision(secondary, stored_frame, entry, page_facts(snap, p), &zero, secondary_stats);
    }

    debug!(
        "test_snapshot: pid={} primary_hits={} misses={} secondary={}",
        snap.header.pid,
        hits,
        misses,
        secondary.len()
    );
    primary_stats.shareable
}

/// Digest-set difference between two indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    /// Digests of `b` missing from `a`.
    pub only_in_b: u64,
    /// Digests of `a` missing from `b`.
    pub only_in_a: u64,
    /// `only_in_a - only_in_b`.
    pub delta: i64,
}

pub fn diff(a: &ContentIndex, b: &ContentIndex) -> DiffReport {
    let only_in_b = b.iter().filter(|e| a.find_by_digest(&e.digest).is_none()).count() as u64;
    let only_in_a = a.iter().filter(|e| b.find_by_digest(&e.digest).is_none()).count() as u64;
    let report = DiffReport {
        only_in_b,
        only_in_a,
        delta: only_in_a as i64 - only_in_b as i64,
    };
    debug!("diff: {:?}", report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestKind;
    use crate::snapshot::{PageOrigin, RegionRecord, SnapshotHeader};

    fn d(b: u8) -> Digest {
        Digest::from_slice(&[b, 0xee]).unwrap()
    }

    fn page(frame: u64, digest: Digest) -> PageRecord {
        PageRecord {
            frame,
            origin: PageOrigin::resident(1),
            digest,
            ..PageRecord::default()
        }
    }

    fn snap(pages: Vec<PageRecord>) -> Snapshot {
        let mut r = RegionRecord::with_label("/usr/bin/app");
        r.page_count = pages.len() as u32;
        r.present_page_count = r.page_count;
        let h = SnapshotHeader {
            pid: 5,
            ..SnapshotHeader::default()
        };
        Snapshot::new(h, vec![r], pages).unwrap()
    }

    #[test]
    fn duplicate_on_different_frames_is_sharing_op() {
        let s = snap(vec![page(1, d(1)), page(2, d(2)), page(3, d(1))]);
        let mut ix = ContentIndex::new();
        let mut st = CollisionStats::new();
        assert_eq!(add_snapshot(&mut ix, &s, &mut st), 1);
        assert_eq!((st.unshareable, st.shareable, st.sharing_op, st.shared), (2, 1, 1, 0));
        assert_eq!(st.sharing_anon, 1);
        assert_eq!(ix.frame_len(), 1);
    }

    #[test]
    fn zero_page_on_same_frame_is_shared_zero() {
        let zero = DigestKind::Md5.zero_page();
        let s = snap(vec![page(9, zero), page(9, zero)]);
        let mut ix = ContentIndex::new();
        let mut st = CollisionStats::new();
        add_snapshot(&mut ix, &s, &mut st);
        assert_eq!((st.shared, st.shared_zero, st.sharing_op), (1, 1, 0));
    }

    #[test]
    fn absent_pages_are_skipped() {
        let mut p = page(4, d(1));
        p.origin = PageOrigin::absent(1);
        let s = snap(vec![p, page(5, d(1))]);
        let mut ix = ContentIndex::new();
        let mut st = CollisionStats::new();
        add_snapshot(&mut ix, &s, &mut st);
        assert_eq!((st.unshareable, st.shareable), (1, 0));
    }

    #[test]
    fn merge_and_probe_agree() {
        let a_snap = snap(vec![page(1, d(1)), page(2, d(2))]);
        let b_snap = snap(vec![page(1, d(1)), page(7, d(2)), page(8, d(3))]);
        let (mut a, mut b) = (ContentIndex::new(), ContentIndex::new());
        let mut scratch = CollisionStats::new();
        add_snapshot(&mut a, &a_snap, &mut scratch);
        add_snapshot(&mut b, &b_snap, &mut scratch);

        let mut probed = CollisionStats::new();
        probe(&a, &b, &a_snap, &mut probed);
        assert_eq!(a.len(), 2);

        let mut merged = CollisionStats::new();
        assert_eq!(merge(&mut a, &b, &a_snap, &mut merged), 2);
        assert_eq!(probed, merged);
        assert_eq!((merged.shared, merged.sharing_op), (1, 1));
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn stored_entries_resolve_regions_in_reference() {
        let a_snap = snap(vec![page(1, d(1))]);
        let b_snap = snap(vec![page(1, d(1))]);
        let (mut a, mut b) = (ContentIndex::new(), ContentIndex::new());
        add_snapshot(&mut a, &a_snap, &mut CollisionStats::new());
        add_snapshot(&mut b, &b_snap, &mut CollisionStats::new());

        // Owned by the reference: read through the live page record.
        let mut own = CollisionStats::new();
        probe(&a, &b, &a_snap, &mut own);
        assert_eq!((own.shared, own.shared_anon), (1, 1));

        // Foreign to the reference: copied facts, region from the reference.
        let mut heap = RegionRecord::with_label("");
        heap.mark(crate::consts::HEAP_MARK);
        heap.page_count = 1;
        let other = Snapshot::new(SnapshotHeader::default(), vec![heap], vec![page(1, d(9))]).unwrap();
        let mut foreign = CollisionStats::new();
        probe(&a, &b, &other, &mut foreign);
        assert_eq!((foreign.shared, foreign.shared_heap), (1, 1));
    }

    #[test]
    fn test_snapshot_two_tier() {
        let base = snap(vec![page(1, d(1)), page(2, d(2))]);
        let mut primary = ContentIndex::new();
        add_snapshot(&mut primary, &base, &mut CollisionStats::new());

        // d1 on the stored frame, d2 twice on a new frame, d5 twice, d6 once.
        let probe_snap = snap(vec![
            page(1, d(1)),
            page(20, d(2)),
            page(20, d(2)),
            page(30, d(5)),
            page(31, d(5)),
            page(40, d(6)),
        ]);
        let mut secondary = ContentIndex::new();
        let (mut ps, mut ss) = (CollisionStats::new(), CollisionStats::new());
        let n = test_snapshot(&probe_snap, &primary, &mut secondary, &mut ps, &mut ss);

        assert_eq!(n, 3);
        assert_eq!((ps.shared, ps.sharing_op), (2, 1));
        assert_eq!(ps.unshareable, 2);
        assert_eq!((ss.shareable, ss.sharing_op, ss.shared), (1, 1, 0));
        assert_eq!(secondary.len(), 2);
    }

    #[test]
    fn diff_counts_both_sides() {
        let (mut a, mut b) = (ContentIndex::new(), ContentIndex::new());
        let mut st = CollisionStats::new();
        add_snapshot(&mut a, &snap(vec![page(1, d(1)), page(2, d(2))]), &mut st);
        add_snapshot(&mut b, &snap(vec![page(1, d(2)), page(2, d(3)), page(3, d(4))]), &mut st);
        let r = diff(&a, &b);
        assert_eq!(r, DiffReport { only_in_b: 2, only_in_a: 1, delta: -1 });
        assert_eq!(diff(&b, &b).only_in_b, 0);
    }
}
