//! Content-addressed page index.
//!
//! Two maps:
//! - by_digest: digest -> first page seen with that content;
//! - by_frame: frame -> first colliding page seen on that frame (filled only
//!   when a digest collision needs frame disambiguation).
//!
//! Entries never own snapshot memory. An entry names its page by
//! (snapshot tag, position) and carries a copy of the facts the classifier
//! needs, so dropping or clearing an index never touches a snapshot.

use std::collections::hash_map::{Entry, HashMap};

use crate::digest::{Digest, StableState};
use crate::snapshot::{PageOrigin, PageRecord};

pub use crate::snapshot::PageRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub page: PageRef,
    pub frame: u64,
    pub access_flags: u64,
    pub inode: u64,
    pub origin: PageOrigin,
    pub digest: Digest,
    /// Later pages that collided with this entry.
    pub collisions: u32,
}

impl IndexEntry {
    pub fn from_page(page: PageRef, p: &PageRecord) -> Self {
        Self {
            page,
            frame: p.frame,
            access_flags: p.access_flags,
            inode: p.inode,
            origin: p.origin,
            digest: p.digest,
            collisions: 0,
        }
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.origin.resident
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.access_flags & crate::consts::PTE_WRITABLE != 0
    }
}

/// Outcome of an insert.
#[derive(Debug, PartialEq, Eq)]
pub enum Insertion<'a> {
    /// Key was new; the entry is now stored.
    Fresh,
    /// Key already present; the stored entry is returned unchanged except for
    /// its collision counter.
    Collision(&'a IndexEntry),
}

impl Insertion<'_> {
    #[inline]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Insertion::Fresh)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ContentIndex {
    by_digest: HashMap<Digest, IndexEntry, StableState>,
    by_frame: HashMap<u64, IndexEntry, StableState>,
}

fn insert_keyed<K>(map: &mut HashMap<K, IndexEntry, StableState>, key: K, e: IndexEntry) -> Insertion<'_>
where
    K: std::hash::Hash + Eq,
{
    match map.entry(key) {
        Entry::Vacant(v) => {
            v.insert(e);
            Insertion::Fresh
        }
        Entry::Occupied(o) => {
            let stored = o.into_mut();
            stored.collisions = stored.collisions.saturating_add(1);
            Insertion::Collision(stored)
        }
    }
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keyed by the entry's digest. First occurrence wins.
    pub fn insert(&mut self, entry: IndexEntry) -> Insertion<'_> {
        let key = entry.digest;
        insert_keyed(&mut self.by_digest, key, entry)
    }

    /// Insert keyed by `frame`. First occurrence wins.
    pub fn insert_frame(&mut self, frame: u64, entry: IndexEntry) -> Insertion<'_> {
        insert_keyed(&mut self.by_frame, frame, entry)
    }

    #[inline]
    pub fn find_by_digest(&self, digest: &Digest) -> Option<&IndexEntry> {
        self.by_digest.get(digest)
    }

    #[inline]
    pub fn find_by_frame(&self, frame: u64) -> Option<&IndexEntry> {
        self.by_frame.get(&frame)
    }

    /// Drop every entry. Snapshots referenced by the entries are untouched.
    pub fn clear(&mut self) {
        self.by_digest.clear();
        self.by_frame.clear();
    }

    /// Number of distinct digests.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        self.by_frame.len()
    }

    /// Collisions recorded against the digest's entry (0 if absent).
    pub fn collision_count(&self, digest: &Digest) -> u32 {
        self.by_digest.get(digest).map(|e| e.collisions).unwrap_or(0)
    }

    /// Digest entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.by_digest.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotTag;

    fn entry(pos: usize, frame: u64, d: u8) -> IndexEntry {
        let p = PageRecord {
            frame,
            origin: PageOrigin::resident(1),
            digest: Digest::from_slice(&[d]).unwrap(),
            ..PageRecord::default()
        };
        let page = PageRef {
            snapshot: SnapshotTag(1),
            position: pos as u32,
        };
        IndexEntry::from_page(page, &p)
    }

    #[test]
    fn first_occurrence_wins_and_counts_collisions() {
        let mut ix = ContentIndex::new();
        assert!(ix.insert(entry(0, 10, 1)).is_fresh());
        match ix.insert(entry(5, 11, 1)) {
            Insertion::Collision(stored) => {
                assert_eq!(stored.page.position, 0);
                assert_eq!(stored.frame, 10);
                assert_eq!(stored.collisions, 1);
            }
            Insertion::Fresh => panic!("expected collision"),
        }
        let _ = ix.insert(entry(6, 12, 1));
        assert_eq!(ix.collision_count(&Digest::from_slice(&[1]).unwrap()), 2);
        assert_eq!(ix.len(), 1);
        assert_eq!(ix.frame_len(), 0);
    }

    #[test]
    fn frame_map_is_separate() {
        let mut ix = ContentIndex::new();
        assert!(ix.insert_frame(42, entry(0, 42, 1)).is_fresh());
        assert!(!ix.insert_frame(42, entry(1, 42, 2)).is_fresh());
        assert!(ix.find_by_frame(42).is_some());
        assert!(ix.find_by_digest(&Digest::from_slice(&[1]).unwrap()).is_none());
        ix.clear();
        assert!(ix.is_empty());
        assert_eq!(ix.frame_len(), 0);
    }
}
