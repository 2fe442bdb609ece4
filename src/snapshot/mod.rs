//! Captured memory state: header + regions + pages.
//!
//! Contents:
//! - model types (`SnapshotHeader`, `RegionRecord`, `PageRecord`, `PageOrigin`);
//! - codec: packed little-endian layout at native word width;
//! - io: save/load of `.snapshot` files.
//!
//! The index layer reads snapshots only. The one mutation outside the producer
//! is [`Snapshot::mark_heap_and_stack`], a preprocessing step run before
//! indexing.

pub mod codec;
pub mod io;

use std::borrow::Cow;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

use crate::consts::{
    page_record_size, region_record_size, HEAP_MARK, LABEL_LEN, PATH_MARK, PTE_WRITABLE,
    SNAPSHOT_EXT, SNAPSHOT_VERSION, STACK_MARK, VMS_ONLY_PRESENT_PAGES,
};
use crate::digest::{Digest, DigestKind};
use crate::error::{Result, SnapError};

pub use codec::{read_snapshot, write_snapshot};
pub use io::{load_snapshot, save_snapshot, save_snapshot_in};

/// Word width of this platform, as recorded in the header.
pub const NATIVE_WORD: usize = std::mem::size_of::<usize>();

static NEXT_TAG: AtomicU32 = AtomicU32::new(1);

/// Process-local identity of a snapshot value. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotTag(pub u32);

impl SnapshotTag {
    fn next() -> Self {
        SnapshotTag(NEXT_TAG.fetch_add(1, Ordering::Relaxed))
    }
}

/// Arena reference to a page record: the owning snapshot's tag plus the
/// record's position in its page list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRef {
    pub snapshot: SnapshotTag,
    pub position: u32,
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotHeader {
    pub version: u32,
    pub word_size: u32,
    /// 0 = whole physical memory.
    pub pid: i32,
    pub flags: i32,
    pub ts_begin: u32,
    pub ts_end: u32,

    pub total_pages: u64,
    pub locked_pages: u64,
    pub anonymous_pages: u64,
    pub shared_pages: u64,
    pub physical_pages: u64,
    pub shared_physical_pages: u64,
    pub stack_pages: u64,
    pub exec_pages: u64,

    pub code_start: u64,
    pub code_end: u64,
    pub heap_start: u64,
    pub heap_end: u64,
    pub data_start: u64,
    pub data_end: u64,
    pub stack_start: u64,

    pub region_count: i32,
    /// Byte length of the region blob.
    pub regions_len: u64,
    /// Byte length of the page blob.
    pub pages_len: u64,
    pub swapped_pages: u64,
    /// Page records actually filled by the producer.
    pub available_pages: u64,

    /// Trailing producer words (in-kernel array addresses); opaque, preserved.
    pub reserved: [u64; 2],
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            word_size: NATIVE_WORD as u32,
            pid: 0,
            flags: 0,
            ts_begin: 0,
            ts_end: 0,
            total_pages: 0,
            locked_pages: 0,
            anonymous_pages: 0,
            shared_pages: 0,
            physical_pages: 0,
            shared_physical_pages: 0,
            stack_pages: 0,
            exec_pages: 0,
            code_start: 0,
            code_end: 0,
            heap_start: 0,
            heap_end: 0,
            data_start: 0,
            data_end: 0,
            stack_start: 0,
            region_count: 0,
            regions_len: 0,
            pages_len: 0,
            swapped_pages: 0,
            available_pages: 0,
            reserved: [0, 0],
        }
    }
}

impl SnapshotHeader {
    #[inline]
    pub fn digest_kind(&self) -> DigestKind {
        DigestKind::from_flags(self.flags)
    }

    #[inline]
    pub fn is_physical(&self) -> bool {
        self.pid == 0
    }

    #[inline]
    pub fn only_present_pages(&self) -> bool {
        self.flags & VMS_ONLY_PRESENT_PAGES != 0
    }

    /// Capture duration in the producer's timestamp unit.
    pub fn duration(&self) -> i64 {
        self.ts_end as i64 - self.ts_begin as i64
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// Which region produced a page and whether its content was captured.
///
/// Persisted as one signed value: magnitude = 1-based region index, negative =
/// resident. `region == 0` means no region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PageOrigin {
    pub region: u32,
    pub resident: bool,
}

impl PageOrigin {
    pub fn resident(region: u32) -> Self {
        Self { region, resident: true }
    }

    pub fn absent(region: u32) -> Self {
        Self { region, resident: false }
    }

    pub fn from_raw(raw: i32) -> Self {
        Self {
            region: raw.unsigned_abs(),
            resident: raw < 0,
        }
    }

    pub fn to_raw(self) -> i32 {
        let magnitude = self.region as i32;
        if self.resident {
            magnitude.wrapping_neg()
        } else {
            magnitude
        }
    }

    /// Whether [`to_raw`](Self::to_raw) keeps both halves. Region indices
    /// above `i32::MAX` only fit as the resident `i32::MIN`.
    pub fn is_encodable(self) -> bool {
        self.region <= i32::MAX as u32 || (self.resident && self.region == 1 << 31)
    }

    /// 0-based position in the snapshot's region list.
    #[inline]
    pub fn region_slot(self) -> Option<usize> {
        (self.region as usize).checked_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageRecord {
    pub frame: u64,
    pub access_flags: u64,
    pub page_flags: u64,
    pub inode: u64,
    pub reference_count: i32,
    pub mapping_count: i32,
    pub origin: PageOrigin,
    /// Producer-side reserved slot; informational.
    pub collision_count: i32,
    pub digest: Digest,
}

impl PageRecord {
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.origin.resident
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.access_flags & PTE_WRITABLE != 0
    }
}

// ---------------------------------------------------------------------------
// Regions
// ---------------------------------------------------------------------------

/// Meaning of the first label byte, resolved once per region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegionKind {
    Stack,
    Heap,
    /// `/`-prefixed: file path or a pseudo path.
    Path,
    Other,
}

impl RegionKind {
    pub fn from_label(label: &[u8]) -> Self {
        match label.first().copied() {
            Some(STACK_MARK) => RegionKind::Stack,
            Some(HEAP_MARK) => RegionKind::Heap,
            Some(PATH_MARK) => RegionKind::Path,
            _ => RegionKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRecord {
    pub start_address: u64,
    pub end_address: u64,
    pub flags: u64,
    pub protection_flags: u64,
    /// Producer-private word; opaque, preserved.
    pub private_data: u64,
    pub page_count: u32,
    pub present_page_count: u32,
    pub swapped_page_count: u32,
    pub page_start_index: u32,
    pub file_offset: u64,
    pub inode: u64,
    label: [u8; LABEL_LEN],
    kind: RegionKind,
}

impl Default for RegionRecord {
    fn default() -> Self {
        Self {
            start_address: 0,
            end_address: 0,
            flags: 0,
            protection_flags: 0,
            private_data: 0,
            page_count: 0,
            present_page_count: 0,
            swapped_page_count: 0,
            page_start_index: 0,
            file_offset: 0,
            inode: 0,
            label: [0u8; LABEL_LEN],
            kind: RegionKind::Other,
        }
    }
}

impl RegionRecord {
    /// Region with the given label (truncated to the inline buffer, NUL padded).
    pub fn with_label(name: &str) -> Self {
        let mut r = Self::default();
        r.set_label(name.as_bytes());
        r
    }

    #[inline]
    pub fn label(&self) -> &[u8; LABEL_LEN] {
        &self.label
    }

    /// Label up to the first NUL.
    pub fn name(&self) -> Cow<'_, str> {
        let end = self.label.iter().position(|&b| b == 0).unwrap_or(LABEL_LEN);
        String::from_utf8_lossy(&self.label[..end])
    }

    #[inline]
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn set_label(&mut self, raw: &[u8]) {
        let n = raw.len().min(LABEL_LEN);
        self.label = [0u8; LABEL_LEN];
        self.label[..n].copy_from_slice(&raw[..n]);
        self.kind = RegionKind::from_label(&self.label);
    }

    /// Replace the label with a single marker byte.
    pub fn mark(&mut self, marker: u8) {
        self.label[0] = marker;
        self.label[1] = 0;
        self.kind = RegionKind::from_label(&self.label);
    }

    /// Page records this region owns in the page list.
    pub fn stored_pages(&self, only_present: bool) -> u32 {
        if only_present {
            self.present_page_count
        } else {
            self.page_count
        }
    }

    pub(crate) fn from_raw_label(mut self, label: [u8; LABEL_LEN]) -> Self {
        self.label = label;
        self.kind = RegionKind::from_label(&label);
        self
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub header: SnapshotHeader,
    regions: Vec<RegionRecord>,
    pages: Vec<PageRecord>,
    tag: SnapshotTag,
}

impl Snapshot {
    /// Assemble a snapshot and recompute the derived header fields
    /// (word size, region count, blob lengths; available pages if zero).
    pub fn new(
        mut header: SnapshotHeader,
        regions: Vec<RegionRecord>,
        pages: Vec<PageRecord>,
    ) -> Result<Self> {
        if let Some(i) = pages.iter().position(|p| !p.origin.is_encodable()) {
            return Err(SnapError::invalid(format!(
                "page {} origin region {} does not fit the persisted origin",
                i, pages[i].origin.region
            )));
        }
        header.word_size = NATIVE_WORD as u32;
        header.region_count = i32::try_from(regions.len())
            .map_err(|_| SnapError::invalid("too many regions"))?;
        header.regions_len = (regions.len() * region_record_size(NATIVE_WORD)) as u64;
        header.pages_len = (pages.len() * page_record_size(NATIVE_WORD)) as u64;
        if header.available_pages == 0 || header.available_pages > pages.len() as u64 {
            header.available_pages = pages.len() as u64;
        }
        let snap = Self::from_parts(header, regions, pages);
        snap.validate()?;
        Ok(snap)
    }

    /// No recomputation, no validation; used by the codec.
    pub(crate) fn from_parts(
        header: SnapshotHeader,
        regions: Vec<RegionRecord>,
        pages: Vec<PageRecord>,
    ) -> Self {
        Self {
            header,
            regions,
            pages,
            tag: SnapshotTag::next(),
        }
    }

    #[inline]
    pub fn tag(&self) -> SnapshotTag {
        self.tag
    }

    /// Reference to the page at `position` in this snapshot.
    pub fn page_ref(&self, position: usize) -> PageRef {
        PageRef {
            snapshot: self.tag,
            position: position as u32,
        }
    }

    /// Resolve a page reference. `None` when it belongs to another snapshot
    /// or lies past the page list.
    pub fn page(&self, r: PageRef) -> Option<&PageRecord> {
        if r.snapshot != self.tag {
            return None;
        }
        self.pages.get(r.position as usize)
    }

    #[inline]
    pub fn regions(&self) -> &[RegionRecord] {
        &self.regions
    }

    #[inline]
    pub fn pages(&self) -> &[PageRecord] {
        &self.pages
    }

    #[inline]
    pub fn digest_kind(&self) -> DigestKind {
        self.header.digest_kind()
    }

    /// Page records filled by the producer (first `available_pages`).
    pub fn available(&self) -> &[PageRecord] {
        let n = usize::try_from(self.header.available_pages)
            .unwrap_or(usize::MAX)
            .min(self.pages.len());
        &self.pages[..n]
    }

    /// Resident available pages with their positions in the page list.
    pub fn resident_pages(&self) -> impl Iterator<Item = (usize, &PageRecord)> + '_ {
        self.available()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_resident())
    }

    /// Region addressed by a page origin.
    pub fn region_of(&self, origin: PageOrigin) -> Option<&RegionRecord> {
        origin.region_slot().and_then(|i| self.regions.get(i))
    }

    /// Page records owned by the region at `slot`.
    pub fn pages_of_region(&self, slot: usize) -> Option<&[PageRecord]> {
        let r = self.regions.get(slot)?;
        let start = r.page_start_index as usize;
        let end = start + r.stored_pages(self.header.only_present_pages()) as usize;
        self.pages.get(start..end)
    }

    /// Check structural invariants: header counts agree with the arrays and
    /// every region's page range lies within the page list.
    pub fn validate(&self) -> Result<()> {
        if self.header.region_count < 0 || self.header.region_count as usize != self.regions.len() {
            return Err(SnapError::format(format!(
                "region_count {} disagrees with {} regions",
                self.header.region_count,
                self.regions.len()
            )));
        }
        let only_present = self.header.only_present_pages();
        for (i, r) in self.regions.iter().enumerate() {
            let end = r.page_start_index as u64 + r.stored_pages(only_present) as u64;
            if end > self.pages.len() as u64 {
                return Err(SnapError::format(format!(
                    "region {} pages [{}..{}) exceed page list of {}",
                    i,
                    r.page_start_index,
                    end,
                    self.pages.len()
                )));
            }
        }
        Ok(())
    }

    /// Mark the regions starting at the header's stack/heap addresses.
    /// Returns a bitmask: 1 = stack marked, 2 = heap marked (3 when both).
    pub fn mark_heap_and_stack(&mut self) -> u32 {
        let mut marked = 0;
        let (stack, heap) = (self.header.stack_start, self.header.heap_start);
        for r in self.regions.iter_mut() {
            if r.start_address == stack {
                r.mark(STACK_MARK);
                marked += 1;
                continue;
            }
            if r.start_address == heap {
                r.mark(HEAP_MARK);
                marked += 2;
            }
        }
        marked
    }

    /// Resident pages whose producer-reported reference count exceeds one.
    pub fn count_shared_pages(&self) -> usize {
        self.resident_pages()
            .filter(|(_, p)| p.reference_count > 1)
            .count()
    }

    /// Regions whose label is `/`-prefixed.
    pub fn count_path_regions(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| r.kind() == RegionKind::Path)
            .count()
    }

    /// `<pid>-<ts_begin hex>.snapshot`
    pub fn default_file_name(&self) -> String {
        format!("{}-{:x}.{}", self.header.pid, self.header.ts_begin, SNAPSHOT_EXT)
    }
}
