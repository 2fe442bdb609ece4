//! Shared constants: capture flags, record layout, region markers.

// -------- Capture flags (request + header.flags) --------
/// Only resident pages are stored (human-readable/present-only capture).
pub const VMS_ONLY_PRESENT_PAGES: i32 = 1;
/// Physical snapshots: keep only page-cache backed frames.
pub const VMS_FILECACHE_ONLY: i32 = 2;
/// Raw transfer of header + two blobs (always used for fast acquisition).
pub const VMS_ALLOW_RAW_OUTPUT: i32 = 8;

pub const VMS_HASH_CRC32: i32 = 16;
pub const VMS_HASH_CRC32_EX: i32 = 32;
pub const VMS_HASH_PATTERN: i32 = 64;
pub const VMS_HASH_SHA1: i32 = 128;
pub const VMS_HASH_SUPERFAST: i32 = 256;

// -------- Format --------
/// Version tag written by the producer. Loaders do not check it.
pub const SNAPSHOT_VERSION: u32 = 0x42;
pub const SNAPSHOT_EXT: &str = "snapshot";

/// Widest supported digest (SHA-1). Shorter digests are zero-padded.
pub const DIGEST_LEN: usize = 20;
/// Inline region name buffer.
pub const LABEL_LEN: usize = 40;

/// Header: 6 x u32/i32, 15 words, region_count i32, 6 words.
pub const fn header_size(word: usize) -> usize {
    6 * 4 + 15 * word + 4 + 6 * word
}

/// Region: start, end, flags, protection, private (5 words), 4 x u32,
/// file_offset, inode (2 words), label.
pub const fn region_record_size(word: usize) -> usize {
    7 * word + 4 * 4 + LABEL_LEN
}

/// Page: frame, access, page flags, inode (4 words), 4 x i32, digest.
pub const fn page_record_size(word: usize) -> usize {
    4 * word + 4 * 4 + DIGEST_LEN
}

// -------- Region label markers --------
pub const HEAP_MARK: u8 = 2;
pub const STACK_MARK: u8 = 4;
pub const PATH_MARK: u8 = b'/';

// -------- Page/region flag bits used by the core --------
/// PTE bit 1: read/write.
pub const PTE_WRITABLE: u64 = 2;
/// VM_IO region flag; regions with nothing but this bit have no listable pages.
pub const VM_IO: u64 = 0x0000_4000;

pub const PAGE_SIZE: u64 = 4096;

// -------- Producer --------
pub const PRODUCER_PATH: &str = "/proc/vm_snapshot";
/// Chunk size the producer hands out per read.
pub const PRODUCER_CHUNK: usize = 4096;
