//! Text rendering of snapshots: flag strings, info records, region and page
//! listings. Everything returns owned strings; callers decide where to print.

use std::fmt::Write as _;

use log::warn;

use crate::consts::{PAGE_SIZE, VM_IO, VMS_HASH_SHA1};
use crate::error::{Result, SnapError};
use crate::snapshot::{PageRecord, RegionRecord, Snapshot};

// ---------------------------------------------------------------------------
// Flag tables (bit i -> entry i)
// ---------------------------------------------------------------------------

const VM_CHARS: [&str; 32] = [
    "R", "W", "X", "S", "r", "w", "x", "s", "G", "p", "F", "N", "E", "L", "I", "+", "?", "C", "!",
    "|", "A", "#", "H", "~", "h", "i", "D", "*", "m", "Y", "@", "M",
];

const VM_NAMES: [&str; 32] = [
    "VM_READ",
    "VM_WRITE",
    "VM_EXEC",
    "VM_SHARED",
    "VM_MAYREAD",
    "VM_MAYWRITE",
    "VM_MAYEXEC",
    "VM_MAYSHARE",
    "VM_GROWSDOWN",
    "VM_NOHUGEPAGE",
    "VM_PFNMAP",
    "VM_DENYWRITE",
    "VM_EXECUTABLE",
    "VM_LOCKED",
    "VM_IO",
    "VM_SEQ_READ",
    "VM_RAND_READ",
    "VM_DONTCOPY",
    "VM_DONTEXPAND",
    "VM_RESERVED",
    "VM_ACCOUNT",
    "VM_NORESERVE",
    "VM_HUGETLB",
    "VM_NONLINEAR",
    "VM_HUGEPAGE",
    "VM_INSERTPAGE",
    "VM_ALWAYSDUMP",
    "VM_CAN_NONLINEAR",
    "VM_MIXEDMAP",
    "VM_SAO",
    "VM_PFN_AT_MMAP",
    "VM_MERGEABLE",
];

const PTE_CHARS: [&str; 13] = [
    "Pr", "RW", "Us", "PW", "PC", "Ac", "Dr", "PS", "PT", "Gl", "Un", "IO", "Hd",
];

const PTE_NAMES: [&str; 13] = [
    "Present",
    "ReadWrite",
    "Userspace",
    "PageWriteThrough",
    "PageCacheDisabled",
    "Accessed",
    "Dirty",
    "PSE",
    "PAT",
    "Global",
    "Unused1",
    "IO Map",
    "Hidden",
];

const PTE_NX: u64 = 1 << 63;

const PAGE_CHARS: [&str; 24] = [
    "L", "e", "R", "u", "d", "l", "A", "s", "o", "a", "r", "p", "2", "w", "c", "s", "m", "C", "w",
    "u", "M", "n", "P", "K",
];

const PAGE_NAMES: [&str; 24] = [
    "PG_locked",
    "PG_error",
    "PG_referenced",
    "PG_uptodate",
    "PG_dirty",
    "PG_lru",
    "PG_active",
    "PG_slab",
    "PG_owner_priv1",
    "PG_arch_1",
    "PG_reserved",
    "PG_private",
    "PG_private_2",
    "PG_writeback",
    "PG_compound",
    "PG_swapcache",
    "PG_mappedtodisk",
    "PG_reclaim",
    "PG_swapbacked",
    "PG_unevictable",
    "PG_mlocked",
    "PG_uncached",
    "PG_hwpoison",
    "PG_compound_lock",
];

fn chars(flags: u64, table: &[&str], unset: &str) -> String {
    let mut s = String::with_capacity(table.len() * 2);
    for (i, c) in table.iter().enumerate() {
        s.push_str(if flags & (1u64 << i) != 0 { *c } else { unset });
    }
    s
}

fn names(flags: u64, table: &[&str], sep: &str) -> String {
    let mut s = String::new();
    for (i, n) in table.iter().enumerate() {
        if flags & (1u64 << i) != 0 {
            s.push_str(sep);
            s.push_str(n);
        }
    }
    s
}

/// One char per VM flag bit, `-` when clear.
pub fn vm_flags(flags: u64) -> String {
    chars(flags, &VM_CHARS, "-")
}

/// Set VM flags as ` | VM_X` terms.
pub fn vm_flag_names(flags: u64) -> String {
    names(flags, &VM_NAMES, " | ")
}

/// Two chars per low PTE bit plus the NX bit, `--` when clear.
pub fn pte_flags(flags: u64) -> String {
    let mut s = chars(flags, &PTE_CHARS, "--");
    s.push_str(if flags & PTE_NX != 0 { "NX" } else { "--" });
    s
}

pub fn pte_flag_names(flags: u64) -> String {
    let mut s = names(flags, &PTE_NAMES, " ");
    if flags & PTE_NX != 0 {
        s.push_str(" NX");
    }
    s
}

pub fn page_flags(flags: u64) -> String {
    chars(flags, &PAGE_CHARS, "-")
}

pub fn page_flag_names(flags: u64) -> String {
    names(flags, &PAGE_NAMES, " ")
}

// ---------------------------------------------------------------------------
// Snapshot info
// ---------------------------------------------------------------------------

/// `pid;flags;ts;duration;total;physical;swapped;available;locked;swapped;
/// code_start;code_end;exec;data_start;data_end;heap_start;heap_end;
/// stack_start;stack_pages;regions;`
pub fn snapshot_info_record(snap: &Snapshot) -> String {
    let h = &snap.header;
    format!(
        "{};{:x};{};{};{};{};{};{};{};{};0x{:x};0x{:x};{};0x{:x};0x{:x};0x{:x};0x{:x};0x{:x};{};{};",
        h.pid,
        h.flags,
        h.ts_begin,
        h.duration(),
        h.total_pages,
        h.physical_pages,
        h.swapped_pages,
        h.available_pages,
        h.locked_pages,
        h.swapped_pages,
        h.code_start,
        h.code_end,
        h.exec_pages,
        h.data_start,
        h.data_end,
        h.heap_start,
        h.heap_end,
        h.stack_start,
        h.stack_pages,
        h.region_count,
    )
}

/// Multi-line human form. Physical snapshots reuse some counters with
/// different meanings, so they get their own layout.
pub fn snapshot_info(snap: &Snapshot) -> String {
    let h = &snap.header;
    let mut s = String::new();
    let avail_bytes = h.available_pages.saturating_mul(PAGE_SIZE);
    if !h.is_physical() {
        let _ = writeln!(s, "Snapshot of {} with flags {:x}", h.pid, h.flags);
        let _ = writeln!(s, "Timestamp:      {} Tock: {}", h.ts_begin, h.duration());
        let _ = writeln!(s, "TotalPages:     {} pages", h.total_pages);
        let _ = writeln!(s, "PhysicalPages:  {} pages present", h.physical_pages);
        let _ = writeln!(s, "AvailablePages: {} pages => {} bytes", h.available_pages, avail_bytes);
        let _ = writeln!(s, "LockedPages:    {} pages", h.locked_pages);
        let _ = writeln!(s, "SwappedPages:   {} pages", h.swapped_pages);
        let _ = writeln!(
            s,
            "Executable:     0x{:x} - 0x{:x} {} pages",
            h.code_start, h.code_end, h.exec_pages
        );
        let _ = writeln!(s, "Data:           0x{:x} - 0x{:x}", h.data_start, h.data_end);
        let _ = writeln!(s, "Heap:           0x{:x} - 0x{:x}", h.heap_start, h.heap_end);
        let _ = writeln!(s, "Stack:          0x{:x} {} pages", h.stack_start, h.stack_pages);
        let _ = writeln!(s, "Contains {} Virtual Memory Regions", h.region_count);
    } else {
        let _ = writeln!(s, "Snapshot of physical memory with flags {:x}", h.flags);
        let _ = writeln!(s, "Timestamp:      {} Tock: {}", h.ts_begin, h.duration());
        let _ = writeln!(s, "TotalPages:     {} pages", h.total_pages);
        let _ = writeln!(s, "AnonymousPages: {} pages", h.physical_pages);
        let _ = writeln!(s, "ASPages:        {} pages", h.exec_pages);
        let _ = writeln!(s, "NamedPages:     {} pages have associated files", h.swapped_pages);
        let _ = writeln!(s, "AvailablePages: {} pages => {} bytes", h.available_pages, avail_bytes);
        let _ = writeln!(s, "InvalidPFNs:    {} PhysicalFrameNumbers", h.locked_pages);
    }
    s
}

// ---------------------------------------------------------------------------
// Regions and pages
// ---------------------------------------------------------------------------

/// `start;end;vm flags;pte flags;pages;present;swapped;name;`
pub fn region_line(r: &RegionRecord) -> String {
    format!(
        "{:x};{:x};{};{};{};{};{};{};",
        r.start_address,
        r.end_address,
        vm_flags(r.flags),
        pte_flags(r.protection_flags),
        r.page_count,
        r.present_page_count,
        r.swapped_page_count,
        r.name()
    )
}

/// `frame;refs;maps;pte flags;page flags;inode;digest`
pub fn page_line(snap: &Snapshot, p: &PageRecord) -> String {
    let width = if snap.header.flags & VMS_HASH_SHA1 != 0 { 20 } else { 16 };
    format!(
        "{:6x};{:3};{:3};{};{};{};{}",
        p.frame,
        p.reference_count,
        p.mapping_count,
        pte_flags(p.access_flags),
        page_flags(p.page_flags),
        p.inode,
        p.digest.to_hex(width)
    )
}

fn check_range(start: usize, count: usize, len: usize, what: &str) -> Result<()> {
    match start.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(SnapError::invalid(format!(
            "{} range {}+{} exceeds {}",
            what, start, count, len
        ))),
    }
}

pub fn region_lines(snap: &Snapshot, start: usize, count: usize) -> Result<Vec<String>> {
    check_range(start, count, snap.regions().len(), "region")?;
    Ok(snap.regions()[start..start + count]
        .iter()
        .map(region_line)
        .collect())
}

/// Lines for available pages `[start, start + count)`. Present-only captures
/// skip pages whose content was not captured.
pub fn page_lines(snap: &Snapshot, start: usize, count: usize) -> Result<Vec<String>> {
    let avail = snap.available();
    check_range(start, count, avail.len(), "page")?;
    let only_present = snap.header.only_present_pages();
    Ok(avail[start..start + count]
        .iter()
        .filter(|p| !only_present || p.is_resident())
        .map(|p| page_line(snap, p))
        .collect())
}

/// Every region followed by its pages. Regions flagged with nothing but
/// `VM_IO` list no pages. A region whose page range runs past the available
/// pages gets an `error` line in place of its pages; the listing continues.
pub fn region_listing(snap: &Snapshot) -> Vec<String> {
    let only_present = snap.header.only_present_pages();
    let mut out = Vec::new();
    for r in snap.regions() {
        out.push(region_line(r));
        if r.flags & !VM_IO == 0 {
            continue;
        }
        let n = r.stored_pages(only_present) as usize;
        match page_lines(snap, r.page_start_index as usize, n) {
            Ok(lines) => out.extend(lines),
            Err(e) => {
                warn!("region_listing: pid={} {}: {}", snap.header.pid, r.name(), e);
                out.push(format!("error;{}", e));
            }
        }
    }
    out
}

/// Human info block followed by the full region listing.
pub fn render_snapshot(snap: &Snapshot) -> String {
    let mut s = snapshot_info(snap);
    for line in region_listing(snap) {
        s.push_str(&line);
        s.push('\n');
    }
    s
}
