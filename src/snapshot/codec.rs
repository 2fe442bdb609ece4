// src/snapshot/codec.rs
//
// Persisted snapshot layout (LE, packed, W = native word width):
//
// header (28 + 21*W):
//   u32 version          (0x42, not checked on read)
//   u32 word_size        (must equal W)
//   i32 pid              (0 = physical memory)
//   i32 flags
//   u32 ts_begin, u32 ts_end
//   W   total, locked, anonymous, shared, physical, shared_physical, stack, exec
//   W   code_start, code_end, heap_start, heap_end, data_start, data_end, stack_start
//   i32 region_count
//   W   regions_len, pages_len, swapped, available
//   W   reserved[2]
// regions (regions_len bytes, 7*W + 16 + 40 each):
//   W start, end, flags, protection, private; u32 page_count, present, swapped,
//   page_start; W file_offset, inode; [u8; 40] label
// pages (pages_len bytes, 4*W + 16 + 20 each):
//   W frame, access_flags, page_flags, inode; i32 ref_count, map_count, origin,
//   collisions; [u8; 20] digest
//
// Policy:
// - word_size != W -> FormatMismatch (addresses and counts are stored at W).
// - blob lengths must be whole records and agree with region_count.
// - short reads surface as Io(UnexpectedEof). Record vectors start with a
//   bounded reservation and grow as records arrive, so an inflated length
//   never allocates ahead of the data.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{PageOrigin, PageRecord, RegionRecord, Snapshot, SnapshotHeader, NATIVE_WORD};
use crate::consts::{header_size, page_record_size, region_record_size, DIGEST_LEN, LABEL_LEN};
use crate::digest::Digest;
use crate::error::{Result, SnapError};

// ---- word helpers ----

fn write_word<W: Write>(w: &mut W, v: u64, word: usize) -> io::Result<()> {
    if word == 8 {
        w.write_u64::<LittleEndian>(v)
    } else {
        w.write_u32::<LittleEndian>(v as u32)
    }
}

fn read_word<R: Read>(r: &mut R, word: usize) -> io::Result<u64> {
    if word == 8 {
        r.read_u64::<LittleEndian>()
    } else {
        r.read_u32::<LittleEndian>().map(u64::from)
    }
}

fn check_word(word: usize) -> Result<()> {
    if word == 4 || word == 8 {
        Ok(())
    } else {
        Err(SnapError::invalid(format!("unsupported word size {}", word)))
    }
}

// ---- header ----

pub fn write_header<W: Write>(w: &mut W, h: &SnapshotHeader) -> Result<()> {
    let word = h.word_size as usize;
    check_word(word)?;
    w.write_u32::<LittleEndian>(h.version)?;
    w.write_u32::<LittleEndian>(h.word_size)?;
    w.write_i32::<LittleEndian>(h.pid)?;
    w.write_i32::<LittleEndian>(h.flags)?;
    w.write_u32::<LittleEndian>(h.ts_begin)?;
    w.write_u32::<LittleEndian>(h.ts_end)?;
    for v in [
        h.total_pages,
        h.locked_pages,
        h.anonymous_pages,
        h.shared_pages,
        h.physical_pages,
        h.shared_physical_pages,
        h.stack_pages,
        h.exec_pages,
        h.code_start,
        h.code_end,
        h.heap_start,
        h.heap_end,
        h.data_start,
        h.data_end,
        h.stack_start,
    ] {
        write_word(w, v, word)?;
    }
    w.write_i32::<LittleEndian>(h.region_count)?;
    for v in [
        h.regions_len,
        h.pages_len,
        h.swapped_pages,
        h.available_pages,
        h.reserved[0],
        h.reserved[1],
    ] {
        write_word(w, v, word)?;
    }
    Ok(())
}

/// Read a header written at this platform's word width.
pub fn read_header<R: Read>(r: &mut R) -> Result<SnapshotHeader> {
    let version = r.read_u32::<LittleEndian>()?;
    let word_size = r.read_u32::<LittleEndian>()?;
    if word_size as usize != NATIVE_WORD {
        return Err(SnapError::format(format!(
            "snapshot word size is {} but this platform uses {}",
            word_size, NATIVE_WORD
        )));
    }
    let word = NATIVE_WORD;
    let pid = r.read_i32::<LittleEndian>()?;
    let flags = r.read_i32::<LittleEndian>()?;
    let ts_begin = r.read_u32::<LittleEndian>()?;
    let ts_end = r.read_u32::<LittleEndian>()?;

    let mut words = [0u64; 15];
    for v in words.iter_mut() {
        *v = read_word(r, word)?;
    }
    let region_count = r.read_i32::<LittleEndian>()?;
    let mut tail = [0u64; 6];
    for v in tail.iter_mut() {
        *v = read_word(r, word)?;
    }

    Ok(SnapshotHeader {
        version,
        word_size,
        pid,
        flags,
        ts_begin,
        ts_end,
        total_pages: words[0],
        locked_pages: words[1],
        anonymous_pages: words[2],
        shared_pages: words[3],
        physical_pages: words[4],
        shared_physical_pages: words[5],
        stack_pages: words[6],
        exec_pages: words[7],
        code_start: words[8],
        code_end: words[9],
        heap_start: words[10],
        heap_end: words[11],
        data_start: words[12],
        data_end: words[13],
        stack_start: words[14],
        region_count,
        regions_len: tail[0],
        pages_len: tail[1],
        swapped_pages: tail[2],
        available_pages: tail[3],
        reserved: [tail[4], tail[5]],
    })
}

// ---- records ----

fn write_region<W: Write>(w: &mut W, r: &RegionRecord, word: usize) -> io::Result<()> {
    for v in [
        r.start_address,
        r.end_address,
        r.flags,
        r.protection_flags,
        r.private_data,
    ] {
        write_word(w, v, word)?;
    }
    w.write_u32::<LittleEndian>(r.page_count)?;
    w.write_u32::<LittleEndian>(r.present_page_count)?;
    w.write_u32::<LittleEndian>(r.swapped_page_count)?;
    w.write_u32::<LittleEndian>(r.page_start_index)?;
    write_word(w, r.file_offset, word)?;
    write_word(w, r.inode, word)?;
    w.write_all(r.label())
}

fn read_region<R: Read>(r: &mut R, word: usize) -> io::Result<RegionRecord> {
    let start_address = read_word(r, word)?;
    let end_address = read_word(r, word)?;
    let flags = read_word(r, word)?;
    let protection_flags = read_word(r, word)?;
    let private_data = read_word(r, word)?;
    let page_count = r.read_u32::<LittleEndian>()?;
    let present_page_count = r.read_u32::<LittleEndian>()?;
    let swapped_page_count = r.read_u32::<LittleEndian>()?;
    let page_start_index = r.read_u32::<LittleEndian>()?;
    let file_offset = read_word(r, word)?;
    let inode = read_word(r, word)?;
    let mut label = [0u8; LABEL_LEN];
    r.read_exact(&mut label)?;
    let rec = RegionRecord {
        start_address,
        end_address,
        flags,
        protection_flags,
        private_data,
        page_count,
        present_page_count,
        swapped_page_count,
        page_start_index,
        file_offset,
        inode,
        ..RegionRecord::default()
    };
    Ok(rec.from_raw_label(label))
}

fn write_page<W: Write>(w: &mut W, p: &PageRecord, word: usize) -> io::Result<()> {
    write_word(w, p.frame, word)?;
    write_word(w, p.access_flags, word)?;
    write_word(w, p.page_flags, word)?;
    write_word(w, p.inode, word)?;
    w.write_i32::<LittleEndian>(p.reference_count)?;
    w.write_i32::<LittleEndian>(p.mapping_count)?;
    w.write_i32::<LittleEndian>(p.origin.to_raw())?;
    w.write_i32::<LittleEndian>(p.collision_count)?;
    w.write_all(p.digest.as_bytes())
}

fn read_page<R: Read>(r: &mut R, word: usize) -> io::Result<PageRecord> {
    let frame = read_word(r, word)?;
    let access_flags = read_word(r, word)?;
    let page_flags = read_word(r, word)?;
    let inode = read_word(r, word)?;
    let reference_count = r.read_i32::<LittleEndian>()?;
    let mapping_count = r.read_i32::<LittleEndian>()?;
    let origin = PageOrigin::from_raw(r.read_i32::<LittleEndian>()?);
    let collision_count = r.read_i32::<LittleEndian>()?;
    let mut digest = [0u8; DIGEST_LEN];
    r.read_exact(&mut digest)?;
    Ok(PageRecord {
        frame,
        access_flags,
        page_flags,
        inode,
        reference_count,
        mapping_count,
        origin,
        collision_count,
        digest: Digest(digest),
    })
}

// ---- whole snapshot ----

/// Record counts implied by the header's blob lengths.
pub fn record_counts(h: &SnapshotHeader) -> Result<(usize, usize)> {
    let rsz = region_record_size(NATIVE_WORD) as u64;
    let psz = page_record_size(NATIVE_WORD) as u64;
    if h.regions_len % rsz != 0 {
        return Err(SnapError::format(format!(
            "regions blob of {} bytes is not a multiple of {}",
            h.regions_len, rsz
        )));
    }
    if h.pages_len % psz != 0 {
        return Err(SnapError::format(format!(
            "pages blob of {} bytes is not a multiple of {}",
            h.pages_len, psz
        )));
    }
    let regions = h.regions_len / rsz;
    if h.region_count < 0 || regions != h.region_count as u64 {
        return Err(SnapError::format(format!(
            "region_count {} disagrees with regions blob ({} records)",
            h.region_count, regions
        )));
    }
    let pages = usize::try_from(h.pages_len / psz)
        .map_err(|_| SnapError::format("page blob too large for this platform"))?;
    Ok((regions as usize, pages))
}

/// Upper bound on the up-front reservation for one record vector.
const RESERVE_CAP_BYTES: usize = 1 << 20;

fn reserve<T>(n: usize, record: usize) -> Result<Vec<T>> {
    let n = n.min(RESERVE_CAP_BYTES / record.max(1));
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| SnapError::OutOfMemory(n.saturating_mul(record)))?;
    Ok(v)
}

/// Bytes a header says follow it.
pub fn body_len(h: &SnapshotHeader) -> u64 {
    h.regions_len.saturating_add(h.pages_len)
}

/// Decode a complete in-memory snapshot image. Blob lengths that claim more
/// bytes than `buf` holds are rejected before any record is decoded.
pub fn decode_image(buf: &[u8]) -> Result<Snapshot> {
    let mut cur = std::io::Cursor::new(buf);
    let header = read_header(&mut cur)?;
    let have = (buf.len() as u64).saturating_sub(cur.position());
    if body_len(&header) > have {
        return Err(SnapError::format(format!(
            "header claims {} body bytes but only {} follow",
            body_len(&header),
            have
        )));
    }
    read_body(&mut cur, header)
}

/// Decode header + regions + pages from a stream.
pub fn read_snapshot<R: Read>(r: &mut R) -> Result<Snapshot> {
    let header = read_header(r)?;
    read_body(r, header)
}

/// Decode the two blobs that follow an already-read header.
pub fn read_body<R: Read>(r: &mut R, header: SnapshotHeader) -> Result<Snapshot> {
    let word = NATIVE_WORD;
    let (n_regions, n_pages) = record_counts(&header)?;

    let mut regions = reserve(n_regions, region_record_size(word))?;
    for _ in 0..n_regions {
        regions.push(read_region(r, word)?);
    }
    let mut pages = reserve(n_pages, page_record_size(word))?;
    for _ in 0..n_pages {
        pages.push(read_page(r, word)?);
    }

    let snap = Snapshot::from_parts(header, regions, pages);
    snap.validate()?;
    Ok(snap)
}

/// Encode a snapshot exactly as [`read_snapshot`] expects it.
pub fn write_snapshot<W: Write>(w: &mut W, snap: &Snapshot) -> Result<()> {
    let h = &snap.header;
    let word = h.word_size as usize;
    check_word(word)?;
    write_header(w, h)?;
    for r in snap.regions() {
        write_region(w, r, word)?;
    }
    for p in snap.pages() {
        write_page(w, p, word)?;
    }
    Ok(())
}

/// Total encoded size of a snapshot.
pub fn encoded_len(snap: &Snapshot) -> usize {
    let word = snap.header.word_size as usize;
    header_size(word)
        + snap.regions().len() * region_record_size(word)
        + snap.pages().len() * page_record_size(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::header_size;
    use std::io::Cursor;

    fn sample() -> Snapshot {
        let mut r = RegionRecord::with_label("/lib/ld.so");
        r.start_address = 0x7f00_0000_0000;
        r.end_address = 0x7f00_0000_2000;
        r.page_count = 2;
        r.present_page_count = 1;
        r.private_data = 0xdead;
        let pages = vec![
            PageRecord {
                frame: 0x1234,
                access_flags: 0x67,
                page_flags: 0x80,
                inode: 99,
                reference_count: 3,
                mapping_count: 2,
                origin: PageOrigin::resident(1),
                collision_count: 0,
                digest: Digest::from_hex("00112233445566778899aabbccddeeff").unwrap(),
            },
            PageRecord {
                origin: PageOrigin::absent(1),
                ..PageRecord::default()
            },
        ];
        let header = SnapshotHeader {
            pid: 4242,
            flags: 9,
            ts_begin: 100,
            ts_end: 105,
            heap_start: 0x55,
            reserved: [0xffff_8800, 0xffff_9900],
            ..SnapshotHeader::default()
        };
        Snapshot::new(header, vec![r], pages).unwrap()
    }

    #[test]
    fn header_size_matches_layout() {
        let snap = sample();
        let mut buf = Vec::new();
        write_header(&mut buf, &snap.header).unwrap();
        assert_eq!(buf.len(), header_size(NATIVE_WORD));
    }

    #[test]
    fn encode_decode_is_byte_identical() {
        let snap = sample();
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &snap).unwrap();
        assert_eq!(buf.len(), encoded_len(&snap));

        let back = read_snapshot(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.header, snap.header);
        assert_eq!(back.regions(), snap.regions());
        assert_eq!(back.pages(), snap.pages());

        let mut again = Vec::new();
        write_snapshot(&mut again, &back).unwrap();
        assert_eq!(again, buf);
    }

    #[test]
    fn foreign_word_size_rejected() {
        let snap = sample();
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &snap).unwrap();
        let foreign: u32 = if NATIVE_WORD == 8 { 4 } else { 8 };
        buf[4..8].copy_from_slice(&foreign.to_le_bytes());
        let err = read_snapshot(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, SnapError::FormatMismatch(_)), "{err}");
    }

    #[test]
    fn truncated_body_is_io_error() {
        let snap = sample();
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &snap).unwrap();
        buf.truncate(buf.len() - 3);
        let err = read_snapshot(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, SnapError::Io(_)), "{err}");
    }

    #[test]
    fn region_count_disagreement_rejected() {
        let mut snap = sample();
        snap.header.region_count = 2;
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &snap).unwrap();
        let err = read_snapshot(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, SnapError::FormatMismatch(_)), "{err}");
    }

    fn with_pages_len(buf: &mut [u8], pages_len: u64) {
        // pages_len is the second word after region_count.
        let at = header_size(NATIVE_WORD) - 5 * NATIVE_WORD;
        if NATIVE_WORD == 8 {
            buf[at..at + 8].copy_from_slice(&pages_len.to_le_bytes());
        } else {
            buf[at..at + 4].copy_from_slice(&(pages_len as u32).to_le_bytes());
        }
    }

    #[test]
    fn inflated_page_blob_is_truncation_not_oom() {
        let snap = sample();
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &snap).unwrap();
        let psz = page_record_size(NATIVE_WORD) as u64;
        let huge = if NATIVE_WORD == 8 { (1u64 << 44) / psz * psz } else { (u32::MAX as u64) / psz * psz };
        with_pages_len(&mut buf, huge);

        let err = read_snapshot(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, SnapError::Io(_)), "{err}");

        let err = decode_image(&buf).unwrap_err();
        assert!(matches!(err, SnapError::FormatMismatch(_)), "{err}");
    }

    #[test]
    fn decode_image_accepts_exact_length() {
        let snap = sample();
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &snap).unwrap();
        assert_eq!(decode_image(&buf).unwrap().pages(), snap.pages());
        with_pages_len(&mut buf, 3 * page_record_size(NATIVE_WORD) as u64);
        assert!(matches!(decode_image(&buf), Err(SnapError::FormatMismatch(_))));
    }

    #[test]
    fn version_is_not_checked() {
        let mut snap = sample();
        snap.header.version = 7;
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &snap).unwrap();
        let back = read_snapshot(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.header.version, 7);
    }
}
