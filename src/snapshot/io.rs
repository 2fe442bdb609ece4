//! Snapshot files on disk.
//!
//! - save: encode into `<name>.tmp`, fsync, rename over the target.
//! - load: map the file read-only (memmap2) or read it fully, then decode.
//!   Mapping is on by default; `PGS_LOAD_MMAP=0` forces plain reads. Blob
//!   lengths are checked against the file size before decoding.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use memmap2::MmapOptions;

use super::codec::{decode_image, encoded_len, write_snapshot};
use super::Snapshot;
use crate::config::env_flag;
use crate::error::{Result, SnapError};

fn load_mmap_enabled() -> bool {
    env_flag("PGS_LOAD_MMAP").unwrap_or(true)
}

/// Write `snap` to `path` atomically (tmp + rename).
pub fn save_snapshot(path: &Path, snap: &Snapshot) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let mut w = BufWriter::new(f);
        write_snapshot(&mut w, snap)?;
        w.flush()?;
        let f = w
            .into_inner()
            .map_err(|e| SnapError::Io(e.into_error()))?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    info!(
        "saved snapshot pid={} regions={} pages={} -> {} ({} bytes)",
        snap.header.pid,
        snap.regions().len(),
        snap.pages().len(),
        path.display(),
        encoded_len(snap)
    );
    Ok(())
}

/// Save under `dir` with the default `<pid>-<ts_begin hex>.snapshot` name.
pub fn save_snapshot_in(dir: &Path, snap: &Snapshot) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(snap.default_file_name());
    save_snapshot(&path, snap)?;
    Ok(path)
}

/// Load a snapshot file written by [`save_snapshot`] (or dumped by the producer).
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    load_snapshot_with(path, load_mmap_enabled())
}

pub fn load_snapshot_with(path: &Path, use_mmap: bool) -> Result<Snapshot> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let snap = if use_mmap && len > 0 {
        // Read-only private view; the file is not modified while mapped.
        let map = unsafe { MmapOptions::new().map(&file)? };
        debug!("load_snapshot: mapped {} ({} bytes)", path.display(), len);
        decode_image(&map[..])?
    } else {
        let cap = usize::try_from(len).map_err(|_| SnapError::OutOfMemory(usize::MAX))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(cap)
            .map_err(|_| SnapError::OutOfMemory(cap))?;
        file.read_to_end(&mut buf)?;
        decode_image(&buf)?
    };

    info!(
        "loaded snapshot pid={} regions={} pages={} from {}",
        snap.header.pid,
        snap.regions().len(),
        snap.pages().len(),
        path.display()
    );
    Ok(snap)
}

/// True when `path` looks like a snapshot file name.
pub fn is_snapshot_path(path: &Path) -> bool {
    path.extension()
        .map(|e| e == crate::consts::SNAPSHOT_EXT)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{PageOrigin, PageRecord, RegionRecord, SnapshotHeader};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tmp_dir(prefix: &str) -> PathBuf {
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = std::env::temp_dir().join(format!("{}-{}-{}", prefix, std::process::id(), t));
        fs::create_dir_all(&p).unwrap();
        p
    }

    fn snap() -> Snapshot {
        let mut r = RegionRecord::with_label("/bin/true");
        r.page_count = 1;
        r.present_page_count = 1;
        let p = PageRecord {
            frame: 7,
            origin: PageOrigin::resident(1),
            ..PageRecord::default()
        };
        let h = SnapshotHeader {
            pid: 77,
            ts_begin: 0x10,
            ..SnapshotHeader::default()
        };
        Snapshot::new(h, vec![r], vec![p]).unwrap()
    }

    #[test]
    fn save_in_uses_default_name_and_loads_both_ways() {
        let dir = tmp_dir("pgs-io");
        let s = snap();
        let path = save_snapshot_in(&dir, &s).unwrap();
        assert_eq!(path.file_name().unwrap(), "77-10.snapshot");
        assert!(is_snapshot_path(&path));
        assert!(!dir.join("77-10.tmp").exists());

        for mmap in [true, false] {
            let back = load_snapshot_with(&path, mmap).unwrap();
            assert_eq!(back.header, s.header);
            assert_eq!(back.pages(), s.pages());
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn blob_lengths_past_file_end_are_format_errors() {
        let dir = tmp_dir("pgs-io-inflated");
        let path = save_snapshot_in(&dir, &snap()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let at = crate::consts::header_size(crate::snapshot::NATIVE_WORD)
            - 5 * crate::snapshot::NATIVE_WORD;
        let claim = 1000 * crate::consts::page_record_size(crate::snapshot::NATIVE_WORD) as u64;
        bytes[at..at + 4].copy_from_slice(&(claim as u32).to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        for mmap in [true, false] {
            let err = load_snapshot_with(&path, mmap).unwrap_err();
            assert!(matches!(err, SnapError::FormatMismatch(_)), "{err}");
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_file_is_truncation() {
        let dir = tmp_dir("pgs-io-empty");
        let path = dir.join("0-0.snapshot");
        File::create(&path).unwrap();
        let err = load_snapshot_with(&path, true).unwrap_err();
        assert!(matches!(err, SnapError::Io(_)));
        let _ = fs::remove_dir_all(&dir);
    }
}
