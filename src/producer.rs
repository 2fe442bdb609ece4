//! Snapshot producers.
//!
//! The kernel producer talks to a proc control file:
//! 1) write "pid:flags";
//! 2) read the header, check it names the requested pid;
//! 3) read the region blob and the page blob (handed out in 4 KiB chunks).
//!
//! Requests may also name every process ("*:flags"); those are expanded over
//! the numeric entries of /proc by [`capture_all`].

use std::fs::{self, OpenOptions};
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::ShareConfig;
use crate::consts::{header_size, PRODUCER_CHUNK, VMS_ALLOW_RAW_OUTPUT};
use crate::error::SnapError;
use crate::snapshot::codec::{read_body, read_header};
use crate::snapshot::io::{is_snapshot_path, load_snapshot_with};
use crate::snapshot::{Snapshot, NATIVE_WORD};

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The producer refused the request (no such process).
    #[error("process {0} not found")]
    NotFound(i32),
    /// Header size, word size or pid disagree with what was requested.
    #[error("producer and reader are incompatible: {0}")]
    IncompatibleVersion(String),
    #[error("out of memory reserving {0} bytes")]
    OutOfMemory(usize),
    #[error("producer io: {0}")]
    Io(#[from] io::Error),
}

impl From<SnapError> for CaptureError {
    fn from(e: SnapError) -> Self {
        match e {
            SnapError::OutOfMemory(n) => CaptureError::OutOfMemory(n),
            SnapError::Io(e) => CaptureError::Io(e),
            SnapError::FormatMismatch(m) | SnapError::InvalidArgument(m) => {
                CaptureError::IncompatibleVersion(m)
            }
        }
    }
}

impl From<CaptureError> for SnapError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::NotFound(pid) => SnapError::invalid(format!("process {} not found", pid)),
            CaptureError::IncompatibleVersion(m) => SnapError::format(m),
            CaptureError::OutOfMemory(n) => SnapError::OutOfMemory(n),
            CaptureError::Io(e) => SnapError::Io(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    /// One process; 0 = physical memory.
    Pid(i32),
    /// Every numeric entry of /proc.
    AllProcesses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub target: CaptureTarget,
    pub flags: i32,
}

impl CaptureRequest {
    pub fn new(pid: i32, flags: i32) -> Self {
        Self {
            target: CaptureTarget::Pid(pid),
            flags,
        }
    }

    pub fn all(flags: i32) -> Self {
        Self {
            target: CaptureTarget::AllProcesses,
            flags,
        }
    }
}

impl FromStr for CaptureRequest {
    type Err = SnapError;

    /// "pid:flags" or "*:flags".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (who, flags) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| SnapError::invalid(format!("expected pid:flags, got '{}'", s)))?;
        let flags = flags
            .trim()
            .parse::<i32>()
            .map_err(|_| SnapError::invalid(format!("invalid flags '{}'", flags)))?;
        let who = who.trim();
        if who == "*" {
            return Ok(Self::all(flags));
        }
        let pid = who
            .parse::<i32>()
            .map_err(|_| SnapError::invalid(format!("invalid pid '{}'", who)))?;
        if pid < 0 {
            return Err(SnapError::invalid(format!("negative pid {}", pid)));
        }
        Ok(Self::new(pid, flags))
    }
}

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

pub trait SnapshotProducer {
    /// Capture one process (or physical memory for pid 0).
    fn capture(&self, pid: i32, flags: i32) -> Result<Snapshot, CaptureError>;
}

/// Producer backed by the vm_snapshot kernel module.
#[derive(Debug, Clone)]
pub struct KernelProducer {
    path: PathBuf,
}

impl KernelProducer {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(cfg: &ShareConfig) -> Self {
        Self::new(cfg.producer_path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotProducer for KernelProducer {
    fn capture(&self, pid: i32, flags: i32) -> Result<Snapshot, CaptureError> {
        let mut f = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let req = format!("{}:{}", pid, flags | VMS_ALLOW_RAW_OUTPUT);
        match f.write(req.as_bytes()) {
            Ok(n) if n == req.len() => {}
            Ok(_) => return Err(CaptureError::NotFound(pid)),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                return Err(CaptureError::NotFound(pid))
            }
            Err(e) => return Err(e.into()),
        }

        let snap = read_capture(&mut BufReader::with_capacity(PRODUCER_CHUNK, f), pid)?;
        info!(
            "captured pid={} regions={} pages={} available={}",
            pid,
            snap.regions().len(),
            snap.pages().len(),
            snap.header.available_pages
        );
        Ok(snap)
    }
}

/// Decode a producer stream and check it answers the request for `pid`.
pub fn read_capture<R: Read>(r: &mut R, pid: i32) -> Result<Snapshot, CaptureError> {
    let mut head = vec![0u8; header_size(NATIVE_WORD)];
    let mut got = 0;
    while got < head.len() {
        match r.read(&mut head[got..])? {
            0 => break,
            n => got += n,
        }
    }
    if got != head.len() {
        return Err(CaptureError::IncompatibleVersion(format!(
            "header of {} bytes, expected {}",
            got,
            head.len()
        )));
    }
    let header = read_header(&mut Cursor::new(&head))?;
    if header.pid != pid {
        return Err(CaptureError::IncompatibleVersion(format!(
            "requested pid {}, producer answered {}",
            pid, header.pid
        )));
    }
    Ok(read_body(r, header)?)
}

/// Numeric entries of `proc_root` in ascending order.
pub fn list_pids(proc_root: &Path) -> io::Result<Vec<i32>> {
    let mut pids: Vec<i32> = fs::read_dir(proc_root)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<i32>().ok()))
        .collect();
    pids.sort_unstable();
    Ok(pids)
}

/// Capture every process listed in /proc. Per-process failures are logged and
/// skipped (processes exit between listing and capture).
pub fn capture_all<P: SnapshotProducer + ?Sized>(
    producer: &P,
    flags: i32,
) -> Result<Vec<Snapshot>, CaptureError> {
    let pids = list_pids(Path::new("/proc"))?;
    let mut out = Vec::with_capacity(pids.len());
    for pid in pids {
        match producer.capture(pid, flags) {
            Ok(s) => out.push(s),
            Err(e) => warn!("capture_all: pid {} skipped: {}", pid, e),
        }
    }
    debug!("capture_all: {} snapshots", out.len());
    Ok(out)
}

/// Load when `input` names a `.snapshot` file, otherwise treat it as a capture
/// request.
pub fn acquire<P: SnapshotProducer + ?Sized>(
    input: &str,
    producer: &P,
    load_mmap: bool,
) -> Result<Vec<Snapshot>, SnapError> {
    let path = Path::new(input);
    if is_snapshot_path(path) {
        return Ok(vec![load_snapshot_with(path, load_mmap)?]);
    }
    let req: CaptureRequest = input.parse()?;
    match req.target {
        CaptureTarget::Pid(pid) => Ok(vec![producer.capture(pid, req.flags)?]),
        CaptureTarget::AllProcesses => Ok(capture_all(producer, req.flags)?),
    }
}
