//! Error taxonomy of the library.
//!
//! Library code returns typed errors; the binary wraps them into `anyhow`.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapError {
    /// Malformed request or out-of-range selection argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Snapshot buffers could not be reserved.
    #[error("out of memory reserving {0} bytes")]
    OutOfMemory(usize),
    /// Persisted bytes disagree with this platform or with themselves.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),
    /// Truncated or failed read/write.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SnapError {
    /// Stable negative code per failure kind, for callers that report exit codes.
    pub fn code(&self) -> i32 {
        match self {
            SnapError::InvalidArgument(_) => -1,
            SnapError::OutOfMemory(_) => -2,
            SnapError::FormatMismatch(_) => -3,
            SnapError::Io(_) => -4,
        }
    }

    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        SnapError::InvalidArgument(msg.into())
    }

    pub(crate) fn format<S: Into<String>>(msg: S) -> Self {
        SnapError::FormatMismatch(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errs = [
            SnapError::invalid("x"),
            SnapError::OutOfMemory(1),
            SnapError::format("y"),
            SnapError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof")),
        ];
        let mut codes: Vec<i32> = errs.iter().map(|e| e.code()).collect();
        codes.dedup();
        assert_eq!(codes, vec![-1, -2, -3, -4]);
    }
}
