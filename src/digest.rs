//! Page content digests.
//!
//! A digest is opaque bytes of at most [`DIGEST_LEN`]; shorter algorithms are
//! zero-padded. The crate never computes digests, it only compares them and
//! knows the reserved "empty page" value of each algorithm.
//!
//! Goals:
//! - Keep the algorithm selection as a compact code derived from capture flags.
//! - Use a stable, explicit hasher (not std::DefaultHasher) for digest maps.

use std::cmp::Ordering;
use std::fmt;
use std::hash::BuildHasherDefault;

use twox_hash::XxHash64;

use crate::consts::{
    DIGEST_LEN, VMS_HASH_CRC32, VMS_HASH_CRC32_EX, VMS_HASH_PATTERN, VMS_HASH_SHA1,
    VMS_HASH_SUPERFAST,
};
use crate::error::{Result, SnapError};

/// Hasher state for digest/frame keyed maps (xxhash64, seed 0).
pub type StableState = BuildHasherDefault<XxHash64>;

/// Digest algorithm selected by the capture flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestKind {
    Md5,
    Crc32,
    Crc32Ex,
    Pattern,
    SuperFast,
    Sha1,
}

impl DigestKind {
    /// Resolve the algorithm from capture flags. The first matching bit wins in
    /// the order CRC32, CRC32-EX, SuperFast, Pattern, SHA-1; no bit means MD5.
    pub fn from_flags(flags: i32) -> Self {
        if flags & VMS_HASH_CRC32 != 0 {
            DigestKind::Crc32
        } else if flags & VMS_HASH_CRC32_EX != 0 {
            DigestKind::Crc32Ex
        } else if flags & VMS_HASH_SUPERFAST != 0 {
            DigestKind::SuperFast
        } else if flags & VMS_HASH_PATTERN != 0 {
            DigestKind::Pattern
        } else if flags & VMS_HASH_SHA1 != 0 {
            DigestKind::Sha1
        } else {
            DigestKind::Md5
        }
    }

    /// Flag bit requesting this algorithm (MD5 has none).
    pub fn flag(self) -> i32 {
        match self {
            DigestKind::Md5 => 0,
            DigestKind::Crc32 => VMS_HASH_CRC32,
            DigestKind::Crc32Ex => VMS_HASH_CRC32_EX,
            DigestKind::Pattern => VMS_HASH_PATTERN,
            DigestKind::SuperFast => VMS_HASH_SUPERFAST,
            DigestKind::Sha1 => VMS_HASH_SHA1,
        }
    }

    /// Significant bytes of a digest of this kind.
    pub fn width(self) -> usize {
        match self {
            DigestKind::Md5 => 16,
            DigestKind::Crc32 => 4,
            DigestKind::Crc32Ex => 16,
            DigestKind::Pattern => 16,
            DigestKind::SuperFast => 4,
            DigestKind::Sha1 => 20,
        }
    }

    /// Digest of a page filled with zero bytes.
    pub fn zero_page(self) -> Digest {
        match self {
            DigestKind::Md5 => Digest(ZERO_PAGE_MD5),
            DigestKind::Sha1 => Digest(ZERO_PAGE_SHA1),
            // The checksum and pattern algorithms all map the zero page to 0.
            _ => Digest::ZERO,
        }
    }
}

impl fmt::Display for DigestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DigestKind::Md5 => "md5",
            DigestKind::Crc32 => "crc32",
            DigestKind::Crc32Ex => "crc32ex",
            DigestKind::Pattern => "pattern",
            DigestKind::SuperFast => "superfast",
            DigestKind::Sha1 => "sha1",
        };
        f.write_str(s)
    }
}

const ZERO_PAGE_MD5: [u8; DIGEST_LEN] = [
    0x62, 0x0f, 0x0b, 0x67, 0xa9, 0x1f, 0x7f, 0x74, 0x15, 0x1b, 0xc5, 0xbe, 0x74, 0x5b, 0x71, 0x10,
    0x00, 0x00, 0x00, 0x00,
];

const ZERO_PAGE_SHA1: [u8; DIGEST_LEN] = [
    0x1c, 0xea, 0xf7, 0x3d, 0xf4, 0x0e, 0x53, 0x1d, 0xf3, 0xbf, 0xb2, 0x6b, 0x4f, 0xb7, 0xcd, 0x95,
    0xfb, 0x7b, 0xff, 0x1d,
];

/// Fixed-width page digest. Ordering is bytewise, most significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    pub const ZERO: Digest = Digest([0u8; DIGEST_LEN]);

    /// Build from a digest of any supported width, zero-padding the tail.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > DIGEST_LEN {
            return Err(SnapError::invalid(format!(
                "digest of {} bytes exceeds {} bytes",
                bytes.len(),
                DIGEST_LEN
            )));
        }
        let mut out = [0u8; DIGEST_LEN];
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(Digest(out))
    }

    /// Parse lowercase or uppercase hex (at most 40 digits, even length).
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() % 2 != 0 {
            return Err(SnapError::invalid("hex digest must have even length"));
        }
        let bytes = s.as_bytes();
        let mut raw = Vec::with_capacity(bytes.len() / 2);
        for i in (0..bytes.len()).step_by(2) {
            let h = (bytes[i] as char)
                .to_digit(16)
                .ok_or_else(|| SnapError::invalid(format!("invalid hex at pos {}", i)))?;
            let l = (bytes[i + 1] as char)
                .to_digit(16)
                .ok_or_else(|| SnapError::invalid(format!("invalid hex at pos {}", i + 1)))?;
            raw.push(((h << 4) | l) as u8);
        }
        Self::from_slice(&raw)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Hex of the first `width` bytes (clamped to the buffer).
    pub fn to_hex(&self, width: usize) -> String {
        to_hex(&self.0[..width.min(DIGEST_LEN)])
    }

    /// Compare the first `width` bytes only.
    pub fn compare(&self, other: &Digest, width: usize) -> Ordering {
        let w = width.min(DIGEST_LEN);
        self.0[..w].cmp(&other.0[..w])
    }

    /// Full-width equality against the algorithm's empty-page digest.
    #[inline]
    pub fn is_zero_page(&self, kind: DigestKind) -> bool {
        *self == kind.zero_page()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex(&self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", to_hex(&self.0))
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_flags_priority() {
        assert_eq!(DigestKind::from_flags(0), DigestKind::Md5);
        assert_eq!(DigestKind::from_flags(VMS_HASH_SHA1), DigestKind::Sha1);
        assert_eq!(
            DigestKind::from_flags(VMS_HASH_SHA1 | VMS_HASH_CRC32),
            DigestKind::Crc32
        );
        assert_eq!(
            DigestKind::from_flags(VMS_HASH_PATTERN | VMS_HASH_SUPERFAST),
            DigestKind::SuperFast
        );
        for k in [
            DigestKind::Crc32,
            DigestKind::Crc32Ex,
            DigestKind::Pattern,
            DigestKind::SuperFast,
            DigestKind::Sha1,
        ] {
            assert_eq!(DigestKind::from_flags(k.flag() | 1 | 8), k);
        }
    }

    #[test]
    fn zero_page_values() {
        assert_eq!(
            DigestKind::Md5.zero_page().to_hex(16),
            "620f0b67a91f7f74151bc5be745b7110"
        );
        assert_eq!(
            DigestKind::Sha1.zero_page().to_string(),
            "1ceaf73df40e531df3bfb26b4fb7cd95fb7bff1d"
        );
        assert!(Digest::ZERO.is_zero_page(DigestKind::Crc32));
        assert!(!Digest::ZERO.is_zero_page(DigestKind::Md5));
    }

    #[test]
    fn hex_roundtrip_and_padding() {
        let d = Digest::from_hex("DEADbeef").unwrap();
        assert_eq!(&d.0[..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert!(d.0[4..].iter().all(|&b| b == 0));
        assert_eq!(d.to_hex(4), "deadbeef");
        assert!(Digest::from_hex("abc").is_err());
        assert!(Digest::from_hex("zz").is_err());
        assert!(Digest::from_slice(&[0u8; 21]).is_err());
    }

    #[test]
    fn compare_respects_width() {
        let a = Digest::from_slice(&[1, 2, 3, 4, 9]).unwrap();
        let b = Digest::from_slice(&[1, 2, 3, 4, 1]).unwrap();
        assert_eq!(a.compare(&b, 4), Ordering::Equal);
        assert_eq!(a.compare(&b, 5), Ordering::Greater);
        assert_eq!(b.compare(&a, 20), Ordering::Less);
    }
}
