//! Natural keys: torrent infohashes and peer permanent identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of a v1 infohash in bytes.
pub const INFOHASH_LEN: usize = 20;

/// 20-byte digest naming a torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InfoHash([u8; INFOHASH_LEN]);

impl InfoHash {
    pub const fn new(bytes: [u8; INFOHASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns `None` unless `bytes` is exactly 20 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; INFOHASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        Self::from_bytes(&hex_decode(s)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for InfoHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Permanent peer identifier. Opaque and immutable.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermId(Vec<u8>);

impl PermId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermId({})", self)
    }
}

impl fmt::Display for PermId {
    // Permids are long public keys; the prefix is enough to tell them apart in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(8)];
        write!(f, "{}", hex_encode(shown))?;
        if self.0.len() > shown.len() {
            write!(f, "..")?;
        }
        Ok(())
    }
}

impl From<&[u8]> for PermId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
        s
    })
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infohash_requires_twenty_bytes() {
        assert!(InfoHash::from_bytes(&[0u8; 20]).is_some());
        assert!(InfoHash::from_bytes(&[0u8; 19]).is_none());
        assert!(InfoHash::from_bytes(&[0u8; 21]).is_none());
        assert!(InfoHash::from_bytes(b"").is_none());
    }

    #[test]
    fn test_infohash_hex() {
        let hash = InfoHash::from_hex("44865489ac16e2f34ea0cd3043cfd970cc24ec09").unwrap();
        assert_eq!(hash.as_bytes()[0], 0x44);
        assert_eq!(hash.to_hex(), "44865489ac16e2f34ea0cd3043cfd970cc24ec09");
        assert_eq!(hash.to_string(), hash.to_hex());

        assert!(InfoHash::from_hex("4486").is_none());
        assert!(InfoHash::from_hex("zz865489ac16e2f34ea0cd3043cfd970cc24ec09").is_none());
    }

    #[test]
    fn test_permid_display_is_truncated() {
        let short = PermId::new(vec![0xab, 0xcd]);
        assert_eq!(short.to_string(), "abcd");

        let long = PermId::new(vec![1u8; 64]);
        assert_eq!(long.to_string(), "0101010101010101..");
    }
}
