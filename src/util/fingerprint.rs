//! Stable fingerprints for plan cache keys (xxh3, non-crypto)

use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// Fingerprint a byte string
#[inline]
pub fn fingerprint(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

/// Incremental fingerprint builder
///
/// Fields are separated by a tag byte so `("ab", "c")` and `("a", "bc")`
/// hash differently.
pub struct Fingerprinter {
    hasher: Xxh3,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self {
            hasher: Xxh3::new(),
        }
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.hasher.update(s.as_bytes());
        self.hasher.update(&[0xff]);
        self
    }

    pub fn tag(&mut self, tag: u8) -> &mut Self {
        self.hasher.update(&[0xfe, tag]);
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(&value.to_le_bytes());
        self
    }

    pub fn finish(&self) -> u64 {
        self.hasher.digest()
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}
