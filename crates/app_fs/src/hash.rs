//! 256-bit fingerprints
//!
//! One seeded hash step, `hash256(data, seed)`, is folded left-to-right over
//! a sequence. Directory fingerprints fold it over sorted paths; thumbnail
//! keys run it over file contents. Both start from `Fingerprint::ZERO`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

/// Wide hash value
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Seed value, and the fingerprint of an empty sequence
    pub const ZERO: Fingerprint = Fingerprint([0; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Lowercase hex, 64 characters
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 || !s.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell entries apart in logs
        write!(f, "Fingerprint({}..)", &self.to_hex()[..12])
    }
}

/// One fold step: BLAKE3 over `seed || data`
pub fn hash256(data: &[u8], seed: Fingerprint) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(data);
    Fingerprint(*hasher.finalize().as_bytes())
}

/// Fold `hash256` over items, left to right, starting from zero
pub fn fold_hash256<I, T>(items: I) -> Fingerprint
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    items
        .into_iter()
        .fold(Fingerprint::ZERO, |acc, item| hash256(item.as_ref(), acc))
}

/// Content fingerprint of a file: `hash256(contents, ZERO)`, streamed
pub fn hash_file(path: &Path) -> io::Result<Fingerprint> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(Fingerprint::ZERO.as_bytes());

    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Fingerprint(*hasher.finalize().as_bytes()))
}
