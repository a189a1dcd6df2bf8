//! Core types for hayashi.

use sha2::{Digest, Sha256};
use std::fmt;

/// Index of one consensus round.
///
/// Slot indices are monotone: the network closes slot `n` before slot
/// `n + 1`. All per-slot bookkeeping in the pending-envelope pipeline is
/// keyed by this type.
pub type SlotIndex = u64;

/// 32-byte SHA-256 hash.
///
/// Used as the content address for envelopes, quorum-set descriptors and
/// transaction-set payloads.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Zero hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Hash arbitrary data.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Hash the XDR serialization of a value.
    ///
    /// This is the stable byte-identity used to key envelopes and cached
    /// items: two values hash equal iff their canonical serializations are
    /// byte-identical.
    pub fn hash_xdr<T: stellar_xdr::curr::WriteXdr>(
        value: &T,
    ) -> Result<Self, stellar_xdr::curr::Error> {
        let bytes = value.to_xdr(stellar_xdr::curr::Limits::none())?;
        Ok(Self::hash(&bytes))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated hex form for log lines.
    pub fn to_hex_abbrev(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<stellar_xdr::curr::Hash> for Hash256 {
    fn from(h: stellar_xdr::curr::Hash) -> Self {
        Self(h.0)
    }
}

impl From<Hash256> for stellar_xdr::curr::Hash {
    fn from(h: Hash256) -> Self {
        stellar_xdr::curr::Hash(h.0)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex_abbrev())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
