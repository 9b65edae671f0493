//! SHA-256 request digests.

use crate::Command;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// 32-byte SHA-256 digest of a request's canonical encoding.
///
/// Honest nodes computing the digest of the same request always agree,
/// because the input is [`Command::canonical_bytes`], not the wire bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// The all-zero digest.
    pub const ZERO: Digest = Digest([0u8; 32]);

    /// Digest of a command's canonical encoding.
    pub fn of_command(command: &Command) -> Self {
        Self::of_bytes(&command.canonical_bytes())
    }

    /// Digest of raw bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Digest(hasher.finalize().into())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// A digest with one byte perturbed, keyed by `salt`.
    ///
    /// Used only by the byzantine test mode to emit equivocating digests
    /// that are distinct per recipient yet deterministic.
    pub fn perturbed(&self, salt: u64) -> Self {
        let mut bytes = self.0;
        bytes[0] ^= (salt as u8) | 1;
        Digest(bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 hex chars are plenty for logs.
        write!(f, "Digest(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}
