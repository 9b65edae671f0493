//! Replicated state machine commands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A command applied to the replicated key-value store.
///
/// Commands are deterministic: applying the same sequence on two nodes
/// produces identical states. `Get` and `Noop` never mutate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Set `key` to `value`.
    Set { key: String, value: String },
    /// Remove `key` if present.
    Delete { key: String },
    /// Read `key` (replicated read; goes through the log like any command).
    Get { key: String },
    /// No-op, useful for barrier entries.
    Noop,
}

// Tags for the canonical encoding. Never renumber: digests computed by one
// node must match digests computed by every other node, across versions.
const TAG_SET: u8 = 1;
const TAG_DELETE: u8 = 2;
const TAG_GET: u8 = 3;
const TAG_NOOP: u8 = 4;

impl Command {
    /// Whether applying this command leaves the store unchanged.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Command::Get { .. } | Command::Noop)
    }

    /// Canonical, version-stable byte encoding.
    ///
    /// This is the encoding hashed into a [`crate::Digest`]; it is
    /// deliberately independent of the wire serialization so that wire
    /// format changes can never silently change digests. Layout: a tag
    /// byte followed by each field as a little-endian u32 length and the
    /// raw UTF-8 bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        fn push_field(out: &mut Vec<u8>, field: &str) {
            out.extend_from_slice(&(field.len() as u32).to_le_bytes());
            out.extend_from_slice(field.as_bytes());
        }

        let mut out = Vec::with_capacity(16);
        match self {
            Command::Set { key, value } => {
                out.push(TAG_SET);
                push_field(&mut out, key);
                push_field(&mut out, value);
            }
            Command::Delete { key } => {
                out.push(TAG_DELETE);
                push_field(&mut out, key);
            }
            Command::Get { key } => {
                out.push(TAG_GET);
                push_field(&mut out, key);
            }
            Command::Noop => out.push(TAG_NOOP),
        }
        out
    }

    /// Convenience constructor for `Set`.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Command::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Convenience constructor for `Delete`.
    pub fn delete(key: impl Into<String>) -> Self {
        Command::Delete { key: key.into() }
    }

    /// Convenience constructor for `Get`.
    pub fn get(key: impl Into<String>) -> Self {
        Command::Get { key: key.into() }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Set { key, value } => write!(f, "SET {key}={value}"),
            Command::Delete { key } => write!(f, "DELETE {key}"),
            Command::Get { key } => write!(f, "GET {key}"),
            Command::Noop => write!(f, "NOOP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes_are_stable() {
        // Pinned bytes: changing this encoding is a digest-breaking change.
        let cmd = Command::set("x", "1");
        let mut expected = vec![1u8];
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(b'x');
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(b'1');
        assert_eq!(cmd.canonical_bytes(), expected);
    }

    #[test]
    fn canonical_bytes_distinguish_field_boundaries() {
        // ("ab", "c") and ("a", "bc") must not collide.
        let a = Command::set("ab", "c").canonical_bytes();
        let b = Command::set("a", "bc").canonical_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn read_only_commands() {
        assert!(Command::get("k").is_read_only());
        assert!(Command::Noop.is_read_only());
        assert!(!Command::set("k", "v").is_read_only());
        assert!(!Command::delete("k").is_read_only());
    }

    #[test]
    fn serde_round_trip() {
        let cmd = Command::set("key", "value");
        let json = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, back);
    }
}
