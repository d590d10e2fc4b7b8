//! Abbreviation-aware command identifiers.
//!
//! SCPI lets a client shorten every path segment down to a minimum length:
//! `VOLTage` may be sent as `VOLT`, `volta` or `VOLTAGE`, but not as `VOL`
//! or `VOLTAGEX`. A [`Key`] holds the canonical spelling of a node name
//! together with that minimum length and answers the comparison.
//!
//! Every key also has a numeric [`fingerprint`] computed over its first
//! `min_len` characters. Branches index their children by fingerprint, so a
//! lookup hashes the incoming segment once and then confirms the single
//! candidate with [`Key::matches`]. Two names that agree on their first
//! `min_len` characters share a fingerprint and cannot live under the same
//! parent.

use std::fmt;

use crate::error::{Error, Result};

/// Minimum abbreviation length used when none is configured.
pub const DEFAULT_KEY_LENGTH: usize = 4;

/// The canonical name of a command-tree node plus its abbreviation rule.
#[derive(Debug, Clone)]
pub struct Key {
    name: String,
    lower: String,
    min_len: usize,
}

impl Key {
    /// Create a key with the default minimum length of 4.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_min_len(name, DEFAULT_KEY_LENGTH)
    }

    /// Create a key with a custom minimum length.
    ///
    /// Names shorter than `min_len` must be sent in full. Fails with
    /// [`Error::InvalidName`] unless `name` is a non-empty, purely
    /// alphabetic ASCII string.
    pub fn with_min_len(name: &str, min_len: usize) -> Result<Self> {
        validate_name(name)?;
        let min_len = min_len.clamp(1, name.len());
        Ok(Key {
            name: name.to_string(),
            lower: name.to_ascii_lowercase(),
            min_len,
        })
    }

    /// The canonical spelling, as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of leading characters a client must send.
    pub fn min_len(&self) -> usize {
        self.min_len
    }

    /// Whether `candidate` is an acceptable spelling of this key.
    ///
    /// The candidate must be a case-insensitive prefix of the canonical
    /// name and at least `min_len` characters long.
    pub fn matches(&self, candidate: &str) -> bool {
        candidate.len() >= self.min_len
            && candidate.len() <= self.lower.len()
            && self.lower.as_bytes()[..candidate.len()].eq_ignore_ascii_case(candidate.as_bytes())
    }

    /// Fingerprint of this key's first `min_len` characters.
    pub fn fingerprint(&self) -> u64 {
        fingerprint(&self.lower, self.min_len)
    }

    /// The canonical spelling with the required part in upper case and the
    /// optional tail in lower case, e.g. `VOLTage`.
    pub fn short_form(&self) -> String {
        let (head, tail) = self.lower.split_at(self.min_len);
        format!("{}{}", head.to_ascii_uppercase(), tail)
    }
}

/// Two keys are equal when the shorter is a prefix of the longer and the
/// shared length satisfies both minimum lengths.
impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        let (short, long) = if self.lower.len() <= other.lower.len() {
            (&self.lower, &other.lower)
        } else {
            (&other.lower, &self.lower)
        };
        short.len() >= self.min_len && short.len() >= other.min_len && long.starts_with(short.as_str())
    }
}

impl PartialEq<str> for Key {
    fn eq(&self, other: &str) -> bool {
        self.matches(other)
    }
}

impl PartialEq<&str> for Key {
    fn eq(&self, other: &&str) -> bool {
        self.matches(other)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Compute the lookup fingerprint of `name` over its first `len` characters.
///
/// Case-insensitive 64-bit FNV-1a. Callers looking up a segment pass the
/// parent's configured key length, so the segment hashes to the same value
/// as the child it abbreviates.
pub fn fingerprint(name: &str, len: usize) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    name.bytes()
        .take(len)
        .fold(OFFSET, |hash, b| (hash ^ u64::from(b.to_ascii_lowercase())).wrapping_mul(PRIME))
}

/// Check that a node name is a non-empty, purely alphabetic ASCII string.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}
