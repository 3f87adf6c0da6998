//! Record identifiers.
//!
//! A record is identified either by the id the server assigned to it, or, while
//! it only exists on this device, by a locally generated **surrogate** id.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Prefix that marks a surrogate (locally generated) identifier.
pub const SURROGATE_PREFIX: char = '_';

/// Number of random characters following the surrogate prefix.
pub const SURROGATE_LEN: usize = 9;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Identifier of a record.
///
/// Server ids are opaque strings. Surrogate ids look like `_k3j9x0a1b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap a server-assigned identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::invalid_id("RecordId: empty"));
        }
        Ok(Self(value))
    }

    /// Generate a fresh surrogate identifier.
    ///
    /// Randomness comes from a UUIDv4; callers that need uniqueness against a
    /// known set should use [`RecordId::surrogate_avoiding`].
    pub fn surrogate() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        let mut out = String::with_capacity(SURROGATE_LEN + 1);
        out.push(SURROGATE_PREFIX);
        for b in bytes.iter().take(SURROGATE_LEN) {
            out.push(ALPHABET[(*b as usize) % ALPHABET.len()] as char);
        }
        Self(out)
    }

    /// Generate a surrogate id for which `taken` returns false.
    pub fn surrogate_avoiding(taken: impl Fn(&RecordId) -> bool) -> Self {
        loop {
            let id = Self::surrogate();
            if !taken(&id) {
                return id;
            }
        }
    }

    /// Whether this id was generated locally and is unknown to the server.
    pub fn is_surrogate(&self) -> bool {
        self.0.starts_with(SURROGATE_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
