//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a submitted BuildJob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Create a new JobId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random JobId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Shuffled base-62 alphabet used to encode build ticks.
const ALPHABET: &[u8; 62] = b"cKaVPRug0job8tZSlEmMivsHLXGCh1DxWOe7ANIzJfTqr52dwUBn6yQ43Fp9Yk";

/// Identity of one build attempt, also used as the keymap name.
///
/// A BuildId is a tick encoded through a short alphabet. Encoding is
/// reversible and the output is always ASCII alphanumeric, so an id is a
/// safe single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(String);

impl BuildId {
    /// Encode a tick into a BuildId.
    pub fn from_tick(tick: u64) -> Self {
        Self(encode(tick))
    }

    /// Parse a string, accepting only ids this encoding can produce.
    pub fn parse(s: &str) -> Option<Self> {
        decode(s).map(|_| Self(s.to_owned()))
    }

    /// Recover the tick this id was encoded from.
    pub fn tick(&self) -> Option<u64> {
        decode(&self.0)
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn encode(mut value: u64) -> String {
    let base = ALPHABET.len() as u64;
    let mut digits = Vec::new();
    loop {
        digits.push(ALPHABET[(value % base) as usize]);
        value /= base;
        if value == 0 {
            break;
        }
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

fn decode(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    // A leading zero digit is never produced except for the value zero itself.
    if s.len() > 1 && s.as_bytes()[0] == ALPHABET[0] {
        return None;
    }
    let base = ALPHABET.len() as u64;
    s.bytes().try_fold(0u64, |acc, byte| {
        let digit = ALPHABET.iter().position(|&c| c == byte)? as u64;
        acc.checked_mul(base)?.checked_add(digit)
    })
}
