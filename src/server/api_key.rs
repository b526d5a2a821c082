//! Process API key
//!
//! One key is fixed at server startup and shared read-only by every
//! connection. Clients present it in their `auth` message.

use std::fmt;

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of generated keys
pub const API_KEY_LEN: usize = 32;

/// Environment variable the demo server reads a fixed key from
pub const API_KEY_ENV: &str = "ASCII_STREAM_API_KEY";

/// Shared secret clients authenticate with
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Use a fixed key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a random alphanumeric key
    pub fn generate() -> Self {
        let key: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(API_KEY_LEN)
            .map(char::from)
            .collect();
        Self(key)
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key has the shape of a generated key
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == API_KEY_LEN && self.0.bytes().all(|b| b.is_ascii_alphanumeric())
    }

    /// Compare a presented key
    ///
    /// Every byte is compared regardless of where the first mismatch is.
    pub fn matches(&self, presented: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = presented.as_bytes();
        if expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(..)")
    }
}
