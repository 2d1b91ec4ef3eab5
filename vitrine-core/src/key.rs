//! Cache key construction and validation.
//!
//! Keys are opaque strings derived deterministically from the logical read
//! they identify: either a record identifier or a query fingerprint built
//! from sorted filter parameters. Validation happens at construction, so a
//! `CacheKey` in hand is always well-formed and the engine never has to
//! re-check on the hot path.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Maximum accepted key length in bytes.
pub const MAX_KEY_BYTES: usize = 512;

/// A validated cache key uniquely identifying a logical read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a cache key from a raw string.
    ///
    /// Rejects empty keys, keys longer than [`MAX_KEY_BYTES`], and keys
    /// containing control characters with [`CacheError::InvalidKey`].
    pub fn new(key: impl Into<String>) -> CacheResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(CacheError::InvalidKey {
                reason: "empty key".to_string(),
            });
        }
        if key.len() > MAX_KEY_BYTES {
            return Err(CacheError::InvalidKey {
                reason: format!("key exceeds {} bytes", MAX_KEY_BYTES),
            });
        }
        if key.chars().any(|c| c.is_control()) {
            return Err(CacheError::InvalidKey {
                reason: "key contains control characters".to_string(),
            });
        }
        Ok(Self(key))
    }

    /// Build a deterministic query-fingerprint key.
    ///
    /// Parameters with `None` values are dropped, the remainder is sorted by
    /// name, and the key takes the form `base:name1=v1&name2=v2`. A query
    /// with no effective parameters maps to `base:all`, so "the whole
    /// catalog" is a single cacheable read.
    pub fn for_query<'a, I>(base: &str, params: I) -> CacheResult<Self>
    where
        I: IntoIterator<Item = (&'a str, Option<String>)>,
    {
        let filtered: BTreeMap<&str, String> = params
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect();

        if filtered.is_empty() {
            return Self::new(format!("{}:all", base));
        }

        let param_string = filtered
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("&");

        Self::new(format!("{}:{}", base, param_string))
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// TESTS
// =============================================================================
