//! Client-assigned identifiers for records created before the remote store
//! has seen them.
//!
//! A [`LocalId`] renders as `local_<millis>_<suffix>` where `suffix` is nine
//! random base-36 characters. Ordering compares the timestamp first, so
//! sorting by `LocalId` approximates creation order.

use crate::{error::Result, Error, Timestamp};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every local identifier.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Length of the random suffix.
pub const SUFFIX_LEN: usize = 9;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A placeholder identifier for a record not yet acknowledged remotely.
///
/// Unique with overwhelming probability within a session. It is not meant
/// to be unique across devices; it is replaced by the remote id once synced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalId {
    created_at: Timestamp,
    suffix: String,
}

impl LocalId {
    /// Generate a new id stamped with `now` using the thread-local RNG.
    pub fn new(now: Timestamp) -> Self {
        Self::generate(now, &mut rand::thread_rng())
    }

    /// Generate a new id stamped with `now` using the given RNG.
    pub fn generate<R: Rng + ?Sized>(now: Timestamp, rng: &mut R) -> Self {
        let suffix = (0..SUFFIX_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self {
            created_at: now,
            suffix,
        }
    }

    /// Millisecond timestamp embedded in the id.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Random part of the id.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Whether `s` looks like a local id (prefix check only).
    pub fn is_local(s: &str) -> bool {
        s.starts_with(LOCAL_ID_PREFIX)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}_{}", LOCAL_ID_PREFIX, self.created_at, self.suffix)
    }
}

impl FromStr for LocalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidLocalId(s.to_string());

        let rest = s.strip_prefix(LOCAL_ID_PREFIX).ok_or_else(invalid)?;
        let (millis, suffix) = rest.split_once('_').ok_or_else(invalid)?;
        let created_at = millis.parse::<Timestamp>().map_err(|_| invalid())?;

        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(invalid());
        }

        Ok(Self {
            created_at,
            suffix: suffix.to_string(),
        })
    }
}

impl TryFrom<String> for LocalId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<LocalId> for String {
    fn from(id: LocalId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn format_matches_prefix_millis_suffix() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = LocalId::generate(1706745600000, &mut rng);
        let text = id.to_string();

        assert!(text.starts_with("local_1706745600000_"));
        assert_eq!(id.suffix().len(), SUFFIX_LEN);
        assert!(id
            .suffix()
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
    }

    #[test]
    fn parse_round_trips_display() {
        let id = LocalId::new(42);
        let parsed: LocalId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.created_at(), 42);
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "local_", "local_abc_x", "remote_1_abc", "local_12_", "local_12_a-b"] {
            assert!(bad.parse::<LocalId>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn ordering_follows_creation_time() {
        let mut rng = StdRng::seed_from_u64(1);
        let earlier = LocalId::generate(1000, &mut rng);
        let later = LocalId::generate(1001, &mut rng);
        assert!(earlier < later);
    }

    #[test]
    fn unique_within_same_millisecond() {
        let ids: HashSet<_> = (0..10_000).map(|_| LocalId::new(5)).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id: LocalId = "local_10_abc123xyz".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"local_10_abc123xyz\"");

        let back: LocalId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<LocalId>("\"nope\"").is_err());
    }
}
