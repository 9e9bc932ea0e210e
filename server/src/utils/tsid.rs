//! Time-sortable identifiers
//!
//! Every internal entity (batch, event, score, project) is identified by a
//! 128-bit id whose first 48 bits are a millisecond Unix timestamp, so the
//! lexicographic order of the 32-char hex form matches creation order. The
//! bit layout is UUIDv7; the canonical string form is the simple (unhyphenated)
//! lowercase encoding.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A time-sortable 128-bit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tsid(Uuid);

/// Error parsing a [`Tsid`] from its string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tsid: {0}")]
pub struct TsidParseError(String);

impl Tsid {
    /// Generate a new id stamped with the current time.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// The all-zero id. Rejected by request validation.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Millisecond timestamp embedded in the first 48 bits.
    pub fn timestamp_millis(&self) -> i64 {
        let b = self.0.as_bytes();
        ((b[0] as i64) << 40)
            | ((b[1] as i64) << 32)
            | ((b[2] as i64) << 24)
            | ((b[3] as i64) << 16)
            | ((b[4] as i64) << 8)
            | (b[5] as i64)
    }

    /// Embedded timestamp as a UTC datetime.
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_millis())
            .single()
            .unwrap_or_default()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for Tsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for Tsid {
    type Err = TsidParseError;

    /// Accepts simple or hyphenated hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| TsidParseError(s.to_string()))
    }
}

impl From<Uuid> for Tsid {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}

impl Serialize for Tsid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.simple())
    }
}

impl<'de> Deserialize<'de> for Tsid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_time_ordered() {
        let a = Tsid::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Tsid::generate();
        assert!(a.to_string() < b.to_string());
        assert!(a.timestamp_millis() <= b.timestamp_millis());
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let id = Tsid::generate();
        let now = Utc::now().timestamp_millis();
        let embedded = id.timestamp_millis();
        assert!((now - embedded).abs() < 1_000, "embedded ts within 1s of now");
    }

    #[test]
    fn test_parse_simple_and_hyphenated() {
        let id = Tsid::generate();
        let simple = id.to_string();
        assert_eq!(simple.len(), 32);
        assert_eq!(simple.parse::<Tsid>().unwrap(), id);

        let hyphenated = id.as_uuid().hyphenated().to_string();
        assert_eq!(hyphenated.parse::<Tsid>().unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-an-id".parse::<Tsid>().is_err());
        assert!("".parse::<Tsid>().is_err());
        assert!("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".parse::<Tsid>().is_err());
    }

    #[test]
    fn test_serde_string_form() {
        let id = Tsid::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: Tsid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_nil() {
        assert!(Tsid::nil().is_nil());
        assert!(!Tsid::generate().is_nil());
    }
}
