//! Duration grammar shared by timer specs, temporal detector windows, and
//! SSE heartbeat/webhook retry configuration.
//!
//! Accepted forms: a plain positive milliseconds integer, or a string
//! `<int>(ms|s|m|h|d)`. Negative or zero values are invalid.

use std::fmt;
use std::time::Duration as StdDuration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::EngineError;

/// A parsed, positive duration in milliseconds.
///
/// Deserializes from either a plain millisecond integer or a duration
/// string (`"5m"`), matching the grammar accepted everywhere `within`/
/// `window`/`duration` appear on the wire (spec §6); serializes back out as
/// a plain millisecond integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EngineDuration(u64);

impl EngineDuration {
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn as_std(self) -> StdDuration {
        StdDuration::from_millis(self.0)
    }

    /// Parses a duration from either a plain millisecond integer or a
    /// `<int>(ms|s|m|h|d)` string.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidDuration` for zero, negative, or
    /// malformed input.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidDuration(raw.to_string()));
        }

        let split_at = trimmed
            .find(|c: char| !c.is_ascii_digit() && c != '-' && c != '+')
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split_at);

        let magnitude: i64 = digits
            .parse()
            .map_err(|_| EngineError::InvalidDuration(raw.to_string()))?;
        if magnitude <= 0 {
            return Err(EngineError::InvalidDuration(raw.to_string()));
        }
        let magnitude = magnitude as u64;

        let ms = match unit {
            "" | "ms" => magnitude,
            "s" => magnitude.saturating_mul(1_000),
            "m" => magnitude.saturating_mul(60_000),
            "h" => magnitude.saturating_mul(3_600_000),
            "d" => magnitude.saturating_mul(86_400_000),
            _ => return Err(EngineError::InvalidDuration(raw.to_string())),
        };

        Ok(Self(ms))
    }

    /// Parses a duration from a plain positive millisecond count.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidDuration` if `ms` is zero.
    pub fn from_millis_checked(ms: u64) -> Result<Self, EngineError> {
        if ms == 0 {
            return Err(EngineError::InvalidDuration("0".to_string()));
        }
        Ok(Self(ms))
    }
}

impl From<EngineDuration> for StdDuration {
    fn from(value: EngineDuration) -> Self {
        value.as_std()
    }
}

struct EngineDurationVisitor;

impl<'de> Visitor<'de> for EngineDurationVisitor {
    type Value = EngineDuration;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a positive millisecond integer or a duration string like \"5m\"")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        EngineDuration::from_millis_checked(value).map_err(de::Error::custom)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        if value <= 0 {
            return Err(de::Error::custom(format!("duration must be positive, got {value}")));
        }
        self.visit_u64(value as u64)
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        if value <= 0.0 {
            return Err(de::Error::custom(format!("duration must be positive, got {value}")));
        }
        self.visit_u64(value as u64)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        EngineDuration::parse(value).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for EngineDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(EngineDurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_ms() {
        assert_eq!(EngineDuration::parse("1500").unwrap().as_millis(), 1500);
    }

    #[test]
    fn test_parse_suffixed() {
        assert_eq!(EngineDuration::parse("5m").unwrap().as_millis(), 300_000);
        assert_eq!(EngineDuration::parse("1h").unwrap().as_millis(), 3_600_000);
        assert_eq!(EngineDuration::parse("7d").unwrap().as_millis(), 604_800_000);
        assert_eq!(EngineDuration::parse("30s").unwrap().as_millis(), 30_000);
        assert_eq!(EngineDuration::parse("250ms").unwrap().as_millis(), 250);
    }

    #[test]
    fn test_parse_rejects_zero_and_negative() {
        assert!(EngineDuration::parse("0").is_err());
        assert!(EngineDuration::parse("0m").is_err());
        assert!(EngineDuration::parse("-5m").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(EngineDuration::parse("").is_err());
        assert!(EngineDuration::parse("5mo").is_err());
        assert!(EngineDuration::parse("abc").is_err());
    }

    #[test]
    fn test_as_std() {
        let d = EngineDuration::parse("2s").unwrap();
        assert_eq!(d.as_std(), StdDuration::from_millis(2000));
    }

    #[test]
    fn test_deserialize_from_plain_number() {
        let d: EngineDuration = serde_json::from_str("1500").unwrap();
        assert_eq!(d.as_millis(), 1500);
    }

    #[test]
    fn test_deserialize_from_duration_string() {
        let d: EngineDuration = serde_json::from_str("\"5m\"").unwrap();
        assert_eq!(d.as_millis(), 300_000);
    }

    #[test]
    fn test_deserialize_rejects_zero_and_malformed() {
        assert!(serde_json::from_str::<EngineDuration>("0").is_err());
        assert!(serde_json::from_str::<EngineDuration>("\"abc\"").is_err());
    }

    #[test]
    fn test_serialize_is_plain_number() {
        let d = EngineDuration::from_millis(42);
        assert_eq!(serde_json::to_string(&d).unwrap(), "42");
    }
}
