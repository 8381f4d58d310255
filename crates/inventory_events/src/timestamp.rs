use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::record::json_kind;

/// Offset-less ISO-8601 layouts accepted after RFC 3339; interpreted as UTC.
const NAIVE_ISO_LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const OFFSET_ISO_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"];

/// Largest magnitude accepted for epoch values (seconds or milliseconds).
const MAX_EPOCH_MAGNITUDE: f64 = 1.0e15;

/// How a record's timestamp field is interpreted.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub enum TimestampFormat {
    /// RFC 3339 / ISO-8601, fractional seconds and offset optional (no offset means UTC).
    #[default]
    Iso8601,
    /// Seconds since the Unix epoch, as a JSON number or numeric string.
    EpochSeconds,
    /// Milliseconds since the Unix epoch, as a JSON number or numeric string.
    EpochMillis,
    /// A strptime-style pattern such as `%Y-%m-%d %H:%M:%S`; `%z` is optional.
    Pattern(String),
}

impl TimestampFormat {
    /// Maps a configured format name to a format. Unrecognized names are treated as patterns.
    pub fn from_name(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "iso8601" | "iso-8601" | "rfc3339" => Self::Iso8601,
            "epoch" | "epoch_seconds" | "unix" => Self::EpochSeconds,
            "epoch_millis" | "epoch_ms" | "unix_millis" => Self::EpochMillis,
            _ => Self::Pattern(raw.to_string()),
        }
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iso8601 => f.write_str("iso8601"),
            Self::EpochSeconds => f.write_str("epoch"),
            Self::EpochMillis => f.write_str("epoch_millis"),
            Self::Pattern(pattern) => f.write_str(pattern),
        }
    }
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum TimestampParseError {
    #[error("expected a {expected} timestamp, found {found}")]
    UnsupportedType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("`{value}` does not match format `{format}`")]
    NoMatch { value: String, format: String },
    #[error("epoch value `{value}` is out of range")]
    OutOfRange { value: String },
}

/// Parses `value` according to `format` and returns whole seconds since the Unix epoch.
///
/// Fractional seconds are truncated toward negative infinity.
pub fn parse_timestamp(value: &Value, format: &TimestampFormat) -> Result<i64, TimestampParseError> {
    match format {
        TimestampFormat::Iso8601 => parse_iso8601(expect_str(value, "string")?),
        TimestampFormat::EpochSeconds => parse_epoch(value, 1.0),
        TimestampFormat::EpochMillis => parse_epoch(value, 1000.0),
        TimestampFormat::Pattern(pattern) => {
            parse_pattern(expect_str(value, "string")?, pattern)
        }
    }
}

fn expect_str<'a>(value: &'a Value, expected: &'static str) -> Result<&'a str, TimestampParseError> {
    value
        .as_str()
        .ok_or_else(|| TimestampParseError::UnsupportedType {
            expected,
            found: json_kind(value),
        })
}

fn parse_iso8601(raw: &str) -> Result<i64, TimestampParseError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.timestamp());
    }
    for layout in OFFSET_ISO_LAYOUTS {
        if let Ok(parsed) = DateTime::parse_from_str(trimmed, layout) {
            return Ok(parsed.timestamp());
        }
    }
    for layout in NAIVE_ISO_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(midnight_utc(date));
    }
    Err(TimestampParseError::NoMatch {
        value: raw.to_string(),
        format: TimestampFormat::Iso8601.to_string(),
    })
}

fn parse_pattern(raw: &str, pattern: &str) -> Result<i64, TimestampParseError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, pattern) {
        return Ok(parsed.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, pattern) {
        return Ok(Utc.from_utc_datetime(&naive).timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, pattern) {
        return Ok(midnight_utc(date));
    }
    Err(TimestampParseError::NoMatch {
        value: raw.to_string(),
        format: pattern.to_string(),
    })
}

fn parse_epoch(value: &Value, units_per_second: f64) -> Result<i64, TimestampParseError> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        other => {
            return Err(TimestampParseError::UnsupportedType {
                expected: "numeric",
                found: json_kind(other),
            })
        }
    };
    let Some(number) = number else {
        return Err(TimestampParseError::NoMatch {
            value: value.to_string(),
            format: if units_per_second == 1.0 {
                TimestampFormat::EpochSeconds.to_string()
            } else {
                TimestampFormat::EpochMillis.to_string()
            },
        });
    };
    if !number.is_finite() || number.abs() > MAX_EPOCH_MAGNITUDE {
        return Err(TimestampParseError::OutOfRange {
            value: value.to_string(),
        });
    }
    Ok((number / units_per_second).floor() as i64)
}

fn midnight_utc(date: NaiveDate) -> i64 {
    // Midnight always exists for a valid date.
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp())
        .unwrap_or_default()
}
