//! Time handling for watermarks and time-format transforms
//!
//! Watermarks travel as epoch milliseconds. Filters and transforms describe the
//! representation a column uses with a [`TimeFormat`], written in the
//! day.js-style pattern syntax operators already know (`DD/MM/YYYY HH:mm:ss`)
//! or one of the epoch markers `epoch_ms` / `epoch_s`. All conversions are UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{CommonError, Result};

/// Numeric values above this are treated as epoch milliseconds.
const EPOCH_MS_FLOOR: f64 = 1e12;

/// Numeric values above this (and not above [`EPOCH_MS_FLOOR`]) are epoch seconds.
const EPOCH_S_FLOOR: f64 = 1e9;

/// Representation of a point in time inside a row or a filter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeFormat {
    /// `YYYY-MM-DDTHH:mm:ssZ`
    IsoUtc,
    /// `YYYY-MM-DD HH:mm:ss`
    DateTime,
    /// `DD/MM/YYYY HH:mm:ss`
    DayFirstDateTime,
    /// `YYYY-MM-DD`
    Date,
    /// `DD/MM/YYYY`
    DayFirstDate,
    /// Milliseconds since the Unix epoch
    EpochMillis,
    /// Seconds since the Unix epoch
    EpochSeconds,
}

/// Format used when none is declared.
pub const DEFAULT_FORMAT: TimeFormat = TimeFormat::DayFirstDateTime;

/// String formats tried, in order, when detecting the format of a value.
pub const KNOWN_FORMATS: [TimeFormat; 5] = [
    TimeFormat::IsoUtc,
    TimeFormat::DateTime,
    TimeFormat::DayFirstDateTime,
    TimeFormat::Date,
    TimeFormat::DayFirstDate,
];

impl TimeFormat {
    /// The pattern string as written in pipeline definitions
    pub fn pattern(self) -> &'static str {
        match self {
            TimeFormat::IsoUtc => "YYYY-MM-DDTHH:mm:ssZ",
            TimeFormat::DateTime => "YYYY-MM-DD HH:mm:ss",
            TimeFormat::DayFirstDateTime => "DD/MM/YYYY HH:mm:ss",
            TimeFormat::Date => "YYYY-MM-DD",
            TimeFormat::DayFirstDate => "DD/MM/YYYY",
            TimeFormat::EpochMillis => "epoch_ms",
            TimeFormat::EpochSeconds => "epoch_s",
        }
    }

    pub fn is_epoch(self) -> bool {
        matches!(self, TimeFormat::EpochMillis | TimeFormat::EpochSeconds)
    }

    fn chrono_pattern(self) -> Option<&'static str> {
        match self {
            TimeFormat::IsoUtc => Some("%Y-%m-%dT%H:%M:%SZ"),
            TimeFormat::DateTime => Some("%Y-%m-%d %H:%M:%S"),
            TimeFormat::DayFirstDateTime => Some("%d/%m/%Y %H:%M:%S"),
            TimeFormat::Date => Some("%Y-%m-%d"),
            TimeFormat::DayFirstDate => Some("%d/%m/%Y"),
            TimeFormat::EpochMillis | TimeFormat::EpochSeconds => None,
        }
    }

    fn has_time(self) -> bool {
        !matches!(self, TimeFormat::Date | TimeFormat::DayFirstDate)
    }
}

impl FromStr for TimeFormat {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        [
            TimeFormat::IsoUtc,
            TimeFormat::DateTime,
            TimeFormat::DayFirstDateTime,
            TimeFormat::Date,
            TimeFormat::DayFirstDate,
            TimeFormat::EpochMillis,
            TimeFormat::EpochSeconds,
        ]
        .into_iter()
        .find(|format| format.pattern() == s)
        .ok_or_else(|| CommonError::UnsupportedTimeFormat(s.to_string()))
    }
}

impl fmt::Display for TimeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pattern())
    }
}

impl Serialize for TimeFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.pattern())
    }
}

impl<'de> Deserialize<'de> for TimeFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Whether `format` names one of the supported formats
pub fn is_supported(format: &str) -> bool {
    format.parse::<TimeFormat>().is_ok()
}

/// Detect which format a value is written in
///
/// Numbers are classified by magnitude; strings must match one of the
/// [`KNOWN_FORMATS`] exactly.
pub fn detect(value: &Value) -> Result<TimeFormat> {
    match value {
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or_default();
            if n > EPOCH_MS_FLOOR {
                Ok(TimeFormat::EpochMillis)
            } else if n > EPOCH_S_FLOOR {
                Ok(TimeFormat::EpochSeconds)
            } else {
                Err(CommonError::UnknownTimeFormat(value.to_string()))
            }
        },
        Value::String(s) => KNOWN_FORMATS
            .into_iter()
            .find(|format| parse_strict(s, *format).is_ok())
            .ok_or_else(|| CommonError::UnknownTimeFormat(value.to_string())),
        _ => Err(CommonError::UnknownTimeFormat(value.to_string())),
    }
}

fn parse_strict(input: &str, format: TimeFormat) -> Result<NaiveDateTime> {
    let invalid = || CommonError::InvalidTime {
        input: input.to_string(),
        format: format.pattern().to_string(),
    };
    let pattern = format.chrono_pattern().ok_or_else(invalid)?;

    let parsed = if format.has_time() {
        NaiveDateTime::parse_from_str(input, pattern).map_err(|_| invalid())?
    } else {
        NaiveDate::parse_from_str(input, pattern)
            .map_err(|_| invalid())?
            .and_hms_opt(0, 0, 0)
            .ok_or_else(invalid)?
    };

    // chrono tolerates unpadded fields; require the canonical spelling
    if parsed.format(pattern).to_string() != input {
        return Err(invalid());
    }
    Ok(parsed)
}

/// Parse a string in `format` to epoch milliseconds
pub fn string_to_epoch(input: &str, format: TimeFormat) -> Result<i64> {
    match format {
        TimeFormat::EpochMillis => input.trim().parse().map_err(|_| CommonError::InvalidEpoch(input.to_string())),
        TimeFormat::EpochSeconds => input
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|s| s.checked_mul(1000))
            .ok_or_else(|| CommonError::InvalidEpoch(input.to_string())),
        _ => Ok(parse_strict(input, format)?.and_utc().timestamp_millis()),
    }
}

/// Render epoch milliseconds as a string in `format`
pub fn epoch_to_string(epoch_ms: i64, format: TimeFormat) -> Result<String> {
    match format {
        TimeFormat::EpochMillis => Ok(epoch_ms.to_string()),
        TimeFormat::EpochSeconds => Ok(epoch_ms.div_euclid(1000).to_string()),
        _ => {
            let pattern = format
                .chrono_pattern()
                .ok_or_else(|| CommonError::UnsupportedTimeFormat(format.to_string()))?;
            let at = DateTime::<Utc>::from_timestamp_millis(epoch_ms)
                .ok_or_else(|| CommonError::InvalidEpoch(epoch_ms.to_string()))?;
            Ok(at.format(pattern).to_string())
        },
    }
}

/// Current time in epoch milliseconds
pub fn now_epoch() -> i64 {
    Utc::now().timestamp_millis()
}

/// Shift an epoch by a number of minutes (negative moves backwards)
pub fn offset_epoch(epoch_ms: i64, minutes: i64) -> Result<i64> {
    minutes
        .checked_mul(60_000)
        .and_then(|delta| epoch_ms.checked_add(delta))
        .filter(|shifted| DateTime::<Utc>::from_timestamp_millis(*shifted).is_some())
        .ok_or_else(|| CommonError::InvalidEpoch(epoch_ms.to_string()))
}

/// Read a row value written in `format` as epoch milliseconds
pub fn value_to_epoch(value: &Value, format: TimeFormat) -> Result<i64> {
    match (value, format) {
        (Value::Number(n), TimeFormat::EpochMillis) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| CommonError::InvalidEpoch(n.to_string())),
        (Value::Number(n), TimeFormat::EpochSeconds) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .and_then(|s| s.checked_mul(1000))
            .ok_or_else(|| CommonError::InvalidEpoch(n.to_string())),
        (Value::String(s), format) => string_to_epoch(s, format),
        (other, format) => Err(CommonError::InvalidTime {
            input: other.to_string(),
            format: format.pattern().to_string(),
        }),
    }
}

/// Write epoch milliseconds as a row value in `format`
///
/// Epoch formats produce numbers, pattern formats produce strings.
pub fn epoch_to_value(epoch_ms: i64, format: TimeFormat) -> Result<Value> {
    match format {
        TimeFormat::EpochMillis => Ok(Value::from(epoch_ms)),
        TimeFormat::EpochSeconds => Ok(Value::from(epoch_ms.div_euclid(1000))),
        _ => epoch_to_string(epoch_ms, format).map(Value::String),
    }
}

/// Convert a row value from one format to another
pub fn convert(value: &Value, from: TimeFormat, to: TimeFormat) -> Result<Value> {
    epoch_to_value(value_to_epoch(value, from)?, to)
}
