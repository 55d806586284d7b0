use serde_json::Value;
use std::{fmt, str::FromStr};
use time::{
    format_description::FormatItem, macros::format_description, Duration, OffsetDateTime,
    PrimitiveDateTime, Time,
};

use super::{FlatRow, TIMEZONE_COLUMN};
use crate::EtlError;

/// Written in place of a time-of-day that cannot be represented.
pub const INVALID_TIME_MARKER: &str = "invalid";

pub const TIME_OF_DAY_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");

pub const RECORD_TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

// Real offsets stay within +-14h; anything past a day is not an offset.
const MAX_OFFSET_SECONDS: i64 = 26 * 60 * 60;

/// Local wall-clock time of one epoch field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTime {
    At(Time),
    Unrepresentable,
}

impl LocalTime {
    pub fn time(&self) -> Option<Time> {
        match self {
            LocalTime::At(time) => Some(*time),
            LocalTime::Unrepresentable => None,
        }
    }
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalTime::At(t) => write!(f, "{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second()),
            LocalTime::Unrepresentable => f.write_str(INVALID_TIME_MARKER),
        }
    }
}

impl FromStr for LocalTime {
    type Err = time::error::Parse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == INVALID_TIME_MARKER {
            return Ok(LocalTime::Unrepresentable);
        }
        Time::parse(s, TIME_OF_DAY_FORMAT).map(LocalTime::At)
    }
}

/// Read the observation's UTC offset in seconds from the `timezone` column.
pub fn utc_offset(row: &FlatRow) -> Result<i64, EtlError> {
    let value = row.get(TIMEZONE_COLUMN).ok_or_else(|| {
        EtlError::Schema(String::from(
            "missing `timezone` offset, local times cannot be derived",
        ))
    })?;
    let offset = integer(value)
        .ok_or_else(|| EtlError::Schema(format!("`timezone` must be whole seconds, found {}", value)))?;
    if offset.abs() >= MAX_OFFSET_SECONDS {
        return Err(EtlError::Schema(format!(
            "`timezone` offset of {} seconds is out of range",
            offset
        )));
    }
    Ok(offset)
}

/// Wall-clock time of `epoch + offset_seconds`, with the date discarded.
///
/// The offset is the one reported for the observed city; the host's own
/// timezone never enters the calculation.
pub fn local_time_of_day(epoch: i64, offset_seconds: i64) -> LocalTime {
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()
        .and_then(|utc| utc.checked_add(Duration::seconds(offset_seconds)))
        .map(|local| LocalTime::At(local.time()))
        .unwrap_or(LocalTime::Unrepresentable)
}

/// Local time-of-day for an epoch column of the row.
///
/// `None` when the column is absent or null. Values that are not whole
/// seconds yield [`LocalTime::Unrepresentable`] so the rest of the row survives.
pub fn epoch_column(row: &FlatRow, column: &str, offset_seconds: i64) -> Option<LocalTime> {
    match row.get(column) {
        None | Some(Value::Null) => None,
        Some(value) => Some(match integer(value) {
            Some(epoch) => local_time_of_day(epoch, offset_seconds),
            None => LocalTime::Unrepresentable,
        }),
    }
}

/// The run's own clock reading in the city's civil time, truncated to seconds.
pub fn record_timestamp(
    run_time: OffsetDateTime,
    offset_seconds: i64,
) -> Result<PrimitiveDateTime, EtlError> {
    OffsetDateTime::from_unix_timestamp(run_time.unix_timestamp())
        .ok()
        .and_then(|utc| utc.checked_add(Duration::seconds(offset_seconds)))
        .map(|local| PrimitiveDateTime::new(local.date(), local.time()))
        .ok_or_else(|| {
            EtlError::Schema(format!(
                "run time {} with offset {} is not representable",
                run_time.unix_timestamp(),
                offset_seconds
            ))
        })
}

pub fn format_record_timestamp(timestamp: &PrimitiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        timestamp.year(),
        u8::from(timestamp.month()),
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second()
    )
}

pub fn parse_record_timestamp(value: &str) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(value, RECORD_TIMESTAMP_FORMAT)
}

/// Whole number from a JSON number, accepting integral floats such as `1012.0`.
pub(crate) fn integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}
