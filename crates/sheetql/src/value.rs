// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Scalar value model shared by ingestion, storage binding and results

use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value as EngineValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell, parameter or result value.
///
/// Serializes untagged, so a row set becomes nested JSON arrays of
/// `null`, numbers and strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

pub type Row = Vec<Value>;

/// Days between 0001-01-01 (CE day 1) and 1970-01-01
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text rendering bound into the text-typed storage columns
    pub fn to_storage_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(r) => Some(r.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<&calamine::Data> for Value {
    fn from(cell: &calamine::Data) -> Self {
        use calamine::Data;
        match cell {
            Data::Empty | Data::Error(_) => Value::Null,
            Data::Int(i) => Value::Integer(*i),
            Data::Float(f) => Value::Real(*f),
            Data::String(s) => Value::Text(s.clone()),
            Data::Bool(b) => Value::Integer(i64::from(*b)),
            Data::DateTime(dt) => Value::Real(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Text(s.clone()),
        }
    }
}

impl From<EngineValue> for Value {
    fn from(v: EngineValue) -> Self {
        match v {
            EngineValue::Null => Value::Null,
            EngineValue::Boolean(b) => Value::Integer(i64::from(b)),
            EngineValue::TinyInt(i) => Value::Integer(i.into()),
            EngineValue::SmallInt(i) => Value::Integer(i.into()),
            EngineValue::Int(i) => Value::Integer(i.into()),
            EngineValue::BigInt(i) => Value::Integer(i),
            EngineValue::UTinyInt(i) => Value::Integer(i.into()),
            EngineValue::USmallInt(i) => Value::Integer(i.into()),
            EngineValue::UInt(i) => Value::Integer(i.into()),
            EngineValue::UBigInt(i) => {
                i64::try_from(i).map_or(Value::Real(i as f64), Value::Integer)
            }
            EngineValue::HugeInt(i) => {
                i64::try_from(i).map_or(Value::Real(i as f64), Value::Integer)
            }
            EngineValue::Float(f) => Value::Real(f.into()),
            EngineValue::Double(f) => Value::Real(f),
            EngineValue::Decimal(d) => {
                let text = d.to_string();
                text.parse::<f64>().map_or(Value::Text(text), Value::Real)
            }
            EngineValue::Text(s) => Value::Text(s),
            EngineValue::Blob(bytes) => Value::Text(hex::encode(bytes)),
            EngineValue::Date32(days) => days
                .checked_add(UNIX_EPOCH_CE_DAYS)
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .map_or(Value::Null, |d| Value::Text(d.to_string())),
            // Zoned timestamps arrive as UTC instants and render in UTC
            EngineValue::Timestamp(unit, raw) => DateTime::from_timestamp_micros(micros(unit, raw))
                .map_or(Value::Null, |t| Value::Text(t.naive_utc().to_string())),
            EngineValue::Time64(unit, raw) => {
                let micros = micros(unit, raw);
                u32::try_from(micros.div_euclid(1_000_000))
                    .ok()
                    .and_then(|secs| {
                        let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).ok()?;
                        NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                    })
                    .map_or(Value::Null, |t| Value::Text(t.to_string()))
            }
            EngineValue::Interval {
                months,
                days,
                nanos,
            } => Value::Text(render_interval(months, days, nanos)),
            EngineValue::Enum(s) => Value::Text(s),
            EngineValue::List(items) | EngineValue::Array(items) => {
                let items: Vec<String> = items.into_iter().map(render_nested).collect();
                Value::Text(format!("[{}]", items.join(", ")))
            }
            EngineValue::Struct(fields) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("'{k}': {}", render_nested(v.clone())))
                    .collect();
                Value::Text(format!("{{{}}}", fields.join(", ")))
            }
            EngineValue::Map(entries) => {
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| {
                        format!("{}={}", render_nested(k.clone()), render_nested(v.clone()))
                    })
                    .collect();
                Value::Text(format!("{{{}}}", entries.join(", ")))
            }
            EngineValue::Union(inner) => Value::from(*inner),
        }
    }
}

fn micros(unit: TimeUnit, raw: i64) -> i64 {
    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}

fn render_nested(v: EngineValue) -> String {
    match Value::from(v) {
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n.abs() == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Interval text in the engine's own style: `1 year 2 months 3 days 04:05:06`
fn render_interval(months: i32, days: i32, nanos: i64) -> String {
    let mut parts = Vec::new();
    let (years, months) = (i64::from(months / 12), i64::from(months % 12));
    if years != 0 {
        parts.push(plural(years, "year"));
    }
    if months != 0 {
        parts.push(plural(months, "month"));
    }
    if days != 0 {
        parts.push(plural(i64::from(days), "day"));
    }
    if nanos != 0 || parts.is_empty() {
        let sign = if nanos < 0 { "-" } else { "" };
        let micros = (nanos / 1_000).unsigned_abs();
        let (secs, frac) = (micros / 1_000_000, micros % 1_000_000);
        let clock = format!("{sign}{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
        if frac == 0 {
            parts.push(clock);
        } else {
            parts.push(format!("{clock}.{frac:06}"));
        }
    }
    parts.join(" ")
}
