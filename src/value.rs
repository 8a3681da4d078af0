//! Record values and the date/date-time format catalogue.
//!
//! Uploaded cells are kept as a small tagged union rather than raw strings so
//! the classifier, the row validator and the business rules all match on the
//! same closed set of variants. The format catalogue is shared by inference
//! (which records the label it saw) and validation (which accepts any entry).

use std::{borrow::Cow, collections::BTreeMap, fmt};

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single record as it travels through staging and into the dataset.
pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    /// Builds a value from a raw CSV cell. Blank cells become [`Value::Null`].
    pub fn from_cell(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Value::Null
        } else {
            Value::String(raw.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_text().is_none()
    }

    /// Trimmed textual form used by every predicate, `None` when empty.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Null => None,
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then_some(Cow::Borrowed(trimmed))
            }
            Value::Number(n) => Some(Cow::Owned(format_number(*n))),
            Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
        }
    }

    pub fn as_display(&self) -> String {
        self.as_text().map(Cow::into_owned).unwrap_or_default()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::from_cell(value)
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

/// Date patterns in the order they are tried. The first element is the label
/// stored as a field's `format` constraint.
pub const DATE_FORMATS: &[(&str, &str)] = &[
    ("YYYY-MM-DD", "%Y-%m-%d"),
    ("YYYY/MM/DD", "%Y/%m/%d"),
    ("MM/DD/YYYY", "%m/%d/%Y"),
    ("DD/MM/YYYY", "%d/%m/%Y"),
    ("DD-MM-YYYY", "%d-%m-%Y"),
    ("DD.MM.YYYY", "%d.%m.%Y"),
];

pub const DATETIME_FORMATS: &[(&str, &str)] = &[
    ("YYYY-MM-DDTHH:mm:ss", "%Y-%m-%dT%H:%M:%S"),
    ("YYYY-MM-DDTHH:mm:ss.SSS", "%Y-%m-%dT%H:%M:%S%.f"),
    ("YYYY-MM-DD HH:mm:ss", "%Y-%m-%d %H:%M:%S"),
    ("YYYY-MM-DD HH:mm", "%Y-%m-%d %H:%M"),
    ("MM/DD/YYYY HH:mm:ss", "%m/%d/%Y %H:%M:%S"),
    ("DD/MM/YYYY HH:mm:ss", "%d/%m/%Y %H:%M:%S"),
];

pub const RFC3339_LABEL: &str = "ISO-8601";

/// Returns the label of the first date format that parses `value`.
pub fn match_date_format(value: &str) -> Option<&'static str> {
    let trimmed = value.trim();
    DATE_FORMATS
        .iter()
        .find(|(_, pattern)| NaiveDate::parse_from_str(trimmed, pattern).is_ok())
        .map(|(label, _)| *label)
}

/// Returns the label of the first date-time format that parses `value`.
pub fn match_datetime_format(value: &str) -> Option<&'static str> {
    let trimmed = value.trim();
    if DateTime::parse_from_rfc3339(trimmed).is_ok() {
        return Some(RFC3339_LABEL);
    }
    DATETIME_FORMATS
        .iter()
        .find(|(_, pattern)| NaiveDateTime::parse_from_str(trimmed, pattern).is_ok())
        .map(|(label, _)| *label)
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();
    for (_, pattern) in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, pattern) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.naive_utc());
    }
    for (_, pattern) in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, pattern) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Parses a date using only the catalogue entry named by `label`.
pub fn parse_date_with_label(value: &str, label: &str) -> Option<NaiveDate> {
    let (_, pattern) = DATE_FORMATS.iter().find(|(name, _)| *name == label)?;
    NaiveDate::parse_from_str(value.trim(), pattern).ok()
}

/// Parses a date-time using only the catalogue entry named by `label`.
pub fn parse_datetime_with_label(value: &str, label: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if label == RFC3339_LABEL {
        return DateTime::parse_from_rfc3339(trimmed)
            .ok()
            .map(|parsed| parsed.naive_utc());
    }
    let (_, pattern) = DATETIME_FORMATS.iter().find(|(name, _)| *name == label)?;
    NaiveDateTime::parse_from_str(trimmed, pattern).ok()
}

/// Dates and date-times on a common timeline, used for cross-field comparisons.
pub fn parse_temporal(value: &str) -> Option<NaiveDateTime> {
    if let Ok(datetime) = parse_naive_datetime(value) {
        return Some(datetime);
    }
    parse_naive_date(value)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
