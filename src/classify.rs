//! Type predicates shared by schema inference and row validation.
//!
//! [`classify`] tests one value against every predicate and returns the set of
//! tags it satisfies; [`conforms`] answers the narrower question the row
//! validator asks for a declared field type. Both go through the same
//! functions so a value inferred as a type is always accepted as that type.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    schema::FieldType,
    value::{match_date_format, match_datetime_format, parse_date_with_label, parse_datetime_with_label},
};

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?$").expect("number pattern")
});
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://[^\s/$.?#][^\s]*$").expect("url pattern"));

/// Non-string types a value can be recognised as, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Number,
    Boolean,
    Email,
    Url,
    Uuid,
    Date,
    DateTime,
}

impl TypeTag {
    pub const ALL: [TypeTag; 7] = [
        TypeTag::Number,
        TypeTag::Boolean,
        TypeTag::Email,
        TypeTag::Url,
        TypeTag::Uuid,
        TypeTag::Date,
        TypeTag::DateTime,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn field_type(self) -> FieldType {
        match self {
            TypeTag::Number => FieldType::Number,
            TypeTag::Boolean => FieldType::Boolean,
            TypeTag::Email => FieldType::Email,
            TypeTag::Url => FieldType::Url,
            TypeTag::Uuid => FieldType::Uuid,
            TypeTag::Date => FieldType::Date,
            TypeTag::DateTime => FieldType::DateTime,
        }
    }
}

/// The tags one value matched, plus the concrete temporal format if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeTags {
    bits: u8,
    pub date_format: Option<&'static str>,
    pub datetime_format: Option<&'static str>,
}

impl TypeTags {
    fn insert(&mut self, tag: TypeTag) {
        self.bits |= 1 << tag.index();
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.bits & (1 << tag.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeTag> + '_ {
        TypeTag::ALL.into_iter().filter(|tag| self.contains(*tag))
    }
}

pub fn classify(value: &str) -> TypeTags {
    let trimmed = value.trim();
    let mut tags = TypeTags::default();
    if trimmed.is_empty() {
        return tags;
    }
    if is_number(trimmed) {
        tags.insert(TypeTag::Number);
    }
    if is_boolean(trimmed) {
        tags.insert(TypeTag::Boolean);
    }
    if is_email(trimmed) {
        tags.insert(TypeTag::Email);
    }
    if is_url(trimmed) {
        tags.insert(TypeTag::Url);
    }
    if is_uuid(trimmed) {
        tags.insert(TypeTag::Uuid);
    }
    if let Some(format) = match_date_format(trimmed) {
        tags.insert(TypeTag::Date);
        tags.date_format = Some(format);
    }
    if let Some(format) = match_datetime_format(trimmed) {
        tags.insert(TypeTag::DateTime);
        tags.datetime_format = Some(format);
    }
    tags
}

pub fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if !NUMBER_RE.is_match(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|parsed| parsed.is_finite())
}

pub fn is_number(value: &str) -> bool {
    parse_number(value).is_some()
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

pub fn is_boolean(value: &str) -> bool {
    parse_boolean(value).is_some()
}

pub fn is_email(value: &str) -> bool {
    EMAIL_RE.is_match(value.trim())
}

pub fn is_url(value: &str) -> bool {
    URL_RE.is_match(value.trim())
}

pub fn is_uuid(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.len() == 36 && Uuid::parse_str(trimmed).is_ok()
}

/// Checks a non-empty value against a declared field type.
///
/// `format` restricts date and date-time parsing to one catalogue entry; with
/// `None` every catalogue format is accepted.
pub fn conforms(value: &str, data_type: FieldType, format: Option<&str>) -> bool {
    match data_type {
        FieldType::String => true,
        FieldType::Number => is_number(value),
        FieldType::Boolean => is_boolean(value),
        FieldType::Email => is_email(value),
        FieldType::Url => is_url(value),
        FieldType::Uuid => is_uuid(value),
        FieldType::Date => match format {
            Some(label) => parse_date_with_label(value, label).is_some(),
            None => match_date_format(value).is_some(),
        },
        FieldType::DateTime => match format {
            Some(label) => parse_datetime_with_label(value, label).is_some(),
            None => match_datetime_format(value).is_some(),
        },
    }
}
