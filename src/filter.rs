use std::str::FromStr;

use anyhow::{Result, anyhow};

use crate::value::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Contains,
    Equals,
    NotEquals,
}

/// Staging-row search: either a bare substring matched against every value,
/// or a single `field <op> text` condition. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    Anywhere(String),
    Field {
        field: String,
        operator: FilterOperator,
        needle: String,
    },
}

impl RowFilter {
    pub fn parse(filter: &str) -> Result<Self> {
        let trimmed = filter.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("Empty filter expression"));
        }

        let lowered = trimmed.to_ascii_lowercase();
        if let Some(idx) = lowered.find(" contains ") {
            let (left, right_with_space) = trimmed.split_at(idx);
            let right = &right_with_space[" contains ".len()..];
            return Self::field_condition(left, FilterOperator::Contains, right);
        }

        for (needle, operator) in [("!=", FilterOperator::NotEquals), ("=", FilterOperator::Equals)] {
            if let Some(idx) = trimmed.find(needle) {
                let left = &trimmed[..idx];
                let right = &trimmed[idx + needle.len()..];
                return Self::field_condition(left, operator, right);
            }
        }

        Ok(RowFilter::Anywhere(unquote(trimmed).to_lowercase()))
    }

    fn field_condition(left: &str, operator: FilterOperator, right: &str) -> Result<Self> {
        let field = left.trim();
        if field.is_empty() {
            return Err(anyhow!("Filter condition is missing a field name"));
        }
        Ok(RowFilter::Field {
            field: field.to_string(),
            operator,
            needle: unquote(right.trim()).to_lowercase(),
        })
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            RowFilter::Anywhere(needle) => record
                .values()
                .filter_map(|value| value.as_text())
                .any(|text| text.to_lowercase().contains(needle.as_str())),
            RowFilter::Field {
                field,
                operator,
                needle,
            } => {
                let text = record
                    .get(field)
                    .and_then(|value| value.as_text())
                    .map(|text| text.to_lowercase())
                    .unwrap_or_default();
                match operator {
                    FilterOperator::Contains => text.contains(needle.as_str()),
                    FilterOperator::Equals => text == *needle,
                    FilterOperator::NotEquals => text != *needle,
                }
            }
        }
    }
}

impl FromStr for RowFilter {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        RowFilter::parse(value)
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}
