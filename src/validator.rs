//! Header and row validation against an accepted schema.
//!
//! Validation outcomes are plain values: a row that breaks its schema yields a
//! list of [`ValidationError`]s, not an `Err`. Only setup problems (such as a
//! field pattern that does not compile) surface as errors.

use std::fmt;

use anyhow::{Context, Result};
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    classify::{conforms, parse_number},
    config::ValidationConfig,
    schema::{Field, FieldType, Schema},
    value::Record,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RequiredField,
    InvalidDataType,
    MinLength,
    MaxLength,
    MinValue,
    MaxValue,
    PatternMismatch,
    InvalidOption,
    MissingField,
    UnexpectedField,
    DuplicateValue,
    RangeViolation,
    CrossFieldViolation,
    FieldValidation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RequiredField => "required_field",
            ErrorKind::InvalidDataType => "invalid_data_type",
            ErrorKind::MinLength => "min_length",
            ErrorKind::MaxLength => "max_length",
            ErrorKind::MinValue => "min_value",
            ErrorKind::MaxValue => "max_value",
            ErrorKind::PatternMismatch => "pattern_mismatch",
            ErrorKind::InvalidOption => "invalid_option",
            ErrorKind::MissingField => "missing_field",
            ErrorKind::UnexpectedField => "unexpected_field",
            ErrorKind::DuplicateValue => "duplicate_value",
            ErrorKind::RangeViolation => "range_violation",
            ErrorKind::CrossFieldViolation => "cross_field_violation",
            ErrorKind::FieldValidation => "field_validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

impl Severity {
    fn is_default(&self) -> bool {
        *self == Severity::Error
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    pub field: String,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Severity::is_default")]
    pub severity: Severity,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            row_index: None,
            field: field.into(),
            kind,
            message: message.into(),
            value: None,
            expected: None,
            severity: Severity::Error,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_row(mut self, row_index: usize) -> Self {
        self.row_index = Some(row_index);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(row) = self.row_index {
            write!(f, "row {row}: ")?;
        }
        write!(f, "{} [{}] {}", self.field, self.kind, self.message)
    }
}

/// Outcome of comparing uploaded headers with the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderValidation {
    pub missing: Vec<ValidationError>,
    pub unexpected: Vec<ValidationError>,
    /// For each uploaded column, the schema field it feeds (if any).
    #[serde(skip)]
    pub column_fields: Vec<Option<String>>,
}

impl HeaderValidation {
    /// Missing fields stop the batch before any row is read.
    pub fn is_fatal(&self) -> bool {
        !self.missing.is_empty()
    }
}

pub fn validate_headers(headers: &[String], schema: &Schema) -> HeaderValidation {
    let mut column_fields: Vec<Option<String>> = vec![None; headers.len()];
    let mut missing = Vec::new();

    for field in &schema.fields {
        let position = (0..headers.len())
            .find(|&idx| column_fields[idx].is_none() && field.matches_header(&headers[idx]));
        match position {
            Some(idx) => column_fields[idx] = Some(field.name.clone()),
            None => missing.push(
                ValidationError::new(
                    &field.name,
                    ErrorKind::MissingField,
                    format!("Column '{}' is missing from the upload", field.name),
                )
                .with_expected(field.display_name.clone()),
            ),
        }
    }

    let unexpected = headers
        .iter()
        .zip(&column_fields)
        .filter(|(_, mapped)| mapped.is_none())
        .map(|(header, _)| {
            ValidationError::new(
                header.clone(),
                ErrorKind::UnexpectedField,
                format!("Column '{header}' is not part of the schema and will be ignored"),
            )
            .with_severity(Severity::Warning)
        })
        .collect();

    HeaderValidation {
        missing,
        unexpected,
        column_fields,
    }
}

/// Validates records against one schema. Field patterns are compiled once.
pub struct RowValidator<'a> {
    schema: &'a Schema,
    patterns: Vec<Option<Regex>>,
    config: ValidationConfig,
}

impl<'a> RowValidator<'a> {
    pub fn new(schema: &'a Schema, config: &ValidationConfig) -> Result<Self> {
        let patterns = schema
            .fields
            .iter()
            .map(|field| {
                field
                    .constraints
                    .pattern
                    .as_deref()
                    .map(|pattern| {
                        Regex::new(pattern)
                            .with_context(|| format!("Compiling pattern for field '{}'", field.name))
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            schema,
            patterns,
            config: config.clone(),
        })
    }

    pub fn schema(&self) -> &Schema {
        self.schema
    }

    pub fn validate(&self, record: &Record) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (field, pattern) in self.schema.fields.iter().zip(&self.patterns) {
            let text = record.get(&field.name).and_then(|value| value.as_text());
            let Some(text) = text else {
                if field.required {
                    errors.push(ValidationError::new(
                        &field.name,
                        ErrorKind::RequiredField,
                        format!("{} is required", field.display_name),
                    ));
                }
                continue;
            };
            self.check_field(field, pattern.as_ref(), &text, &mut errors);
        }
        errors
    }

    fn check_field(
        &self,
        field: &Field,
        pattern: Option<&Regex>,
        text: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let error = |kind: ErrorKind, message: String| {
            ValidationError::new(&field.name, kind, message).with_value(text)
        };
        let constraints = &field.constraints;

        let format = self
            .config
            .honor_field_format
            .then_some(constraints.format.as_deref())
            .flatten();
        if !conforms(text, field.data_type, format) {
            let expected = match format {
                Some(format) => format!("{} ({format})", field.data_type),
                None => field.data_type.to_string(),
            };
            errors.push(
                error(
                    ErrorKind::InvalidDataType,
                    format!("{} must be a valid {}", field.display_name, field.data_type),
                )
                .with_expected(expected),
            );
        }

        if field.data_type.is_textual() {
            let length = text.chars().count();
            if let Some(min) = constraints.min_length
                && length < min
            {
                errors.push(
                    error(
                        ErrorKind::MinLength,
                        format!("{} must be at least {min} characters", field.display_name),
                    )
                    .with_expected(min.to_string()),
                );
            }
            if let Some(max) = constraints.max_length
                && length > max
            {
                errors.push(
                    error(
                        ErrorKind::MaxLength,
                        format!("{} must be at most {max} characters", field.display_name),
                    )
                    .with_expected(max.to_string()),
                );
            }
        }

        if field.data_type == FieldType::Number
            && let Some(number) = parse_number(text)
        {
            if let Some(min) = constraints.min_value
                && number < min
            {
                errors.push(
                    error(
                        ErrorKind::MinValue,
                        format!("{} must be at least {min}", field.display_name),
                    )
                    .with_expected(min.to_string()),
                );
            }
            if let Some(max) = constraints.max_value
                && number > max
            {
                errors.push(
                    error(
                        ErrorKind::MaxValue,
                        format!("{} must be at most {max}", field.display_name),
                    )
                    .with_expected(max.to_string()),
                );
            }
        }

        if let Some(regex) = pattern
            && !regex.is_match(text)
        {
            errors.push(
                error(
                    ErrorKind::PatternMismatch,
                    format!("{} does not match the required pattern", field.display_name),
                )
                .with_expected(regex.as_str().to_string()),
            );
        }

        if !constraints.options.is_empty() && !constraints.options.iter().any(|option| option == text) {
            errors.push(
                error(
                    ErrorKind::InvalidOption,
                    format!("{} must be one of the allowed options", field.display_name),
                )
                .with_expected(constraints.options.iter().join(", ")),
            );
        }
    }
}
