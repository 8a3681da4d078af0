//! Dataset schema model and YAML persistence.
//!
//! A [`Schema`] belongs to one dataset and owns an ordered list of [`Field`]s.
//! Field names are the machine keys used in records and must be unique; the
//! `position` of each field defines column order. Schemas are stored as YAML
//! so an administrator can review and edit an inferred candidate before
//! accepting it.

use std::{
    collections::HashSet,
    fmt,
    fs::File,
    io::BufReader,
    path::Path,
    str::FromStr,
};

use anyhow::{Context, Result, anyhow, ensure};
use heck::ToTitleCase;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::value::{DATE_FORMATS, DATETIME_FORMATS, RFC3339_LABEL, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    DateTime,
    Email,
    Url,
    Uuid,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Uuid => "uuid",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "string", "number", "boolean", "date", "datetime", "email", "url", "uuid",
        ]
    }

    /// Whether length constraints apply to values of this type.
    pub fn is_textual(&self) -> bool {
        !matches!(self, FieldType::Number | FieldType::Boolean)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(FieldType::String),
            "number" | "integer" | "int" | "float" | "decimal" => Ok(FieldType::Number),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            "datetime" | "date-time" | "timestamp" => Ok(FieldType::DateTime),
            "email" => Ok(FieldType::Email),
            "url" => Ok(FieldType::Url),
            "uuid" | "guid" => Ok(FieldType::Uuid),
            _ => Err(anyhow!(
                "Unknown field type '{value}'. Supported types: {}",
                FieldType::variants().join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "type")]
    pub data_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
    #[serde(default)]
    pub position: usize,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: FieldType) -> Self {
        let name = name.into();
        Self {
            display_name: name.to_title_case(),
            name,
            data_type,
            required: false,
            unique: false,
            default_value: None,
            constraints: Constraints::default(),
            position: 0,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// True when an uploaded header refers to this field.
    pub fn matches_header(&self, header: &str) -> bool {
        let trimmed = header.trim();
        trimmed == self.name
            || (!self.display_name.is_empty() && trimmed == self.display_name)
            || sanitize_field_name(trimmed).as_deref() == Some(self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub dataset: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<Field>,
}

impl Schema {
    /// Builds a schema, normalizing field order and display names and checking
    /// the schema invariants.
    pub fn new(dataset: impl Into<String>, name: impl Into<String>, fields: Vec<Field>) -> Result<Self> {
        let mut schema = Schema {
            dataset: dataset.into(),
            name: name.into(),
            description: None,
            fields,
        };
        schema.normalize();
        schema.ensure_valid()?;
        Ok(schema)
    }

    /// Sorts fields by position, renumbering when positions were omitted or
    /// repeated, and fills empty display names from the field name.
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        let distinct = self.fields.iter().all(|field| seen.insert(field.position));
        if distinct {
            self.fields.sort_by_key(|field| field.position);
        }
        for (idx, field) in self.fields.iter_mut().enumerate() {
            field.position = idx;
            if field.display_name.trim().is_empty() {
                field.display_name = field.name.to_title_case();
            }
        }
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(!self.fields.is_empty(), "Schema '{}' defines no fields", self.name);
        let mut names = HashSet::new();
        for field in &self.fields {
            ensure!(!field.name.trim().is_empty(), "Field names cannot be empty");
            ensure!(
                names.insert(field.name.as_str()),
                "Duplicate field name '{}' in schema '{}'",
                field.name,
                self.name
            );
            let constraints = &field.constraints;
            if let (Some(min), Some(max)) = (constraints.min_length, constraints.max_length) {
                ensure!(
                    min <= max,
                    "Field '{}' has min_length {min} greater than max_length {max}",
                    field.name
                );
            }
            if let (Some(min), Some(max)) = (constraints.min_value, constraints.max_value) {
                ensure!(
                    min <= max,
                    "Field '{}' has min_value {min} greater than max_value {max}",
                    field.name
                );
            }
            if let Some(pattern) = &constraints.pattern {
                Regex::new(pattern)
                    .with_context(|| format!("Field '{}' has an invalid pattern", field.name))?;
            }
            if let Some(format) = &constraints.format {
                ensure!(
                    is_known_format(field.data_type, format),
                    "Field '{}' uses unknown {} format '{format}'",
                    field.name,
                    field.data_type
                );
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|field| field.name.clone()).collect()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let mut schema: Schema =
            serde_yaml::from_reader(BufReader::new(file)).context("Parsing schema YAML")?;
        schema.normalize();
        schema
            .ensure_valid()
            .with_context(|| format!("Validating schema from {path:?}"))?;
        Ok(schema)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing schema YAML")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing schema to YAML string")
    }
}

fn is_known_format(data_type: FieldType, format: &str) -> bool {
    match data_type {
        FieldType::Date => DATE_FORMATS.iter().any(|(label, _)| *label == format),
        FieldType::DateTime => {
            format == RFC3339_LABEL || DATETIME_FORMATS.iter().any(|(label, _)| *label == format)
        }
        _ => true,
    }
}

/// Derives a machine field name from a column header.
///
/// Lower-cases, collapses every run of characters outside `[a-z0-9_]` into a
/// single underscore and trims underscores from both ends. Returns `None` when
/// nothing is left.
pub fn sanitize_field_name(header: &str) -> Option<String> {
    let lowered = header.to_lowercase();
    let mut output = String::with_capacity(lowered.len());
    let mut in_run = false;
    for ch in lowered.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            output.push(ch);
            in_run = false;
        } else if !in_run {
            output.push('_');
            in_run = true;
        }
    }
    let trimmed = output.trim_matches('_');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
