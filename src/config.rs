//! Thresholds and policies passed explicitly into each pipeline stage.
//!
//! Every struct deserializes with defaults so a YAML file only needs the keys
//! it overrides:
//!
//! ```yaml
//! inference:
//!   required_threshold: 0.95
//! rules:
//!   fail_closed: true
//! ```

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Minimum share of non-empty values for a field to be marked required.
    pub required_threshold: f64,
    /// Minimum share of matching values for a non-string type to be chosen.
    pub type_threshold: f64,
    /// Confidence reported when a column falls back to `string`.
    pub fallback_confidence: f64,
    /// Confidence reported for a column without any non-empty value.
    pub empty_column_confidence: f64,
    /// Rows analyzed from the top of the input (0 = all rows).
    pub sample_rows: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            required_threshold: 0.9,
            type_threshold: 0.8,
            fallback_confidence: 0.7,
            empty_column_confidence: 0.1,
            sample_rows: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Parse date and date-time fields with their stored `format` constraint
    /// only, instead of the whole format catalogue.
    pub honor_field_format: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Flag every row when a rule's condition or pattern cannot be parsed.
    pub fail_closed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionOptions {
    /// Promote rows whose only findings are warning-severity rule hits.
    pub include_warning_rows: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inference: InferenceConfig,
    pub validation: ValidationConfig,
    pub rules: RuleConfig,
    pub promotion: PromotionOptions,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: PipelineConfig =
            serde_yaml::from_reader(BufReader::new(file)).context("Parsing config YAML")?;
        config.ensure_valid()?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn ensure_valid(&self) -> Result<()> {
        let inference = &self.inference;
        for (name, value) in [
            ("required_threshold", inference.required_threshold),
            ("type_threshold", inference.type_threshold),
            ("fallback_confidence", inference.fallback_confidence),
            ("empty_column_confidence", inference.empty_column_confidence),
        ] {
            ensure!(
                (0.0..=1.0).contains(&value),
                "inference.{name} must be between 0 and 1 (got {value})"
            );
        }
        Ok(())
    }
}
