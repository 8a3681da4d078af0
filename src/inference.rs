//! Candidate schema inference over a bounded sample of rows.
//!
//! The engine runs the column analyzer over every column of the sample and
//! assembles a [`CandidateSchema`]. A candidate is advisory: it only becomes a
//! dataset's schema once a reviewer calls [`CandidateSchema::accept`] (or
//! edits the YAML it produces and accepts that).

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Serialize;

use crate::{
    analyzer::{ColumnAccumulator, ColumnAnalysis},
    config::InferenceConfig,
    io_utils::{self, ReadOptions},
    schema::{Constraints, Field, FieldType, Schema, sanitize_field_name},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateField {
    pub field: Field,
    /// Original header text the field was derived from.
    pub header: String,
    pub confidence: f64,
    pub analysis: ColumnAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSchema {
    pub dataset: String,
    pub name: String,
    pub description: Option<String>,
    pub fields: Vec<CandidateField>,
    /// Mean of the per-field confidences.
    pub confidence: f64,
    pub sampled_rows: usize,
}

impl CandidateSchema {
    /// The schema a reviewer would get by accepting the candidate unchanged.
    pub fn to_schema(&self) -> Schema {
        let mut schema = Schema {
            dataset: self.dataset.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            fields: self.fields.iter().map(|candidate| candidate.field.clone()).collect(),
        };
        schema.normalize();
        schema
    }

    pub fn accept(self) -> Result<Schema> {
        let schema = self.to_schema();
        schema
            .ensure_valid()
            .with_context(|| format!("Accepting inferred schema for '{}'", self.dataset))?;
        Ok(schema)
    }
}

/// Field names for a header row: sanitized, placeholder-filled and made unique.
pub fn field_names_for_headers(headers: &[String]) -> Vec<String> {
    let mut used = HashSet::new();
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let base = sanitize_field_name(header).unwrap_or_else(|| format!("column_{}", idx + 1));
            let mut name = base.clone();
            let mut suffix = 2;
            while !used.insert(name.clone()) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            name
        })
        .collect()
}

pub fn infer_schema(
    headers: &[String],
    rows: &[Vec<String>],
    dataset_name: &str,
    config: &InferenceConfig,
) -> CandidateSchema {
    let sample = if config.sample_rows > 0 {
        &rows[..rows.len().min(config.sample_rows)]
    } else {
        rows
    };

    let mut accumulators = vec![ColumnAccumulator::new(); headers.len()];
    for row in sample {
        for (idx, accumulator) in accumulators.iter_mut().enumerate() {
            accumulator.update(row.get(idx).map(String::as_str).unwrap_or(""));
        }
    }

    let names = field_names_for_headers(headers);
    let fields = accumulators
        .into_iter()
        .zip(names)
        .zip(headers)
        .enumerate()
        .map(|(position, ((accumulator, name), header))| {
            let analysis = accumulator.finish(config);
            debug!(
                "Column '{}' inferred as {} (confidence {:.2}, required {:.2})",
                name, analysis.data_type, analysis.confidence, analysis.required_confidence
            );
            let display_name = match header.trim() {
                "" => name.clone(),
                trimmed => trimmed.to_string(),
            };
            let field = Field {
                name,
                display_name,
                data_type: analysis.data_type,
                required: analysis.required,
                unique: false,
                default_value: None,
                constraints: constraints_from(&analysis),
                position,
            };
            CandidateField {
                field,
                header: header.clone(),
                confidence: analysis.confidence,
                analysis,
            }
        })
        .collect::<Vec<_>>();

    let confidence = if fields.is_empty() {
        0.0
    } else {
        fields.iter().map(|field| field.confidence).sum::<f64>() / fields.len() as f64
    };

    CandidateSchema {
        dataset: dataset_name.to_string(),
        name: format!("{dataset_name} schema"),
        description: Some(format!("Inferred from {} sampled row(s)", sample.len())),
        fields,
        confidence,
        sampled_rows: sample.len(),
    }
}

fn constraints_from(analysis: &ColumnAnalysis) -> Constraints {
    let mut constraints = Constraints {
        format: analysis.format.clone(),
        ..Constraints::default()
    };
    match analysis.data_type {
        FieldType::Number => {
            if let Some(numeric) = analysis.numeric {
                constraints.min_value = Some(numeric.min);
                constraints.max_value = Some(numeric.max);
            }
        }
        FieldType::String => {
            if let Some(length) = analysis.length {
                constraints.min_length = Some(length.min);
                constraints.max_length = Some(length.max);
            }
        }
        _ => {}
    }
    constraints
}

/// Infers a candidate schema from the head of a delimited file.
pub fn infer_schema_from_path(
    path: &Path,
    dataset_name: &str,
    options: ReadOptions,
    config: &InferenceConfig,
) -> Result<CandidateSchema> {
    let limit = (config.sample_rows > 0).then_some(config.sample_rows);
    let table = io_utils::read_table(path, options, limit)
        .with_context(|| format!("Sampling {path:?} for inference"))?;
    let candidate = infer_schema(&table.headers, &table.rows, dataset_name, config);
    info!(
        "Inferred {} field(s) from {} row(s) of {:?} (confidence {:.2})",
        candidate.fields.len(),
        candidate.sampled_rows,
        path,
        candidate.confidence
    );
    Ok(candidate)
}
