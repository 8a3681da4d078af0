//! Submissions: the lifecycle of one uploaded file and the orchestrator that
//! turns its rows into staging rows.
//!
//! [`validate_submission`] is pure: headers and rows in, a
//! [`SubmissionOutcome`] out. [`submit`] wraps it with file reading,
//! fingerprinting and persistence of the submission and its staging rows.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::PipelineConfig,
    error::{StoreError, TransitionError},
    io_utils::{self, Fingerprint, ReadOptions},
    rules::{BusinessRule, RuleEvaluator},
    schema::Schema,
    staging::{StagingRow, StagingStatus},
    stats::{FieldStats, StatsAccumulator},
    store::{RuleStore, SchemaStore, StagingStore, Store, SubmissionStore},
    validator::{ErrorKind, HeaderValidation, RowValidator, validate_headers},
    value::{Record, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Applied,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::UnderReview => "under_review",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::Applied => "applied",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Applied | SubmissionStatus::Rejected)
    }

    /// The next status if `to` is reachable in one step.
    pub fn transition(self, to: SubmissionStatus) -> Result<SubmissionStatus, TransitionError> {
        use SubmissionStatus::*;
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self));
        }
        match (self, to) {
            (Pending, UnderReview)
            | (UnderReview, Approved)
            | (UnderReview, Rejected)
            | (Approved, Applied) => Ok(to),
            _ => Err(TransitionError::Invalid { from: self, to }),
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(SubmissionStatus::Pending),
            "under_review" => Ok(SubmissionStatus::UnderReview),
            "approved" => Ok(SubmissionStatus::Approved),
            "rejected" => Ok(SubmissionStatus::Rejected),
            "applied" => Ok(SubmissionStatus::Applied),
            other => Err(anyhow!("Unknown submission status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

impl FileReference {
    pub fn new(path: &Path, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.display().to_string(),
            size: fingerprint.size,
            sha256: fingerprint.sha256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub warning_rows: usize,
    pub is_valid: bool,
    pub error_counts: BTreeMap<ErrorKind, usize>,
    pub field_stats: BTreeMap<String, FieldStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unexpected_fields: Vec<String>,
}

impl ValidationSummary {
    pub fn new(
        rows: &[StagingRow],
        field_stats: BTreeMap<String, FieldStats>,
        unexpected_fields: Vec<String>,
    ) -> Self {
        let mut summary = Self {
            field_stats,
            unexpected_fields,
            ..Self::default()
        };
        summary.recount(rows);
        summary
    }

    /// Recomputes every counter and statistic from the current staging rows.
    pub fn refresh(&mut self, schema: &Schema, rows: &[StagingRow]) {
        let mut stats = StatsAccumulator::new(schema);
        for row in rows {
            stats.ingest(&row.record);
        }
        self.field_stats = stats.finish(rows.iter().map(|row| &row.record));
        self.recount(rows);
    }

    fn recount(&mut self, rows: &[StagingRow]) {
        self.total_rows = rows.len();
        self.valid_rows = 0;
        self.invalid_rows = 0;
        self.warning_rows = 0;
        self.error_counts.clear();
        for row in rows {
            match row.status {
                StagingStatus::Valid => self.valid_rows += 1,
                StagingStatus::Invalid => self.invalid_rows += 1,
                StagingStatus::Warning => self.warning_rows += 1,
            }
            for error in &row.errors {
                *self.error_counts.entry(error.kind).or_default() += 1;
            }
        }
        self.is_valid = self.invalid_rows == 0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub dataset: String,
    pub submitter: String,
    pub file: FileReference,
    pub row_count: usize,
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_summary: Option<ValidationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(
        dataset: impl Into<String>,
        submitter: impl Into<String>,
        file: FileReference,
        summary: ValidationSummary,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            dataset: dataset.into(),
            submitter: submitter.into(),
            file,
            row_count: summary.total_rows,
            status: SubmissionStatus::Pending,
            validation_summary: Some(summary),
            admin_notes: None,
            reviewed_by: None,
            reviewed_at: None,
            submitted_at: Utc::now(),
            applied_at: None,
        }
    }

    pub fn transition(&mut self, to: SubmissionStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition(to)?;
        Ok(())
    }
}

/// Staging rows plus their summary for a batch that passed header validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBatch {
    pub summary: ValidationSummary,
    pub staging_rows: Vec<StagingRow>,
    pub headers: HeaderValidation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Required columns are missing; no rows were staged.
    Rejected(HeaderValidation),
    Validated(ValidatedBatch),
}

/// Builds the record for one uploaded row. Columns outside the schema are
/// dropped; empty cells take the field's default when it has one.
pub fn build_record(column_fields: &[Option<String>], row: &[String], schema: &Schema) -> Record {
    let mut record = Record::new();
    for (idx, field) in column_fields.iter().enumerate() {
        if let Some(field) = field {
            let cell = row.get(idx).map(String::as_str).unwrap_or("");
            record.insert(field.clone(), Value::from_cell(cell));
        }
    }
    conform_record(record, schema)
}

/// Restricts a record to the schema's fields, filling defaults for empty ones.
pub fn conform_record(mut record: Record, schema: &Schema) -> Record {
    record.retain(|name, _| schema.field(name).is_some());
    for field in &schema.fields {
        let slot = record.entry(field.name.clone()).or_default();
        if slot.is_empty()
            && let Some(default) = &field.default_value
        {
            *slot = default.clone();
        }
    }
    record
}

pub fn validate_submission(
    headers: &[String],
    rows: &[Vec<String>],
    schema: &Schema,
    rules: &[BusinessRule],
    config: &PipelineConfig,
) -> Result<SubmissionOutcome> {
    let header_check = validate_headers(headers, schema);
    if header_check.is_fatal() {
        info!(
            "Rejecting upload for '{}': {} required column(s) missing",
            schema.dataset,
            header_check.missing.len()
        );
        return Ok(SubmissionOutcome::Rejected(header_check));
    }

    let validator = RowValidator::new(schema, &config.validation)
        .with_context(|| format!("Preparing validator for '{}'", schema.dataset))?;
    let mut stats = StatsAccumulator::new(schema);
    let mut records = Vec::with_capacity(rows.len());
    let mut row_errors = Vec::with_capacity(rows.len());
    for row in rows {
        let record = build_record(&header_check.column_fields, row, schema);
        row_errors.push(validator.validate(&record));
        stats.ingest(&record);
        records.push(record);
    }
    debug!("Row validation finished for {} row(s)", records.len());

    let evaluator = RuleEvaluator::new(rules, Some(schema), &config.rules);
    let mut findings = evaluator.evaluate(&records);
    let field_stats = stats.finish(&records);

    let staging_rows = records
        .into_iter()
        .zip(row_errors)
        .enumerate()
        .map(|(idx, (record, mut errors))| {
            if let Some(rule_errors) = findings.remove(&idx) {
                errors.extend(rule_errors);
            }
            StagingRow::new(idx, record, errors)
        })
        .collect::<Vec<_>>();

    let unexpected = header_check
        .unexpected
        .iter()
        .map(|error| error.field.clone())
        .collect();
    let summary = ValidationSummary::new(&staging_rows, field_stats, unexpected);
    info!(
        "Validated {} row(s) for '{}': {} valid, {} invalid, {} warning",
        summary.total_rows,
        schema.dataset,
        summary.valid_rows,
        summary.invalid_rows,
        summary.warning_rows
    );
    Ok(SubmissionOutcome::Validated(ValidatedBatch {
        summary,
        staging_rows,
        headers: header_check,
    }))
}

/// Reads the whole file first, so a malformed row aborts before validation.
pub fn validate_file(
    path: &Path,
    schema: &Schema,
    rules: &[BusinessRule],
    options: ReadOptions,
    config: &PipelineConfig,
) -> Result<SubmissionOutcome> {
    let table = io_utils::read_table(path, options, None)?;
    validate_submission(&table.headers, &table.rows, schema, rules, config)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Rejected(HeaderValidation),
    Submitted(Submission),
}

/// Validates `path` against the dataset's schema and rules and records the
/// submission with its staging rows.
pub fn submit(
    store: &Store,
    dataset: &str,
    submitter: &str,
    path: &Path,
    options: ReadOptions,
    config: &PipelineConfig,
) -> Result<SubmitOutcome> {
    let (schema, rules) = store.read(|state| (state.schema(dataset), state.active_rules(dataset)))?;
    let schema = schema.ok_or_else(|| anyhow!("Dataset '{dataset}' has no accepted schema"))?;

    // The recorded digest must describe the bytes that were validated.
    let (table, fingerprint) = io_utils::read_table_with_fingerprint(path, options)?;
    let outcome = validate_submission(&table.headers, &table.rows, &schema, &rules, config)
        .with_context(|| format!("Validating {path:?} for '{dataset}'"))?;
    let batch = match outcome {
        SubmissionOutcome::Rejected(headers) => return Ok(SubmitOutcome::Rejected(headers)),
        SubmissionOutcome::Validated(batch) => batch,
    };

    let file = FileReference::new(path, fingerprint);
    let submission = Submission::new(dataset, submitter, file, batch.summary);
    let record = submission.clone();
    store.transaction(|state| -> Result<(), StoreError> {
        state.insert_submission(record)?;
        state.insert_staging_rows(submission.id, batch.staging_rows)
    })?;
    info!(
        "Recorded submission {} for '{}' ({} row(s))",
        submission.id, dataset, submission.row_count
    );
    Ok(SubmitOutcome::Submitted(submission))
}
