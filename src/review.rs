//! Admin decisions on submissions and live edits of staging rows.

use chrono::Utc;
use log::{debug, info};
use uuid::Uuid;

use crate::{
    config::{PipelineConfig, PromotionOptions},
    error::{ReviewError, StoreError},
    promotion::{self, PromotionReport},
    rules::RuleEvaluator,
    staging::StagingRow,
    store::{RuleStore, SchemaStore, StagingStore, Store, StoreState, SubmissionStore},
    submission::{Submission, SubmissionStatus, ValidationSummary, conform_record},
    validator::RowValidator,
    value::Record,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    pub submission: Submission,
    pub promotion: PromotionReport,
}

pub fn start_review(store: &Store, submission_id: Uuid) -> Result<Submission, ReviewError> {
    store.transaction(|state| -> Result<Submission, ReviewError> {
        let mut submission = state.submission(submission_id)?;
        submission.transition(SubmissionStatus::UnderReview)?;
        state.update_submission(submission.clone())?;
        Ok(submission)
    })
}

/// Approves a submission and then promotes it. Promotion runs in its own
/// transaction; if it fails the submission stays approved and can be promoted
/// again later.
pub fn approve(
    store: &Store,
    submission_id: Uuid,
    reviewer: &str,
    notes: Option<String>,
    options: &PromotionOptions,
) -> Result<Approval, ReviewError> {
    store.transaction(|state| {
        decide(state, submission_id, SubmissionStatus::Approved, reviewer, notes)
    })?;
    info!("Submission {submission_id} approved by {reviewer}");
    let promotion = promotion::promote(store, submission_id, options)?;
    let submission = store.read(|state| state.submission(submission_id))??;
    Ok(Approval {
        submission,
        promotion,
    })
}

pub fn reject(
    store: &Store,
    submission_id: Uuid,
    reviewer: &str,
    notes: Option<String>,
) -> Result<Submission, ReviewError> {
    let submission = store.transaction(|state| {
        decide(state, submission_id, SubmissionStatus::Rejected, reviewer, notes)
    })?;
    info!("Submission {submission_id} rejected by {reviewer}");
    Ok(submission)
}

/// Moves a submission to a decision state, passing through `under_review`
/// when it is still pending.
fn decide(
    state: &mut StoreState,
    submission_id: Uuid,
    decision: SubmissionStatus,
    reviewer: &str,
    notes: Option<String>,
) -> Result<Submission, ReviewError> {
    let mut submission = state.submission(submission_id)?;
    if submission.status == SubmissionStatus::Pending {
        submission.transition(SubmissionStatus::UnderReview)?;
    }
    submission.transition(decision)?;
    submission.reviewed_by = Some(reviewer.to_string());
    submission.reviewed_at = Some(Utc::now());
    if notes.is_some() {
        submission.admin_notes = notes;
    }
    state.update_submission(submission.clone())?;
    Ok(submission)
}

/// Replaces a staging row's record and re-validates the submission's rows.
///
/// Business rules run over the full row set with the edit substituted, and
/// every row whose outcome changed is written back together with the
/// refreshed submission summary.
pub fn edit_staging_row(
    store: &Store,
    row_id: Uuid,
    record: Record,
    config: &PipelineConfig,
) -> Result<StagingRow, ReviewError> {
    let row = store.transaction(|state| -> Result<StagingRow, ReviewError> {
        let row = state.staging_row(row_id)?;
        let mut submission = state.submission(row.submission_id)?;
        if submission.status == SubmissionStatus::Approved || submission.status.is_terminal() {
            return Err(ReviewError::Locked {
                id: submission.id,
                status: submission.status,
            });
        }
        let schema = state
            .schema(&submission.dataset)
            .ok_or_else(|| ReviewError::MissingSchema(submission.dataset.clone()))?;
        let rules = state.active_rules(&submission.dataset);

        let validator = RowValidator::new(&schema, &config.validation)?;
        let mut siblings = state.staging_rows(submission.id)?;
        let position = siblings
            .iter()
            .position(|sibling| sibling.id == row_id)
            .ok_or(StoreError::StagingRowNotFound(row_id))?;
        siblings[position].record = conform_record(record, &schema);

        // Rules span rows, so an edit can change the outcome of any sibling.
        let records = siblings
            .iter()
            .map(|sibling| sibling.record.clone())
            .collect::<Vec<_>>();
        let mut findings = RuleEvaluator::new(&rules, Some(&schema), &config.rules).evaluate(&records);
        for (idx, sibling) in siblings.into_iter().enumerate() {
            let mut errors = validator.validate(&sibling.record);
            errors.extend(findings.remove(&idx).unwrap_or_default());
            let mut revised = sibling.clone();
            revised.set_errors(errors);
            if idx == position || revised != sibling {
                if idx != position {
                    debug!(
                        "Staging row {} now {} after editing row {row_id}",
                        revised.row_index, revised.status
                    );
                }
                state.update_staging_row(revised)?;
            }
        }

        let rows = state.staging_rows(submission.id)?;
        submission
            .validation_summary
            .get_or_insert_with(ValidationSummary::default)
            .refresh(&schema, &rows);
        state.update_submission(submission)?;
        Ok(state.staging_row(row_id)?)
    })?;
    info!("Staging row {row_id} edited; now {}", row.status);
    Ok(row)
}
