//! Copies a submission's accepted staging rows into its dataset.
//!
//! New rows are appended after the dataset's current highest index:
//! staging row `i` lands at `max + 1 + i` (with `max = -1` for an empty
//! dataset), so promoted rows keep their upload order and relative gaps where
//! invalid rows were left behind.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::PromotionOptions,
    error::PromotionError,
    store::{RowStore, StagingStore, Store, SubmissionStore},
    submission::SubmissionStatus,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionReport {
    pub submission_id: Uuid,
    pub dataset: String,
    pub promoted_rows: usize,
    pub skipped_rows: usize,
    pub first_index: Option<i64>,
    pub last_index: Option<i64>,
    pub dataset_row_count: usize,
    pub applied_at: DateTime<Utc>,
}

/// Promotes an approved submission in a single store transaction.
pub fn promote(
    store: &Store,
    submission_id: Uuid,
    options: &PromotionOptions,
) -> Result<PromotionReport, PromotionError> {
    let report = store.transaction(|state| promote_within(state, submission_id, options))?;
    info!(
        "Applied submission {} to '{}': {} row(s) promoted, {} left in staging",
        report.submission_id, report.dataset, report.promoted_rows, report.skipped_rows
    );
    Ok(report)
}

/// The promotion step against any store that provides the row, staging and
/// submission concerns. Callers own atomicity.
pub fn promote_within<S>(
    store: &mut S,
    submission_id: Uuid,
    options: &PromotionOptions,
) -> Result<PromotionReport, PromotionError>
where
    S: RowStore + StagingStore + SubmissionStore + ?Sized,
{
    let mut submission = store.submission(submission_id)?;
    match submission.status {
        SubmissionStatus::Approved => {}
        SubmissionStatus::Applied => return Err(PromotionError::AlreadyApplied(submission_id)),
        status => {
            return Err(PromotionError::NotApproved {
                id: submission_id,
                status,
            });
        }
    }

    let staged = store.staging_rows(submission_id)?;
    let base = store.max_row_index(&submission.dataset)?.unwrap_or(-1) + 1;
    let rows = staged
        .iter()
        .filter(|row| row.is_promotable(options.include_warning_rows))
        .map(|row| (base + row.row_index as i64, row.record.clone()))
        .collect::<Vec<_>>();
    let first_index = rows.first().map(|(index, _)| *index);
    let last_index = rows.last().map(|(index, _)| *index);
    let promoted_rows = rows.len();
    debug!(
        "Promoting {promoted_rows} of {} staging row(s) into '{}' from index {base}",
        staged.len(),
        submission.dataset
    );

    store.insert_rows(&submission.dataset, rows)?;
    let dataset_row_count = store.update_row_count(&submission.dataset)?;

    let applied_at = Utc::now();
    submission.transition(SubmissionStatus::Applied)?;
    submission.applied_at = Some(applied_at);
    let report = PromotionReport {
        submission_id,
        dataset: submission.dataset.clone(),
        promoted_rows,
        skipped_rows: staged.len() - promoted_rows,
        first_index,
        last_index,
        dataset_row_count,
        applied_at,
    };
    store.update_submission(submission)?;
    Ok(report)
}
