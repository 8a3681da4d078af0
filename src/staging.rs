//! Staging rows: uploaded rows held for review with their own outcome.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    filter::RowFilter,
    validator::{Severity, ValidationError},
    value::Record,
};

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingStatus {
    Valid,
    Invalid,
    Warning,
}

impl StagingStatus {
    /// Any error-severity finding makes a row invalid; warnings alone do not.
    pub fn from_errors(errors: &[ValidationError]) -> Self {
        if errors.iter().any(|error| error.severity == Severity::Error) {
            StagingStatus::Invalid
        } else if errors.is_empty() {
            StagingStatus::Valid
        } else {
            StagingStatus::Warning
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::Valid => "valid",
            StagingStatus::Invalid => "invalid",
            StagingStatus::Warning => "warning",
        }
    }
}

impl fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StagingStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "valid" => Ok(StagingStatus::Valid),
            "invalid" => Ok(StagingStatus::Invalid),
            "warning" => Ok(StagingStatus::Warning),
            other => Err(anyhow::anyhow!(
                "Unknown staging status '{other}'. Expected valid, invalid or warning"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRow {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub row_index: usize,
    pub record: Record,
    pub status: StagingStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StagingRow {
    /// Builds a row not yet attached to a submission; the staging store
    /// stamps `submission_id` on insert.
    pub fn new(row_index: usize, record: Record, errors: Vec<ValidationError>) -> Self {
        let mut row = Self {
            id: Uuid::new_v4(),
            submission_id: Uuid::nil(),
            row_index,
            record,
            status: StagingStatus::Valid,
            errors: Vec::new(),
            updated_at: None,
        };
        row.set_errors(errors);
        row
    }

    pub fn set_errors(&mut self, errors: Vec<ValidationError>) {
        let row_index = self.row_index;
        self.errors = errors
            .into_iter()
            .map(|error| error.with_row(row_index))
            .collect();
        self.status = StagingStatus::from_errors(&self.errors);
    }

    pub fn is_promotable(&self, include_warnings: bool) -> bool {
        match self.status {
            StagingStatus::Valid => true,
            StagingStatus::Warning => include_warnings,
            StagingStatus::Invalid => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StagingQuery {
    pub page: usize,
    pub per_page: usize,
    pub status: Option<StagingStatus>,
    pub filter: Option<RowFilter>,
}

impl Default for StagingQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
            status: None,
            filter: None,
        }
    }
}

impl StagingQuery {
    fn accepts(&self, row: &StagingRow) -> bool {
        self.status.is_none_or(|status| row.status == status)
            && self
                .filter
                .as_ref()
                .is_none_or(|filter| filter.matches(&row.record))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagingPage {
    pub rows: Vec<StagingRow>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

impl StagingPage {
    pub fn total_pages(&self) -> usize {
        if self.per_page == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page)
        }
    }
}

pub fn paginate<'a, I>(rows: I, query: &StagingQuery) -> StagingPage
where
    I: IntoIterator<Item = &'a StagingRow>,
{
    let per_page = query.per_page.max(1);
    let page = query.page.max(1);
    let matching = rows
        .into_iter()
        .filter(|row| query.accepts(row))
        .collect::<Vec<_>>();
    let total = matching.len();
    let rows = matching
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .cloned()
        .collect();
    StagingPage {
        rows,
        total,
        page,
        per_page,
    }
}
