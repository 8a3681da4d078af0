//! Persistence for datasets, schemas, rules, submissions and staging rows.
//!
//! Every store concern is a trait implemented by [`StoreState`], the plain
//! data behind a [`Store`]. [`Store::transaction`] runs a closure against a
//! working copy of the state while holding the lock and only swaps it in when
//! the closure succeeds, so a failed transaction leaves nothing behind.
//! File-backed stores additionally write the committed state to disk through a
//! temporary file and a rename. Several handles may share one file: each
//! transaction holds an exclusive lock on `<store>.lock` and reloads the file
//! before running, so commits from other processes are never overwritten.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::ErrorKind as IoErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Utc;
use fs2::FileExt;
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::StoreError,
    rules::BusinessRule,
    schema::Schema,
    staging::{StagingPage, StagingQuery, StagingRow, paginate},
    submission::Submission,
    value::Record,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub row_index: i64,
    pub record: Record,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub name: String,
    pub row_count: usize,
    #[serde(default)]
    pub rows: BTreeMap<i64, DatasetRow>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            row_count: 0,
            rows: BTreeMap::new(),
        }
    }
}

pub trait RowStore {
    fn max_row_index(&self, dataset: &str) -> Result<Option<i64>, StoreError>;
    /// Inserts new rows; an occupied index is a conflict.
    fn insert_rows(&mut self, dataset: &str, rows: Vec<(i64, Record)>) -> Result<(), StoreError>;
    fn update_row_count(&mut self, dataset: &str) -> Result<usize, StoreError>;
    fn dataset_rows(&self, dataset: &str) -> Result<Vec<DatasetRow>, StoreError>;
}

pub trait SchemaStore {
    fn schema(&self, dataset: &str) -> Option<Schema>;
    /// Stores the schema, creating the dataset when it does not exist yet.
    fn put_schema(&mut self, schema: Schema);
}

pub trait RuleStore {
    fn active_rules(&self, dataset: &str) -> Vec<BusinessRule>;
    fn rules(&self, dataset: &str) -> Vec<BusinessRule>;
    fn put_rule(&mut self, rule: BusinessRule);
}

pub trait SubmissionStore {
    fn insert_submission(&mut self, submission: Submission) -> Result<(), StoreError>;
    fn submission(&self, id: Uuid) -> Result<Submission, StoreError>;
    fn update_submission(&mut self, submission: Submission) -> Result<(), StoreError>;
    fn submissions(&self, dataset: Option<&str>) -> Vec<Submission>;
}

pub trait StagingStore {
    fn insert_staging_rows(
        &mut self,
        submission_id: Uuid,
        rows: Vec<StagingRow>,
    ) -> Result<(), StoreError>;
    fn staging_rows(&self, submission_id: Uuid) -> Result<Vec<StagingRow>, StoreError>;
    fn staging_page(
        &self,
        submission_id: Uuid,
        query: &StagingQuery,
    ) -> Result<StagingPage, StoreError>;
    fn staging_row(&self, row_id: Uuid) -> Result<StagingRow, StoreError>;
    fn update_staging_row(&mut self, row: StagingRow) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreState {
    pub datasets: BTreeMap<String, Dataset>,
    pub schemas: BTreeMap<String, Schema>,
    pub rules: Vec<BusinessRule>,
    pub submissions: BTreeMap<Uuid, Submission>,
    pub staging: BTreeMap<Uuid, Vec<StagingRow>>,
}

impl StoreState {
    fn dataset(&self, name: &str) -> Result<&Dataset, StoreError> {
        self.datasets
            .get(name)
            .ok_or_else(|| StoreError::DatasetNotFound(name.to_string()))
    }

    fn dataset_mut(&mut self, name: &str) -> Result<&mut Dataset, StoreError> {
        self.datasets
            .get_mut(name)
            .ok_or_else(|| StoreError::DatasetNotFound(name.to_string()))
    }
}

impl RowStore for StoreState {
    fn max_row_index(&self, dataset: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.dataset(dataset)?.rows.keys().next_back().copied())
    }

    fn insert_rows(&mut self, dataset: &str, rows: Vec<(i64, Record)>) -> Result<(), StoreError> {
        let target = self.dataset_mut(dataset)?;
        for (row_index, record) in rows {
            if target.rows.contains_key(&row_index) {
                return Err(StoreError::RowConflict {
                    dataset: dataset.to_string(),
                    index: row_index,
                });
            }
            target.rows.insert(
                row_index,
                DatasetRow {
                    row_index,
                    record,
                    version: 1,
                },
            );
        }
        Ok(())
    }

    fn update_row_count(&mut self, dataset: &str) -> Result<usize, StoreError> {
        let target = self.dataset_mut(dataset)?;
        target.row_count = target.rows.len();
        Ok(target.row_count)
    }

    fn dataset_rows(&self, dataset: &str) -> Result<Vec<DatasetRow>, StoreError> {
        Ok(self.dataset(dataset)?.rows.values().cloned().collect())
    }
}

impl SchemaStore for StoreState {
    fn schema(&self, dataset: &str) -> Option<Schema> {
        self.schemas.get(dataset).cloned()
    }

    fn put_schema(&mut self, schema: Schema) {
        self.datasets
            .entry(schema.dataset.clone())
            .or_insert_with(|| Dataset::new(schema.dataset.clone()));
        self.schemas.insert(schema.dataset.clone(), schema);
    }
}

impl RuleStore for StoreState {
    fn active_rules(&self, dataset: &str) -> Vec<BusinessRule> {
        let mut rules = self
            .rules
            .iter()
            .filter(|rule| rule.active && rule.dataset == dataset)
            .cloned()
            .collect::<Vec<_>>();
        rules.sort_by_key(|rule| rule.priority);
        rules
    }

    fn rules(&self, dataset: &str) -> Vec<BusinessRule> {
        self.rules
            .iter()
            .filter(|rule| rule.dataset == dataset)
            .cloned()
            .collect()
    }

    fn put_rule(&mut self, rule: BusinessRule) {
        match self.rules.iter_mut().find(|existing| existing.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }
}

impl SubmissionStore for StoreState {
    fn insert_submission(&mut self, submission: Submission) -> Result<(), StoreError> {
        self.dataset(&submission.dataset)?;
        self.submissions.insert(submission.id, submission);
        Ok(())
    }

    fn submission(&self, id: Uuid) -> Result<Submission, StoreError> {
        self.submissions
            .get(&id)
            .cloned()
            .ok_or(StoreError::SubmissionNotFound(id))
    }

    fn update_submission(&mut self, submission: Submission) -> Result<(), StoreError> {
        let slot = self
            .submissions
            .get_mut(&submission.id)
            .ok_or(StoreError::SubmissionNotFound(submission.id))?;
        *slot = submission;
        Ok(())
    }

    fn submissions(&self, dataset: Option<&str>) -> Vec<Submission> {
        let mut submissions = self
            .submissions
            .values()
            .filter(|submission| dataset.is_none_or(|name| submission.dataset == name))
            .cloned()
            .collect::<Vec<_>>();
        submissions.sort_by_key(|submission| submission.submitted_at);
        submissions
    }
}

impl StagingStore for StoreState {
    fn insert_staging_rows(
        &mut self,
        submission_id: Uuid,
        mut rows: Vec<StagingRow>,
    ) -> Result<(), StoreError> {
        if !self.submissions.contains_key(&submission_id) {
            return Err(StoreError::SubmissionNotFound(submission_id));
        }
        for row in &mut rows {
            row.submission_id = submission_id;
        }
        rows.sort_by_key(|row| row.row_index);
        self.staging.insert(submission_id, rows);
        Ok(())
    }

    fn staging_rows(&self, submission_id: Uuid) -> Result<Vec<StagingRow>, StoreError> {
        self.staging
            .get(&submission_id)
            .cloned()
            .ok_or(StoreError::SubmissionNotFound(submission_id))
    }

    fn staging_page(
        &self,
        submission_id: Uuid,
        query: &StagingQuery,
    ) -> Result<StagingPage, StoreError> {
        let rows = self
            .staging
            .get(&submission_id)
            .ok_or(StoreError::SubmissionNotFound(submission_id))?;
        Ok(paginate(rows, query))
    }

    fn staging_row(&self, row_id: Uuid) -> Result<StagingRow, StoreError> {
        self.staging
            .values()
            .flatten()
            .find(|row| row.id == row_id)
            .cloned()
            .ok_or(StoreError::StagingRowNotFound(row_id))
    }

    fn update_staging_row(&mut self, mut row: StagingRow) -> Result<(), StoreError> {
        let slot = self
            .staging
            .get_mut(&row.submission_id)
            .and_then(|rows| rows.iter_mut().find(|existing| existing.id == row.id))
            .ok_or(StoreError::StagingRowNotFound(row.id))?;
        row.updated_at = Some(Utc::now());
        *slot = row;
        Ok(())
    }
}

/// Shared handle to the store state. Transactions are serialized by the lock.
#[derive(Debug)]
pub struct Store {
    state: Mutex<StoreState>,
    path: Option<PathBuf>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            path: None,
        }
    }

    /// Opens a JSON-backed store, starting empty when the file does not exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let state = load(path)?;
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Runs `f` on a working copy and commits it only if `f` succeeds.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut StoreState) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let _lock = match &self.path {
            Some(path) => {
                let lock = lock_file(path, true)?;
                *guard = load(path)?;
                Some(lock)
            }
            None => None,
        };
        let mut working = guard.clone();
        let value = f(&mut working)?;
        if let Some(path) = &self.path {
            persist(path, &working)?;
        }
        *guard = working;
        Ok(value)
    }

    pub fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&StoreState) -> T,
    {
        let mut guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(path) = &self.path {
            let _lock = lock_file(path, false)?;
            *guard = load(path)?;
        }
        Ok(f(&guard))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn load(path: &Path) -> Result<StoreState, StoreError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        }),
        Err(err) if err.kind() == IoErrorKind::NotFound => Ok(StoreState::default()),
        Err(source) => Err(io_error(path)(source)),
    }
}

/// Locks `<store>.lock` until the returned handle is dropped.
fn lock_file(path: &Path, exclusive: bool) -> Result<File, StoreError> {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let lock_path = PathBuf::from(lock_path);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(io_error(&lock_path))?;
    // Called through the trait so std's own `File::lock` is not picked up.
    let locked = if exclusive {
        FileExt::lock_exclusive(&file)
    } else {
        FileExt::lock_shared(&file)
    };
    locked.map_err(io_error(&lock_path))?;
    Ok(file)
}

fn persist(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(state).map_err(StoreError::Encode)?;
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    fs::write(&staging, bytes).map_err(io_error(path))?;
    fs::rename(&staging, path).map_err(io_error(path))?;
    debug!("Persisted store to {path:?}");
    Ok(())
}
