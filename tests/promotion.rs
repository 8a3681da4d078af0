mod common;

use std::{io, path::PathBuf, sync::Arc, thread};

use common::{TestWorkspace, people_schema, store_with_schema, submit_csv};
use csv_intake::{
    config::PromotionOptions,
    error::{PromotionError, StoreError},
    promotion::{promote, promote_within},
    review,
    staging::{StagingPage, StagingQuery, StagingRow},
    store::{DatasetRow, RowStore, StagingStore, Store, StoreState, SubmissionStore},
    submission::{Submission, SubmissionStatus},
    value::{Record, Value},
};
use uuid::Uuid;

const MIXED: &str = "email,age,city\n\
a@x.com,30,Lisbon\n\
not-an-email,-5,Porto\n\
b@x.com,41,Faro\n";

fn approve_only(store: &Store, id: Uuid) {
    store
        .transaction(|state| -> Result<(), PromotionError> {
            let mut submission = state.submission(id)?;
            submission.transition(SubmissionStatus::UnderReview)?;
            submission.transition(SubmissionStatus::Approved)?;
            state.update_submission(submission)?;
            Ok(())
        })
        .expect("approve");
}

fn rows(store: &Store) -> Vec<DatasetRow> {
    store
        .read(|state| state.dataset_rows("people"))
        .expect("read")
        .expect("rows")
}

fn seed_rows(store: &Store, indices: &[i64]) {
    store
        .transaction(|state| -> Result<(), StoreError> {
            let rows = indices
                .iter()
                .map(|index| {
                    let mut record = Record::new();
                    record.insert("email".into(), Value::from("seed@x.com"));
                    (*index, record)
                })
                .collect();
            state.insert_rows("people", rows)?;
            state.update_row_count("people").map(|_| ())
        })
        .expect("seed rows");
}

#[test]
fn valid_rows_land_after_the_current_maximum() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    seed_rows(&store, &[0, 1, 2, 3, 4]);
    let submission = submit_csv(
        &workspace,
        &store,
        "people",
        "email,age,city\nc@x.com,1,\nd@x.com,2,\ne@x.com,3,\n",
    );
    approve_only(&store, submission.id);

    let report = promote(&store, submission.id, &PromotionOptions::default()).expect("promote");
    assert_eq!(report.promoted_rows, 3);
    assert_eq!(report.first_index, Some(5));
    assert_eq!(report.last_index, Some(7));
    assert_eq!(report.dataset_row_count, 8);

    let indices = rows(&store).iter().map(|row| row.row_index).collect::<Vec<_>>();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn invalid_rows_stay_in_staging_and_keep_relative_positions() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let submission = submit_csv(&workspace, &store, "people", MIXED);
    approve_only(&store, submission.id);

    let report = promote(&store, submission.id, &PromotionOptions::default()).expect("promote");
    assert_eq!(report.promoted_rows, 2);
    assert_eq!(report.skipped_rows, 1);

    let promoted = rows(&store);
    let indices = promoted.iter().map(|row| row.row_index).collect::<Vec<_>>();
    assert_eq!(indices, vec![0, 2]);
    assert!(promoted.iter().all(|row| row.version == 1));
    assert_eq!(promoted[1].record["city"], Value::from("Faro"));

    let submission = store
        .read(|state| state.submission(submission.id))
        .unwrap()
        .unwrap();
    assert_eq!(submission.status, SubmissionStatus::Applied);
    assert!(submission.applied_at.is_some());
}

#[test]
fn promotion_happens_exactly_once() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let submission = submit_csv(&workspace, &store, "people", MIXED);
    approve_only(&store, submission.id);

    promote(&store, submission.id, &PromotionOptions::default()).expect("first promotion");
    let second = promote(&store, submission.id, &PromotionOptions::default());
    assert!(matches!(second, Err(PromotionError::AlreadyApplied(id)) if id == submission.id));
    assert_eq!(rows(&store).len(), 2);
}

#[test]
fn concurrent_promotions_serialize() {
    let workspace = TestWorkspace::new();
    let store = Arc::new(store_with_schema(people_schema()));
    let submission = submit_csv(&workspace, &store, "people", MIXED);
    approve_only(&store, submission.id);

    let handles = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || promote(&store, submission.id, &PromotionOptions::default()))
        })
        .collect::<Vec<_>>();
    let results = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread"))
        .collect::<Vec<_>>();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|result| result.as_ref().err())
            .all(|err| matches!(err, PromotionError::AlreadyApplied(_)))
    );
    assert_eq!(rows(&store).len(), 2);
}

#[test]
fn only_approved_submissions_promote() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let submission = submit_csv(&workspace, &store, "people", MIXED);

    let result = promote(&store, submission.id, &PromotionOptions::default());
    assert!(matches!(
        result,
        Err(PromotionError::NotApproved {
            status: SubmissionStatus::Pending,
            ..
        })
    ));
    assert!(rows(&store).is_empty());
}

#[test]
fn conflicting_index_rolls_back_everything() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let submission = submit_csv(&workspace, &store, "people", MIXED);
    approve_only(&store, submission.id);

    // Inserting the first promoted row succeeds, the second collides.
    let result = store.transaction(|state| -> Result<_, PromotionError> {
        state
            .insert_rows("people", vec![(2, Record::new())])
            .map_err(PromotionError::from)?;
        promote_within(
            &mut ShiftedMax {
                inner: state,
                max: Some(-1),
            },
            submission.id,
            &PromotionOptions::default(),
        )
    });
    assert!(matches!(
        result,
        Err(PromotionError::Store(StoreError::RowConflict { index: 2, .. }))
    ));
    assert!(rows(&store).is_empty());
    let status = store
        .read(|state| state.submission(submission.id).map(|s| s.status))
        .unwrap()
        .unwrap();
    assert_eq!(status, SubmissionStatus::Approved);
}

#[test]
fn failure_after_insert_leaves_submission_approved_and_retryable() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let submission = submit_csv(&workspace, &store, "people", MIXED);
    approve_only(&store, submission.id);

    let result = store.transaction(|state| -> Result<_, PromotionError> {
        promote_within(
            &mut FailingRowCount { inner: state },
            submission.id,
            &PromotionOptions::default(),
        )
    });
    assert!(matches!(result, Err(PromotionError::Store(StoreError::Io { .. }))));
    assert!(rows(&store).is_empty());

    let report = promote(&store, submission.id, &PromotionOptions::default()).expect("retry");
    assert_eq!(report.promoted_rows, 2);
}

#[test]
fn warning_rows_promote_only_when_requested() {
    use csv_intake::{
        rules::{BusinessRule, RuleKind},
        store::RuleStore,
        validator::Severity,
    };

    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    store
        .transaction(|state| -> Result<(), StoreError> {
            state.put_rule(
                BusinessRule::new(
                    "people",
                    RuleKind::RangeCheck {
                        field: "age".into(),
                        min: None,
                        max: Some(100.0),
                    },
                    "unusual age",
                )
                .with_severity(Severity::Warning),
            );
            Ok(())
        })
        .unwrap();
    let csv = "email,age,city\na@x.com,30,\nb@x.com,130,\n";

    let first = submit_csv(&workspace, &store, "people", csv);
    review::approve(&store, first.id, "admin", None, &PromotionOptions::default()).expect("approve");
    assert_eq!(rows(&store).len(), 1);

    let second = submit_csv(&workspace, &store, "people", csv);
    let approval = review::approve(
        &store,
        second.id,
        "admin",
        None,
        &PromotionOptions {
            include_warning_rows: true,
        },
    )
    .expect("approve");
    assert_eq!(approval.promotion.promoted_rows, 2);
    assert_eq!(approval.promotion.first_index, Some(1));
    assert_eq!(rows(&store).len(), 3);
}

/// Reports a fixed maximum index so promotion targets occupied slots.
struct ShiftedMax<'a> {
    inner: &'a mut StoreState,
    max: Option<i64>,
}

/// Fails when the row count is refreshed, after rows were inserted.
struct FailingRowCount<'a> {
    inner: &'a mut StoreState,
}

macro_rules! delegate_staging_and_submissions {
    ($wrapper:ident) => {
        impl StagingStore for $wrapper<'_> {
            fn insert_staging_rows(
                &mut self,
                submission_id: Uuid,
                rows: Vec<StagingRow>,
            ) -> Result<(), StoreError> {
                self.inner.insert_staging_rows(submission_id, rows)
            }
            fn staging_rows(&self, submission_id: Uuid) -> Result<Vec<StagingRow>, StoreError> {
                self.inner.staging_rows(submission_id)
            }
            fn staging_page(
                &self,
                submission_id: Uuid,
                query: &StagingQuery,
            ) -> Result<StagingPage, StoreError> {
                self.inner.staging_page(submission_id, query)
            }
            fn staging_row(&self, row_id: Uuid) -> Result<StagingRow, StoreError> {
                self.inner.staging_row(row_id)
            }
            fn update_staging_row(&mut self, row: StagingRow) -> Result<(), StoreError> {
                self.inner.update_staging_row(row)
            }
        }

        impl SubmissionStore for $wrapper<'_> {
            fn insert_submission(&mut self, submission: Submission) -> Result<(), StoreError> {
                self.inner.insert_submission(submission)
            }
            fn submission(&self, id: Uuid) -> Result<Submission, StoreError> {
                self.inner.submission(id)
            }
            fn update_submission(&mut self, submission: Submission) -> Result<(), StoreError> {
                self.inner.update_submission(submission)
            }
            fn submissions(&self, dataset: Option<&str>) -> Vec<Submission> {
                self.inner.submissions(dataset)
            }
        }
    };
}

delegate_staging_and_submissions!(ShiftedMax);
delegate_staging_and_submissions!(FailingRowCount);

impl RowStore for ShiftedMax<'_> {
    fn max_row_index(&self, _dataset: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.max)
    }
    fn insert_rows(&mut self, dataset: &str, rows: Vec<(i64, Record)>) -> Result<(), StoreError> {
        self.inner.insert_rows(dataset, rows)
    }
    fn update_row_count(&mut self, dataset: &str) -> Result<usize, StoreError> {
        self.inner.update_row_count(dataset)
    }
    fn dataset_rows(&self, dataset: &str) -> Result<Vec<DatasetRow>, StoreError> {
        self.inner.dataset_rows(dataset)
    }
}

impl RowStore for FailingRowCount<'_> {
    fn max_row_index(&self, dataset: &str) -> Result<Option<i64>, StoreError> {
        self.inner.max_row_index(dataset)
    }
    fn insert_rows(&mut self, dataset: &str, rows: Vec<(i64, Record)>) -> Result<(), StoreError> {
        self.inner.insert_rows(dataset, rows)
    }
    fn update_row_count(&mut self, _dataset: &str) -> Result<usize, StoreError> {
        Err(StoreError::Io {
            path: PathBuf::from("people"),
            source: io::Error::other("disk full"),
        })
    }
    fn dataset_rows(&self, dataset: &str) -> Result<Vec<DatasetRow>, StoreError> {
        self.inner.dataset_rows(dataset)
    }
}
