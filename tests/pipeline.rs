mod common;

use common::{TestWorkspace, people_schema, store_with_schema, submit_csv};
use csv_intake::{
    config::{InferenceConfig, PipelineConfig, PromotionOptions},
    error::{ReviewError, StoreError, TransitionError},
    inference::{infer_schema, infer_schema_from_path},
    io_utils::ReadOptions,
    review,
    rules::{BusinessRule, RuleKind},
    schema::FieldType,
    staging::{StagingQuery, StagingStatus},
    store::{RowStore, RuleStore, SchemaStore, StagingStore, Store, SubmissionStore},
    submission::{self, SubmissionOutcome, SubmissionStatus, SubmitOutcome, validate_submission},
    validator::ErrorKind,
    value::Value,
};
use sha2::{Digest, Sha256};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[test]
fn all_empty_column_is_an_optional_low_confidence_string() {
    let headers = strings(&["id", "notes"]);
    let rows = (0..20)
        .map(|idx| vec![idx.to_string(), String::new()])
        .collect::<Vec<_>>();
    let candidate = infer_schema(&headers, &rows, "t", &InferenceConfig::default());
    let notes = &candidate.fields[1];
    assert_eq!(notes.field.data_type, FieldType::String);
    assert_eq!(notes.confidence, 0.1);
    assert!(!notes.field.required);
}

#[test]
fn required_boundary_is_inclusive_at_ninety_percent() {
    let headers = strings(&["code"]);
    let mut rows = (0..9).map(|_| strings(&["x"])).collect::<Vec<_>>();
    rows.push(strings(&[""]));
    let candidate = infer_schema(&headers, &rows, "t", &InferenceConfig::default());
    assert!(candidate.fields[0].field.required);

    rows.push(strings(&[""]));
    let candidate = infer_schema(&headers, &rows, "t", &InferenceConfig::default());
    assert!(!candidate.fields[0].field.required);
}

#[test]
fn inferred_then_accepted_schema_validates_its_own_sample() {
    let workspace = TestWorkspace::new();
    let csv = "Email,Age,Joined,Active,Site\n\
a@x.com,31,2024-01-02,yes,https://a.example\n\
b@x.com,45,2024-02-03,no,https://b.example\n\
c@x.com,27,2024-03-04,yes,\n";
    let path = workspace.write("members.csv", csv);
    let schema = infer_schema_from_path(&path, "members", ReadOptions::default(), &InferenceConfig::default())
        .unwrap()
        .accept()
        .unwrap();
    let types = schema.fields.iter().map(|f| f.data_type).collect::<Vec<_>>();
    assert_eq!(
        types,
        vec![
            FieldType::Email,
            FieldType::Number,
            FieldType::Date,
            FieldType::Boolean,
            FieldType::Url
        ]
    );
    assert!(!schema.fields[4].required);

    let outcome = submission::validate_file(&path, &schema, &[], ReadOptions::default(), &PipelineConfig::default())
        .unwrap();
    let SubmissionOutcome::Validated(batch) = outcome else {
        panic!("expected staged rows");
    };
    assert!(batch.summary.is_valid);
    assert_eq!(batch.summary.valid_rows, 3);
}

#[test]
fn invalid_email_and_negative_age_mark_the_row_invalid() {
    let outcome = validate_submission(
        &strings(&["email", "age", "city"]),
        &[strings(&["not-an-email", "-5", ""])],
        &people_schema(),
        &[],
        &PipelineConfig::default(),
    )
    .unwrap();
    let SubmissionOutcome::Validated(batch) = outcome else {
        panic!("expected staged rows");
    };
    let row = &batch.staging_rows[0];
    assert_eq!(row.status, StagingStatus::Invalid);
    let errors = row
        .errors
        .iter()
        .map(|e| (e.field.as_str(), e.kind))
        .collect::<Vec<_>>();
    assert_eq!(
        errors,
        vec![("email", ErrorKind::InvalidDataType), ("age", ErrorKind::MinValue)]
    );
}

#[test]
fn unique_rule_flags_only_the_repeat() {
    let rule = BusinessRule::new(
        "people",
        RuleKind::Unique {
            field: "email".into(),
        },
        "email already submitted",
    );
    let outcome = validate_submission(
        &strings(&["email", "age", "city"]),
        &[strings(&["a@x.com", "1", ""]), strings(&["a@x.com", "2", ""])],
        &people_schema(),
        &[rule],
        &PipelineConfig::default(),
    )
    .unwrap();
    let SubmissionOutcome::Validated(batch) = outcome else {
        panic!("expected staged rows");
    };
    assert_eq!(batch.staging_rows[0].status, StagingStatus::Valid);
    assert_eq!(batch.staging_rows[1].status, StagingStatus::Invalid);
    assert_eq!(batch.staging_rows[1].errors[0].kind, ErrorKind::DuplicateValue);
    assert_eq!(batch.summary.error_counts[&ErrorKind::DuplicateValue], 1);
}

#[test]
fn malformed_row_aborts_the_whole_batch() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let path = workspace.write("bad.csv", "email,age,city\na@x.com,1,x\nb@x.com,2\n");
    let result = submission::submit(
        &store,
        "people",
        "tester",
        &path,
        ReadOptions::default(),
        &PipelineConfig::default(),
    );
    assert!(result.is_err());
    assert!(store.read(|state| state.submissions(None)).unwrap().is_empty());
}

#[test]
fn missing_columns_reject_without_recording_anything() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let path = workspace.write("partial.csv", "age,city\n1,x\n");
    let outcome = submission::submit(
        &store,
        "people",
        "tester",
        &path,
        ReadOptions::default(),
        &PipelineConfig::default(),
    )
    .unwrap();
    let SubmitOutcome::Rejected(headers) = outcome else {
        panic!("expected rejection");
    };
    assert_eq!(headers.missing[0].kind, ErrorKind::MissingField);
    assert!(store.read(|state| state.submissions(None)).unwrap().is_empty());
}

#[test]
fn submission_requires_an_accepted_schema() {
    let workspace = TestWorkspace::new();
    let store = Store::in_memory();
    let path = workspace.write("people.csv", "email\na@x.com\n");
    let err = submission::submit(
        &store,
        "people",
        "tester",
        &path,
        ReadOptions::default(),
        &PipelineConfig::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("no accepted schema"));
}

#[test]
fn submission_records_file_fingerprint_and_staging_rows() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let csv = "email,age,city\na@x.com,1,x\nbad,2,y\n";
    let submission = submit_csv(&workspace, &store, "people", csv);
    assert_eq!(submission.status, SubmissionStatus::Pending);
    assert_eq!(submission.row_count, 2);
    assert_eq!(submission.file.size, csv.len() as u64);
    assert_eq!(
        submission.file.sha256,
        format!("{:x}", Sha256::digest(csv.as_bytes()))
    );

    let page = store
        .read(|state| {
            state.staging_page(
                submission.id,
                &StagingQuery {
                    status: Some(StagingStatus::Invalid),
                    ..StagingQuery::default()
                },
            )
        })
        .unwrap()
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.rows[0].row_index, 1);
    assert_eq!(page.rows[0].submission_id, submission.id);
}

#[test]
fn approve_from_pending_promotes_and_records_the_reviewer() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let submission = submit_csv(&workspace, &store, "people", "email,age,city\na@x.com,1,x\n");

    let approval = review::approve(
        &store,
        submission.id,
        "dana",
        Some("looks good".into()),
        &PromotionOptions::default(),
    )
    .unwrap();
    assert_eq!(approval.submission.status, SubmissionStatus::Applied);
    assert_eq!(approval.submission.reviewed_by.as_deref(), Some("dana"));
    assert_eq!(approval.submission.admin_notes.as_deref(), Some("looks good"));
    assert!(approval.submission.reviewed_at.is_some());
    assert_eq!(approval.promotion.promoted_rows, 1);

    let count = store
        .read(|state| state.datasets["people"].row_count)
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn terminal_submissions_refuse_further_decisions() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    let submission = submit_csv(&workspace, &store, "people", "email,age,city\na@x.com,1,x\n");

    let started = review::start_review(&store, submission.id).unwrap();
    assert_eq!(started.status, SubmissionStatus::UnderReview);
    let rejected = review::reject(&store, submission.id, "dana", Some("wrong file".into())).unwrap();
    assert_eq!(rejected.status, SubmissionStatus::Rejected);

    let err = review::approve(&store, submission.id, "dana", None, &PromotionOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        ReviewError::Transition(TransitionError::Terminal(SubmissionStatus::Rejected))
    ));
    let err = review::start_review(&store, submission.id).unwrap_err();
    assert!(matches!(err, ReviewError::Transition(TransitionError::Terminal(_))));
}

#[test]
fn editing_a_staging_row_revalidates_it_and_refreshes_the_summary() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    store
        .transaction(|state| -> Result<(), StoreError> {
            state.put_rule(BusinessRule::new(
                "people",
                RuleKind::Unique {
                    field: "email".into(),
                },
                "email already submitted",
            ));
            Ok(())
        })
        .unwrap();
    let submission = submit_csv(
        &workspace,
        &store,
        "people",
        "email,age,city\na@x.com,1,x\nbad,-2,y\n",
    );
    let broken = store
        .read(|state| state.staging_rows(submission.id))
        .unwrap()
        .unwrap()
        .remove(1);
    assert_eq!(broken.status, StagingStatus::Invalid);

    // Fixing the type errors but duplicating row 0's email still fails the rule.
    let mut record = broken.record.clone();
    record.insert("email".into(), Value::from("a@x.com"));
    record.insert("age".into(), Value::from("3"));
    let edited = review::edit_staging_row(&store, broken.id, record, &PipelineConfig::default()).unwrap();
    assert_eq!(edited.status, StagingStatus::Invalid);
    assert_eq!(edited.errors.len(), 1);
    assert_eq!(edited.errors[0].kind, ErrorKind::DuplicateValue);
    assert_eq!(edited.errors[0].row_index, Some(1));

    let mut record = edited.record.clone();
    record.insert("email".into(), Value::from("b@x.com"));
    let edited = review::edit_staging_row(&store, broken.id, record, &PipelineConfig::default()).unwrap();
    assert_eq!(edited.status, StagingStatus::Valid);
    assert!(edited.updated_at.is_some());

    let summary = store
        .read(|state| state.submission(submission.id))
        .unwrap()
        .unwrap()
        .validation_summary
        .unwrap();
    assert_eq!(summary.valid_rows, 2);
    assert_eq!(summary.invalid_rows, 0);
    assert!(summary.is_valid);
    assert!(summary.error_counts.is_empty());

    review::approve(&store, submission.id, "dana", None, &PromotionOptions::default()).unwrap();
    let err = review::edit_staging_row(
        &store,
        broken.id,
        edited.record.clone(),
        &PipelineConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ReviewError::Locked { .. }));
    let rows = store.read(|state| state.dataset_rows("people")).unwrap().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].record["email"], Value::from("b@x.com"));
}

#[test]
fn rules_are_scoped_to_their_dataset() {
    let store = store_with_schema(people_schema());
    store
        .transaction(|state| -> Result<(), StoreError> {
            state.put_rule(BusinessRule::new(
                "other",
                RuleKind::Required {
                    field: "city".into(),
                },
                "city required",
            ));
            Ok(())
        })
        .unwrap();
    let (people, schema) = store
        .read(|state| (state.active_rules("people"), state.schema("people")))
        .unwrap();
    assert!(people.is_empty());
    assert!(schema.is_some());
}

#[test]
fn edit_that_duplicates_a_later_row_flags_that_row() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    store
        .transaction(|state| -> Result<(), StoreError> {
            state.put_rule(BusinessRule::new(
                "people",
                RuleKind::Unique {
                    field: "email".into(),
                },
                "email already submitted",
            ));
            Ok(())
        })
        .unwrap();
    let submission = submit_csv(
        &workspace,
        &store,
        "people",
        "email,age,city\na@x.com,1,x\nb@x.com,2,y\n",
    );
    let rows = store
        .read(|state| state.staging_rows(submission.id))
        .unwrap()
        .unwrap();

    let mut record = rows[0].record.clone();
    record.insert("email".into(), Value::from("b@x.com"));
    let edited = review::edit_staging_row(&store, rows[0].id, record, &PipelineConfig::default()).unwrap();
    assert_eq!(edited.status, StagingStatus::Valid);

    let rows = store
        .read(|state| state.staging_rows(submission.id))
        .unwrap()
        .unwrap();
    let statuses = rows.iter().map(|row| row.status).collect::<Vec<_>>();
    assert_eq!(statuses, vec![StagingStatus::Valid, StagingStatus::Invalid]);
    assert_eq!(rows[1].errors[0].kind, ErrorKind::DuplicateValue);
    assert_eq!(rows[1].errors[0].row_index, Some(1));
    let summary = store
        .read(|state| state.submission(submission.id))
        .unwrap()
        .unwrap()
        .validation_summary
        .unwrap();
    assert_eq!(summary.invalid_rows, 1);
    assert!(!summary.is_valid);

    review::approve(&store, submission.id, "dana", None, &PromotionOptions::default()).unwrap();
    let emails = store
        .read(|state| state.dataset_rows("people"))
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|row| row.record["email"].clone())
        .collect::<Vec<_>>();
    assert_eq!(emails, vec![Value::from("b@x.com")]);
}

#[test]
fn edit_that_removes_a_duplicate_clears_the_later_row() {
    let workspace = TestWorkspace::new();
    let store = store_with_schema(people_schema());
    store
        .transaction(|state| -> Result<(), StoreError> {
            state.put_rule(BusinessRule::new(
                "people",
                RuleKind::Unique {
                    field: "email".into(),
                },
                "email already submitted",
            ));
            Ok(())
        })
        .unwrap();
    let submission = submit_csv(
        &workspace,
        &store,
        "people",
        "email,age,city\na@x.com,1,x\na@x.com,2,y\n",
    );
    let rows = store
        .read(|state| state.staging_rows(submission.id))
        .unwrap()
        .unwrap();
    assert_eq!(rows[1].status, StagingStatus::Invalid);

    let mut record = rows[0].record.clone();
    record.insert("email".into(), Value::from("c@x.com"));
    review::edit_staging_row(&store, rows[0].id, record, &PipelineConfig::default()).unwrap();

    let rows = store
        .read(|state| state.staging_rows(submission.id))
        .unwrap()
        .unwrap();
    assert!(rows.iter().all(|row| row.status == StagingStatus::Valid));
    assert!(rows[1].errors.is_empty());
    assert!(rows[1].updated_at.is_some());
}
