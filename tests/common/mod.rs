#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_intake::{
    config::PipelineConfig,
    io_utils::ReadOptions,
    schema::{Constraints, Field, FieldType, Schema},
    store::{SchemaStore, Store},
    submission::{self, Submission, SubmitOutcome},
};
use tempfile::{TempDir, tempdir};

/// Scratch directory that cleans up its files on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// `people` dataset: required email, non-negative age, optional city.
pub fn people_schema() -> Schema {
    Schema::new(
        "people",
        "people schema",
        vec![
            Field::new("email", FieldType::Email).required(),
            Field::new("age", FieldType::Number).with_constraints(Constraints {
                min_value: Some(0.0),
                ..Constraints::default()
            }),
            Field::new("city", FieldType::String),
        ],
    )
    .expect("people schema")
}

pub fn store_with_schema(schema: Schema) -> Store {
    let store = Store::in_memory();
    store
        .transaction(|state| -> Result<(), csv_intake::error::StoreError> {
            state.put_schema(schema);
            Ok(())
        })
        .expect("seed schema");
    store
}

/// Writes `csv` into the workspace and submits it, expecting it to be staged.
pub fn submit_csv(workspace: &TestWorkspace, store: &Store, dataset: &str, csv: &str) -> Submission {
    let name = format!("{}.csv", uuid::Uuid::new_v4());
    let path = workspace.write(&name, csv);
    match submission::submit(
        store,
        dataset,
        "tester",
        &path,
        ReadOptions::default(),
        &PipelineConfig::default(),
    )
    .expect("submit")
    {
        SubmitOutcome::Submitted(submission) => submission,
        SubmitOutcome::Rejected(headers) => panic!("upload rejected: {headers:?}"),
    }
}
