use anyhow::{Result, anyhow};

use crate::{
    cli::{StagingCommand, StagingEditArgs, StagingListArgs},
    config::PipelineConfig,
    filter::RowFilter,
    open_store,
    review::edit_staging_row,
    schema::Schema,
    staging::StagingQuery,
    store::{SchemaStore, StagingStore, SubmissionStore},
    table,
    value::{Record, Value},
};

pub fn execute(command: &StagingCommand, config: &PipelineConfig) -> Result<()> {
    match command {
        StagingCommand::List(args) => list(args),
        StagingCommand::Edit(args) => edit(args, config),
    }
}

fn list(args: &StagingListArgs) -> Result<()> {
    let query = StagingQuery {
        page: args.page,
        per_page: args.per_page,
        status: args.status,
        filter: args.filter.as_deref().map(RowFilter::parse).transpose()?,
    };
    let store = open_store(&args.store.store)?;
    let (page, schema) = store.read(|state| {
        let page = state.staging_page(args.submission, &query)?;
        let schema = state
            .submission(args.submission)
            .ok()
            .and_then(|submission| state.schema(&submission.dataset));
        Ok::<_, crate::error::StoreError>((page, schema))
    })??;

    let fields = match &schema {
        Some(schema) => schema.field_names(),
        None => page
            .rows
            .first()
            .map(|row| row.record.keys().cloned().collect())
            .unwrap_or_default(),
    };
    let mut headers = vec!["row".to_string(), "status".to_string()];
    headers.extend(fields.iter().cloned());
    headers.push("id".to_string());

    let rows = page
        .rows
        .iter()
        .map(|row| {
            let mut cells = vec![row.row_index.to_string(), row.status.to_string()];
            cells.extend(fields.iter().map(|field| {
                row.record
                    .get(field)
                    .map(Value::as_display)
                    .unwrap_or_default()
            }));
            cells.push(row.id.to_string());
            cells
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    println!(
        "page {} of {} ({} matching row(s))",
        page.page,
        page.total_pages().max(1),
        page.total
    );

    if args.errors {
        for row in &page.rows {
            for error in &row.errors {
                println!("{error}");
            }
        }
    }
    Ok(())
}

fn edit(args: &StagingEditArgs, config: &PipelineConfig) -> Result<()> {
    let store = open_store(&args.store.store)?;
    let (current, schema) = store.read(|state| {
        let row = state.staging_row(args.row)?;
        let schema = state
            .submission(row.submission_id)
            .ok()
            .and_then(|submission| state.schema(&submission.dataset));
        Ok::<_, crate::error::StoreError>((row, schema))
    })??;

    let record = apply_assignments(current.record, &args.assignments, schema.as_ref())?;
    let updated = edit_staging_row(&store, args.row, record, config)?;
    println!("row {}: {}", updated.row_index, updated.status);
    for error in &updated.errors {
        println!("{error}");
    }
    Ok(())
}

/// Applies `field=value` assignments on top of an existing record.
fn apply_assignments(
    mut record: Record,
    assignments: &[String],
    schema: Option<&Schema>,
) -> Result<Record> {
    for assignment in assignments {
        let (field, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("Assignment '{assignment}' must use the form field=value"))?;
        let field = field.trim();
        if let Some(schema) = schema
            && schema.field(field).is_none()
        {
            return Err(anyhow!("Field '{field}' is not part of the schema"));
        }
        record.insert(field.to_string(), Value::from_cell(value));
    }
    Ok(record)
}
