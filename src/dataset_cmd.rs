use anyhow::Result;

use crate::{
    cli::{DatasetCommand, DatasetRowsArgs},
    open_store,
    store::{RowStore, SchemaStore},
    table,
    value::Value,
};

pub fn execute(command: &DatasetCommand) -> Result<()> {
    match command {
        DatasetCommand::Rows(args) => rows(args),
    }
}

fn rows(args: &DatasetRowsArgs) -> Result<()> {
    let store = open_store(&args.store.store)?;
    let (rows, schema) = store.read(|state| {
        state
            .dataset_rows(&args.dataset)
            .map(|rows| (rows, state.schema(&args.dataset)))
    })??;

    let fields = schema
        .map(|schema| schema.field_names())
        .unwrap_or_default();
    let mut headers = vec!["index".to_string()];
    headers.extend(fields.iter().cloned());
    let limit = args.limit.unwrap_or(usize::MAX);
    let body = rows
        .iter()
        .take(limit)
        .map(|row| {
            let mut cells = vec![row.row_index.to_string()];
            cells.extend(fields.iter().map(|field| {
                row.record
                    .get(field)
                    .map(Value::as_display)
                    .unwrap_or_default()
            }));
            cells
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &body);
    println!("{} row(s) in '{}'", rows.len(), args.dataset);
    Ok(())
}
