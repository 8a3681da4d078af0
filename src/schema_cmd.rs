use anyhow::{Context, Result, anyhow};
use log::info;

use crate::{
    cli::{SchemaAcceptArgs, SchemaCommand, SchemaShowArgs},
    config::PipelineConfig,
    error::StoreError,
    inference,
    io_utils::ReadOptions,
    open_store,
    schema::Schema,
    store::SchemaStore,
};

pub fn execute(command: &SchemaCommand, config: &PipelineConfig) -> Result<()> {
    match command {
        SchemaCommand::Accept(args) => accept(args, config),
        SchemaCommand::Show(args) => show(args),
    }
}

fn accept(args: &SchemaAcceptArgs, config: &PipelineConfig) -> Result<()> {
    let schema = match (&args.schema, &args.from_csv) {
        (Some(path), None) => {
            let mut schema =
                Schema::load(path).with_context(|| format!("Loading schema from {path:?}"))?;
            if let Some(dataset) = &args.dataset {
                schema.dataset = dataset.clone();
            }
            schema
        }
        (None, Some(path)) => {
            let dataset = args
                .dataset
                .as_deref()
                .ok_or_else(|| anyhow!("--dataset is required with --from-csv"))?;
            let options = ReadOptions::for_path(path, None, None)?;
            inference::infer_schema_from_path(path, dataset, options, &config.inference)?
                .accept()?
        }
        _ => return Err(anyhow!("Provide either --schema or --from-csv")),
    };
    if schema.dataset.trim().is_empty() {
        return Err(anyhow!("Schema does not name a dataset; pass --dataset"));
    }

    let store = open_store(&args.store.store)?;
    let replaced = store.transaction(|state| -> Result<bool, StoreError> {
        let replaced = state.schema(&schema.dataset).is_some();
        state.put_schema(schema.clone());
        Ok(replaced)
    })?;
    info!(
        "{} schema '{}' for dataset '{}' with {} field(s)",
        if replaced { "Replaced" } else { "Accepted" },
        schema.name,
        schema.dataset,
        schema.fields.len()
    );
    Ok(())
}

fn show(args: &SchemaShowArgs) -> Result<()> {
    let store = open_store(&args.store.store)?;
    let schema = store
        .read(|state| state.schema(&args.dataset))?
        .ok_or_else(|| anyhow!("Dataset '{}' has no accepted schema", args.dataset))?;
    print!("{}", schema.to_yaml_string()?);
    Ok(())
}
