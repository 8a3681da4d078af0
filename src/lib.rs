pub mod analyzer;
pub mod classify;
pub mod cli;
pub mod config;
pub mod dataset_cmd;
pub mod error;
pub mod filter;
pub mod inference;
pub mod io_utils;
pub mod promotion;
pub mod review;
pub mod rules;
pub mod rules_cmd;
pub mod schema;
pub mod schema_cmd;
pub mod staging;
pub mod staging_cmd;
pub mod stats;
pub mod store;
pub mod submission;
pub mod submission_cmd;
pub mod table;
pub mod validator;
pub mod value;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands, InferArgs},
    config::PipelineConfig,
    io_utils::ReadOptions,
    store::Store,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_intake", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = PipelineConfig::load_or_default(cli.config.as_deref())
        .context("Loading pipeline configuration")?;
    match cli.command {
        Commands::Infer(args) => handle_infer(&args, &config),
        Commands::Schema(command) => schema_cmd::execute(&command, &config),
        Commands::Rules(command) => rules_cmd::execute(&command),
        Commands::Submit(args) => submission_cmd::submit(&args, &config),
        Commands::Submissions(args) => submission_cmd::list(&args),
        Commands::Staging(command) => staging_cmd::execute(&command, &config),
        Commands::Review(args) => submission_cmd::review(&args, &config),
        Commands::Promote(args) => submission_cmd::promote(&args, &config),
        Commands::Dataset(command) => dataset_cmd::execute(&command),
    }
}

pub(crate) fn open_store(path: &Path) -> Result<Store> {
    Store::open(path).with_context(|| format!("Opening store {path:?}"))
}

pub(crate) fn read_options(input: &cli::InputArgs) -> Result<ReadOptions> {
    ReadOptions::for_path(&input.input, input.delimiter, input.input_encoding.as_deref())
}

fn handle_infer(args: &InferArgs, config: &PipelineConfig) -> Result<()> {
    let mut inference = config.inference.clone();
    if let Some(sample_rows) = args.sample_rows {
        inference.sample_rows = sample_rows;
    }
    let options = read_options(&args.input)?;
    info!(
        "Inferring schema for '{}' from '{}' with delimiter '{}'",
        args.dataset,
        args.input.input.display(),
        printable_delimiter(options.delimiter)
    );
    let candidate =
        inference::infer_schema_from_path(&args.input.input, &args.dataset, options, &inference)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&candidate)?);
    } else {
        let headers = ["field", "header", "type", "required", "confidence", "format"]
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();
        let rows = candidate
            .fields
            .iter()
            .map(|candidate| {
                vec![
                    candidate.field.name.clone(),
                    candidate.header.clone(),
                    candidate.field.data_type.to_string(),
                    candidate.field.required.to_string(),
                    format!("{:.2}", candidate.confidence),
                    candidate.field.constraints.format.clone().unwrap_or_default(),
                ]
            })
            .collect::<Vec<_>>();
        table::print_table(&headers, &rows);
        println!("overall confidence: {:.2}", candidate.confidence);
    }

    if let Some(output) = &args.output {
        candidate
            .to_schema()
            .save(output)
            .with_context(|| format!("Writing candidate schema to {output:?}"))?;
        info!("Candidate schema written to {output:?}; accept it with `schema accept`");
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
