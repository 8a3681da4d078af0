use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::{staging::StagingStatus, submission::SubmissionStatus};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Infer schemas, validate CSV submissions and promote reviewed rows",
    long_about = None
)]
pub struct Cli {
    /// Pipeline configuration file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Infer a candidate schema from a sample of a CSV file
    Infer(InferArgs),
    /// Accept or show dataset schemas
    #[command(subcommand)]
    Schema(SchemaCommand),
    /// Import or list business rules
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Validate a CSV file and record it as a submission
    Submit(SubmitArgs),
    /// List submissions
    Submissions(SubmissionsArgs),
    /// Browse or edit staging rows of a submission
    #[command(subcommand)]
    Staging(StagingCommand),
    /// Start a review, approve or reject a submission
    Review(ReviewArgs),
    /// Promote an approved submission into its dataset
    Promote(PromoteArgs),
    /// Inspect dataset rows
    #[command(subcommand)]
    Dataset(DatasetCommand),
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// JSON store file (created on first write)
    #[arg(long)]
    pub store: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// Input CSV file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct InferArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Dataset the schema is for
    #[arg(short, long)]
    pub dataset: String,
    /// Write the candidate schema as YAML to this path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Rows to sample (0 means every row); overrides the config file
    #[arg(long)]
    pub sample_rows: Option<usize>,
    /// Print the full candidate, including per-type scores, as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum SchemaCommand {
    /// Accept a schema file, or infer and accept one from a CSV file
    Accept(SchemaAcceptArgs),
    /// Print the accepted schema of a dataset as YAML
    Show(SchemaShowArgs),
}

#[derive(Debug, Args)]
pub struct SchemaAcceptArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Schema YAML file to accept
    #[arg(short, long, conflicts_with = "from_csv")]
    pub schema: Option<PathBuf>,
    /// Infer from this CSV file and accept the candidate unchanged
    #[arg(long = "from-csv", requires = "dataset")]
    pub from_csv: Option<PathBuf>,
    /// Dataset name (required with --from-csv; overrides the file otherwise)
    #[arg(short, long)]
    pub dataset: Option<String>,
}

#[derive(Debug, Args)]
pub struct SchemaShowArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long)]
    pub dataset: String,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// Import rules from a YAML list
    Import(RulesImportArgs),
    /// List the rules of a dataset
    List(RulesListArgs),
}

#[derive(Debug, Args)]
pub struct RulesImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long)]
    pub dataset: String,
    /// YAML file with a list of rules
    #[arg(short, long)]
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct RulesListArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long)]
    pub dataset: String,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub input: InputArgs,
    #[arg(short, long)]
    pub dataset: String,
    /// Who is submitting the file
    #[arg(long, default_value = "anonymous")]
    pub submitter: String,
}

#[derive(Debug, Args)]
pub struct SubmissionsArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long)]
    pub dataset: Option<String>,
    /// Only list submissions in this status
    #[arg(long)]
    pub status: Option<SubmissionStatus>,
}

#[derive(Debug, Subcommand)]
pub enum StagingCommand {
    /// Page through a submission's staging rows
    List(StagingListArgs),
    /// Replace values of one staging row and re-validate it
    Edit(StagingEditArgs),
}

#[derive(Debug, Args)]
pub struct StagingListArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long)]
    pub submission: Uuid,
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    #[arg(long = "per-page", default_value_t = crate::staging::DEFAULT_PAGE_SIZE)]
    pub per_page: usize,
    #[arg(long)]
    pub status: Option<StagingStatus>,
    /// `field contains text`, `field = text`, `field != text` or bare text
    #[arg(long)]
    pub filter: Option<String>,
    /// Show validation errors under the rows
    #[arg(long)]
    pub errors: bool,
}

#[derive(Debug, Args)]
pub struct StagingEditArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Staging row id
    #[arg(short, long)]
    pub row: Uuid,
    /// Assignments of the form `field=value`; an empty value clears the field
    #[arg(long = "set", action = clap::ArgAction::Append, required = true)]
    pub assignments: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Decision {
    Start,
    Approve,
    Reject,
}

#[derive(Debug, Args)]
pub struct ReviewArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long)]
    pub submission: Uuid,
    #[arg(long, value_enum)]
    pub decision: Decision,
    #[arg(long, default_value = "admin")]
    pub reviewer: String,
    #[arg(long)]
    pub notes: Option<String>,
    /// Also promote rows that only carry warnings
    #[arg(long = "include-warnings")]
    pub include_warnings: bool,
}

#[derive(Debug, Args)]
pub struct PromoteArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long)]
    pub submission: Uuid,
    /// Also promote rows that only carry warnings
    #[arg(long = "include-warnings")]
    pub include_warnings: bool,
}

#[derive(Debug, Subcommand)]
pub enum DatasetCommand {
    /// Print the rows of a dataset in index order
    Rows(DatasetRowsArgs),
}

#[derive(Debug, Args)]
pub struct DatasetRowsArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(short, long)]
    pub dataset: String,
    /// Limit number of rows printed
    #[arg(long)]
    pub limit: Option<usize>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_names_and_characters() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter(";"), Ok(b';'));
        assert_eq!(parse_delimiter("#"), Ok(b'#'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
    }

    #[test]
    fn review_command_parses() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "csv-intake",
            "review",
            "--store",
            "s.json",
            "--submission",
            &id.to_string(),
            "--decision",
            "approve",
            "--config",
            "c.yaml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
        let Commands::Review(args) = cli.command else {
            panic!("expected review");
        };
        assert_eq!(args.submission, id);
        assert_eq!(args.decision, Decision::Approve);
    }
}
