use anyhow::Result;
use itertools::Itertools;
use log::{info, warn};

use crate::{
    cli::{Decision, PromoteArgs, ReviewArgs, SubmissionsArgs, SubmitArgs},
    config::{PipelineConfig, PromotionOptions},
    open_store, promotion, read_options,
    review::{self, Approval},
    store::SubmissionStore,
    submission::{self, Submission, SubmitOutcome},
    table,
};

pub fn submit(args: &SubmitArgs, config: &PipelineConfig) -> Result<()> {
    let store = open_store(&args.store.store)?;
    let options = read_options(&args.input)?;
    let outcome = submission::submit(
        &store,
        &args.dataset,
        &args.submitter,
        &args.input.input,
        options,
        config,
    )?;
    match outcome {
        SubmitOutcome::Rejected(headers) => {
            for error in &headers.missing {
                eprintln!("{error}");
            }
            anyhow::bail!(
                "Upload rejected: missing column(s) {}",
                headers.missing.iter().map(|e| e.field.as_str()).join(", ")
            );
        }
        SubmitOutcome::Submitted(submission) => {
            if let Some(summary) = &submission.validation_summary {
                for field in &summary.unexpected_fields {
                    warn!("Column '{field}' is not part of the schema and was ignored");
                }
                println!("submission: {}", submission.id);
                println!(
                    "rows: {} (valid {}, invalid {}, warning {})",
                    summary.total_rows, summary.valid_rows, summary.invalid_rows, summary.warning_rows
                );
                for (kind, count) in &summary.error_counts {
                    println!("  {kind}: {count}");
                }
            }
            Ok(())
        }
    }
}

pub fn list(args: &SubmissionsArgs) -> Result<()> {
    let store = open_store(&args.store.store)?;
    let submissions = store
        .read(|state| state.submissions(args.dataset.as_deref()))?
        .into_iter()
        .filter(|submission| args.status.is_none_or(|status| submission.status == status))
        .collect::<Vec<_>>();
    let headers = ["id", "dataset", "status", "submitter", "rows", "invalid", "submitted"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = submissions.iter().map(describe).collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    Ok(())
}

fn describe(submission: &Submission) -> Vec<String> {
    let invalid = submission
        .validation_summary
        .as_ref()
        .map(|summary| summary.invalid_rows.to_string())
        .unwrap_or_default();
    vec![
        submission.id.to_string(),
        submission.dataset.clone(),
        submission.status.to_string(),
        submission.submitter.clone(),
        submission.row_count.to_string(),
        invalid,
        submission.submitted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    ]
}

fn promotion_options(config: &PipelineConfig, include_warnings: bool) -> PromotionOptions {
    PromotionOptions {
        include_warning_rows: include_warnings || config.promotion.include_warning_rows,
    }
}

pub fn review(args: &ReviewArgs, config: &PipelineConfig) -> Result<()> {
    let store = open_store(&args.store.store)?;
    match args.decision {
        Decision::Start => {
            let submission = review::start_review(&store, args.submission)?;
            println!("{}: {}", submission.id, submission.status);
        }
        Decision::Approve => {
            let options = promotion_options(config, args.include_warnings);
            let Approval {
                submission,
                promotion,
            } = review::approve(
                &store,
                args.submission,
                &args.reviewer,
                args.notes.clone(),
                &options,
            )?;
            println!("{}: {}", submission.id, submission.status);
            print_promotion(&promotion);
        }
        Decision::Reject => {
            let submission =
                review::reject(&store, args.submission, &args.reviewer, args.notes.clone())?;
            println!("{}: {}", submission.id, submission.status);
        }
    }
    Ok(())
}

pub fn promote(args: &PromoteArgs, config: &PipelineConfig) -> Result<()> {
    let store = open_store(&args.store.store)?;
    let options = promotion_options(config, args.include_warnings);
    let report = promotion::promote(&store, args.submission, &options)?;
    print_promotion(&report);
    info!("Dataset '{}' now holds {} row(s)", report.dataset, report.dataset_row_count);
    Ok(())
}

fn print_promotion(report: &promotion::PromotionReport) {
    let range = match (report.first_index, report.last_index) {
        (Some(first), Some(last)) => format!("{first}..={last}"),
        _ => "none".to_string(),
    };
    println!(
        "promoted {} row(s) into '{}' at indices {range}; {} left in staging",
        report.promoted_rows, report.dataset, report.skipped_rows
    );
}
