use anyhow::{Result, anyhow};
use log::{info, warn};

use crate::{
    cli::{RulesCommand, RulesImportArgs, RulesListArgs},
    error::StoreError,
    open_store,
    rules::{BusinessRule, RuleKind, load_rules},
    store::{RuleStore, SchemaStore},
    table,
};

pub fn execute(command: &RulesCommand) -> Result<()> {
    match command {
        RulesCommand::Import(args) => import(args),
        RulesCommand::List(args) => list(args),
    }
}

fn import(args: &RulesImportArgs) -> Result<()> {
    let rules = load_rules(&args.file, &args.dataset)?;
    for rule in &rules {
        if let Err(err) = rule.check() {
            warn!("Rule {} will not be enforced as written: {err:#}", rule.id);
        }
    }

    let store = open_store(&args.store.store)?;
    let count = rules.len();
    store.transaction(|state| -> Result<(), StoreError> {
        if state.schema(&args.dataset).is_none() {
            return Err(StoreError::DatasetNotFound(args.dataset.clone()));
        }
        for rule in rules {
            state.put_rule(rule);
        }
        Ok(())
    })
    .map_err(|err| anyhow!("Importing rules for '{}': {err}", args.dataset))?;
    info!("Imported {count} rule(s) for dataset '{}'", args.dataset);
    Ok(())
}

fn list(args: &RulesListArgs) -> Result<()> {
    let store = open_store(&args.store.store)?;
    let mut rules = store.read(|state| state.rules(&args.dataset))?;
    rules.sort_by_key(|rule| rule.priority);
    let headers = ["id", "type", "target", "priority", "severity", "active", "message"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = rules.iter().map(describe).collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    Ok(())
}

fn describe(rule: &BusinessRule) -> Vec<String> {
    let target = match &rule.kind {
        RuleKind::CrossField { condition } => condition.clone(),
        RuleKind::RangeCheck { field, min, max } => {
            let bound = |value: &Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
            format!("{field} [{}, {}]", bound(min), bound(max))
        }
        RuleKind::FieldValidation { field, pattern } => format!("{field} ~ {pattern}"),
        other => other.target(),
    };
    vec![
        rule.id.to_string(),
        rule.kind.label().to_string(),
        target,
        rule.priority.to_string(),
        format!("{:?}", rule.severity).to_lowercase(),
        rule.active.to_string(),
        rule.error_message.clone(),
    ]
}
