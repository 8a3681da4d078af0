//! Dataset-scoped business rules and their evaluation over a whole batch.
//!
//! Rules are declared in YAML (see [`load_rules`]) and compiled once per batch
//! into a [`RuleEvaluator`]. Cross-field conditions are parsed into a small
//! comparison AST; patterns are compiled with `regex`. A rule that cannot be
//! compiled is reported once and then either passes every row (the default)
//! or flags every non-empty row when [`RuleConfig::fail_closed`] is set.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashSet},
    fmt,
    fs::File,
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    classify::parse_number,
    config::RuleConfig,
    schema::Schema,
    validator::{ErrorKind, Severity, ValidationError},
    value::{Record, parse_temporal},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    Unique {
        field: String,
    },
    RangeCheck {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    CrossField {
        condition: String,
    },
    FieldValidation {
        field: String,
        pattern: String,
    },
    Required {
        field: String,
    },
}

impl RuleKind {
    pub fn label(&self) -> &'static str {
        match self {
            RuleKind::Unique { .. } => "unique",
            RuleKind::RangeCheck { .. } => "range_check",
            RuleKind::CrossField { .. } => "cross_field",
            RuleKind::FieldValidation { .. } => "field_validation",
            RuleKind::Required { .. } => "required",
        }
    }

    /// The field a rule targets; cross-field rules report on their left operand.
    pub fn target(&self) -> String {
        match self {
            RuleKind::Unique { field }
            | RuleKind::RangeCheck { field, .. }
            | RuleKind::FieldValidation { field, .. }
            | RuleKind::Required { field } => field.clone(),
            RuleKind::CrossField { condition } => condition
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .find(|token| !token.is_empty())
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn error_kind(&self) -> ErrorKind {
        match self {
            RuleKind::Unique { .. } => ErrorKind::DuplicateValue,
            RuleKind::RangeCheck { .. } => ErrorKind::RangeViolation,
            RuleKind::CrossField { .. } => ErrorKind::CrossFieldViolation,
            RuleKind::FieldValidation { .. } => ErrorKind::FieldValidation,
            RuleKind::Required { .. } => ErrorKind::RequiredField,
        }
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub dataset: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    pub error_message: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub severity: Severity,
}

impl BusinessRule {
    pub fn new(dataset: impl Into<String>, kind: RuleKind, error_message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dataset: dataset.into(),
            kind,
            error_message: error_message.into(),
            active: true,
            priority: 0,
            severity: Severity::Error,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Compiles the rule's condition or pattern without evaluating anything.
    pub fn check(&self) -> Result<()> {
        match &self.kind {
            RuleKind::CrossField { condition } => Condition::parse(condition).map(|_| ()),
            RuleKind::FieldValidation { pattern, .. } => Regex::new(pattern)
                .map(|_| ())
                .with_context(|| format!("Compiling pattern for rule {}", self.id)),
            RuleKind::RangeCheck {
                min: Some(min),
                max: Some(max),
                ..
            } if min > max => Err(anyhow!("Range rule {} has min {min} above max {max}", self.id)),
            _ => Ok(()),
        }
    }
}

/// Reads a YAML list of rules, stamping `dataset` on entries that omit it.
pub fn load_rules(path: &Path, dataset: &str) -> Result<Vec<BusinessRule>> {
    let file = File::open(path).with_context(|| format!("Opening rules file {path:?}"))?;
    let mut rules: Vec<BusinessRule> =
        serde_yaml::from_reader(file).with_context(|| format!("Parsing rules file {path:?}"))?;
    for rule in &mut rules {
        if rule.dataset.is_empty() {
            rule.dataset = dataset.to_string();
        } else if rule.dataset != dataset {
            return Err(anyhow!(
                "Rule {} belongs to dataset '{}', not '{dataset}'",
                rule.id,
                rule.dataset
            ));
        }
    }
    Ok(rules)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparator {
    // Two-character operators first so `>=` is not read as `>`.
    const TOKENS: [(&'static str, Comparator); 7] = [
        (">=", Comparator::Ge),
        ("<=", Comparator::Le),
        ("==", Comparator::Eq),
        ("!=", Comparator::Ne),
        (">", Comparator::Gt),
        ("<", Comparator::Lt),
        ("=", Comparator::Eq),
    ];

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparator::Gt => ordering == Ordering::Greater,
            Comparator::Ge => ordering != Ordering::Less,
            Comparator::Lt => ordering == Ordering::Less,
            Comparator::Le => ordering != Ordering::Greater,
            Comparator::Eq => ordering == Ordering::Equal,
            Comparator::Ne => ordering != Ordering::Equal,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(String),
    Number(f64),
}

/// `left <op> right`, where `right` is another field or a number literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: String,
    pub op: Comparator,
    pub right: Operand,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.left, self.op.symbol())?;
        match &self.right {
            Operand::Field(name) => f.write_str(name),
            Operand::Number(value) => write!(f, "{value}"),
        }
    }
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Condition {
    pub fn parse(text: &str) -> Result<Self> {
        let (idx, token, op) = Comparator::TOKENS
            .iter()
            .find_map(|(token, op)| text.find(token).map(|idx| (idx, *token, *op)))
            .ok_or_else(|| anyhow!("Condition '{text}' has no comparison operator"))?;
        let left = text[..idx].trim();
        let right = text[idx + token.len()..].trim();
        if !is_identifier(left) {
            return Err(anyhow!("Condition '{text}' must start with a field name"));
        }
        let right = if let Some(number) = parse_number(right) {
            Operand::Number(number)
        } else if is_identifier(right) {
            Operand::Field(right.to_string())
        } else {
            return Err(anyhow!(
                "Condition '{text}' must compare against a field name or a number"
            ));
        };
        Ok(Self {
            left: left.to_string(),
            op,
            right,
        })
    }

    /// Rows where either side is empty pass.
    pub fn holds(&self, record: &Record) -> bool {
        let Some(left) = record.get(&self.left).and_then(|value| value.as_text()) else {
            return true;
        };
        let right = match &self.right {
            Operand::Field(name) => match record.get(name).and_then(|value| value.as_text()) {
                Some(text) => text.into_owned(),
                None => return true,
            },
            Operand::Number(number) => number.to_string(),
        };
        self.op.holds(compare_text(&left, &right))
    }
}

/// Numeric when both sides are numbers, chronological when both are dates or
/// date-times, lexical otherwise.
fn compare_text(left: &str, right: &str) -> Ordering {
    if let (Some(a), Some(b)) = (parse_number(left), parse_number(right))
        && let Some(ordering) = a.partial_cmp(&b)
    {
        return ordering;
    }
    if let (Some(a), Some(b)) = (parse_temporal(left), parse_temporal(right)) {
        return a.cmp(&b);
    }
    left.cmp(right)
}

enum Check {
    Unique { field: String },
    Range { field: String, min: Option<f64>, max: Option<f64> },
    Cross(Condition),
    Pattern { field: String, regex: Regex },
    Required { field: String },
    Broken { field: Option<String> },
}

struct CompiledRule {
    check: Check,
    kind: ErrorKind,
    target: String,
    message: String,
    severity: Severity,
}

impl CompiledRule {
    fn error(&self, value: Option<&str>) -> ValidationError {
        let error = ValidationError::new(&self.target, self.kind, &self.message)
            .with_severity(self.severity);
        match value {
            Some(value) => error.with_value(value),
            None => error,
        }
    }
}

/// Active rules for one dataset, compiled and ordered by priority.
pub struct RuleEvaluator {
    rules: Vec<CompiledRule>,
    fail_closed: bool,
}

impl RuleEvaluator {
    pub fn new(rules: &[BusinessRule], schema: Option<&Schema>, config: &RuleConfig) -> Self {
        let mut active = rules.iter().filter(|rule| rule.active).collect::<Vec<_>>();
        active.sort_by_key(|rule| rule.priority);

        let mut compiled = active
            .iter()
            .map(|rule| compile(rule, config))
            .collect::<Vec<_>>();

        if let Some(schema) = schema {
            let explicit_unique = active
                .iter()
                .filter_map(|rule| match &rule.kind {
                    RuleKind::Unique { field } => Some(field.as_str()),
                    _ => None,
                })
                .collect::<HashSet<_>>();
            for field in schema
                .fields
                .iter()
                .filter(|field| field.unique && !explicit_unique.contains(field.name.as_str()))
            {
                compiled.push(CompiledRule {
                    check: Check::Unique {
                        field: field.name.clone(),
                    },
                    kind: ErrorKind::DuplicateValue,
                    target: field.name.clone(),
                    message: format!("{} must be unique", field.display_name),
                    severity: Severity::Error,
                });
            }
        }

        debug!("Compiled {} business rule(s)", compiled.len());
        Self {
            rules: compiled,
            fail_closed: config.fail_closed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Findings keyed by the position of the offending record in `records`.
    pub fn evaluate(&self, records: &[Record]) -> BTreeMap<usize, Vec<ValidationError>> {
        let mut findings: BTreeMap<usize, Vec<ValidationError>> = BTreeMap::new();
        for rule in &self.rules {
            let mut flagged = 0usize;
            let mut flag = |row: usize, error: ValidationError| {
                flagged += 1;
                findings.entry(row).or_default().push(error);
            };
            match &rule.check {
                Check::Unique { field } => {
                    let mut seen = HashSet::new();
                    for (row, record) in records.iter().enumerate() {
                        if let Some(text) = text_of(record, field)
                            && !seen.insert(text.clone())
                        {
                            flag(row, rule.error(Some(&text)));
                        }
                    }
                }
                Check::Range { field, min, max } => {
                    for (row, record) in records.iter().enumerate() {
                        let Some(text) = text_of(record, field) else {
                            continue;
                        };
                        let Some(number) = parse_number(&text) else {
                            continue;
                        };
                        let below = min.is_some_and(|min| number < min);
                        let above = max.is_some_and(|max| number > max);
                        if below || above {
                            flag(row, rule.error(Some(&text)).with_expected(range_label(*min, *max)));
                        }
                    }
                }
                Check::Cross(condition) => {
                    for (row, record) in records.iter().enumerate() {
                        if !condition.holds(record) {
                            flag(
                                row,
                                rule.error(text_of(record, &condition.left).as_deref())
                                    .with_expected(condition.to_string()),
                            );
                        }
                    }
                }
                Check::Pattern { field, regex } => {
                    for (row, record) in records.iter().enumerate() {
                        if let Some(text) = text_of(record, field)
                            && !regex.is_match(&text)
                        {
                            flag(
                                row,
                                rule.error(Some(&text))
                                    .with_expected(regex.as_str().to_string()),
                            );
                        }
                    }
                }
                Check::Required { field } => {
                    for (row, record) in records.iter().enumerate() {
                        if text_of(record, field).is_none() {
                            flag(row, rule.error(None));
                        }
                    }
                }
                Check::Broken { field } => {
                    if !self.fail_closed {
                        continue;
                    }
                    for (row, record) in records.iter().enumerate() {
                        let non_empty = match field {
                            Some(field) => text_of(record, field).is_some(),
                            None => record.values().any(|value| !value.is_empty()),
                        };
                        if non_empty {
                            flag(row, rule.error(None));
                        }
                    }
                }
            }
            debug!("Rule on '{}' flagged {flagged} row(s)", rule.target);
        }
        findings
    }
}

fn compile(rule: &BusinessRule, config: &RuleConfig) -> CompiledRule {
    let broken = |reason: anyhow::Error, field: Option<String>| {
        let policy = if config.fail_closed {
            "flagging every non-empty row"
        } else {
            "passing every row"
        };
        warn!(
            "Business rule {} ({}) cannot be evaluated: {reason:#}; {policy}",
            rule.id,
            rule.kind.label()
        );
        Check::Broken { field }
    };
    let check = match &rule.kind {
        RuleKind::Unique { field } => Check::Unique {
            field: field.clone(),
        },
        RuleKind::RangeCheck { field, min, max } => Check::Range {
            field: field.clone(),
            min: *min,
            max: *max,
        },
        RuleKind::CrossField { condition } => match Condition::parse(condition) {
            Ok(parsed) => Check::Cross(parsed),
            Err(err) => broken(err, None),
        },
        RuleKind::FieldValidation { field, pattern } => match Regex::new(pattern) {
            Ok(regex) => Check::Pattern {
                field: field.clone(),
                regex,
            },
            Err(err) => broken(err.into(), Some(field.clone())),
        },
        RuleKind::Required { field } => Check::Required {
            field: field.clone(),
        },
    };
    CompiledRule {
        check,
        kind: rule.kind.error_kind(),
        target: rule.kind.target(),
        message: rule.error_message.clone(),
        severity: rule.severity,
    }
}

fn text_of(record: &Record, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(|value| value.as_text())
        .map(|text| text.into_owned())
}

fn range_label(min: Option<f64>, max: Option<f64>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("{min}..={max}"),
        (Some(min), None) => format!(">= {min}"),
        (None, Some(max)) => format!("<= {max}"),
        (None, None) => String::from("any"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schema::{Field, FieldType},
        value::Value,
    };

    fn records(field: &str, values: &[&str]) -> Vec<Record> {
        values
            .iter()
            .map(|value| {
                let mut record = Record::new();
                record.insert(field.to_string(), Value::from_cell(value));
                record
            })
            .collect()
    }

    fn pair(start: &str, end: &str) -> Record {
        let mut record = Record::new();
        record.insert("start".into(), Value::from_cell(start));
        record.insert("end".into(), Value::from_cell(end));
        record
    }

    #[test]
    fn unique_rule_flags_later_occurrences_only() {
        let rule = BusinessRule::new(
            "people",
            RuleKind::Unique {
                field: "email".into(),
            },
            "email must be unique",
        );
        let evaluator = RuleEvaluator::new(&[rule], None, &RuleConfig::default());
        let findings = evaluator.evaluate(&records("email", &["a@x.com", "a@x.com", "", ""]));
        assert_eq!(findings.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(findings[&1][0].kind, ErrorKind::DuplicateValue);
        assert_eq!(findings[&1][0].value.as_deref(), Some("a@x.com"));
    }

    #[test]
    fn range_check_skips_unparseable_values() {
        let rule = BusinessRule::new(
            "t",
            RuleKind::RangeCheck {
                field: "age".into(),
                min: Some(0.0),
                max: Some(120.0),
            },
            "age out of range",
        );
        let evaluator = RuleEvaluator::new(&[rule], None, &RuleConfig::default());
        let findings = evaluator.evaluate(&records("age", &["-1", "50", "abc", "", "121"]));
        assert_eq!(findings.keys().copied().collect::<Vec<_>>(), vec![0, 4]);
        assert_eq!(findings[&0][0].expected.as_deref(), Some("0..=120"));
    }

    #[test]
    fn condition_parsing() {
        let parsed = Condition::parse("end >= start").unwrap();
        assert_eq!(parsed.op, Comparator::Ge);
        assert_eq!(parsed.right, Operand::Field("start".into()));
        assert_eq!(parsed.to_string(), "end >= start");

        let literal = Condition::parse("age > 17").unwrap();
        assert_eq!(literal.op, Comparator::Gt);
        assert_eq!(literal.right, Operand::Number(17.0));

        assert_eq!(Condition::parse("a = b").unwrap().op, Comparator::Eq);
        assert!(Condition::parse("a b").is_err());
        assert!(Condition::parse("1 > a").is_err());
        assert!(Condition::parse("a > b c").is_err());
    }

    #[test]
    fn cross_field_compares_dates_numbers_and_skips_empty() {
        let rule = BusinessRule::new(
            "t",
            RuleKind::CrossField {
                condition: "end > start".into(),
            },
            "end must follow start",
        );
        let evaluator = RuleEvaluator::new(&[rule], None, &RuleConfig::default());
        let rows = vec![
            pair("2024-01-01", "2024-02-01"),
            pair("2024-03-01", "2024-02-01"),
            pair("9", "10"),
            pair("", "1"),
            pair("2024-01-01", "2024-01-01 08:00:00"),
        ];
        let findings = evaluator.evaluate(&rows);
        assert_eq!(findings.keys().copied().collect::<Vec<_>>(), vec![1]);
        let error = &findings[&1][0];
        assert_eq!(error.kind, ErrorKind::CrossFieldViolation);
        assert_eq!(error.field, "end");
    }

    #[test]
    fn unparseable_rules_fail_open_by_default() {
        let rule = BusinessRule::new(
            "t",
            RuleKind::CrossField {
                condition: "start ~~ end".into(),
            },
            "broken",
        );
        let rows = vec![pair("a", "b"), pair("", "")];

        let open = RuleEvaluator::new(std::slice::from_ref(&rule), None, &RuleConfig::default());
        assert!(open.evaluate(&rows).is_empty());

        let closed = RuleEvaluator::new(&[rule], None, &RuleConfig { fail_closed: true });
        let findings = closed.evaluate(&rows);
        assert_eq!(findings.keys().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(findings[&0][0].field, "start");
    }

    #[test]
    fn pattern_and_required_rules() {
        let rules = vec![
            BusinessRule::new(
                "t",
                RuleKind::FieldValidation {
                    field: "code".into(),
                    pattern: "^[A-Z]{3}$".into(),
                },
                "code must be three capitals",
            )
            .with_severity(Severity::Warning),
            BusinessRule::new(
                "t",
                RuleKind::Required {
                    field: "code".into(),
                },
                "code is required",
            ),
        ];
        let evaluator = RuleEvaluator::new(&rules, None, &RuleConfig::default());
        let findings = evaluator.evaluate(&records("code", &["ABC", "abc", ""]));
        assert_eq!(findings[&1][0].kind, ErrorKind::FieldValidation);
        assert_eq!(findings[&1][0].severity, Severity::Warning);
        assert_eq!(findings[&2][0].kind, ErrorKind::RequiredField);
        assert!(!findings.contains_key(&0));
    }

    #[test]
    fn inactive_rules_are_ignored_and_priority_orders_findings() {
        let rules = vec![
            BusinessRule::new("t", RuleKind::Required { field: "x".into() }, "second")
                .with_priority(5),
            BusinessRule::new("t", RuleKind::Required { field: "x".into() }, "first")
                .with_priority(1),
            BusinessRule::new("t", RuleKind::Required { field: "x".into() }, "never").inactive(),
        ];
        let evaluator = RuleEvaluator::new(&rules, None, &RuleConfig::default());
        let findings = evaluator.evaluate(&records("x", &[""]));
        let messages = findings[&0].iter().map(|e| e.message.as_str()).collect::<Vec<_>>();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn schema_unique_fields_add_implicit_rules() {
        let schema = Schema::new(
            "t",
            "t",
            vec![Field::new("email", FieldType::Email).unique()],
        )
        .unwrap();
        let evaluator = RuleEvaluator::new(&[], Some(&schema), &RuleConfig::default());
        let findings = evaluator.evaluate(&records("email", &["a@x.com", "a@x.com"]));
        assert_eq!(findings[&1][0].message, "Email must be unique");

        let explicit = BusinessRule::new(
            "t",
            RuleKind::Unique {
                field: "email".into(),
            },
            "duplicate email",
        );
        let evaluator = RuleEvaluator::new(&[explicit], Some(&schema), &RuleConfig::default());
        let findings = evaluator.evaluate(&records("email", &["a@x.com", "a@x.com"]));
        assert_eq!(findings[&1].len(), 1);
        assert_eq!(findings[&1][0].message, "duplicate email");
    }

    #[test]
    fn rules_deserialize_from_yaml() {
        let yaml = r#"
- type: range_check
  field: age
  min: 0
  error_message: age must be positive
  priority: 2
- type: cross_field
  condition: end >= start
  error_message: end before start
  severity: warning
"#;
        let rules: Vec<BusinessRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules[0].active);
        assert_eq!(
            rules[0].kind,
            RuleKind::RangeCheck {
                field: "age".into(),
                min: Some(0.0),
                max: None
            }
        );
        assert_eq!(rules[1].severity, Severity::Warning);
        assert!(rules.iter().all(|rule| rule.check().is_ok()));
    }
}
