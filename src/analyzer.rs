//! Per-column statistics behind schema inference.
//!
//! [`ColumnAccumulator`] sees each value once, counting predicate hits per
//! [`TypeTag`] along with temporal formats, numeric bounds and lengths.
//! [`ColumnAccumulator::finish`] turns the counts into a [`ColumnAnalysis`]
//! using the thresholds from [`InferenceConfig`].

use serde::Serialize;

use crate::{
    classify::{TypeTag, classify, parse_number},
    config::InferenceConfig,
    schema::FieldType,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericProfile {
    pub min: f64,
    pub max: f64,
    pub integer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LengthProfile {
    pub min: usize,
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnAnalysis {
    pub total: usize,
    pub non_empty: usize,
    pub required: bool,
    pub required_confidence: f64,
    pub data_type: FieldType,
    pub confidence: f64,
    /// Share of non-empty values matching each tag that matched at least once.
    pub type_scores: Vec<(TypeTag, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<LengthProfile>,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnAccumulator {
    total: usize,
    non_empty: usize,
    matches: [usize; TypeTag::ALL.len()],
    date_formats: Vec<(&'static str, usize)>,
    datetime_formats: Vec<(&'static str, usize)>,
    numeric: Option<NumericProfile>,
    length: Option<LengthProfile>,
}

impl ColumnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: &str) {
        self.total += 1;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        self.non_empty += 1;

        let chars = trimmed.chars().count();
        self.length = Some(match self.length {
            Some(profile) => LengthProfile {
                min: profile.min.min(chars),
                max: profile.max.max(chars),
            },
            None => LengthProfile {
                min: chars,
                max: chars,
            },
        });

        let tags = classify(trimmed);
        for tag in tags.iter() {
            self.matches[tag.index()] += 1;
        }
        if let Some(format) = tags.date_format {
            bump(&mut self.date_formats, format);
        }
        if let Some(format) = tags.datetime_format {
            bump(&mut self.datetime_formats, format);
        }
        if let Some(number) = parse_number(trimmed) {
            let integral = number.fract() == 0.0;
            self.numeric = Some(match self.numeric {
                Some(profile) => NumericProfile {
                    min: profile.min.min(number),
                    max: profile.max.max(number),
                    integer: profile.integer && integral,
                },
                None => NumericProfile {
                    min: number,
                    max: number,
                    integer: integral,
                },
            });
        }
    }

    pub fn finish(self, config: &InferenceConfig) -> ColumnAnalysis {
        if self.non_empty == 0 {
            return ColumnAnalysis {
                total: self.total,
                non_empty: 0,
                required: false,
                required_confidence: 0.0,
                data_type: FieldType::String,
                confidence: config.empty_column_confidence,
                type_scores: Vec::new(),
                format: None,
                numeric: None,
                length: None,
            };
        }

        let required_confidence = self.non_empty as f64 / self.total as f64;
        let type_scores = TypeTag::ALL
            .into_iter()
            .filter(|tag| self.matches[tag.index()] > 0)
            .map(|tag| (tag, self.matches[tag.index()] as f64 / self.non_empty as f64))
            .collect::<Vec<_>>();

        let mut best: Option<(TypeTag, usize)> = None;
        for tag in TypeTag::ALL {
            let count = self.matches[tag.index()];
            if count > 0 && best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((tag, count));
            }
        }

        let candidate = best
            .map(|(tag, count)| (tag, count as f64 / self.non_empty as f64))
            .filter(|(_, confidence)| *confidence >= config.type_threshold);

        let (data_type, confidence) = match candidate {
            Some((tag, confidence)) => (tag.field_type(), confidence),
            None => (FieldType::String, config.fallback_confidence),
        };

        let format = match data_type {
            FieldType::Date => most_frequent(&self.date_formats),
            FieldType::DateTime => most_frequent(&self.datetime_formats),
            _ => None,
        };

        ColumnAnalysis {
            total: self.total,
            non_empty: self.non_empty,
            required: required_confidence >= config.required_threshold,
            required_confidence,
            data_type,
            confidence,
            type_scores,
            format,
            numeric: (data_type == FieldType::Number)
                .then_some(self.numeric)
                .flatten(),
            length: (data_type == FieldType::String)
                .then_some(self.length)
                .flatten(),
        }
    }
}

fn bump(counts: &mut Vec<(&'static str, usize)>, label: &'static str) {
    match counts.iter_mut().find(|(existing, _)| *existing == label) {
        Some((_, count)) => *count += 1,
        None => counts.push((label, 1)),
    }
}

/// First-seen label wins ties.
fn most_frequent(counts: &[(&'static str, usize)]) -> Option<String> {
    let mut best: Option<(&'static str, usize)> = None;
    for &(label, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label.to_string())
}

pub fn analyze_column<'a, I>(values: I, config: &InferenceConfig) -> ColumnAnalysis
where
    I: IntoIterator<Item = &'a str>,
{
    let mut accumulator = ColumnAccumulator::new();
    for value in values {
        accumulator.update(value);
    }
    accumulator.finish(config)
}
