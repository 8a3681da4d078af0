use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{schema::Schema, value::Record};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStats {
    pub total: usize,
    pub nulls: usize,
    /// Distinct non-empty values, compared on their trimmed text.
    pub unique: usize,
}

/// Per-field counters gathered while rows stream through validation.
#[derive(Debug)]
pub struct StatsAccumulator {
    fields: Vec<String>,
    stats: Vec<FieldStats>,
}

impl StatsAccumulator {
    pub fn new(schema: &Schema) -> Self {
        Self {
            fields: schema.field_names(),
            stats: vec![FieldStats::default(); schema.fields.len()],
        }
    }

    pub fn ingest(&mut self, record: &Record) {
        for (name, stats) in self.fields.iter().zip(self.stats.iter_mut()) {
            stats.total += 1;
            if record.get(name).is_none_or(|value| value.is_empty()) {
                stats.nulls += 1;
            }
        }
    }

    /// Unique counts need the whole batch, so they are computed last.
    pub fn finish<'a, I>(mut self, records: I) -> BTreeMap<String, FieldStats>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut seen = vec![HashSet::new(); self.fields.len()];
        for record in records {
            for (name, values) in self.fields.iter().zip(seen.iter_mut()) {
                if let Some(text) = record.get(name).and_then(|value| value.as_text()) {
                    values.insert(text.into_owned());
                }
            }
        }
        for (stats, values) in self.stats.iter_mut().zip(&seen) {
            stats.unique = values.len();
        }
        self.fields.into_iter().zip(self.stats).collect()
    }
}
