//! LeakageGuard: forbidden-column removal and partition integrity

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::data::table::Table;
use crate::error::{PipelineError, Result};
use crate::profile::SourceProfile;
use crate::types::LABEL_COLUMN;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeakageSummary {
    pub forbidden_columns: Vec<String>,
    pub forbidden_suffixes: Vec<String>,
    pub emergency_removals: Vec<String>,
    pub train_entities: usize,
    pub test_entities: usize,
    pub entity_overlap: usize,
}

pub struct LeakageGuard {
    source: String,
    forbidden: BTreeSet<String>,
    suffixes: Vec<String>,
}

impl LeakageGuard {
    pub fn new(source: impl Into<String>, forbidden: BTreeSet<String>, suffixes: Vec<String>) -> Self {
        Self {
            source: source.into(),
            forbidden,
            suffixes,
        }
    }

    pub fn from_profile(profile: &SourceProfile) -> Self {
        Self::new(
            profile.name.clone(),
            profile.forbidden_set(),
            profile.forbidden_suffixes.clone(),
        )
    }

    pub fn is_forbidden(&self, column: &str) -> bool {
        column != LABEL_COLUMN
            && (self.forbidden.contains(column) || self.suffixes.iter().any(|s| column.ends_with(s.as_str())))
    }

    pub fn summary(&self) -> LeakageSummary {
        LeakageSummary {
            forbidden_columns: self.forbidden.iter().cloned().collect(),
            forbidden_suffixes: self.suffixes.clone(),
            ..LeakageSummary::default()
        }
    }

    /// Removes every forbidden column still present, plus any numeric
    /// column identical to the label. Returns the removed names.
    pub fn scan(&self, table: &mut Table) -> Vec<String> {
        let mut leaked: Vec<String> = table
            .names()
            .iter()
            .filter(|name| self.is_forbidden(name))
            .cloned()
            .collect();

        if let Some(label) = table.numeric(LABEL_COLUMN) {
            for (name, column) in table.iter() {
                if name == LABEL_COLUMN || leaked.iter().any(|l| l == name) {
                    continue;
                }
                if column.as_numeric().map_or(false, |values| values == label) {
                    leaked.push(name.to_string());
                }
            }
        }

        for name in &leaked {
            tracing::error!("{}: emergency removal of leaking column {}", self.source, name);
        }
        table.drop_columns(&leaked)
    }

    /// Fails when any entity id appears on both sides of the split.
    pub fn verify_disjoint<S: AsRef<str>>(&self, train: &[S], test: &[S]) -> Result<(usize, usize)> {
        let train: BTreeSet<&str> = train.iter().map(AsRef::as_ref).collect();
        let test: BTreeSet<&str> = test.iter().map(AsRef::as_ref).collect();
        let overlap: Vec<String> = train.intersection(&test).map(|s| s.to_string()).collect();
        if !overlap.is_empty() {
            tracing::error!(
                "{}: {} entities appear in both train and test",
                self.source,
                overlap.len()
            );
            return Err(PipelineError::LeakageDetected {
                overlap: overlap.len(),
                sample: overlap.into_iter().take(5).collect(),
            });
        }
        tracing::info!(
            "{}: partitions disjoint ({} train / {} test entities)",
            self.source,
            train.len(),
            test.len()
        );
        Ok((train.len(), test.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::Column;

    #[test]
    fn test_scan_removes_forbidden_and_label_copies() {
        let guard = LeakageGuard::from_profile(&SourceProfile::uci());
        let mut table = Table::from_columns(vec![
            ("age", Column::Numeric(vec![15.0, 16.0, 17.0])),
            ("G3", Column::Numeric(vec![10.0, 12.0, 14.0])),
            ("G1_percentile", Column::Numeric(vec![0.3, 0.6, 1.0])),
            ("label_copy", Column::Numeric(vec![0.0, 1.0, 2.0])),
            (LABEL_COLUMN, Column::Numeric(vec![0.0, 1.0, 2.0])),
        ])
        .unwrap();

        let removed = guard.scan(&mut table);

        assert_eq!(removed, vec!["G3", "G1_percentile", "label_copy"]);
        assert_eq!(table.names(), &["age", LABEL_COLUMN]);
    }

    #[test]
    fn test_verify_disjoint() {
        let guard = LeakageGuard::from_profile(&SourceProfile::ou());
        assert_eq!(guard.verify_disjoint(&["1", "2"], &["3"]).unwrap(), (2, 1));

        let err = guard.verify_disjoint(&["1", "2", "2"], &["2", "4"]).unwrap_err();
        match err {
            PipelineError::LeakageDetected { overlap, sample } => {
                assert_eq!(overlap, 1);
                assert_eq!(sample, vec!["2".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
