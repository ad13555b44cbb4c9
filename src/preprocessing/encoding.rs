//! CategoricalEncoder: binary codes and drop-first one-hot expansion

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::data::table::{Column, Table};
use crate::error::{PipelineError, Result};

/// Code written for a binary column value absent from the fitted mapping.
pub const UNKNOWN_CODE: f64 = -1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnEncoding {
    /// `categories[0]` encodes as 0, `categories[1]` as 1.
    Binary { categories: [String; 2] },
    /// `categories[0]` is the reference level and gets no indicator column.
    OneHot { categories: Vec<String> },
}

impl ColumnEncoding {
    fn fit(categories: BTreeSet<String>) -> Self {
        let categories: Vec<String> = categories.into_iter().collect();
        match <[String; 2]>::try_from(categories) {
            Ok(pair) => ColumnEncoding::Binary { categories: pair },
            Err(categories) => ColumnEncoding::OneHot { categories },
        }
    }

    /// Names of the columns this encoding emits for `column`.
    pub fn output_columns(&self, column: &str) -> Vec<String> {
        match self {
            ColumnEncoding::Binary { .. } => vec![column.to_string()],
            ColumnEncoding::OneHot { categories } => categories
                .iter()
                .skip(1)
                .map(|c| format!("{}_{}", column, c))
                .collect(),
        }
    }
}

/// Fitted mapping, keyed by source column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingMap {
    pub columns: BTreeMap<String, ColumnEncoding>,
}

impl EncodingMap {
    /// Encodes the mapped columns of `table` in place. Returns the number of
    /// cells that did not match a fitted category, per column.
    pub fn apply(&self, table: &mut Table) -> BTreeMap<String, usize> {
        let mut unknown = BTreeMap::new();
        for (name, encoding) in &self.columns {
            let Some(column) = table.column(name) else {
                continue;
            };
            let keys: Vec<Option<String>> = (0..column.len()).map(|i| column.key(i)).collect();
            let mut misses = 0;

            let replacement = match encoding {
                ColumnEncoding::Binary { categories } => {
                    let codes = keys
                        .iter()
                        .map(|k| match k.as_deref() {
                            Some(v) if v == categories[0] => 0.0,
                            Some(v) if v == categories[1] => 1.0,
                            _ => {
                                misses += 1;
                                UNKNOWN_CODE
                            }
                        })
                        .collect();
                    vec![(name.clone(), Column::Numeric(codes))]
                }
                ColumnEncoding::OneHot { categories } => {
                    let mut indicators: Vec<(String, Column)> = categories
                        .iter()
                        .skip(1)
                        .map(|c| (format!("{}_{}", name, c), Column::Numeric(vec![0.0; keys.len()])))
                        .collect();
                    for (row, key) in keys.iter().enumerate() {
                        match key.as_deref().and_then(|k| categories.iter().position(|c| c == k)) {
                            Some(0) => {}
                            Some(i) => {
                                if let Column::Numeric(values) = &mut indicators[i - 1].1 {
                                    values[row] = 1.0;
                                }
                            }
                            None => misses += 1,
                        }
                    }
                    indicators
                }
            };

            if misses > 0 {
                tracing::warn!("{} values of {} not seen at fit time", misses, name);
                unknown.insert(name.clone(), misses);
            }
            table.splice(name, replacement);
        }
        unknown
    }
}

pub struct CategoricalEncoder {
    map: Option<EncodingMap>,
}

impl CategoricalEncoder {
    pub fn new() -> Self {
        Self { map: None }
    }

    /// Fits one encoding per text column not listed in `exclude`.
    pub fn fit(&mut self, table: &Table, exclude: &BTreeSet<String>) -> &EncodingMap {
        let columns = table
            .iter()
            .filter(|(name, column)| !column.is_numeric() && !exclude.contains(*name))
            .map(|(name, column)| (name.to_string(), ColumnEncoding::fit(column.categories())))
            .collect();
        self.map.insert(EncodingMap { columns })
    }

    pub fn transform(&self, table: &mut Table) -> Result<BTreeMap<String, usize>> {
        let map = self.map.as_ref().ok_or(PipelineError::NotFitted("categorical encoder"))?;
        Ok(map.apply(table))
    }

    pub fn map(&self) -> Option<&EncodingMap> {
        self.map.as_ref()
    }

    pub fn into_map(self) -> Option<EncodingMap> {
        self.map
    }
}

impl Default for CategoricalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(values: &[&str]) -> Column {
        Column::Text(values.iter().map(|v| Some(v.to_string())).collect())
    }

    fn sample() -> Table {
        Table::from_columns(vec![
            ("sex", text(&["M", "F", "F"])),
            ("Mjob", text(&["teacher", "health", "at_home"])),
            ("age", Column::Numeric(vec![15.0, 16.0, 17.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_binary_and_one_hot_in_place() {
        let mut table = sample();
        let mut encoder = CategoricalEncoder::new();
        encoder.fit(&table, &BTreeSet::new());
        let unknown = encoder.transform(&mut table).unwrap();

        assert!(unknown.is_empty());
        assert_eq!(table.names(), &["sex", "Mjob_health", "Mjob_teacher", "age"]);
        assert_eq!(table.numeric("sex").unwrap(), &[1.0, 0.0, 0.0]);
        assert_eq!(table.numeric("Mjob_teacher").unwrap(), &[1.0, 0.0, 0.0]);
        assert_eq!(table.numeric("Mjob_health").unwrap(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_unseen_categories_use_unknown_bucket() {
        let mut encoder = CategoricalEncoder::new();
        encoder.fit(&sample(), &BTreeSet::new());

        let mut novel = Table::from_columns(vec![
            ("sex", text(&["F", "X"])),
            ("Mjob", text(&["services", "teacher"])),
        ])
        .unwrap();
        let unknown = encoder.transform(&mut novel).unwrap();

        assert_eq!(novel.numeric("sex").unwrap(), &[0.0, UNKNOWN_CODE]);
        assert_eq!(novel.numeric("Mjob_health").unwrap(), &[0.0, 0.0]);
        assert_eq!(novel.numeric("Mjob_teacher").unwrap(), &[0.0, 1.0]);
        assert_eq!(unknown.get("sex"), Some(&1));
        assert_eq!(unknown.get("Mjob"), Some(&1));
    }

    #[test]
    fn test_same_value_same_code_across_applications() {
        let mut encoder = CategoricalEncoder::new();
        encoder.fit(&sample(), &BTreeSet::new());
        let map = encoder.map().unwrap().clone();

        let mut first = sample();
        let mut second = sample().select_rows(&[2, 1, 0]);
        map.apply(&mut first);
        map.apply(&mut second);
        assert_eq!(first.numeric("sex").unwrap()[0], second.numeric("sex").unwrap()[2]);
    }

    #[test]
    fn test_transform_requires_fit() {
        let encoder = CategoricalEncoder::new();
        assert!(matches!(
            encoder.transform(&mut sample()),
            Err(PipelineError::NotFitted(_))
        ));
    }

    #[test]
    fn test_excluded_columns_stay_raw() {
        let mut table = sample();
        let mut encoder = CategoricalEncoder::new();
        encoder.fit(&table, &BTreeSet::from(["Mjob".to_string()]));
        encoder.transform(&mut table).unwrap();
        assert!(table.text("Mjob").is_some());
    }
}
