//! Column-oriented table passed between pipeline stages

use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::types::Shape;

/// Cell values treated as missing when reading CSV files.
const MISSING_MARKERS: [&str; 5] = ["", "?", "NA", "NaN", "null"];

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// `NaN` marks a missing value.
    Numeric(Vec<f64>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Column::Numeric(values) => Some(values),
            Column::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&[Option<String>]> {
        match self {
            Column::Text(values) => Some(values),
            Column::Numeric(_) => None,
        }
    }

    pub fn missing_count(&self) -> usize {
        match self {
            Column::Numeric(values) => values.iter().filter(|v| v.is_nan()).count(),
            Column::Text(values) => values.iter().filter(|v| v.is_none()).count(),
        }
    }

    pub fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Numeric(values) => Column::Numeric(rows.iter().map(|&i| values[i]).collect()),
            Column::Text(values) => Column::Text(rows.iter().map(|&i| values[i].clone()).collect()),
        }
    }

    /// Cell rendered as a join/entity key. Integral numbers drop the fraction.
    pub fn key(&self, row: usize) -> Option<String> {
        match self {
            Column::Numeric(values) => {
                let v = values[row];
                if v.is_nan() {
                    None
                } else {
                    Some(format_number(v))
                }
            }
            Column::Text(values) => values[row].clone(),
        }
    }

    /// Cell rendered for CSV output; missing values become empty cells.
    pub fn cell(&self, row: usize) -> String {
        self.key(row).unwrap_or_default()
    }

    /// Distinct non-missing text values, sorted.
    pub fn categories(&self) -> BTreeSet<String> {
        match self {
            Column::Text(values) => values.iter().flatten().cloned().collect(),
            Column::Numeric(_) => BTreeSet::new(),
        }
    }

    /// Number of distinct non-missing values.
    pub fn distinct_count(&self) -> usize {
        match self {
            Column::Text(_) => self.categories().len(),
            Column::Numeric(values) => values
                .iter()
                .filter(|v| !v.is_nan())
                .map(|v| v.to_bits())
                .collect::<BTreeSet<_>>()
                .len(),
        }
    }
}

pub fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    /// Empty table with a fixed row count and no columns yet.
    pub fn new(n_rows: usize) -> Self {
        Self {
            names: Vec::new(),
            columns: Vec::new(),
            n_rows,
        }
    }

    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut table: Option<Table> = None;
        for (name, column) in columns {
            let name = name.into();
            let t = table.get_or_insert_with(|| Table::new(column.len()));
            if column.len() != t.n_rows {
                return Err(PipelineError::schema(
                    "table",
                    format!("column {} has {} rows, expected {}", name, column.len(), t.n_rows),
                ));
            }
            if t.contains(&name) {
                return Err(PipelineError::schema("table", format!("duplicate column {}", name)));
            }
            t.names.push(name);
            t.columns.push(column);
        }
        Ok(table.unwrap_or_default())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn shape(&self) -> Shape {
        Shape {
            rows: self.n_rows,
            cols: self.columns.len(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|i| &self.columns[i])
    }

    pub fn numeric(&self, name: &str) -> Option<&[f64]> {
        self.column(name).and_then(Column::as_numeric)
    }

    pub fn text(&self, name: &str) -> Option<&[Option<String>]> {
        self.column(name).and_then(Column::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    pub fn numeric_names(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, c)| c.is_numeric())
            .map(|(n, _)| n.to_string())
            .collect()
    }

    pub fn text_names(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, c)| !c.is_numeric())
            .map(|(n, _)| n.to_string())
            .collect()
    }

    /// Inserts a column, replacing an existing one with the same name in place.
    ///
    /// Panics if the column length differs from the table's row count.
    pub fn set_column(&mut self, name: impl Into<String>, column: Column) {
        let name = name.into();
        assert_eq!(
            column.len(),
            self.n_rows,
            "column {} has {} rows, table has {}",
            name,
            column.len(),
            self.n_rows
        );
        match self.position(&name) {
            Some(i) => self.columns[i] = column,
            None => {
                self.names.push(name);
                self.columns.push(column);
            }
        }
    }

    pub fn set_numeric(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.set_column(name, Column::Numeric(values));
    }

    pub fn set_text(&mut self, name: impl Into<String>, values: Vec<Option<String>>) {
        self.set_column(name, Column::Text(values));
    }

    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        let i = self.position(name)?;
        self.names.remove(i);
        Some(self.columns.remove(i))
    }

    /// Drops every listed column that exists, returning the names actually removed.
    pub fn drop_columns<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<String> {
        names
            .iter()
            .filter_map(|n| self.drop_column(n.as_ref()).map(|_| n.as_ref().to_string()))
            .collect()
    }

    /// Replaces `name` with `replacement` columns at the same position.
    pub fn splice(&mut self, name: &str, replacement: Vec<(String, Column)>) -> bool {
        let Some(i) = self.position(name) else {
            return false;
        };
        self.names.remove(i);
        self.columns.remove(i);
        for (offset, (new_name, column)) in replacement.into_iter().enumerate() {
            assert_eq!(column.len(), self.n_rows, "spliced column {} has wrong length", new_name);
            self.names.insert(i + offset, new_name);
            self.columns.insert(i + offset, column);
        }
        true
    }

    pub fn select_rows(&self, rows: &[usize]) -> Table {
        Table {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.select(rows)).collect(),
            n_rows: rows.len(),
        }
    }

    /// Keeps only the listed columns, in the listed order.
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Table> {
        let mut out = Table::new(self.n_rows);
        for name in names {
            let column = self.column(name.as_ref()).ok_or_else(|| {
                PipelineError::schema("table", format!("column {} not found", name.as_ref()))
            })?;
            out.set_column(name.as_ref(), column.clone());
        }
        Ok(out)
    }

    /// Cell keys of one column, used for entity ids and join keys.
    pub fn keys(&self, name: &str) -> Option<Vec<Option<String>>> {
        let column = self.column(name)?;
        Some((0..self.n_rows).map(|row| column.key(row)).collect())
    }

    /// Stacks tables with identical schemas row-wise.
    pub fn vstack(tables: Vec<Table>) -> Result<Table> {
        let mut iter = tables.into_iter();
        let Some(mut out) = iter.next() else {
            return Ok(Table::default());
        };
        for table in iter {
            if table.names != out.names {
                return Err(PipelineError::schema(
                    "table",
                    "cannot stack tables with different columns",
                ));
            }
            for (dst, src) in out.columns.iter_mut().zip(table.columns) {
                let current = std::mem::replace(dst, Column::Numeric(Vec::new()));
                *dst = match (current, src) {
                    (Column::Numeric(mut a), Column::Numeric(b)) => {
                        a.extend(b);
                        Column::Numeric(a)
                    }
                    (Column::Text(mut a), Column::Text(b)) => {
                        a.extend(b);
                        Column::Text(a)
                    }
                    // Mixed types fall back to text.
                    (a, b) => {
                        let mut merged = into_text(a);
                        merged.extend(into_text(b));
                        Column::Text(merged)
                    }
                };
            }
            out.n_rows += table.n_rows;
        }
        Ok(out)
    }

    /// Left join on `key`: every row of `self` is kept, columns of `other`
    /// (except the key) are appended. The first matching row of `other` wins.
    pub fn left_join(&self, other: &Table, key: &str) -> Result<Table> {
        let left_keys = self
            .keys(key)
            .ok_or_else(|| PipelineError::schema("join", format!("left table lacks key {}", key)))?;
        let right_keys = other
            .keys(key)
            .ok_or_else(|| PipelineError::schema("join", format!("right table lacks key {}", key)))?;

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (row, k) in right_keys.iter().enumerate() {
            if let Some(k) = k {
                index.entry(k.as_str()).or_insert(row);
            }
        }
        let matches: Vec<Option<usize>> = left_keys
            .iter()
            .map(|k| k.as_deref().and_then(|k| index.get(k).copied()))
            .collect();

        let mut out = self.clone();
        for (name, column) in other.iter() {
            if name == key {
                continue;
            }
            if out.contains(name) {
                return Err(PipelineError::schema(
                    "join",
                    format!("column {} exists on both sides", name),
                ));
            }
            let joined = match column {
                Column::Numeric(values) => Column::Numeric(
                    matches.iter().map(|m| m.map_or(f64::NAN, |i| values[i])).collect(),
                ),
                Column::Text(values) => Column::Text(
                    matches.iter().map(|m| m.and_then(|i| values[i].clone())).collect(),
                ),
            };
            out.set_column(name, joined);
        }
        Ok(out)
    }

    /// Reads a delimited file, inferring each column as numeric when every
    /// present cell parses as a number.
    pub fn read_csv<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Table> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PipelineError::MissingSourceFile {
                path: path.to_path_buf(),
            });
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, delimiter)
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Table> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::Fields)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (i, cell) in record.iter().enumerate() {
                let value = if MISSING_MARKERS.contains(&cell) {
                    None
                } else {
                    Some(cell.to_string())
                };
                raw[i].push(value);
            }
        }

        Table::from_columns(headers.into_iter().zip(raw.into_iter().map(infer_column)))
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.names)?;
        for row in 0..self.n_rows {
            writer.write_record(self.columns.iter().map(|c| c.cell(row)))?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn into_text(column: Column) -> Vec<Option<String>> {
    match column {
        Column::Text(values) => values,
        Column::Numeric(values) => values
            .into_iter()
            .map(|v| (!v.is_nan()).then(|| format_number(v)))
            .collect(),
    }
}

fn infer_column(cells: Vec<Option<String>>) -> Column {
    let parsed: Option<Vec<f64>> = cells
        .iter()
        .map(|cell| match cell {
            None => Some(f64::NAN),
            Some(s) => s.parse::<f64>().ok(),
        })
        .collect();
    match parsed {
        Some(values) => Column::Numeric(values),
        None => Column::Text(cells),
    }
}
