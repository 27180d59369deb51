//! Dataset store.
//!
//! Holds the loaded tabular dataset and the output/input column selection.
//! Loading always replaces the dataset wholesale and resets the selection to
//! "first column is the output, every other column is an input".

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// A single cell. Untagged so rows serialize as plain JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Infer the type of a raw CSV field: empty is null, `true`/`false`
    /// are booleans, finite numbers are numbers, anything else is text.
    pub fn infer(raw: &str) -> Self {
        let t = raw.trim();
        if t.is_empty() {
            return Scalar::Null;
        }
        match t {
            "true" | "TRUE" | "True" => return Scalar::Bool(true),
            "false" | "FALSE" | "False" => return Scalar::Bool(false),
            _ => {}
        }
        match t.parse::<f64>() {
            Ok(v) if v.is_finite() => Scalar::Number(v),
            _ => Scalar::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(v) => Some(*v),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Null | Scalar::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no header row found")]
    MissingHeader,
    #[error("column {index} has an empty name")]
    EmptyColumnName { index: usize },
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("line {line}: expected {expected} fields, found {found}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("malformed CSV: {0}")]
    Csv(String),
}

impl From<csv::Error> for ParseError {
    fn from(e: csv::Error) -> Self {
        ParseError::Csv(e.to_string())
    }
}

/// Records plus their ordered, unique column names. Every record has
/// exactly one value per column, in column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Scalar>>,
}

impl Dataset {
    /// Build a dataset, checking column uniqueness and row widths.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Result<Self, ParseError> {
        if columns.is_empty() {
            return Err(ParseError::MissingHeader);
        }
        let columns = rename_numeric_columns(columns);
        let mut seen = HashSet::new();
        for (index, name) in columns.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ParseError::EmptyColumnName { index });
            }
            if !seen.insert(name.as_str()) {
                return Err(ParseError::DuplicateColumn(name.clone()));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(ParseError::RaggedRow {
                    line: i + 2,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    /// Parse CSV text whose first record is the header row. Blank lines are
    /// skipped; rows of the wrong width are reported with their line.
    pub fn from_csv(text: &str) -> Result<Self, ParseError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.trim_start_matches('\u{feff}').as_bytes());
        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        if columns.is_empty() {
            return Err(ParseError::MissingHeader);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() == 1 && record[0].trim().is_empty() {
                continue;
            }
            if record.len() != columns.len() {
                return Err(ParseError::RaggedRow {
                    line: record.position().map_or(0, |p| p.line() as usize),
                    expected: columns.len(),
                    found: record.len(),
                });
            }
            rows.push(record.iter().map(Scalar::infer).collect());
        }
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Scalar>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Numeric view of one column, index-aligned with the records.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_f64()).collect())
    }
}

/// `-?\d+(\.\d+)?`
fn is_numeric_token(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);
    let (int, frac) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    digits(int) && frac.map_or(true, digits)
}

/// Headers that are all numeric (a headerless file read with its first data
/// row as header) become `v1..vN`. Values are positional, so records follow.
fn rename_numeric_columns(columns: Vec<String>) -> Vec<String> {
    if columns.iter().all(|c| is_numeric_token(c)) {
        (1..=columns.len()).map(|i| format!("v{i}")).collect()
    } else {
        columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no dataset loaded")]
    NoDataset,
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("{0} is the output column")]
    OutputColumn(String),
}

/// Output column plus input columns. The output is never an input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariableSelection {
    pub output: Option<String>,
    /// Kept in dataset column order.
    pub inputs: Vec<String>,
}

impl VariableSelection {
    pub fn is_input(&self, column: &str) -> bool {
        self.inputs.iter().any(|c| c == column)
    }
}

#[derive(Debug, Default)]
pub struct DatasetStore {
    name: Option<String>,
    dataset: Option<Arc<Dataset>>,
    selection: VariableSelection,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and load CSV text. On failure the current dataset is kept.
    pub fn load_csv(&mut self, name: &str, raw: &str) -> Result<Arc<Dataset>, ParseError> {
        let dataset = Dataset::from_csv(raw)?;
        Ok(self.load(name, dataset))
    }

    /// Replace the dataset and reset the selection: the first column is the
    /// output and all remaining columns are inputs.
    pub fn load(&mut self, name: &str, dataset: Dataset) -> Arc<Dataset> {
        let mut columns = dataset.columns().iter().cloned();
        self.selection = VariableSelection {
            output: columns.next(),
            inputs: columns.collect(),
        };
        let dataset = Arc::new(dataset);
        self.dataset = Some(dataset.clone());
        self.name = Some(name.to_string());
        tracing::debug!(
            name,
            rows = dataset.len(),
            columns = dataset.columns().len(),
            "dataset loaded"
        );
        dataset
    }

    pub fn dataset(&self) -> Option<&Arc<Dataset>> {
        self.dataset.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn selection(&self) -> &VariableSelection {
        &self.selection
    }

    fn require_column(&self, column: &str) -> Result<&Arc<Dataset>, SelectionError> {
        let dataset = self.dataset.as_ref().ok_or(SelectionError::NoDataset)?;
        if !dataset.has_column(column) {
            return Err(SelectionError::UnknownColumn(column.to_string()));
        }
        Ok(dataset)
    }

    /// Designate the output column, dropping it from the inputs if present.
    pub fn set_output(&mut self, column: &str) -> Result<(), SelectionError> {
        self.require_column(column)?;
        self.selection.inputs.retain(|c| c != column);
        self.selection.output = Some(column.to_string());
        Ok(())
    }

    /// Add or remove an input column. Returns whether it is now selected.
    pub fn toggle_input(&mut self, column: &str) -> Result<bool, SelectionError> {
        let dataset = self.require_column(column)?.clone();
        if self.selection.output.as_deref() == Some(column) {
            return Err(SelectionError::OutputColumn(column.to_string()));
        }
        if self.selection.is_input(column) {
            self.selection.inputs.retain(|c| c != column);
            return Ok(false);
        }
        self.selection.inputs.push(column.to_string());
        let order = |c: &String| dataset.column_index(c).unwrap_or(usize::MAX);
        self.selection.inputs.sort_by_key(order);
        Ok(true)
    }

    /// Every column except the output becomes an input.
    pub fn select_all_inputs(&mut self) {
        let Some(dataset) = self.dataset.as_ref() else {
            return;
        };
        let output = self.selection.output.as_deref();
        self.selection.inputs = dataset
            .columns()
            .iter()
            .filter(|c| Some(c.as_str()) != output)
            .cloned()
            .collect();
    }

    pub fn select_no_inputs(&mut self) {
        self.selection.inputs.clear();
    }
}
