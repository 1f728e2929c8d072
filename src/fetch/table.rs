//! Tabular results.
//!
//! The service answers with a JSON array of rows whose first row is the
//! header. Values are strings or `null`; a few endpoints send bare numbers,
//! which are kept in their textual form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::FetchError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

fn invalid(message: impl Into<String>) -> FetchError {
    FetchError::InvalidResponse {
        message: message.into(),
    }
}

fn cell(value: Value) -> Result<Option<String>, FetchError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(invalid(format!("unexpected cell value {other}"))),
    }
}

impl Table {
    /// A table with no columns and no rows (the body of a 204).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self, FetchError> {
        if let Some(i) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(invalid(format!(
                "row {i} has {} cells, header has {}",
                rows[i].len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Parse a response body. An empty body is an empty table.
    pub fn parse(body: &str) -> Result<Self, FetchError> {
        if body.trim().is_empty() {
            return Ok(Self::empty());
        }
        let raw: Vec<Vec<Value>> =
            serde_json::from_str(body).map_err(|e| invalid(format!("not a JSON array of rows: {e}")))?;
        let mut iter = raw.into_iter();
        let Some(header) = iter.next() else {
            return Ok(Self::empty());
        };
        let columns = header
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(invalid(format!("header cell {other} is not a string"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rows = iter
            .map(|row| row.into_iter().map(cell).collect::<Result<Vec<_>, _>>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
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

    /// Cell at `row` in column `name`.
    pub fn value(&self, row: usize, name: &str) -> Option<&str> {
        let col = self.column_index(name)?;
        self.rows.get(row)?.get(col)?.as_deref()
    }

    /// Every cell of column `name`.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let col = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[col].as_deref()).collect())
    }
}
