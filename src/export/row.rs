//! Row model for exports
//!
//! Rows are exposed to the transcoder through the [`Record`] trait, which
//! yields named, typed fields in a fixed order. The field list is captured
//! once per job in a [`Schema`] and every later row is checked against it.

use std::fmt;

use crate::error::ExportError;

/// A single scalar value of a record field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::UInt(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// A flat record with named fields in a fixed order
pub trait Record {
    /// Field names and values, in output order
    fn fields(&self) -> Vec<(&'static str, FieldValue)>;

    /// Ordinal used for diagnostics
    fn ordinal(&self) -> u64;
}

/// A report row as produced by the row source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: u64,
    pub name: String,
    pub value: i64,
    pub timestamp: String,
}

impl Record for Row {
    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("id", FieldValue::UInt(self.id)),
            ("name", FieldValue::Text(self.name.clone())),
            ("value", FieldValue::Int(self.value)),
            ("timestamp", FieldValue::Text(self.timestamp.clone())),
        ]
    }

    fn ordinal(&self) -> u64 {
        self.id
    }
}

/// An ordered group of rows fetched together
pub type Batch<R> = Vec<R>;

/// Column list derived from the first row of an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<&'static str>,
}

impl Schema {
    /// Derive the schema from the first record of a job
    pub fn from_record<R: Record>(record: &R) -> Self {
        Self {
            columns: record.fields().into_iter().map(|(name, _)| name).collect(),
        }
    }

    /// Column names in output order
    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    /// Render a record's values in schema order
    ///
    /// Fails with `SchemaMismatch` when the record's field set or order
    /// differs from the schema.
    pub fn render<R: Record>(&self, record: &R) -> Result<Vec<String>, ExportError> {
        let fields = record.fields();
        let matches = fields.len() == self.columns.len()
            && fields
                .iter()
                .zip(&self.columns)
                .all(|((name, _), column)| name == column);

        if !matches {
            return Err(ExportError::SchemaMismatch {
                row: record.ordinal(),
                expected: self.columns.join(","),
                found: fields
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(","),
            });
        }

        Ok(fields.into_iter().map(|(_, v)| v.to_string()).collect())
    }
}
