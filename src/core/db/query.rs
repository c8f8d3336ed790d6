/// Query Result Module
///
/// This module defines the typed values that flow between the database and
/// the CSV engines, and the sink interface result sets are streamed into.
/// Rows are handed over one at a time so memory stays bounded by a single row.

use super::schema::DataType;
use crate::core::Result;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use std::ops::ControlFlow;

/// Fixed-width timestamp layout used for CSV text: `YYYY-MM-DD HH:MM:SS.mmm`.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A single typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Builds a value from a SQLite cell, refined by the column's declared type.
    ///
    /// SQLite has no boolean or timestamp storage class, so integers in bit
    /// columns become booleans and parseable text in temporal columns becomes
    /// a timestamp.
    pub fn from_sqlite(value: ValueRef<'_>, data_type: DataType) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) if data_type == DataType::Bit => Value::Bool(i != 0),
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => {
                let text = String::from_utf8_lossy(t).into_owned();
                if data_type == DataType::Temporal {
                    if let Some(ts) = parse_timestamp(&text) {
                        return Value::DateTime(ts);
                    }
                }
                Value::Text(text)
            }
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::DateTime(ts) => {
                ToSqlOutput::Owned(SqlValue::Text(ts.format(DATETIME_FORMAT).to_string()))
            }
        })
    }
}

/// Parses the timestamp layouts accepted in CSV files and SQLite text cells.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Name and type of one result-set column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: DataType,
}

/// Receiver for a streamed result set.
///
/// `columns` is called exactly once, before the first row. Returning
/// `ControlFlow::Break` from `row` stops the scan early.
pub trait RowSink {
    fn columns(&mut self, columns: &[ColumnMeta]) -> Result<()>;

    fn row(&mut self, row: Vec<Value>) -> Result<ControlFlow<()>>;
}
