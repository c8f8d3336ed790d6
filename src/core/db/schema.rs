/// Schema Introspection Module
///
/// This module maps declared column types onto the small set of type tags the
/// converter understands, and reads column metadata for import targets.

use crate::core::{Result, SqlCsvError};
use crate::escape::QualifiedName;
use rusqlite::{Connection, Row};

/// Type tag of a column, derived from its declared type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// TINYINT, SMALLINT, INT, BIGINT and SQLite INTEGER
    Integer,
    /// REAL, FLOAT, DOUBLE
    Float,
    /// DECIMAL, NUMERIC, MONEY; kept as text to avoid losing precision
    Decimal,
    /// BIT, BOOLEAN
    Bit,
    /// BINARY, VARBINARY, IMAGE, BLOB, ROWVERSION
    Binary,
    /// GEOMETRY, GEOGRAPHY
    Spatial,
    /// HIERARCHYID
    Hierarchy,
    /// DATE, TIME, DATETIME, DATETIME2, SMALLDATETIME, DATETIMEOFFSET, TIMESTAMP
    Temporal,
    /// UNIQUEIDENTIFIER
    Guid,
    /// Character types and anything unrecognised
    Text,
}

impl DataType {
    /// Classifies a declared type such as `NVARCHAR(50)` or `VARBINARY(16)`.
    ///
    /// Known type names match exactly; everything else falls back to SQLite's
    /// affinity rules.
    pub fn from_declared(declared: &str) -> Self {
        let base = declared
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_uppercase();

        match base.as_str() {
            "BIT" | "BOOL" | "BOOLEAN" => DataType::Bit,
            "BINARY" | "VARBINARY" | "IMAGE" | "BLOB" | "ROWVERSION" => DataType::Binary,
            "GEOMETRY" | "GEOGRAPHY" => DataType::Spatial,
            "HIERARCHYID" => DataType::Hierarchy,
            "UNIQUEIDENTIFIER" | "UUID" | "GUID" => DataType::Guid,
            "DATE" | "TIME" | "DATETIME" | "DATETIME2" | "SMALLDATETIME" | "DATETIMEOFFSET"
            | "TIMESTAMP" => DataType::Temporal,
            "DECIMAL" | "NUMERIC" | "MONEY" | "SMALLMONEY" => DataType::Decimal,
            _ if base.contains("INT") => DataType::Integer,
            _ if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") => {
                DataType::Text
            }
            _ if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") => {
                DataType::Float
            }
            _ => DataType::Text,
        }
    }

    /// Whether values of this type travel through the binary encoding.
    pub fn is_binary(self) -> bool {
        matches!(self, DataType::Binary | DataType::Spatial | DataType::Hierarchy)
    }
}

/// Represents an import target column with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Column name as stored in the schema
    pub name: String,
    /// Type tag derived from the declared type
    pub data_type: DataType,
    /// Whether the column allows NULL values
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        ColumnDescriptor {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    /// Creates a ColumnDescriptor from a `pragma_table_info` row
    fn from_pragma_row(row: &Row) -> rusqlite::Result<Self> {
        let declared: String = row.get(1)?;
        let notnull: bool = row.get(2)?;
        Ok(ColumnDescriptor {
            name: row.get(0)?,
            data_type: DataType::from_declared(&declared),
            nullable: !notnull,
        })
    }
}

/// Reads the ordered column list of a SQLite table.
///
/// Names are bound as parameters, never interpolated. SQLite only knows
/// `schema.table`, so longer names are rejected.
pub fn table_columns(conn: &Connection, table: &QualifiedName) -> Result<Vec<ColumnDescriptor>> {
    let mut columns = Vec::new();

    match table.parts() {
        [name] => {
            let mut stmt = conn.prepare(
                "SELECT name, type, \"notnull\" FROM pragma_table_info(?1) ORDER BY cid",
            )?;
            let column_iter = stmt.query_map([name], |row| ColumnDescriptor::from_pragma_row(row))?;
            for column_result in column_iter {
                columns.push(column_result?);
            }
        }
        [schema, name] => {
            let mut stmt = conn.prepare(
                "SELECT name, type, \"notnull\" FROM pragma_table_info(?1, ?2) ORDER BY cid",
            )?;
            let column_iter =
                stmt.query_map([name, schema], |row| ColumnDescriptor::from_pragma_row(row))?;
            for column_result in column_iter {
                columns.push(column_result?);
            }
        }
        parts => {
            return Err(SqlCsvError::Config(format!(
                "SQLite table names take at most two parts (schema.table), got {}",
                parts.len()
            )))
        }
    }

    Ok(columns)
}
