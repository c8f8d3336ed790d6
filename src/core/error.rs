/// sqlcsv Error Module
///
/// This module defines the error types shared by the escaper, the type
/// converter and both transfer engines.
use thiserror::Error;

/// A malformed identifier or qualified name.
///
/// This is the only error the identifier escaper produces. Callers must never
/// fall back to interpolating the raw text when they receive one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason} (in {input:?})")]
pub struct ParseError {
    /// Human-readable description of what is wrong
    pub reason: String,
    /// The text that failed to parse
    pub input: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>, input: impl Into<String>) -> Self {
        ParseError {
            reason: reason.into(),
            input: input.into(),
        }
    }
}

/// A single CSV field that cannot become a typed column value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot convert {value:?} for column {column}: {reason}")]
pub struct ConversionError {
    pub column: String,
    pub value: String,
    pub reason: String,
}

impl ConversionError {
    pub fn new(
        column: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConversionError {
            column: column.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Error classes as seen by callers deciding how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or contradictory request fields, caught before any I/O
    Config,
    /// Malformed identifier or qualified name
    Parse,
    /// A field could not be converted to a typed value
    Conversion,
    /// File, CSV stream or database failure
    Io,
    /// CSV header or table layout does not match the target
    SchemaMismatch,
}

/// Comprehensive error type for sqlcsv.
///
/// Covers every failure a transfer can hit:
/// - request validation and configuration files
/// - identifier parsing
/// - per-field conversion and per-row rejection
/// - database, CSV and file system operations
#[derive(Error, Debug)]
pub enum SqlCsvError {
    /// Request validation and configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file syntax errors
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// Malformed table, schema or column names
    #[error("Identifier error: {0}")]
    Parse(#[from] ParseError),

    /// Field conversion errors
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Header or table layout mismatches
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Database-related errors from SQLite operations
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// CSV reader and writer errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record whose field count disagrees with the target column count
    #[error("record has {found} fields, expected {expected}")]
    FieldCount { expected: usize, found: usize },

    /// A row failure that aborted a strict import
    #[error("row at line {line} rejected: {source}")]
    RowRejected {
        line: u64,
        #[source]
        source: Box<SqlCsvError>,
    },
}

impl SqlCsvError {
    /// Maps the variant onto the reporting taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SqlCsvError::Config(_) | SqlCsvError::ConfigFile(_) => ErrorKind::Config,
            SqlCsvError::Parse(_) => ErrorKind::Parse,
            SqlCsvError::Conversion(_) | SqlCsvError::FieldCount { .. } => ErrorKind::Conversion,
            SqlCsvError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            SqlCsvError::Database(_) | SqlCsvError::Csv(_) | SqlCsvError::Io(_) => ErrorKind::Io,
            SqlCsvError::RowRejected { source, .. } => source.kind(),
        }
    }

    /// Source line of the rejected row, if this error came from one.
    pub fn line(&self) -> Option<u64> {
        match self {
            SqlCsvError::RowRejected { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Type alias for Result to use SqlCsvError as the error type.
pub type Result<T> = std::result::Result<T, SqlCsvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let db_err = SqlCsvError::Database(rusqlite::Error::ExecuteReturnedResults);
        assert!(db_err.to_string().contains("Database error"));

        let config_err = SqlCsvError::Config("batch size must be greater than zero".to_string());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: batch size must be greater than zero"
        );

        let parse_err = SqlCsvError::from(ParseError::new("too many name parts", "a.b.c.d.e"));
        assert!(parse_err.to_string().contains("too many name parts"));
        assert!(parse_err.to_string().contains("a.b.c.d.e"));
    }

    #[test]
    fn test_conversion_error_names_value_and_column() {
        let err = ConversionError::new("active", "maybe", "not a boolean token");
        assert_eq!(
            err.to_string(),
            "cannot convert \"maybe\" for column active: not a boolean token"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SqlCsvError = io_err.into();
        match err {
            SqlCsvError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_row_rejected_inherits_kind() {
        let err = SqlCsvError::RowRejected {
            line: 6,
            source: Box::new(ConversionError::new("id", "x", "not an integer").into()),
        };
        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert_eq!(err.line(), Some(6));
        assert!(err.to_string().starts_with("row at line 6 rejected"));

        let count = SqlCsvError::FieldCount { expected: 3, found: 2 };
        assert_eq!(count.kind(), ErrorKind::Conversion);
        assert_eq!(count.line(), None);
    }
}
