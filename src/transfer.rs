//! Requests and outcomes shared by the export and import engines.

use crate::charset::Charset;
use crate::convert::BinaryMode;
use crate::core::{Result, SqlCsvError};
use serde::Serialize;
use std::path::PathBuf;

/// Default number of rows per import transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// CSV layout and encoding options common to both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvOptions {
    /// Whether the first record is a header row
    pub has_header: bool,
    /// Field delimiter, a single ASCII byte
    pub delimiter: u8,
    /// Encoding of byte payloads
    pub binary_mode: BinaryMode,
    /// Encoding of the file itself
    pub charset: Charset,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            has_header: true,
            delimiter: b',',
            binary_mode: BinaryMode::default(),
            charset: Charset::default(),
        }
    }
}

/// Checks that a delimiter is usable by the CSV reader and writer.
pub fn parse_delimiter(delimiter: &str) -> Result<u8> {
    let delimiter = if delimiter == "\\t" { "\t" } else { delimiter };
    match delimiter.as_bytes() {
        [b] if b.is_ascii() && *b != b'"' && *b != b'\n' && *b != b'\r' => Ok(*b),
        _ => Err(SqlCsvError::Config(format!(
            "delimiter must be a single ASCII character other than a quote or newline, got {:?}",
            delimiter
        ))),
    }
}

/// Where exported rows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSource {
    /// A (possibly qualified) table name, escaped before use
    Table(String),
    /// A caller-supplied statement, run verbatim
    Query(String),
}

impl ExportSource {
    /// Builds the source from optional table and SQL inputs; exactly one must
    /// be present.
    pub fn from_parts(table: Option<String>, sql: Option<String>) -> Result<Self> {
        let table = table.filter(|t| !t.trim().is_empty());
        let sql = sql.filter(|s| !s.trim().is_empty());
        match (table, sql) {
            (Some(table), None) => Ok(ExportSource::Table(table)),
            (None, Some(sql)) => Ok(ExportSource::Query(sql)),
            (Some(_), Some(_)) => Err(SqlCsvError::Config(
                "export takes either a table or a SQL statement, not both".to_string(),
            )),
            (None, None) => Err(SqlCsvError::Config(
                "export needs a table or a SQL statement".to_string(),
            )),
        }
    }
}

/// One export run
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub source: ExportSource,
    pub csv_path: PathBuf,
    pub csv: CsvOptions,
    /// Stop after this many data rows
    pub limit: Option<u64>,
    /// Add a non-blocking read hint to table scans where the dialect has one
    pub read_hint: bool,
}

impl ExportRequest {
    pub fn new(source: ExportSource, csv_path: impl Into<PathBuf>) -> Self {
        ExportRequest {
            source,
            csv_path: csv_path.into(),
            csv: CsvOptions::default(),
            limit: None,
            read_hint: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.csv_path.as_os_str().is_empty() {
            return Err(SqlCsvError::Config("export needs a CSV output path".to_string()));
        }
        match &self.source {
            ExportSource::Table(t) if t.trim().is_empty() => {
                Err(SqlCsvError::Config("export table name is empty".to_string()))
            }
            ExportSource::Query(q) if q.trim().is_empty() => {
                Err(SqlCsvError::Config("export SQL statement is empty".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// One import run.
///
/// Only a table name is accepted as the target; import never runs
/// caller-supplied SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRequest {
    pub table: String,
    pub csv_path: PathBuf,
    pub csv: CsvOptions,
    /// Rows per transaction, greater than zero
    pub batch_size: usize,
    /// Empty the table before loading
    pub truncate: bool,
    /// Skip and record failing rows instead of aborting
    pub skip_errors: bool,
}

impl ImportRequest {
    pub fn new(table: impl Into<String>, csv_path: impl Into<PathBuf>) -> Self {
        ImportRequest {
            table: table.into(),
            csv_path: csv_path.into(),
            csv: CsvOptions::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            truncate: false,
            skip_errors: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(SqlCsvError::Config("import needs a target table".to_string()));
        }
        if self.csv_path.as_os_str().is_empty() {
            return Err(SqlCsvError::Config("import needs a CSV input path".to_string()));
        }
        if self.batch_size == 0 {
            return Err(SqlCsvError::Config("batch size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// What a transfer achieved.
///
/// Produced for every run, successful or not, so partial progress can be
/// audited. For imports `rows_transferred` counts committed rows only; rows
/// of a batch that was rolled back are not included.
#[derive(Debug, Default)]
pub struct TransferOutcome {
    pub rows_transferred: u64,
    /// 1-based source line numbers of skipped records
    pub skipped_lines: Vec<u64>,
    pub batches_committed: u64,
    pub error: Option<SqlCsvError>,
}

impl TransferOutcome {
    /// An outcome for a run that failed before moving any rows.
    pub fn failed(error: SqlCsvError) -> Self {
        TransferOutcome {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a `Result`, dropping the counts on failure.
    pub fn into_result(self) -> Result<TransferOutcome> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            rows_transferred: self.rows_transferred,
            skipped_lines: self.skipped_lines.clone(),
            batches_committed: self.batches_committed,
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Serializable view of an outcome for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSummary {
    pub rows_transferred: u64,
    pub skipped_lines: Vec<u64>,
    pub batches_committed: u64,
    pub error: Option<String>,
}

/// Optional row-count callback.
///
/// The engines call it every `every` rows; without a callback they stay
/// silent.
pub struct Progress<'a> {
    every: u64,
    callback: Option<Box<dyn FnMut(u64) + 'a>>,
}

impl<'a> Progress<'a> {
    pub fn silent() -> Self {
        Progress {
            every: 0,
            callback: None,
        }
    }

    pub fn every(every: u64, callback: impl FnMut(u64) + 'a) -> Self {
        Progress {
            every,
            callback: Some(Box::new(callback)),
        }
    }

    pub(crate) fn tick(&mut self, rows: u64) {
        if self.every == 0 || rows % self.every != 0 {
            return;
        }
        if let Some(callback) = self.callback.as_mut() {
            callback(rows);
        }
    }
}

impl Default for Progress<'_> {
    fn default() -> Self {
        Progress::silent()
    }
}
