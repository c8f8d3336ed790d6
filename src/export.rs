//! Export engine: query results to CSV.
//!
//! Rows stream from the database straight into the CSV writer one at a
//! time, so memory use does not grow with the size of the result set.

use crate::charset::TranscodeWriter;
use crate::convert::value_to_text;
use crate::core::db::{ColumnMeta, Database, Dialect, RowSink, Value};
use crate::core::{Result, SqlCsvError};
use crate::escape::{parse_qualified_name, QualifiedName};
use crate::transfer::{CsvOptions, ExportRequest, ExportSource, Progress, TransferOutcome};
use std::fs::File;
use std::io::{self, Write};
use std::ops::ControlFlow;
use tracing::{debug, info, warn};

/// Table scan built from an escaped table name.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanQuery {
    pub table: QualifiedName,
    pub limit: Option<u64>,
    pub read_hint: bool,
}

impl ScanQuery {
    pub fn new(table: QualifiedName) -> Self {
        ScanQuery {
            table,
            limit: None,
            read_hint: false,
        }
    }

    /// Renders the scan in the given dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let table = self.table.escaped();
        match dialect {
            Dialect::SqlServer => {
                let top = self.limit.map(|n| format!("TOP ({}) ", n)).unwrap_or_default();
                let hint = if self.read_hint { " WITH (NOLOCK)" } else { "" };
                format!("SELECT {}* FROM {}{}", top, table, hint)
            }
            Dialect::Sqlite => {
                if self.read_hint {
                    debug!("Read hint has no SQLite equivalent, ignoring it");
                }
                match self.limit {
                    Some(n) => format!("SELECT * FROM {} LIMIT {}", table, n),
                    None => format!("SELECT * FROM {}", table),
                }
            }
        }
    }
}

/// Runs export requests against a database.
pub struct Exporter<'a, D: Database> {
    db: &'a mut D,
    progress: Progress<'a>,
}

impl<'a, D: Database> Exporter<'a, D> {
    pub fn new(db: &'a mut D) -> Self {
        Exporter {
            db,
            progress: Progress::silent(),
        }
    }

    pub fn with_progress(mut self, progress: Progress<'a>) -> Self {
        self.progress = progress;
        self
    }

    /// Exports the request's source into its CSV file.
    ///
    /// The file is created once the query has produced its column list; a
    /// query that fails up front leaves no file behind. A failure mid-stream
    /// leaves the rows written so far on disk.
    pub fn export(&mut self, request: &ExportRequest) -> TransferOutcome {
        if let Err(e) = request.validate() {
            return TransferOutcome::failed(e);
        }
        match &request.source {
            ExportSource::Table(table) => self.export_table(table, request),
            ExportSource::Query(sql) => self.export_query(sql, request),
        }
    }

    /// Exports a whole table (up to the request's limit) into the request's
    /// CSV file. The request's own source is ignored.
    pub fn export_table(&mut self, table: &str, request: &ExportRequest) -> TransferOutcome {
        match self.table_scan_sql(table, request) {
            Ok(sql) => self.run_to_file(&sql, request),
            Err(e) => TransferOutcome::failed(e),
        }
    }

    /// Exports the result of caller-supplied SQL, run verbatim. The request's
    /// own source is ignored and the read hint never applies.
    pub fn export_query(&mut self, sql: &str, request: &ExportRequest) -> TransferOutcome {
        if request.read_hint {
            debug!("Read hint only applies to table exports");
        }
        self.run_to_file(sql, request)
    }

    /// Exports the request's source into an arbitrary writer instead of its
    /// CSV file.
    pub fn export_to_writer<W: Write>(
        &mut self,
        request: &ExportRequest,
        writer: W,
    ) -> TransferOutcome {
        let sql = match &request.source {
            ExportSource::Table(table) => match self.table_scan_sql(table, request) {
                Ok(sql) => sql,
                Err(e) => return TransferOutcome::failed(e),
            },
            ExportSource::Query(sql) => sql.clone(),
        };
        self.run(&sql, request, move || Ok(writer))
    }

    fn table_scan_sql(&self, table: &str, request: &ExportRequest) -> Result<String> {
        let name = parse_qualified_name(table)?;
        if name.is_empty() {
            return Err(SqlCsvError::Config("export table name is empty".to_string()));
        }
        let scan = ScanQuery {
            table: name,
            limit: request.limit,
            read_hint: request.read_hint,
        };
        Ok(scan.to_sql(self.db.dialect()))
    }

    fn run_to_file(&mut self, sql: &str, request: &ExportRequest) -> TransferOutcome {
        let path = request.csv_path.clone();
        self.run(sql, request, move || {
            debug!("Creating {}", path.display());
            File::create(&path)
        })
    }

    fn run<W, F>(&mut self, sql: &str, request: &ExportRequest, open: F) -> TransferOutcome
    where
        W: Write,
        F: FnOnce() -> io::Result<W>,
    {
        info!("Exporting: {}", sql);
        let mut sink = CsvSink::new(&request.csv, request.limit, open, &mut self.progress);

        let result = self.db.query(sql, &mut sink).and_then(|()| sink.finish());
        let rows = sink.rows_written;

        match result {
            Ok(()) => {
                info!("Exported {} rows", rows);
                TransferOutcome {
                    rows_transferred: rows,
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!("Export failed after {} rows: {}", rows, e);
                TransferOutcome {
                    rows_transferred: rows,
                    error: Some(e),
                    ..Default::default()
                }
            }
        }
    }
}

/// Row sink that renders rows as CSV, opening its destination lazily.
struct CsvSink<'p, 'cb, W: Write, F: FnOnce() -> io::Result<W>> {
    options: &'p CsvOptions,
    limit: Option<u64>,
    open: Option<F>,
    writer: Option<csv::Writer<TranscodeWriter<W>>>,
    columns: Vec<ColumnMeta>,
    rows_written: u64,
    progress: &'p mut Progress<'cb>,
}

impl<'p, 'cb, W: Write, F: FnOnce() -> io::Result<W>> CsvSink<'p, 'cb, W, F> {
    fn new(
        options: &'p CsvOptions,
        limit: Option<u64>,
        open: F,
        progress: &'p mut Progress<'cb>,
    ) -> Self {
        CsvSink {
            options,
            limit,
            open: Some(open),
            writer: None,
            columns: Vec::new(),
            rows_written: 0,
            progress,
        }
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<TranscodeWriter<W>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| SqlCsvError::Config("rows arrived before the column list".to_string()))
    }

    /// Flushes the CSV writer and the charset encoder.
    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let transcoder = writer.into_inner().map_err(|e| e.into_error())?;
            transcoder.finish()?;
        }
        Ok(())
    }
}

impl<W: Write, F: FnOnce() -> io::Result<W>> RowSink for CsvSink<'_, '_, W, F> {
    fn columns(&mut self, columns: &[ColumnMeta]) -> Result<()> {
        let open = self
            .open
            .take()
            .ok_or_else(|| SqlCsvError::Config("column list delivered twice".to_string()))?;
        let destination = self.options.charset.wrap_writer(open()?);
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.options.delimiter)
            .from_writer(destination);

        if self.options.has_header {
            writer.write_record(columns.iter().map(|c| c.name.as_str()))?;
        }

        debug!("Writing {} columns as {}", columns.len(), self.options.charset.name());
        self.columns = columns.to_vec();
        self.writer = Some(writer);
        Ok(())
    }

    fn row(&mut self, row: Vec<Value>) -> Result<ControlFlow<()>> {
        if self.limit.is_some_and(|limit| self.rows_written >= limit) {
            return Ok(ControlFlow::Break(()));
        }

        let record: Vec<String> = row
            .iter()
            .zip(&self.columns)
            .map(|(value, column)| value_to_text(value, column.data_type, self.options.binary_mode))
            .collect();
        self.writer()?.write_record(&record)?;

        self.rows_written += 1;
        self.progress.tick(self.rows_written);

        if self.limit.is_some_and(|limit| self.rows_written >= limit) {
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }
}
