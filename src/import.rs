//! Import engine: CSV to batched, transactional inserts.
//!
//! Rows are inserted in batches of `batch_size`, each batch in its own
//! transaction. Atomicity is per batch, not per file: when an import fails,
//! batches committed before the failure stay in the table and only the open
//! batch is rolled back. The returned [`TransferOutcome`] says how far it got.

use crate::convert::{text_to_value, BinaryMode};
use crate::core::db::{ColumnDescriptor, Database, PreparedStatement, Transaction, Value};
use crate::core::{ConversionError, Result, SqlCsvError};
use crate::escape::{parse_qualified_name, quote_identifier, QualifiedName};
use crate::transfer::{ImportRequest, Progress, TransferOutcome};
use csv::StringRecord;
use std::fs::File;
use std::io::Read;
use tracing::{debug, info, warn};

/// Stages of an import run.
///
/// `SchemaResolved -> HeaderValidated | HeaderSkipped -> TransactionOpen ->
/// (BatchCommitted -> TransactionOpen)* -> Committed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    /// Target columns read from the schema
    SchemaResolved,
    /// Header row read and matched against the schema
    HeaderValidated,
    /// No header; schema column order is used
    HeaderSkipped,
    /// A batch transaction is open
    TransactionOpen,
    /// A full batch was committed
    BatchCommitted,
    /// All input consumed and the last batch committed
    Committed,
    /// The run stopped on an error
    Failed,
}

/// Runs import requests against a database.
pub struct Importer<'a, D: Database> {
    db: &'a mut D,
    progress: Progress<'a>,
    phase: Option<ImportPhase>,
}

impl<'a, D: Database> Importer<'a, D> {
    pub fn new(db: &'a mut D) -> Self {
        Importer {
            db,
            progress: Progress::silent(),
            phase: None,
        }
    }

    pub fn with_progress(mut self, progress: Progress<'a>) -> Self {
        self.progress = progress;
        self
    }

    /// Phase reached by the most recent run, if any
    pub fn phase(&self) -> Option<ImportPhase> {
        self.phase
    }

    /// Imports the request's CSV file into its table.
    pub fn import(&mut self, request: &ImportRequest) -> TransferOutcome {
        if let Err(e) = request.validate() {
            return TransferOutcome::failed(e);
        }
        match File::open(&request.csv_path) {
            Ok(file) => self.import_from_reader(file, request),
            Err(e) => {
                warn!("Cannot open {}: {}", request.csv_path.display(), e);
                self.phase = Some(ImportPhase::Failed);
                TransferOutcome::failed(e.into())
            }
        }
    }

    /// Imports CSV read from `reader` into the request's table. The
    /// request's path is ignored.
    pub fn import_from_reader<R: Read>(
        &mut self,
        reader: R,
        request: &ImportRequest,
    ) -> TransferOutcome {
        let mut outcome = TransferOutcome::default();
        self.phase = None;

        let result = request.validate().and_then(|()| self.run(reader, request, &mut outcome));
        match result {
            Ok(()) => {
                enter(&mut self.phase, ImportPhase::Committed);
                info!(
                    "Imported {} rows into {} in {} batches, {} skipped",
                    outcome.rows_transferred,
                    request.table,
                    outcome.batches_committed,
                    outcome.skipped_lines.len()
                );
            }
            Err(e) => {
                enter(&mut self.phase, ImportPhase::Failed);
                warn!(
                    "Import into {} failed after {} committed rows: {}",
                    request.table, outcome.rows_transferred, e
                );
                outcome.error = Some(e);
            }
        }
        outcome
    }

    fn run<R: Read>(
        &mut self,
        reader: R,
        request: &ImportRequest,
        outcome: &mut TransferOutcome,
    ) -> Result<()> {
        let table = parse_qualified_name(&request.table)?;
        if table.is_empty() {
            return Err(SqlCsvError::Config("import needs a target table".to_string()));
        }

        let schema = self.db.table_columns(&table)?;
        if schema.is_empty() {
            return Err(SqlCsvError::SchemaMismatch(format!(
                "table {} does not exist or has no columns",
                table
            )));
        }
        enter(&mut self.phase, ImportPhase::SchemaResolved);

        let options = &request.csv;
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(options.delimiter)
            .from_reader(options.charset.wrap_reader(reader));

        let columns = if options.has_header {
            let mut header = StringRecord::new();
            if !csv.read_record(&mut header)? {
                return Err(SqlCsvError::SchemaMismatch("CSV input has no header row".to_string()));
            }
            let columns = match_header(&header, &schema)?;
            enter(&mut self.phase, ImportPhase::HeaderValidated);
            columns
        } else {
            enter(&mut self.phase, ImportPhase::HeaderSkipped);
            schema
        };

        if request.truncate {
            let sql = self.db.dialect().truncate_sql(&table.escaped());
            let removed = self.db.execute(&sql)?;
            info!("Truncated {} ({} rows removed)", table, removed);
        }

        let insert_sql = insert_statement(&table, &columns);
        debug!("Insert statement: {}", insert_sql);

        let mode = options.binary_mode;
        let mut record = StringRecord::new();
        let mut end_of_input = false;

        while !end_of_input {
            let mut tx = self.db.begin()?;
            enter(&mut self.phase, ImportPhase::TransactionOpen);

            let stmt = match tx.prepare_statement(&insert_sql) {
                Ok(stmt) => stmt,
                Err(e) => {
                    rollback(tx);
                    return Err(e);
                }
            };

            let mut in_batch: u64 = 0;
            while in_batch < request.batch_size as u64 {
                match csv.read_record(&mut record) {
                    Ok(true) => {}
                    Ok(false) => {
                        end_of_input = true;
                        break;
                    }
                    Err(e) => {
                        rollback(tx);
                        return Err(e.into());
                    }
                }

                let line = record.position().map(|p| p.line()).unwrap_or_default();
                match insert_record(&mut tx, &stmt, &record, &columns, mode) {
                    Ok(()) => {
                        in_batch += 1;
                        self.progress.tick(outcome.rows_transferred + in_batch);
                    }
                    Err(e) if request.skip_errors => {
                        warn!("Skipping line {}: {}", line, e);
                        outcome.skipped_lines.push(line);
                    }
                    Err(e) => {
                        rollback(tx);
                        return Err(SqlCsvError::RowRejected {
                            line,
                            source: Box::new(e),
                        });
                    }
                }
            }

            if in_batch == 0 {
                // Nothing left to write
                tx.rollback()?;
                continue;
            }

            tx.commit()?;
            outcome.rows_transferred += in_batch;
            outcome.batches_committed += 1;
            enter(&mut self.phase, ImportPhase::BatchCommitted);
            debug!(
                "Committed batch {} ({} rows, {} total)",
                outcome.batches_committed, in_batch, outcome.rows_transferred
            );
        }

        Ok(())
    }
}

fn enter(phase: &mut Option<ImportPhase>, next: ImportPhase) {
    debug!("Import phase: {:?}", next);
    *phase = Some(next);
}

fn rollback<T: Transaction>(tx: T) {
    if let Err(e) = tx.rollback() {
        warn!("Rollback failed: {}", e);
    }
}

/// Matches header names against the schema.
///
/// Names compare case-insensitively; every schema column must appear exactly
/// once. Returns the columns in header order.
fn match_header(
    header: &StringRecord,
    schema: &[ColumnDescriptor],
) -> Result<Vec<ColumnDescriptor>> {
    if header.len() != schema.len() {
        return Err(SqlCsvError::SchemaMismatch(format!(
            "CSV header has {} columns, table has {}",
            header.len(),
            schema.len()
        )));
    }

    let mut seen = vec![false; schema.len()];
    let mut columns = Vec::with_capacity(schema.len());
    for (i, raw) in header.iter().enumerate() {
        let name = if i == 0 { raw.trim_start_matches('\u{feff}') } else { raw }.trim();
        let wanted = name.to_lowercase();
        let position = schema
            .iter()
            .position(|c| c.name.to_lowercase() == wanted)
            .ok_or_else(|| {
                SqlCsvError::SchemaMismatch(format!("CSV column '{}' is not in the table", name))
            })?;
        if seen[position] {
            return Err(SqlCsvError::SchemaMismatch(format!(
                "CSV column '{}' appears more than once",
                name
            )));
        }
        seen[position] = true;
        columns.push(schema[position].clone());
    }
    Ok(columns)
}

/// Builds the parameterized insert over escaped table and column names.
fn insert_statement(table: &QualifiedName, columns: &[ColumnDescriptor]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(&c.name)).collect();
    let params = vec!["?"; columns.len()];
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.escaped(),
        names.join(", "),
        params.join(", ")
    )
}

/// Converts and inserts one record. Every error returned here is a row
/// failure.
fn insert_record<T: Transaction>(
    tx: &mut T,
    stmt: &PreparedStatement,
    record: &StringRecord,
    columns: &[ColumnDescriptor],
    mode: BinaryMode,
) -> Result<()> {
    if record.len() != columns.len() {
        return Err(SqlCsvError::FieldCount {
            expected: columns.len(),
            found: record.len(),
        });
    }

    let params = record
        .iter()
        .zip(columns)
        .map(|(text, column)| text_to_value(text, column, mode))
        .collect::<std::result::Result<Vec<Value>, ConversionError>>()?;
    tx.execute_statement(stmt, &params)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::{Dialect, RowSink, SqliteDatabase};
    use crate::core::ErrorKind;
    use crate::test_utils::DatabaseFixture;
    use std::fmt::Write as _;

    /// Database wrapper that logs how each transaction ended.
    struct RecordingDb {
        inner: SqliteDatabase,
        events: Vec<String>,
    }

    struct RecordingTx<'t> {
        inner: rusqlite::Transaction<'t>,
        rows: usize,
        events: &'t mut Vec<String>,
    }

    impl Database for RecordingDb {
        type Tx<'t> = RecordingTx<'t>;

        fn dialect(&self) -> Dialect {
            self.inner.dialect()
        }

        fn query(&mut self, sql: &str, sink: &mut dyn RowSink) -> Result<()> {
            self.inner.query(sql, sink)
        }

        fn table_columns(&mut self, table: &QualifiedName) -> Result<Vec<ColumnDescriptor>> {
            self.inner.table_columns(table)
        }

        fn execute(&mut self, sql: &str) -> Result<usize> {
            self.events.push(format!("execute {}", sql));
            self.inner.execute(sql)
        }

        fn begin(&mut self) -> Result<Self::Tx<'_>> {
            Ok(RecordingTx {
                inner: self.inner.begin()?,
                rows: 0,
                events: &mut self.events,
            })
        }
    }

    impl Transaction for RecordingTx<'_> {
        fn prepare_statement(&mut self, sql: &str) -> Result<PreparedStatement> {
            self.inner.prepare_statement(sql)
        }

        fn execute_statement(
            &mut self,
            stmt: &PreparedStatement,
            params: &[Value],
        ) -> Result<usize> {
            let changed = self.inner.execute_statement(stmt, params)?;
            self.rows += 1;
            Ok(changed)
        }

        fn commit(self) -> Result<()> {
            self.events.push(format!("commit {}", self.rows));
            Transaction::commit(self.inner)
        }

        fn rollback(self) -> Result<()> {
            self.events.push(format!("rollback {}", self.rows));
            Transaction::rollback(self.inner)
        }
    }

    fn recording(fixture: DatabaseFixture) -> RecordingDb {
        RecordingDb {
            inner: fixture.db,
            events: Vec::new(),
        }
    }

    fn count(db: &RecordingDb) -> i64 {
        db.inner
            .connection()
            .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
            .unwrap()
    }

    /// `rows` order lines; `bad` (1-based) gets a value the converter rejects
    fn orders_csv(rows: usize, bad: Option<usize>, header: bool) -> String {
        let mut csv = String::new();
        if header {
            csv.push_str("id,item,qty,paid\n");
        }
        for i in 1..=rows {
            let qty = if Some(i) == bad { "lots".to_string() } else { (i * 10).to_string() };
            writeln!(csv, "{},item {},{},{}", i, i, qty, i % 2).unwrap();
        }
        csv
    }

    fn import<D: Database>(db: &mut D, csv: &str, request: &ImportRequest) -> TransferOutcome {
        Importer::new(db).import_from_reader(csv.as_bytes(), request)
    }

    #[test]
    fn test_batches_commit_in_order() {
        let mut db = recording(DatabaseFixture::with_orders());
        let mut request = ImportRequest::new("orders", "orders.csv");
        request.batch_size = 3;

        let outcome = import(&mut db, &orders_csv(7, None, true), &request);
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.rows_transferred, 7);
        assert_eq!(outcome.batches_committed, 3);
        assert_eq!(db.events, vec!["commit 3", "commit 3", "commit 1"]);
        assert_eq!(count(&db), 7);
    }

    #[test]
    fn test_empty_final_batch_is_rolled_back() {
        let mut db = recording(DatabaseFixture::with_orders());
        let mut request = ImportRequest::new("orders", "orders.csv");
        request.batch_size = 3;

        let outcome = import(&mut db, &orders_csv(6, None, true), &request);
        assert_eq!(outcome.batches_committed, 2);
        assert_eq!(db.events, vec!["commit 3", "commit 3", "rollback 0"]);
    }

    #[test]
    fn test_strict_failure_keeps_committed_batches() {
        let mut fixture = DatabaseFixture::with_orders();
        let mut request = ImportRequest::new("orders", "orders.csv");
        request.batch_size = 3;

        // Row 5 violates the CHECK constraint at insert time
        let csv = orders_csv(7, None, true).replace("5,item 5,50", "5,item 5,-50");
        let mut importer = Importer::new(&mut fixture.db);
        let outcome = importer.import_from_reader(csv.as_bytes(), &request);
        assert_eq!(importer.phase(), Some(ImportPhase::Failed));
        drop(importer);

        let error = outcome.error.as_ref().unwrap();
        assert_eq!(error.line(), Some(6));
        assert_eq!(error.kind(), ErrorKind::Io);
        assert_eq!(outcome.rows_transferred, 3);
        assert_eq!(outcome.batches_committed, 1);
        assert_eq!(fixture.ids("orders"), vec![1, 2, 3]);
    }

    #[test]
    fn test_strict_conversion_failure_commits_nothing() {
        let mut db = recording(DatabaseFixture::with_orders());
        let mut request = ImportRequest::new("orders", "orders.csv");
        request.csv.has_header = false;

        let outcome = import(&mut db, &orders_csv(10, Some(5), false), &request);
        let error = outcome.error.unwrap();
        assert_eq!(error.kind(), ErrorKind::Conversion);
        assert_eq!(error.line(), Some(5));
        assert!(error.to_string().contains("\"lots\""));
        assert_eq!(outcome.rows_transferred, 0);
        assert_eq!(db.events, vec!["rollback 4"]);
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_tolerant_import_skips_bad_lines() {
        let mut request = ImportRequest::new("orders", "orders.csv");
        request.skip_errors = true;
        request.csv.has_header = false;

        let mut fixture = DatabaseFixture::with_orders();
        let outcome = import(&mut fixture.db, &orders_csv(10, Some(5), false), &request);
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.rows_transferred, 9);
        assert_eq!(outcome.skipped_lines, vec![5]);
        assert_eq!(fixture.ids("orders"), vec![1, 2, 3, 4, 6, 7, 8, 9, 10]);

        // With a header the same row sits on line 6
        request.csv.has_header = true;
        let mut fixture = DatabaseFixture::with_orders();
        let outcome = import(&mut fixture.db, &orders_csv(10, Some(5), true), &request);
        assert_eq!(outcome.rows_transferred, 9);
        assert_eq!(outcome.skipped_lines, vec![6]);
    }

    #[test]
    fn test_field_count_mismatch_is_a_row_failure() {
        let mut fixture = DatabaseFixture::with_orders();
        let request = ImportRequest::new("orders", "orders.csv");
        let csv = "id,item,qty,paid\n1,a,1,0\n2,b,2\n";

        let outcome = import(&mut fixture.db, csv, &request);
        match outcome.error {
            Some(SqlCsvError::RowRejected { line, source }) => {
                assert_eq!(line, 3);
                assert!(matches!(*source, SqlCsvError::FieldCount { expected: 4, found: 3 }));
            }
            other => panic!("Expected a rejected row, got {:?}", other),
        }
        assert_eq!(fixture.count("orders"), 0);
    }

    #[test]
    fn test_header_order_case_and_bom() {
        let mut fixture = DatabaseFixture::with_orders();
        let request = ImportRequest::new("orders", "orders.csv");
        let csv = "\u{feff}QTY,Paid,ID,item\n5,,1,\"widget, large\"\n,true,2,bolt\n";

        let mut importer = Importer::new(&mut fixture.db);
        let outcome = importer.import_from_reader(csv.as_bytes(), &request);
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(importer.phase(), Some(ImportPhase::Committed));
        drop(importer);

        let rows: Vec<(i64, String, i64, Option<i64>)> = fixture
            .conn()
            .prepare("SELECT id, item, qty, paid FROM orders ORDER BY id")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                (1, "widget, large".to_string(), 5, None),
                // Empty non-nullable qty falls back to zero
                (2, "bolt".to_string(), 0, Some(1)),
            ]
        );
    }

    #[test]
    fn test_header_mismatches() {
        let request = ImportRequest::new("orders", "orders.csv");
        for header in [
            "id,item,qty\n",
            "id,item,qty,paid,extra\n",
            "id,item,qty,price\n",
            "id,item,qty,ID\n",
            "",
        ] {
            let mut fixture = DatabaseFixture::with_orders();
            let csv = format!("{}1,a,1,0\n", header);
            let input = if header.is_empty() { String::new() } else { csv };
            let outcome = import(&mut fixture.db, &input, &request);
            assert_eq!(
                outcome.error.as_ref().map(|e| e.kind()),
                Some(ErrorKind::SchemaMismatch),
                "header {:?}",
                header
            );
            assert_eq!(fixture.count("orders"), 0);
        }
    }

    #[test]
    fn test_missing_table_and_bad_name() {
        let mut fixture = DatabaseFixture::with_orders();

        let request = ImportRequest::new("no_such_table", "x.csv");
        let outcome = import(&mut fixture.db, "a\n1\n", &request);
        assert_eq!(outcome.error.map(|e| e.kind()), Some(ErrorKind::SchemaMismatch));

        let request = ImportRequest::new("orders]; DROP TABLE orders; --", "x.csv");
        let outcome = import(&mut fixture.db, "a\n1\n", &request);
        assert_eq!(outcome.error.map(|e| e.kind()), Some(ErrorKind::Parse));
        assert_eq!(fixture.count("orders"), 0);

        let mut request = ImportRequest::new("orders", "x.csv");
        request.batch_size = 0;
        let outcome = import(&mut fixture.db, "a\n1\n", &request);
        assert_eq!(outcome.error.map(|e| e.kind()), Some(ErrorKind::Config));
    }

    #[test]
    fn test_truncate_runs_after_header_validation() {
        let mut db = recording(DatabaseFixture::with_orders());
        db.inner
            .connection()
            .execute_batch(
                "INSERT INTO orders VALUES (90, 'old', 1, 0);
                 INSERT INTO orders VALUES (91, 'old', 1, 0);",
            )
            .unwrap();

        let mut request = ImportRequest::new("orders", "orders.csv");
        request.truncate = true;

        // A bad header leaves the existing rows alone
        let outcome = import(&mut db, "id,item\n1,a\n", &request);
        assert!(outcome.error.is_some());
        assert_eq!(count(&db), 2);
        assert!(db.events.is_empty());

        let outcome = import(&mut db, &orders_csv(3, None, true), &request);
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(count(&db), 3);
        assert_eq!(db.events, vec!["execute DELETE FROM [orders]", "commit 3"]);
    }

    #[test]
    fn test_no_header_uses_schema_order_and_reports_progress() {
        let mut fixture = DatabaseFixture::with_orders();
        let mut request = ImportRequest::new("orders", "orders.csv");
        request.csv.has_header = false;
        request.csv.delimiter = b'\t';
        request.batch_size = 2;

        let mut ticks = Vec::new();
        let csv = "1\ta\t3\t1\n2\tb\t4\t0\n3\tc\t5\tyes\n";
        let mut importer = Importer::new(&mut fixture.db)
            .with_progress(Progress::every(2, |n| ticks.push(n)));
        let outcome = importer.import_from_reader(csv.as_bytes(), &request);
        assert_eq!(importer.phase(), Some(ImportPhase::Committed));
        drop(importer);

        assert_eq!(outcome.rows_transferred, 3);
        assert_eq!(outcome.batches_committed, 2);
        assert_eq!(ticks, vec![2]);
        assert_eq!(fixture.ids("orders"), vec![1, 2, 3]);
    }

    #[test]
    fn test_insert_statement_escapes_names() {
        let table = parse_qualified_name("main.[odd]]table]").unwrap();
        let columns = vec![
            ColumnDescriptor::new("id", crate::core::db::DataType::Integer, false),
            ColumnDescriptor::new("we]ird", crate::core::db::DataType::Text, true),
        ];
        assert_eq!(
            insert_statement(&table, &columns),
            "INSERT INTO [main].[odd]]table] ([id], [we]]ird]) VALUES (?, ?)"
        );
    }
}
