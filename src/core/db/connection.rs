/// Connection Management Module
///
/// This module defines the database collaborator the transfer engines talk
/// to, and its SQLite implementation. The engines only ever see the
/// `Database` and `Transaction` traits; nothing here holds global state, so
/// concurrent transfers simply use independent connections.

use super::query::{ColumnMeta, RowSink, Value};
use super::schema::{self, ColumnDescriptor, DataType};
use crate::core::{Result, SqlCsvError};
use crate::escape::QualifiedName;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// SQL flavour used when the engines build statements themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `TOP (n)`, `WITH (NOLOCK)`, `TRUNCATE TABLE`
    SqlServer,
    /// `LIMIT n`, no table hints, `DELETE FROM`
    Sqlite,
}

impl Dialect {
    /// Builds the statement that empties an already escaped table.
    pub fn truncate_sql(self, escaped_table: &str) -> String {
        match self {
            Dialect::SqlServer => format!("TRUNCATE TABLE {}", escaped_table),
            Dialect::Sqlite => format!("DELETE FROM {}", escaped_table),
        }
    }
}

/// A statement prepared inside a transaction.
///
/// Holds the statement text and its parameter count. Backends keep the
/// compiled form keyed by the text, so executing it again does not re-parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    sql: String,
    param_count: usize,
}

impl PreparedStatement {
    pub fn new(sql: impl Into<String>, param_count: usize) -> Self {
        PreparedStatement {
            sql: sql.into(),
            param_count,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }
}

/// The database side of a transfer.
///
/// All calls block until the database answers.
pub trait Database {
    type Tx<'t>: Transaction
    where
        Self: 't;

    /// SQL flavour for engine-built statements
    fn dialect(&self) -> Dialect;

    /// Runs a query and streams its result set into `sink`.
    fn query(&mut self, sql: &str, sink: &mut dyn RowSink) -> Result<()>;

    /// Ordered column list of a table; empty when the table does not exist.
    fn table_columns(&mut self, table: &QualifiedName) -> Result<Vec<ColumnDescriptor>>;

    /// Executes a statement outside any transfer transaction.
    fn execute(&mut self, sql: &str) -> Result<usize>;

    /// Opens a transaction.
    fn begin(&mut self) -> Result<Self::Tx<'_>>;
}

/// An open transaction.
///
/// Dropping a transaction without committing must roll it back.
pub trait Transaction {
    fn prepare_statement(&mut self, sql: &str) -> Result<PreparedStatement>;

    fn execute_statement(&mut self, stmt: &PreparedStatement, params: &[Value]) -> Result<usize>;

    fn commit(self) -> Result<()>;

    fn rollback(self) -> Result<()>;
}

/// Interrupts whatever the connection is currently running.
///
/// The interrupted call fails with a database error, which the engines treat
/// as fatal.
pub struct Canceller {
    interrupt_handle: rusqlite::InterruptHandle,
}

impl Canceller {
    /// Triggers cancellation of the running statement
    pub fn cancel(&self) {
        self.interrupt_handle.interrupt();
    }
}

/// SQLite implementation of the database collaborator
#[derive(Debug)]
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Opens a SQLite database file, creating it if needed.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the database file, or ":memory:"
    /// * `busy_timeout` - How long to wait on a locked database
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        debug!("Opened SQLite database {}", path.as_ref().display());
        Ok(SqliteDatabase { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(SqliteDatabase { conn })
    }

    /// Wraps an existing connection
    pub fn from_connection(conn: Connection) -> Self {
        SqliteDatabase { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns a handle that can interrupt this connection from another thread
    pub fn canceller(&self) -> Canceller {
        Canceller {
            interrupt_handle: self.conn.get_interrupt_handle(),
        }
    }
}

impl Database for SqliteDatabase {
    type Tx<'t> = rusqlite::Transaction<'t>;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, sql: &str, sink: &mut dyn RowSink) -> Result<()> {
        let mut stmt = self.conn.prepare(sql)?;

        // Get column names and declared types
        let columns: Vec<ColumnMeta> = stmt
            .columns()
            .iter()
            .map(|c| ColumnMeta {
                name: c.name().to_string(),
                data_type: c.decl_type().map(DataType::from_declared).unwrap_or(DataType::Text),
            })
            .collect();
        sink.columns(&columns)?;

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut buffer = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                buffer.push(Value::from_sqlite(row.get_ref(i)?, column.data_type));
            }
            if sink.row(buffer)?.is_break() {
                break;
            }
        }

        Ok(())
    }

    fn table_columns(&mut self, table: &QualifiedName) -> Result<Vec<ColumnDescriptor>> {
        schema::table_columns(&self.conn, table)
    }

    fn execute(&mut self, sql: &str) -> Result<usize> {
        Ok(self.conn.execute(sql, [])?)
    }

    fn begin(&mut self) -> Result<Self::Tx<'_>> {
        Ok(self.conn.transaction()?)
    }
}

impl Transaction for rusqlite::Transaction<'_> {
    fn prepare_statement(&mut self, sql: &str) -> Result<PreparedStatement> {
        let stmt = self.prepare_cached(sql)?;
        Ok(PreparedStatement::new(sql, stmt.parameter_count()))
    }

    fn execute_statement(&mut self, stmt: &PreparedStatement, params: &[Value]) -> Result<usize> {
        if params.len() != stmt.param_count() {
            return Err(SqlCsvError::FieldCount {
                expected: stmt.param_count(),
                found: params.len(),
            });
        }
        let mut cached = self.prepare_cached(stmt.sql())?;
        Ok(cached.execute(rusqlite::params_from_iter(params.iter()))?)
    }

    fn commit(self) -> Result<()> {
        Ok(rusqlite::Transaction::commit(self)?)
    }

    fn rollback(self) -> Result<()> {
        Ok(rusqlite::Transaction::rollback(self)?)
    }
}
