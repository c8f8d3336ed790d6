/// # Test Utilities Module
///
/// Shared fixtures for the engine tests: an isolated in-memory database with
/// a small sample table, and helpers for inspecting it afterwards.

use crate::core::db::SqliteDatabase;
use rusqlite::Connection;

/// Isolated database test fixture
pub struct DatabaseFixture {
    pub db: SqliteDatabase,
}

impl DatabaseFixture {
    /// Creates an in-memory database holding the `people` sample table
    pub fn new() -> Self {
        let fixture = Self::empty();
        fixture
            .conn()
            .execute_batch(
                "
                CREATE TABLE people (
                    id INTEGER NOT NULL PRIMARY KEY,
                    name NVARCHAR(50) NOT NULL,
                    active BIT NOT NULL,
                    avatar VARBINARY(64),
                    joined DATETIME
                );

                INSERT INTO people VALUES (1, 'Alice', 1, X'00FF', '2024-01-15 09:30:00');
                INSERT INTO people VALUES (2, 'Smith, Bob', 0, NULL, '2023-06-01');
                INSERT INTO people VALUES (3, 'Carol', 1, X'CAFE', NULL);
            ",
            )
            .expect("Failed to create sample schema");
        fixture
    }

    /// Creates an in-memory database with no tables
    pub fn empty() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory database");
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = MEMORY;
        ",
        )
        .expect("Failed to apply test pragmas");
        DatabaseFixture {
            db: SqliteDatabase::from_connection(conn),
        }
    }

    /// Creates an empty import target with a value check on `qty`
    pub fn with_orders() -> Self {
        let fixture = Self::empty();
        fixture
            .conn()
            .execute_batch(
                "
                CREATE TABLE orders (
                    id INTEGER NOT NULL,
                    item TEXT NOT NULL,
                    qty INTEGER NOT NULL CHECK (qty >= 0),
                    paid BIT
                );
            ",
            )
            .expect("Failed to create orders table");
        fixture
    }

    pub fn conn(&self) -> &Connection {
        self.db.connection()
    }

    /// Counts the rows of a table
    pub fn count(&self, table: &str) -> i64 {
        self.conn()
            .query_row(&format!("SELECT COUNT(*) FROM [{}]", table), [], |row| row.get(0))
            .expect("Failed to count rows")
    }

    /// Reads the ids of a table in ascending order
    pub fn ids(&self, table: &str) -> Vec<i64> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT id FROM [{}] ORDER BY id", table))
            .expect("Failed to prepare id query");
        let ids = stmt
            .query_map([], |row| row.get(0))
            .expect("Failed to query ids")
            .collect::<rusqlite::Result<Vec<i64>>>()
            .expect("Failed to read ids");
        ids
    }
}

/// Asserts that a result failed with the given `SqlCsvError` variant
#[macro_export]
macro_rules! assert_sqlcsv_error {
    ($result:expr, $variant:pat, $context:expr) => {
        match $result {
            Err($variant) => {}
            Ok(_) => panic!("Expected {} but got Ok in {}", stringify!($variant), $context),
            Err(other) => panic!("Expected {} but got {:?} in {}", stringify!($variant), other, $context),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlCsvError;

    #[test]
    fn test_sample_fixture() {
        let fixture = DatabaseFixture::new();
        assert_eq!(fixture.count("people"), 3);
        assert_eq!(fixture.ids("people"), vec![1, 2, 3]);
    }

    #[test]
    fn test_orders_fixture_enforces_check() {
        let fixture = DatabaseFixture::with_orders();
        assert_eq!(fixture.count("orders"), 0);
        let result = fixture
            .conn()
            .execute("INSERT INTO orders VALUES (1, 'x', -1, NULL)", [])
            .map_err(SqlCsvError::from);
        assert_sqlcsv_error!(result, SqlCsvError::Database(_), "check constraint");
    }
}
