/// Database Module
///
/// This module provides the database collaborator used by the transfer
/// engines, organized into focused submodules.
///
/// ## Architecture
///
/// - **Connection Management** (`connection.rs`): the `Database` and `Transaction` traits and the SQLite backend
/// - **Schema Introspection** (`schema.rs`): type tags and column metadata for import targets
/// - **Query Results** (`query.rs`): typed values and the row sink result sets stream into
///
/// ## Error Handling
///
/// All database operations use the standardized `SqlCsvError` type for consistent error propagation.
pub mod connection;
pub mod query;
pub mod schema;

pub use connection::*;
pub use query::*;
pub use schema::*;
