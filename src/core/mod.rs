/// Core Module for sqlcsv
///
/// This module contains the shared infrastructure the transfer engines are
/// built on: the database collaborator traits and their SQLite
/// implementation, plus the crate-wide error types.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{ConversionError, ErrorKind, ParseError, Result, SqlCsvError};
