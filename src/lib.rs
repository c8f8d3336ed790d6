// Core infrastructure modules
pub mod core;

// Conversion building blocks
pub mod charset;
pub mod convert;
pub mod escape;

// Transfer engines
pub mod export;
pub mod import;
pub mod transfer;

pub mod config;

#[cfg(test)]
mod test_utils;
