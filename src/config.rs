use crate::charset::Charset;
use crate::convert::BinaryMode;
use crate::core::{Result, SqlCsvError};
use crate::transfer::{parse_delimiter, CsvOptions, DEFAULT_BATCH_SIZE};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration structure parsed from a TOML file.
///
/// Every table and key is optional; command-line flags override what is set
/// here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub csv: CsvConfig,
    pub export: ExportConfig,
    pub import: ImportConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file used when `--db` is not given
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: None,
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// CSV layout defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    pub header: bool,
    pub delimiter: String,
    pub binary_format: BinaryMode,
    pub charset: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        CsvConfig {
            header: true,
            delimiter: ",".to_string(),
            binary_format: BinaryMode::default(),
            charset: "utf-8".to_string(),
        }
    }
}

impl CsvConfig {
    /// Resolves the configured values into transfer options.
    pub fn to_options(&self) -> Result<CsvOptions> {
        Ok(CsvOptions {
            has_header: self.header,
            delimiter: parse_delimiter(&self.delimiter)?,
            binary_mode: self.binary_format,
            charset: Charset::from_name(&self.charset),
        })
    }
}

/// Export defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub read_hint: bool,
    /// Report progress every this many rows; 0 disables it
    pub progress_every: u64,
}

/// Import defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub truncate: bool,
    pub skip_errors: bool,
    /// Report progress every this many rows; 0 disables it
    pub progress_every: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            truncate: false,
            skip_errors: false,
            progress_every: 0,
        }
    }
}

/// Default configuration file location, `<config dir>/sqlcsv/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sqlcsv").join("config.toml"))
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = sqlcsv::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path.as_ref())?;
    let config = toml::from_str(&content)?;
    debug!("Loaded configuration from {}", path.as_ref().display());
    Ok(config)
}

/// Loads the configuration the binary runs with.
///
/// An explicit path must exist. Without one the default location is tried,
/// and a missing default file means built-in defaults.
pub fn resolve(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match default_path() {
        Some(path) if path.is_file() => load_config(path),
        _ => Ok(Config::default()),
    }
}

impl Config {
    /// Checks values that cannot be expressed in the TOML types alone.
    pub fn validate(&self) -> Result<()> {
        if self.import.batch_size == 0 {
            return Err(SqlCsvError::Config(
                "import.batch_size must be greater than zero".to_string(),
            ));
        }
        self.csv.to_options().map(|_| ())
    }
}
