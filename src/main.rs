use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlcsv::config::{self, Config};
use sqlcsv::convert::BinaryMode;
use sqlcsv::core::db::SqliteDatabase;
use sqlcsv::core::{Result, SqlCsvError};
use sqlcsv::charset::Charset;
use sqlcsv::export::Exporter;
use sqlcsv::import::Importer;
use sqlcsv::transfer::{
    parse_delimiter, CsvOptions, ExportRequest, ExportSource, ImportRequest, Progress,
    TransferOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stream tables and queries between a SQLite database and CSV files.
#[derive(Parser, Debug)]
#[command(name = "sqlcsv", version, about)]
struct Cli {
    /// Database file (overrides database.path in the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Configuration file (default: <config dir>/sqlcsv/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the outcome as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a table or query result to a CSV file
    Export(ExportArgs),
    /// Load a CSV file into a table
    Import(ImportArgs),
}

#[derive(Args, Debug)]
struct CsvArgs {
    /// CSV file path
    #[arg(long)]
    csv: PathBuf,

    /// The CSV has no header row
    #[arg(long)]
    no_header: bool,

    /// Field delimiter, a single ASCII character (`\t` for tab)
    #[arg(long)]
    delimiter: Option<String>,

    /// Encoding of binary columns: hex, base64 or raw
    #[arg(long)]
    binary_format: Option<BinaryMode>,

    /// File charset, e.g. gbk or iso-8859-15
    #[arg(long)]
    charset: Option<String>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["table", "sql"])))]
struct ExportArgs {
    /// Table to export, optionally schema-qualified
    #[arg(long)]
    table: Option<String>,

    /// SQL statement to export instead of a table
    #[arg(long)]
    sql: Option<String>,

    #[command(flatten)]
    csv: CsvArgs,

    /// Stop after this many rows
    #[arg(long)]
    limit: Option<u64>,

    /// Add a non-blocking read hint to the table scan where supported
    #[arg(long)]
    read_hint: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Target table, optionally schema-qualified
    #[arg(long)]
    table: String,

    #[command(flatten)]
    csv: CsvArgs,

    /// Rows per transaction
    #[arg(long)]
    batch: Option<usize>,

    /// Empty the table before loading
    #[arg(long)]
    truncate: bool,

    /// Skip rows that fail instead of aborting
    #[arg(long)]
    skip_errors: bool,
}

fn main() -> ExitCode {
    // Logs go to stderr so stdout carries only the outcome
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Starting sqlcsv...");

    let outcome = run(&cli).unwrap_or_else(TransferOutcome::failed);
    report(&cli, &outcome);

    match outcome.into_result() {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn run(cli: &Cli) -> Result<TransferOutcome> {
    let config = config::resolve(cli.config.as_deref())?;
    config.validate()?;

    let db_path = cli
        .db
        .clone()
        .or_else(|| config.database.path.clone())
        .ok_or_else(|| {
            SqlCsvError::Config("no database given; pass --db or set database.path".to_string())
        })?;

    let outcome = match &cli.command {
        Command::Export(args) => {
            let mut request = ExportRequest::new(
                ExportSource::from_parts(args.table.clone(), args.sql.clone())?,
                &args.csv.csv,
            );
            request.csv = csv_options(&args.csv, &config)?;
            request.limit = args.limit;
            request.read_hint = args.read_hint || config.export.read_hint;
            request.validate()?;

            let mut db = SqliteDatabase::open(&db_path, config.database.busy_timeout())?;
            let outcome = Exporter::new(&mut db)
                .with_progress(progress(config.export.progress_every, "exported"))
                .export(&request);
            outcome
        }
        Command::Import(args) => {
            let mut request = ImportRequest::new(args.table.clone(), &args.csv.csv);
            request.csv = csv_options(&args.csv, &config)?;
            request.batch_size = args.batch.unwrap_or(config.import.batch_size);
            request.truncate = args.truncate || config.import.truncate;
            request.skip_errors = args.skip_errors || config.import.skip_errors;
            request.validate()?;

            let mut db = SqliteDatabase::open(&db_path, config.database.busy_timeout())?;
            let outcome = Importer::new(&mut db)
                .with_progress(progress(config.import.progress_every, "imported"))
                .import(&request);
            outcome
        }
    };

    Ok(outcome)
}

/// Merges command-line CSV flags over the configured defaults.
fn csv_options(args: &CsvArgs, config: &Config) -> Result<CsvOptions> {
    let mut options = config.csv.to_options()?;
    if args.no_header {
        options.has_header = false;
    }
    if let Some(delimiter) = &args.delimiter {
        options.delimiter = parse_delimiter(delimiter)?;
    }
    if let Some(mode) = args.binary_format {
        options.binary_mode = mode;
    }
    if let Some(charset) = &args.charset {
        options.charset = Charset::from_name(charset);
    }
    Ok(options)
}

fn progress(every: u64, verb: &'static str) -> Progress<'static> {
    if every == 0 {
        return Progress::silent();
    }
    Progress::every(every, move |rows| info!("{} {} rows", verb, rows))
}

fn report(cli: &Cli, outcome: &TransferOutcome) {
    if cli.json {
        match serde_json::to_string_pretty(&outcome.summary()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize outcome: {}", e),
        }
        return;
    }

    let verb = match cli.command {
        Command::Export(_) => "Exported",
        Command::Import(_) => "Imported",
    };
    println!("{} {} rows", verb, outcome.rows_transferred);
    if outcome.batches_committed > 0 {
        println!("Committed {} batches", outcome.batches_committed);
    }
    if !outcome.skipped_lines.is_empty() {
        let lines: Vec<String> = outcome.skipped_lines.iter().map(u64::to_string).collect();
        println!("Skipped lines: {}", lines.join(", "));
    }
    if let Some(e) = &outcome.error {
        eprintln!("Error: {}", e);
    }
}
