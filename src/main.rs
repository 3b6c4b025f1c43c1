//! LeadLens - leadership KPI engine
//!
//! A CLI that loads observation rows, runs a query of filters and KPI
//! requests against them and writes a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad input, invalid query, config failure, etc.)
//!   2 - Rows were rejected and --fail-on-rejects is set

mod cli;
mod config;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use leadlens::loader::{self, LoadOptions};
use leadlens::models::RejectReason;
use leadlens::pipeline::{self, Query};
use leadlens::report::{self, Report, ReportMetadata, ReportOptions};
use leadlens::schema;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("LeadLens v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .leadlens.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    std::fs::write(path, Config::default_toml())
        .with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Declare metric ranges under [schema.metrics.<name>].");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// Logs go to stderr so a report written to stdout stays clean.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: a tracing subscriber was already installed");
    }
}

/// Run the complete workflow. Returns the exit code (0 or 2).
fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let input = args
        .input
        .as_deref()
        .context("An --input path is required")?;

    let load_options = LoadOptions {
        show_progress: !args.quiet,
        max_files: Some(config.loader.max_files),
    };
    let rows = loader::load_rows(input, &load_options)?;

    if args.dry_run {
        return handle_dry_run(&rows, &config);
    }

    let query = match args.query {
        Some(ref path) => load_query(path)?,
        None => {
            debug!("No query given, reporting summary only");
            Query::default()
        }
    };

    let response = pipeline::run(&rows, &query, &config.schema)
        .context("Query could not be executed")?;

    if !response.rejected.is_empty() {
        warn!("{} of {} rows were rejected", response.rejected.len(), rows.len());
    }

    let rejected = response.rejected.len();
    let report = Report {
        metadata: ReportMetadata {
            input: input.display().to_string(),
            generated_at: Utc::now(),
            rows_loaded: rows.len(),
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        response,
    };

    let report_options = ReportOptions {
        include_summary: config.report.include_summary,
        max_rejections_listed: config.report.max_rejections_listed,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report, &report_options),
    };

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &output)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !args.quiet {
                eprintln!("✅ Report saved to: {}", path.display());
            }
        }
        None => println!("{}", output),
    }

    if config.general.fail_on_rejects && rejected > 0 {
        eprintln!(
            "\n⛔ {} rows were rejected. Failing (exit code 2).",
            rejected
        );
        return Ok(2);
    }

    Ok(0)
}

/// Handle --dry-run: validate rows, print the rejection summary, exit.
fn handle_dry_run(rows: &[leadlens::models::RawRow], config: &Config) -> Result<i32> {
    let validation = schema::validate(rows, &config.schema);
    let counts = validation.reject_counts();

    println!("\n🔍 Dry run: validated {} rows\n", rows.len());
    println!("   Accepted: {}", validation.valid.len());
    println!("   Rejected: {}", validation.rejected.len());
    for reason in [
        RejectReason::MissingField,
        RejectReason::TypeMismatch,
        RejectReason::OutOfRange,
    ] {
        if let Some(count) = counts.get(&reason) {
            println!("     - {}: {}", reason, count);
        }
    }

    if config.general.fail_on_rejects && !validation.rejected.is_empty() {
        return Ok(2);
    }
    Ok(0)
}

/// Read and parse a query file.
fn load_query(path: &Path) -> Result<Query> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read query file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse query file: {}", path.display()))
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    resolve_config(args.config.as_deref(), Path::new("."))
}

/// Load the explicit config if given, else `.leadlens.toml` in `dir`.
///
/// A config file that exists but cannot be parsed is an error: its metric
/// ranges must never be silently replaced by the defaults.
fn resolve_config(explicit: Option<&Path>, dir: &Path) -> Result<Config> {
    if let Some(config_path) = explicit {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_from_dir(dir)? {
        Some(config) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}
