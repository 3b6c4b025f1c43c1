//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// LeadLens - leadership KPI engine
///
/// Validate raw observation rows, filter them and compute KPIs.
/// Markdown/JSON reports. Built in Rust.
///
/// Examples:
///   leadlens --input data/rows.json --query query.json
///   leadlens --input data/ --query query.json --format json -o report.json
///   leadlens --input data/rows.json --dry-run
///   leadlens --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Row file (.json array or .jsonl) or a directory of row files
    #[arg(short, long, value_name = "PATH", required_unless_present = "init_config")]
    pub input: Option<PathBuf>,

    /// Query file with filters and KPI requests (JSON)
    ///
    /// Without a query, only the dataset summary and rejections are reported.
    #[arg(long, value_name = "FILE", env = "LEADLENS_QUERY")]
    pub query: Option<PathBuf>,

    /// Output file path for the report (stdout if omitted)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .leadlens.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Maximum number of files read from an input directory
    #[arg(long, value_name = "COUNT")]
    pub max_files: Option<usize>,

    /// Leave the dataset summary out of the report
    #[arg(long)]
    pub no_summary: bool,

    /// Exit with code 2 when any row is rejected
    #[arg(long)]
    pub fail_on_rejects: bool,

    /// Validate rows only and print the rejection summary
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .leadlens.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        match self.input {
            Some(ref input) if !input.exists() => {
                return Err(format!("Input path does not exist: {}", input.display()));
            }
            None => return Err("An --input path is required".to_string()),
            _ => {}
        }

        if let Some(ref query) = self.query {
            if !query.is_file() {
                return Err(format!("Query file not found: {}", query.display()));
            }
        }

        if self.max_files == Some(0) {
            return Err("Max files must be at least 1".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
