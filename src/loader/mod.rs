//! Input loading for raw rows.
//!
//! Reads rows from a single JSON / JSON Lines file or from a directory
//! tree of such files. Loading is the caller's side of the engine: it only
//! materializes rows, it never validates them.

use crate::models::RawRow;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// File extensions recognised as row files.
const ROW_EXTENSIONS: [&str; 2] = ["json", "jsonl"];

/// Options for loading rows.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Show a spinner while reading files.
    pub show_progress: bool,
    /// Stop after this many files (directory inputs only).
    pub max_files: Option<usize>,
}

/// Load rows from a file or a directory.
pub fn load_rows(path: &Path, options: &LoadOptions) -> Result<Vec<RawRow>> {
    if !path.exists() {
        bail!("Input path does not exist: {}", path.display());
    }

    let files = if path.is_dir() {
        discover_files(path, options.max_files)
    } else {
        vec![path.to_path_buf()]
    };

    if files.is_empty() {
        bail!("No .json or .jsonl files found under {}", path.display());
    }

    let pb = if options.show_progress && files.len() > 1 {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let mut rows = Vec::new();
    for file in &files {
        if let Some(ref pb) = pb {
            pb.set_message(file.display().to_string());
        }
        let mut file_rows = read_file(file)?;
        debug!("Read {} rows from {}", file_rows.len(), file.display());
        rows.append(&mut file_rows);
        if let Some(ref pb) = pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    info!("Loaded {} rows from {} file(s)", rows.len(), files.len());
    Ok(rows)
}

/// Find row files under a directory, sorted by path.
fn discover_files(root: &Path, max_files: Option<usize>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && has_row_extension(e.path()))
        .map(DirEntry::into_path)
        .collect();

    files.sort();
    if let Some(max) = max_files {
        files.truncate(max);
    }
    files
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map_or(false, |name| name.starts_with('.'))
}

fn has_row_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| ROW_EXTENSIONS.contains(&ext))
}

/// Read one file. `.jsonl` holds one object per line, anything else a JSON array.
fn read_file(path: &Path) -> Result<Vec<RawRow>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;

    let is_lines = path.extension().and_then(|e| e.to_str()) == Some("jsonl");
    if is_lines {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                let value: Value = serde_json::from_str(line).with_context(|| {
                    format!("Invalid JSON on line {} of {}", n + 1, path.display())
                })?;
                into_row(value, path)
            })
            .collect()
    } else {
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON in {}", path.display()))?;
        match value {
            Value::Array(items) => items.into_iter().map(|v| into_row(v, path)).collect(),
            _ => bail!("Expected a JSON array of rows in {}", path.display()),
        }
    }
}

fn into_row(value: Value, path: &Path) -> Result<RawRow> {
    match value {
        Value::Object(map) => Ok(map),
        other => bail!(
            "Expected a JSON object per row in {}, found: {}",
            path.display(),
            other
        ),
    }
}
