//! Retention cleanup of archived results.
//!
//! Removes `<root>/<ticker>/<YYYY-MM-DD>` directories whose date lies
//! further back than the retention window, then drops ticker directories
//! left empty. Directory names that are not dates are skipped.

use std::fs;
use std::path::Path;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use walkdir::WalkDir;

/// What a cleanup pass did (or would do, in a dry run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub cleaned_directories: usize,
    pub cleaned_files: usize,
    pub removed_empty_tickers: usize,
    pub skipped: usize,
    pub errors: usize,
    pub bytes_freed: u64,
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

fn directory_usage(path: &Path) -> (usize, u64) {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .fold((0, 0), |(files, bytes), entry| {
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (files + 1, bytes + len)
        })
}

fn subdirectories(path: &Path) -> Vec<std::path::PathBuf> {
    match fs::read_dir(path) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .map(|e| e.path())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Remove result directories older than `days_to_keep` days before `now`.
pub fn cleanup_results(
    root: &Path,
    days_to_keep: u32,
    now: NaiveDateTime,
    dry_run: bool,
) -> CleanupStats {
    let mut stats = CleanupStats::default();
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "results directory does not exist");
        return stats;
    }

    let cutoff = now - ChronoDuration::days(i64::from(days_to_keep));
    tracing::info!(days_to_keep, %cutoff, dry_run, "cleaning expired results");

    for ticker_dir in subdirectories(root) {
        for date_dir in subdirectories(&ticker_dir) {
            let name = date_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let Ok(date) = NaiveDate::parse_from_str(&name, "%Y-%m-%d") else {
                tracing::debug!(dir = %date_dir.display(), "not a date directory, skipping");
                stats.skipped += 1;
                continue;
            };

            if date.and_hms_opt(0, 0, 0).is_some_and(|start| start >= cutoff) {
                continue;
            }

            let (files, bytes) = directory_usage(&date_dir);
            if !dry_run {
                if let Err(err) = fs::remove_dir_all(&date_dir) {
                    tracing::error!(dir = %date_dir.display(), error = %err, "could not remove directory");
                    stats.errors += 1;
                    continue;
                }
            }
            tracing::info!(dir = %date_dir.display(), files, dry_run, "removed expired directory");
            stats.cleaned_directories += 1;
            stats.cleaned_files += files;
            stats.bytes_freed += bytes;
        }

        let empty = fs::read_dir(&ticker_dir).map(|mut d| d.next().is_none()).unwrap_or(false);
        if empty && !dry_run {
            match fs::remove_dir(&ticker_dir) {
                Ok(()) => stats.removed_empty_tickers += 1,
                Err(err) => {
                    tracing::warn!(dir = %ticker_dir.display(), error = %err, "could not remove empty directory");
                    stats.errors += 1;
                }
            }
        }
    }

    tracing::info!(
        directories = stats.cleaned_directories,
        files = stats.cleaned_files,
        freed = %format_size(stats.bytes_freed),
        errors = stats.errors,
        skipped = stats.skipped,
        "cleanup finished"
    );
    stats
}
