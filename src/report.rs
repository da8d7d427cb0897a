//! Read-only summaries of a migration state for reporting.

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::migration_state::{FileEntry, FileStatus, MigrationState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderSummary {
    pub total_files: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pending: usize,
    pub bytes_transferred: u64,
}

impl FolderSummary {
    fn record(&mut self, entry: &FileEntry) {
        self.total_files += 1;
        match entry.status {
            FileStatus::Copied => {
                self.copied += 1;
                self.bytes_transferred += entry.size;
            }
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Failed => self.failed += 1,
            FileStatus::Pending | FileStatus::InProgress => self.pending += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub totals: FolderSummary,
    pub bytes_total: u64,
    pub success_rate: String,
    pub duration: String,
    pub folders: BTreeMap<String, FolderSummary>,
    pub failed_files: Vec<FileEntry>,
}

impl MigrationSummary {
    /// Summarizes `state` as of `now`; a recorded end time takes precedence.
    pub fn from_state(state: &MigrationState, now: DateTime<Utc>) -> Self {
        let mut totals = FolderSummary::default();
        let mut folders: BTreeMap<String, FolderSummary> = BTreeMap::new();
        let mut failed_files = Vec::new();

        for entry in &state.files {
            totals.record(entry);
            folders
                .entry(entry.top_level_folder().to_string())
                .or_default()
                .record(entry);
            if entry.status == FileStatus::Failed {
                failed_files.push(entry.clone());
            }
        }

        let end_time = state.end_time.unwrap_or(now);
        Self {
            source: state.source.clone(),
            destination: state.destination.clone(),
            start_time: state.start_time,
            end_time,
            success_rate: success_rate(&totals),
            duration: format_duration(end_time - state.start_time),
            bytes_total: state.total_bytes(),
            totals,
            folders,
            failed_files,
        }
    }
}

fn success_rate(totals: &FolderSummary) -> String {
    if totals.total_files == 0 {
        return "N/A".to_string();
    }
    let done = (totals.copied + totals.skipped) as f64;
    format!("{:.2}%", done / totals.total_files as f64 * 100.0)
}

pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let units = ["KB", "MB", "GB", "TB", "PB", "EB"];
    let mut value = bytes as f64 / UNIT as f64;
    let mut unit = 0;
    while value >= UNIT as f64 && unit < units.len() - 1 {
        value /= UNIT as f64;
        unit += 1;
    }
    format!("{:.1} {}", value, units[unit])
}

/// `HH:MM:SS`; hours are not wrapped. Negative spans read as zero.
pub fn format_duration(delta: TimeDelta) -> String {
    let secs = delta.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) if t.year() > 1 => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => "N/A".to_string(),
    }
}
