//! Migration state model for resumable, folder-scoped migrations.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    InProgress,
    Copied,
    Skipped,
    Failed,
}

impl FileStatus {
    /// Statuses a copy pass is allowed to pick up.
    pub fn is_redo_eligible(self) -> bool {
        matches!(self, FileStatus::Pending | FileStatus::Failed)
    }

    pub fn is_done(self) -> bool {
        matches!(self, FileStatus::Copied | FileStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::InProgress => "in_progress",
            FileStatus::Copied => "copied",
            FileStatus::Skipped => "skipped",
            FileStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked file. `path` is relative to the source root and identifies the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub modified_time: DateTime<Utc>,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl FileEntry {
    pub fn new(path: String, size: u64, modified_time: DateTime<Utc>) -> Self {
        Self {
            path,
            size,
            modified_time,
            status: FileStatus::Pending,
            error: String::new(),
        }
    }

    pub fn mark_in_progress(&mut self) {
        self.status = FileStatus::InProgress;
    }

    pub fn mark_copied(&mut self) {
        self.status = FileStatus::Copied;
        self.error.clear();
    }

    pub fn mark_skipped(&mut self) {
        self.status = FileStatus::Skipped;
        self.error.clear();
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = FileStatus::Failed;
        self.error = error;
    }

    /// Puts the entry back in the queue. Used when a pass stops before touching it.
    pub fn mark_pending(&mut self) {
        self.status = FileStatus::Pending;
        self.error.clear();
    }

    /// Copies the mutable part of `update` into this entry. Identity fields stay as scanned.
    pub fn absorb(&mut self, update: &FileEntry) {
        self.status = update.status;
        self.error.clone_from(&update.error);
    }

    /// First path segment; root-level files are their own folder.
    pub fn top_level_folder(&self) -> &str {
        top_level_folder(&self.path)
    }
}

pub fn top_level_folder(path: &str) -> &str {
    path.split(|c: char| c == '/' || c == std::path::MAIN_SEPARATOR)
        .find(|segment| !segment.is_empty())
        .unwrap_or("")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: FileStatus) {
        self.total += 1;
        match status {
            FileStatus::Pending => self.pending += 1,
            FileStatus::InProgress => self.in_progress += 1,
            FileStatus::Copied => self.copied += 1,
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Failed => self.failed += 1,
        }
    }

    /// Folder-level status: any failure wins, then outstanding work, then done.
    pub fn aggregate_status(&self) -> FileStatus {
        if self.failed > 0 {
            FileStatus::Failed
        } else if self.pending > 0 {
            FileStatus::Pending
        } else if self.in_progress > 0 {
            FileStatus::InProgress
        } else if self.total > 0 && self.skipped == self.total {
            FileStatus::Skipped
        } else {
            FileStatus::Copied
        }
    }
}

/// Read-side projection of one top-level folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderInfo {
    pub name: String,
    pub status: FileStatus,
    pub file_count: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub files: Vec<FileEntry>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl MigrationState {
    pub fn new(source: PathBuf, destination: PathBuf) -> Self {
        Self {
            source,
            destination,
            files: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Brings a freshly loaded snapshot back to a resumable shape.
    ///
    /// An entry found `in_progress` was interrupted mid-copy and is requeued.
    /// Error text on non-failed entries is dropped. An unset start time is reset.
    pub fn normalize_after_load(&mut self) -> usize {
        let mut requeued = 0;
        for entry in &mut self.files {
            match entry.status {
                FileStatus::InProgress => {
                    entry.mark_pending();
                    requeued += 1;
                }
                FileStatus::Failed => {}
                _ => entry.error.clear(),
            }
        }
        if self.start_time.year() <= 1 {
            self.start_time = Utc::now();
        }
        requeued
    }

    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|e| e.path == path)
    }

    /// Last-write-wins update keyed by path. Returns false for unknown paths.
    pub fn apply_update(&mut self, update: &FileEntry) -> bool {
        match self.files.iter_mut().find(|e| e.path == update.path) {
            Some(entry) => {
                entry.absorb(update);
                true
            }
            None => false,
        }
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in &self.files {
            counts.record(entry.status);
        }
        counts
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|e| e.size).sum()
    }

    pub fn copied_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter(|e| e.status == FileStatus::Copied)
            .map(|e| e.size)
            .sum()
    }

    /// Distinct top-level folders, sorted by name, each with its aggregated status.
    pub fn top_level_folders(&self) -> Vec<FolderInfo> {
        let mut folders: BTreeMap<&str, (StatusCounts, u64)> = BTreeMap::new();
        for entry in &self.files {
            let name = entry.top_level_folder();
            if name.is_empty() {
                continue;
            }
            let (counts, bytes) = folders.entry(name).or_default();
            counts.record(entry.status);
            *bytes += entry.size;
        }

        folders
            .into_iter()
            .map(|(name, (counts, total_bytes))| FolderInfo {
                name: name.to_string(),
                status: counts.aggregate_status(),
                file_count: counts.total,
                total_bytes,
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.files.iter().all(|e| e.status.is_done())
    }
}
