//! The copy pass: walks the catalog in order and copies in-scope, unfinished entries.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::errors::MigrationResult;
use crate::file_ops::{copy_entry, destination_matches};
use crate::migration_state::FileEntry;

/// Cooperative stop flag shared between the foreground, the worker and the coordinator.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once [`StopSignal::stop`] has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Top-level folder names a pass is scoped to. Empty means every folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    folders: HashSet<String>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn folders<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            folders: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_all(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn contains(&self, entry: &FileEntry) -> bool {
        if self.folders.is_empty() {
            return true;
        }
        let folder = entry.top_level_folder();
        !folder.is_empty() && self.folders.contains(folder)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.folders.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Seam between the pass and the bytes-moving code.
pub trait FileCopier: Send + Sync {
    fn copy(&self, source_root: &Path, dest_root: &Path, entry: &FileEntry) -> MigrationResult<u64>;
}

/// Copies between two local directory trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCopier;

impl FileCopier for LocalCopier {
    fn copy(&self, source_root: &Path, dest_root: &Path, entry: &FileEntry) -> MigrationResult<u64> {
        copy_entry(source_root, dest_root, entry)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Mark entries `skipped` when the destination already holds a file of the same size.
    pub skip_existing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassOutcome {
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_copied: u64,
    pub stopped: bool,
    pub elapsed: Duration,
}

impl PassOutcome {
    pub fn attempted(&self) -> usize {
        self.copied + self.skipped + self.failed
    }
}

/// One copy pass over a private copy of the catalog.
///
/// The pass never touches the live state; every status change leaves as a
/// [`FileEntry`] through the bounded sink, in `in_progress` then terminal order.
#[derive(Debug, Clone)]
pub struct CopyPass {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub files: Vec<FileEntry>,
    pub selection: Selection,
    pub options: WorkerOptions,
}

impl CopyPass {
    /// Runs the pass to completion or until `stop` fires. Must be called off the async
    /// runtime because emitting blocks when the sink is full. The sink is dropped on
    /// return, which is how the consumer learns the pass is over.
    pub fn run<C: FileCopier + ?Sized>(
        mut self,
        copier: &C,
        stop: &StopSignal,
        sink: mpsc::Sender<FileEntry>,
    ) -> PassOutcome {
        let started = Instant::now();
        let mut outcome = PassOutcome::default();

        for entry in self.files.iter_mut() {
            if !self.selection.contains(entry) || !entry.status.is_redo_eligible() {
                continue;
            }

            if stop.is_stopped() {
                info!(path = %entry.path, "Stop received, leaving remaining files for the next run");
                entry.mark_pending();
                let _ = sink.blocking_send(entry.clone());
                outcome.stopped = true;
                break;
            }

            entry.mark_in_progress();
            if sink.blocking_send(entry.clone()).is_err() {
                warn!("Update channel closed, abandoning pass");
                outcome.stopped = true;
                break;
            }

            if self.options.skip_existing && destination_matches(&self.destination, entry) {
                debug!(path = %entry.path, "Destination already present, skipping");
                entry.mark_skipped();
                outcome.skipped += 1;
            } else {
                match copier.copy(&self.source, &self.destination, entry) {
                    Ok(bytes) => {
                        entry.mark_copied();
                        outcome.copied += 1;
                        outcome.bytes_copied += bytes;
                    }
                    Err(e) => {
                        warn!(path = %entry.path, error = %e, "Copy failed");
                        entry.mark_failed(e.to_string());
                        outcome.failed += 1;
                    }
                }
            }

            if sink.blocking_send(entry.clone()).is_err() {
                warn!("Update channel closed, abandoning pass");
                outcome.stopped = true;
                break;
            }
        }

        outcome.elapsed = started.elapsed();
        info!(
            copied = outcome.copied,
            skipped = outcome.skipped,
            failed = outcome.failed,
            bytes = outcome.bytes_copied,
            stopped = outcome.stopped,
            "Copy pass finished"
        );
        outcome
    }
}
