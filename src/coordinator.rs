//! Owns the live migration state for a run: launches copy passes, applies their
//! updates, and checkpoints the state to the store.

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ResumeMode};
use crate::copy_worker::{CopyPass, FileCopier, LocalCopier, PassOutcome, Selection, StopSignal};
use crate::errors::{MigrationError, MigrationResult};
use crate::file_ops::scan_source_with_options;
use crate::migration_state::{FileEntry, FileStatus, FolderInfo, MigrationState};
use crate::state_store::StateStore;

/// Live progress for observers, emitted after each applied update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub entry: FileEntry,
    pub files_done: usize,
    pub files_in_scope: usize,
    pub bytes_copied: u64,
    pub bytes_in_scope: u64,
    pub files_failed: usize,
}

#[derive(Debug, Default)]
struct PassProgress {
    files_done: usize,
    files_in_scope: usize,
    bytes_copied: u64,
    bytes_in_scope: u64,
    files_failed: usize,
}

impl PassProgress {
    fn record(&mut self, entry: &FileEntry) {
        match entry.status {
            FileStatus::Copied => {
                self.files_done += 1;
                self.bytes_copied += entry.size;
            }
            FileStatus::Skipped => self.files_done += 1,
            FileStatus::Failed => {
                self.files_done += 1;
                self.files_failed += 1;
            }
            FileStatus::Pending | FileStatus::InProgress => {}
        }
    }

    fn event(&self, entry: FileEntry) -> ProgressEvent {
        ProgressEvent {
            entry,
            files_done: self.files_done,
            files_in_scope: self.files_in_scope,
            bytes_copied: self.bytes_copied,
            bytes_in_scope: self.bytes_in_scope,
            files_failed: self.files_failed,
        }
    }
}

pub struct Coordinator {
    state: MigrationState,
    store: StateStore,
    index: HashMap<String, usize>,
    config: EngineConfig,
    copier: Arc<dyn FileCopier>,
    observer: Option<mpsc::Sender<ProgressEvent>>,
}

impl Coordinator {
    pub fn new(state: MigrationState, config: EngineConfig) -> Self {
        let store = StateStore::new(state.destination.clone());
        let index = state
            .files
            .iter()
            .enumerate()
            .map(|(i, e)| (e.path.clone(), i))
            .collect();
        Self {
            state,
            store,
            index,
            config,
            copier: Arc::new(LocalCopier),
            observer: None,
        }
    }

    /// Loads or scans according to `mode` and persists the resulting state.
    /// Returns the coordinator and whether an existing snapshot was resumed.
    pub fn open(
        source: &Path,
        destination: &Path,
        mode: ResumeMode,
        config: EngineConfig,
    ) -> MigrationResult<(Self, bool)> {
        let store = StateStore::new(destination);

        let loaded = match mode {
            ResumeMode::Fresh => None,
            ResumeMode::Resume => Some(store.load()?),
            ResumeMode::Auto => match store.load() {
                Ok(state) => Some(state),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            },
        };

        let (state, resumed) = match loaded {
            Some(mut state) => {
                if state.destination != destination {
                    warn!(
                        saved = %state.destination.display(),
                        found_at = %destination.display(),
                        "Saved state names another destination; using the directory it was found in"
                    );
                    state.destination = destination.to_path_buf();
                }
                if state.source != source {
                    warn!(
                        saved = %state.source.display(),
                        requested = %source.display(),
                        "Saved state was created for a different source; keeping the saved source"
                    );
                }
                info!(
                    files = state.files.len(),
                    destination = %destination.display(),
                    "Resuming migration"
                );
                (state, true)
            }
            None => {
                info!(
                    source = %source.display(),
                    destination = %destination.display(),
                    "Starting new migration"
                );
                (
                    scan_source_with_options(source, destination, config.scan_options())?,
                    false,
                )
            }
        };

        let coordinator = Self::new(state, config);
        coordinator.checkpoint()?;
        Ok((coordinator, resumed))
    }

    pub fn with_copier(mut self, copier: Arc<dyn FileCopier>) -> Self {
        self.copier = copier;
        self
    }

    /// Forwards every applied update to `observer`. Delivery is best effort.
    pub fn set_observer(&mut self, observer: mpsc::Sender<ProgressEvent>) {
        self.observer = Some(observer);
    }

    pub fn state(&self) -> &MigrationState {
        &self.state
    }

    pub fn snapshot(&self) -> MigrationState {
        self.state.clone()
    }

    pub fn into_state(self) -> MigrationState {
        self.state
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn folders(&self) -> Vec<FolderInfo> {
        self.state.top_level_folders()
    }

    pub fn checkpoint(&self) -> MigrationResult<()> {
        self.store.save(&self.state)
    }

    /// Saves a copy of the state on the blocking pool, off the update loop's thread.
    async fn checkpoint_off_thread(&self) -> MigrationResult<()> {
        let store = self.store.clone();
        let snapshot = self.state.clone();
        tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| MigrationError::Internal(format!("State save task failed: {}", e)))?
    }

    async fn checkpoint_logged(&self) {
        if let Err(e) = self.checkpoint_off_thread().await {
            warn!(error = %e, "Periodic state save failed; will retry on the next tick");
        }
    }

    fn apply(&mut self, update: FileEntry, progress: &mut PassProgress) {
        let Some(&i) = self.index.get(&update.path) else {
            warn!(path = %update.path, "Update for unknown path ignored");
            return;
        };
        self.state.files[i].absorb(&update);
        progress.record(&update);

        if let Some(observer) = &self.observer {
            if observer.try_send(progress.event(update)).is_err() {
                debug!("Progress observer is full or gone; dropping event");
            }
        }
    }

    /// Runs one copy pass over `selection` and persists the state when it ends.
    ///
    /// Updates are applied as they arrive and the state is saved on a fixed interval.
    /// A stop request is passed to the worker, which finishes the current file; the
    /// pass returns once the worker has closed its update channel.
    pub async fn run_pass(
        &mut self,
        selection: Selection,
        stop: Arc<StopSignal>,
    ) -> MigrationResult<PassOutcome> {
        let mut progress = PassProgress::default();
        for entry in &self.state.files {
            if selection.contains(entry) && entry.status.is_redo_eligible() {
                progress.files_in_scope += 1;
                progress.bytes_in_scope += entry.size;
            }
        }
        info!(
            folders = ?selection.names(),
            files = progress.files_in_scope,
            bytes = progress.bytes_in_scope,
            "Starting copy pass"
        );

        let pass = CopyPass {
            source: self.state.source.clone(),
            destination: self.state.destination.clone(),
            files: self.state.files.clone(),
            selection,
            options: self.config.worker_options(),
        };

        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let copier = self.copier.clone();
        let worker_stop = stop.clone();
        let worker =
            tokio::task::spawn_blocking(move || pass.run(copier.as_ref(), &worker_stop, tx));

        let period = self.config.checkpoint_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop_seen = false;

        loop {
            tokio::select! {
                update = rx.recv() => match update {
                    Some(update) => self.apply(update, &mut progress),
                    None => break,
                },
                _ = ticker.tick() => self.checkpoint_logged().await,
                _ = stop.stopped(), if !stop_seen => {
                    stop_seen = true;
                    info!("Stop requested; waiting for the current file to finish");
                }
            }
        }

        let outcome = worker
            .await
            .map_err(|e| MigrationError::Internal(format!("Copy worker failed: {}", e)))?;

        self.checkpoint_off_thread().await?;
        Ok(outcome)
    }
}
