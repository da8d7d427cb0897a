//! Durable snapshots of migration progress, keyed by destination directory.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{MigrationError, MigrationResult};
use crate::migration_state::MigrationState;

pub const STATE_FILE_NAME: &str = ".migration.state.json";
pub const STATE_TEMP_FILE_NAME: &str = ".migration.state.json.tmp";
pub const LOCK_FILE_NAME: &str = ".migration.lock";

/// Reads and writes the snapshot under a destination root. Holds no live state.
#[derive(Debug, Clone)]
pub struct StateStore {
    destination: PathBuf,
}

impl StateStore {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.destination.join(STATE_FILE_NAME)
    }

    fn temp_file_path(&self) -> PathBuf {
        self.destination.join(STATE_TEMP_FILE_NAME)
    }

    pub fn exists(&self) -> bool {
        self.state_file_path().is_file()
    }

    /// Writes the full snapshot. The previous snapshot is replaced by rename, so a
    /// crash mid-write leaves either the old or the new file, never a truncated one.
    pub fn save(&self, state: &MigrationState) -> MigrationResult<()> {
        fs::create_dir_all(&self.destination)?;

        let state_file = self.state_file_path();
        let temp_file = self.temp_file_path();

        let content = serde_json::to_vec_pretty(state)?;
        {
            let mut file = File::create(&temp_file)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&temp_file, &state_file)?;

        debug!(
            path = %state_file.display(),
            files = state.files.len(),
            "Persisted migration state"
        );
        Ok(())
    }

    /// Loads the snapshot, reporting a missing file as [`MigrationError::StateNotFound`]
    /// and an unparsable one as [`MigrationError::CorruptState`].
    pub fn load(&self) -> MigrationResult<MigrationState> {
        let state_file = self.state_file_path();
        let content = match fs::read(&state_file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(MigrationError::StateNotFound(state_file));
            }
            Err(e) => return Err(e.into()),
        };

        let mut state: MigrationState =
            serde_json::from_slice(&content).map_err(|source| MigrationError::CorruptState {
                path: state_file.clone(),
                source,
            })?;

        let requeued = state.normalize_after_load();
        if requeued > 0 {
            warn!(
                requeued,
                "Snapshot had interrupted copies; they are pending again"
            );
        }
        Ok(state)
    }

    /// Takes the advisory lock for this destination, creating the directory if needed.
    ///
    /// The lock file records the owner's PID. A lock whose owner is no longer running
    /// is treated as stale and replaced.
    pub fn lock(&self) -> MigrationResult<DestinationLock> {
        fs::create_dir_all(&self.destination)?;
        let path = self.destination.join(LOCK_FILE_NAME);

        let mut file = match create_lock_file(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match lock_owner(&path) {
                Some(pid) if !process_alive(pid) => {
                    warn!(path = %path.display(), pid, "Replacing stale lock left by an exited process");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                    create_lock_file(&path).map_err(|e| {
                        if e.kind() == ErrorKind::AlreadyExists {
                            MigrationError::DestinationLocked(path.clone())
                        } else {
                            e.into()
                        }
                    })?
                }
                _ => return Err(MigrationError::DestinationLocked(path)),
            },
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        Ok(DestinationLock { path })
    }
}

fn create_lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// PID recorded in a lock file, if it holds one.
fn lock_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness check every recorded owner counts as running.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Lock file guard; the file is removed when the guard drops.
#[derive(Debug)]
pub struct DestinationLock {
    path: PathBuf,
}

impl DestinationLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DestinationLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}
