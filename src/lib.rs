//! Resumable, folder-scoped migration of a directory tree.
//!
//! A run scans the source once into a [`MigrationState`], persists it under the
//! destination, then executes copy passes over chosen top-level folders. Each pass
//! runs on a blocking worker that reports per-file updates through a bounded
//! channel; the [`Coordinator`] applies them to the live state and checkpoints it,
//! so an interrupted run resumes without recopying finished files.

pub mod config;
pub mod coordinator;
pub mod copy_worker;
pub mod errors;
pub mod file_ops;
pub mod migration_state;
pub mod report;
pub mod state_store;

pub use config::{Args, EngineConfig, ResumeMode};
pub use coordinator::{Coordinator, ProgressEvent};
pub use copy_worker::{CopyPass, FileCopier, LocalCopier, PassOutcome, Selection, StopSignal};
pub use errors::{MigrationError, MigrationResult};
pub use file_ops::ScanOptions;
pub use migration_state::{FileEntry, FileStatus, FolderInfo, MigrationState};
pub use report::MigrationSummary;
pub use state_store::{DestinationLock, StateStore};
