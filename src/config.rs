use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::copy_worker::{Selection, WorkerOptions};
use crate::file_ops::ScanOptions;

pub const DEFAULT_CHECKPOINT_SECS: u64 = 5;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Source directory to migrate
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Destination directory; the migration state is kept here
    #[arg(value_name = "DESTINATION")]
    pub destination: PathBuf,

    /// Resume from the saved state; fail if there is none
    #[arg(long, conflicts_with = "fresh")]
    pub resume: bool,

    /// Ignore any saved state and rescan the source
    #[arg(long)]
    pub fresh: bool,

    /// Top-level folder to copy (repeatable). Copies every folder when omitted
    #[arg(short = 'f', long = "folder", value_name = "NAME")]
    pub folders: Vec<String>,

    /// Print the top-level folders with their status and exit
    #[arg(long, default_value_t = false)]
    pub list_folders: bool,

    /// Print a migration summary and exit
    #[arg(long, default_value_t = false)]
    pub summary: bool,

    /// Seconds between state checkpoints during a copy pass
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_SECS)]
    pub checkpoint_secs: u64,

    /// Capacity of the worker update queue
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Mark files already present at the destination with the same size as skipped
    #[arg(long, default_value_t = false)]
    pub skip_existing: bool,

    /// Descend into symlinked directories while scanning
    #[arg(long, default_value_t = false)]
    pub follow_links: bool,

    /// Suppress non-error messages
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Increase verbosity
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    pub fn resume_mode(&self) -> ResumeMode {
        if self.resume {
            ResumeMode::Resume
        } else if self.fresh {
            ResumeMode::Fresh
        } else {
            ResumeMode::Auto
        }
    }

    pub fn selection(&self) -> Selection {
        Selection::folders(self.folders.iter().cloned())
    }
}

/// How to treat an existing snapshot at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Resume when a snapshot exists, otherwise scan.
    Auto,
    Resume,
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub checkpoint_interval: Duration,
    pub channel_capacity: usize,
    pub skip_existing: bool,
    pub follow_links: bool,
}

impl EngineConfig {
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            skip_existing: self.skip_existing,
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            follow_links: self.follow_links,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: Duration::from_secs(DEFAULT_CHECKPOINT_SECS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            skip_existing: false,
            follow_links: false,
        }
    }
}

impl From<&Args> for EngineConfig {
    fn from(args: &Args) -> Self {
        Self {
            checkpoint_interval: Duration::from_secs(args.checkpoint_secs.max(1)),
            channel_capacity: args.channel_capacity.max(1),
            skip_existing: args.skip_existing,
            follow_links: args.follow_links,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["migrator", "/src", "/dst"]);
        assert_eq!(args.resume_mode(), ResumeMode::Auto);
        assert!(args.selection().is_all());
        assert_eq!(EngineConfig::from(&args), EngineConfig::default());
    }

    #[test]
    fn test_folder_selection_and_flags() {
        let args = Args::parse_from([
            "migrator",
            "/src",
            "/dst",
            "--resume",
            "-f",
            "A",
            "--folder",
            "B",
            "--checkpoint-secs",
            "0",
            "--skip-existing",
            "--follow-links",
        ]);
        assert_eq!(args.resume_mode(), ResumeMode::Resume);
        assert_eq!(args.selection().names(), vec!["A", "B"]);

        let config = EngineConfig::from(&args);
        assert_eq!(config.checkpoint_interval, Duration::from_secs(1));
        assert!(config.worker_options().skip_existing);
        assert!(config.scan_options().follow_links);
    }

    #[test]
    fn test_resume_conflicts_with_fresh() {
        assert!(Args::try_parse_from(["migrator", "/src", "/dst", "--resume", "--fresh"]).is_err());
    }
}
