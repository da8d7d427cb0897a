//! File operations for the migration engine: the source scan and the per-file copy.

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path};
use tracing::{debug, info, warn};

use crate::errors::{MigrationError, MigrationResult};
use crate::migration_state::{FileEntry, MigrationState};
use crate::state_store::{LOCK_FILE_NAME, STATE_FILE_NAME, STATE_TEMP_FILE_NAME};

pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Engine bookkeeping files; never cataloged when found at the source root.
const RESERVED_NAMES: [&str; 3] = [STATE_FILE_NAME, STATE_TEMP_FILE_NAME, LOCK_FILE_NAME];

/// Options for walking the source tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Descend into symlinked directories. A link cycle then fails the scan.
    pub follow_links: bool,
}

pub fn metadata_to_datetime(metadata: &fs::Metadata) -> MigrationResult<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(metadata.modified()?))
}

/// Source-relative path with `/` separators, used as the entry's identity.
pub fn relative_path_string(path: &Path, base: &Path) -> MigrationResult<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| MigrationError::InvalidPath(format!("Cannot strip prefix from {:?}", path)))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    MigrationError::InvalidPath(format!("Non UTF-8 file name: {:?}", path))
                })?;
                parts.push(part);
            }
            _ => {
                return Err(MigrationError::InvalidPath(format!(
                    "Unexpected component in {:?}",
                    relative
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

fn has_utf8_name(path: &Path, base: &Path) -> bool {
    path.strip_prefix(base)
        .map_or(true, |relative| relative.to_str().is_some())
}

/// Walks `source` depth-first and catalogs every regular file as a pending entry.
pub fn scan_source(source: &Path, destination: &Path) -> MigrationResult<MigrationState> {
    scan_source_with_options(source, destination, ScanOptions::default())
}

/// Like [`scan_source`], with control over symlinked directories.
///
/// Any error while walking aborts the scan; no partial catalog is returned.
/// Files that cannot be given an identity (non UTF-8 names) and links that do not
/// resolve to a regular file are left out with a warning.
pub fn scan_source_with_options(
    source: &Path,
    destination: &Path,
    options: ScanOptions,
) -> MigrationResult<MigrationState> {
    if !source.exists() {
        return Err(MigrationError::SourceNotFound(source.display().to_string()));
    }

    if !source.is_dir() {
        return Err(MigrationError::InvalidPath(format!(
            "{} is not a directory",
            source.display()
        )));
    }

    let mut state = MigrationState::new(source.to_path_buf(), destination.to_path_buf());
    let mut left_out = 0usize;
    info!(
        source = %source.display(),
        follow_links = options.follow_links,
        "Scanning source directory"
    );

    let walker = walkdir::WalkDir::new(source)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if entry.depth() == 1
            && RESERVED_NAMES
                .iter()
                .any(|name| entry.file_name() == std::ffi::OsStr::new(name))
        {
            debug!(path = %entry.path().display(), "Skipping migration bookkeeping file");
            continue;
        }

        let metadata = if file_type.is_file() {
            entry.metadata()?
        } else if file_type.is_symlink() {
            // Unfollowed link: catalog it when it points at a regular file.
            match fs::metadata(entry.path()) {
                Ok(target) if target.is_file() => target,
                Ok(_) => {
                    warn!(path = %entry.path().display(), "Skipping symlink that is not to a regular file");
                    left_out += 1;
                    continue;
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Skipping dangling symlink");
                    left_out += 1;
                    continue;
                }
            }
        } else {
            warn!(path = %entry.path().display(), "Skipping special file");
            left_out += 1;
            continue;
        };

        if !has_utf8_name(entry.path(), source) {
            warn!(path = %entry.path().display(), "Skipping file with a non UTF-8 name");
            left_out += 1;
            continue;
        }

        let path = relative_path_string(entry.path(), source)?;
        state.files.push(FileEntry::new(
            path,
            metadata.len(),
            metadata_to_datetime(&metadata)?,
        ));
    }

    info!(
        files = state.files.len(),
        bytes = state.total_bytes(),
        left_out,
        "Scan complete"
    );
    Ok(state)
}

fn copy_error(entry: &FileEntry, message: String) -> MigrationError {
    MigrationError::Copy {
        path: entry.path.clone(),
        message,
    }
}

/// Copies one entry from `source_root` to `dest_root`, creating parent directories.
///
/// The destination is created or truncated. Nothing is verified and nothing is rolled
/// back on failure; a later retry overwrites whatever was left behind.
pub fn copy_entry(source_root: &Path, dest_root: &Path, entry: &FileEntry) -> MigrationResult<u64> {
    let source_path = source_root.join(&entry.path);
    let src_file = File::open(&source_path).map_err(|e| {
        copy_error(
            entry,
            format!("failed to open source file {}: {}", entry.path, e),
        )
    })?;

    let dest_path = dest_root.join(&entry.path);
    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            copy_error(
                entry,
                format!(
                    "failed to create destination directory {}: {}",
                    parent.display(),
                    e
                ),
            )
        })?;
    }

    let dest_file = File::create(&dest_path).map_err(|e| {
        copy_error(
            entry,
            format!(
                "failed to create destination file {}: {}",
                dest_path.display(),
                e
            ),
        )
    })?;

    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, src_file);
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, dest_file);
    let write_failed =
        |e: io::Error| copy_error(entry, format!("failed to copy content for file {}: {}", entry.path, e));

    let bytes_copied = io::copy(&mut reader, &mut writer).map_err(write_failed)?;
    writer.flush().map_err(write_failed)?;
    let dest_file = writer
        .into_inner()
        .map_err(|e| write_failed(e.into_error()))?;
    dest_file.sync_all().map_err(write_failed)?;

    Ok(bytes_copied)
}

/// True when the destination already holds a regular file of the catalogued size.
pub fn destination_matches(dest_root: &Path, entry: &FileEntry) -> bool {
    match fs::metadata(dest_root.join(&entry.path)) {
        Ok(metadata) => metadata.is_file() && metadata.len() == entry.size,
        Err(_) => false,
    }
}
