use migrator_lib::{
    Coordinator, EngineConfig, FileCopier, FileEntry, FileStatus, LocalCopier, MigrationError,
    MigrationResult, ResumeMode, Selection, StateStore, StopSignal,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, len: usize) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, vec![b'x'; len]).unwrap();
}

fn status_of(coordinator: &Coordinator, path: &str) -> FileStatus {
    coordinator.state().entry(path).unwrap().status
}

/// Counts real copies and can stop the run after a given number of them.
struct CountingCopier {
    calls: AtomicUsize,
    stop_after: Option<(usize, Arc<StopSignal>)>,
}

impl CountingCopier {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            stop_after: None,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FileCopier for CountingCopier {
    fn copy(&self, source_root: &Path, dest_root: &Path, entry: &FileEntry) -> MigrationResult<u64> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let result = LocalCopier.copy(source_root, dest_root, entry);
        if let Some((after, stop)) = &self.stop_after {
            if n == *after {
                stop.stop();
            }
        }
        result
    }
}

fn sample_tree() -> TempDir {
    let src = TempDir::new().unwrap();
    write(src.path(), "A/1.txt", 10);
    write(src.path(), "A/2.txt", 20);
    write(src.path(), "B/3.txt", 5);
    src
}

#[tokio::test]
async fn test_selected_folder_pass() {
    let src = sample_tree();
    let dst = TempDir::new().unwrap();

    let (mut coordinator, resumed) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Auto, EngineConfig::default())
            .unwrap();
    assert!(!resumed);
    assert_eq!(coordinator.state().files.len(), 3);
    assert_eq!(coordinator.state().total_bytes(), 35);

    let outcome = coordinator
        .run_pass(Selection::folders(["A"]), Arc::new(StopSignal::new()))
        .await
        .unwrap();

    assert_eq!(outcome.bytes_copied, 30);
    assert_eq!(status_of(&coordinator, "A/1.txt"), FileStatus::Copied);
    assert_eq!(status_of(&coordinator, "A/2.txt"), FileStatus::Copied);
    assert_eq!(status_of(&coordinator, "B/3.txt"), FileStatus::Pending);
    assert_eq!(coordinator.state().copied_bytes(), 30);
    assert!(dst.path().join("A/2.txt").is_file());
    assert!(!dst.path().join("B").exists());

    let persisted = StateStore::new(dst.path()).load().unwrap();
    assert_eq!(persisted.files, coordinator.state().files);
}

#[tokio::test]
async fn test_resume_after_full_pass_copies_nothing() {
    let src = sample_tree();
    let dst = TempDir::new().unwrap();

    let (mut first, _) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Auto, EngineConfig::default())
            .unwrap();
    first
        .run_pass(Selection::all(), Arc::new(StopSignal::new()))
        .await
        .unwrap();
    assert!(first.state().is_complete());
    drop(first);

    let copier = Arc::new(CountingCopier::new());
    let (second, resumed) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Resume, EngineConfig::default())
            .unwrap();
    assert!(resumed);
    let mut second = second.with_copier(copier.clone());
    let outcome = second
        .run_pass(Selection::all(), Arc::new(StopSignal::new()))
        .await
        .unwrap();

    assert_eq!(copier.calls(), 0);
    assert_eq!(outcome.attempted(), 0);
}

#[tokio::test]
async fn test_failure_is_isolated_and_retried() {
    let src = sample_tree();
    let dst = TempDir::new().unwrap();

    let (mut coordinator, _) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Auto, EngineConfig::default())
            .unwrap();
    fs::rename(src.path().join("A/2.txt"), src.path().join("A/2.bak")).unwrap();

    let outcome = coordinator
        .run_pass(Selection::folders(["A"]), Arc::new(StopSignal::new()))
        .await
        .unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(status_of(&coordinator, "A/1.txt"), FileStatus::Copied);
    let failed = coordinator.state().entry("A/2.txt").unwrap();
    assert_eq!(failed.status, FileStatus::Failed);
    assert!(!failed.error.is_empty());
    drop(coordinator);

    // Fix the problem and resume: only the failed entry is attempted.
    fs::rename(src.path().join("A/2.bak"), src.path().join("A/2.txt")).unwrap();
    let copier = Arc::new(CountingCopier::new());
    let (coordinator, _) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Resume, EngineConfig::default())
            .unwrap();
    assert_eq!(
        coordinator.state().entry("A/2.txt").unwrap().status,
        FileStatus::Failed
    );
    let mut coordinator = coordinator.with_copier(copier.clone());
    coordinator
        .run_pass(Selection::folders(["A"]), Arc::new(StopSignal::new()))
        .await
        .unwrap();

    assert_eq!(copier.calls(), 1);
    let retried = coordinator.state().entry("A/2.txt").unwrap();
    assert_eq!(retried.status, FileStatus::Copied);
    assert!(retried.error.is_empty());
    assert_eq!(status_of(&coordinator, "B/3.txt"), FileStatus::Pending);
}

#[tokio::test]
async fn test_stop_leaves_nothing_in_progress() {
    let src = TempDir::new().unwrap();
    for i in 0..6 {
        write(src.path(), &format!("A/{}.txt", i), 4);
    }
    let dst = TempDir::new().unwrap();

    let stop = Arc::new(StopSignal::new());
    let copier = Arc::new(CountingCopier {
        calls: AtomicUsize::new(0),
        stop_after: Some((2, stop.clone())),
    });
    let (coordinator, _) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Auto, EngineConfig::default())
            .unwrap();
    let mut coordinator = coordinator.with_copier(copier.clone());

    let outcome = coordinator.run_pass(Selection::all(), stop).await.unwrap();
    assert!(outcome.stopped);
    assert_eq!(outcome.copied, 2);

    let counts = coordinator.state().counts();
    assert_eq!(counts.copied, 2);
    assert_eq!(counts.pending, 4);
    assert_eq!(counts.in_progress, 0);

    let persisted = StateStore::new(dst.path()).load().unwrap();
    assert_eq!(persisted.counts().in_progress, 0);
    assert_eq!(persisted.counts().copied, 2);

    // The next run picks up where this one stopped.
    drop(coordinator);
    let (mut resumed, _) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Resume, EngineConfig::default())
            .unwrap();
    let outcome = resumed
        .run_pass(Selection::all(), Arc::new(StopSignal::new()))
        .await
        .unwrap();
    assert_eq!(outcome.copied, 4);
    assert!(resumed.state().is_complete());
}

#[tokio::test]
async fn test_skip_existing_policy() {
    let src = sample_tree();
    let dst = TempDir::new().unwrap();
    write(dst.path(), "A/1.txt", 10);
    write(dst.path(), "A/2.txt", 3);

    let config = EngineConfig {
        skip_existing: true,
        ..EngineConfig::default()
    };
    let (mut coordinator, _) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Auto, config).unwrap();
    let outcome = coordinator
        .run_pass(Selection::folders(["A"]), Arc::new(StopSignal::new()))
        .await
        .unwrap();

    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.copied, 1);
    assert_eq!(status_of(&coordinator, "A/1.txt"), FileStatus::Skipped);
    assert_eq!(status_of(&coordinator, "A/2.txt"), FileStatus::Copied);
    assert_eq!(fs::read(dst.path().join("A/2.txt")).unwrap().len(), 20);
}

#[tokio::test]
async fn test_fresh_ignores_saved_state() {
    let src = sample_tree();
    let dst = TempDir::new().unwrap();

    let (mut coordinator, _) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Auto, EngineConfig::default())
            .unwrap();
    coordinator
        .run_pass(Selection::all(), Arc::new(StopSignal::new()))
        .await
        .unwrap();
    drop(coordinator);

    let (fresh, resumed) =
        Coordinator::open(src.path(), dst.path(), ResumeMode::Fresh, EngineConfig::default())
            .unwrap();
    assert!(!resumed);
    assert_eq!(fresh.state().counts().pending, 3);
}

#[test]
fn test_corrupt_state_is_not_treated_as_new() {
    let src = sample_tree();
    let dst = TempDir::new().unwrap();
    fs::write(dst.path().join(".migration.state.json"), b"not json").unwrap();

    let err = Coordinator::open(src.path(), dst.path(), ResumeMode::Auto, EngineConfig::default())
        .err()
        .unwrap();
    assert!(!err.is_not_found());
    assert!(err.to_string().contains("unreadable"));
}

#[cfg(unix)]
#[test]
fn test_failed_scan_writes_no_state() {
    let src = sample_tree();
    let dst = TempDir::new().unwrap();
    std::os::unix::fs::symlink(src.path().join("B"), src.path().join("B/again")).unwrap();

    let config = EngineConfig {
        follow_links: true,
        ..EngineConfig::default()
    };
    let err = Coordinator::open(src.path(), dst.path(), ResumeMode::Auto, config)
        .err()
        .unwrap();
    assert!(matches!(err, MigrationError::Scan(_)));
    assert!(!StateStore::new(dst.path()).exists());
    assert!(!dst.path().join(".migration.state.json.tmp").exists());
}
