use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use migrator_lib::report::{format_bytes, format_time};
use migrator_lib::{
    Args, Coordinator, EngineConfig, FileStatus, MigrationState, MigrationSummary, ProgressEvent,
    StateStore, StopSignal,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    if let Err(e) = run(args).await {
        error!("Migration failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_ascii_lowercase()));

    // stdout is reserved for folder listings and summaries.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

async fn run(args: Args) -> anyhow::Result<()> {
    if !args.source.is_dir() {
        bail!("Source path is not a directory: {}", args.source.display());
    }
    let source = args
        .source
        .canonicalize()
        .with_context(|| format!("Cannot resolve source {}", args.source.display()))?;

    // Must be registered before the lock exists; the guard only cleans up on unwind.
    let stop = Arc::new(StopSignal::new());
    watch_interrupt(stop.clone())?;

    let _lock = StateStore::new(&args.destination)
        .lock()
        .with_context(|| format!("Cannot lock destination {}", args.destination.display()))?;
    let destination = args
        .destination
        .canonicalize()
        .with_context(|| format!("Cannot resolve destination {}", args.destination.display()))?;

    let mode = args.resume_mode();
    let config = EngineConfig::from(&args);
    let opening = {
        let destination = destination.clone();
        tokio::task::spawn_blocking(move || Coordinator::open(&source, &destination, mode, config))
    };
    let (mut coordinator, resumed) = tokio::select! {
        opened = opening => opened
            .context("State setup task failed")?
            .context("Cannot prepare migration state")?,
        _ = stop.stopped() => bail!("Interrupted before the migration state was ready"),
    };
    if resumed {
        info!("Resumed saved state from {}", coordinator.store().state_file_path().display());
    }

    if args.list_folders {
        print_folders(coordinator.state());
        return Ok(());
    }
    if args.summary {
        print_summary(coordinator.state());
        return Ok(());
    }

    let selection = args.selection();
    let known: Vec<String> = coordinator.folders().into_iter().map(|f| f.name).collect();
    for name in selection.names() {
        if !known.iter().any(|k| k == name) {
            warn!(folder = name, "Selected folder does not exist in the source catalog");
        }
    }

    let (progress_tx, progress_rx) = mpsc::channel(256);
    coordinator.set_observer(progress_tx);
    let printer = tokio::spawn(report_progress(progress_rx));

    let outcome = coordinator
        .run_pass(selection, stop)
        .await
        .context("Copy pass did not complete")?;
    let state_file = coordinator.store().state_file_path();
    let state = coordinator.into_state();
    let _ = printer.await;

    if outcome.stopped {
        println!("Copy interrupted; run again to resume.");
    }
    println!(
        "Copied {} file(s) ({}), skipped {}, failed {} in {:.1}s",
        outcome.copied,
        format_bytes(outcome.bytes_copied),
        outcome.skipped,
        outcome.failed,
        outcome.elapsed.as_secs_f64()
    );
    println!("State saved to {}", state_file.display());
    print_folders(&state);
    Ok(())
}

/// Turns SIGINT into a stop request. The handler is registered before returning.
#[cfg(unix)]
fn watch_interrupt(stop: Arc<StopSignal>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Cannot install interrupt handler")?;
    tokio::spawn(async move {
        if interrupt.recv().await.is_some() {
            warn!("Received interrupt signal. Stopping after the current step...");
            stop.stop();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn watch_interrupt(stop: Arc<StopSignal>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt signal. Stopping after the current step...");
            stop.stop();
        }
    });
    Ok(())
}

async fn report_progress(mut rx: mpsc::Receiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        let entry = &event.entry;
        match entry.status {
            FileStatus::InProgress => {}
            FileStatus::Failed => warn!(
                "[{}/{}] failed {}: {}",
                event.files_done, event.files_in_scope, entry.path, entry.error
            ),
            FileStatus::Pending => info!("stopped before {}", entry.path),
            FileStatus::Copied | FileStatus::Skipped => info!(
                "[{}/{}] {} {} ({} of {})",
                event.files_done,
                event.files_in_scope,
                entry.status,
                entry.path,
                format_bytes(event.bytes_copied),
                format_bytes(event.bytes_in_scope)
            ),
        }
    }
}

fn print_folders(state: &MigrationState) {
    for folder in state.top_level_folders() {
        println!(
            "{:<12} {:>8} file(s) {:>10}  {}",
            folder.status.as_str(),
            folder.file_count,
            format_bytes(folder.total_bytes),
            folder.name
        );
    }
}

fn print_summary(state: &MigrationState) {
    let summary = MigrationSummary::from_state(state, Utc::now());
    println!("Source:        {}", summary.source.display());
    println!("Destination:   {}", summary.destination.display());
    println!("Started:       {}", format_time(Some(summary.start_time)));
    println!("Duration:      {}", summary.duration);
    println!("Total files:   {}", summary.totals.total_files);
    println!("Copied:        {}", summary.totals.copied);
    println!("Skipped:       {}", summary.totals.skipped);
    println!("Failed:        {}", summary.totals.failed);
    println!("Pending:       {}", summary.totals.pending);
    println!(
        "Transferred:   {} of {}",
        format_bytes(summary.totals.bytes_transferred),
        format_bytes(summary.bytes_total)
    );
    println!("Success rate:  {}", summary.success_rate);
    for entry in &summary.failed_files {
        println!("  failed  {}: {}", entry.path, entry.error);
    }
}
