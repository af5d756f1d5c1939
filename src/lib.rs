//! Convert Queue - a batch media conversion queue driven by FFmpeg.
//!
//! Files are queued with per-job options, converted by a bounded pool of
//! FFmpeg processes, retried with exponential backoff on failure, and the
//! queue survives restarts through a JSON snapshot.

pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod history;
pub mod power;
pub mod queue;
pub mod scan;
pub mod store;
pub mod validation;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::cli::{AddArgs, Cli, Commands, JobOverrides, RunArgs};
use crate::config::{AppPaths, Settings};
use crate::encoder::{FfmpegTranscoder, HardwareFamily};
use crate::error::PowerError;
use crate::queue::{DrainSummary, JobOptions, JobRequest, JobStatus, QueueEvent, QueueManager};
use crate::store::StateStore;
use crate::validation::{report, SystemCapabilities};

/// Runs the command selected on the command line.
pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.log_level())?;

    let paths = AppPaths::resolve(cli.data_dir.as_deref())?;
    let store = Arc::new(StateStore::new(paths));

    match cli.command {
        Commands::Run(args) => run_queue(store, args).await,
        Commands::Add(args) => add_files(store, args).await,
        Commands::QueueList => list_queue(&store),
        Commands::QueueClear => clear_queue(&store),
        Commands::ConfigShow => show_settings(&store),
        Commands::ConfigValidate => validate_settings(&store),
        Commands::ConfigSet { key, value } => set_setting(&store, &key, &value),
        Commands::Encoders => show_encoders(),
        Commands::History { lines } => show_history(&store, lines),
    }
}

/// Initializes the tracing subscriber for structured logging.
fn setup_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Detects capabilities and logs any settings problems found.
fn detect(settings: &Settings) -> SystemCapabilities {
    let capabilities = SystemCapabilities::detect();
    info!(?capabilities, "Detected system capabilities");

    let result = validation::validate_settings(settings, &capabilities);
    validation::log_issues(&result);
    capabilities
}

/// Turns command-line paths into requests using `template` for job options.
fn build_requests(paths: &[PathBuf], overrides: &JobOverrides, base: &Settings) -> Vec<JobRequest> {
    let template = overrides.apply(base);
    let mut options = JobOptions::from_settings(&template);
    options.audio_overlay = overrides.overlay.clone();

    scan::collect_media(paths)
        .into_iter()
        .map(|path| JobRequest::new(path, options.clone()))
        .collect()
}

/// Enqueues requests and reports rejections. Returns the number accepted.
async fn submit(queue: &QueueManager, requests: Vec<JobRequest>) -> Result<usize> {
    let inputs: Vec<PathBuf> = requests.iter().map(|r| r.input_path.clone()).collect();
    let results = queue.enqueue_many(requests).await?;

    let mut accepted = 0;
    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(_) => accepted += 1,
            Err(e) => {
                warn!(input = ?input, error = %e, "File not added");
                eprintln!("Skipped {}: {e}", input.display());
            }
        }
    }
    Ok(accepted)
}

/// Queues the given files, processes the whole queue and waits for it to drain.
async fn run_queue(store: Arc<StateStore>, args: RunArgs) -> Result<()> {
    info!("Starting conversion queue");

    let capabilities = detect(&store.load_settings());
    let transcoder = Arc::new(FfmpegTranscoder::from_capabilities(&capabilities));

    let (queue, controller) = QueueManager::builder(Arc::clone(&store))
        .hardware_encoder(capabilities.preferred_encoder().map(str::to_string))
        .spawn(transcoder);
    let mut events = queue.subscribe();

    if let Some(limit) = args.concurrency {
        let applied = queue.set_max_concurrency(limit).await?;
        info!(limit = applied, "Concurrency limit set");
    }

    let settings = queue.settings().await?;
    let requests = build_requests(&args.paths, &args.options, &settings);
    if !requests.is_empty() {
        let accepted = submit(&queue, requests).await?;
        println!("Added {accepted} file(s).");
    }

    if !queue.start().await? {
        println!("Nothing to convert.");
        queue.shutdown().await?;
        controller.await.context("Queue controller panicked")?;
        return Ok(());
    }

    info!("Converting. Press Ctrl+C to stop after running jobs, twice to cancel them.");

    let mut interrupts = 0u8;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                interrupts += 1;
                if interrupts == 1 {
                    queue.pause().await?;
                    let running = queue.stats().await?.active_workers;
                    info!(running, "Interrupted, waiting for running conversions");
                    eprintln!("Waiting for {running} running conversion(s). Press Ctrl+C again to cancel them.");
                    if running == 0 {
                        break;
                    }
                } else {
                    let cancelled = queue.cancel_all().await?;
                    info!(cancelled, "Cancelling running conversions");
                }
            }

            event = events.recv() => match event {
                Ok(QueueEvent::Drained(summary)) => {
                    print_summary(&summary);
                    if summary.shutdown_requested {
                        request_power_off(&queue, &store).await?;
                    }
                    break;
                }
                Ok(QueueEvent::JobChanged(job)) => {
                    match job.status {
                        JobStatus::Completed => println!("Done      {}", job.output_path.display()),
                        JobStatus::Failed => println!(
                            "Failed    {}: {}",
                            job.file_name,
                            job.error_message.as_deref().unwrap_or("unknown error")
                        ),
                        JobStatus::Cancelled => println!("Cancelled {}", job.file_name),
                        JobStatus::Queued | JobStatus::Converting => {}
                    }
                    if interrupts > 0 && queue.stats().await?.active_workers == 0 {
                        break;
                    }
                }
                Ok(QueueEvent::JobRemoved(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    info!("Shutting down conversion queue");
    queue.shutdown().await?;
    controller.await.context("Queue controller panicked")?;
    Ok(())
}

fn print_summary(summary: &DrainSummary) {
    println!(
        "Queue finished: {} completed, {} failed, {} cancelled.",
        summary.completed, summary.failed, summary.cancelled
    );
}

/// Schedules the OS shutdown. Where the platform cannot do it the option is turned off.
async fn request_power_off(queue: &QueueManager, store: &StateStore) -> Result<()> {
    match power::schedule_system_shutdown() {
        Ok(()) => {
            store
                .history()
                .system("System shutdown scheduled after queue completion.");
            println!(
                "System will shut down in {} seconds.",
                power::SHUTDOWN_DELAY_SECS
            );
        }
        Err(e) => {
            error!(error = %e, "Auto-shutdown failed");
            store.history().system(&power::failure_note(&e));
            eprintln!("{e}");
            if matches!(e, PowerError::Unsupported) {
                let mut settings = queue.settings().await?;
                settings.auto_shutdown = false;
                queue.update_settings(settings).await?;
            }
        }
    }
    Ok(())
}

/// Adds files to the saved queue without converting them.
async fn add_files(store: Arc<StateStore>, args: AddArgs) -> Result<()> {
    let stored = store.load_settings();
    let capabilities = detect(&stored);
    let transcoder = Arc::new(FfmpegTranscoder::from_capabilities(&capabilities));

    // Resuming here would start conversions from a command that only queues.
    let settings = Settings {
        auto_resume: false,
        ..stored
    };
    let (queue, controller) = QueueManager::builder(Arc::clone(&store))
        .settings(settings.clone())
        .hardware_encoder(capabilities.preferred_encoder().map(str::to_string))
        .spawn(transcoder);

    let requests = build_requests(&args.paths, &args.options, &settings);
    let accepted = submit(&queue, requests).await?;
    let queued = queue.stats().await?.queued;
    println!("Added {accepted} file(s); {queued} waiting.");

    queue.shutdown().await?;
    controller.await.context("Queue controller panicked")?;
    Ok(())
}

/// Lists jobs in the saved snapshot.
fn list_queue(store: &StateStore) -> Result<()> {
    let settings = store.load_settings();
    let entries = store.load_queue();

    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!("Queue ({} jobs):", entries.len());
    for entry in &entries {
        let options = entry.to_options(&settings);
        let missing = if entry.input_path.is_file() {
            ""
        } else {
            " [source missing]"
        };
        println!(
            "  {} -> {} in {} (retries {}){missing}",
            entry.input_path.display(),
            options.describe_target(),
            options.output_dir.display(),
            entry.retry_count(),
        );
    }
    Ok(())
}

/// Empties the saved snapshot.
fn clear_queue(store: &StateStore) -> Result<()> {
    let count = store.load_queue().len();
    store.save_queue(&[]);
    store
        .history()
        .system(&format!("Cleared {count} saved job(s) from the command line."));
    println!("Cleared {count} job(s) from queue.");
    Ok(())
}

/// Displays the current settings.
fn show_settings(store: &StateStore) -> Result<()> {
    let settings = store.load_settings();
    let yaml = serde_yaml::to_string(&settings)?;
    println!("# {}", store.paths().settings.display());
    println!("{}", yaml);
    Ok(())
}

/// Validates the settings and reports any issues.
fn validate_settings(store: &StateStore) -> Result<()> {
    let path = &store.paths().settings;
    let settings = if path.exists() {
        config::loader::load_from_path(path)?
    } else {
        Settings::default()
    };

    let capabilities = SystemCapabilities::detect();
    let result = validation::validate_settings(&settings, &capabilities);
    println!("{}", report::format_report(path, &capabilities, &result));

    if !result.is_valid() {
        bail!("Settings have {} error(s)", result.error_count());
    }
    Ok(())
}

/// Changes one setting and saves it.
fn set_setting(store: &StateStore, key: &str, value: &str) -> Result<()> {
    let mut settings = store.load_settings();
    settings
        .set(key, value)
        .with_context(|| format!("Cannot set {key}"))?;
    store.save_settings(&settings);
    store
        .history()
        .system(&format!("Setting {key} changed to '{value}'."));
    println!("{key} updated.");
    Ok(())
}

/// Shows the FFmpeg binary and usable hardware encoders.
fn show_encoders() -> Result<()> {
    let capabilities = SystemCapabilities::detect();
    let ffmpeg = capabilities.ffmpeg_path()?;
    println!("FFmpeg: {}", ffmpeg.display());

    if capabilities.hardware_encoders.is_empty() {
        println!("No hardware encoders detected; conversions use the CPU.");
        return Ok(());
    }

    println!("Hardware encoders (preferred first):");
    for encoder in &capabilities.hardware_encoders {
        let hwaccel = HardwareFamily::from_encoder(encoder)
            .map(HardwareFamily::hwaccel)
            .unwrap_or("-");
        println!("  {encoder:<12} hwaccel {hwaccel}");
    }
    Ok(())
}

/// Prints the last `lines` history entries.
fn show_history(store: &StateStore, lines: usize) -> Result<()> {
    for line in store.history().tail(lines) {
        println!("{line}");
    }
    Ok(())
}
