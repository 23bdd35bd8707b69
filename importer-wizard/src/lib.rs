// Frappe Data Importer
// Main library entry point

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod schema;
pub mod selection;
pub mod session;
pub mod template;
mod tui;
pub mod utils;
pub mod wizard;

#[cfg(test)]
mod testing;

use anyhow::Context;
use api::{BackendApi, HttpBackend};
use config::AppConfig;
use indicatif::{ProgressBar, ProgressStyle};
use jobs::{BackendStatusSource, JobStatusWatcher, WatchState};
use log::{error, info};
use models::job::JobStatus;
use session::{FileSessionStore, MemorySessionStore, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Process-level options collected by `main`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    /// Keep the session in memory only; nothing is written to disk.
    pub ephemeral: bool,
}

/// Initialize logging system with dual format (JSON + human-readable)
fn init_logging(with_stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = utils::path_resolver::resolve_log_folder()?;
    std::fs::create_dir_all(&log_dir)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    let json_log_file = log_dir.join(format!("frappe-importer-{}.log", timestamp));
    let txt_log_file = log_dir.join(format!("frappe-importer-{}.txt", timestamp));

    // - JSON lines to .log
    // - human-readable to .txt
    // - human-readable to stdout only outside the TUI
    let mut dispatch = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        .level_for("hyper", log::LevelFilter::Info)
        .level_for("reqwest", log::LevelFilter::Info);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(std::io::stderr()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(txt_log_file)?),
        );

    dispatch.apply()?;

    log::info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

fn load_config(opts: &RunOptions) -> anyhow::Result<AppConfig> {
    AppConfig::load(opts.config_path.as_deref())
}

fn build_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn BackendApi>> {
    let backend = HttpBackend::new(&config.backend_url, config.request_timeout())
        .context("Failed to create backend client")?
        .with_import_timeout(config.import_timeout());
    Ok(Arc::new(backend))
}

fn build_store(config: &AppConfig, ephemeral: bool) -> Arc<dyn SessionStore> {
    if ephemeral {
        info!("[PHASE: initialization] [STEP: session] Ephemeral session, nothing is persisted");
        Arc::new(MemorySessionStore::new())
    } else {
        let path = config.session_path();
        info!(
            "[PHASE: initialization] [STEP: session] Session file: {:?}",
            path
        );
        Arc::new(FileSessionStore::new(path))
    }
}

/// Interactive terminal wizard.
pub fn run_tui(opts: RunOptions) {
    // No stdout sink: it would corrupt the TUI
    if let Err(e) = init_logging(false) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!(
        "[PHASE: initialization] Frappe importer starting at {}",
        chrono::Utc::now()
    );

    let result = load_config(&opts).and_then(|config| {
        let api = build_backend(&config)?;
        let store = build_store(&config, opts.ephemeral);
        tui::run(tui::TuiContext { config, api, store })
    });

    if let Err(e) = result {
        error!("[PHASE: tui] [STEP: fatal] TUI exited with error: {:?}", e);
        eprintln!("Importer error: {:#}", e);
        std::process::exit(1);
    }
}

/// Non-interactive TUI smoke mode (for automated checks).
/// Renders a single frame into an in-memory backend and exits.
pub fn run_tui_smoke(target: Option<String>) {
    if let Err(e) = init_logging(false) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let target = target.as_deref().unwrap_or("connect");
    if let Err(e) = tui::smoke(target) {
        error!(
            "[PHASE: tui] [STEP: smoke] TUI smoke exited with error: {:?}",
            e
        );
        eprintln!("Importer error: {}", e);
        std::process::exit(1);
    }
    println!("TUI smoke OK ({})", target);
}

/// Poll `job_id` until it finishes and draw the progress as a terminal bar.
pub fn run_watch(opts: RunOptions, job_id: String) {
    if let Err(e) = init_logging(true) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let result = load_config(&opts).and_then(|config| {
        let api = build_backend(&config)?;
        let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
        rt.block_on(watch_job(api, config.poll_interval(), job_id))
    });

    match result {
        Ok(JobStatus::Completed) => {}
        Ok(_) => std::process::exit(2),
        Err(e) => {
            error!("[PHASE: watch] [STEP: fatal] {:?}", e);
            eprintln!("Importer error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn watch_job(
    api: Arc<dyn BackendApi>,
    interval: std::time::Duration,
    job_id: String,
) -> anyhow::Result<JobStatus> {
    let watcher = JobStatusWatcher::new(Arc::new(BackendStatusSource::new(api)), interval);
    let mut rx = watcher.subscribe();
    watcher.start(job_id.clone());

    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{msg:>24} [{bar:40.cyan/blue}] {pos:>3}%")
        .context("Invalid progress template")?
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_message(format!("job {}", job_id));

    loop {
        rx.changed()
            .await
            .context("Job watcher stopped unexpectedly")?;
        let update = rx.borrow_and_update().clone();
        bar.set_position(u64::from(update.percentage()));
        if let Some(snap) = &update.snapshot {
            bar.set_message(format!(
                "{} {}/{}",
                snap.status.as_str(),
                snap.processed_rows,
                snap.total_rows
            ));
        }

        if update.state != WatchState::Terminal {
            continue;
        }
        let Some(snap) = update.snapshot else {
            continue;
        };
        match snap.status {
            JobStatus::Completed => bar.finish_with_message("completed"),
            _ => {
                let reason = snap
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string());
                bar.abandon_with_message(format!("failed: {}", reason));
            }
        }
        info!(
            "[PHASE: watch] [STEP: done] job {} finished as {}",
            job_id,
            snap.status.as_str()
        );
        return Ok(snap.status);
    }
}

/// Print the effective configuration (file + environment) as TOML.
pub fn print_config(opts: RunOptions) {
    match load_config(&opts).and_then(|c| c.to_toml_string()) {
        Ok(text) => print!("{}", text),
        Err(e) => {
            eprintln!("Importer error: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatusSnapshot;
    use crate::testing::FakeBackend;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn watch_job_reports_completion() {
        let mut done = JobStatusSnapshot::processing(10, 10);
        done.status = JobStatus::Completed;
        let api: Arc<dyn BackendApi> = Arc::new(FakeBackend::with_statuses(vec![
            Ok(JobStatusSnapshot::processing(5, 10)),
            Ok(done),
        ]));
        let status = watch_job(api, Duration::from_millis(2000), "j1".to_string())
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_job_reports_fetch_failure_as_failed() {
        let api: Arc<dyn BackendApi> = Arc::new(FakeBackend::with_statuses(vec![]));
        let status = watch_job(api, Duration::from_millis(2000), "j1".to_string())
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Failed);
    }

    #[test]
    fn ephemeral_store_is_memory_backed() {
        let config = AppConfig::default();
        let store = build_store(&config, true);
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert!(rt.block_on(store.restore()).is_none());
    }
}
