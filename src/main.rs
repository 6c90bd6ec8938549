use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{Local, Utc};
use clap::Parser;
use stowaway::{
    auth::TokenFileAuth,
    config::BackupConfig,
    observability,
    orchestrator::{BackupKind, Orchestrator},
    process::TokioSpawner,
    progress::{ProgressFanout, TerminalProgress},
    scheduler::{Scheduler, next_occurrence},
    store::{Destination, FilesystemStore},
};

/// CLI arguments for stowaway
#[derive(Parser, Debug)]
#[command(version, about = "Scheduled database and file backups", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./stowaway.toml if it exists,
    /// otherwise built-in defaults are used)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run one backup now
    Run {
        /// What to back up
        #[arg(long, value_enum, default_value_t = BackupKind::Full)]
        kind: BackupKind,
    },
    /// Run backups at the configured times until interrupted (default)
    Daemon,
    /// Delete old backups according to the retention policy
    Cleanup,
    /// List backups in the destination, newest first
    List {
        /// Maximum number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show how many backups exist and the newest one
    Status,
    /// Print the configured schedule
    Schedule,
}

const CONFIG_FILE_NAME: &str = "stowaway.toml";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = load_config(args.config.as_deref());
    let _tracing_guard = match observability::init_tracing(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    match args.command {
        Some(Command::Schedule) => run_schedule(&config),
        Some(Command::Run { kind }) => run_backup(config, kind).await,
        Some(Command::Cleanup) => run_cleanup(config).await,
        Some(Command::List { limit }) => run_list(config, limit).await,
        Some(Command::Status) => run_status(config).await,
        Some(Command::Daemon) | None => run_daemon(config).await,
    }
}

/// Resolve and load the configuration, exiting on any error.
fn load_config(explicit_path: Option<&str>) -> Arc<BackupConfig> {
    let path = match explicit_path {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                eprintln!("Error: Config file not found: {}", path.display());
                std::process::exit(1);
            }
            Some(path)
        }
        None => Some(PathBuf::from(CONFIG_FILE_NAME)).filter(|p| p.exists()),
    };

    let Some(path) = path else {
        return Arc::new(BackupConfig::default());
    };
    match BackupConfig::from_file(&path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

/// Everything a command needs to talk to the destination.
struct App {
    orchestrator: Arc<Orchestrator>,
    notifier_task: Option<tokio::task::JoinHandle<()>>,
}

impl App {
    fn build(config: Arc<BackupConfig>) -> Self {
        let mut progress = ProgressFanout::new().with_sink(Arc::new(TerminalProgress::stdout()));
        let mut notifier_task = None;

        if let Some(webhook) = config.notifications.active_webhook() {
            match stowaway::notify::WebhookNotifier::new(webhook) {
                Ok((notifier, worker)) => {
                    notifier_task = Some(tokio::spawn(worker));
                    progress.subscribe(Arc::new(notifier));
                }
                Err(e) => tracing::warn!(error = %e, "Webhook notifications disabled"),
            }
        }

        let store = match FilesystemStore::new(&config.destination.root) {
            Ok(store) => store,
            Err(e) => {
                eprintln!("Failed to open destination store: {e}");
                std::process::exit(1);
            }
        };
        let auth = TokenFileAuth::new(&config.destination.token_file);

        let orchestrator = match Orchestrator::new(
            config,
            Arc::new(store),
            Arc::new(auth),
            Arc::new(TokioSpawner),
            progress,
        ) {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        };

        Self {
            orchestrator: Arc::new(orchestrator),
            notifier_task,
        }
    }

    /// Drop every sink and give queued notifications a moment to go out.
    async fn shutdown(self) {
        drop(self.orchestrator);
        if let Some(handle) = self.notifier_task
            && tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
        {
            tracing::warn!("Timeout waiting for notifications to be delivered");
        }
    }
}

fn destination_or_exit(config: &BackupConfig) -> Destination {
    match config.destination.preflight() {
        Ok(destination) => destination,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_backup(config: Arc<BackupConfig>, kind: BackupKind) {
    let app = App::build(config);
    let result = app.orchestrator.run(kind).await;
    app.shutdown().await;
    if !result.success {
        std::process::exit(1);
    }
}

async fn run_daemon(config: Arc<BackupConfig>) {
    let app = App::build(config.clone());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        work_dir = %config.work_dir.display(),
        "Starting backup daemon"
    );

    let scheduler = Scheduler::new(app.orchestrator.clone(), &config.schedule);
    scheduler.run_until(shutdown_signal()).await;
    drop(scheduler);
    app.shutdown().await;
}

async fn run_cleanup(config: Arc<BackupConfig>) {
    let destination = destination_or_exit(&config);
    let app = App::build(config);
    let outcome = app.orchestrator.retention().run(&destination).await;
    app.shutdown().await;

    match outcome {
        Ok(report) => {
            let suffix = if report.dry_run { " (dry run)" } else { "" };
            println!(
                "Cleanup finished{suffix}: {} of {} backups selected, {} deleted, {} failed",
                report.selected, report.matched, report.deleted, report.failed
            );
        }
        Err(e) => {
            eprintln!("Cleanup failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_list(config: Arc<BackupConfig>, limit: usize) {
    let destination = destination_or_exit(&config);
    let app = App::build(config);
    let outcome = app.orchestrator.retention().snapshot(&destination).await;
    app.shutdown().await;

    let entries = match outcome {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Failed to list backups: {e}");
            std::process::exit(1);
        }
    };
    if entries.is_empty() {
        println!("No backups found in {destination}");
        return;
    }
    for entry in entries.iter().take(limit) {
        let size = entry
            .size_bytes
            .map(|b| format!("{:.2} MB", b as f64 / 1024.0 / 1024.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:>12}  {}",
            entry.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            size,
            entry.name
        );
    }
    if entries.len() > limit {
        println!("... and {} more", entries.len() - limit);
    }
}

async fn run_status(config: Arc<BackupConfig>) {
    let destination = destination_or_exit(&config);
    let app = App::build(config.clone());
    let outcome = app.orchestrator.retention().snapshot(&destination).await;
    app.shutdown().await;

    match outcome {
        Ok(entries) => {
            println!("Destination: {destination}");
            println!("Backups: {}", entries.len());
            if let Some(newest) = entries.first() {
                let age = Utc::now() - newest.created_at;
                println!(
                    "Newest: {} ({}h ago)",
                    newest.name,
                    age.num_hours().max(0)
                );
            }
            if let Some(next) = next_occurrence(&config.schedule.parsed(), &Local::now()) {
                println!("Next scheduled run: {}", next.format("%Y-%m-%d %H:%M"));
            }
        }
        Err(e) => {
            eprintln!("Failed to read destination: {e}");
            std::process::exit(1);
        }
    }
}

fn run_schedule(config: &BackupConfig) {
    let times = config.schedule.parsed();
    println!("Daily backup times (local):");
    for time in &times {
        println!("  {}", time.format("%H:%M"));
    }
    if let Some(next) = next_occurrence(&times, &Local::now()) {
        println!("Next: {}", next.format("%Y-%m-%d %H:%M"));
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, waiting for an active backup to finish...");
}
