//! cogload - Complexity Daemon
//!
//! CLI entry point. Control commands go to the running daemon over IPC when
//! one answers, and run against the state directory in-process otherwise.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use colored::{ColoredString, Colorize};
use eyre::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cogload::cli::{Cli, Command, OutputFormat, get_log_path};
use cogload::config::Config;
use cogload::coordinator::{Collaborators, CommitOutcome, Coordinator, InitOutcome, RepoReport};
use cogload::daemon::DaemonManager;
use cogload::domain::{AuditEntry, CommitHistoryEntry, CommitResult, RepoStatus, WatchedRepository};
use cogload::ipc::{self, DaemonClient, DaemonMessage, DaemonResponse};
use cogload::tracker::TrackerSnapshot;

/// Slack on top of the configured commit or shutdown timeout for IPC calls
const IPC_MARGIN: Duration = Duration::from_secs(5);

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Write to the log file, not stdout/stderr; the daemon and the CLI share it
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;
    debug!(state_dir = %config.storage.state_dir.display(), "run: config loaded");

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(ExitCode::SUCCESS);
    };

    match command {
        Command::Init => cmd_init(cli.config.as_deref(), &config),
        Command::Add { path, threshold } => cmd_add(&config, &path, threshold).await,
        Command::Remove { path } => {
            let path = absolute(&path)?;
            let response = execute(&config, DaemonMessage::Remove { path: path.clone() }).await?;
            Ok(acknowledge(response, format!("Removed {}", path.display())))
        }
        Command::List => cmd_list(&config).await,
        Command::Status { format } => cmd_status(&config, format).await,
        Command::Watch { path } => cmd_watch(config, &path).await,
        Command::Daemon { detach } => cmd_daemon(&config, cli.config.as_deref(), cli.verbose, detach).await,
        Command::Commit { path } => cmd_commit(&config, path.as_deref()).await,
        Command::Reset { path } => cmd_reset(&config, &path).await,
        Command::History { path, limit, audit } => cmd_history(&config, path.as_deref(), limit, audit).await,
        Command::Pause { path } => {
            let path = absolute(&path)?;
            let response = execute(&config, DaemonMessage::Pause { path: path.clone() }).await?;
            Ok(acknowledge(response, format!("Paused {}", path.display())))
        }
        Command::Resume { path } => {
            let path = absolute(&path)?;
            let response = execute(&config, DaemonMessage::Resume { path: path.clone() }).await?;
            Ok(acknowledge(response, format!("Resumed {}", path.display())))
        }
        Command::Stop => cmd_stop(&config).await,
        Command::Logs { follow, lines } => cmd_logs(follow, lines),
        Command::RunDaemon => cmd_run_daemon(&config).await,
    }
}

/// The daemon runs with its own working directory, so paths travel absolute
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).context(format!("Invalid path {}", path.display()))
}

/// Send a request to the daemon, or answer it in-process when none is running
async fn execute(config: &Config, msg: DaemonMessage) -> Result<DaemonResponse> {
    let client =
        DaemonClient::new(config.storage.socket_path()).with_timeout(config.daemon.commit_timeout() + IPC_MARGIN);
    if client.is_alive().await {
        debug!(?msg, "execute: routing to daemon");
        return client.request(msg).await;
    }

    debug!(?msg, "execute: no daemon, running in-process");
    let collab = Collaborators::from_config(config)?;
    let coordinator = Coordinator::open(config.clone(), collab)
        .await
        .context("Failed to open state directory")?;
    let (handle, task) = coordinator.spawn();

    let response = ipc::dispatch(&handle, msg).await;

    handle.shutdown().await?;
    task.await.context("Coordinator task failed")?;
    Ok(response)
}

/// Print an error response; anything else here is a protocol mismatch
fn fail(response: DaemonResponse) -> ExitCode {
    match response {
        DaemonResponse::Error { message, .. } => eprintln!("{} {}", "error:".red().bold(), message),
        other => eprintln!("{} unexpected response: {:?}", "error:".red().bold(), other),
    }
    ExitCode::FAILURE
}

fn acknowledge(response: DaemonResponse, message: String) -> ExitCode {
    match response {
        DaemonResponse::Ok => {
            println!("{}", message);
            ExitCode::SUCCESS
        }
        other => fail(other),
    }
}

fn paint(status: RepoStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        RepoStatus::Watching => label.green(),
        RepoStatus::Debouncing => label.yellow(),
        RepoStatus::Committing => label.cyan(),
        RepoStatus::Error => label.red().bold(),
        RepoStatus::Paused => label.dimmed(),
    }
}

fn paint_result(result: &CommitResult) -> ColoredString {
    match result {
        CommitResult::Success { commit_id: Some(id) } => format!("success ({})", short_id(id)).green(),
        CommitResult::Success { commit_id: None } => "success".green(),
        CommitResult::NoChanges => "no changes".yellow(),
        CommitResult::Failed { error } => format!("failed: {}", error).red(),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn repo_line(repo: &WatchedRepository) -> String {
    format!(
        "{}  {:<10}  delta {:.1} / {}",
        repo.path.display(),
        paint(repo.status),
        repo.cumulative_delta,
        repo.threshold
    )
}

fn cmd_init(config_path: Option<&Path>, config: &Config) -> Result<ExitCode> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(Config::default_path);
    match Coordinator::init(&path, config)? {
        InitOutcome::Initialized {
            config_created,
            state_created,
        } => {
            if config_created {
                println!("Created config {}", path.display());
            }
            if state_created {
                println!("Created state directory {}", config.storage.state_dir.display());
            }
        }
        InitOutcome::AlreadyInitialized => {
            println!(
                "{} cogload is already initialized ({})",
                "warning:".yellow().bold(),
                path.display()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_add(config: &Config, path: &Path, threshold: Option<f64>) -> Result<ExitCode> {
    let path = absolute(path)?;
    match execute(config, DaemonMessage::Add { path, threshold }).await? {
        DaemonResponse::Added { repo } => {
            println!("Watching {} (threshold {})", repo.path.display(), repo.threshold);
            Ok(ExitCode::SUCCESS)
        }
        other => Ok(fail(other)),
    }
}

async fn cmd_list(config: &Config) -> Result<ExitCode> {
    match execute(config, DaemonMessage::List).await? {
        DaemonResponse::Repos { repos } => {
            if repos.is_empty() {
                println!("No repositories watched");
            }
            for repo in &repos {
                println!("{}", repo_line(repo));
            }
            Ok(ExitCode::SUCCESS)
        }
        other => Ok(fail(other)),
    }
}

fn print_report(report: &RepoReport) {
    let repo = &report.repo;
    let marker = if repo.status == RepoStatus::Error { "!".red().bold() } else { " ".normal() };
    println!("{} {}", marker, repo_line(repo));

    let mut details = Vec::new();
    if let Some(at) = repo.last_event_time {
        details.push(format!("last event {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(ms) = report.debounce_remaining_ms {
        details.push(format!("debounce {:.1}s", ms as f64 / 1000.0));
    }
    if let Some(ms) = report.retry_in_ms {
        details.push(format!("retry in {:.0}s", ms as f64 / 1000.0));
    }
    if report.watch_failed {
        details.push("watcher down".red().to_string());
    }
    if !details.is_empty() {
        println!("    {}", details.join(", "));
    }
    if let Some(err) = &repo.last_error {
        println!("    {} {}", "last error:".red(), err);
    }
    let counters = &report.counters;
    println!(
        "    events {} (ignored {}), evaluations {}, commit attempts {}",
        counters.events_seen, counters.events_ignored, counters.evaluations, counters.commit_attempts
    );
}

async fn cmd_status(config: &Config, format: OutputFormat) -> Result<ExitCode> {
    let reports = match execute(config, DaemonMessage::Status).await? {
        DaemonResponse::Status { reports } => reports,
        other => return Ok(fail(other)),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => {
            let daemon = DaemonManager::new(&config.storage);
            match daemon.running_pid() {
                Some(pid) => println!("Daemon: {} (PID: {})", "running".green(), pid),
                None => println!("Daemon: {}", "stopped".dimmed()),
            }
            if reports.is_empty() {
                println!("No repositories watched");
            }
            for report in &reports {
                print_report(report);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_commit(config: &Config, path: Option<&Path>) -> Result<ExitCode> {
    let path = path.map(absolute).transpose()?;
    let outcomes: Vec<CommitOutcome> = match execute(config, DaemonMessage::Commit { path }).await? {
        DaemonResponse::Commits { outcomes } => outcomes,
        other => return Ok(fail(other)),
    };

    if outcomes.is_empty() {
        println!("No repositories watched");
        return Ok(ExitCode::SUCCESS);
    }
    for outcome in &outcomes {
        println!("{}: {}", outcome.path.display(), paint_result(&outcome.result));
    }

    if outcomes.iter().all(|o| o.result.is_failed()) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn cmd_reset(config: &Config, path: &Path) -> Result<ExitCode> {
    let path = absolute(path)?;
    match execute(config, DaemonMessage::Reset { path: path.clone() }).await? {
        DaemonResponse::Reset { previous_delta } => {
            println!("Reset {} (previous delta {:.1})", path.display(), previous_delta);
            Ok(ExitCode::SUCCESS)
        }
        other => Ok(fail(other)),
    }
}

fn print_history(entry: &CommitHistoryEntry) {
    println!(
        "{}  {}  {}  delta {:.1} / {}  {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.repo_path.display(),
        entry.trigger_reason,
        entry.delta_at_commit,
        entry.threshold,
        paint_result(&entry.result)
    );
}

fn print_audit(entry: &AuditEntry) {
    let previous = entry
        .previous_delta
        .map(|d| format!("  (previous delta {:.1})", d))
        .unwrap_or_default();
    println!(
        "{}  {}  {}{}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.repo_path.display(),
        entry.action,
        previous
    );
}

async fn cmd_history(config: &Config, path: Option<&Path>, limit: usize, audit: bool) -> Result<ExitCode> {
    let path = path.map(absolute).transpose()?;
    let msg = if audit {
        DaemonMessage::Audit { path, limit }
    } else {
        DaemonMessage::History { path, limit }
    };

    match execute(config, msg).await? {
        DaemonResponse::History { entries } => {
            if entries.is_empty() {
                println!("No commits recorded");
            }
            entries.iter().for_each(print_history);
        }
        DaemonResponse::Audit { entries } => {
            if entries.is_empty() {
                println!("No actions recorded");
            }
            entries.iter().for_each(print_audit);
        }
        other => return Ok(fail(other)),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_snapshot(snapshot: &TrackerSnapshot) {
    let now = chrono::Local::now().format("%H:%M:%S");
    println!("[{}] {}", now, repo_line(&snapshot.repo));
    if let Some(err) = &snapshot.repo.last_error {
        println!("    {} {}", "last error:".red(), err);
    }
}

/// Foreground single-repository mode
async fn cmd_watch(config: Config, path: &Path) -> Result<ExitCode> {
    let client = DaemonClient::new(config.storage.socket_path());
    if client.is_alive().await {
        return Err(eyre::eyre!(
            "The daemon is already watching every repository; use `cogload status` or `cogload stop` first"
        ));
    }

    let collab = Collaborators::from_config(&config)?;
    let mut coordinator = Coordinator::open_single(config, collab, path).await?;
    let mut updates = coordinator.subscribe(path)?;
    coordinator.start_watching();
    let (handle, task) = coordinator.spawn();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let first = updates.borrow_and_update().clone();
    println!("Watching {} (Ctrl+C to stop)", first.repo.path.display());
    print_snapshot(&first);
    let mut last = (first.repo.status, first.repo.cumulative_delta, first.repo.last_error);

    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                let current = (snapshot.repo.status, snapshot.repo.cumulative_delta, snapshot.repo.last_error.clone());
                if current != last {
                    print_snapshot(&snapshot);
                    last = current;
                }
            }
        }
    }

    println!("Stopping...");
    let repos = handle.shutdown().await?;
    task.await.context("Coordinator task failed")?;
    for repo in &repos {
        println!("{}", repo_line(repo));
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_daemon(config: &Config, config_path: Option<&Path>, verbose: bool, detach: bool) -> Result<ExitCode> {
    let daemon = DaemonManager::new(&config.storage);
    if let Some(pid) = daemon.running_pid() {
        println!("cogload daemon is already running (PID: {})", pid);
        return Ok(ExitCode::SUCCESS);
    }

    if detach {
        let pid = daemon.start(config_path, verbose)?;
        println!("cogload daemon started (PID: {})", pid);
        return Ok(ExitCode::SUCCESS);
    }

    println!("cogload daemon running in foreground. Press Ctrl+C to stop.");
    cmd_run_daemon(config).await
}

/// Body of the daemon process, foreground or detached
async fn cmd_run_daemon(config: &Config) -> Result<ExitCode> {
    let daemon = DaemonManager::new(&config.storage);
    daemon.register_self()?;
    let result = run_daemon(config).await;
    if let Err(e) = daemon.remove_pid_file() {
        warn!(error = %e, "Failed to remove PID file");
    }
    result.map(|_| ExitCode::SUCCESS)
}

async fn run_daemon(config: &Config) -> Result<()> {
    debug!("run_daemon: called");
    let collab = Collaborators::from_config(config)?;
    // Opening takes the state lock, so a second daemon stops here
    let mut coordinator = Coordinator::open(config.clone(), collab)
        .await
        .context("Failed to open state directory")?;
    coordinator.start_watching();
    let (handle, coord_task) = coordinator.spawn();

    let socket_path = config.storage.socket_path();
    let listener = match ipc::create_listener_at(&socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            let _ = handle.shutdown().await;
            return Err(e);
        }
    };

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let server = tokio::spawn(ipc::serve(listener, handle.clone(), shutdown_tx));
    info!(socket = %socket_path.display(), "Daemon running");

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => warn!("SIGINT received"),
        _ = sigterm.recv() => warn!("SIGTERM received"),
        _ = shutdown_rx.recv() => info!("Shutdown requested"),
    }

    info!("Daemon shutting down...");
    server.abort();
    ipc::cleanup_socket(&socket_path);

    let repos = handle.shutdown().await?;
    if let Err(e) = coord_task.await {
        warn!(error = %e, "Coordinator task ended abnormally");
    }
    info!(count = repos.len(), "Daemon stopped");
    Ok(())
}

async fn cmd_stop(config: &Config) -> Result<ExitCode> {
    let daemon = DaemonManager::new(&config.storage);
    let grace = config.daemon.shutdown_timeout() + IPC_MARGIN;

    if daemon.is_running() {
        let pid = tokio::task::spawn_blocking(move || daemon.stop(grace)).await??;
        println!("cogload daemon stopped (was PID: {})", pid);
        return Ok(ExitCode::SUCCESS);
    }

    // No PID file, but something may still answer on the socket
    let client = DaemonClient::new(config.storage.socket_path());
    if client.is_alive().await {
        client.shutdown().await?;
        println!("cogload daemon is shutting down");
        return Ok(ExitCode::SUCCESS);
    }

    println!("cogload daemon is not running");
    Ok(ExitCode::SUCCESS)
}

fn cmd_logs(follow: bool, lines: usize) -> Result<ExitCode> {
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();

        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;

        child.wait()?;
    } else {
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let reader = BufReader::new(file);
        let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        let start = all_lines.len().saturating_sub(lines);
        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(ExitCode::SUCCESS)
}
