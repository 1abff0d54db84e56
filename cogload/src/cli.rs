//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cogload - complexity daemon
#[derive(Parser)]
#[command(
    name = "cogload",
    about = "Auto-commit repositories once accumulated complexity crosses a threshold",
    version,
    after_help = "Logs are written to: ~/.local/share/cogload/logs/cogload.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Create the default config file and state directory
    Init,

    /// Start watching a repository
    Add {
        /// Repository root (must contain .git)
        path: PathBuf,

        /// Complexity delta that triggers an auto-commit
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Stop watching a repository and drop its state
    Remove { path: PathBuf },

    /// List watched repositories
    List,

    /// Show live per-repository delta and status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Watch a single registered repository in the foreground
    Watch { path: PathBuf },

    /// Run the daemon for every watched repository
    Daemon {
        /// Run in the background
        #[arg(short, long)]
        detach: bool,
    },

    /// Force a commit now, bypassing the threshold
    Commit {
        /// Repository to commit (all when omitted)
        path: Option<PathBuf>,
    },

    /// Zero the cumulative delta without committing
    Reset { path: PathBuf },

    /// Show commit history, most recent first
    History {
        /// Only entries for this repository
        path: Option<PathBuf>,

        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Show control actions (add, remove, reset, pause, resume) instead
        #[arg(long)]
        audit: bool,
    },

    /// Ignore events for a repository until resumed
    Pause { path: PathBuf },

    /// Resume a paused repository
    Resume { path: PathBuf },

    /// Stop the running daemon
    Stop,

    /// Show daemon logs
    Logs {
        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },

    /// Internal: Run as daemon process (used by `daemon --detach`)
    #[command(hide = true)]
    RunDaemon,
}

/// Output format for status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Location of the log file written by `setup_logging`
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cogload")
        .join("logs")
        .join("cogload.log")
}
