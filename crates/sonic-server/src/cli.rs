//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::Parser;

/// Sonic - live nginx access-log viewer.
///
/// Every option left unset falls back to the config file, then to the
/// built-in default.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "sonic")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// HTTP listen address, e.g. `0.0.0.0:58080` or `:58080`.
    #[arg(long, env = "LISTEN_ADDR")]
    pub addr: Option<String>,

    /// Access log file to tail.
    #[arg(long = "file", env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// SQLite database path.
    #[arg(long = "db", env = "DB_PATH")]
    pub db_path: Option<String>,

    /// nginx `log_format` template of the tailed file.
    #[arg(long = "format", env = "LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Directory of frontend static files.
    #[arg(long = "static", env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Number of most recent rows kept by the retention sweep.
    #[arg(long, env = "RETENTION_MAX_ROWS")]
    pub retention_max_rows: Option<u64>,

    /// Seconds between retention sweeps.
    #[arg(long)]
    pub retention_interval_secs: Option<u64>,

    /// Outbound queue capacity per live viewer.
    #[arg(long = "viewer-queue")]
    pub viewer_queue_capacity: Option<usize>,

    /// Maximum concurrent live viewers.
    #[arg(long)]
    pub max_viewers: Option<usize>,

    /// JSON config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    pub log_json: bool,
}
