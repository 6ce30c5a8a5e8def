//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! environment variables and command-line flags (see [`crate::cli::Cli`]).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sonic_logs::DEFAULT_ROUTING_MARKER;
use sonic_store::RetentionPolicy;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::error::{ServerError, ServerResult};

/// Format used when none is configured.
pub const DEFAULT_LOG_FORMAT: &str = r#"$remote_addr - $remote_user [$time_local] "$request" $status GET_ARGS: "$query_string" POST_BODY: "$request_body""#;

/// Configuration for the log viewer server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    pub addr: SocketAddr,
    /// Access log to tail. Empty disables the tail adapter.
    pub log_file: PathBuf,
    /// SQLite database path or `sqlite:` URL.
    pub db_path: String,
    /// nginx `log_format` template for the tailed file.
    pub log_format: String,
    /// Directory served for paths outside the API.
    pub static_dir: PathBuf,
    /// Rows kept by the retention sweep.
    pub retention_max_rows: u64,
    /// Time between retention sweeps.
    pub retention_interval: Duration,
    /// Outbound queue capacity per viewer.
    pub viewer_queue_capacity: usize,
    /// Maximum concurrent viewers.
    pub max_viewers: usize,
    /// Interval between liveness probes sent to viewers.
    pub ping_interval: Duration,
    /// Time a viewer may stay silent before it is dropped.
    pub pong_timeout: Duration,
    /// Maximum time for a single write to a viewer.
    pub write_timeout: Duration,
    /// Path segment preceding a device identifier.
    pub routing_marker: String,
    /// How often the tail adapter polls for appended data.
    pub tail_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 58080)),
            log_file: PathBuf::from("/var/log/nginx/access.log"),
            db_path: "./logs.db".to_string(),
            log_format: DEFAULT_LOG_FORMAT.to_string(),
            static_dir: PathBuf::from("./frontend/dist"),
            retention_max_rows: 100_000,
            retention_interval: Duration::from_secs(60 * 60),
            viewer_queue_capacity: 4096,
            max_viewers: 1000,
            ping_interval: Duration::from_secs(54),
            pong_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            routing_marker: DEFAULT_ROUTING_MARKER.to_string(),
            tail_poll_interval: Duration::from_millis(200),
        }
    }
}

impl ServerConfig {
    /// Create a configuration listening on `addr`.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Self::default()
        }
    }

    /// Resolves the effective configuration from parsed arguments.
    ///
    /// A config file that cannot be loaded is reported and skipped.
    #[must_use]
    pub fn resolve(cli: &Cli) -> Self {
        let mut config = Self::default();

        if let Some(path) = &cli.config {
            match FileConfig::load(path) {
                Ok(file) => {
                    config.apply_file(&file);
                    info!(path = %path.display(), "loaded config file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to load config file, ignoring"),
            }
        }

        config.apply_cli(cli);
        config
    }

    /// Set the tailed access log.
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    /// Set the database location.
    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Set the log format template.
    #[must_use]
    pub fn with_log_format(mut self, format: impl Into<String>) -> Self {
        self.log_format = format.into();
        self
    }

    /// Set the static asset directory.
    #[must_use]
    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = dir.into();
        self
    }

    /// Set the per-viewer queue capacity.
    #[must_use]
    pub const fn with_viewer_queue_capacity(mut self, capacity: usize) -> Self {
        self.viewer_queue_capacity = capacity;
        self
    }

    /// Set the maximum number of viewers.
    #[must_use]
    pub const fn with_max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = max;
        self
    }

    /// Set the retention row limit and sweep interval.
    #[must_use]
    pub const fn with_retention(mut self, max_rows: u64, interval: Duration) -> Self {
        self.retention_max_rows = max_rows;
        self.retention_interval = interval;
        self
    }

    /// Set the viewer heartbeat timings.
    #[must_use]
    pub const fn with_heartbeat(
        mut self,
        ping_interval: Duration,
        pong_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        self.ping_interval = ping_interval;
        self.pong_timeout = pong_timeout;
        self.write_timeout = write_timeout;
        self
    }

    /// Set the tail poll interval.
    #[must_use]
    pub const fn with_tail_poll_interval(mut self, interval: Duration) -> Self {
        self.tail_poll_interval = interval;
        self
    }

    /// The retention policy derived from this configuration.
    #[must_use]
    pub const fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_rows: self.retention_max_rows,
            interval: self.retention_interval,
        }
    }

    fn apply_file(&mut self, file: &FileConfig) {
        if let Some(addr) = non_empty(file.addr.as_deref()).and_then(parse_listen_addr) {
            self.addr = addr;
        }
        if let Some(log_file) = non_empty(file.log_file.as_deref()) {
            self.log_file = PathBuf::from(log_file);
        }
        if let Some(db_path) = non_empty(file.db_path.as_deref()) {
            self.db_path = db_path.to_string();
        }
        if let Some(log_format) = non_empty(file.log_format.as_deref()) {
            self.log_format = log_format.to_string();
        }
        if let Some(static_dir) = non_empty(file.static_dir.as_deref()) {
            self.static_dir = PathBuf::from(static_dir);
        }
        if let Some(max_rows) = file.retention_max_rows {
            self.retention_max_rows = max_rows;
        }
        if let Some(secs) = file.retention_interval_secs {
            self.retention_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = file.viewer_queue_capacity {
            self.viewer_queue_capacity = capacity;
        }
        if let Some(max) = file.max_viewers {
            self.max_viewers = max;
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(addr) = cli.addr.as_deref() {
            match parse_listen_addr(addr) {
                Some(addr) => self.addr = addr,
                None => warn!(addr = %addr, "invalid listen address, keeping {}", self.addr),
            }
        }
        if let Some(log_file) = &cli.log_file {
            self.log_file.clone_from(log_file);
        }
        if let Some(db_path) = &cli.db_path {
            self.db_path.clone_from(db_path);
        }
        if let Some(log_format) = &cli.log_format {
            self.log_format.clone_from(log_format);
        }
        if let Some(static_dir) = &cli.static_dir {
            self.static_dir.clone_from(static_dir);
        }
        if let Some(max_rows) = cli.retention_max_rows {
            self.retention_max_rows = max_rows;
        }
        if let Some(secs) = cli.retention_interval_secs {
            self.retention_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = cli.viewer_queue_capacity {
            self.viewer_queue_capacity = capacity;
        }
        if let Some(max) = cli.max_viewers {
            self.max_viewers = max;
        }
    }
}

/// Keys accepted in a JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Listen address.
    pub addr: Option<String>,
    /// Access log to tail.
    pub log_file: Option<String>,
    /// Database location.
    pub db_path: Option<String>,
    /// Log format template.
    pub log_format: Option<String>,
    /// Static asset directory.
    pub static_dir: Option<String>,
    /// Rows kept by retention.
    pub retention_max_rows: Option<u64>,
    /// Seconds between retention sweeps.
    pub retention_interval_secs: Option<u64>,
    /// Per-viewer queue capacity.
    pub viewer_queue_capacity: Option<usize>,
    /// Maximum concurrent viewers.
    pub max_viewers: Option<usize>,
}

impl FileConfig {
    /// Reads and decodes a config file.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| ServerError::Config(e.to_string()))
    }
}

/// Parses a listen address, accepting the `:port` shorthand for all interfaces.
#[must_use]
pub fn parse_listen_addr(addr: &str) -> Option<SocketAddr> {
    let addr = addr.trim();
    if let Some(port) = addr.strip_prefix(':') {
        return port.parse::<u16>().ok().map(|port| SocketAddr::from(([0, 0, 0, 0], port)));
    }
    addr.parse().ok()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
