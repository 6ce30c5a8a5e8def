//! Access-log tail adapter.
//!
//! Replays the file from the start, then polls for appended data. A file that
//! shrinks or is replaced by a new inode is reopened from the beginning.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::context::PipelineContext;

/// Follows one file, yielding complete lines.
#[derive(Debug)]
pub struct FileFollower {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    identity: Option<u64>,
    pending: Vec<u8>,
}

impl FileFollower {
    /// Open `path` positioned at its first byte.
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path).await?;
        let identity = file_identity(&file.metadata().await?);
        Ok(Self {
            path,
            reader: BufReader::new(file),
            position: 0,
            identity,
            pending: Vec::new(),
        })
    }

    /// The followed path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next complete line, without its terminator.
    ///
    /// Returns `None` at end of file. A trailing fragment with no newline yet
    /// is held back until the rest of the line is written.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 {
            return Ok(None);
        }
        self.position += read as u64;

        if self.pending.last() != Some(&b'\n') {
            return Ok(None);
        }
        self.pending.pop();
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Ok(Some(line))
    }

    /// Reopens the file if it was truncated or replaced.
    ///
    /// Returns whether a reopen happened. A path that is temporarily missing
    /// during rotation is not an error.
    pub async fn check_rotation(&mut self) -> io::Result<bool> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        let truncated = metadata.len() < self.position;
        let replaced = file_identity(&metadata) != self.identity;
        if !truncated && !replaced {
            return Ok(false);
        }

        let file = File::open(&self.path).await?;
        self.identity = file_identity(&file.metadata().await?);
        self.reader = BufReader::new(file);
        self.position = 0;
        self.pending.clear();
        info!(path = %self.path.display(), truncated, replaced, "reopened rotated log file");
        Ok(true)
    }
}

#[cfg(unix)]
fn file_identity(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_identity(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Spawns the tail adapter over the configured log file.
pub fn spawn_tail(ctx: Arc<PipelineContext>) -> JoinHandle<()> {
    let path = ctx.config().log_file.clone();
    let poll = ctx.config().tail_poll_interval;
    tokio::spawn(async move { follow(ctx, path, poll).await })
}

/// Runs until the task is aborted. Returns early only if the file cannot be
/// opened.
pub async fn follow(ctx: Arc<PipelineContext>, path: PathBuf, poll: Duration) {
    let mut follower = match FileFollower::open(&path).await {
        Ok(follower) => follower,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to open log file, tail disabled");
            return;
        }
    };
    info!(path = %path.display(), "tailing log file");

    loop {
        match follower.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let record = ctx.parser().parse(&line);
                ctx.ingest(record).await;
            }
            Ok(None) => {
                sleep(poll).await;
                if let Err(e) = follower.check_rotation().await {
                    warn!(path = %follower.path().display(), error = %e, "failed to reopen log file");
                }
            }
            Err(e) => {
                debug!(path = %follower.path().display(), error = %e, "read error, retrying");
                sleep(poll).await;
            }
        }
    }
}
