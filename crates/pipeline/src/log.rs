//! Append-only, line-oriented job log files.
//!
//! These are the user-visible logs of a job (tool output, progress
//! notes). Diagnostics for operators go through `tracing` instead.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Shared handle to an append-only UTF-8 log file.
///
/// Cloning is cheap; all clones write to the same file and lines never
/// interleave.
#[derive(Clone)]
pub struct JobLog {
    path: PathBuf,
    file: Arc<Mutex<tokio::fs::File>>,
}

impl JobLog {
    /// Create (or open for appending) the log file at `path`.
    ///
    /// Synchronous so jobs can set up their directory tree in their
    /// constructors.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(tokio::fs::File::from_std(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Write failures are reported through `tracing`
    /// and otherwise ignored; a broken log never fails a job.
    pub async fn line(&self, text: impl AsRef<str>) {
        if let Err(e) = self.try_line(text.as_ref()).await {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to write job log line",
            );
        }
    }

    async fn try_line(&self, text: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&buf).await?;
        file.flush().await
    }
}

impl std::fmt::Debug for JobLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLog").field("path", &self.path).finish()
    }
}
