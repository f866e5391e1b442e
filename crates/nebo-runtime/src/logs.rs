//! App log tee with rotation.
//!
//! When enabled, an app's stdout and stderr are tee'd to
//! `logs/stdout.log` / `logs/stderr.log` (rotated to `.1` past 2 MiB)
//! and to the host's stderr, prefixed per line with `[app:<id>]`.
//! Partial lines are buffered until a newline arrives.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt as _;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use nebo_core::AppId;

use crate::error::RuntimeResult;

/// Rotation threshold per log stream.
const ROTATE_BYTES: u64 = 2 * 1024 * 1024;

/// A rotating line-oriented log file.
pub struct LogWriter {
    path: PathBuf,
    file: std::fs::File,
    written: u64,
}

impl LogWriter {
    /// Open (appending) the log file at `path`, creating parents.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub fn open(path: PathBuf) -> RuntimeResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            file,
            written,
        })
    }

    /// Append one line (newline included by the caller), rotating first
    /// if the file has passed the threshold.
    pub fn write_line(&mut self, line: &[u8]) {
        if self.written > ROTATE_BYTES
            && let Err(e) = self.rotate()
        {
            warn!(path = %self.path.display(), error = %e, "Log rotation failed");
        }
        match self.file.write_all(line) {
            Ok(()) => self.written = self.written.saturating_add(line.len() as u64),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Log write failed"),
        }
    }

    /// Rotate the current file to `<name>.1`, replacing any previous
    /// generation, and reopen fresh.
    fn rotate(&mut self) -> std::io::Result<()> {
        let rotated = rotated_path(&self.path);
        let _ = self.file.flush();
        std::fs::rename(&self.path, &rotated)?;
        self.file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        debug!(path = %self.path.display(), "Rotated log file");
        Ok(())
    }
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsString::from).unwrap_or_default();
    name.push(".1");
    path.with_file_name(name)
}

/// Handles for the tee tasks of one app process. Aborting them is the
/// log cleanup step of stop.
pub struct LogGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl LogGuard {
    /// Bundle tee task handles.
    #[must_use]
    pub fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }

    /// Abort the tee tasks. Pending buffered partial lines are dropped;
    /// everything already newline-terminated has been written.
    pub fn cleanup(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Spawn a tee task pumping `reader` into `writer` and the host's stderr.
pub fn spawn_tee(
    app_id: AppId,
    stream_name: &'static str,
    mut reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    mut writer: LogWriter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    // Drain complete lines; keep the partial tail buffered.
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let rest = pending.split_off(pos.saturating_add(1));
                        let line = std::mem::replace(&mut pending, rest);
                        writer.write_line(&line);
                        tee_to_host(&app_id, &line);
                    }
                },
                Err(e) => {
                    debug!(app_id = %app_id, stream = stream_name, error = %e, "Log stream closed");
                    break;
                },
            }
        }
        // EOF: flush any trailing partial line.
        if !pending.is_empty() {
            pending.push(b'\n');
            writer.write_line(&pending);
            tee_to_host(&app_id, &pending);
        }
    })
}

fn tee_to_host(app_id: &AppId, line: &[u8]) {
    let text = String::from_utf8_lossy(line);
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "[app:{app_id}] {text}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/stdout.log");
        let mut writer = LogWriter::open(path.clone()).unwrap();
        writer.write_line(b"hello\n");
        writer.write_line(b"world\n");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "hello\nworld\n");
    }

    #[test]
    fn test_rotation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stdout.log");
        let mut writer = LogWriter::open(path.clone()).unwrap();

        // Push the counter past the threshold, then write once more.
        let big_line = vec![b'x'; 1024];
        let mut big_line = big_line;
        big_line.push(b'\n');
        #[allow(clippy::arithmetic_side_effects)]
        let lines = (ROTATE_BYTES / 1025) + 2;
        for _ in 0..lines {
            writer.write_line(&big_line);
        }
        writer.write_line(b"after rotation\n");

        let rotated = tmp.path().join("stdout.log.1");
        assert!(rotated.exists(), "expected rotated file");
        let current = std::fs::read_to_string(&path).unwrap();
        assert!(current.contains("after rotation"));
    }

    #[tokio::test]
    async fn test_tee_buffers_partial_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stdout.log");
        let writer = LogWriter::open(path.clone()).unwrap();

        let (mut tx, rx) = tokio::io::duplex(256);
        let task = spawn_tee(
            AppId::from_static("com.example.a"),
            "stdout",
            rx,
            writer,
        );

        use tokio::io::AsyncWriteExt as _;
        tx.write_all(b"partial").await.unwrap();
        tx.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // No newline yet, nothing written.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        tx.write_all(b" line\nnext").await.unwrap();
        tx.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "partial line\n");

        // EOF flushes the tail.
        drop(tx);
        let _ = task.await;
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "partial line\nnext\n"
        );
    }
}
