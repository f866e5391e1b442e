//! App socket bring-up.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::RuntimeResult;

/// Initial poll interval while waiting for the socket.
const POLL_INITIAL: Duration = Duration::from_millis(50);

/// Poll interval cap.
const POLL_MAX: Duration = Duration::from_millis(500);

/// File name of an app's unix socket inside its directory.
pub const SOCKET_FILE_NAME: &str = "app.sock";

/// Poll `socket_path` with exponential backoff until a connect succeeds
/// or `timeout` elapses. Returns how long it waited on success; `Err`
/// carries the elapsed time on timeout — the caller maps it to a
/// startup-timeout error and kills the process group.
#[allow(clippy::missing_errors_doc)]
pub async fn wait_for_socket(socket_path: &Path, timeout: Duration) -> Result<Duration, Duration> {
    let start = Instant::now();
    let mut interval = POLL_INITIAL;
    loop {
        #[cfg(unix)]
        let connected = tokio::net::UnixStream::connect(socket_path).await.is_ok();
        #[cfg(not(unix))]
        let connected = socket_path.exists();

        if connected {
            debug!(socket = %socket_path.display(), waited = ?start.elapsed(), "App socket ready");
            return Ok(start.elapsed());
        }
        if start.elapsed() >= timeout {
            return Err(start.elapsed());
        }
        tokio::time::sleep(interval).await;
        interval = (interval.saturating_mul(2)).min(POLL_MAX);
    }
}

/// Restrict the socket to the host user.
///
/// # Errors
///
/// Returns an I/O error if permissions cannot be changed.
pub fn restrict_socket(socket_path: &Path) -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;

        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = socket_path;
    }
    Ok(())
}

/// Remove a stale socket file if present.
pub fn remove_stale_socket(socket_path: &Path) {
    let _ = std::fs::remove_file(socket_path);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_times_out_without_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("app.sock");
        let result = wait_for_socket(&socket, Duration::from_millis(200)).await;
        assert!(result.is_err());
        assert!(result.unwrap_err() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_wait_succeeds_once_bound() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("app.sock");

        let bind_path = socket.clone();
        let binder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            tokio::net::UnixListener::bind(&bind_path).unwrap()
        });

        let waited = wait_for_socket(&socket, Duration::from_secs(5)).await.unwrap();
        assert!(waited >= Duration::from_millis(100));
        let _listener = binder.await.unwrap();
    }

    #[tokio::test]
    async fn test_restrict_socket_mode() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("app.sock");
        let _listener = tokio::net::UnixListener::bind(&socket).unwrap();
        restrict_socket(&socket).unwrap();
        let mode = socket.metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
