//! gRPC transport over unix-domain sockets.

use std::path::Path;
use std::sync::Arc;

use hyper_util::rt::TokioIo;
use tokio::net::{UnixListener, UnixStream};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::{Channel, Endpoint, Error, Uri};
use tower::service_fn;

/// Dial a gRPC channel over the unix socket at `socket_path`.
///
/// The endpoint URI is required by the API but never resolved — the
/// connector supplies the transport.
///
/// # Errors
///
/// Returns the transport error if the socket cannot be connected.
pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Channel, Error> {
    let path = Arc::new(socket_path.as_ref().to_path_buf());
    Endpoint::from_static("http://app.sock")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = Arc::clone(&path);
            async move {
                let stream = UnixStream::connect(path.as_path()).await?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        }))
        .await
}

/// Bind a unix listener at `socket_path` as a tonic-compatible incoming
/// stream (`Server::serve_with_incoming`).
///
/// # Errors
///
/// Returns the I/O error if the socket cannot be bound.
pub fn bind(socket_path: impl AsRef<Path>) -> std::io::Result<UnixListenerStream> {
    let listener = UnixListener::bind(socket_path)?;
    Ok(UnixListenerStream::new(listener))
}
