//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches each HTTP/1.1 request through an
//! [`Application`]. Persistent connections (keep-alive) are supported, and
//! responses of unknown length are sent with chunked transfer encoding.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::application::Application;
use crate::http::{
    Headers, StatusCode,
    request::{Request, RequestError},
    wire,
};

mod sink;

pub use sink::ConnectionSink;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use rkoa::{Application, Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.serve(Application::new().build()).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and serves `app` on each of them, one Tokio task
    /// per connection. Runs until the process ends.
    ///
    /// # Errors
    ///
    /// Currently never returns an error: failed accepts are logged and skipped.
    pub async fn serve(self, app: Arc<Application>) -> Result<(), ServerError> {
        info!(address = %self.local_addr, env = %app.config().env, "rkoa listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let app = Arc::clone(&app);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, app).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// Requests are read and answered one at a time until the peer closes the
/// connection, a request or response asks for `Connection: close`, or a
/// response could not be completed.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    app: Arc<Application>,
) -> Result<(), std::io::Error> {
    let max_request_size = app.config().max_request_size;
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                if buf.len() > max_request_size {
                    warn!(peer = %peer_addr, "request head too large, sending 413");
                    reject(&mut stream, StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large").await?;
                    break;
                }
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                reject(&mut stream, StatusCode::BAD_REQUEST, &format!("Bad Request: {e}")).await?;
                break;
            }
        };

        // Client-controlled; may be close to usize::MAX.
        let total_needed = match request.content_length() {
            Some(len) => body_offset.checked_add(len),
            None => Some(body_offset),
        };
        let total_needed = match total_needed {
            Some(total) if total <= max_request_size => total,
            _ => {
                warn!(
                    peer = %peer_addr,
                    content_length = ?request.content_length(),
                    "request too large, sending 413"
                );
                reject(&mut stream, StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large").await?;
                break;
            }
        };

        // Wait for the full body to arrive.
        if buf.len() < total_needed {
            buf.reserve(total_needed - buf.len());
            if stream.read_buf(&mut buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed mid-body");
                break;
            }
            continue;
        }

        let raw = buf.split_to(total_needed).freeze();
        let request = request.with_body(raw.slice(body_offset..));

        let mut sink = ConnectionSink::new(&mut stream, &request);
        if let Err(e) = app.handle(request, &mut sink).await {
            debug!(peer = %peer_addr, error = %e, "request failed");
        }

        if !sink.is_ended() {
            debug!(peer = %peer_addr, "response left unfinished, closing connection");
            break;
        }
        if !sink.keep_alive() {
            debug!(peer = %peer_addr, "connection not reusable, shutting down");
            break;
        }
    }

    stream.shutdown().await.ok();
    Ok(())
}

/// Writes a complete plain-text response and asks the client to close.
async fn reject<W>(stream: &mut W, status: StatusCode, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut headers = Headers::with_capacity(3);
    headers.set("Content-Type", "text/plain; charset=utf-8");
    headers.set("Content-Length", message.len().to_string());
    headers.set("Connection", "close");

    let mut out = wire::encode_head(status, &headers);
    out.extend_from_slice(message.as_bytes());
    stream.write_all(&out).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reject_writes_complete_response() {
        let mut out: Vec<u8> = Vec::new();
        reject(&mut out, StatusCode::BAD_REQUEST, "nope").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nnope"));
    }

    #[tokio::test]
    async fn bind_reports_bad_address() {
        let err = Server::bind("no-port-here").await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
