//! Outbound side of a request: where the serialized response goes.
//!
//! [`ResponseSink`] is the seam between response serialization and the
//! transport. The server implements it over a TCP stream; [`BufferSink`]
//! collects everything in memory, which makes an application testable
//! without a socket.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::http::{Headers, StatusCode};

/// A response destination that can take a head, body bytes and an end marker.
///
/// The head must be written at most once and before any body bytes. Once
/// [`end`](Self::end) has run, or the peer went away, [`writable`](Self::writable)
/// returns `false` and nothing more may be written.
#[async_trait]
pub trait ResponseSink: Send {
    /// `true` once the status line and headers have been flushed.
    fn headers_sent(&self) -> bool;

    /// `false` once the response has ended or the connection is gone.
    fn writable(&self) -> bool;

    /// Writes the status line and headers.
    async fn write_head(&mut self, status: StatusCode, headers: &Headers) -> io::Result<()>;

    /// Writes a piece of the body.
    async fn write_body(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Completes the response.
    async fn end(&mut self) -> io::Result<()>;

    /// Gives up on a response whose head is already out, without writing a
    /// body terminator, so the client can tell the body is truncated.
    /// Afterwards the sink is no longer writable.
    fn abort(&mut self);
}

/// A sink that records the response in memory.
///
/// # Examples
///
/// ```
/// use rkoa::sink::{BufferSink, ResponseSink};
/// use rkoa::http::{Headers, StatusCode};
///
/// # tokio_test_block(async {
/// let mut sink = BufferSink::new();
/// sink.write_head(StatusCode::OK, &Headers::new()).await.unwrap();
/// sink.write_body(b"hi").await.unwrap();
/// sink.end().await.unwrap();
/// assert_eq!(sink.body(), b"hi");
/// assert!(!sink.writable());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct BufferSink {
    status: Option<StatusCode>,
    headers: Headers,
    body: BytesMut,
    headers_sent: bool,
    ended: bool,
    closed: bool,
    aborted: bool,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose head has already gone out, as if flushed by earlier code.
    pub fn with_headers_sent(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            headers_sent: true,
            ..Self::default()
        }
    }

    /// A sink whose connection is already gone.
    pub fn closed() -> Self {
        Self {
            closed: true,
            ..Self::default()
        }
    }

    /// Status written with the head, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Headers written with the head.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.body)
    }

    /// `true` once [`end`](ResponseSink::end) ran.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// `true` once [`abort`](ResponseSink::abort) ran.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response already finished")
}

#[async_trait]
impl ResponseSink for BufferSink {
    fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    fn writable(&self) -> bool {
        !self.ended && !self.closed && !self.aborted
    }

    async fn write_head(&mut self, status: StatusCode, headers: &Headers) -> io::Result<()> {
        if !self.writable() || self.headers_sent {
            return Err(closed_error());
        }
        self.status = Some(status);
        self.headers = headers.clone();
        self.headers_sent = true;
        Ok(())
    }

    async fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        if !self.writable() {
            return Err(closed_error());
        }
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    async fn end(&mut self) -> io::Result<()> {
        if self.closed || self.aborted {
            return Err(closed_error());
        }
        self.ended = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}
