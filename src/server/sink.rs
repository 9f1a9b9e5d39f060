//! [`ResponseSink`] over a connection's write half.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::{Headers, Method, Request, StatusCode, wire};
use crate::sink::ResponseSink;

// How the body of the current response is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    // Status or method forbids a body; body writes are dropped.
    NoBody,
    Length,
    Chunked,
    // HTTP/1.0 without a length: the body ends when the connection closes.
    UntilClose,
}

/// Writes one response to a connection in HTTP/1.1 wire format.
///
/// The body framing is decided when the head is written: a `Content-Length`
/// header is honoured as-is, otherwise HTTP/1.1 clients get chunked transfer
/// encoding and HTTP/1.0 clients get the body terminated by closing the
/// connection.
pub struct ConnectionSink<'a, W> {
    writer: &'a mut W,
    http11: bool,
    head_request: bool,
    keep_alive: bool,
    framing: Framing,
    headers_sent: bool,
    ended: bool,
    broken: bool,
}

impl<'a, W> ConnectionSink<'a, W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Prepares a sink answering `request` on `writer`.
    pub fn new(writer: &'a mut W, request: &Request) -> Self {
        Self {
            writer,
            http11: request.version() >= 1,
            head_request: *request.method() == Method::Head,
            keep_alive: request.is_keep_alive(),
            framing: Framing::NoBody,
            headers_sent: false,
            ended: false,
            broken: false,
        }
    }

    /// `true` if the connection may carry another request after this response.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive && !self.broken && self.framing != Framing::UntilClose
    }

    /// `true` once the response was completed.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    async fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Err(e) = self.writer.write_all(bytes).await {
            self.broken = true;
            return Err(e);
        }
        Ok(())
    }
}

fn not_writable() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response is no longer writable")
}

#[async_trait]
impl<'a, W> ResponseSink for ConnectionSink<'a, W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    fn writable(&self) -> bool {
        !self.ended && !self.broken
    }

    async fn write_head(&mut self, status: StatusCode, headers: &Headers) -> io::Result<()> {
        if !self.writable() || self.headers_sent {
            return Err(not_writable());
        }

        let mut headers = headers.clone();
        self.framing = if status.is_empty_body() || self.head_request {
            Framing::NoBody
        } else if headers.contains("content-length") {
            Framing::Length
        } else if self.http11 {
            headers.set("Transfer-Encoding", "chunked");
            Framing::Chunked
        } else {
            Framing::UntilClose
        };

        let connection = if self.keep_alive() { "keep-alive" } else { "close" };
        headers.set("Connection", connection);

        let head = wire::encode_head(status, &headers);
        self.put(&head).await?;
        self.headers_sent = true;
        Ok(())
    }

    async fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        if !self.writable() {
            return Err(not_writable());
        }
        match self.framing {
            Framing::NoBody => Ok(()),
            Framing::Chunked => {
                let framed = wire::encode_chunk(chunk);
                self.put(&framed).await
            }
            Framing::Length | Framing::UntilClose => self.put(chunk).await,
        }
    }

    async fn end(&mut self) -> io::Result<()> {
        if self.ended {
            return Ok(());
        }
        if self.broken {
            return Err(not_writable());
        }
        if self.headers_sent && self.framing == Framing::Chunked {
            self.put(wire::LAST_CHUNK).await?;
        }
        if let Err(e) = self.writer.flush().await {
            self.broken = true;
            return Err(e);
        }
        self.ended = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.broken = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    fn sized_headers(len: usize) -> Headers {
        let mut h = Headers::new();
        h.set("Content-Length", len.to_string());
        h
    }

    #[tokio::test]
    async fn length_framed_body() {
        let mut out = Vec::new();
        let req = Request::new(Method::Get, "/");
        let mut sink = ConnectionSink::new(&mut out, &req);

        sink.write_head(StatusCode::OK, &sized_headers(2)).await.unwrap();
        sink.write_body(b"hi").await.unwrap();
        sink.end().await.unwrap();
        assert!(sink.keep_alive());
        assert!(!sink.writable());

        assert_eq!(
            text(out),
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nhi"
        );
    }

    #[tokio::test]
    async fn unknown_length_is_chunked() {
        let mut out = Vec::new();
        let req = Request::new(Method::Get, "/");
        let mut sink = ConnectionSink::new(&mut out, &req);

        sink.write_head(StatusCode::OK, &Headers::new()).await.unwrap();
        sink.write_body(b"hello").await.unwrap();
        sink.write_body(b"").await.unwrap();
        sink.end().await.unwrap();

        let s = text(out);
        assert!(s.contains("Transfer-Encoding: chunked\r\n"));
        assert!(s.ends_with("\r\n\r\n5\r\nhello\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn http10_without_length_closes() {
        let mut out = Vec::new();
        let req = Request::new(Method::Get, "/")
            .with_version(0)
            .with_header("Connection", "keep-alive");
        let mut sink = ConnectionSink::new(&mut out, &req);

        sink.write_head(StatusCode::OK, &Headers::new()).await.unwrap();
        sink.write_body(b"raw").await.unwrap();
        sink.end().await.unwrap();
        assert!(!sink.keep_alive());

        let s = text(out);
        assert!(s.contains("Connection: close\r\n"));
        assert!(s.ends_with("\r\n\r\nraw"));
    }

    #[tokio::test]
    async fn head_request_drops_body_bytes() {
        let mut out = Vec::new();
        let req = Request::new(Method::Head, "/");
        let mut sink = ConnectionSink::new(&mut out, &req);

        sink.write_head(StatusCode::OK, &sized_headers(5)).await.unwrap();
        sink.write_body(b"hello").await.unwrap();
        sink.end().await.unwrap();

        let s = text(out);
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
        assert!(!s.contains("chunked"));
    }

    #[tokio::test]
    async fn abort_leaves_chunked_body_unterminated() {
        let mut out = Vec::new();
        let req = Request::new(Method::Get, "/");
        let mut sink = ConnectionSink::new(&mut out, &req);

        sink.write_head(StatusCode::OK, &Headers::new()).await.unwrap();
        sink.write_body(b"partial").await.unwrap();
        sink.abort();

        assert!(!sink.writable());
        assert!(!sink.keep_alive());
        assert!(!sink.is_ended());
        assert!(sink.end().await.is_err());

        let s = text(out);
        assert!(s.ends_with("\r\n\r\n7\r\npartial\r\n"));
        assert!(!s.ends_with("0\r\n\r\n"));
    }

    #[tokio::test]
    async fn head_cannot_be_written_twice() {
        let mut out = Vec::new();
        let req = Request::new(Method::Get, "/");
        let mut sink = ConnectionSink::new(&mut out, &req);

        sink.write_head(StatusCode::NO_CONTENT, &Headers::new()).await.unwrap();
        assert!(sink.write_head(StatusCode::OK, &Headers::new()).await.is_err());
    }
}
