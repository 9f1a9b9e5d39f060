//! Response serialization — turning a finished [`Context`] into bytes on a sink.
//!
//! [`respond`] applies these rules in order, first match wins:
//!
//! 1. the context was bypassed — write nothing;
//! 2. the sink is no longer writable — write nothing;
//! 3. the status forbids a body (1xx, 204, 205, 304) — drop the body and its
//!    entity headers, send the head only;
//! 4. `HEAD` request — record the length of the body's JSON encoding, send
//!    the head only;
//! 5. no body — send the message, or the status code as text;
//! 6. bytes or text — send verbatim;
//! 7. stream — pipe it, length unknown up front;
//! 8. structured value — encode as JSON and send.
//!
//! Headers (`Content-Length`, default `Content-Type`) are only touched while
//! they have not been flushed yet.

use futures::StreamExt;
use tracing::debug;

use crate::body::Body;
use crate::context::Context;
use crate::error::Error;
use crate::http::{Headers, Method, StatusCode};
use crate::sink::ResponseSink;

/// How much of a response went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    /// A body of known length (zero for head-only or skipped responses).
    Bytes(u64),
    /// A streamed body; completion was decided by the stream ending.
    Streamed,
}

impl Sent {
    /// Byte count, when it was known.
    pub fn len(self) -> Option<u64> {
        match self {
            Self::Bytes(n) => Some(n),
            Self::Streamed => None,
        }
    }
}

/// Serializes the response held by `ctx` onto `sink`.
///
/// # Errors
///
/// - [`Error::Serialize`] — a structured body could not be encoded.
/// - [`Error::Stream`] — a streamed body yielded an error.
/// - [`Error::Io`] — the sink failed. If the head was already out, the client
///   may have received a partial response.
pub async fn respond<S>(ctx: &mut Context, sink: &mut S) -> Result<Sent, Error>
where
    S: ResponseSink + ?Sized,
{
    if ctx.is_bypassed() {
        debug!(path = %ctx.path(), "response bypassed by middleware");
        return Ok(Sent::Bytes(0));
    }

    if !sink.writable() {
        debug!(path = %ctx.path(), "sink no longer writable, skipping response");
        return Ok(Sent::Bytes(0));
    }

    let status = ctx.status();
    let headers_sent = sink.headers_sent();

    if status.is_empty_body() {
        ctx.response_mut().strip_body();
        let headers = ctx.response().headers();
        send(sink, status, headers, &[]).await?;
        return Ok(Sent::Bytes(0));
    }

    if *ctx.method() == Method::Head {
        let body = ctx.response_mut().take_body();
        if !headers_sent {
            if let Some(len) = body.json_len().map_err(Error::Serialize)? {
                ctx.set_length(len);
            }
            default_type(ctx, &body);
        }
        let headers = ctx.response().headers();
        send(sink, status, headers, &[]).await?;
        return Ok(Sent::Bytes(0));
    }

    let body = ctx.response_mut().take_body();
    if !headers_sent {
        default_type(ctx, &body);
    }

    match body {
        Body::Empty => {
            let text = ctx
                .message()
                .map(str::to_owned)
                .unwrap_or_else(|| status.as_u16().to_string());
            if !headers_sent {
                ctx.set_type("text");
                ctx.set_length(text.len() as u64);
            }
            let headers = ctx.response().headers();
            send(sink, status, headers, text.as_bytes()).await
        }
        Body::Bytes(bytes) => {
            if !headers_sent {
                ctx.set_length(bytes.len() as u64);
            }
            let headers = ctx.response().headers();
            send(sink, status, headers, &bytes).await
        }
        Body::Text(text) => {
            if !headers_sent {
                ctx.set_length(text.len() as u64);
            }
            let headers = ctx.response().headers();
            send(sink, status, headers, text.as_bytes()).await
        }
        Body::Stream(mut stream) => {
            if !sink.headers_sent() {
                let headers = ctx.response().headers();
                sink.write_head(status, headers).await?;
            }
            let mut total = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(Error::Stream)?;
                total += chunk.len() as u64;
                sink.write_body(&chunk).await?;
            }
            sink.end().await?;
            debug!(path = %ctx.path(), bytes = total, "streamed response body");
            Ok(Sent::Streamed)
        }
        Body::Json(value) => {
            let encoded = value.to_json().map_err(Error::Serialize)?;
            if !headers_sent {
                ctx.set_length(encoded.len() as u64);
            }
            let headers = ctx.response().headers();
            send(sink, status, headers, &encoded).await
        }
    }
}

/// Writes a plain-text response for `err`, or aborts the sink when the head
/// is already out.
///
/// Headers set by middleware are discarded; the body is the error message
/// when it is exposed and the reason phrase otherwise.
///
/// # Errors
///
/// Returns the sink's I/O error.
pub async fn respond_error<S>(ctx: &mut Context, err: &Error, sink: &mut S) -> std::io::Result<()>
where
    S: ResponseSink + ?Sized,
{
    if !sink.writable() {
        return Ok(());
    }
    if sink.headers_sent() {
        // Ending normally would frame a truncated body as complete.
        sink.abort();
        return Ok(());
    }

    let status = err.status();
    let message = err.public_message();
    let is_head = *ctx.method() == Method::Head;

    let response = ctx.response_mut();
    response.headers_mut().clear();
    response.take_body();
    response.set_status(status);
    response.set_type("text");
    response.set_length(message.len() as u64);

    let headers = ctx.response().headers();
    sink.write_head(status, headers).await?;
    if !is_head && !status.is_empty_body() {
        sink.write_body(message.as_bytes()).await?;
    }
    sink.end().await
}

// Head (unless already flushed), body, end. Takes the headers rather than the
// context so no `&Context` lives across an await.
async fn send<S>(
    sink: &mut S,
    status: StatusCode,
    headers: &Headers,
    body: &[u8],
) -> Result<Sent, Error>
where
    S: ResponseSink + ?Sized,
{
    if !sink.headers_sent() {
        sink.write_head(status, headers).await?;
    }
    if !body.is_empty() {
        sink.write_body(body).await?;
    }
    sink.end().await?;
    Ok(Sent::Bytes(body.len() as u64))
}

fn default_type(ctx: &mut Context, body: &Body) {
    if ctx.response().content_type().is_none() {
        if let Some(mime) = body.default_content_type() {
            ctx.set_type(mime);
        }
    }
}
