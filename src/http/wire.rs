//! HTTP/1.1 wire encoding for response heads and chunked bodies.

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode};

/// Terminating chunk of a `Transfer-Encoding: chunked` body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Serializes a status line and header block, including the blank separator line.
///
/// Headers are written verbatim in insertion order; framing headers
/// (`Content-Length`, `Transfer-Encoding`, `Connection`) must already be in
/// `headers`.
///
/// # Examples
///
/// ```
/// use rkoa::http::{Headers, StatusCode, wire};
///
/// let mut headers = Headers::new();
/// headers.set("Content-Length", "2");
/// let head = wire::encode_head(StatusCode::OK, &headers);
/// assert_eq!(&head[..], b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n");
/// ```
pub fn encode_head(status: StatusCode, headers: &Headers) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64 + headers.len() * 48);

    buf.put_slice(b"HTTP/1.1 ");
    buf.put_slice(status.as_u16().to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
    buf.put_slice(b"\r\n");

    for (name, value) in headers.iter() {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf
}

/// Frames `data` as a single chunk. Empty input yields an empty buffer, since a
/// zero-length chunk would terminate the body.
pub fn encode_chunk(data: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    if data.is_empty() {
        return buf;
    }
    buf.reserve(data.len() + 12);
    buf.put_slice(format!("{:X}\r\n", data.len()).as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn head_in_insertion_order() {
        let mut h = Headers::new();
        h.set("Content-Type", "text/plain; charset=utf-8");
        h.append("X-Request-Id", "abc-123");
        let s = to_string(encode_head(StatusCode::NOT_FOUND, &h));
        assert_eq!(
            s,
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain; charset=utf-8\r\nX-Request-Id: abc-123\r\n\r\n"
        );
    }

    #[test]
    fn unknown_status_has_empty_reason() {
        let s = to_string(encode_head(StatusCode::from_u16(599).unwrap(), &Headers::new()));
        assert!(s.starts_with("HTTP/1.1 599 \r\n"));
    }

    #[test]
    fn chunk_framing() {
        assert_eq!(to_string(encode_chunk(b"hello world!!!!!")), "10\r\nhello world!!!!!\r\n");
        assert!(encode_chunk(b"").is_empty());
    }
}
