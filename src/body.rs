//! Response body values.
//!
//! A [`Body`] is whatever middleware assigned to the response: nothing, raw
//! bytes, text, a structured value to be encoded as JSON, or a byte stream.
//! The variant decides how [`respond`](crate::respond::respond) puts it on the
//! wire.

use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A streamed body: chunks of bytes, ended by the stream finishing.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Read size used by [`Body::reader`].
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// A value that can be encoded as JSON when the response is written.
///
/// Implemented for every `Serialize + Send + Sync` type, so structured bodies
/// are stored unencoded and any encoding error surfaces during serialization.
pub trait ToJson: Send + Sync {
    /// Encodes the value as JSON bytes.
    fn to_json(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T> ToJson for T
where
    T: Serialize + Send + Sync,
{
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// The body of an outgoing response.
///
/// # Examples
///
/// ```
/// use rkoa::body::Body;
///
/// assert!(Body::from("hello").is_text());
/// assert!(Body::json(serde_json::json!({ "a": 1 })).is_json());
/// assert!(Body::default().is_empty());
/// ```
#[derive(Default)]
pub enum Body {
    /// No body was assigned.
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    /// A structured value, encoded as JSON when written.
    Json(Box<dyn ToJson>),
    /// A byte stream of unknown length.
    Stream(BodyStream),
}

impl Body {
    /// Wraps a serializable value.
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self::Json(Box::new(value))
    }

    /// Wraps a stream of byte chunks.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }

    /// Streams everything readable from `reader`, e.g. an open file.
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let chunks = stream::try_unfold(reader, |mut reader| async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                Ok(None)
            } else {
                Ok(Some((buf.freeze(), reader)))
            }
        });
        Self::stream(chunks)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Default `Content-Type` for this kind of body, if it has one.
    pub fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Bytes(_) | Self::Stream(_) => Some("application/octet-stream"),
            Self::Text(_) => Some("text/plain; charset=utf-8"),
            Self::Json(_) => Some("application/json; charset=utf-8"),
        }
    }

    /// Byte length of this body's JSON encoding, as a `HEAD` response
    /// reports it.
    ///
    /// An absent body encodes as `null` and text as a JSON string. Raw bytes
    /// have no JSON form and report their own length; streams report nothing.
    ///
    /// # Errors
    ///
    /// Returns the JSON encoding error of a structured value.
    pub fn json_len(&self) -> serde_json::Result<Option<u64>> {
        Ok(match self {
            Self::Empty => Some(b"null".len() as u64),
            Self::Stream(_) => None,
            Self::Bytes(b) => Some(b.len() as u64),
            Self::Text(s) => Some(serde_json::to_vec(s)?.len() as u64),
            Self::Json(value) => Some(value.to_json()?.len() as u64),
        })
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Bytes(b) => f.debug_tuple("Body::Bytes").field(&b.len()).finish(),
            Self::Text(s) => f.debug_tuple("Body::Text").field(s).finish(),
            Self::Json(_) => f.write_str("Body::Json(..)"),
            Self::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::json(value)
    }
}
