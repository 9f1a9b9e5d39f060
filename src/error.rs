//! Errors raised while handling a request.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::http::StatusCode;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error carrying an HTTP status, typically raised by middleware through
/// [`Context::throw`](crate::context::Context::throw).
///
/// Client errors (4xx) are exposed by default: their message is sent to the
/// client and the default reporter stays silent about them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
    expose: bool,
}

impl HttpError {
    /// Creates an error with `status` and `message`. `expose` defaults to
    /// `true` for statuses below 500.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            expose: status.as_u16() < 500,
        }
    }

    /// Creates an error whose message is the status' reason phrase.
    pub fn from_status(status: StatusCode) -> Self {
        let message = status
            .canonical_reason()
            .map(str::to_owned)
            .unwrap_or_else(|| status.as_u16().to_string());
        Self::new(status, message)
    }

    /// Overrides whether the message may be shown to the client.
    #[must_use]
    pub fn expose(mut self, expose: bool) -> Self {
        self.expose = expose;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_exposed(&self) -> bool {
        self.expose
    }
}

/// Every failure the dispatcher can route to the error handler.
#[derive(Debug, Error)]
pub enum Error {
    /// Raised by middleware with an explicit status.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Any other failure raised by middleware.
    #[error("middleware failed: {0}")]
    Middleware(#[source] Box<dyn StdError + Send + Sync>),

    /// A structured body could not be encoded as JSON.
    #[error("failed to serialize response body: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A streamed body yielded an error part-way through.
    #[error("response body stream failed: {0}")]
    Stream(#[source] io::Error),

    /// Writing to the connection failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The middleware chain did not complete in time.
    #[error("middleware chain timed out after {0:?}")]
    Timeout(Duration),

    #[error("an error handler is already registered")]
    HandlerAlreadyRegistered,
}

impl Error {
    /// Wraps an arbitrary error raised by middleware.
    pub fn middleware<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Middleware(err.into())
    }

    /// HTTP status the error response should use.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http(e) => e.status(),
            Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Io(e) if e.kind() == io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error message is safe to show to the client.
    pub fn is_exposed(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_exposed())
    }

    /// Text sent to the client: the message when exposed, otherwise the reason phrase.
    pub fn public_message(&self) -> String {
        if self.is_exposed() {
            return self.to_string();
        }
        let status = self.status();
        status
            .canonical_reason()
            .map(str::to_owned)
            .unwrap_or_else(|| status.as_u16().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_exposed_by_default() {
        let e = HttpError::new(StatusCode::BAD_REQUEST, "name required");
        assert!(e.is_exposed());
        let e = HttpError::new(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(!e.is_exposed());
        assert!(e.clone().expose(true).is_exposed());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(Error::Timeout(Duration::from_secs(1)).status().as_u16(), 503);
        assert_eq!(Error::from(HttpError::from_status(StatusCode::NOT_FOUND)).status().as_u16(), 404);
        assert_eq!(
            Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).status().as_u16(),
            404
        );
        assert_eq!(Error::middleware("boom").status().as_u16(), 500);
    }

    #[test]
    fn public_message_hides_internal_details() {
        assert_eq!(Error::middleware("db password wrong").public_message(), "Internal Server Error");
        let exposed = Error::from(HttpError::new(StatusCode::FORBIDDEN, "no access"));
        assert_eq!(exposed.public_message(), "no access");
    }
}
