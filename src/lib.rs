//! # rkoa
//!
//! A small async web framework built around one mutable request context and
//! an onion-style middleware chain. Middleware sets status, headers and body
//! on the [`Context`]; once the chain completes, the response is serialized
//! from whatever the context holds. The body's type decides the framing:
//! buffers and text are sent with a `Content-Length`, structured values are
//! encoded as JSON, and streams are piped chunk by chunk.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rkoa::{Application, from_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = Application::new();
//!     app.with(from_fn(|ctx, next| Box::pin(async move {
//!         ctx.set_json(serde_json::json!({ "hello": "world" }));
//!         next.run(ctx).await
//!     })));
//!     app.listen("127.0.0.1:8080").await?;
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod body;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod middleware;
pub mod respond;
pub mod server;
pub mod sink;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use application::Application;
pub use body::Body;
pub use config::{Config, Env};
pub use context::Context;
pub use error::{Error, HttpError};
pub use http::{Headers, Method, Request, StatusCode};
pub use middleware::{LoggerMiddleware, Middleware, Next, from_fn};
pub use respond::Sent;
pub use server::{Server, ServerError};
pub use sink::{BufferSink, ResponseSink};
