//! Middleware pipeline — an ordered chain of handlers over one shared context.
//!
//! Every middleware receives the request's [`Context`] by mutable reference
//! and a [`Next`] cursor into the rest of the chain. It may:
//!
//! - **Short-circuit** — set a response and return without calling `next`.
//! - **Delegate** — `next.run(ctx).await`.
//! - **Decorate** — delegate, then inspect or change what downstream set.
//!
//! The chain itself produces no response: once it completes, the dispatcher
//! serializes whatever the context holds. Running off the end of the chain
//! simply resolves `Ok(())`, leaving the default 404 in place if nothing
//! else was set.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining chain; consumed by [`Next::run`].
//! - [`MiddlewareHandler`] — shared, type-erased middleware.
//! - [`from_fn`] — adapts a closure into a [`Middleware`].
//! - [`LoggerMiddleware`] — built-in request logger.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;

use crate::context::Context;
use crate::error::Error;

/// A boxed, `Send` future borrowing from `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A shared, type-erased middleware. Cheap to clone.
pub type MiddlewareHandler = Arc<dyn Middleware>;

/// The core trait for all middleware.
///
/// # Contract
///
/// - Implementations must be `Send + Sync`; one instance serves every request.
/// - The returned future must be `Send`, so do not hold a shared `&Context`
///   across an `.await`; copy what you need out of it first.
///
/// # Examples
///
/// ```rust
/// use rkoa::context::Context;
/// use rkoa::error::Error;
/// use rkoa::middleware::{BoxFuture, Middleware, Next};
///
/// struct PoweredBy;
///
/// impl Middleware for PoweredBy {
///     fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
///         Box::pin(async move {
///             next.run(ctx).await?;
///             ctx.set_header("X-Powered-By", "rkoa");
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Handles the request, optionally delegating to `next`.
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>>;
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so each middleware can forward
/// at most once.
pub struct Next<'a> {
    chain: &'a [MiddlewareHandler],
}

impl<'a> Next<'a> {
    /// Creates a cursor positioned at the start of `chain`.
    pub fn new(chain: &'a [MiddlewareHandler]) -> Self {
        Self { chain }
    }

    /// Number of middleware still ahead of this cursor.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }

    /// Invokes the next middleware, or resolves `Ok(())` at the end of the chain.
    ///
    /// The context borrow only needs to last for this call, so the caller gets
    /// `ctx` back afterwards to decorate the response.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b, Result<(), Error>>
    where
        'a: 'b,
    {
        match self.chain.split_first() {
            Some((first, rest)) => first.handle(ctx, Next { chain: rest }),
            None => Box::pin(async { Ok(()) }),
        }
    }
}

/// Adapter returned by [`from_fn`].
pub struct FromFn<F> {
    f: F,
}

impl<F> Middleware for FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        (self.f)(ctx, next)
    }
}

/// Wraps a closure as middleware.
///
/// # Examples
///
/// ```rust
/// use rkoa::middleware::from_fn;
///
/// let hello = from_fn(|ctx, next| {
///     Box::pin(async move {
///         ctx.set_body("hello");
///         next.run(ctx).await
///     })
/// });
/// ```
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    FromFn { f }
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line after the rest of the chain
/// completes, in the format:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
///
/// Failures are logged at `warn` with the status the error maps to and then
/// passed on unchanged.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.method().as_str().to_owned();
            let path = ctx.path().to_owned();

            let result = next.run(ctx).await;
            let duration = start.elapsed();

            match &result {
                Ok(()) => {
                    tracing::info!("{} {} - {} ({:?})", method, path, ctx.status().as_u16(), duration)
                }
                Err(e) => tracing::warn!(
                    "{} {} - {} ({:?}): {}",
                    method,
                    path,
                    e.status().as_u16(),
                    duration,
                    e
                ),
            }

            result
        })
    }
}
