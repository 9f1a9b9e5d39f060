//! The application object — middleware registration and per-request dispatch.
//!
//! [`Application::handle`] drives one request through its whole lifecycle:
//! build a [`Context`] from the template, run the middleware chain, then
//! either serialize the response or route the failure to the error handler.
//! Exactly one of those two outcomes happens per request.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::Config;
use crate::context::{Context, Template};
use crate::error::{Error, Result};
use crate::http::{Request, StatusCode};
use crate::middleware::{Middleware, MiddlewareHandler, Next};
use crate::respond::{Sent, respond, respond_error};
use crate::server::{Server, ServerError};
use crate::sink::ResponseSink;

/// Callback invoked once for every failed request.
pub type ErrorHandler = Arc<dyn Fn(&Error, &Context) + Send + Sync + 'static>;

/// A web application: an ordered middleware chain plus the settings that
/// shape every request's context.
///
/// Configure it mutably, then share it (the server wraps it in an [`Arc`]);
/// nothing in it changes while requests are served.
///
/// # Examples
///
/// ```rust,no_run
/// use rkoa::Application;
/// use rkoa::middleware::from_fn;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut app = Application::new();
///     app.with(from_fn(|ctx, next| Box::pin(async move {
///         ctx.set_body("Hello, World!");
///         next.run(ctx).await
///     })));
///     app.listen("127.0.0.1:3000").await?;
///     Ok(())
/// }
/// ```
pub struct Application {
    config: Config,
    template: Arc<Template>,
    middleware: Vec<MiddlewareHandler>,
    on_error: Option<ErrorHandler>,
}

impl Application {
    /// Creates an application configured from the `RKOA_*` environment variables.
    pub fn new() -> Self {
        Self::with_config(Config::from_env())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            template: Arc::new(Template::new(config.env.clone())),
            config,
            middleware: Vec::new(),
            on_error: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replaces the configuration. The template's environment follows it.
    pub fn set_config(&mut self, config: Config) -> &mut Self {
        Arc::make_mut(&mut self.template).set_env(config.env.clone());
        self.config = config;
        self
    }

    /// The template every request's context starts from.
    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn template_mut(&mut self) -> &mut Template {
        Arc::make_mut(&mut self.template)
    }

    /// Registers an application-wide value, see [`Context::shared`].
    pub fn manage<T>(&mut self, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.template_mut().manage(value);
        self
    }

    /// Appends a middleware to the end of the chain.
    pub fn with<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Middleware,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared middleware.
    pub fn with_shared(&mut self, middleware: MiddlewareHandler) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Number of registered middleware.
    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// Registers the error handler, replacing the default reporter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerAlreadyRegistered`] if a handler is already set;
    /// the existing one stays in place.
    pub fn on_error<F>(&mut self, handler: F) -> Result<&mut Self>
    where
        F: Fn(&Error, &Context) + Send + Sync + 'static,
    {
        if self.on_error.is_some() {
            return Err(Error::HandlerAlreadyRegistered);
        }
        self.on_error = Some(Arc::new(handler));
        Ok(self)
    }

    /// Freezes the application for serving.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Binds `addr` and serves this application until the process ends.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if binding or the listener fails.
    pub async fn listen(self, addr: impl AsRef<str>) -> Result<(), ServerError> {
        Server::bind(addr).await?.serve(self.build()).await
    }

    /// Dispatches one request to `sink`.
    ///
    /// Returns the serializer's outcome on success. On failure the error
    /// handler runs exactly once, a plain-text error response is written when
    /// the head has not gone out yet, and the error is returned.
    ///
    /// # Errors
    ///
    /// Any [`Error`] raised by middleware, by the timeout, or while serializing.
    pub async fn handle<S>(&self, request: Request, sink: &mut S) -> Result<Sent>
    where
        S: ResponseSink + ?Sized,
    {
        let mut ctx = Context::new(request, Arc::clone(&self.template));

        debug!(method = %ctx.method(), path = %ctx.path(), "dispatching request");

        let outcome = match self.run_chain(&mut ctx).await {
            Ok(()) => respond(&mut ctx, sink).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(sent) => {
                debug!(status = ctx.status().as_u16(), ?sent, "response sent");
                Ok(sent)
            }
            Err(err) => {
                self.report(&err, &ctx);
                if let Err(io) = respond_error(&mut ctx, &err, sink).await {
                    debug!(error = %io, "failed to write error response");
                }
                Err(err)
            }
        }
    }

    async fn run_chain(&self, ctx: &mut Context) -> Result<()> {
        let chain = Next::new(&self.middleware).run(ctx);
        match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, chain).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(limit)),
            },
            None => chain.await,
        }
    }

    fn report(&self, err: &Error, ctx: &Context) {
        match &self.on_error {
            Some(handler) => handler(err, ctx),
            None => report_error(&self.config, err),
        }
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("env", &self.config.env)
            .field("silent", &self.config.silent)
            .field("middleware", &self.middleware.len())
            .field("custom_error_handler", &self.on_error.is_some())
            .finish()
    }
}

/// The default error reporter.
///
/// Stays quiet when the application is silent, when the error maps to 404,
/// or when its message is exposed to the client — those are routine
/// outcomes. Everything else is logged at `error` level, every line
/// indented by two spaces; in development the `source()` chain is included.
pub fn report_error(config: &Config, err: &Error) {
    if should_report(config, err) {
        error!("\n{}\n", format_diagnostic(err, config.env.is_development()));
    }
}

/// `true` if the default reporter logs `err` under `config`.
pub fn should_report(config: &Config, err: &Error) -> bool {
    !(config.silent || err.status() == StatusCode::NOT_FOUND || err.is_exposed())
}

/// Formats `err` (and, when `verbose`, its causes) with every line indented.
pub fn format_diagnostic(err: &Error, verbose: bool) -> String {
    use std::error::Error as _;

    let mut text = err.to_string();
    if verbose {
        let mut source = err.source();
        while let Some(cause) = source {
            text.push_str("\ncaused by: ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
    }
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::HttpError;
    use crate::http::Method;
    use crate::middleware::from_fn;
    use crate::sink::BufferSink;

    fn get(path: &str) -> Request {
        Request::new(Method::Get, path)
    }

    fn counting_app(app: &mut Application) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        app.on_error(move |_err, _ctx| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        calls
    }

    #[tokio::test]
    async fn no_middleware_gives_404() {
        let app = Application::default().build();
        let mut sink = BufferSink::new();

        let sent = app.handle(get("/"), &mut sink).await.unwrap();

        assert_eq!(sent, Sent::Bytes(3));
        assert_eq!(sink.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(sink.body(), b"404");
    }

    #[tokio::test]
    async fn success_does_not_report() {
        let mut app = Application::default();
        let calls = counting_app(&mut app);
        app.with(from_fn(|ctx, next| {
            Box::pin(async move {
                ctx.set_json(serde_json::json!({ "a": 1 }));
                next.run(ctx).await
            })
        }));
        let app = app.build();
        let mut sink = BufferSink::new();

        let sent = app.handle(get("/"), &mut sink).await.unwrap();

        assert_eq!(sent, Sent::Bytes(7));
        assert_eq!(sink.body(), br#"{"a":1}"#);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn middleware_error_reported_once_and_answered() {
        let mut app = Application::default();
        let calls = counting_app(&mut app);
        app.with(from_fn(|_ctx, _next| {
            Box::pin(async move { Err(Error::middleware(io::Error::other("db down"))) })
        }));
        let app = app.build();
        let mut sink = BufferSink::new();

        let err = app.handle(get("/"), &mut sink).await.unwrap_err();

        assert!(matches!(err, Error::Middleware(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(sink.body(), b"Internal Server Error");
        assert!(sink.is_ended());
    }

    #[tokio::test]
    async fn serialization_error_reported_once() {
        #[derive(Debug)]
        struct Bad;
        impl serde::Serialize for Bad {
            fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("circular"))
            }
        }

        let mut app = Application::default();
        let calls = counting_app(&mut app);
        app.with(from_fn(|ctx, _next| {
            Box::pin(async move {
                ctx.set_json(Bad);
                Ok(())
            })
        }));
        let app = app.build();
        let mut sink = BufferSink::new();

        let err = app.handle(get("/"), &mut sink).await.unwrap_err();

        assert!(matches!(err, Error::Serialize(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn exposed_error_message_reaches_client() {
        let mut app = Application::default();
        app.with(from_fn(|ctx, _next| {
            Box::pin(async move {
                ctx.set_header("X-Dropped", "1");
                Err(HttpError::new(StatusCode::UNPROCESSABLE_ENTITY, "bad email").into())
            })
        }));
        let app = app.build();
        let mut sink = BufferSink::new();

        app.handle(get("/"), &mut sink).await.unwrap_err();

        assert_eq!(sink.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));
        assert_eq!(sink.body(), b"bad email");
        assert!(!sink.headers().contains("x-dropped"));
    }

    #[tokio::test]
    async fn second_error_handler_rejected() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&first);
        let mut app = Application::default();
        app.on_error(move |err, _ctx| log.lock().unwrap().push(err.to_string()))
            .unwrap();

        let second = app.on_error(|_err, _ctx| panic!("must not replace the first handler"));
        assert!(matches!(second, Err(Error::HandlerAlreadyRegistered)));

        app.with(from_fn(|_ctx, _next| {
            Box::pin(async move { Err(Error::middleware("boom")) })
        }));
        app.build().handle(get("/"), &mut BufferSink::new()).await.unwrap_err();

        assert_eq!(first.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handler_sees_request_context() {
        let paths = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&paths);
        let mut app = Application::default();
        app.on_error(move |_err, ctx| log.lock().unwrap().push(ctx.path().to_owned()))
            .unwrap();
        app.with(from_fn(|_ctx, _next| {
            Box::pin(async move { Err(Error::middleware("boom")) })
        }));

        app.build().handle(get("/orders/7"), &mut BufferSink::new()).await.unwrap_err();

        assert_eq!(*paths.lock().unwrap(), vec!["/orders/7"]);
    }

    #[tokio::test]
    async fn slow_chain_times_out() {
        let config = Config::default().timeout(Some(Duration::from_millis(20)));
        let mut app = Application::with_config(config);
        let calls = counting_app(&mut app);
        app.with(from_fn(|ctx, next| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                next.run(ctx).await
            })
        }));
        let app = app.build();
        let mut sink = BufferSink::new();

        let err = app.handle(get("/"), &mut sink).await.unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn shared_values_and_default_headers() {
        let mut app = Application::default();
        app.manage(String::from("v1"));
        app.template_mut().default_header("Server", "rkoa");
        app.with(from_fn(|ctx, _next| {
            Box::pin(async move {
                let version = ctx.shared::<String>().cloned().unwrap_or_default();
                ctx.set_body(version);
                Ok(())
            })
        }));
        let mut sink = BufferSink::new();

        app.build().handle(get("/"), &mut sink).await.unwrap();

        assert_eq!(sink.body(), b"v1");
        assert_eq!(sink.headers().get("server"), Some("rkoa"));
    }

    #[tokio::test]
    async fn closed_connection_is_not_an_error() {
        let mut app = Application::default();
        let calls = counting_app(&mut app);
        app.with(from_fn(|ctx, _next| {
            Box::pin(async move {
                ctx.set_body("late");
                Ok(())
            })
        }));

        let sent = app.build().handle(get("/"), &mut BufferSink::closed()).await.unwrap();

        assert_eq!(sent, Sent::Bytes(0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn diagnostic_lines_are_indented() {
        let err = Error::middleware(io::Error::other("line one\nline two"));
        let text = format_diagnostic(&err, true);
        assert!(text.lines().all(|line| line.starts_with("  ")));
        assert!(text.contains("caused by: line one"));

        let terse = format_diagnostic(&err, false);
        assert!(!terse.contains("caused by"));
    }

    #[test]
    fn default_reporter_skips_routine_errors() {
        let config = Config::default();
        let silent = config.clone().silent(true);

        let not_found: Error = HttpError::from_status(StatusCode::NOT_FOUND).expose(false).into();
        assert!(!should_report(&config, &not_found));
        assert!(!should_report(&config, &Error::Io(io::Error::from(io::ErrorKind::NotFound))));

        let exposed: Error = HttpError::new(StatusCode::BAD_REQUEST, "x").into();
        assert!(!should_report(&config, &exposed));
        let exposed_5xx: Error = HttpError::new(StatusCode::BAD_GATEWAY, "upstream").expose(true).into();
        assert!(!should_report(&config, &exposed_5xx));

        assert!(!should_report(&silent, &Error::middleware("quiet")));

        assert!(should_report(&config, &Error::middleware("loud")));
        assert!(should_report(&config, &Error::Timeout(Duration::from_secs(1))));
        let hidden_4xx: Error = HttpError::new(StatusCode::CONFLICT, "x").expose(false).into();
        assert!(should_report(&config, &hidden_4xx));
    }

    #[test]
    fn set_config_updates_template_env() {
        let mut app = Application::default();
        app.set_config(Config::default().env(crate::config::Env::Production));
        assert_eq!(app.template().env(), &crate::config::Env::Production);
    }
}
