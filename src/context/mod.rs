//! Per-request context — request, response state and request-scoped values.
//!
//! Every inbound request gets a fresh [`Context`] built from the
//! application's immutable [`Template`]. Middleware reads the request and
//! mutates the [`ResponseState`] through it; once the chain completes, the
//! state is handed to [`respond`](crate::respond::respond) exactly once.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use crate::body::Body;
use crate::config::Env;
use crate::error::{Error, HttpError};
use crate::http::{Headers, Method, Request, StatusCode};

/// Type-erased map keyed by type — one value per type.
///
/// Holds per-request state ([`Context::state`]).
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous one of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

/// Application-wide values, one per type, readable from every request.
#[derive(Clone, Default)]
struct SharedValues {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl SharedValues {
    fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }
}

/// Immutable starting point for every request's [`Context`].
///
/// Built while configuring the application and shared behind an [`Arc`];
/// nothing in it changes after the server starts.
#[derive(Clone)]
pub struct Template {
    env: Env,
    default_status: StatusCode,
    default_headers: Headers,
    shared: SharedValues,
}

impl Template {
    pub fn new(env: Env) -> Self {
        Self {
            env,
            default_status: StatusCode::NOT_FOUND,
            default_headers: Headers::new(),
            shared: SharedValues::default(),
        }
    }

    /// Adds a header every response starts with.
    pub fn default_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.default_headers.append(name, value);
    }

    /// Registers an application-wide value readable from every request
    /// through [`Context::shared`].
    pub fn manage<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.shared.insert(value);
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub(crate) fn set_env(&mut self, env: Env) {
        self.env = env;
    }

    pub fn default_status(&self) -> StatusCode {
        self.default_status
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::new(Env::default())
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("env", &self.env)
            .field("default_status", &self.default_status)
            .field("default_headers", &self.default_headers)
            .field("shared", &self.shared.map.len())
            .finish()
    }
}

/// The mutable response half of a [`Context`].
#[derive(Debug)]
pub struct ResponseState {
    status: StatusCode,
    explicit_status: bool,
    message: Option<String>,
    headers: Headers,
    body: Body,
}

impl ResponseState {
    fn from_template(template: &Template) -> Self {
        Self {
            status: template.default_status,
            explicit_status: false,
            message: None,
            headers: template.default_headers.clone(),
            body: Body::Empty,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.explicit_status = true;
    }

    /// `true` once middleware has chosen a status itself.
    pub fn has_explicit_status(&self) -> bool {
        self.explicit_status
    }

    /// Text sent when no body was assigned.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Assigns the body. A non-empty body with no explicit status yet turns
    /// the default 404 into 200.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        let body = body.into();
        if !body.is_empty() && !self.explicit_status {
            self.set_status(StatusCode::OK);
        }
        self.body = body;
    }

    /// Moves the body out, leaving [`Body::Empty`].
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Recorded `Content-Length`, if any.
    pub fn length(&self) -> Option<u64> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    pub fn set_length(&mut self, length: u64) {
        self.headers.set("Content-Length", length.to_string());
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Sets `Content-Type`, expanding the shorthands `text`, `html`, `json`
    /// and `bin`; anything else is used verbatim.
    pub fn set_type(&mut self, kind: &str) {
        let mime = match kind {
            "text" => "text/plain; charset=utf-8",
            "html" => "text/html; charset=utf-8",
            "json" => "application/json; charset=utf-8",
            "bin" => "application/octet-stream",
            other => other,
        };
        self.headers.set("Content-Type", mime);
    }

    /// Clears the body and every header describing it.
    pub fn strip_body(&mut self) {
        self.body = Body::Empty;
        self.headers.remove("content-type");
        self.headers.remove("content-length");
        self.headers.remove("transfer-encoding");
    }
}

/// Per-request context handed to every middleware.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use rkoa::context::{Context, Template};
/// use rkoa::http::{Method, Request, StatusCode};
///
/// let mut ctx = Context::new(Request::new(Method::Get, "/"), Arc::new(Template::default()));
/// assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
///
/// ctx.set_body("hello");
/// assert_eq!(ctx.status(), StatusCode::OK);
/// ```
pub struct Context {
    request: Request,
    response: ResponseState,
    state: Extensions,
    template: Arc<Template>,
    respond: bool,
}

impl Context {
    /// Builds a fresh context for `request` from `template`.
    pub fn new(request: Request, template: Arc<Template>) -> Self {
        let response = ResponseState::from_template(&template);
        Self {
            request,
            response,
            state: Extensions::new(),
            template,
            respond: true,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &ResponseState {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseState {
        &mut self.response
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn env(&self) -> &Env {
        &self.template.env
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    pub fn message(&self) -> Option<&str> {
        self.response.message()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.response.set_message(message);
    }

    pub fn body(&self) -> &Body {
        self.response.body()
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.response.set_body(body);
    }

    /// Assigns a structured body, encoded as JSON when the response is written.
    pub fn set_json<T>(&mut self, value: T)
    where
        T: serde::Serialize + Send + Sync + 'static,
    {
        self.response.set_body(Body::json(value));
    }

    pub fn set_type(&mut self, kind: &str) {
        self.response.set_type(kind);
    }

    pub fn length(&self) -> Option<u64> {
        self.response.length()
    }

    pub fn set_length(&mut self, length: u64) {
        self.response.set_length(length);
    }

    /// Sets a response header, replacing earlier values.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.response.headers_mut().set(name, value);
    }

    /// Returns a request header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers().get(name)
    }

    /// Request-scoped values shared between middleware.
    pub fn state(&self) -> &Extensions {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut Extensions {
        &mut self.state
    }

    /// Reads an application-wide value registered with [`Template::manage`].
    pub fn shared<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.template.shared.get::<T>()
    }

    /// Skips response serialization for this request; nothing is written.
    pub fn bypass(&mut self) {
        self.respond = false;
    }

    pub fn is_bypassed(&self) -> bool {
        !self.respond
    }

    /// Builds an error carrying `status`, for `return Err(ctx.throw(..))`.
    pub fn throw(&self, status: StatusCode, message: impl Into<String>) -> Error {
        HttpError::new(status, message).into()
    }

    /// Fails with `status` unless `condition` holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when `condition` is false.
    pub fn assert(
        &self,
        condition: bool,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Result<(), Error> {
        if condition {
            Ok(())
        } else {
            Err(self.throw(status, message))
        }
    }

    /// Decodes the request body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a `400 Bad Request` [`HttpError`] when the body is not valid JSON for `T`.
    pub fn request_json<T>(&self) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
            .map_err(|e| self.throw(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", self.method())
            .field("path", &self.path())
            .field("status", &self.status())
            .field("body", self.body())
            .field("respond", &self.respond)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(Request::new(Method::Get, "/"), Arc::new(Template::default()))
    }

    #[test]
    fn defaults_from_template() {
        let mut template = Template::new(Env::Production);
        template.default_header("Server", "rkoa");
        template.manage(42u32);
        let ctx = Context::new(Request::new(Method::Get, "/"), Arc::new(template));

        assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
        assert!(!ctx.response().has_explicit_status());
        assert_eq!(ctx.response().headers().get("server"), Some("rkoa"));
        assert_eq!(ctx.shared::<u32>(), Some(&42));
        assert_eq!(ctx.env(), &Env::Production);
        assert!(ctx.body().is_empty());
    }

    #[test]
    fn body_assignment_promotes_default_status() {
        let mut c = ctx();
        c.set_json(serde_json::json!({ "a": 1 }));
        assert_eq!(c.status(), StatusCode::OK);

        let mut c = ctx();
        c.set_status(StatusCode::CREATED);
        c.set_body("made");
        assert_eq!(c.status(), StatusCode::CREATED);
    }

    #[test]
    fn type_shorthands() {
        let mut c = ctx();
        c.set_type("json");
        assert_eq!(c.response().content_type(), Some("application/json; charset=utf-8"));
        c.set_type("image/png");
        assert_eq!(c.response().content_type(), Some("image/png"));
    }

    #[test]
    fn strip_body_removes_entity_headers() {
        let mut c = ctx();
        c.set_body("hello");
        c.set_type("text");
        c.set_length(5);
        c.set_header("X-Keep", "yes");
        c.response_mut().strip_body();
        assert!(c.body().is_empty());
        assert_eq!(c.length(), None);
        assert_eq!(c.response().content_type(), None);
        assert_eq!(c.response().headers().get("x-keep"), Some("yes"));
    }

    #[test]
    fn extensions_roundtrip_by_type() {
        let mut c = ctx();
        assert_eq!(c.state_mut().insert(String::from("a")), None);
        assert_eq!(c.state_mut().insert(String::from("b")), Some(String::from("a")));
        c.state_mut().get_mut::<String>().unwrap().push('!');
        assert_eq!(c.state().get::<String>().map(String::as_str), Some("b!"));
        assert_eq!(c.state_mut().remove::<String>(), Some(String::from("b!")));
        assert!(c.state().is_empty());
    }

    #[test]
    fn throw_and_assert() {
        let c = ctx();
        let err = c.assert(false, StatusCode::UNAUTHORIZED, "login first").unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(err.is_exposed());
        assert!(c.assert(true, StatusCode::UNAUTHORIZED, "unused").is_ok());
    }

    #[test]
    fn request_json_rejects_garbage() {
        let req = Request::new(Method::Post, "/").with_body("{not json");
        let c = Context::new(req, Arc::new(Template::default()));
        let err = c.request_json::<serde_json::Value>().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let req = Request::new(Method::Post, "/").with_body(r#"{"n":3}"#);
        let c = Context::new(req, Arc::new(Template::default()));
        let v: serde_json::Value = c.request_json().unwrap();
        assert_eq!(v["n"], 3);
    }
}
