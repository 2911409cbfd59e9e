//! Per-request context.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, RouterError};
use crate::pattern::WILDCARD_KEY;
use crate::request::{Method, PathParams, Request};
use crate::response::Response;

/// The per-request facade handed to middleware and handlers.
///
/// One `Context` is created per dispatched request and owned by that
/// request's task; it is never shared across requests. It exposes the
/// matched path parameters, query and header views, the (lazily cached)
/// body, response staging, and a key-value store for cross-middleware
/// propagation.
///
/// Terminal send operations ([`json`](Self::json), [`text`](Self::text),
/// [`send`](Self::send)) consume the context, so a second send on the same
/// request is a compile error rather than a wire-format hazard.
///
/// # Example
///
/// ```ignore
/// async fn show_user(mut ctx: Context) -> Result<Response> {
///     let id = ctx.param("id").to_string();
///     let body: UserPatch = ctx.bind()?;
///     ctx.set("X-Trace", "abc");
///     ctx.json(&serde_json::json!({ "id": id, "name": body.name }))
/// }
/// ```
pub struct Context {
    request: Request,
    params: PathParams,
    body: Option<Vec<u8>>,
    values: HashMap<String, Value>,
    deadline: Option<Instant>,
    status: u16,
    headers: HashMap<String, String>,
}

impl Context {
    /// Creates a context for one request with its match-time parameters.
    pub fn new(request: Request, params: PathParams) -> Self {
        Self {
            request,
            params,
            body: None,
            values: HashMap::new(),
            deadline: None,
            status: 200,
            headers: HashMap::new(),
        }
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.request.method
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// The raw request handle.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns a captured path parameter, or `""` when absent.
    ///
    /// Absence is a valid state, not an error; use [`params`](Self::params)
    /// to distinguish an empty capture from a missing one.
    pub fn param(&self, name: &str) -> &str {
        self.params.get(name).unwrap_or("")
    }

    /// Returns the trailing wildcard capture, or `""` when absent.
    pub fn wildcard(&self) -> &str {
        self.param(WILDCARD_KEY)
    }

    /// All captured path parameters.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Returns a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.get_query(name)
    }

    /// Returns a request header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.get_header(name)
    }

    /// Returns the request body, reading it exactly once.
    ///
    /// The first call takes the bytes out of the request handle and caches
    /// them; repeated calls and structured decoding reuse the cache.
    pub fn body(&mut self) -> &[u8] {
        if self.body.is_none() {
            self.body = Some(std::mem::take(&mut self.request.body));
        }
        self.body.as_deref().unwrap_or_default()
    }

    /// Decodes the body according to the request's `Content-Type`.
    ///
    /// `application/json` (and `+json` suffixes) decode through serde_json;
    /// `application/xml` and `text/xml` (and `+xml`) through quick-xml.
    ///
    /// # Errors
    ///
    /// [`RouterError::UnsupportedMediaType`] for unrecognized types, and the
    /// typed decode error on malformed payloads. Neither is auto-converted
    /// to an HTTP status; the handler chooses how to respond.
    pub fn bind<T: DeserializeOwned>(&mut self) -> Result<T> {
        let media = self
            .header("Content-Type")
            .unwrap_or("")
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        if media == "application/json" || media.ends_with("+json") {
            Ok(serde_json::from_slice(self.body())?)
        } else if media == "application/xml" || media == "text/xml" || media.ends_with("+xml") {
            let text = std::str::from_utf8(self.body())?;
            Ok(quick_xml::de::from_str(text)?)
        } else {
            Err(RouterError::UnsupportedMediaType(media))
        }
    }

    /// Parses the body as `application/x-www-form-urlencoded` fields.
    pub fn form(&mut self) -> Result<HashMap<String, String>> {
        let text = std::str::from_utf8(self.body())?;
        Ok(Request::parse_query_string(text))
    }

    /// Stores a value for downstream middleware and the handler.
    ///
    /// Used by instrumentation middleware (trace IDs, user IDs) to pass data
    /// along the chain without changing handler signatures.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Reads a value stored by an outer layer.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Sets the cooperative deadline for this request.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Sets the deadline to `timeout` from now.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    /// The deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has passed.
    ///
    /// Cancellation is cooperative: handlers and middleware should check
    /// this at their own suspension points and return promptly once it
    /// reports `true`; nothing forcibly interrupts a blocked handler.
    pub fn is_cancelled(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Stages a response header.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Stages the response status code (defaults to 200).
    pub fn status(&mut self, status: u16) {
        self.status = status;
    }

    /// Sends a JSON response, consuming the context.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if `value` cannot be encoded.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Response> {
        let body = serde_json::to_vec(value)?;
        Ok(self.finish(Some("application/json"), body))
    }

    /// Sends a plain-text response, consuming the context.
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(Some("text/plain; charset=utf-8"), body.into().into_bytes())
    }

    /// Sends raw bytes, consuming the context.
    pub fn send(self, body: impl Into<Vec<u8>>) -> Response {
        self.finish(None, body.into())
    }

    /// Sends an empty-bodied response with the staged status and headers.
    pub fn empty(self) -> Response {
        self.finish(None, Vec::new())
    }

    fn finish(self, content_type: Option<&str>, body: Vec<u8>) -> Response {
        let mut headers = self.headers;
        if let Some(content_type) = content_type {
            headers
                .entry("Content-Type".to_string())
                .or_insert_with(|| content_type.to_string());
        }
        Response {
            status: self.status,
            headers,
            body,
        }
    }
}
