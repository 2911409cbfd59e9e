//! # trellis-router
//!
//! The request-dispatch core of an HTTP server toolkit: route matching,
//! onion-style middleware chains, and a per-request context.
//!
//! This crate provides:
//! - Path pattern matching with named, regex-constrained, and wildcard
//!   parameters, compiled once at registration
//! - HTTP method-based routing with 404/405 discrimination
//! - Middleware as handler-wrapping layers, with group scoping and
//!   inheritance
//! - A per-request [`Context`] mediating parameters, body decoding, and
//!   response construction
//!
//! ## Quick Start
//!
//! ```ignore
//! use trellis_router::{Context, Request, Response, Result, Router};
//!
//! async fn hello(ctx: Context) -> Result<Response> {
//!     Ok(ctx.text("Hello, World!"))
//! }
//!
//! async fn show_user(ctx: Context) -> Result<Response> {
//!     let id = ctx.param("id").to_string();
//!     ctx.json(&serde_json::json!({ "id": id }))
//! }
//!
//! let router = Router::builder()
//!     .get("/", hello)
//!     .get("/users/:id", show_user)
//!     .build()?;
//!
//! // One call per inbound request, from any number of concurrent tasks.
//! let response = router.dispatch(Request::get("/users/123")).await;
//! ```
//!
//! Registration and serving are distinct phases: `build()` compiles every
//! pattern and freezes the table, so a served router is immutable and a
//! malformed pattern aborts startup instead of surfacing per-request.
//!
//! ## Path Patterns
//!
//! ```ignore
//! router.get("/posts/:post_id/comments/:comment_id", handler) // named
//! router.get("/users/{id:[0-9]+}", handler)                   // constrained
//! router.get("/files*", handler)                              // wildcard
//! ```
//!
//! Named captures arrive percent-decoded in `ctx.param(name)`; the trailing
//! wildcard capture, slashes included, is `ctx.wildcard()`. Overlapping
//! patterns are resolved by registration order — first match wins — so
//! register specific routes before broad ones.
//!
//! ## Middleware
//!
//! A middleware wraps the next handler and may short-circuit by not
//! invoking it:
//!
//! ```ignore
//! use std::sync::Arc;
//! use trellis_router::{Handler, Router, Trace};
//!
//! let require_auth = |next: Handler| -> Handler {
//!     Arc::new(move |mut ctx| {
//!         let next = next.clone();
//!         Box::pin(async move {
//!             if ctx.header("Authorization").is_none() {
//!                 ctx.status(401);
//!                 return Ok(ctx.text("unauthorized"));
//!             }
//!             next(ctx).await
//!         })
//!     })
//! };
//!
//! let router = Router::builder()
//!     .middleware(Trace)
//!     .middleware(require_auth)
//!     .get("/", hello)
//!     .build()?;
//! ```
//!
//! ## Route Groups
//!
//! ```ignore
//! use trellis_router::{Group, Router};
//!
//! let api = Group::new("/api/v1")
//!     .middleware(rate_limit)
//!     .get("/users", list_users)
//!     .get("/users/:id", show_user);
//!
//! let router = Router::builder()
//!     .middleware(Trace) // root middleware runs outermost
//!     .group(api)
//!     .build()?;
//! ```
//!
//! ## Named Routes
//!
//! ```ignore
//! let router = Router::builder()
//!     .named_route("user_detail", Method::Get, "/users/:id", show_user)
//!     .build()?;
//!
//! let url = router.url_for("user_detail", &[("id".into(), "123".into())].into());
//! assert_eq!(url, Some("/users/123".to_string()));
//! ```

mod context;
mod error;
mod middleware;
mod pattern;
mod request;
mod response;
mod router;

pub use context::Context;
pub use error::{Result, RouterError};
pub use middleware::{BoxFuture, Handler, Middleware, Trace};
pub use pattern::{Pattern, Segment, WILDCARD_KEY};
pub use request::{Method, PathParams, Request};
pub use response::Response;
pub use router::{Group, Router, RouterBuilder};
