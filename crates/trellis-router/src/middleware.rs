//! Middleware support: handlers wrapping handlers, onion-style.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::response::Response;

/// A boxed future, as returned by async handlers.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

/// A boxed async handler: consumes a [`Context`], produces a [`Response`]
/// or an error for the dispatcher to absorb.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

/// A layer that transforms a handler into another handler.
///
/// Middleware composes onion-style: for layers `[m1, m2]` around handler
/// `h`, the dispatched handler is `m1(m2(h))`, so `m1` sees the request
/// first and the response last. A layer short-circuits by returning without
/// invoking `next`; inner layers and the terminal handler then never run.
///
/// Middleware is constructed once at registration and invoked concurrently
/// by many request tasks, so any mutable state it closes over must be
/// concurrency-safe (atomics, mutexes, sharded maps).
///
/// Any `Fn(Handler) -> Handler` closure is a middleware:
///
/// ```ignore
/// let trace_header = |next: Handler| -> Handler {
///     Arc::new(move |mut ctx: Context| {
///         let next = next.clone();
///         Box::pin(async move {
///             ctx.set("X-Trace", "abc-123");
///             next(ctx).await
///         })
///     })
/// };
/// ```
pub trait Middleware: Send + Sync {
    /// Wraps `next`, returning the composed handler.
    fn wrap(&self, next: Handler) -> Handler;
}

impl<F> Middleware for F
where
    F: Fn(Handler) -> Handler + Send + Sync,
{
    fn wrap(&self, next: Handler) -> Handler {
        self(next)
    }
}

/// Composes a middleware list around a terminal handler, first layer
/// outermost.
pub(crate) fn compose(middleware: &[Arc<dyn Middleware>], terminal: Handler) -> Handler {
    middleware
        .iter()
        .rev()
        .fold(terminal, |inner, layer| layer.wrap(inner))
}

/// Stock middleware that logs request entry and exit through `tracing`.
pub struct Trace;

impl Middleware for Trace {
    fn wrap(&self, next: Handler) -> Handler {
        Arc::new(move |ctx: Context| {
            let next = next.clone();
            Box::pin(async move {
                let method = ctx.method();
                let path = ctx.path().to_string();
                debug!(%method, %path, "request");
                let started = Instant::now();
                let result = next(ctx).await;
                let elapsed = started.elapsed();
                match &result {
                    Ok(response) => {
                        debug!(%method, %path, status = response.status, ?elapsed, "response");
                    }
                    Err(error) => {
                        debug!(%method, %path, %error, ?elapsed, "failed");
                    }
                }
                result
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{PathParams, Request};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn recording(label_in: &'static str, label_out: &'static str, log: Log) -> impl Middleware {
        move |next: Handler| -> Handler {
            let log = log.clone();
            Arc::new(move |ctx: Context| {
                let next = next.clone();
                let log = log.clone();
                Box::pin(async move {
                    log.lock().unwrap().push(label_in);
                    let result = next(ctx).await;
                    log.lock().unwrap().push(label_out);
                    result
                })
            })
        }
    }

    fn terminal(log: Log) -> Handler {
        Arc::new(move |ctx: Context| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push("handler");
                Ok(ctx.text("done"))
            })
        })
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log: Log = Arc::default();
        let layers: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(recording("a_in", "a_out", log.clone())),
            Arc::new(recording("b_in", "b_out", log.clone())),
        ];
        let composed = compose(&layers, terminal(log.clone()));

        let ctx = Context::new(Request::get("/"), PathParams::new());
        let response = composed(ctx).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a_in", "b_in", "handler", "b_out", "a_out"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_layers() {
        let log: Log = Arc::default();
        let reject = |next: Handler| -> Handler {
            let _ = next;
            Arc::new(|ctx: Context| {
                Box::pin(async move {
                    let mut ctx = ctx;
                    ctx.status(401);
                    Ok(ctx.text("denied"))
                })
            })
        };
        let layers: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(reject),
            Arc::new(recording("never_in", "never_out", log.clone())),
        ];
        let composed = compose(&layers, terminal(log.clone()));

        let ctx = Context::new(Request::get("/secret"), PathParams::new());
        let response = composed(ctx).await.unwrap();
        assert_eq!(response.status, 401);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_value_propagation_reaches_inner_handler() {
        let seed = |next: Handler| -> Handler {
            Arc::new(move |mut ctx: Context| {
                let next = next.clone();
                Box::pin(async move {
                    ctx.set_value("user_id", 7);
                    next(ctx).await
                })
            })
        };
        let read_back: Handler = Arc::new(|ctx: Context| {
            Box::pin(async move {
                let id = ctx.value("user_id").and_then(serde_json::Value::as_i64);
                assert_eq!(id, Some(7));
                Ok(ctx.empty())
            })
        });
        let layers: Vec<Arc<dyn Middleware>> = vec![Arc::new(seed)];
        let composed = compose(&layers, read_back);

        let ctx = Context::new(Request::get("/"), PathParams::new());
        composed(ctx).await.unwrap();
    }
}
