//! Route table, groups, and the dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::context::Context;
use crate::error::{Result, RouterError};
use crate::middleware::{compose, Handler, Middleware};
use crate::pattern::Pattern;
use crate::request::{Method, PathParams, Request};
use crate::response::Response;

/// A registered route awaiting `build()`: the pattern is still an
/// uncompiled string and the middleware scope is the owning group's chain.
struct RouteSpec {
    name: Option<String>,
    method: Method,
    path: String,
    handler: Handler,
    scope: Vec<Arc<dyn Middleware>>,
}

impl RouteSpec {
    fn new<F, Fut>(method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        Self {
            name: None,
            method,
            path: path.to_string(),
            handler: Arc::new(move |ctx| Box::pin(handler(ctx))),
            scope: Vec::new(),
        }
    }
}

/// A compiled route in the frozen table.
struct Route {
    pattern: Pattern,
    /// The terminal handler with its full middleware chain pre-composed.
    handler: Handler,
}

/// A prefix- and middleware-scoped sub-registrar.
///
/// Routes registered on a group get the group's accumulated prefix and
/// inherit its middleware; nested groups inherit from their parents,
/// outermost first.
pub struct Group {
    prefix: String,
    middleware: Vec<Arc<dyn Middleware>>,
    specs: Vec<RouteSpec>,
    children: Vec<Group>,
}

impl Group {
    /// Creates a group with the given path prefix.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            middleware: Vec::new(),
            specs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Adds middleware to this group's scope.
    #[must_use]
    pub fn middleware(mut self, layer: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(layer));
        self
    }

    /// Adds a route under this group with any method.
    #[must_use]
    pub fn route<F, Fut>(mut self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.specs.push(RouteSpec::new(method, path, handler));
        self
    }

    /// Adds a GET route.
    #[must_use]
    pub fn get<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Get, path, handler)
    }

    /// Adds a POST route.
    #[must_use]
    pub fn post<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Post, path, handler)
    }

    /// Adds a PUT route.
    #[must_use]
    pub fn put<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Put, path, handler)
    }

    /// Adds a DELETE route.
    #[must_use]
    pub fn delete<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Delete, path, handler)
    }

    /// Adds a PATCH route.
    #[must_use]
    pub fn patch<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Patch, path, handler)
    }

    /// Adds a HEAD route.
    #[must_use]
    pub fn head<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Head, path, handler)
    }

    /// Adds an OPTIONS route.
    #[must_use]
    pub fn options<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Options, path, handler)
    }

    /// Nests a child group under this one.
    #[must_use]
    pub fn group(mut self, child: Group) -> Self {
        self.children.push(child);
        self
    }

    /// Flattens this group into route specs with full paths and the
    /// inherited middleware chain, outermost first.
    fn flatten(self, parent_prefix: &str, inherited: &[Arc<dyn Middleware>], out: &mut Vec<RouteSpec>) {
        let prefix = format!("{parent_prefix}{}", self.prefix);
        let mut chain = inherited.to_vec();
        chain.extend(self.middleware);

        for mut spec in self.specs {
            spec.path = format!("{prefix}{}", spec.path);
            spec.scope = chain.clone();
            out.push(spec);
        }
        for child in self.children {
            child.flatten(&prefix, &chain, out);
        }
    }
}

/// Builder for a [`Router`]: the mutable registration phase.
///
/// Registration and serving are separate phases by construction: all
/// routes and middleware are added here, then [`build`](Self::build)
/// compiles every pattern, pre-composes every route's middleware chain,
/// and freezes the result into an immutable [`Router`]. There is no way
/// to register a route on a live router.
pub struct RouterBuilder {
    specs: Vec<RouteSpec>,
    middleware: Vec<Arc<dyn Middleware>>,
    timeout: Option<Duration>,
}

impl RouterBuilder {
    fn new() -> Self {
        Self {
            specs: Vec::new(),
            middleware: Vec::new(),
            timeout: None,
        }
    }

    /// Adds global middleware, applied to every registered route
    /// (outermost, in registration order). It does not run for the
    /// 404/405 fallbacks; those bypass the chain entirely.
    #[must_use]
    pub fn middleware(mut self, layer: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(layer));
        self
    }

    /// Sets a cooperative per-request deadline, `timeout` from dispatch.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a route with any method.
    #[must_use]
    pub fn route<F, Fut>(mut self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.specs.push(RouteSpec::new(method, path, handler));
        self
    }

    /// Adds a GET route.
    #[must_use]
    pub fn get<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Get, path, handler)
    }

    /// Adds a POST route.
    #[must_use]
    pub fn post<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Post, path, handler)
    }

    /// Adds a PUT route.
    #[must_use]
    pub fn put<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Put, path, handler)
    }

    /// Adds a PATCH route.
    #[must_use]
    pub fn patch<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Patch, path, handler)
    }

    /// Adds a DELETE route.
    #[must_use]
    pub fn delete<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Delete, path, handler)
    }

    /// Adds a HEAD route.
    #[must_use]
    pub fn head<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Head, path, handler)
    }

    /// Adds an OPTIONS route.
    #[must_use]
    pub fn options<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.route(Method::Options, path, handler)
    }

    /// Adds a named route, usable with [`Router::url_for`].
    #[must_use]
    pub fn named_route<F, Fut>(mut self, name: &str, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let mut spec = RouteSpec::new(method, path, handler);
        spec.name = Some(name.to_string());
        self.specs.push(spec);
        self
    }

    /// Mounts a route group.
    #[must_use]
    pub fn group(mut self, group: Group) -> Self {
        group.flatten("", &[], &mut self.specs);
        self
    }

    /// Compiles all patterns and freezes the table.
    ///
    /// Every route's effective middleware chain (global, then its group
    /// chain root-to-leaf) is composed around its handler here, once.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::MalformedPattern`] for the first pattern
    /// that fails to compile; startup should abort on it.
    pub fn build(self) -> Result<Router> {
        let Self {
            specs,
            middleware,
            timeout,
        } = self;

        let mut table: HashMap<Method, Vec<Route>> = HashMap::new();
        let mut named: HashMap<String, Pattern> = HashMap::new();

        for spec in specs {
            let pattern = Pattern::parse(&spec.path)?;

            let mut chain = middleware.clone();
            chain.extend(spec.scope);
            let handler = compose(&chain, spec.handler);

            if let Some(name) = spec.name {
                named.insert(name, pattern.clone());
            }
            table.entry(spec.method).or_default().push(Route { pattern, handler });
        }

        Ok(Router {
            table,
            named,
            timeout,
        })
    }
}

/// The frozen routing table and per-request dispatcher.
///
/// Built once via [`Router::builder`]; afterwards only read. Dispatch is
/// `&self` and safe to invoke from any number of concurrent request tasks.
pub struct Router {
    /// Per-method route lists, in registration order. First match wins;
    /// registration order is the documented tie-break for overlapping
    /// patterns, so narrower routes must be registered first.
    table: HashMap<Method, Vec<Route>>,
    named: HashMap<String, Pattern>,
    timeout: Option<Duration>,
}

impl Router {
    /// Starts the registration phase.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Generates a URL for a named route.
    pub fn url_for(&self, name: &str, params: &HashMap<String, String>) -> Option<String> {
        self.named.get(name).and_then(|p| p.reverse(params))
    }

    /// Resolves a method and path to a route and its captured parameters.
    fn find(&self, method: Method, path: &str) -> Result<(&Route, PathParams)> {
        if let Some(routes) = self.table.get(&method) {
            for route in routes {
                if let Some(params) = route.pattern.match_path(path) {
                    return Ok((route, params));
                }
            }
        }

        let other_method_matches = self
            .table
            .iter()
            .filter(|(m, _)| **m != method)
            .flat_map(|(_, routes)| routes)
            .any(|route| route.pattern.match_path(path).is_some());

        if other_method_matches {
            Err(RouterError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            })
        } else {
            Err(RouterError::NotFound {
                method: method.to_string(),
                path: path.to_string(),
            })
        }
    }

    /// Dispatches one request and guarantees exactly one response.
    ///
    /// Unmatched requests get the 404/405 fallback without any middleware
    /// running. On a match, a fresh [`Context`] is built and the route's
    /// pre-composed chain runs; an error escaping the chain is logged and
    /// becomes a generic 500.
    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method;
        let path = request.path.clone();

        match self.find(method, &path) {
            Ok((route, params)) => {
                debug!(%method, %path, pattern = route.pattern.source(), "matched");
                let mut ctx = Context::new(request, params);
                if let Some(timeout) = self.timeout {
                    ctx.set_timeout(timeout);
                }
                match (route.handler)(ctx).await {
                    Ok(response) => response,
                    Err(err) => {
                        error!(%method, %path, error = %err, "handler failed");
                        Response::internal_server_error()
                    }
                }
            }
            Err(RouterError::MethodNotAllowed { .. }) => {
                debug!(%method, %path, "method not allowed");
                Response::method_not_allowed()
            }
            Err(_) => {
                debug!(%method, %path, "no route");
                Response::not_found()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    async fn hello(ctx: Context) -> Result<Response> {
        Ok(ctx.text("Hello, World!"))
    }

    async fn user(ctx: Context) -> Result<Response> {
        let id = ctx.param("id").to_string();
        Ok(ctx.text(format!("User: {id}")))
    }

    #[tokio::test]
    async fn test_basic_routing() {
        let router = Router::builder()
            .get("/", hello)
            .get("/users/:id", user)
            .build()
            .unwrap();

        let res = router.dispatch(Request::get("/")).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body_string(), Some("Hello, World!".to_string()));
    }

    #[tokio::test]
    async fn test_path_params() {
        let router = Router::builder().get("/users/:id", user).build().unwrap();

        let res = router.dispatch(Request::get("/users/42")).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body_string(), Some("User: 42".to_string()));
    }

    #[tokio::test]
    async fn test_not_found() {
        let router = Router::builder().get("/", hello).build().unwrap();

        let res = router.dispatch(Request::get("/nonexistent")).await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let router = Router::builder().post("/data", hello).build().unwrap();

        let res = router.dispatch(Request::get("/data")).await;
        assert_eq!(res.status, 405);
    }

    #[tokio::test]
    async fn test_constrained_route_falls_through_to_404() {
        let router = Router::builder()
            .get("/users/{id:[0-9]+}", user)
            .build()
            .unwrap();

        let res = router.dispatch(Request::get("/users/abc")).await;
        assert_eq!(res.status, 404);

        let res = router.dispatch(Request::get("/users/42")).await;
        assert_eq!(res.status, 200);
    }

    #[tokio::test]
    async fn test_constraint_miss_continues_to_next_candidate() {
        let router = Router::builder()
            .get("/users/{id:[0-9]+}", |ctx: Context| async move {
                let id = ctx.param("id").to_string();
                Ok(ctx.text(format!("numeric: {id}")))
            })
            .get("/users/:id", |ctx: Context| async move {
                let id = ctx.param("id").to_string();
                Ok(ctx.text(format!("any: {id}")))
            })
            .build()
            .unwrap();

        // constraint miss is not an error; matching moves on in order
        let res = router.dispatch(Request::get("/users/abc")).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body_string(), Some("any: abc".to_string()));

        let res = router.dispatch(Request::get("/users/42")).await;
        assert_eq!(res.body_string(), Some("numeric: 42".to_string()));
    }

    #[tokio::test]
    async fn test_wildcard_route_captures_suffix() {
        let router = Router::builder()
            .get("/files*", |ctx: Context| async move {
                let tail = ctx.wildcard().to_string();
                Ok(ctx.text(tail))
            })
            .build()
            .unwrap();

        let res = router.dispatch(Request::get("/files/a/b/c.txt")).await;
        assert_eq!(res.body_string(), Some("a/b/c.txt".to_string()));
    }

    #[tokio::test]
    async fn test_first_registered_route_wins() {
        let router = Router::builder()
            .get("/users/me", |ctx: Context| async move { Ok(ctx.text("me")) })
            .get("/users/:id", user)
            .build()
            .unwrap();

        let res = router.dispatch(Request::get("/users/me")).await;
        assert_eq!(res.body_string(), Some("me".to_string()));
        let res = router.dispatch(Request::get("/users/7")).await;
        assert_eq!(res.body_string(), Some("User: 7".to_string()));
    }

    #[tokio::test]
    async fn test_build_rejects_malformed_pattern() {
        let err = Router::builder()
            .get("/users/{id:[0-9}", user)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, RouterError::MalformedPattern { .. }));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_500() {
        let router = Router::builder()
            .get("/boom", |_ctx: Context| async move {
                Err(RouterError::handler("kaput"))
            })
            .build()
            .unwrap();

        let res = router.dispatch(Request::get("/boom")).await;
        assert_eq!(res.status, 500);
    }

    fn labeling(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> impl Middleware {
        move |next: Handler| -> Handler {
            let log = log.clone();
            Arc::new(move |ctx: Context| {
                let next = next.clone();
                let log = log.clone();
                Box::pin(async move {
                    log.lock().unwrap().push(format!("{label}_in"));
                    let result = next(ctx).await;
                    log.lock().unwrap().push(format!("{label}_out"));
                    result
                })
            })
        }
    }

    #[tokio::test]
    async fn test_global_middleware_wraps_routes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_log = log.clone();
        let router = Router::builder()
            .middleware(labeling("a", log.clone()))
            .middleware(labeling("b", log.clone()))
            .get("/", move |ctx: Context| {
                let log = inner_log.clone();
                async move {
                    log.lock().unwrap().push("handler".to_string());
                    Ok(ctx.text("ok"))
                }
            })
            .build()
            .unwrap();

        router.dispatch(Request::get("/")).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a_in", "b_in", "handler", "b_out", "a_out"]
        );
    }

    #[tokio::test]
    async fn test_group_inherits_root_middleware_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let api = Group::new("/api")
            .middleware(labeling("y", log.clone()))
            .get("/users/:id", user);

        let router = Router::builder()
            .middleware(labeling("x", log.clone()))
            .group(api)
            .build()
            .unwrap();

        let res = router.dispatch(Request::get("/api/users/3")).await;
        assert_eq!(res.body_string(), Some("User: 3".to_string()));
        assert_eq!(*log.lock().unwrap(), vec!["x_in", "y_in", "y_out", "x_out"]);
    }

    #[tokio::test]
    async fn test_group_verb_helpers_cover_all_methods() {
        let ok = |ctx: Context| async move { Ok(ctx.empty()) };
        let api = Group::new("/api")
            .get("/r", ok)
            .post("/r", ok)
            .put("/r", ok)
            .patch("/r", ok)
            .delete("/r", ok)
            .head("/r", ok)
            .options("/r", ok);
        let router = Router::builder().group(api).build().unwrap();

        for method in [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Patch,
            Method::Delete,
            Method::Head,
            Method::Options,
        ] {
            let res = router.dispatch(Request::new(method, "/api/r")).await;
            assert_eq!(res.status, 200, "{method}");
        }
    }

    #[tokio::test]
    async fn test_nested_group_prefix_and_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let v1 = Group::new("/v1")
            .middleware(labeling("inner", log.clone()))
            .get("/ping", |ctx: Context| async move { Ok(ctx.text("pong")) });
        let api = Group::new("/api")
            .middleware(labeling("outer", log.clone()))
            .group(v1);

        let router = Router::builder().group(api).build().unwrap();

        let res = router.dispatch(Request::get("/api/v1/ping")).await;
        assert_eq!(res.body_string(), Some("pong".to_string()));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer_in", "inner_in", "inner_out", "outer_out"]
        );
    }

    #[tokio::test]
    async fn test_middleware_does_not_run_for_unmatched_routes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let counting = move |next: Handler| -> Handler {
            let counter = counter.clone();
            Arc::new(move |ctx: Context| {
                counter.fetch_add(1, Ordering::SeqCst);
                next(ctx)
            })
        };
        let router = Router::builder()
            .middleware(counting)
            .get("/", hello)
            .build()
            .unwrap();

        router.dispatch(Request::get("/missing")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        router.dispatch(Request::get("/")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_named_route_url_for() {
        let router = Router::builder()
            .named_route("user_detail", Method::Get, "/users/:id", user)
            .build()
            .unwrap();

        let params: HashMap<String, String> =
            [("id".to_string(), "42".to_string())].into_iter().collect();
        assert_eq!(
            router.url_for("user_detail", &params),
            Some("/users/42".to_string())
        );
        assert_eq!(router.url_for("missing", &params), None);
    }

    #[tokio::test]
    async fn test_builder_timeout_sets_context_deadline() {
        let router = Router::builder()
            .timeout(Duration::from_secs(30))
            .get("/", |ctx: Context| async move {
                assert!(ctx.deadline().is_some());
                assert!(!ctx.is_cancelled());
                Ok(ctx.empty())
            })
            .build()
            .unwrap();

        let res = router.dispatch(Request::get("/")).await;
        assert_eq!(res.status, 200);
    }
}
