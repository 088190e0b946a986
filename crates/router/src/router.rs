//! The dispatch engine.
//!
//! A [`Router`] owns a mount prefix and an ordered route list. Routes are tried in
//! registration order and the first one that matches is dispatched, there is no
//! backtracking once a route has been chosen. Mounted routers are routes themselves, which
//! makes the router a tree:
//!
//! ```text
//! /                      Router (guard, filters)
//! ├── GET /hello         EndpointRoute
//! ├── /api               Router
//! │   ├── GET /users/:id EndpointRoute
//! │   └── /admin         Router (guard)
//! └── /static            ServeRoute
//! ```
//!
//! Every failure raised by a guard, a filter or a route is caught by the router owning the
//! dispatch and rendered through its error handler options.

use crate::body::{BoxError, ResponseBody};
use crate::error::RouteError;
use crate::error_page::{render_error, ErrorHandlerOptions};
use crate::filter::{Filter, Next};
use crate::guard::Guard;
use crate::handler::RequestHandler;
use crate::path::{PathMatcher, PatternError, PrefixMatcher};
use crate::request::RequestContext;
use crate::resource::MountTarget;
use crate::responder::HandlerResult;
use crate::route::{EndpointRoute, Route, ServeRoute};
use crate::send::SendOptions;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body::Body as HttpBody;
use once_cell::sync::OnceCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

type FilterChain = Arc<[Arc<dyn Filter>]>;

pub struct Router {
    prefix: String,
    prefix_matcher: PrefixMatcher,
    routes: Vec<Box<dyn Route>>,
    guard: Option<Box<dyn Guard>>,
    filters: Vec<Arc<dyn Filter>>,
    filter_chain: OnceCell<FilterChain>,
    web_root: PathBuf,
    error_options: Option<ErrorHandlerOptions>,
}

macro_rules! method_route {
    ($name:ident, $method:ident) => {
        #[doc = concat!("Registers `handler` for ", stringify!($method), " requests matching `pattern`.")]
        ///
        /// # Panics
        ///
        /// Panics if `pattern` is not a valid path pattern.
        pub fn $name<H: RequestHandler + 'static>(&mut self, pattern: &str, handler: H) -> &mut Self {
            self.route(Method::$method, pattern, handler)
        }
    };
}

impl Router {
    /// Creates a root router, mounted at `/`.
    pub fn new() -> Self {
        Self::from_matcher("/".to_string(), PrefixMatcher::Root)
    }

    /// Creates a router claiming the paths below `prefix`.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` is not a valid path pattern, see [`Router::try_with_prefix`].
    pub fn with_prefix(prefix: &str) -> Self {
        match Self::try_with_prefix(prefix) {
            Ok(router) => router,
            Err(e) => panic!("invalid router prefix '{prefix}': {e}"),
        }
    }

    pub fn try_with_prefix(prefix: &str) -> Result<Self, PatternError> {
        let matcher = PrefixMatcher::compile(prefix)?;
        Ok(Self::from_matcher(prefix.to_string(), matcher))
    }

    fn from_matcher(prefix: String, prefix_matcher: PrefixMatcher) -> Self {
        Self {
            prefix,
            prefix_matcher,
            routes: Vec::new(),
            guard: None,
            filters: Vec::new(),
            filter_chain: OnceCell::new(),
            web_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            error_options: None,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn web_root(&self) -> &Path {
        &self.web_root
    }

    pub fn error_options(&self) -> Option<&ErrorHandlerOptions> {
        self.error_options.as_ref()
    }

    pub fn routes(&self) -> &[Box<dyn Route>] {
        &self.routes
    }

    pub fn has_guard(&self) -> bool {
        self.guard.is_some()
    }

    /// Installs the guard of this router, replacing any previous one.
    pub fn with_guard<G: Guard + 'static>(&mut self, guard: G) -> &mut Self {
        self.guard = Some(Box::new(guard));
        self
    }

    pub fn with_error_handler(&mut self, options: ErrorHandlerOptions) -> &mut Self {
        self.error_options = Some(options);
        self
    }

    /// Sets the directory static targets and error pages are resolved against.
    pub fn with_web_root(&mut self, web_root: impl Into<PathBuf>) -> &mut Self {
        self.web_root = web_root.into();
        self
    }

    /// Appends a filter; filters run in registration order around the route dispatch.
    pub fn use_filter<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn add_route<R: Route + 'static>(&mut self, route: R) -> &mut Self {
        self.routes.push(Box::new(route));
        self
    }

    /// Registers `handler` for `pattern`, `None` as method accepts any method.
    pub fn try_route<H: RequestHandler + 'static>(
        &mut self,
        method: Option<Method>,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, PatternError> {
        let matcher = PathMatcher::compile(pattern)?;
        debug!(prefix = %self.prefix, method = ?method, pattern, "register route");
        Ok(self.add_route(EndpointRoute::new(method, matcher, Box::new(handler))))
    }

    /// Registers `handler` for `method` requests matching `pattern`.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid path pattern, see [`Router::try_route`].
    pub fn route<H: RequestHandler + 'static>(&mut self, method: Method, pattern: &str, handler: H) -> &mut Self {
        self.route_or_panic(Some(method), pattern, handler)
    }

    /// Registers `handler` for requests of any method matching `pattern`.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid path pattern.
    pub fn route_all<H: RequestHandler + 'static>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route_or_panic(None, pattern, handler)
    }

    fn route_or_panic<H: RequestHandler + 'static>(&mut self, method: Option<Method>, pattern: &str, handler: H) -> &mut Self {
        if let Err(e) = self.try_route(method, pattern, handler) {
            panic!("invalid route pattern '{pattern}': {e}");
        }
        self
    }

    method_route!(get, GET);
    method_route!(post, POST);
    method_route!(put, PUT);
    method_route!(delete, DELETE);
    method_route!(options, OPTIONS);
    method_route!(head, HEAD);
    method_route!(patch, PATCH);
    method_route!(trace, TRACE);

    /// Answers requests matching `pattern` with a `302 Found` pointing at `target`.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid path pattern or `target` is not a valid header value.
    pub fn redirect(&mut self, method: Option<Method>, pattern: &str, target: &str) -> &mut Self {
        let location = match HeaderValue::from_str(target) {
            Ok(location) => location,
            Err(e) => panic!("invalid redirect target '{target}': {e}"),
        };
        self.route_or_panic(method, pattern, RedirectHandler { location })
    }

    /// Mounts a child router at `prefix`, populated by `target`.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` is not a valid path pattern.
    pub fn mount(&mut self, prefix: &str, target: MountTarget) -> &mut Self {
        self.mount_with(prefix, target, |_| {})
    }

    /// Mounts a child router at `prefix`; `configure` runs after `target` has been set up and
    /// before the child is appended to the route list.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` is not a valid path pattern.
    pub fn mount_with<F>(&mut self, prefix: &str, target: MountTarget, configure: F) -> &mut Self
    where
        F: FnOnce(&mut Router),
    {
        let mut child = Router::with_prefix(prefix);
        child.web_root = self.web_root.clone();
        child.error_options = self.error_options.clone();

        target.setup(&mut child);
        configure(&mut child);

        debug!(parent = %self.prefix, prefix, routes = child.routes.len(), "mount router");
        self.add_route(child)
    }

    /// Serves the file or directory `target` at `pattern`, relative targets are resolved
    /// against the web root.
    pub fn serve(&mut self, pattern: &str, target: impl AsRef<Path>) -> &mut Self {
        self.serve_with(pattern, target, SendOptions::default())
    }

    pub fn serve_with(&mut self, pattern: &str, target: impl AsRef<Path>, options: SendOptions) -> &mut Self {
        let target = self.web_root.join(target);
        debug!(prefix = %self.prefix, pattern, target = %target.display(), "serve files");
        self.add_route(ServeRoute::new(pattern, target, options))
    }

    /// Routes a request that enters the router tree here.
    pub async fn middleware<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let mut ctx = RequestContext::new(request);
        self.handle(&mut ctx, None).await
    }

    /// Dispatches `ctx` if the prefix claims its path, otherwise hands it to `next` or
    /// answers 404. The router is terminal: a claimed request never reaches `next`.
    pub async fn handle(&self, ctx: &mut RequestContext, next: Option<&dyn RequestHandler>) -> Response<ResponseBody> {
        let mut response = match self.prefix_matcher.matches(ctx.path()) {
            Some(matched) => {
                ctx.apply_prefix_match(matched);
                self.dispatch(ctx).await
            }
            None => match next {
                Some(handler) => match handler.invoke(ctx).await {
                    Ok(response) => response,
                    Err(e) => self.on_error(ctx, e).await,
                },
                None => self.on_error(ctx, RouteError::NotFound).await,
            },
        };
        ctx.merge_response_headers(&mut response);
        response
    }

    /// Runs the guard, the filters and the routes, rendering any failure.
    pub async fn dispatch(&self, ctx: &mut RequestContext) -> Response<ResponseBody> {
        match self.try_dispatch(ctx).await {
            Ok(response) => response,
            Err(e) => self.on_error(ctx, e).await,
        }
    }

    async fn try_dispatch(&self, ctx: &mut RequestContext) -> HandlerResult {
        if let Some(guard) = &self.guard {
            if !guard.check(ctx).await {
                return Err(RouteError::Unauthorized);
            }
        }

        if self.filters.is_empty() {
            return self.dispatch_routes(ctx).await;
        }

        let chain = self.filter_chain.get_or_init(|| self.filters.iter().cloned().collect());
        Next::new(chain, self).run(ctx).await
    }

    pub(crate) async fn dispatch_routes(&self, ctx: &mut RequestContext) -> HandlerResult {
        for route in &self.routes {
            if route.matches(ctx) {
                return route.dispatch(ctx).await;
            }
        }
        self.not_found(ctx)
    }

    fn not_found(&self, ctx: &RequestContext) -> HandlerResult {
        debug!(prefix = %self.prefix, path = ctx.path(), "no route matched");
        Err(RouteError::NotFound)
    }

    /// Renders `err` with this router's options, error pages default to `<web root>/errors`.
    pub async fn on_error(&self, ctx: &mut RequestContext, err: RouteError) -> Response<ResponseBody> {
        let mut options = self.error_options.clone().unwrap_or_default();
        if options.html_root.is_none() {
            options.html_root = Some(self.web_root.join("errors"));
        }
        render_error(ctx, &err, &options).await
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field("routes", &self.routes.len())
            .field("guard", &self.guard.is_some())
            .field("filters", &self.filters.len())
            .field("web_root", &self.web_root)
            .field("error_options", &self.error_options)
            .finish()
    }
}

/// A mounted router claims the paths below its prefix and renders its own failures.
#[async_trait]
impl Route for Router {
    fn matches(&self, ctx: &mut RequestContext) -> bool {
        match self.prefix_matcher.matches(ctx.path()) {
            Some(matched) => {
                ctx.apply_prefix_match(matched);
                true
            }
            None => false,
        }
    }

    async fn dispatch(&self, ctx: &mut RequestContext) -> HandlerResult {
        Ok(Router::dispatch(self, ctx).await)
    }
}

struct RedirectHandler {
    location: HeaderValue,
}

#[async_trait]
impl RequestHandler for RedirectHandler {
    async fn invoke(&self, _ctx: &mut RequestContext) -> HandlerResult {
        let body = format!("Redirecting to {}.", String::from_utf8_lossy(self.location.as_bytes()));
        let mut response = Response::new(ResponseBody::from(body));
        *response.status_mut() = StatusCode::FOUND;
        response.headers_mut().insert(LOCATION, self.location.clone());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::Router;
    use crate::body::ResponseBody;
    use crate::error_page::{ErrorContentType, ErrorHandlerOptions};
    use crate::filter::fn_filter;
    use crate::guard::fn_guard;
    use crate::handler::handler_fn;
    use crate::resource::MountTarget;
    use crate::route::MockRoute;
    use crate::request::RequestContext;
    use bytes::Bytes;
    use futures::FutureExt;
    use http::{HeaderValue, Method, Request, Response, StatusCode};
    use http_body_util::{BodyExt, Empty};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request(method: Method, uri: &str) -> Request<Empty<Bytes>> {
        Request::builder().method(method).uri(uri).body(Empty::new()).unwrap()
    }

    async fn call(router: &Router, method: Method, uri: &str) -> (StatusCode, String) {
        let response = router.middleware(request(method, uri)).await;
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn text(body: &'static str) -> impl crate::handler::RequestHandler {
        handler_fn(move |_| async move { body }.boxed())
    }

    #[tokio::test]
    async fn first_registered_route_wins() {
        let mut router = Router::new();
        router.get("/a", text("first")).get("/a", text("second")).get("/:name", text("pattern"));

        assert_eq!(call(&router, Method::GET, "/a").await, (StatusCode::OK, "first".to_string()));
        assert_eq!(call(&router, Method::GET, "/b").await, (StatusCode::OK, "pattern".to_string()));
        assert_eq!(call(&router, Method::POST, "/a").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn later_routes_are_not_tried_after_a_match() {
        let mut first = MockRoute::new();
        first.expect_matches().times(1).returning(|_| true);
        first.expect_dispatch().times(1).returning(|_| Ok(Response::new(ResponseBody::from("mock"))));

        let mut second = MockRoute::new();
        second.expect_matches().never();
        second.expect_dispatch().never();

        let mut router = Router::new();
        router.add_route(first).add_route(second);

        assert_eq!(call(&router, Method::GET, "/anything").await, (StatusCode::OK, "mock".to_string()));
    }

    #[tokio::test]
    async fn unmatched_prefix() {
        let mut router = Router::with_prefix("/api");
        router.get("/hello", text("hello"));

        assert_eq!(call(&router, Method::GET, "/api/hello").await, (StatusCode::OK, "hello".to_string()));
        assert_eq!(call(&router, Method::GET, "/apihello").await.0, StatusCode::NOT_FOUND);

        let fallback = text("fallback");
        let mut ctx = RequestContext::new(request(Method::GET, "/other"));
        let response = router.handle(&mut ctx, Some(&fallback)).await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"fallback"));
    }

    #[tokio::test]
    async fn guard_short_circuits() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = dispatched.clone();

        let mut router = Router::new();
        router
            .with_guard(fn_guard(|ctx| ctx.headers().get("authorization").is_none_or(|v| v != "none")))
            .get(
                "/",
                handler_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { "ok" }.boxed()
                }),
            );

        let mut denied = request(Method::GET, "/");
        denied.headers_mut().insert("authorization", HeaderValue::from_static("none"));
        let response = router.middleware(denied).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);

        assert_eq!(call(&router, Method::GET, "/").await.0, StatusCode::OK);
        assert_eq!(dispatched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn filters_wrap_dispatch_in_order() {
        let mut router = Router::new();
        router
            .use_filter(fn_filter(|ctx, next| {
                async move {
                    ctx.response_headers_mut().append("x-order", HeaderValue::from_static("outer"));
                    next.run(ctx).await
                }
                .boxed()
            }))
            .use_filter(fn_filter(|ctx, next| {
                async move {
                    ctx.response_headers_mut().append("x-order", HeaderValue::from_static("inner"));
                    let mut response = next.run(ctx).await?;
                    response.headers_mut().insert("x-filtered", HeaderValue::from_static("yes"));
                    Ok(response)
                }
                .boxed()
            }))
            .get("/", text("ok"));

        let response = router.middleware(request(Method::GET, "/")).await;
        assert_eq!(response.headers()["x-filtered"], "yes");
        let order: Vec<_> = response.headers().get_all("x-order").iter().collect();
        assert_eq!(order, ["outer", "inner"]);

        // the filters also wrap failed dispatches
        let response = router.middleware(request(Method::GET, "/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn filter_can_answer_alone() {
        let mut router = Router::new();
        router
            .use_filter(fn_filter(|_, _| async { Ok(Response::new(ResponseBody::from("intercepted"))) }.boxed()))
            .get("/", text("ok"));

        assert_eq!(call(&router, Method::GET, "/").await, (StatusCode::OK, "intercepted".to_string()));
    }

    #[tokio::test]
    async fn mounted_router_binds_params() {
        let mut router = Router::new();
        router.mount_with("/tenants/:tenant", MountTarget::empty(), |child| {
            child.get(
                "/users/:id",
                handler_fn(|ctx| {
                    async move { format!("{}:{}", ctx.param("tenant").unwrap_or("-"), ctx.param("id").unwrap_or("-")) }
                        .boxed()
                }),
            );
        });

        assert_eq!(call(&router, Method::GET, "/tenants/acme/users/7").await, (StatusCode::OK, "acme:7".to_string()));
        assert_eq!(call(&router, Method::GET, "/tenants/acme/users/a%20b").await.1, "acme:a b");
        assert_eq!(call(&router, Method::GET, "/tenants/acme/groups/7").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn child_renders_with_inherited_options() {
        let mut router = Router::new();
        router.with_error_handler(
            ErrorHandlerOptions::new()
                .with_content_types([ErrorContentType::Text])
                .with_formatter(ErrorContentType::Text, |info, _| format!("custom {}", info.status)),
        );
        router.mount("/child", MountTarget::empty());

        assert_eq!(call(&router, Method::GET, "/child/x").await, (StatusCode::NOT_FOUND, "custom 404".to_string()));
    }

    #[tokio::test]
    async fn redirect_route() {
        let mut router = Router::new();
        router.redirect(Some(Method::GET), "/old", "/new");

        let response = router.middleware(request(Method::GET, "/old")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "/new");
    }

    #[tokio::test]
    async fn handler_errors_are_rendered() {
        let mut router = Router::new();
        router.get("/fail", handler_fn(|_| async { Err::<String, _>(crate::RouteError::internal("db down")) }.boxed()));

        let (status, body) = call(&router, Method::GET, "/fail").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("db down"));
    }

    #[test]
    fn invalid_patterns_are_reported() {
        let mut router = Router::new();
        assert!(router.try_route(Some(Method::GET), "/users/(unclosed", text("x")).is_err());
        assert!(Router::try_with_prefix("/api/(").is_err());
    }
}
