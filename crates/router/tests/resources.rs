use bytes::Bytes;
use futures::FutureExt;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use micro_router::{apply_setup, MountTarget, RequestContext, Resource, ResourceSetup, Router, SetupChain, WalkOrder};
use std::path::Path;
use std::sync::Arc;

#[derive(Default)]
struct UsersApi;

impl Resource for UsersApi {
    fn declare(setup: &mut ResourceSetup<Self>) {
        setup.level("UsersApi", |chain| {
            chain
                .get("/", |_: &Self, _: &mut RequestContext| async { "UsersApi root" }.boxed())
                .get("/:id", |_: &Self, ctx: &mut RequestContext| {
                    let id = ctx.param("id").unwrap_or_default().to_string();
                    async move { format!("user {id}") }.boxed()
                });
        });
    }
}

/// Behaviour shared by every api below, implementors override the methods they need.
trait BaseApi: Resource {
    fn on_access(&self, ctx: &mut RequestContext) -> bool {
        if ctx.headers().get(AUTHORIZATION).is_some_and(|value| value == "none") {
            return false;
        }
        ctx.response_headers_mut().insert("on-access", HeaderValue::from_static("BaseResource"));
        true
    }

    fn overwrite(&self) -> &'static str {
        "base endpoint"
    }
}

fn declare_base<R: BaseApi>(chain: &mut SetupChain<R>) {
    chain
        .guard(|r: &R, ctx: &mut RequestContext| {
            let allowed = r.on_access(ctx);
            async move { allowed }.boxed()
        })
        .mount("/users", |_: &R| MountTarget::of::<UsersApi>())
        .mount("/users2", |_: &R| MountTarget::of::<UsersApi>())
        .get("/base", |_: &R, _: &mut RequestContext| async { "hello base" }.boxed())
        .get("/overwrite", |r: &R, _: &mut RequestContext| {
            let body = r.overwrite();
            async move { body }.boxed()
        })
        .serve("/index.txt", |_: &R| "index.txt")
        .serve("/static", |_: &R| "static");
}

fn setup_base<R: BaseApi>(resource: &Arc<R>, router: &mut Router) {
    apply_setup(resource, router);
    router.mount("/users3", MountTarget::of::<UsersApi>());
}

struct ApiRoot;

impl BaseApi for ApiRoot {
    fn on_access(&self, ctx: &mut RequestContext) -> bool {
        ctx.response_headers_mut().insert("on-access", HeaderValue::from_static("ApiRoot"));
        true
    }

    fn overwrite(&self) -> &'static str {
        "ApiRoot overwrite"
    }
}

impl Resource for ApiRoot {
    fn declare(setup: &mut ResourceSetup<Self>) {
        setup
            .level("ApiRoot", |chain| {
                chain.get("/hello", |_: &Self, _: &mut RequestContext| async { "hello" }.boxed());
            })
            .level("BaseResource", declare_base::<Self>);
    }

    fn setup(self: Arc<Self>, router: &mut Router) {
        setup_base(&self, router);
    }
}

/// Redeclares the guard and a base route instead of overriding the methods.
struct ApiRootBad;

impl BaseApi for ApiRootBad {}

fn declare_api_root_bad<R: BaseApi>(chain: &mut SetupChain<R>) {
    chain
        .get("/", |_: &R, _: &mut RequestContext| async { "ApiRootBad root" }.boxed())
        .guard(|_: &R, ctx: &mut RequestContext| {
            ctx.response_headers_mut().insert("on-access", HeaderValue::from_static("ApiRootBad"));
            async { true }.boxed()
        })
        .get("/overwrite", |_: &R, _: &mut RequestContext| async { "ApiRootBad overwrite" }.boxed());
}

impl Resource for ApiRootBad {
    fn declare(setup: &mut ResourceSetup<Self>) {
        setup.level("ApiRootBad", declare_api_root_bad::<Self>).level("BaseResource", declare_base::<Self>);
    }

    fn setup(self: Arc<Self>, router: &mut Router) {
        setup_base(&self, router);
    }
}

/// Same levels as [`ApiRootBad`], applied base first.
struct ApiRootBadBaseFirst;

impl BaseApi for ApiRootBadBaseFirst {}

impl Resource for ApiRootBadBaseFirst {
    fn declare(setup: &mut ResourceSetup<Self>) {
        setup
            .level("ApiRootBad", declare_api_root_bad::<Self>)
            .level("BaseResource", declare_base::<Self>)
            .walk_order(WalkOrder::BaseFirst);
    }
}

#[derive(Default)]
struct OtherApi;

impl BaseApi for OtherApi {}

impl Resource for OtherApi {
    fn declare(setup: &mut ResourceSetup<Self>) {
        setup
            .level("OtherApi", |chain| {
                chain.get("/", |_: &Self, _: &mut RequestContext| async { "OtherApi root" }.boxed());
            })
            .level("BaseResource", declare_base::<Self>);
    }

    fn setup(self: Arc<Self>, router: &mut Router) {
        setup_base(&self, router);
    }
}

fn server() -> Router {
    let mut router = Router::new();
    router
        .with_web_root(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures"))
        .mount("/api", MountTarget::instance(ApiRoot))
        .mount("/api-bad", MountTarget::instance(ApiRootBad))
        .mount("/api-bad-base-first", MountTarget::instance(ApiRootBadBaseFirst))
        .mount("/api-other", MountTarget::of::<OtherApi>());
    router
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    text: String,
}

async fn get(router: &Router, uri: &str, authorization: Option<&'static str>) -> Reply {
    let mut request = Request::builder().method(Method::GET).uri(uri);
    if let Some(authorization) = authorization {
        request = request.header(AUTHORIZATION, authorization);
    }
    let response = router.middleware(request.body(Empty::<Bytes>::new()).unwrap()).await;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    Reply { status, headers, text: String::from_utf8(body.to_vec()).unwrap() }
}

#[tokio::test]
async fn own_endpoint() {
    let reply = get(&server(), "/api/hello", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text, "hello");
}

#[tokio::test]
async fn base_endpoint_is_inherited() {
    let reply = get(&server(), "/api/base", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text, "hello base");
}

#[tokio::test]
async fn overridden_method_changes_base_endpoint() {
    let reply = get(&server(), "/api/overwrite", None).await;
    assert_eq!(reply.text, "ApiRoot overwrite");
}

#[tokio::test]
async fn overridden_guard_method() {
    let reply = get(&server(), "/api/hello", None).await;
    assert_eq!(reply.text, "hello");
    assert_eq!(reply.headers["on-access"], "ApiRoot");
}

#[tokio::test]
async fn redeclared_guard_and_endpoint_win_derived_first() {
    let router = server();

    let reply = get(&router, "/api-bad", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text, "ApiRootBad root");
    assert_eq!(reply.headers["on-access"], "ApiRootBad");

    let reply = get(&router, "/api-bad/overwrite", None).await;
    assert_eq!(reply.text, "ApiRootBad overwrite");
}

#[tokio::test]
async fn base_first_order_lets_base_declarations_win() {
    let router = server();

    let reply = get(&router, "/api-bad-base-first/overwrite", None).await;
    assert_eq!(reply.text, "base endpoint");
    assert_eq!(reply.headers["on-access"], "BaseResource");

    let reply = get(&router, "/api-bad-base-first", None).await;
    assert_eq!(reply.text, "ApiRootBad root");
}

#[tokio::test]
async fn derived_declarations_do_not_leak_into_siblings() {
    let reply = get(&server(), "/api-bad/hello", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn base_guard_is_inherited() {
    let reply = get(&server(), "/api-other/", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text, "OtherApi root");
    assert_eq!(reply.headers["on-access"], "BaseResource");
}

#[tokio::test]
async fn guard_rejects_with_401() {
    let reply = get(&server(), "/api-other/", Some("none")).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.headers.get("on-access").is_none());
}

#[tokio::test]
async fn declared_mounts_and_setup_override() {
    let router = server();
    for uri in ["/api-other/users", "/api-other/users2", "/api-other/users3"] {
        let reply = get(&router, uri, None).await;
        assert_eq!(reply.status, StatusCode::OK, "{uri}");
        assert_eq!(reply.text, "UsersApi root", "{uri}");
    }
}

#[tokio::test]
async fn path_params_are_decoded() {
    let reply = get(&server(), "/api/users/caf%C3%A9", None).await;
    assert_eq!(reply.text, "user café");
}

#[tokio::test]
async fn serve_exact_path() {
    let reply = get(&server(), "/api-other/index.txt", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text, "index.txt");
}

#[tokio::test]
async fn serve_prefix_path() {
    let reply = get(&server(), "/api-other/static/hello.txt", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text, "hello.txt");

    let reply = get(&server(), "/api-other/static/missing.txt", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_path_is_404() {
    let reply = get(&server(), "/api/unknown", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = get(&server(), "/nowhere", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}
