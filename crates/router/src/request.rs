//! Per-request routing state.
//!
//! - `RequestContext`: the request head, the path still to be routed, accumulated path
//!   parameters, pending response headers and the lazily parsed body
//! - `PathParams`: named bindings produced by path and prefix matchers

use crate::body::{BoxError, OptionReqBody};
use crate::error::{HttpError, RouteError};
use crate::error_page::ErrorHook;
use crate::path::{normalize_path, PrefixMatch};
use crate::payload::{BodyOptions, LazyBody};
use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};
use http_body::Body as HttpBody;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::OnceCell;

/// The state of one request while it travels through the router tree.
///
/// A context is created once when the request enters the outermost router and is
/// dropped after the response has been produced.
pub struct RequestContext {
    parts: Parts,
    body: OptionReqBody,
    body_options: BodyOptions,
    payload: OnceCell<LazyBody>,
    path: String,
    params: PathParams,
    response_headers: HeaderMap,
    error_hook: Option<ErrorHook>,
}

impl RequestContext {
    /// Creates a context from a request; the routed path starts as the normalized request path.
    pub fn new<B>(request: Request<B>) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        let path = normalize_path(parts.uri.path());
        Self {
            parts,
            body: OptionReqBody::new(body),
            body_options: BodyOptions::default(),
            payload: OnceCell::new(),
            path,
            params: PathParams::empty(),
            response_headers: HeaderMap::new(),
            error_hook: None,
        }
    }

    #[must_use]
    pub fn with_body_options(mut self, body_options: BodyOptions) -> Self {
        self.body_options = body_options;
        self
    }

    /// Installs the application level hook receiving errors the routers delegate upward.
    #[must_use]
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = Some(hook);
        self
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Request extensions, usable by filters to hand values to handlers.
    pub fn extensions(&self) -> &http::Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.parts.extensions
    }

    /// The part of the request path not yet consumed by mount prefixes.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Deserializes the query string, an absent query deserializes from an empty string.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, RouteError> {
        let query = self.uri().query().unwrap_or_default();
        serde_qs::from_str::<T>(query)
            .map_err(|e| HttpError::new(StatusCode::BAD_REQUEST, format!("invalid query string: {e}")).into())
    }

    /// Headers to be added to whatever response this request ends up with.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    /// Parses the request body on first access and returns the cached result afterwards.
    pub async fn payload(&self) -> Result<&LazyBody, RouteError> {
        self.payload
            .get_or_try_init(|| LazyBody::read(&self.parts.headers, &self.body, &self.body_options))
            .await
    }

    pub(crate) fn apply_prefix_match(&mut self, matched: PrefixMatch) {
        if let Some(rest) = matched.rest {
            self.path = rest;
        }
        self.params.merge(matched.params);
    }

    pub(crate) fn merge_params(&mut self, params: PathParams) {
        self.params.merge(params);
    }

    pub(crate) fn error_hook(&self) -> Option<&ErrorHook> {
        self.error_hook.as_ref()
    }

    /// Copies pending headers into the response, skipping names the response already sets.
    pub(crate) fn merge_response_headers<B>(&mut self, response: &mut Response<B>) {
        let pending = std::mem::take(&mut self.response_headers);
        let headers = response.headers_mut();
        for name in pending.keys() {
            if headers.contains_key(name) {
                continue;
            }
            for value in pending.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("path", &self.path)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Named path parameters accumulated while a request descends the router tree.
///
/// Bindings from nested matches are inserted into the same map, a name bound twice keeps
/// the innermost value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    inner: HashMap<String, String>,
}

impl PathParams {
    /// Creates an empty PathParams instance with no parameters
    #[inline]
    pub fn empty() -> Self {
        Self { inner: HashMap::new() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Gets the decoded value of a path parameter by its name
    #[inline]
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.inner.get(key.as_ref()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn insert(&mut self, key: String, value: String) {
        self.inner.insert(key, value);
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<String> {
        self.inner.remove(key)
    }

    pub(crate) fn merge(&mut self, other: PathParams) {
        self.inner.extend(other.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::{PathParams, RequestContext};
    use crate::path::PrefixMatcher;
    use bytes::Bytes;
    use http::{HeaderValue, Request, Response};
    use http_body_util::Empty;
    use serde::Deserialize;

    fn context(uri: &str) -> RequestContext {
        RequestContext::new(Request::get(uri).body(Empty::<Bytes>::new()).unwrap())
    }

    #[test]
    fn path_is_normalized() {
        assert_eq!(context("/api/users/").path(), "/api/users");
        assert_eq!(context("/").path(), "/");
        assert_eq!(context("/api?x=1").path(), "/api");
    }

    #[test]
    fn prefix_match_narrows_path_and_merges_params() {
        let mut ctx = context("/tenants/acme/users/1");
        let matched = PrefixMatcher::compile("/tenants/:tenant").unwrap().matches(ctx.path()).unwrap();
        ctx.apply_prefix_match(matched);

        assert_eq!(ctx.path(), "/users/1");
        assert_eq!(ctx.param("tenant"), Some("acme"));

        let mut more = PathParams::empty();
        more.insert("id".into(), "1".into());
        ctx.merge_params(more);

        assert_eq!(ctx.param("tenant"), Some("acme"));
        assert_eq!(ctx.param("id"), Some("1"));
    }

    #[test]
    fn root_prefix_keeps_path() {
        let mut ctx = context("/a/b");
        let matched = PrefixMatcher::compile("/").unwrap().matches(ctx.path()).unwrap();
        ctx.apply_prefix_match(matched);
        assert_eq!(ctx.path(), "/a/b");
    }

    #[test]
    fn query_is_deserialized() {
        #[derive(Deserialize)]
        struct Paging {
            page: u32,
            size: Option<u32>,
        }

        let paging: Paging = context("/items?page=2").query().unwrap();
        assert_eq!(paging.page, 2);
        assert!(paging.size.is_none());

        assert!(context("/items?page=x").query::<Paging>().is_err());
    }

    #[test]
    fn pending_headers_do_not_override_response_headers() {
        let mut ctx = context("/");
        ctx.response_headers_mut().insert("x-a", HeaderValue::from_static("pending"));
        ctx.response_headers_mut().insert("x-b", HeaderValue::from_static("pending"));

        let mut response = Response::builder().header("x-a", "own").body(()).unwrap();
        ctx.merge_response_headers(&mut response);

        assert_eq!(response.headers()["x-a"], "own");
        assert_eq!(response.headers()["x-b"], "pending");
        assert!(ctx.response_headers().is_empty());
    }
}
