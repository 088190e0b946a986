//! The entries of a router's route list.
//!
//! A router walks its routes in registration order and dispatches the first one whose
//! [`Route::matches`] accepts the request:
//!
//! - [`EndpointRoute`] binds an optional method and a path pattern to a handler
//! - [`ServeRoute`] maps a path prefix onto a file or directory
//! - [`Router`](crate::Router) itself, for mounted sub-routers

use crate::error::{HttpError, RouteError};
use crate::handler::RequestHandler;
use crate::path::{PathMatcher, PrefixMatcher};
use crate::request::RequestContext;
use crate::responder::HandlerResult;
use crate::send::{send, SendError, SendOptions};
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::fmt;
use std::io;
use std::path::PathBuf;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Route: Send + Sync {
    /// Tests the request, binding path parameters into `ctx` on success.
    fn matches(&self, ctx: &mut RequestContext) -> bool;

    async fn dispatch(&self, ctx: &mut RequestContext) -> HandlerResult;
}

/// A handler bound to a method and a path pattern.
pub struct EndpointRoute {
    method: Option<Method>,
    matcher: PathMatcher,
    handler: Box<dyn RequestHandler>,
}

impl EndpointRoute {
    /// `None` as method accepts every method.
    pub fn new(method: Option<Method>, matcher: PathMatcher, handler: Box<dyn RequestHandler>) -> Self {
        Self { method, matcher, handler }
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }
}

impl fmt::Debug for EndpointRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRoute").field("method", &self.method).field("matcher", &self.matcher).finish()
    }
}

#[async_trait]
impl Route for EndpointRoute {
    fn matches(&self, ctx: &mut RequestContext) -> bool {
        if self.method.as_ref().is_some_and(|method| method != ctx.method()) {
            return false;
        }
        match self.matcher.matches(ctx.path()) {
            Some(params) => {
                ctx.merge_params(params);
                true
            }
            None => false,
        }
    }

    async fn dispatch(&self, ctx: &mut RequestContext) -> HandlerResult {
        self.handler.invoke(ctx).await
    }
}

/// Serves files below a path prefix.
#[derive(Debug)]
pub struct ServeRoute {
    matcher: PrefixMatcher,
    target: PathBuf,
    options: SendOptions,
}

impl ServeRoute {
    pub fn new(prefix: &str, target: impl Into<PathBuf>, options: SendOptions) -> Self {
        Self { matcher: PrefixMatcher::literal(prefix), target: target.into(), options }
    }
}

#[async_trait]
impl Route for ServeRoute {
    fn matches(&self, ctx: &mut RequestContext) -> bool {
        if ctx.method() != Method::GET && ctx.method() != Method::HEAD {
            return false;
        }
        match self.matcher.matches(ctx.path()) {
            Some(matched) => {
                ctx.apply_prefix_match(matched);
                true
            }
            None => false,
        }
    }

    async fn dispatch(&self, ctx: &mut RequestContext) -> HandlerResult {
        match send(ctx.method(), &self.target, ctx.path(), &self.options).await {
            Ok(response) => Ok(response),
            Err(SendError::Forbidden) => Err(HttpError::from_status(StatusCode::FORBIDDEN).into()),
            Err(SendError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Err(HttpError::new(
                StatusCode::NOT_FOUND,
                format!("File not found: {}", ctx.uri().path()),
            )
            .with_source(e)
            .into()),
            Err(SendError::Io(e)) => Err(HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to fetch file: {}", ctx.uri().path()),
            )
            .with_source(e)
            .into()),
        }
    }
}
