//! Router filters.
//!
//! Filters wrap the route dispatch of one router. Each filter receives the context and a
//! [`Next`] continuation, and may act before and after calling it or answer on its own
//! without calling it at all.
//!
//! ```
//! use futures::FutureExt;
//! use http::HeaderValue;
//! use micro_router::filter::fn_filter;
//!
//! let powered_by = fn_filter(|ctx, next| {
//!     async move {
//!         ctx.response_headers_mut().insert("x-powered-by", HeaderValue::from_static("micro-router"));
//!         next.run(ctx).await
//!     }
//!     .boxed()
//! });
//! ```

use crate::request::RequestContext;
use crate::responder::HandlerResult;
use crate::router::Router;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

#[async_trait]
pub trait Filter: Send + Sync {
    async fn filter(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult;
}

/// The remainder of a router's filter chain, ending in the router's route list.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Filter>],
    router: &'a Router,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Filter>], router: &'a Router) -> Self {
        Self { chain, router }
    }

    /// Runs the next filter, or the routes once every filter has been passed.
    pub async fn run(self, ctx: &mut RequestContext) -> HandlerResult {
        match self.chain.split_first() {
            Some((filter, rest)) => filter.filter(ctx, Next { chain: rest, router: self.router }).await,
            None => self.router.dispatch_routes(ctx).await,
        }
    }
}

struct FnFilter<F>(F);

#[async_trait]
impl<F> Filter for FnFilter<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    async fn filter(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        (self.0)(ctx, next).await
    }
}

/// Creates a filter from a closure.
pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    FnFilter(f)
}
