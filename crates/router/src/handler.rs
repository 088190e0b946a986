use crate::request::RequestContext;
use crate::responder::{HandlerResult, Responder};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::marker::PhantomData;

/// The terminal step of a route: turns a request into a response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke(&self, ctx: &mut RequestContext) -> HandlerResult;
}

#[async_trait]
impl<H: RequestHandler + ?Sized> RequestHandler for Box<H> {
    async fn invoke(&self, ctx: &mut RequestContext) -> HandlerResult {
        (**self).invoke(ctx).await
    }
}

#[async_trait]
impl<H: RequestHandler + ?Sized> RequestHandler for std::sync::Arc<H> {
    async fn invoke(&self, ctx: &mut RequestContext) -> HandlerResult {
        (**self).invoke(ctx).await
    }
}

/// an async closure holder, the closure returns any [`Responder`]
pub struct FnHandler<F, T> {
    f: F,
    _phantom: PhantomData<fn() -> T>,
}

/// Wraps a closure borrowing the request context into a [`RequestHandler`].
///
/// ```
/// use futures::FutureExt;
/// use micro_router::handler_fn;
///
/// let hello = handler_fn(|ctx| async move { format!("hello {}", ctx.param("name").unwrap_or("world")) }.boxed());
/// ```
pub fn handler_fn<F, T>(f: F) -> FnHandler<F, T>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, T> + Send + Sync,
    T: Responder + Send,
{
    FnHandler { f, _phantom: PhantomData }
}

#[async_trait]
impl<F, T> RequestHandler for FnHandler<F, T>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, T> + Send + Sync,
    T: Responder + Send,
{
    async fn invoke(&self, ctx: &mut RequestContext) -> HandlerResult {
        let responder = (self.f)(ctx).await;
        responder.response_to(ctx)
    }
}
