//! Router guards.
//!
//! A router holds at most one guard. It runs before the filters and the routes, and a
//! rejected request is answered with `401 Unauthorized`.
//!
//! This module provides:
//! - the async [`Guard`] trait
//! - closure guards through [`fn_guard`]
//! - a header guard
//! - AND/OR composition through [`all_guard`] and [`any_guard`]
//!
//! # Examples
//!
//! ```
//! use http::{HeaderName, HeaderValue};
//! use micro_router::guard::{all_guard, fn_guard, header};
//!
//! let mut guard = all_guard();
//! guard
//!     .and(header(HeaderName::from_static("x-api-key"), HeaderValue::from_static("secret")))
//!     .and(fn_guard(|ctx| ctx.uri().query().is_none()));
//! ```

use crate::request::RequestContext;
use async_trait::async_trait;
use http::{HeaderName, HeaderValue};

/// Decides whether a request may enter a router.
///
/// Guards may inspect and annotate the context (for instance store the authenticated
/// principal in the request extensions) before they answer.
#[async_trait]
pub trait Guard: Send + Sync {
    async fn check(&self, ctx: &mut RequestContext) -> bool;
}

#[async_trait]
impl<G: Guard + ?Sized> Guard for Box<G> {
    async fn check(&self, ctx: &mut RequestContext) -> bool {
        (**self).check(ctx).await
    }
}

/// A guard that wraps a closure.
struct FnGuard<F>(F);

#[async_trait]
impl<F: Fn(&RequestContext) -> bool + Send + Sync> Guard for FnGuard<F> {
    async fn check(&self, ctx: &mut RequestContext) -> bool {
        (self.0)(&*ctx)
    }
}

/// Creates a new guard from a synchronous closure.
pub fn fn_guard<F>(f: F) -> impl Guard
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    FnGuard(f)
}

/// Creates a guard accepting only requests carrying `name: value`.
#[inline]
pub fn header(name: HeaderName, value: HeaderValue) -> HeaderGuard {
    HeaderGuard(name, value)
}

/// A guard that matches one HTTP header.
pub struct HeaderGuard(HeaderName, HeaderValue);

#[async_trait]
impl Guard for HeaderGuard {
    async fn check(&self, ctx: &mut RequestContext) -> bool {
        ctx.headers().get(&self.0).is_some_and(|value| self.1.eq(value))
    }
}

/// Creates a new OR-composed guard chain.
pub fn any_guard() -> AnyGuard {
    AnyGuard { guards: vec![] }
}

/// Compose guards with OR logic.
///
/// If any inner guard succeeds, the whole guard succeeds.
/// An empty guard chain returns true by default.
pub struct AnyGuard {
    guards: Vec<Box<dyn Guard>>,
}

impl AnyGuard {
    /// Add a new guard to the OR chain.
    pub fn or<G: Guard + 'static>(&mut self, guard: G) -> &mut Self {
        self.guards.push(Box::new(guard));
        self
    }
}

#[async_trait]
impl Guard for AnyGuard {
    async fn check(&self, ctx: &mut RequestContext) -> bool {
        if self.guards.is_empty() {
            return true;
        }

        for guard in &self.guards {
            if guard.check(ctx).await {
                return true;
            }
        }

        false
    }
}

/// Creates a new AND-composed guard chain.
pub fn all_guard() -> AllGuard {
    AllGuard { guards: vec![] }
}

/// Compose guards with AND logic.
///
/// All inner guards must succeed for the whole guard to succeed, evaluation stops at the
/// first rejection.
pub struct AllGuard {
    guards: Vec<Box<dyn Guard>>,
}

impl AllGuard {
    /// Add a new guard to the AND chain.
    pub fn and<G: Guard + 'static>(&mut self, guard: G) -> &mut Self {
        self.guards.push(Box::new(guard));
        self
    }
}

#[async_trait]
impl Guard for AllGuard {
    async fn check(&self, ctx: &mut RequestContext) -> bool {
        for guard in &self.guards {
            if !guard.check(ctx).await {
                return false;
            }
        }

        true
    }
}
