//! Declarative resources.
//!
//! A resource type lists what it contributes to a router (routes, sub-mounts, static
//! mappings, filters and a guard) in [`Resource::declare`]. The declaration is an ordered
//! list of named levels, one per "class" of a hierarchy: the type's own level plus one
//! level per base behaviour it inherits. A base behaviour is a trait with default methods
//! together with a generic function contributing its level:
//!
//! ```
//! use futures::FutureExt;
//! use micro_router::{RequestContext, Resource, ResourceSetup, SetupChain};
//!
//! trait Versioned: Send + Sync + 'static {
//!     fn version(&self) -> String {
//!         "1.0".to_string()
//!     }
//! }
//!
//! fn declare_versioned<R: Resource + Versioned>(chain: &mut SetupChain<R>) {
//!     chain.get("/version", |r: &R, _ctx: &mut RequestContext| {
//!         let version = r.version();
//!         async move { version }.boxed()
//!     });
//! }
//!
//! #[derive(Default)]
//! struct Users;
//!
//! impl Versioned for Users {
//!     fn version(&self) -> String {
//!         "2.0".to_string()
//!     }
//! }
//!
//! impl Resource for Users {
//!     fn declare(setup: &mut ResourceSetup<Self>) {
//!         setup
//!             .level("Users", |chain| {
//!                 chain.get("/", |_: &Self, _: &mut RequestContext| async { "users" }.boxed());
//!             })
//!             .level("Versioned", declare_versioned::<Self>);
//!     }
//! }
//! ```
//!
//! Handlers call methods on the resource, so a type overriding a base method changes the
//! behaviour of the inherited route without registering it again.
//!
//! Declarations are built once per type, on the first mount, and cached in a process wide
//! registry keyed by [`TypeId`].

use crate::error_page::ErrorHandlerOptions;
use crate::filter::{Filter, Next};
use crate::guard::Guard;
use crate::handler::RequestHandler;
use crate::path::{PathMatcher, PrefixMatcher};
use crate::request::RequestContext;
use crate::responder::{HandlerResult, Responder};
use crate::route::EndpointRoute;
use crate::router::Router;
use crate::send::SendOptions;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::BoxFuture;
use http::Method;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A deferred registration, applied to the router a resource instance is mounted on.
pub type SetupAction<R> = Box<dyn Fn(&Arc<R>, &mut Router) + Send + Sync>;

/// A type whose instances populate a router.
pub trait Resource: Send + Sync + Sized + 'static {
    /// Declares the levels of this type, most derived first.
    fn declare(setup: &mut ResourceSetup<Self>);

    /// Router options applied before any declared action runs.
    fn options(&self) -> ResourceOptions {
        ResourceOptions::default()
    }

    /// Populates `router`. Overriding implementations usually call [`apply_setup`] and
    /// register more routes afterwards.
    fn setup(self: Arc<Self>, router: &mut Router) {
        apply_setup(&self, router);
    }
}

/// Applies the options and the declared levels of `resource` to `router`.
pub fn apply_setup<R: Resource>(resource: &Arc<R>, router: &mut Router) {
    let options = resource.options();
    if let Some(web_root) = options.web_root {
        router.with_web_root(web_root);
    }
    if let Some(error_handler) = options.error_handler {
        router.with_error_handler(error_handler);
    }
    registry::lookup::<R>().apply(resource, router);
}

#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    pub web_root: Option<PathBuf>,
    pub error_handler: Option<ErrorHandlerOptions>,
}

impl ResourceOptions {
    #[must_use]
    pub fn with_web_root(mut self, web_root: impl Into<PathBuf>) -> Self {
        self.web_root = Some(web_root.into());
        self
    }

    #[must_use]
    pub fn with_error_handler(mut self, error_handler: ErrorHandlerOptions) -> Self {
        self.error_handler = Some(error_handler);
        self
    }
}

/// The order in which the levels of a declaration are applied.
///
/// Only one guard is installed per router, the first level to declare one wins. With
/// `DerivedFirst` a derived guard therefore shadows a base guard, with `BaseFirst` the base
/// guard shadows the derived one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalkOrder {
    #[default]
    DerivedFirst,
    BaseFirst,
}

/// The declared hierarchy of a resource type.
pub struct ResourceSetup<R> {
    levels: Vec<(&'static str, SetupChain<R>)>,
    order: WalkOrder,
}

impl<R: Resource> ResourceSetup<R> {
    fn new() -> Self {
        Self { levels: Vec::new(), order: WalkOrder::default() }
    }

    /// Adds a level below the ones already declared.
    pub fn level<F>(&mut self, name: &'static str, declare: F) -> &mut Self
    where
        F: FnOnce(&mut SetupChain<R>),
    {
        let mut chain = SetupChain::new();
        declare(&mut chain);
        self.levels.push((name, chain));
        self
    }

    pub fn walk_order(&mut self, order: WalkOrder) -> &mut Self {
        self.order = order;
        self
    }

    /// Level names in application order.
    pub fn level_names(&self) -> Vec<&'static str> {
        self.walk().map(|(name, _)| *name).collect()
    }

    fn walk(&self) -> Box<dyn Iterator<Item = &(&'static str, SetupChain<R>)> + '_> {
        match self.order {
            WalkOrder::DerivedFirst => Box::new(self.levels.iter()),
            WalkOrder::BaseFirst => Box::new(self.levels.iter().rev()),
        }
    }

    fn apply(&self, resource: &Arc<R>, router: &mut Router) {
        for (name, chain) in self.walk() {
            debug!(prefix = router.prefix(), level = name, actions = chain.actions.len(), "apply resource level");
            for action in &chain.actions {
                action(resource, router);
            }
        }
    }
}

impl<R> fmt::Debug for ResourceSetup<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels: Vec<_> = self.levels.iter().map(|(name, chain)| (*name, chain.actions.len())).collect();
        f.debug_struct("ResourceSetup").field("levels", &levels).field("order", &self.order).finish()
    }
}

macro_rules! method_action {
    ($name:ident, $method:ident) => {
        #[doc = concat!("Declares a ", stringify!($method), " endpoint calling `f` on the resource.")]
        pub fn $name<F, T>(&mut self, pattern: &str, f: F) -> &mut Self
        where
            F: for<'a> Fn(&'a R, &'a mut RequestContext) -> BoxFuture<'a, T> + Send + Sync + 'static,
            T: Responder + Send + 'static,
        {
            self.route(Some(Method::$method), pattern, f)
        }
    };
}

/// The ordered actions of one declaration level.
pub struct SetupChain<R> {
    actions: Vec<SetupAction<R>>,
}

impl<R: Resource> SetupChain<R> {
    fn new() -> Self {
        Self { actions: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Appends a raw action.
    pub fn action<F>(&mut self, action: F) -> &mut Self
    where
        F: Fn(&Arc<R>, &mut Router) + Send + Sync + 'static,
    {
        self.actions.push(Box::new(action));
        self
    }

    /// Declares an endpoint calling `f` on the resource, `None` as method accepts any method.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid path pattern.
    pub fn route<F, T>(&mut self, method: Option<Method>, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a R, &'a mut RequestContext) -> BoxFuture<'a, T> + Send + Sync + 'static,
        T: Responder + Send + 'static,
    {
        let matcher = match PathMatcher::compile(pattern) {
            Ok(matcher) => matcher,
            Err(e) => panic!("invalid route pattern '{pattern}': {e}"),
        };
        let f = Arc::new(f);
        self.action(move |resource, router| {
            let handler = ResourceHandler { resource: resource.clone(), f: f.clone(), _phantom: PhantomData };
            router.add_route(EndpointRoute::new(method.clone(), matcher.clone(), Box::new(handler)));
        })
    }

    /// Declares an endpoint accepting any method.
    pub fn all<F, T>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a R, &'a mut RequestContext) -> BoxFuture<'a, T> + Send + Sync + 'static,
        T: Responder + Send + 'static,
    {
        self.route(None, pattern, f)
    }

    method_action!(get, GET);
    method_action!(post, POST);
    method_action!(put, PUT);
    method_action!(delete, DELETE);
    method_action!(options, OPTIONS);
    method_action!(head, HEAD);
    method_action!(patch, PATCH);
    method_action!(trace, TRACE);

    /// Declares a sub-mount whose target is chosen by the resource at mount time.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` is not a valid path pattern.
    pub fn mount<F>(&mut self, prefix: &str, target: F) -> &mut Self
    where
        F: Fn(&R) -> MountTarget + Send + Sync + 'static,
    {
        if let Err(e) = PrefixMatcher::compile(prefix) {
            panic!("invalid mount prefix '{prefix}': {e}");
        }
        let prefix = prefix.to_string();
        self.action(move |resource, router| {
            router.mount(&prefix, target(resource.as_ref()));
        })
    }

    /// Declares a static mapping whose target is chosen by the resource at mount time.
    pub fn serve<F, P>(&mut self, pattern: &str, target: F) -> &mut Self
    where
        F: Fn(&R) -> P + Send + Sync + 'static,
        P: AsRef<Path>,
    {
        self.serve_with(pattern, target, SendOptions::default())
    }

    pub fn serve_with<F, P>(&mut self, pattern: &str, target: F, options: SendOptions) -> &mut Self
    where
        F: Fn(&R) -> P + Send + Sync + 'static,
        P: AsRef<Path>,
    {
        let pattern = pattern.to_string();
        self.action(move |resource, router| {
            router.serve_with(&pattern, target(resource.as_ref()), options.clone());
        })
    }

    /// Declares a filter calling `f` on the resource.
    pub fn filter<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a R, &'a mut RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.action(move |resource, router| {
            router.use_filter(ResourceFilter { resource: resource.clone(), f: f.clone() });
        })
    }

    /// Declares the guard calling `f` on the resource. The guard is only installed if the
    /// router has none yet.
    pub fn guard<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a R, &'a mut RequestContext) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.action(move |resource, router| {
            if router.has_guard() {
                debug!(prefix = router.prefix(), "router already guarded, guard declaration skipped");
                return;
            }
            router.with_guard(ResourceGuard { resource: resource.clone(), f: f.clone() });
        })
    }
}

struct ResourceHandler<R, F, T> {
    resource: Arc<R>,
    f: Arc<F>,
    _phantom: PhantomData<fn() -> T>,
}

#[async_trait]
impl<R, F, T> RequestHandler for ResourceHandler<R, F, T>
where
    R: Resource,
    F: for<'a> Fn(&'a R, &'a mut RequestContext) -> BoxFuture<'a, T> + Send + Sync,
    T: Responder + Send,
{
    async fn invoke(&self, ctx: &mut RequestContext) -> HandlerResult {
        let responder = (self.f)(&*self.resource, ctx).await;
        responder.response_to(ctx)
    }
}

struct ResourceFilter<R, F> {
    resource: Arc<R>,
    f: Arc<F>,
}

#[async_trait]
impl<R, F> Filter for ResourceFilter<R, F>
where
    R: Resource,
    F: for<'a> Fn(&'a R, &'a mut RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    async fn filter(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        (self.f)(&*self.resource, ctx, next).await
    }
}

struct ResourceGuard<R, F> {
    resource: Arc<R>,
    f: Arc<F>,
}

#[async_trait]
impl<R, F> Guard for ResourceGuard<R, F>
where
    R: Resource,
    F: for<'a> Fn(&'a R, &'a mut RequestContext) -> BoxFuture<'a, bool> + Send + Sync,
{
    async fn check(&self, ctx: &mut RequestContext) -> bool {
        (self.f)(&*self.resource, ctx).await
    }
}

/// What a mounted router gets populated with.
pub struct MountTarget {
    setup: Option<Box<dyn FnOnce(&mut Router) + Send>>,
}

impl MountTarget {
    /// A bare router, to be configured by hand.
    pub fn empty() -> Self {
        Self { setup: None }
    }

    pub fn instance<R: Resource>(resource: R) -> Self {
        Self::shared(Arc::new(resource))
    }

    /// A resource instance that may also be mounted elsewhere.
    pub fn shared<R: Resource>(resource: Arc<R>) -> Self {
        Self { setup: Some(Box::new(move |router: &mut Router| resource.setup(router))) }
    }

    /// A fresh default instance of `R`.
    pub fn of<R: Resource + Default>() -> Self {
        Self::instance(R::default())
    }

    /// Populates the router with an arbitrary closure.
    pub fn from_fn<F>(setup: F) -> Self
    where
        F: FnOnce(&mut Router) + Send + 'static,
    {
        Self { setup: Some(Box::new(setup)) }
    }

    pub(crate) fn setup(self, router: &mut Router) {
        if let Some(setup) = self.setup {
            setup(router);
        }
    }
}

impl Default for MountTarget {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R: Resource> From<Arc<R>> for MountTarget {
    fn from(resource: Arc<R>) -> Self {
        Self::shared(resource)
    }
}

impl fmt::Debug for MountTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountTarget").field("empty", &self.setup.is_none()).finish()
    }
}

mod registry {
    use super::{Any, ArcSwap, Arc, HashMap, Lazy, Resource, ResourceSetup, TypeId};

    type Registry = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

    static REGISTRY: Lazy<ArcSwap<Registry>> = Lazy::new(|| ArcSwap::from_pointee(HashMap::new()));

    /// Returns the declaration of `R`, declaring it on first use.
    pub(super) fn lookup<R: Resource>() -> Arc<ResourceSetup<R>> {
        if let Some(setup) = cached::<R>(&REGISTRY.load()) {
            return setup;
        }

        let mut setup = ResourceSetup::new();
        R::declare(&mut setup);
        let declared = Arc::new(setup);

        let entry: Arc<dyn Any + Send + Sync> = declared.clone();
        REGISTRY.rcu(|current| {
            let mut next = Registry::clone(current);
            next.entry(TypeId::of::<R>()).or_insert_with(|| entry.clone());
            next
        });

        // a concurrent first mount may have won the race
        cached::<R>(&REGISTRY.load()).unwrap_or(declared)
    }

    fn cached<R: Resource>(registry: &Registry) -> Option<Arc<ResourceSetup<R>>> {
        registry.get(&TypeId::of::<R>()).cloned().and_then(|entry| entry.downcast::<ResourceSetup<R>>().ok())
    }

    #[cfg(test)]
    pub(super) fn contains<R: Resource>() -> bool {
        REGISTRY.load().contains_key(&TypeId::of::<R>())
    }
}
