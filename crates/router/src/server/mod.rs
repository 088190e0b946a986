//! Serves a router tree over HTTP/1 with hyper.
//!
//! [`Server::start`] runs the lifecycle in order: the [`ServerHooks::setup`] hook may still
//! register routes, then the router is frozen behind an `Arc`, [`ServerHooks::on_start`]
//! runs, signal handlers are installed and the listener is bound. The returned
//! [`ServerHandle`] stops the server and waits for [`ServerHooks::on_stop`].
//!
//! ```no_run
//! use micro_router::server::{Server, StartOptions};
//! use micro_router::{handler_fn, Router};
//! use futures::FutureExt;
//!
//! # async fn run() -> Result<(), micro_router::server::ServerError> {
//! let mut router = Router::new();
//! router.get("/hello", handler_fn(|_ctx| async { "hello" }.boxed()));
//!
//! let handle = Server::builder().router(router).build()?.start(8080, StartOptions::default()).await?;
//! handle.wait().await;
//! # Ok(())
//! # }
//! ```

mod shutdown;
mod signals;

use crate::body::{BoxError, ResponseBody};
use crate::error::RouteError;
use crate::error_page::ErrorHook;
use crate::handler::RequestHandler;
use crate::payload::BodyOptions;
use crate::request::RequestContext;
use crate::router::Router;
use async_trait::async_trait;
use http::{Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use shutdown::Shutdown;
use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Lifecycle callbacks of a [`Server`], every method defaults to doing nothing.
#[async_trait]
pub trait ServerHooks: Send + Sync {
    /// Last chance to register routes before the router is frozen.
    async fn setup(&self, _router: &mut Router) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_listening(&self, _addr: SocketAddr) {}

    async fn on_stop(&self) {}
}

#[derive(Debug)]
struct NoHooks;

impl ServerHooks for NoHooks {}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("router must be set")]
    MissingRouter,

    #[error("no address found for host {0}")]
    Address(String),

    #[error("lifecycle hook failed")]
    Hook(#[source] BoxError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct ServerBuilder {
    router: Option<Router>,
    hooks: Option<Arc<dyn ServerHooks>>,
    default_handler: Option<Box<dyn RequestHandler>>,
    on_error: Option<ErrorHook>,
    body_options: BodyOptions,
    signal_handlers: bool,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            router: None,
            hooks: None,
            default_handler: None,
            on_error: None,
            body_options: BodyOptions::default(),
            signal_handlers: true,
        }
    }

    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: impl ServerHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Handles requests outside the root router's prefix, they get a 404 otherwise.
    #[must_use]
    pub fn default_handler(mut self, request_handler: impl RequestHandler + 'static) -> Self {
        self.default_handler = Some(Box::new(request_handler));
        self
    }

    /// Receives the server errors (status >= 500) routers without a log hook delegate upward.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RouteError, &RequestContext) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn body_options(mut self, body_options: BodyOptions) -> Self {
        self.body_options = body_options;
        self
    }

    /// Whether SIGINT and SIGTERM stop the server, enabled by default.
    #[must_use]
    pub fn signal_handlers(mut self, enabled: bool) -> Self {
        self.signal_handlers = enabled;
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        let router = self.router.ok_or(ServerError::MissingRouter)?;
        Ok(Server {
            router,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoHooks)),
            default_handler: self.default_handler,
            on_error: self.on_error,
            body_options: self.body_options,
            signal_handlers: self.signal_handlers,
        })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("router", &self.router)
            .field("body_options", &self.body_options)
            .field("signal_handlers", &self.signal_handlers)
            .finish_non_exhaustive()
    }
}

/// Where and how [`Server::start`] listens.
pub struct StartOptions {
    pub host: String,
    pub backlog: u32,
    /// Called with the bound address once the server accepts connections.
    pub callback: Option<Box<dyn FnOnce(SocketAddr) + Send>>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), backlog: 1024, callback: None }
    }
}

impl StartOptions {
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    #[must_use]
    pub fn with_callback<F: FnOnce(SocketAddr) + Send + 'static>(mut self, callback: F) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartOptions")
            .field("host", &self.host)
            .field("backlog", &self.backlog)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

pub struct Server {
    router: Router,
    hooks: Arc<dyn ServerHooks>,
    default_handler: Option<Box<dyn RequestHandler>>,
    on_error: Option<ErrorHook>,
    body_options: BodyOptions,
    signal_handlers: bool,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("router", &self.router)
            .field("body_options", &self.body_options)
            .field("signal_handlers", &self.signal_handlers)
            .finish_non_exhaustive()
    }
}

/// The state shared by every connection of a running server.
struct Service {
    router: Router,
    default_handler: Option<Box<dyn RequestHandler>>,
    on_error: Option<ErrorHook>,
    body_options: BodyOptions,
}

impl Service {
    async fn call(&self, request: Request<Incoming>) -> Response<ResponseBody> {
        let mut ctx = RequestContext::new(request).with_body_options(self.body_options);
        if let Some(hook) = &self.on_error {
            ctx = ctx.with_error_hook(Arc::clone(hook));
        }
        self.router.handle(&mut ctx, self.default_handler.as_deref()).await
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Runs the startup sequence and returns once the server is listening on `port`.
    ///
    /// # Errors
    ///
    /// Fails if a startup hook fails or the address cannot be resolved or bound.
    pub async fn start(self, port: u16, options: StartOptions) -> Result<ServerHandle, ServerError> {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            debug!("global tracing subscriber already set");
        }

        let Server { mut router, hooks, default_handler, on_error, body_options, signal_handlers } = self;

        hooks.setup(&mut router).await.map_err(ServerError::Hook)?;
        let service = Arc::new(Service { router, default_handler, on_error, body_options });
        hooks.on_start().await.map_err(ServerError::Hook)?;

        let shutdown = Shutdown::new();
        if signal_handlers {
            signals::spawn(shutdown.clone());
        }

        let listener = match bind(&options.host, port, options.backlog).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(host = %options.host, port, cause = %e, "bind server error");
                // listeners spawned above end with the stop request
                shutdown.trigger();
                return Err(e);
            }
        };
        let local_addr = listener.local_addr()?;
        info!("start listening at {local_addr}");

        let accept = tokio::spawn(accept_loop(listener, service, shutdown.subscribe()));
        {
            let hooks = Arc::clone(&hooks);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = accept.await {
                    error!(cause = %e, "accept loop aborted");
                }
                hooks.on_stop().await;
                info!(%local_addr, "server stopped");
                shutdown.mark_stopped();
            });
        }

        hooks.on_listening(local_addr).await;
        if let Some(callback) = options.callback {
            callback(local_addr);
        }

        Ok(ServerHandle { local_addr, shutdown })
    }
}

async fn bind(host: &str, port: u16, backlog: u32) -> Result<TcpListener, ServerError> {
    let addr = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| ServerError::Address(host.to_string()))?;

    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(backlog)?)
}

async fn accept_loop(listener: TcpListener, service: Arc<Service>, mut stop: broadcast::Receiver<()>) {
    loop {
        let (tcp_stream, remote_addr) = tokio::select! {
            _ = stop.recv() => {
                info!("stop accepting connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            },
        };

        let service = Arc::clone(&service);
        let stop = stop.resubscribe();
        tokio::spawn(serve_connection(tcp_stream, remote_addr, service, stop));
    }
}

async fn serve_connection(
    tcp_stream: TcpStream,
    remote_addr: SocketAddr,
    service: Arc<Service>,
    mut stop: broadcast::Receiver<()>,
) {
    let service = service_fn(move |request: Request<Incoming>| {
        let service = Arc::clone(&service);
        async move { Ok::<_, Infallible>(service.call(request).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(tcp_stream), service);
    let mut connection = std::pin::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = stop.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };

    match result {
        Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
        Err(e) => warn!(%remote_addr, cause = %e, "service has error, connection shutdown"),
    }
}

/// Controls a running [`Server`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Shutdown,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_stopped()
    }

    /// Stops accepting connections and waits for the `on_stop` hook. Open connections are
    /// asked to close after their in-flight request.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        self.shutdown.stopped().await;
    }

    /// Resolves when the server stops, whether through [`ServerHandle::stop`] or a signal.
    pub async fn wait(&self) {
        self.shutdown.stopped().await;
    }
}
