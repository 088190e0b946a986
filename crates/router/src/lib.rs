//! A resource based async http router.
//!
//! Resource types declare routes, guards, filters, sub-mounts and static file mappings;
//! mounting a resource assembles those declarations into a tree of [`Router`]s evaluated
//! per request. The [`server`] module serves a router tree over HTTP/1 with hyper.

mod body;
mod error;
mod error_page;
mod handler;
mod path;
mod payload;
mod request;
mod resource;
mod responder;
mod router;
mod send;

pub mod filter;
pub mod guard;
pub mod route;
pub mod server;

pub use body::BoxError;
pub use body::OptionReqBody;
pub use body::ReqBody;
pub use body::ResponseBody;
pub use error::HttpError;
pub use error::RouteError;
pub use error_page::render_error;
pub use error_page::ErrorContentType;
pub use error_page::ErrorFormatter;
pub use error_page::ErrorHandlerOptions;
pub use error_page::ErrorHook;
pub use error_page::ErrorInfo;
pub use error_page::ErrorLogger;
pub use error_page::HtmlRenderer;
pub use handler::handler_fn;
pub use handler::FnHandler;
pub use handler::RequestHandler;
pub use path::normalize_path;
pub use path::CompiledPattern;
pub use path::PathMatcher;
pub use path::PatternError;
pub use path::PrefixMatch;
pub use path::PrefixMatcher;
pub use payload::BodyKind;
pub use payload::BodyOptions;
pub use payload::LazyBody;
pub use payload::MultipartFile;
pub use request::PathParams;
pub use request::RequestContext;
pub use resource::apply_setup;
pub use resource::MountTarget;
pub use resource::Resource;
pub use resource::ResourceOptions;
pub use resource::ResourceSetup;
pub use resource::SetupAction;
pub use resource::SetupChain;
pub use resource::WalkOrder;
pub use responder::HandlerResult;
pub use responder::Json;
pub use responder::Responder;
pub use router::Router;
pub use send::send;
pub use send::SendError;
pub use send::SendOptions;
