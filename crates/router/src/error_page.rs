//! Turns a [`RouteError`] into an HTTP response.
//!
//! The representation is negotiated from the `Accept` header among html, json, xml and
//! plain text. Each representation can be replaced by a custom formatter through
//! [`ErrorHandlerOptions`], and html errors are first looked up as `<status>.html` files
//! under the configured html root.

use crate::body::ResponseBody;
use crate::error::RouteError;
use crate::request::RequestContext;
use http::header::{ACCEPT, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Response, StatusCode};
use mime::Mime;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

/// Formats the body of one representation.
pub type ErrorFormatter = Arc<dyn Fn(&ErrorInfo, &RouteError) -> String + Send + Sync>;

/// Post-processes an html error file read from the html root.
pub type HtmlRenderer = Arc<dyn Fn(String, &ErrorInfo, &RouteError) -> String + Send + Sync>;

/// Replaces delegation: when set, every rendered error is reported here and nowhere else.
pub type ErrorLogger = Arc<dyn Fn(&RequestContext, &RouteError, &ErrorInfo) + Send + Sync>;

/// Application level error hook receiving server errors the routers delegate upward.
pub type ErrorHook = Arc<dyn Fn(&RouteError, &RequestContext) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorContentType {
    Html,
    Json,
    Xml,
    Text,
}

impl ErrorContentType {
    const ALL: [ErrorContentType; 4] =
        [ErrorContentType::Html, ErrorContentType::Json, ErrorContentType::Xml, ErrorContentType::Text];

    pub fn mime(self) -> Mime {
        match self {
            ErrorContentType::Html => mime::TEXT_HTML_UTF_8,
            ErrorContentType::Json => mime::APPLICATION_JSON,
            ErrorContentType::Xml => mime::TEXT_XML,
            ErrorContentType::Text => mime::TEXT_PLAIN_UTF_8,
        }
    }

    fn accepted_by(self, range: &Mime) -> bool {
        let (ty, subtype) = match self {
            ErrorContentType::Html => ("text", "html"),
            ErrorContentType::Json => ("application", "json"),
            ErrorContentType::Text => ("text", "plain"),
            ErrorContentType::Xml => {
                return [("text", "xml"), ("application", "xml")].iter().any(|(t, s)| range_covers(range, t, s));
            }
        };
        range_covers(range, ty, subtype)
    }
}

fn range_covers(range: &Mime, ty: &str, subtype: &str) -> bool {
    let type_ok = range.type_() == mime::STAR || range.type_() == ty;
    let subtype_ok = range.subtype() == mime::STAR || range.subtype() == subtype;
    type_ok && subtype_ok
}

/// What the formatters get to see about an error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub status: u16,
    /// The reason phrase of the status.
    pub error: String,
    #[serde(skip)]
    pub expose: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorInfo {
    pub fn from_error(err: &RouteError) -> Self {
        let status = err.status();
        let expose = err.expose();
        let error = status
            .canonical_reason()
            .or_else(|| StatusCode::INTERNAL_SERVER_ERROR.canonical_reason())
            .unwrap_or_default()
            .to_string();
        let message = if expose { Some(err.message()).filter(|m| !m.is_empty()) } else { None };
        let detail = if expose { err.detail().map(str::to_string) } else { None };
        Self { status: status.as_u16(), error, expose, message, detail }
    }
}

/// Presentation options of a router's error handler.
#[derive(Clone, Default)]
pub struct ErrorHandlerOptions {
    /// Directory holding `<status>.html` error pages.
    pub html_root: Option<PathBuf>,
    pub render_html: Option<HtmlRenderer>,
    /// Content types offered before the default ones.
    pub content_types: Vec<ErrorContentType>,
    pub json: Option<ErrorFormatter>,
    pub xml: Option<ErrorFormatter>,
    pub html: Option<ErrorFormatter>,
    pub text: Option<ErrorFormatter>,
    pub log: Option<ErrorLogger>,
}

impl ErrorHandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_html_root(mut self, html_root: impl Into<PathBuf>) -> Self {
        self.html_root = Some(html_root.into());
        self
    }

    #[must_use]
    pub fn with_render_html<F>(mut self, render: F) -> Self
    where
        F: Fn(String, &ErrorInfo, &RouteError) -> String + Send + Sync + 'static,
    {
        self.render_html = Some(Arc::new(render));
        self
    }

    #[must_use]
    pub fn with_content_types(mut self, content_types: impl IntoIterator<Item = ErrorContentType>) -> Self {
        self.content_types = content_types.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_formatter<F>(mut self, content_type: ErrorContentType, formatter: F) -> Self
    where
        F: Fn(&ErrorInfo, &RouteError) -> String + Send + Sync + 'static,
    {
        let formatter: ErrorFormatter = Arc::new(formatter);
        match content_type {
            ErrorContentType::Html => self.html = Some(formatter),
            ErrorContentType::Json => self.json = Some(formatter),
            ErrorContentType::Xml => self.xml = Some(formatter),
            ErrorContentType::Text => self.text = Some(formatter),
        }
        self
    }

    #[must_use]
    pub fn with_log<F>(mut self, log: F) -> Self
    where
        F: Fn(&RequestContext, &RouteError, &ErrorInfo) + Send + Sync + 'static,
    {
        self.log = Some(Arc::new(log));
        self
    }

    fn formatter(&self, content_type: ErrorContentType) -> Option<&ErrorFormatter> {
        match content_type {
            ErrorContentType::Html => self.html.as_ref(),
            ErrorContentType::Json => self.json.as_ref(),
            ErrorContentType::Xml => self.xml.as_ref(),
            ErrorContentType::Text => self.text.as_ref(),
        }
    }
}

impl fmt::Debug for ErrorHandlerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlerOptions")
            .field("html_root", &self.html_root)
            .field("render_html", &self.render_html.is_some())
            .field("content_types", &self.content_types)
            .field("json", &self.json.is_some())
            .field("xml", &self.xml.is_some())
            .field("html", &self.html.is_some())
            .field("text", &self.text.is_some())
            .field("log", &self.log.is_some())
            .finish()
    }
}

/// Renders `err` as a response and reports it according to the delegation rules.
///
/// Pending response headers of the context are dropped, except
/// `Access-Control-Allow-Origin` so that browsers can still read the error.
pub async fn render_error(ctx: &mut RequestContext, err: &RouteError, opts: &ErrorHandlerOptions) -> Response<ResponseBody> {
    let allow_origin = ctx.response_headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).cloned();
    let pending = ctx.response_headers_mut();
    pending.clear();
    if let Some(value) = allow_origin {
        pending.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }

    let info = ErrorInfo::from_error(err);
    let content_type = negotiate(ctx.headers().get(ACCEPT), err.content_types(), &opts.content_types);

    let content = match opts.formatter(content_type) {
        Some(formatter) => formatter(&info, err),
        None => match content_type {
            ErrorContentType::Html => html_page(&info, err, opts).await,
            ErrorContentType::Json => serde_json::to_string(&info).unwrap_or_default(),
            ErrorContentType::Xml => xml_document(&info),
            ErrorContentType::Text => plain_text(&info),
        },
    };

    let length = content.len();
    let mut response = Response::new(ResponseBody::from(content));
    *response.status_mut() = err.status();
    let headers = response.headers_mut();
    if let Some(extra) = err.headers() {
        for (name, value) in extra {
            headers.append(name, value.clone());
        }
    }
    if let Ok(value) = HeaderValue::from_str(content_type.mime().as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));

    if let Some(log) = &opts.log {
        log(&*ctx, err, &info);
    } else if info.status >= 500 {
        match ctx.error_hook() {
            Some(hook) => hook(err, &*ctx),
            None => error!(status = info.status, cause = %err, "request failed"),
        }
    } else {
        debug!(status = info.status, cause = %err, "request rejected");
    }

    response
}

/// Picks the representation: the error's own types, then the configured ones, then the
/// defaults. A request without `Accept` gets the first candidate of the first non-empty
/// list, a request accepting none of them gets plain text.
fn negotiate(
    accept: Option<&HeaderValue>,
    forced: &[ErrorContentType],
    configured: &[ErrorContentType],
) -> ErrorContentType {
    let Some(accept) = accept.and_then(|value| value.to_str().ok()) else {
        return forced.first().or_else(|| configured.first()).copied().unwrap_or(ErrorContentType::Html);
    };

    let ranges = parse_accept(accept);
    [forced, configured, &ErrorContentType::ALL[..]]
        .into_iter()
        .filter(|candidates| !candidates.is_empty())
        .find_map(|candidates| best_match(&ranges, candidates))
        .unwrap_or(ErrorContentType::Text)
}

fn parse_accept(accept: &str) -> Vec<(Mime, f32)> {
    accept
        .split(',')
        .filter_map(|item| item.trim().parse::<Mime>().ok())
        .map(|range| {
            let quality = range.get_param("q").and_then(|q| q.as_str().parse::<f32>().ok()).unwrap_or(1.0);
            (range, quality)
        })
        .collect()
}

fn best_match(ranges: &[(Mime, f32)], candidates: &[ErrorContentType]) -> Option<ErrorContentType> {
    let mut best: Option<(ErrorContentType, f32)> = None;
    for &candidate in candidates {
        let quality = ranges
            .iter()
            .filter(|(range, _)| candidate.accepted_by(range))
            .map(|(_, q)| *q)
            .fold(0.0_f32, f32::max);
        if quality > 0.0 && best.is_none_or(|(_, q)| quality > q) {
            best = Some((candidate, quality));
        }
    }
    best.map(|(candidate, _)| candidate)
}

async fn html_page(info: &ErrorInfo, err: &RouteError, opts: &ErrorHandlerOptions) -> String {
    if let Some(root) = &opts.html_root {
        let file = root.join(format!("{}.html", info.status));
        if let Ok(content) = tokio::fs::read_to_string(&file).await {
            return match &opts.render_html {
                Some(render) => render(content, info, err),
                None => content,
            };
        }
    }

    let title = format!("{} {}", info.status, info.error);
    let message = info.message.as_deref().map(|m| format!("<p>{}</p>", escape(m))).unwrap_or_default();
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"/><title>{title}</title></head>\
         <body style='padding:20px'><h1>{title}</h1>{message}</body></html>"
    )
}

fn xml_document(info: &ErrorInfo) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><error status=\"{}\" code=\"{}\">{}</error>",
        info.status,
        escape(&info.error),
        escape(info.message.as_deref().unwrap_or_default())
    )
}

fn plain_text(info: &ErrorInfo) -> String {
    let mut content = format!("{} {}\n\n", info.status, info.error);
    if let Some(message) = &info.message {
        content.push_str(message);
        content.push('\n');
    }
    content
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
