//! Static file transfer.
//!
//! [`send`] resolves a routed path below a target file or directory and streams the file
//! back. Traversal outside the target is refused with `403` and hidden files (a segment
//! starting with `.`) are reported as missing unless [`SendOptions::hidden`] is set.

use crate::body::ResponseBody;
use futures::TryStreamExt;
use http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Method, Response};
use http_body::Frame;
use http_body_util::StreamBody;
use mime::Mime;
use percent_encoding::percent_decode_str;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SendOptions {
    /// File served when the resolved path is a directory, `None` disables directory indexes.
    pub index: Option<String>,
    /// Allow serving files and directories whose name starts with a dot.
    pub hidden: bool,
    pub max_age: Duration,
    pub immutable: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self { index: Some("index.html".to_string()), hidden: false, max_age: Duration::ZERO, immutable: false }
    }
}

impl SendOptions {
    #[must_use]
    pub fn with_index(mut self, index: Option<&str>) -> Self {
        self.index = index.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_immutable(mut self, immutable: bool) -> Self {
        self.immutable = immutable;
        self
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("path escapes the served root")]
    Forbidden,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Streams the file designated by `rest` below `target`.
///
/// `rest` is the routed path left after the mount prefix: `/` designates the target
/// itself, anything else is resolved segment by segment below it.
pub async fn send(method: &Method, target: &Path, rest: &str, opts: &SendOptions) -> Result<Response<ResponseBody>, SendError> {
    let mut path = resolve(target, rest, opts)?;

    let mut metadata = tokio::fs::metadata(&path).await?;
    if metadata.is_dir() {
        let index = opts.index.as_deref().ok_or_else(|| not_found("directory index disabled"))?;
        path.push(index);
        metadata = tokio::fs::metadata(&path).await?;
        if metadata.is_dir() {
            return Err(not_found("index is a directory").into());
        }
    }

    debug!(path = %path.display(), len = metadata.len(), "sending file");

    let body = if *method == Method::HEAD {
        ResponseBody::empty()
    } else {
        let file = File::open(&path).await?;
        let frames = ReaderStream::new(file).map_ok(Frame::data);
        ResponseBody::stream(StreamBody::new(frames))
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type(&path).as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    let mut cache_control = format!("max-age={}", opts.max_age.as_secs());
    if opts.immutable {
        cache_control.push_str(",immutable");
    }
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        headers.insert(CACHE_CONTROL, value);
    }

    Ok(response)
}

fn not_found(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, reason.to_string())
}

fn resolve(target: &Path, rest: &str, opts: &SendOptions) -> Result<PathBuf, SendError> {
    let mut path = target.to_path_buf();
    for raw in rest.split('/').filter(|segment| !segment.is_empty()) {
        let segment = percent_decode_str(raw).decode_utf8_lossy();
        match segment.as_ref() {
            "." => continue,
            ".." => return Err(SendError::Forbidden),
            s if s.contains(['/', '\\', '\0']) => return Err(SendError::Forbidden),
            s if s.starts_with('.') && !opts.hidden => return Err(not_found("hidden file").into()),
            s => path.push(s),
        }
    }
    Ok(path)
}

fn content_type(path: &Path) -> Mime {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => mime::TEXT_HTML_UTF_8,
        Some("txt") => mime::TEXT_PLAIN_UTF_8,
        Some("css") => mime::TEXT_CSS_UTF_8,
        Some("csv") => mime::TEXT_CSV_UTF_8,
        Some("js" | "mjs") => mime::APPLICATION_JAVASCRIPT_UTF_8,
        Some("json") => mime::APPLICATION_JSON,
        Some("xml") => mime::TEXT_XML,
        Some("pdf") => mime::APPLICATION_PDF,
        Some("svg") => mime::IMAGE_SVG,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg" | "jpeg") => mime::IMAGE_JPEG,
        Some("gif") => mime::IMAGE_GIF,
        Some("bmp") => mime::IMAGE_BMP,
        Some("woff") => mime::FONT_WOFF,
        Some("woff2") => mime::FONT_WOFF2,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}
