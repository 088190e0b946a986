//! Lazily parsed request bodies.
//!
//! Nothing is read from the connection until a handler asks for
//! [`RequestContext::payload`](crate::RequestContext::payload). The first call collects
//! the body (bounded by [`BodyOptions::limit`]), inflates it according to
//! `Content-Encoding` and parses it according to `Content-Type`. Later calls return the
//! cached result.
//!
//! Multipart bodies are split with `multer`: plain parts become [`LazyBody::params`],
//! parts carrying a file name become [`LazyBody::files`].

use crate::body::OptionReqBody;
use crate::error::{HttpError, RouteError};
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use mime::Mime;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::io::Read;
use tracing::debug;

const DEFAULT_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct BodyOptions {
    /// Maximum body size in bytes, after inflation.
    pub limit: usize,
}

impl Default for BodyOptions {
    fn default() -> Self {
        Self { limit: DEFAULT_LIMIT }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Multipart,
    Form,
    Json,
    Xml,
    Text,
}

/// A file part of a multipart body.
#[derive(Debug, Clone)]
pub struct MultipartFile {
    /// Name of the form field the file was sent under.
    pub field: String,
    pub file_name: String,
    pub content_type: Option<Mime>,
    pub data: Bytes,
}

#[derive(Debug)]
enum Data {
    Raw,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    Multipart { fields: Vec<(String, String)>, files: Vec<MultipartFile> },
}

/// A request body read and classified by content type.
#[derive(Debug)]
pub struct LazyBody {
    kind: BodyKind,
    raw: Bytes,
    text: String,
    data: Data,
}

impl LazyBody {
    pub(crate) async fn read(headers: &HeaderMap, body: &OptionReqBody, opts: &BodyOptions) -> Result<Self, RouteError> {
        let content_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).unwrap_or_default();
        let kind = classify(content_type).ok_or_else(|| {
            HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Attempting to read text body from an unsupported request content type: {content_type}"),
            )
        })?;

        let raw = inflate(headers, collect(headers, body, opts).await?, opts.limit)?;
        debug!(kind = ?kind, len = raw.len(), "request body read");

        if kind == BodyKind::Multipart {
            let data = parse_multipart(content_type, raw.clone()).await?;
            return Ok(Self { kind, raw, text: String::new(), data });
        }

        let text = std::str::from_utf8(&raw)
            .map_err(|e| bad_request("request body is not valid utf-8", e))?
            .to_string();
        let data = match kind {
            BodyKind::Form => Data::Form(
                serde_urlencoded::from_str::<Vec<(String, String)>>(&text)
                    .map_err(|e| bad_request("invalid urlencoded body", e))?,
            ),
            BodyKind::Json => Data::Json(serde_json::from_str(&text).map_err(|e| bad_request("invalid json body", e))?),
            _ => Data::Raw,
        };
        Ok(Self { kind, raw, text, data })
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    pub fn is_multipart(&self) -> bool {
        self.kind == BodyKind::Multipart
    }

    pub fn is_form(&self) -> bool {
        self.kind == BodyKind::Form
    }

    pub fn is_json(&self) -> bool {
        self.kind == BodyKind::Json
    }

    pub fn is_xml(&self) -> bool {
        self.kind == BodyKind::Xml
    }

    pub fn is_text(&self) -> bool {
        self.kind == BodyKind::Text
    }

    /// The decoded body text, empty for multipart bodies.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The inflated body bytes.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        match &self.data {
            Data::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Deserializes a json body into `T`; a body of another kind fails with 415, a json
    /// document of the wrong shape with 400.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, RouteError> {
        self.assert_json()?;
        serde_json::from_str(&self.text).map_err(|e| bad_request("unexpected json body", e))
    }

    pub fn xml(&self) -> Option<&str> {
        self.is_xml().then_some(self.text.as_str())
    }

    pub fn form(&self) -> Option<&[(String, String)]> {
        match &self.data {
            Data::Form(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Form parameters: the urlencoded pairs, or the non-file parts of a multipart body.
    pub fn params(&self) -> Option<&[(String, String)]> {
        match &self.data {
            Data::Form(pairs) | Data::Multipart { fields: pairs, .. } => Some(pairs),
            _ => None,
        }
    }

    /// Uploaded files of a multipart body.
    pub fn files(&self) -> Option<&[MultipartFile]> {
        match &self.data {
            Data::Multipart { files, .. } => Some(files),
            _ => None,
        }
    }

    pub fn assert_json(&self) -> Result<(), RouteError> {
        self.assert_kind(&[BodyKind::Json], StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected a json body")
    }

    pub fn assert_xml(&self) -> Result<(), RouteError> {
        self.assert_kind(&[BodyKind::Xml], StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected an xml body")
    }

    pub fn assert_form(&self) -> Result<(), RouteError> {
        self.assert_kind(&[BodyKind::Form], StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected an urlencoded body")
    }

    pub fn assert_multipart(&self) -> Result<(), RouteError> {
        self.assert_kind(&[BodyKind::Multipart], StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected a multipart body")
    }

    pub fn assert_text(&self) -> Result<(), RouteError> {
        self.assert_kind(&[BodyKind::Text], StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected a text body")
    }

    /// Accepts urlencoded and multipart bodies.
    pub fn assert_params(&self) -> Result<(), RouteError> {
        self.assert_kind(
            &[BodyKind::Form, BodyKind::Multipart],
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected form parameters",
        )
    }

    /// Fails with `status` and `message` unless the body is one of `kinds`.
    pub fn assert_kind(&self, kinds: &[BodyKind], status: StatusCode, message: &str) -> Result<(), RouteError> {
        if kinds.contains(&self.kind) { Ok(()) } else { Err(HttpError::new(status, message).into()) }
    }
}

fn classify(content_type: &str) -> Option<BodyKind> {
    let mime = content_type.parse::<Mime>().ok()?;
    let is = |name: mime::Name<'_>| mime.subtype() == name || mime.suffix() == Some(name);

    if mime.type_() == mime::MULTIPART {
        Some(BodyKind::Multipart)
    } else if mime.type_() == mime::APPLICATION && mime.subtype() == mime::WWW_FORM_URLENCODED {
        Some(BodyKind::Form)
    } else if is(mime::JSON) {
        Some(BodyKind::Json)
    } else if is(mime::XML) {
        Some(BodyKind::Xml)
    } else if mime.type_() == mime::TEXT {
        Some(BodyKind::Text)
    } else {
        None
    }
}

async fn collect(headers: &HeaderMap, body: &OptionReqBody, opts: &BodyOptions) -> Result<Bytes, RouteError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.is_some_and(|len| len > opts.limit) {
        return Err(too_large(opts.limit));
    }

    let body = body
        .take()
        .await
        .ok_or_else(|| HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "request body already consumed"))?;

    match Limited::new(body, opts.limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(too_large(opts.limit)),
        Err(e) => Err(RouteError::from(e)),
    }
}

async fn parse_multipart(content_type: &str, raw: Bytes) -> Result<Data, RouteError> {
    let boundary = multer::parse_boundary(content_type).map_err(|e| bad_request("invalid multipart content type", e))?;
    let mut multipart = multer::Multipart::new(futures::stream::once(async move { Ok::<_, Infallible>(raw) }), boundary);

    let mut fields = Vec::new();
    let mut files = Vec::new();
    while let Some(part) = multipart.next_field().await.map_err(|e| bad_request("invalid multipart body", e))? {
        let field = part.name().unwrap_or_default().to_string();
        if let Some(file_name) = part.file_name().map(str::to_string) {
            let content_type = part.content_type().cloned();
            let data = part.bytes().await.map_err(|e| bad_request("invalid multipart body", e))?;
            files.push(MultipartFile { field, file_name, content_type, data });
        } else {
            let value = part.text().await.map_err(|e| bad_request("invalid multipart body", e))?;
            fields.push((field, value));
        }
    }
    debug!(fields = fields.len(), files = files.len(), "multipart body parsed");
    Ok(Data::Multipart { fields, files })
}

fn inflate(headers: &HeaderMap, raw: Bytes, limit: usize) -> Result<Bytes, RouteError> {
    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let reader: Box<dyn Read + '_> = match encoding.as_str() {
        "" | "identity" => return Ok(raw),
        "gzip" | "x-gzip" => Box::new(GzDecoder::new(raw.as_ref())),
        "deflate" => Box::new(ZlibDecoder::new(raw.as_ref())),
        other => {
            return Err(HttpError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("unsupported content encoding: {other}"),
            )
            .into());
        }
    };

    let mut inflated = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| bad_request("invalid compressed body", e))?;
    if inflated.len() > limit {
        return Err(too_large(limit));
    }
    Ok(Bytes::from(inflated))
}

fn too_large(limit: usize) -> RouteError {
    HttpError::new(StatusCode::PAYLOAD_TOO_LARGE, format!("request body exceeds {limit} bytes")).into()
}

fn bad_request(message: &str, source: impl std::error::Error + Send + Sync + 'static) -> RouteError {
    HttpError::new(StatusCode::BAD_REQUEST, message).with_detail(source.to_string()).with_source(source).into()
}
