//! Conversion of handler return values into responses.
//!
//! Handlers return anything implementing [`Responder`]. Failures flow through the same
//! path: `Option::None` becomes a 404 and `Result::Err` becomes the corresponding
//! [`RouteError`], which the router renders at its dispatch boundary.

use crate::body::ResponseBody;
use crate::error::RouteError;
use crate::request::RequestContext;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Response, StatusCode};
use serde::Serialize;

/// The outcome of a handler, a filter or a route.
pub type HandlerResult = Result<Response<ResponseBody>, RouteError>;

/// A trait for types that can be converted into HTTP responses.
pub trait Responder {
    fn response_to(self, ctx: &RequestContext) -> HandlerResult;
}

impl<T: Responder, E: Into<RouteError>> Responder for Result<T, E> {
    fn response_to(self, ctx: &RequestContext) -> HandlerResult {
        match self {
            Ok(t) => t.response_to(ctx),
            Err(e) => Err(e.into()),
        }
    }
}

/// `None` means the resource does not exist.
impl<T: Responder> Responder for Option<T> {
    fn response_to(self, ctx: &RequestContext) -> HandlerResult {
        match self {
            Some(t) => t.response_to(ctx),
            None => Err(RouteError::NotFound),
        }
    }
}

impl<B> Responder for Response<B>
where
    B: Into<ResponseBody>,
{
    fn response_to(self, _ctx: &RequestContext) -> HandlerResult {
        Ok(self.map(Into::into))
    }
}

impl<T: Responder> Responder for (StatusCode, T) {
    fn response_to(self, ctx: &RequestContext) -> HandlerResult {
        let (status, responder) = self;
        let mut response = responder.response_to(ctx)?;
        *response.status_mut() = status;
        Ok(response)
    }
}

impl<T: Responder> Responder for Box<T> {
    fn response_to(self, ctx: &RequestContext) -> HandlerResult {
        (*self).response_to(ctx)
    }
}

impl Responder for () {
    fn response_to(self, _ctx: &RequestContext) -> HandlerResult {
        Ok(Response::new(ResponseBody::empty()))
    }
}

impl Responder for Bytes {
    fn response_to(self, _ctx: &RequestContext) -> HandlerResult {
        Ok(with_content_type(ResponseBody::from(self), HeaderValue::from_static("application/octet-stream")))
    }
}

impl Responder for &'static str {
    fn response_to(self, _ctx: &RequestContext) -> HandlerResult {
        Ok(with_content_type(ResponseBody::from(self), HeaderValue::from_static("text/plain; charset=utf-8")))
    }
}

impl Responder for String {
    fn response_to(self, _ctx: &RequestContext) -> HandlerResult {
        Ok(with_content_type(ResponseBody::from(self), HeaderValue::from_static("text/plain; charset=utf-8")))
    }
}

/// Serializes the wrapped value as an `application/json` response.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize> Responder for Json<T> {
    fn response_to(self, _ctx: &RequestContext) -> HandlerResult {
        let bytes = serde_json::to_vec(&self.0).map_err(RouteError::internal)?;
        Ok(with_content_type(ResponseBody::from(bytes), HeaderValue::from_static("application/json")))
    }
}

fn with_content_type(body: ResponseBody, content_type: HeaderValue) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

#[cfg(test)]
mod tests {
    use super::{Json, Responder};
    use crate::error::{HttpError, RouteError};
    use crate::request::RequestContext;
    use bytes::Bytes;
    use http::header::CONTENT_TYPE;
    use http::{Request, StatusCode};
    use http_body_util::{BodyExt, Empty};
    use serde_json::json;

    fn context() -> RequestContext {
        RequestContext::new(Request::get("/").body(Empty::<Bytes>::new()).unwrap())
    }

    #[tokio::test]
    async fn text_responders() {
        let ctx = context();
        let response = "hello".response_to(&ctx).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), Bytes::from_static(b"hello"));

        let response = (StatusCode::CREATED, String::from("made")).response_to(&ctx).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[test]
    fn none_is_not_found() {
        let err = Option::<String>::None.response_to(&context()).unwrap_err();
        assert!(matches!(err, RouteError::NotFound));
    }

    #[test]
    fn err_keeps_its_status() {
        let result: Result<String, HttpError> = Err(HttpError::new(StatusCode::CONFLICT, "exists"));
        let err = result.response_to(&context()).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn json_responder() {
        let response = Json(json!({"id": 1})).response_to(&context()).unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), Bytes::from_static(br#"{"id":1}"#));
    }
}
