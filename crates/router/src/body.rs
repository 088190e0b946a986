use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Mutex;

/// The boxed error type shared by bodies, handlers and lifecycle hooks.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// The type-erased request body every transport body is converted into.
pub type ReqBody = UnsyncBoxBody<Bytes, BoxError>;

fn erase<B>(body: B) -> ReqBody
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// A request body shared between the context and its clones.
///
/// Whoever calls [`take`](Self::take) first owns the stream; every later caller sees `None`.
/// Body parsing relies on this to avoid reading a request twice.
#[derive(Clone)]
pub struct OptionReqBody {
    slot: Arc<Mutex<Option<ReqBody>>>,
}

impl OptionReqBody {
    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        erase(body).into()
    }

    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new())
    }

    pub async fn can_consume(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub async fn take(&self) -> Option<ReqBody> {
        self.slot.lock().await.take()
    }
}

impl From<ReqBody> for OptionReqBody {
    fn from(body: ReqBody) -> Self {
        Self { slot: Arc::new(Mutex::new(Some(body))) }
    }
}

impl fmt::Debug for OptionReqBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionReqBody").finish_non_exhaustive()
    }
}

/// The body of every response the router produces.
///
/// Buffered payloads report an exact size so hyper can send `content-length`; streamed
/// payloads (files) are forwarded chunk by chunk.
pub struct ResponseBody(Payload);

enum Payload {
    Buffered(Option<Bytes>),
    Streamed(ReqBody),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self(Payload::Buffered(None))
    }

    pub fn once(bytes: Bytes) -> Self {
        Self(Payload::Buffered(Some(bytes).filter(|bytes| !bytes.is_empty())))
    }

    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(Payload::Streamed(erase(body)))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Payload::Buffered(chunk) => f.debug_tuple("Buffered").field(chunk).finish(),
            Payload::Streamed(_) => f.write_str("Streamed"),
        }
    }
}

macro_rules! buffered_from {
    ($($ty:ty => $conv:expr),* $(,)?) => {
        $(
            impl From<$ty> for ResponseBody {
                fn from(value: $ty) -> Self {
                    Self::once($conv(value))
                }
            }
        )*
    };
}

buffered_from! {
    Bytes => std::convert::identity,
    String => Bytes::from,
    Vec<u8> => Bytes::from,
    &'static str => |value: &'static str| Bytes::from_static(value.as_bytes()),
}

impl From<()> for ResponseBody {
    fn from((): ()) -> Self {
        Self::empty()
    }
}

impl From<Option<Bytes>> for ResponseBody {
    fn from(chunk: Option<Bytes>) -> Self {
        chunk.map_or_else(Self::empty, Self::once)
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        match &mut self.get_mut().0 {
            Payload::Buffered(chunk) => Poll::Ready(chunk.take().map(Frame::data).map(Ok)),
            Payload::Streamed(inner) => Pin::new(inner).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.0 {
            Payload::Buffered(chunk) => chunk.is_none(),
            Payload::Streamed(inner) => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.0 {
            Payload::Buffered(chunk) => SizeHint::with_exact(chunk.as_ref().map_or(0, |bytes| bytes.len() as u64)),
            Payload::Streamed(inner) => inner.size_hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OptionReqBody, ResponseBody};
    use bytes::Bytes;
    use http_body::{Body as HttpBody, Frame};
    use http_body_util::{BodyExt, Full, StreamBody};
    use std::io;

    fn assert_send<T: Send>() {}

    #[test]
    fn bodies_cross_threads() {
        assert_send::<ResponseBody>();
        assert_send::<OptionReqBody>();
    }

    #[tokio::test]
    async fn buffered_body_yields_one_frame() {
        let mut body = ResponseBody::from(String::from("plain text"));
        assert_eq!(body.size_hint().exact(), Some(10));
        assert!(!body.is_end_stream());

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), Bytes::from_static(b"plain text"));
        assert!(body.is_end_stream());
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn empty_inputs_end_immediately() {
        for body in [ResponseBody::from(""), ResponseBody::from(()), ResponseBody::from(Vec::new()), ResponseBody::from(None)] {
            assert!(body.is_end_stream());
            assert_eq!(body.size_hint().exact(), Some(0));
        }
    }

    #[tokio::test]
    async fn streamed_body_has_no_exact_size() {
        let parts: Vec<Result<_, io::Error>> =
            vec![Ok(Frame::data(Bytes::from_static(b"chunk-a"))), Ok(Frame::data(Bytes::from_static(b"chunk-b")))];
        let body = ResponseBody::stream(StreamBody::new(futures::stream::iter(parts)));
        assert_eq!(body.size_hint().exact(), None);

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"chunk-achunk-b"));
    }

    #[tokio::test]
    async fn request_body_is_consumed_once() {
        let body = OptionReqBody::new(Full::new(Bytes::from_static(b"payload")));
        let clone = body.clone();
        assert!(clone.can_consume().await);

        let taken = body.take().await.unwrap();
        assert_eq!(taken.collect().await.unwrap().to_bytes(), Bytes::from_static(b"payload"));

        assert!(!clone.can_consume().await);
        assert!(clone.take().await.is_none());
    }
}
