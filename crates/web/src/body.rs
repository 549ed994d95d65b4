use bytes::Bytes;
use http_body::Body as HttpBody;
use http_body::{Frame, SizeHint};
use http_body_util::combinators::BoxBody;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Mutex;
use trellis_http::protocol::body::ReqBody;
use trellis_http::protocol::{HttpError, ParseError};

/// Consume-once handle on the request body.
///
/// Every pipeline stage gets a clone of the same handle; the first one to
/// call [`apply`](OptionReqBody::apply) takes the body, every later
/// attempt fails with an "already consumed" error rather than reading a
/// half-drained stream.
#[derive(Clone)]
pub struct OptionReqBody {
    slot: Arc<Mutex<Option<ReqBody>>>,
}

impl OptionReqBody {
    /// Whether the body is still there to be taken.
    pub async fn can_consume(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Takes the body out of the slot and runs `f` on it.
    pub async fn apply<T, F, Fut>(&self, f: F) -> Fut::Output
    where
        F: FnOnce(ReqBody) -> Fut,
        Fut: Future<Output = Result<T, ParseError>>,
    {
        let taken = self.slot.lock().await.take();
        match taken {
            Some(body) => f(body).await,
            None => Err(ParseError::invalid_body("body has been consumed")),
        }
    }
}

impl From<ReqBody> for OptionReqBody {
    fn from(body: ReqBody) -> Self {
        OptionReqBody { slot: Arc::new(Mutex::new(Some(body))) }
    }
}

impl fmt::Debug for OptionReqBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionReqBody").finish_non_exhaustive()
    }
}

/// Response payload, one of two mutually exclusive shapes: a single
/// in-memory buffer, or a boxed stream copied frame by frame.
pub struct ResponseBody {
    payload: Payload,
}

enum Payload {
    /// buffer still to be emitted; `None` once emitted (or empty from the
    /// start)
    Buffer(Option<Bytes>),
    Stream(BoxBody<Bytes, HttpError>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { payload: Payload::Buffer(None) }
    }

    pub fn once(bytes: Bytes) -> Self {
        Self { payload: Payload::Buffer(Some(bytes)) }
    }

    // responses cross await points in Send futures, so the boxed stream
    // must be Sync as well
    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes, Error = HttpError> + Send + Sync + 'static,
    {
        Self { payload: Payload::Stream(BoxBody::new(body)) }
    }

    /// Serializes `value` into a JSON buffer body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(|buf| Self::once(buf.into()))
    }

    fn from_buffer(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Self::empty()
        } else {
            Self::once(bytes)
        }
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::from_buffer(Bytes::from(value))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::from_buffer(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        Self::from_buffer(value)
    }
}

impl From<Option<Bytes>> for ResponseBody {
    fn from(option: Option<Bytes>) -> Self {
        option.map_or_else(Self::empty, Self::once)
    }
}

impl From<()> for ResponseBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Buffer(Some(bytes)) => write!(f, "ResponseBody::Buffer({} bytes)", bytes.len()),
            Payload::Buffer(None) => write!(f, "ResponseBody::Buffer(empty)"),
            Payload::Stream(_) => write!(f, "ResponseBody::Stream"),
        }
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().payload {
            Payload::Buffer(buffer) => {
                Poll::Ready(buffer.take().map(|bytes| Ok(Frame::data(bytes))))
            }
            Payload::Stream(stream) => Pin::new(stream).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.payload {
            Payload::Buffer(buffer) => buffer.is_none(),
            Payload::Stream(stream) => stream.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.payload {
            Payload::Buffer(None) => SizeHint::with_exact(0),
            Payload::Buffer(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Payload::Stream(stream) => stream.size_hint(),
        }
    }
}
