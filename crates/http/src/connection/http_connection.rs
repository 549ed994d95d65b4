use std::error::Error;
use std::fmt::Display;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use http::header::{CONNECTION, EXPECT};
use http::{HeaderValue, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::body::ReqBody;
use crate::protocol::{
    ConnectionInfo, HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, RequestId, ResponseHead, SendError,
};

use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace};

/// Default time to wait for the next request on an idle connection before
/// the server closes it.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// One accepted connection: frames requests off the read half, feeds them to
/// a [`Handler`], and writes responses back, looping until either side
/// closes.
///
/// Each request gets a [`RequestId`], the connection's [`ConnectionInfo`] and
/// a child [`CancellationToken`] attached to its extensions. The token is
/// advisory: it is cancelled when the connection task terminates, but a
/// running handler is never forcibly aborted.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    info: ConnectionInfo,
    read_timeout: Duration,
    cancel: CancellationToken,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, info: ConnectionInfo) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            info,
            read_timeout: DEFAULT_READ_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Serves requests on this connection until it closes.
    ///
    /// Returns `Ok(())` for every orderly shutdown (peer close, idle
    /// timeout, `Connection: close`, benign disconnect) and `Err` only for
    /// faults worth surfacing.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        // cancels per-request child tokens when this task ends, however it ends
        let _cancel_guard = self.cancel.clone().drop_guard();

        loop {
            let next = match timeout(self.read_timeout, self.framed_read.next()).await {
                Ok(next) => next,
                Err(_elapsed) => {
                    debug!(remote = %self.info.remote, timeout = ?self.read_timeout, "idle connection timed out, closing");
                    return Ok(());
                }
            };

            match next {
                Some(Ok(Message::Header((header, _payload_size)))) => {
                    let close_after = self.do_process(header, &handler).await?;
                    if close_after {
                        let _ = self.framed_write.get_mut().shutdown().await;
                        debug!(remote = %self.info.remote, "connection closed on request");
                        return Ok(());
                    }
                }

                Some(Ok(Message::Payload(PayloadItem::Eof))) => {
                    // leftover EOF of a fully drained body; keep scanning
                    continue;
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("received body bytes while expecting a request header");
                    self.send_minimal_response(StatusCode::BAD_REQUEST).await?;
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }

                Some(Err(e)) => return self.handle_read_error(e).await,

                None => {
                    debug!(remote = %self.info.remote, "peer closed connection");
                    return Ok(());
                }
            }
        }
    }

    /// Classifies a failed read per the transport taxonomy: benign
    /// disconnects are swallowed, malformed requests get a minimal error
    /// response before the connection is torn down.
    async fn handle_read_error(&mut self, e: ParseError) -> Result<(), HttpError> {
        if let ParseError::Io { source } = &e {
            if is_benign_disconnect(source) {
                trace!(cause = %source, "peer went away mid-read");
                return Ok(());
            }
            error!(cause = %source, "connection read failed");
            return Err(e.into());
        }

        let status =
            if e.is_unsupported_version() { StatusCode::HTTP_VERSION_NOT_SUPPORTED } else { StatusCode::BAD_REQUEST };
        info!(cause = %e, status = %status, "rejecting malformed request");
        self.send_minimal_response(status).await?;
        Err(e.into())
    }

    async fn do_process<H>(&mut self, mut header: RequestHeader, handler: &Arc<H>) -> Result<bool, HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        let client_close = header.requests_close();

        let request_id = RequestId::next();
        header.set_request_id(request_id);
        header.set_connection_info(self.info);
        header.set_cancellation(self.cancel.child_token());

        // answer "Expect: 100-continue" before the client will send the body
        if let Some(value) = header.headers().get(EXPECT) {
            let slice = value.as_bytes();
            if slice.len() >= 4 && &slice[0..4] == b"100-" {
                let writer = self.framed_write.get_mut();
                writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
                writer.flush().await.map_err(SendError::io)?;
                debug!(request_id = %request_id, "sent 100 Continue");
            }
        }

        let (req_body, mut body_sender) = ReqBody::channel(&mut self.framed_read);

        let request = header.body(req_body);

        // Run the handler and the body pump concurrently: the handler may
        // await body chunks that only the pump can produce, and the pump must
        // not outlive the handler's interest in them.
        let response_result = {
            tokio::pin! {
                let request_handle_future = handler.call(request);
                let body_sender_future = body_sender.send_body();
            }

            // once the pump finishes its branch must be disabled, or the
            // select would poll a completed future while the handler runs on
            let mut body_pump_done = false;
            loop {
                select! {
                    // biased so a finished handler wins over more body chunks
                    biased;
                    response = &mut request_handle_future => {
                        break response;
                    }
                    _ = &mut body_sender_future, if !body_pump_done => {
                        body_pump_done = true;
                    }
                }
            }
        };

        // whatever the handler left unread must not bleed into the next request
        body_sender.skip_body().await;

        let response_close = self.send_response(response_result).await?;

        Ok(client_close || response_close)
    }

    async fn send_response<T, E>(&mut self, response_result: Result<Response<T>, E>) -> Result<bool, HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        match response_result {
            Ok(response) => self.do_send_response(response).await,
            Err(e) => {
                error!(cause = %e.into(), "handler failed, answering 500");
                let error_response = build_error_response(StatusCode::INTERNAL_SERVER_ERROR);
                self.do_send_response(error_response).await
            }
        }
    }

    /// Serializes one response. Returns whether the response asked for the
    /// connection to be closed afterwards.
    async fn do_send_response<T>(&mut self, response: Response<T>) -> Result<bool, HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
    {
        let close_after = wants_close(response.headers());

        let (header_parts, mut body) = response.into_parts();

        let payload_size = {
            let size_hint = body.size_hint();
            match size_hint.exact() {
                Some(0) => PayloadSize::Empty,
                Some(length) => PayloadSize::Length(length),
                None => PayloadSize::Chunked,
            }
        };

        let header = Message::<_, T::Data>::Header((ResponseHead::from_parts(header_parts, ()), payload_size));
        if !payload_size.is_empty() {
            self.framed_write.feed(header).await?;
        } else {
            // header-only response: flush instead of buffering
            self.framed_write.send(header).await?;
        }

        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    let payload_item =
                        frame.into_data().map(PayloadItem::Chunk).map_err(|_e| SendError::invalid_body("response produced a non-data frame"))?;

                    self.framed_write.send(Message::Payload(payload_item)).await?;
                }
                Some(Err(e)) => return Err(SendError::invalid_body(format!("resolve response body error: {e}")).into()),
                None => {
                    self.framed_write.send(Message::Payload(PayloadItem::<T::Data>::Eof)).await?;
                    return Ok(close_after);
                }
            }
        }
    }

    async fn send_minimal_response(&mut self, status: StatusCode) -> Result<(), HttpError> {
        let response = build_error_response(status);
        self.do_send_response(response).await?;
        let _ = self.framed_write.get_mut().shutdown().await;
        Ok(())
    }
}

fn wants_close(headers: &http::HeaderMap) -> bool {
    headers
        .get(CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}

/// Disconnect patterns not worth more than a trace line.
fn is_benign_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
    )
}

fn build_error_response(status_code: StatusCode) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::<Bytes>::new());
    *response.status_mut() = status_code;
    response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
    response
}
