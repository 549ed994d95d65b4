use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;

use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, Stream, StreamExt};

use http_body::{Body, Frame};
use tracing::{debug, error};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// How many outstanding chunk requests the consumer may queue up.
const CHUNK_REQUEST_BACKLOG: usize = 16;

/// Consumer half of a request body.
///
/// This is what the handler sees as the body: an `http_body::Body` whose
/// every frame is fetched on demand from the [`ReqBodySender`] sitting in
/// the connection loop. Reading none or only part of the body is fine, the
/// connection drains the remainder afterwards.
pub struct ReqBody {
    chunk_requests: mpsc::Sender<oneshot::Sender<PayloadItem>>,
    pending: Option<oneshot::Receiver<PayloadItem>>,
}

impl ReqBody {
    /// Creates the consumer/producer pair for one request's body.
    ///
    /// `payload_stream` is the connection's framed read half, positioned
    /// right behind the header block of the current request.
    pub fn channel<S>(payload_stream: &mut S) -> (ReqBody, ReqBodySender<S>)
    where
        S: Stream + Unpin,
    {
        let (chunk_requests, fulfillment) = mpsc::channel(CHUNK_REQUEST_BACKLOG);
        let body = ReqBody { chunk_requests, pending: None };
        let sender = ReqBodySender { payload_stream, fulfillment, reached_eof: false };
        (body, sender)
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        loop {
            // a chunk request is in flight, wait for its answer
            if let Some(receiver) = &mut self.pending {
                let answer = ready!(receiver.poll_unpin(cx));
                self.pending = None;
                return match answer {
                    Ok(PayloadItem::Chunk(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Ok(PayloadItem::Eof) => Poll::Ready(None),
                    Err(_canceled) => {
                        Poll::Ready(Some(Err(ParseError::invalid_body("request body stream canceled"))))
                    }
                };
            }

            if let Err(e) = ready!(self.chunk_requests.poll_ready_unpin(cx)) {
                return Poll::Ready(Some(Err(ParseError::invalid_body(e))));
            }

            let (answer_tx, answer_rx) = oneshot::channel();
            if let Err(e) = self.chunk_requests.start_send(answer_tx) {
                return Poll::Ready(Some(Err(ParseError::invalid_body(e))));
            }
            self.pending = Some(answer_rx);
        }
    }
}

/// Producer half of a request body, driven by the connection loop.
///
/// Answers the consumer's chunk requests from the framed stream, and can
/// drain whatever the handler leaves behind so the next pipelined request
/// starts on a clean frame boundary.
pub struct ReqBodySender<'conn, S>
where
    S: Stream + Unpin,
{
    payload_stream: &'conn mut S,
    fulfillment: mpsc::Receiver<oneshot::Sender<PayloadItem>>,
    reached_eof: bool,
}

impl<S> ReqBodySender<'_, S>
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    /// Serves chunk requests until the payload hits EOF.
    pub async fn send_body(&mut self) -> Result<(), ParseError> {
        while !self.reached_eof {
            // the consumer going away ends the streaming phase; leftovers
            // are picked up by skip_body
            let Some(answer) = self.fulfillment.next().await else {
                return Ok(());
            };

            let item = self.next_payload_item().await?;
            if item.is_eof() {
                self.reached_eof = true;
            }
            if answer.send(item).is_err() {
                // the handler lost interest mid-read; keep the stream moving
                debug!("request body receiver dropped before chunk delivery");
            }
        }
        Ok(())
    }

    /// Discards the unread remainder of the payload.
    ///
    /// Keep-alive depends on this: the decoder cannot frame the next
    /// request while body bytes are still queued in front of it.
    pub async fn skip_body(&mut self) {
        let mut skipped: usize = 0;
        while !self.reached_eof {
            match self.payload_stream.next().await {
                Some(Ok(Message::Payload(item))) => {
                    if item.is_eof() {
                        self.reached_eof = true;
                    } else if let Some(bytes) = item.as_bytes() {
                        skipped += bytes.len();
                    }
                }
                // errors and stream end terminate the connection upstream
                _ => break,
            }
        }
        if skipped > 0 {
            debug!(size = skipped, "skipped unread request body");
        }
    }

    async fn next_payload_item(&mut self) -> Result<PayloadItem, ParseError> {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(item))) => Ok(item),
            Some(Ok(Message::Header(_))) => {
                error!("received header while streaming request body");
                Err(ParseError::invalid_body("received header while streaming request body"))
            }
            Some(Err(e)) => Err(e),
            None => {
                error!("connection ended inside request body");
                Err(ParseError::invalid_body("connection ended inside request body"))
            }
        }
    }
}
