use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadSize, ResponseHead, SendError};
use bytes::{Buf, BytesMut};
use std::io;
use std::io::ErrorKind;
use tokio_util::codec::Encoder;
use tracing::error;

/// Encoder for complete responses: one header message, then payload items
/// until EOF. Feeding parts out of order is a caller bug and fails the
/// connection.
pub struct ResponseEncoder {
    head_encoder: HeaderEncoder,
    /// present while a payload is being written, cleared at its end
    body_encoder: Option<PayloadEncoder>,
}

impl Default for ResponseEncoder {
    fn default() -> Self {
        Self { head_encoder: HeaderEncoder, body_encoder: None }
    }
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }

    fn sequencing_error(detail: &str) -> SendError {
        error!("{detail}");
        io::Error::from(ErrorKind::InvalidInput).into()
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.body_encoder.is_some() {
                    return Err(Self::sequencing_error("response head while a payload is in flight"));
                }
                self.body_encoder = Some(payload_size.into());
                self.head_encoder.encode((head, payload_size), dst)
            }

            Message::Payload(payload_item) => {
                let Some(body_encoder) = &mut self.body_encoder else {
                    // a trailing EOF after a fully written body is harmless
                    if payload_item.is_eof() {
                        return Ok(());
                    }
                    return Err(Self::sequencing_error("payload item before any response head"));
                };

                let written = body_encoder.encode(payload_item, dst);
                if body_encoder.is_finish() {
                    self.body_encoder = None;
                }
                written
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadItem;
    use bytes::Bytes;
    use http::{Response, StatusCode};

    #[test]
    fn encodes_full_response() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let head: ResponseHead = Response::builder().status(StatusCode::OK).body(()).unwrap();
        encoder.encode(Message::<_, Bytes>::Header((head, PayloadSize::Length(2))), &mut dst).unwrap();
        encoder.encode(Message::<(ResponseHead, PayloadSize)>::Payload(PayloadItem::Chunk(Bytes::from_static(b"ok"))), &mut dst).unwrap();
        encoder.encode(Message::<(ResponseHead, PayloadSize)>::Payload(PayloadItem::Eof), &mut dst).unwrap();

        let text = String::from_utf8(dst.to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nok"));
    }

    #[test]
    fn payload_before_header_is_an_error() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let result =
            encoder.encode(Message::<(ResponseHead, PayloadSize)>::Payload(PayloadItem::Chunk(Bytes::from_static(b"x"))), &mut dst);
        assert!(result.is_err());
    }
}
