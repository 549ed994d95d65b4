//! Request decoder: drives one connection's read side through discrete
//! request/response cycles.
//!
//! Three-stage state machine per request:
//!
//! 1. the [`HeaderFramer`] scans for the end-of-headers terminator and yields
//!    the raw block;
//! 2. the [`RequestParser`] turns the block into a typed header plus the
//!    announced payload size;
//! 3. a [`PayloadDecoder`] passes the body through until EOF, after which the
//!    decoder is back in the framing stage for the next pipelined request.

use crate::codec::body::PayloadDecoder;
use crate::codec::framer::HeaderFramer;
use crate::codec::header::RequestParser;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

pub struct RequestDecoder {
    framer: HeaderFramer,
    parser: RequestParser,
    /// `Some` while in the body stage
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { framer: HeaderFramer::new(), parser: RequestParser::new(), payload_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // body stage
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // body finished, next request starts at the framing stage
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        // framing stage: no complete header block yet means no message
        let Some(block) = self.framer.decode(src)? else {
            return Ok(None);
        };

        let (header, payload_size) = self.parser.parse(&block)?;
        self.payload_decoder = Some(payload_size.into());
        Ok(Some(Message::Header((header, payload_size))))
    }
}
