//! Decoder for request payloads delimited by `Content-Length`.

use crate::protocol::{ParseError, PayloadItem};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Passes through exactly the declared number of body bytes, then reports
/// EOF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub fn new(content_length: u64) -> Self {
        Self { remaining: content_length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }
        if src.is_empty() {
            return Ok(None);
        }

        // everything buffered belongs to this payload, up to the declared
        // length; the rest is the start of the next request
        let take = usize::try_from(self.remaining).map_or(src.len(), |n| src.len().min(n));
        let chunk = src.split_to(take).freeze();
        self.remaining -= chunk.len() as u64;
        Ok(Some(PayloadItem::Chunk(chunk)))
    }
}
