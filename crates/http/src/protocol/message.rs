use bytes::{Buf, Bytes};

/// One unit the streaming codec speaks, in either direction.
///
/// A request decodes as one `Header` carrying the parsed header value,
/// then payload items up to [`PayloadItem::Eof`]; a response encodes the
/// same way. `T` is the header type of the direction in question.
pub enum Message<T, D: Buf = Bytes> {
    Header(T),
    Payload(PayloadItem<D>),
}

impl<T> Message<T> {
    #[inline]
    pub fn is_header(&self) -> bool {
        !self.is_payload()
    }

    #[inline]
    pub fn is_payload(&self) -> bool {
        matches!(self, Message::Payload(_))
    }

    /// The payload item, unless this is a header message.
    pub fn into_payload_item(self) -> Option<PayloadItem> {
        if let Message::Payload(item) = self {
            Some(item)
        } else {
            None
        }
    }
}

/// A slice of payload data, or the end-of-payload marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<D: Buf = Bytes> {
    Chunk(D),
    Eof,
}

impl<D: Buf> PayloadItem<D> {
    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }
}

impl PayloadItem {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        if let PayloadItem::Chunk(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        if let PayloadItem::Chunk(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

/// How large a message payload is going to be.
///
/// The read side derives this from `Content-Length`; the write side from
/// the response body's size hint, where an unknown size selects chunked
/// transfer encoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// exactly this many bytes follow
    Length(u64),
    /// unknown length, chunked on the wire (responses only)
    Chunked,
    /// no payload at all
    Empty,
}

impl PayloadSize {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}
