//! Streaming codec for the connection's read and write halves.
//!
//! The read side is [`RequestDecoder`]: framing ([`framer::HeaderFramer`]),
//! parsing ([`header::RequestParser`]) and a length-delimited body stage.
//! The write side is [`ResponseEncoder`]: status line + headers, then a
//! fixed-length or chunked payload. Both plug into
//! `tokio_util::codec::{FramedRead, FramedWrite}`.

pub mod body;
pub mod framer;
pub mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
