//! Payload codecs.
//!
//! Request side: `Content-Length` delimited only ([`LengthDecoder`] behind
//! [`PayloadDecoder`]); the parser rejects chunked requests before a body
//! phase begins. Response side: fixed-length or chunked, picked from the
//! body's size hint ([`PayloadEncoder`]).

mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
