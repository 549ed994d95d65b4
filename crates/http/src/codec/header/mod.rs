//! Header-level codec pieces: parsing framed header blocks into typed
//! requests, and serializing response heads back onto the wire.

mod header_encoder;
mod parser;

pub use header_encoder::HeaderEncoder;
pub use parser::RequestParser;
