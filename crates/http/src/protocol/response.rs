//! Response header handling.
//!
//! The header portion of a response is just `http::Response<()>`; the body is
//! attached by the sender and serialized separately by the response encoder.

use http::Response;

/// Type alias for a response's header portion before the body is attached.
pub type ResponseHead = Response<()>;
