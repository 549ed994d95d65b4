//! Connection lifecycle: framing, dispatch and keep-alive.
//!
//! [`HttpConnection`] owns both halves of an accepted stream and drives the
//! request/response loop: decode one request, hand it to the handler while
//! pumping its body, write the response, then either loop for the next
//! request or close when the exchange asked for it. Idle connections are
//! reaped by a configurable read timeout, and `Expect: 100-continue` is
//! answered before the body is pulled.

mod http_connection;

pub use http_connection::{HttpConnection, DEFAULT_READ_TIMEOUT};
