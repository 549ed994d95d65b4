//! Streaming request body plumbing.
//!
//! The connection owns the read half of the socket, so the handler cannot
//! read the body directly: [`ReqBody`] is the consumer half handed to the
//! handler (implementing `http_body::Body`), [`ReqBodySender`] the producer
//! half driven by the connection loop. The two communicate over channels so
//! the handler and the connection make progress concurrently, and the
//! connection can drain whatever the handler left unread before the next
//! pipelined request is framed.

mod req_body;

pub use req_body::ReqBody;
pub use req_body::ReqBodySender;
