//! Core protocol types shared by the codec, connection and handler layers.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: the header/payload shape
//!   both directions of the codec speak.
//! - [`RequestHeader`]: a parsed header before body attachment, carrying
//!   [`ConnectionInfo`], [`RequestId`] and the advisory cancellation token in
//!   its extensions.
//! - [`ResponseHead`]: the header portion of an outgoing response.
//! - [`body`]: streaming request body plumbing ([`body::ReqBody`] /
//!   [`body::ReqBodySender`]).
//! - [`HttpError`] / [`ParseError`] / [`SendError`]: the error taxonomy; parse
//!   errors terminate the connection after a minimal 400/505 response, send
//!   errors are always fatal for the connection.

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::ConnectionInfo;
pub use request::RequestHeader;
pub use request::RequestId;

mod response;
pub use response::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
