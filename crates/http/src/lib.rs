//! An asynchronous HTTP/1.1 connection engine built on tokio.
//!
//! This crate owns the byte-level half of the server: it frames requests off
//! a TCP stream, parses them, streams their bodies to a [`handler::Handler`],
//! and serializes responses back, keeping the connection aligned for
//! keep-alive reuse. Routing and request pipelines live in the companion web
//! crate; this one only knows about a single connection at a time.
//!
//! # Example
//!
//! ```no_run
//! use http::{Request, Response, StatusCode};
//! use http_body_util::BodyExt;
//! use std::error::Error;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn, Level};
//! use tracing_subscriber::FmtSubscriber;
//! use trellis_http::connection::HttpConnection;
//! use trellis_http::handler::make_handler;
//! use trellis_http::protocol::{body::ReqBody, ConnectionInfo};
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     info!(port = 8080, "start listening");
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(hello_world));
//!
//!     loop {
//!         let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = handler.clone();
//!         let local_addr = tcp_stream.local_addr().unwrap();
//!
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             let info = ConnectionInfo::new(local_addr, remote_addr);
//!             let connection = HttpConnection::new(reader, writer, info);
//!             if let Err(e) = connection.process(handler).await {
//!                 error!(cause = %e, "connection finished with error");
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello_world(request: Request<ReqBody>) -> Result<Response<String>, Box<dyn Error + Send + Sync>> {
//!     let _body = request.into_body().collect().await?.to_bytes();
//!     let response_body = "Hello World!\r\n";
//!     let response = Response::builder()
//!         .status(StatusCode::OK)
//!         .header(http::header::CONTENT_LENGTH, response_body.len())
//!         .body(response_body.to_string())
//!         .unwrap();
//!     Ok(response)
//! }
//! ```
//!
//! # Architecture
//!
//! - [`connection`]: the per-connection request/response loop
//! - [`codec`]: header framing and the streaming request/response codec
//! - [`protocol`]: message, header, body and error types
//! - [`handler`]: the trait the upper layers implement
//!
//! # Limitations
//!
//! - HTTP/1.1 and HTTP/1.0 only; anything else is answered with 505
//! - Chunked *request* bodies are rejected with 400
//! - Maximum header block size: 8KB, maximum header count: 64
//! - No TLS (terminate it in front of the server)

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
