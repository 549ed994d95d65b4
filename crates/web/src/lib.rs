//! Web layer on top of the trellis-http connection engine.
//!
//! Routing is a four-level lookup: host pattern → URL template → method →
//! content type, published through an `ArcSwap` so lookups never lock.
//! Around it sits the request pipeline (authentication, filters, rewrites,
//! logging fan-outs, error mapping) and the server bootstrap with its
//! accept loop and maintenance timer.
//!
//! ```no_run
//! use std::sync::Arc;
//! use http::{Method, Response, StatusCode};
//! use trellis_web::router::{ReplacePolicy, Route};
//! use trellis_web::{handler_fn, RequestContext, ResponseBody, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder().address("127.0.0.1:8080").build().unwrap();
//!
//!     server
//!         .add_handler(
//!             Route::new("*", "/users/{id}").method(Method::GET),
//!             Arc::new(handler_fn(|ctx: &RequestContext, _body| {
//!                 let id = ctx.path_params().get("id").unwrap_or("").to_string();
//!                 async move {
//!                     Ok(Response::builder()
//!                         .status(StatusCode::OK)
//!                         .body(ResponseBody::from(format!("user {id}")))?)
//!                 }
//!             })),
//!             ReplacePolicy::Fail,
//!         )
//!         .unwrap();
//!
//!     server.start().await;
//! }
//! ```

mod body;
mod handler;
mod request;
mod server;

pub mod fanout;
pub mod negotiate;
pub mod observe;
pub mod pipeline;
pub mod router;

pub use body::{OptionReqBody, ResponseBody};
pub use handler::{handler_fn, BoxError, FnHandler, RequestHandler, RouteErrorHandler};
pub use request::{Identity, PathParams, RequestContext};
pub use server::{Server, ServerBuildError, ServerBuilder};
