//! Observer seams for the logging fan-outs.
//!
//! All observers are best-effort: a subscriber returning an error is
//! logged and isolated by the dispatching side, and never fails the
//! request it observed.

use crate::body::ResponseBody;
use crate::handler::BoxError;
use crate::RequestContext;
use async_trait::async_trait;
use http::Response;
use std::error::Error;

/// Sees every request entering the pipeline (and, per route, requests
/// reaching that route).
#[async_trait]
pub trait RequestObserver: Send + Sync {
    async fn on_request(&self, ctx: &RequestContext) -> Result<(), BoxError>;
}

/// Sees every response leaving the pipeline (and, per route, responses
/// produced by that route).
#[async_trait]
pub trait ResponseObserver: Send + Sync {
    async fn on_response(&self, ctx: &RequestContext, response: &Response<ResponseBody>) -> Result<(), BoxError>;
}

/// Sees handler and observer failures. Must not fail itself.
#[async_trait]
pub trait ErrorObserver: Send + Sync {
    async fn on_error(&self, error: &(dyn Error + Send + Sync));
}

/// Hooked to the server's periodic maintenance timer.
#[async_trait]
pub trait MaintenanceTask: Send + Sync {
    async fn tick(&self) -> Result<(), BoxError>;
}
