use crate::body::ResponseBody;
use crate::{OptionReqBody, RequestContext};
use async_trait::async_trait;
use http::Response;
use std::error::Error;
use std::future::Future;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// A routed request handler.
///
/// Implementations receive the request context (header, path params,
/// identity) plus the consume-once body and produce a full response. Errors
/// are mapped to responses by the pipeline, not by the connection.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke(&self, ctx: &RequestContext, req_body: OptionReqBody) -> Result<Response<ResponseBody>, BoxError>;
}

/// A [`RequestHandler`] wrapping a plain function.
///
/// The function runs synchronously with access to the context and returns
/// the future doing the actual work, so context data wanted inside the
/// future is extracted up front:
///
/// ```ignore
/// let handler = handler_fn(|ctx, _body| {
///     let path = ctx.uri().path().to_string();
///     async move { Ok(Response::new(ResponseBody::from(path))) }
/// });
/// ```
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(&RequestContext, OptionReqBody) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<ResponseBody>, BoxError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(&RequestContext, OptionReqBody) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<ResponseBody>, BoxError>> + Send,
{
    async fn invoke(&self, ctx: &RequestContext, req_body: OptionReqBody) -> Result<Response<ResponseBody>, BoxError> {
        (self.f)(ctx, req_body).await
    }
}

/// Maps a failed handler invocation to a response.
///
/// Registered per route; returning `None` hands the error back to the
/// pipeline's default 500 mapping.
#[async_trait]
pub trait RouteErrorHandler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, error: &(dyn Error + Send + Sync)) -> Option<Response<ResponseBody>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::empty_req_body;
    use http::{Request, StatusCode};
    use trellis_http::protocol::RequestHeader;

    fn assert_is_handler<T: RequestHandler>(_handler: &T) {}

    #[tokio::test]
    async fn fn_handler_invokes_wrapped_function() {
        let handler = handler_fn(|ctx: &RequestContext, _body| {
            let body = format!("hello {}", ctx.uri().path());
            async move { Ok(Response::builder().status(StatusCode::OK).body(ResponseBody::from(body)).unwrap()) }
        });
        assert_is_handler(&handler);

        let header: RequestHeader = Request::builder().uri("/world").body(()).unwrap().into();
        let ctx = RequestContext::new(header);

        let response = handler.invoke(&ctx, empty_req_body()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
