//! The per-request processing pipeline.
//!
//! Linear with early exits: authentication → filters → rewrites → global
//! request log → route resolution → handler invocation with error mapping →
//! global response log. Every chain runs most-recently-registered first, so
//! late registrations pre-empt defaults.

use crate::body::{OptionReqBody, ResponseBody};
use crate::fanout::Fanout;
use crate::handler::BoxError;
use crate::observe::{ErrorObserver, MaintenanceTask, RequestObserver, ResponseObserver};
use crate::router::{ResolveError, RouteHandle, Router};
use crate::{Identity, RequestContext};
use async_trait::async_trait;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderValue, Request, Response, StatusCode};
use serde::Serialize;
use std::error::Error;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, warn};
use trellis_http::protocol::body::ReqBody;
use trellis_http::protocol::RequestHeader;

/// Yields a caller identity for a request, or `None` to let the next
/// authenticator (or anonymous access) take over.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, ctx: &RequestContext) -> Option<Identity>;
}

/// Short-circuits the pipeline by producing a response before routing,
/// e.g. a maintenance-mode block.
#[async_trait]
pub trait RequestFilter: Send + Sync {
    async fn filter(&self, ctx: &RequestContext) -> Option<Response<ResponseBody>>;
}

/// Replaces the working request header. The first rewriter returning
/// `Some` wins; one rewrite per request.
#[async_trait]
pub trait RequestRewriter: Send + Sync {
    async fn rewrite(&self, header: &RequestHeader) -> Option<RequestHeader>;
}

/// A LIFO chain: snapshots iterate most-recently-registered first.
pub(crate) struct Chain<S: ?Sized> {
    entries: Mutex<Vec<Arc<S>>>,
}

impl<S: ?Sized> Chain<S> {
    pub(crate) fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    pub(crate) fn push(&self, entry: Arc<S>) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    pub(crate) fn snapshot_lifo(&self) -> Vec<Arc<S>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().rev().cloned().collect()
    }
}

/// Server-owned registry: the routing table, the pipeline chains and the
/// global fan-outs. One per server instance, no process-global state.
pub struct Registry {
    router: Router,
    auth: Chain<dyn Authenticator>,
    filters: Chain<dyn RequestFilter>,
    rewrites: Chain<dyn RequestRewriter>,
    request_log: Fanout<dyn RequestObserver>,
    response_log: Fanout<dyn ResponseObserver>,
    error_log: Fanout<dyn ErrorObserver>,
    maintenance: Fanout<dyn MaintenanceTask>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            auth: Chain::new(),
            filters: Chain::new(),
            rewrites: Chain::new(),
            request_log: Fanout::new(),
            response_log: Fanout::new(),
            error_log: Fanout::new(),
            maintenance: Fanout::new(),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn add_auth(&self, authenticator: Arc<dyn Authenticator>) {
        self.auth.push(authenticator);
    }

    pub fn add_filter(&self, filter: Arc<dyn RequestFilter>) {
        self.filters.push(filter);
    }

    pub fn add_rewrite(&self, rewriter: Arc<dyn RequestRewriter>) {
        self.rewrites.push(rewriter);
    }

    pub fn request_log(&self) -> &Fanout<dyn RequestObserver> {
        &self.request_log
    }

    pub fn response_log(&self) -> &Fanout<dyn ResponseObserver> {
        &self.response_log
    }

    pub fn error_log(&self) -> &Fanout<dyn ErrorObserver> {
        &self.error_log
    }

    pub fn maintenance(&self) -> &Fanout<dyn MaintenanceTask> {
        &self.maintenance
    }
}

/// Diagnostic body of a 500 response. `detail` and `kind` only appear when
/// the server runs with `debug_errors`.
#[derive(Serialize)]
struct ErrorBody<'a> {
    status: u16,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
}

pub struct Pipeline {
    registry: Arc<Registry>,
    debug_errors: bool,
}

impl Pipeline {
    pub fn new(registry: Arc<Registry>, debug_errors: bool) -> Self {
        Self { registry, debug_errors }
    }

    /// Runs one request through the full pipeline. Never fails: every error
    /// class maps to a response.
    pub async fn dispatch(&self, request: Request<ReqBody>) -> Response<ResponseBody> {
        let (parts, body) = request.into_parts();
        let header = RequestHeader::from(parts);
        let req_body = OptionReqBody::from(body);
        let mut ctx = RequestContext::new(header);

        for authenticator in self.registry.auth.snapshot_lifo() {
            if let Some(identity) = authenticator.authenticate(&ctx).await {
                debug!(principal = identity.principal(), "request authenticated");
                ctx.set_identity(identity);
                break;
            }
        }

        for filter in self.registry.filters.snapshot_lifo() {
            if let Some(response) = filter.filter(&ctx).await {
                return response;
            }
        }

        for rewriter in self.registry.rewrites.snapshot_lifo() {
            if let Some(rewritten) = rewriter.rewrite(ctx.header()).await {
                debug!(path = %rewritten.uri(), "request rewritten");
                ctx.replace_header(rewritten);
                break;
            }
        }

        self.log_request(&ctx).await;

        let response = self.route_and_invoke(&mut ctx, req_body).await;

        self.log_response(&ctx, &response).await;

        response
    }

    async fn route_and_invoke(&self, ctx: &mut RequestContext, req_body: OptionReqBody) -> Response<ResponseBody> {
        let host = ctx.host().unwrap_or("").to_string();
        let path = ctx.uri().path().to_string();
        let method = ctx.method().clone();
        let accept = ctx.headers().get(ACCEPT).and_then(|value| value.to_str().ok()).map(str::to_string);

        let mut route = match self.registry.router.resolve(&host, &path, &method, accept.as_deref()) {
            Ok(route) => route,
            Err(e) => return self.unresolved(e),
        };

        ctx.set_params(route.take_params());

        if let Some(observer) = route.request_observer() {
            if let Err(e) = observer.on_request(ctx).await {
                self.observe_error(&*e).await;
            }
        }

        let response = match route.handler().invoke(ctx, req_body).await {
            Ok(response) => response,
            Err(e) => self.handler_failed(ctx, &route, e).await,
        };

        if let Some(observer) = route.response_observer() {
            if let Err(e) = observer.on_response(ctx, &response).await {
                self.observe_error(&*e).await;
            }
        }

        response
    }

    async fn handler_failed(&self, ctx: &RequestContext, route: &RouteHandle, e: BoxError) -> Response<ResponseBody> {
        error!(cause = %e, path = %ctx.uri(), "handler failed");
        self.observe_error(&*e).await;

        if let Some(error_handler) = route.error_handler() {
            if let Some(response) = error_handler.handle(ctx, &*e).await {
                return response;
            }
        }

        self.internal_error(ctx, &*e)
    }

    fn internal_error(&self, ctx: &RequestContext, e: &(dyn Error + Send + Sync)) -> Response<ResponseBody> {
        let body = ErrorBody {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            error: "internal server error",
            request_id: ctx.request_id().map(|id| id.get()),
            detail: self.debug_errors.then(|| e.to_string()),
            kind: self.debug_errors.then_some("handler"),
        };

        json_response(StatusCode::INTERNAL_SERVER_ERROR, &body)
    }

    fn unresolved(&self, e: ResolveError) -> Response<ResponseBody> {
        let status = match &e {
            ResolveError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ResolveError::NoMatch { .. } | ResolveError::NoHost { .. } => StatusCode::NOT_FOUND,
        };
        debug!(status = %status, reason = %e, "request did not resolve");

        plain_response(status, e.to_string())
    }

    async fn log_request(&self, ctx: &RequestContext) {
        let error_log = &self.registry.error_log;
        self.registry
            .request_log
            .for_each(|observer| async move {
                if let Err(e) = observer.on_request(ctx).await {
                    warn!(cause = %e, "request observer failed");
                    let e = &*e;
                    error_log.for_each(|sink| async move { sink.on_error(e).await }).await;
                }
            })
            .await;
    }

    async fn log_response(&self, ctx: &RequestContext, response: &Response<ResponseBody>) {
        let error_log = &self.registry.error_log;
        self.registry
            .response_log
            .for_each(|observer| async move {
                if let Err(e) = observer.on_response(ctx, response).await {
                    warn!(cause = %e, "response observer failed");
                    let e = &*e;
                    error_log.for_each(|sink| async move { sink.on_error(e).await }).await;
                }
            })
            .await;
    }

    async fn observe_error(&self, e: &(dyn Error + Send + Sync)) {
        self.registry.error_log.for_each(|sink| async move { sink.on_error(e).await }).await;
    }
}

fn plain_response(status: StatusCode, body: String) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<ResponseBody> {
    let body = match ResponseBody::json(body) {
        Ok(body) => body,
        Err(e) => {
            // diagnostics must never take the response down with them
            error!(cause = %e, "failed to serialize error body");
            ResponseBody::empty()
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::router::{ReplacePolicy, Route};
    use crate::test_support::{empty_req_body, request};
    use http::Method;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pipeline(registry: Arc<Registry>) -> Pipeline {
        Pipeline::new(registry, false)
    }

    fn ok_handler(tag: &'static str) -> Arc<dyn crate::RequestHandler> {
        Arc::new(handler_fn(move |_ctx: &RequestContext, _body| async move {
            Ok(Response::new(ResponseBody::from(tag)))
        }))
    }

    async fn body_text(response: Response<ResponseBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    struct TagAuth(Option<&'static str>);

    #[async_trait]
    impl Authenticator for TagAuth {
        async fn authenticate(&self, _ctx: &RequestContext) -> Option<Identity> {
            self.0.map(Identity::new)
        }
    }

    #[tokio::test]
    async fn auth_chain_runs_lifo_and_first_some_wins() {
        let registry = Arc::new(Registry::new());
        registry.add_auth(Arc::new(TagAuth(Some("early"))));
        registry.add_auth(Arc::new(TagAuth(None)));
        registry.add_auth(Arc::new(TagAuth(Some("late"))));

        let principal = Arc::new(Mutex::new(String::new()));
        let seen = principal.clone();
        registry
            .router()
            .register(
                Route::new("*", "/whoami").method(Method::GET),
                Arc::new(handler_fn(move |ctx: &RequestContext, _body| {
                    let principal = ctx.identity().map(|i| i.principal().to_string()).unwrap_or_default();
                    let seen = seen.clone();
                    async move {
                        *seen.lock().unwrap() = principal;
                        Ok(Response::new(ResponseBody::empty()))
                    }
                })),
                ReplacePolicy::Fail,
            )
            .unwrap();

        let response = pipeline(registry).dispatch(request(Method::GET, "/whoami")).await;
        assert_eq!(response.status(), StatusCode::OK);
        // registered last, so it runs first and its identity wins
        assert_eq!(*principal.lock().unwrap(), "late");
    }

    struct Block;

    #[async_trait]
    impl RequestFilter for Block {
        async fn filter(&self, _ctx: &RequestContext) -> Option<Response<ResponseBody>> {
            let mut response = Response::new(ResponseBody::from("maintenance"));
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            Some(response)
        }
    }

    struct Pass;

    #[async_trait]
    impl RequestFilter for Pass {
        async fn filter(&self, _ctx: &RequestContext) -> Option<Response<ResponseBody>> {
            None
        }
    }

    #[tokio::test]
    async fn filter_short_circuits_before_routing() {
        let registry = Arc::new(Registry::new());
        registry.router().register(Route::new("*", "/x").method(Method::GET), ok_handler("routed"), ReplacePolicy::Fail).unwrap();
        registry.add_filter(Arc::new(Block));
        registry.add_filter(Arc::new(Pass));

        let response = pipeline(registry).dispatch(request(Method::GET, "/x")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "maintenance");
    }

    struct RewriteTo(&'static str);

    #[async_trait]
    impl RequestRewriter for RewriteTo {
        async fn rewrite(&self, header: &RequestHeader) -> Option<RequestHeader> {
            let mut builder = Request::builder().method(header.method().clone()).uri(self.0);
            for (name, value) in header.headers() {
                builder = builder.header(name, value);
            }
            Some(builder.body(()).unwrap().into())
        }
    }

    struct NoRewrite;

    #[async_trait]
    impl RequestRewriter for NoRewrite {
        async fn rewrite(&self, _header: &RequestHeader) -> Option<RequestHeader> {
            None
        }
    }

    #[tokio::test]
    async fn first_rewrite_wins_and_stops_the_chain() {
        let registry = Arc::new(Registry::new());
        registry.router().register(Route::new("*", "/new").method(Method::GET), ok_handler("new"), ReplacePolicy::Fail).unwrap();
        registry.router().register(Route::new("*", "/other").method(Method::GET), ok_handler("other"), ReplacePolicy::Fail).unwrap();

        registry.add_rewrite(Arc::new(RewriteTo("/other")));
        // registered later, runs first, rewrites to /new and stops the chain
        registry.add_rewrite(Arc::new(NoRewrite));
        registry.add_rewrite(Arc::new(RewriteTo("/new")));

        let response = pipeline(registry).dispatch(request(Method::GET, "/old")).await;
        assert_eq!(body_text(response).await, "new");
    }

    #[tokio::test]
    async fn unresolved_route_maps_to_404_and_405() {
        let registry = Arc::new(Registry::new());
        registry.router().register(Route::new("*", "/x").method(Method::GET), ok_handler("x"), ReplacePolicy::Fail).unwrap();
        let pipeline = pipeline(registry);

        let response = pipeline.dispatch(request(Method::GET, "/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = pipeline.dispatch(request(Method::POST, "/x")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(body_text(response).await.contains("POST"));
    }

    #[tokio::test]
    async fn handler_error_maps_to_500_json() {
        let registry = Arc::new(Registry::new());
        registry
            .router()
            .register(
                Route::new("*", "/boom").method(Method::GET),
                Arc::new(handler_fn(|_ctx: &RequestContext, _body| async {
                    Err::<Response<ResponseBody>, _>("kaboom".into())
                })),
                ReplacePolicy::Fail,
            )
            .unwrap();

        let response = Pipeline::new(registry.clone(), false).dispatch(request(Method::GET, "/boom")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = body_text(response).await;
        assert!(text.contains("internal server error"));
        assert!(!text.contains("kaboom"));

        // with debug_errors the cause is exposed
        let response = Pipeline::new(registry, true).dispatch(request(Method::GET, "/boom")).await;
        let text = body_text(response).await;
        assert!(text.contains("kaboom"));
    }

    struct Teapot;

    #[async_trait]
    impl crate::RouteErrorHandler for Teapot {
        async fn handle(&self, _ctx: &RequestContext, error: &(dyn Error + Send + Sync)) -> Option<Response<ResponseBody>> {
            if error.to_string() == "teapot" {
                let mut response = Response::new(ResponseBody::empty());
                *response.status_mut() = StatusCode::IM_A_TEAPOT;
                Some(response)
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn route_error_handler_gets_first_crack() {
        let registry = Arc::new(Registry::new());
        registry
            .router()
            .register(
                Route::new("*", "/tea").method(Method::GET).on_error(Arc::new(Teapot)),
                Arc::new(handler_fn(|_ctx: &RequestContext, _body| async {
                    Err::<Response<ResponseBody>, _>("teapot".into())
                })),
                ReplacePolicy::Fail,
            )
            .unwrap();

        let response = pipeline(registry).dispatch(request(Method::GET, "/tea")).await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    struct Failing(Arc<AtomicUsize>);

    #[async_trait]
    impl RequestObserver for Failing {
        async fn on_request(&self, _ctx: &RequestContext) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Err("observer down".into())
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl RequestObserver for Counting {
        async fn on_request(&self, _ctx: &RequestContext) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_observer_never_fails_the_request() {
        let registry = Arc::new(Registry::new());
        registry.router().register(Route::new("*", "/x").method(Method::GET), ok_handler("x"), ReplacePolicy::Fail).unwrap();

        let failures = Arc::new(AtomicUsize::new(0));
        let successes = Arc::new(AtomicUsize::new(0));
        registry.request_log().add(Arc::new(Failing(failures.clone())) as Arc<dyn RequestObserver>);
        registry.request_log().add(Arc::new(Counting(successes.clone())) as Arc<dyn RequestObserver>);

        let response = pipeline(registry).dispatch(request(Method::GET, "/x")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(failures.load(Ordering::Relaxed), 1);
        // the failure did not stop the rest of the fan-out
        assert_eq!(successes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn anonymous_request_is_served() {
        let registry = Arc::new(Registry::new());
        registry.router().register(Route::new("*", "/x").method(Method::GET), ok_handler("x"), ReplacePolicy::Fail).unwrap();

        let response = pipeline(registry).dispatch(request(Method::GET, "/x")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    // keep the helper used by request() honest about body consumption
    #[tokio::test]
    async fn unconsumed_body_is_fine() {
        let _ = empty_req_body();
    }
}
