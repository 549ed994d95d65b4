use crate::body::ResponseBody;
use crate::fanout::SubscriptionId;
use crate::handler::RequestHandler;
use crate::observe::{ErrorObserver, MaintenanceTask, RequestObserver, ResponseObserver};
use crate::pipeline::{Authenticator, Pipeline, Registry, RequestFilter, RequestRewriter};
use crate::router::{RegisterError, ReplacePolicy, Route};
use crate::{OptionReqBody, RequestContext};
use async_trait::async_trait;
use http::header::LOCATION;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use trellis_http::connection::{HttpConnection, DEFAULT_READ_TIMEOUT};
use trellis_http::handler::Handler;
use trellis_http::protocol::body::ReqBody;
use trellis_http::protocol::ConnectionInfo;

/// How long a maintenance tick may wait for the previous tick to finish
/// before it is skipped.
const MAINTENANCE_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

pub struct ServerBuilder {
    address: Option<io::Result<Vec<SocketAddr>>>,
    read_timeout: Duration,
    debug_errors: bool,
    maintenance_interval: Option<Duration>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { address: None, read_timeout: DEFAULT_READ_TIMEOUT, debug_errors: false, maintenance_interval: None }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(|addrs| addrs.collect()));
        self
    }

    /// Idle time allowed between requests on one connection.
    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Exposes handler error details (message, kind) in 500 bodies. Off by
    /// default; leave it off outside development.
    pub fn debug_errors(mut self, debug_errors: bool) -> Self {
        self.debug_errors = debug_errors;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let address = match self.address {
            None => return Err(ServerBuildError::MissingAddress),
            Some(Err(source)) => return Err(ServerBuildError::InvalidAddress { source }),
            Some(Ok(address)) => address,
        };

        let registry = Arc::new(Registry::new());
        let pipeline = Pipeline::new(registry.clone(), self.debug_errors);

        Ok(Server {
            registry,
            pipeline,
            address,
            read_timeout: self.read_timeout,
            maintenance_interval: self.maintenance_interval,
        })
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("address must be set")]
    MissingAddress,
    #[error("address did not resolve")]
    InvalidAddress { source: io::Error },
}

/// The assembled server: registry, pipeline and accept loop.
///
/// Registration goes through this façade; the server owns its [`Registry`]
/// so two instances in one process never share routes or subscribers.
pub struct Server {
    registry: Arc<Registry>,
    pipeline: Pipeline,
    address: Vec<SocketAddr>,
    read_timeout: Duration,
    maintenance_interval: Option<Duration>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mounts `handler` per the route descriptor.
    pub fn add_handler(
        &self,
        route: Route,
        handler: Arc<dyn RequestHandler>,
        policy: ReplacePolicy,
    ) -> Result<(), RegisterError> {
        self.registry.router().register(route, handler, policy)
    }

    /// Mounts a `307 Temporary Redirect` from `template` to `target`.
    pub fn redirect(
        &self,
        host: impl Into<String>,
        method: Method,
        template: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), RegisterError> {
        let target = target.into();
        let location = HeaderValue::try_from(target.as_str())
            .map_err(|_| RegisterError::InvalidRedirectTarget { target: target.clone() })?;

        let route = Route::new(host, template).method(method);
        self.registry.router().register(route, Arc::new(RedirectHandler { location }), ReplacePolicy::Fail)
    }

    pub fn add_auth(&self, authenticator: Arc<dyn Authenticator>) {
        self.registry.add_auth(authenticator);
    }

    pub fn add_filter(&self, filter: Arc<dyn RequestFilter>) {
        self.registry.add_filter(filter);
    }

    pub fn add_rewrite(&self, rewriter: Arc<dyn RequestRewriter>) {
        self.registry.add_rewrite(rewriter);
    }

    pub fn on_request(&self, observer: Arc<dyn RequestObserver>) -> SubscriptionId {
        self.registry.request_log().add(observer)
    }

    pub fn on_response(&self, observer: Arc<dyn ResponseObserver>) -> SubscriptionId {
        self.registry.response_log().add(observer)
    }

    pub fn on_error(&self, observer: Arc<dyn ErrorObserver>) -> SubscriptionId {
        self.registry.error_log().add(observer)
    }

    pub fn on_maintenance(&self, task: Arc<dyn MaintenanceTask>) -> SubscriptionId {
        self.registry.maintenance().add(task)
    }

    /// Binds and serves until the process ends.
    pub async fn start(self) {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            // a subscriber installed by the embedding application wins
            info!("tracing subscriber already installed");
        }

        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };

        if let Some(interval) = self.maintenance_interval {
            spawn_maintenance(self.registry.clone(), interval);
        }

        let read_timeout = self.read_timeout;
        let handler = Arc::new(self);
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let local_addr = match tcp_stream.local_addr() {
                Ok(local_addr) => local_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to read local addr");
                    continue;
                }
            };

            let handler = handler.clone();

            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let info = ConnectionInfo::new(local_addr, remote_addr);
                let connection = HttpConnection::new(reader, writer, info).with_read_timeout(read_timeout);
                match connection.process(handler).await {
                    Ok(_) => {
                        info!(remote = %remote_addr, "connection finished");
                    }
                    Err(e) => {
                        error!(remote = %remote_addr, cause = %e, "connection finished with error");
                    }
                }
            });
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("read_timeout", &self.read_timeout)
            .field("maintenance_interval", &self.maintenance_interval)
            .finish_non_exhaustive()
    }
}

/// Periodic maintenance: ticks dispatch the maintenance fan-out, serialized
/// by a semaphore so a slow tick is never overlapped; a tick that cannot
/// acquire in time is skipped, not queued.
fn spawn_maintenance(registry: Arc<Registry>, interval: Duration) {
    let semaphore = Arc::new(Semaphore::new(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let permit = match tokio::time::timeout(MAINTENANCE_ACQUIRE_TIMEOUT, semaphore.clone().acquire_owned()).await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_closed)) => return,
                Err(_elapsed) => {
                    warn!("maintenance tick skipped, previous tick still running");
                    continue;
                }
            };

            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .maintenance()
                    .for_each(|task| async move {
                        if let Err(e) = task.tick().await {
                            warn!(cause = %e, "maintenance task failed");
                        }
                    })
                    .await;
                drop(permit);
            });
        }
    });
}

struct RedirectHandler {
    location: HeaderValue,
}

#[async_trait]
impl RequestHandler for RedirectHandler {
    async fn invoke(
        &self,
        _ctx: &RequestContext,
        _req_body: OptionReqBody,
    ) -> Result<Response<ResponseBody>, Box<dyn std::error::Error + Send + Sync>> {
        let response = Response::builder()
            .status(StatusCode::TEMPORARY_REDIRECT)
            .header(LOCATION, self.location.clone())
            .body(ResponseBody::empty())?;
        Ok(response)
    }
}

#[async_trait]
impl Handler for Server {
    type RespBody = ResponseBody;
    type Error = Infallible;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<ResponseBody>, Infallible> {
        Ok(self.pipeline.dispatch(req).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::test_support::request;
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn test_server() -> Server {
        Server::builder().address("127.0.0.1:0").build().unwrap()
    }

    #[test]
    fn builder_requires_an_address() {
        let err = Server::builder().build().unwrap_err();
        assert!(matches!(err, ServerBuildError::MissingAddress));
    }

    #[tokio::test]
    async fn redirect_answers_307_with_location() {
        let server = test_server();
        server.redirect("*", Method::GET, "/old", "/new").unwrap();

        let response = server.call(request(Method::GET, "/old")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/new");
    }

    #[tokio::test]
    async fn invalid_redirect_target_is_rejected() {
        let server = test_server();
        let err = server.redirect("*", Method::GET, "/old", "bad\ntarget").unwrap_err();
        assert!(matches!(err, RegisterError::InvalidRedirectTarget { .. }));
    }

    #[tokio::test]
    async fn get_users_by_id_end_to_end() {
        let server = test_server();
        server
            .add_handler(
                Route::new("*", "/users/{id}").method(Method::GET).content_type(mime::APPLICATION_JSON),
                Arc::new(handler_fn(|ctx: &RequestContext, _body| {
                    let id = ctx.path_params().get("id").unwrap_or("").to_string();
                    async move {
                        let body = ResponseBody::json(&serde_json::json!({ "id": id }))?;
                        let response = Response::builder()
                            .status(StatusCode::OK)
                            .header(http::header::CONTENT_TYPE, "application/json")
                            .body(body)?;
                        Ok(response)
                    }
                })),
                ReplacePolicy::Fail,
            )
            .unwrap();

        let (client, server_io) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_io);

        let info = ConnectionInfo::new("127.0.0.1:8080".parse().unwrap(), "127.0.0.1:50000".parse().unwrap());
        let connection = HttpConnection::new(server_read, server_write, info);
        let handler = Arc::new(server);
        tokio::spawn(async move {
            let _ = connection.process(handler).await;
        });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"GET /users/42 HTTP/1.1\r\nHost: localhost\r\nAccept: application/json\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut raw = Vec::new();
        client_read.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8(raw).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains(r#"{"id":"42"}"#));
    }

    #[tokio::test]
    async fn unregistered_path_end_to_end_is_404() {
        let server = test_server();
        server.add_handler(Route::new("*", "/known").method(Method::GET), noop(), ReplacePolicy::Fail).unwrap();

        let response = server.call(request(Method::GET, "/unknown")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_maintenance_ticks_are_skipped_not_queued() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Slow(Arc<AtomicUsize>);

        #[async_trait]
        impl MaintenanceTask for Slow {
            async fn tick(&self) -> Result<(), crate::handler::BoxError> {
                self.0.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(2500)).await;
                Ok(())
            }
        }

        let registry = Arc::new(Registry::new());
        let runs = Arc::new(AtomicUsize::new(0));
        registry.maintenance().add(Arc::new(Slow(runs.clone())) as Arc<dyn MaintenanceTask>);

        spawn_maintenance(registry, Duration::from_millis(1000));

        tokio::time::sleep(Duration::from_millis(4600)).await;

        // ticks at 0/1000/2000/3000/4000 ms, but each run holds the permit
        // for 2500 ms, so roughly every other tick is skipped
        let observed = runs.load(Ordering::Relaxed);
        assert!(observed >= 1 && observed <= 3, "observed {observed} maintenance runs");
    }

    fn noop() -> Arc<dyn RequestHandler> {
        Arc::new(handler_fn(|_ctx: &RequestContext, _body| async {
            Ok(Response::new(ResponseBody::from(Bytes::new())))
        }))
    }
}
