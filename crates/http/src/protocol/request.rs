//! Request header handling.
//!
//! [`RequestHeader`] wraps `http::Request<()>` so the engine can pass a parsed
//! header around before the body is attached. Connection metadata
//! ([`ConnectionInfo`], [`RequestId`], the advisory cancellation token) rides
//! in the request extensions and survives [`RequestHeader::body`], so handlers
//! can read it off the full `Request<ReqBody>`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};
use tokio_util::sync::CancellationToken;

/// Local and remote socket addresses of the connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl ConnectionInfo {
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self { local, remote }
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier assigned to every request, used to correlate
/// log events across the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A parsed request header without its body.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body, turning the header into a full `Request<T>`.
    /// Extensions (connection metadata) are preserved.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Host the request targets: the `Host` header, falling back to the URI
    /// authority (absolute-form request target).
    pub fn host(&self) -> Option<&str> {
        self.headers()
            .get(http::header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| self.uri().authority().map(|a| a.as_str()))
    }

    /// Whether the client asked to close the connection after this exchange.
    pub fn requests_close(&self) -> bool {
        connection_close(self.headers()) || self.version() == Version::HTTP_10 && !connection_keep_alive(self.headers())
    }

    pub fn set_connection_info(&mut self, info: ConnectionInfo) {
        self.inner.extensions_mut().insert(info);
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.inner.extensions().get::<ConnectionInfo>()
    }

    pub fn set_request_id(&mut self, id: RequestId) {
        self.inner.extensions_mut().insert(id);
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.inner.extensions().get::<RequestId>().copied()
    }

    /// Attaches the advisory cancellation token. The connection cancels it
    /// when the connection task terminates; handlers may observe it.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.inner.extensions_mut().insert(token);
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.inner.extensions().get::<CancellationToken>()
    }
}

fn connection_close(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}

fn connection_keep_alive(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("keep-alive"))
        .unwrap_or(false)
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}
