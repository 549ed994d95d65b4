//! Per-request context shared by every pipeline stage.
//!
//! [`RequestContext`] wraps the parsed request header and carries what the
//! pipeline learns along the way: the authenticated [`Identity`] (if any)
//! and the [`PathParams`] captured by the winning route template.

use http::{HeaderMap, Method, Uri, Version};
use std::collections::HashMap;
use trellis_http::protocol::{ConnectionInfo, RequestHeader, RequestId};

pub struct RequestContext {
    header: RequestHeader,
    params: PathParams,
    identity: Option<Identity>,
}

impl RequestContext {
    pub fn new(header: RequestHeader) -> Self {
        Self { header, params: PathParams::empty(), identity: None }
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn method(&self) -> &Method {
        self.header.method()
    }

    pub fn uri(&self) -> &Uri {
        self.header.uri()
    }

    pub fn version(&self) -> Version {
        self.header.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.header.headers()
    }

    /// Hostname the request was addressed to (`Host` header or URI
    /// authority).
    pub fn host(&self) -> Option<&str> {
        self.header.host()
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.header.request_id()
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.header.connection_info()
    }

    pub fn path_params(&self) -> &PathParams {
        &self.params
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub(crate) fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    /// Swaps the request header for a rewritten one. Identity and params
    /// survive the swap.
    pub(crate) fn replace_header(&mut self, header: RequestHeader) {
        self.header = header;
    }
}

/// Caller identity attached by the authentication chain.
///
/// Anonymous requests simply carry no identity; that is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    principal: String,
    attributes: HashMap<String, String>,
}

impl Identity {
    pub fn new(principal: impl Into<String>) -> Self {
        Self { principal: principal.into(), attributes: HashMap::new() }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Named captures from the matched URL template, in template order.
///
/// For the template `/users/{id}` and the path `/users/42`, `get("id")`
/// returns `"42"`.
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    entries: Vec<(String, String)>,
}

impl PathParams {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// Iterates captures in template order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    #[test]
    fn path_params_preserve_template_order() {
        let mut params = PathParams::empty();
        params.push("user", "alice");
        params.push("post", "7");

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("user"), Some("alice"));
        assert_eq!(params.get("post"), Some("7"));
        assert_eq!(params.get("missing"), None);

        let collected: Vec<_> = params.iter().collect();
        assert_eq!(collected, vec![("user", "alice"), ("post", "7")]);
    }

    #[test]
    fn context_carries_identity() {
        let header: RequestHeader =
            Request::builder().method(Method::GET).uri("/x").body(()).unwrap().into();
        let mut ctx = RequestContext::new(header);

        assert!(ctx.identity().is_none());
        ctx.set_identity(Identity::new("alice").with_attribute("role", "admin"));

        let identity = ctx.identity().unwrap();
        assert_eq!(identity.principal(), "alice");
        assert_eq!(identity.attribute("role"), Some("admin"));
    }
}
