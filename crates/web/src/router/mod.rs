//! Four-level routing: host pattern → URL template → method → content type.
//!
//! The whole table lives behind an [`ArcSwap`]: lookups never take a lock,
//! registration clones the table under a writer mutex, mutates the clone and
//! publishes it whole, so a concurrent lookup only ever observes fully built
//! nodes.

pub mod host;
pub mod template;

pub use host::HostPattern;
pub use template::UrlTemplate;

use crate::handler::{RequestHandler, RouteErrorHandler};
use crate::negotiate::{best_match, Preference};
use crate::observe::{RequestObserver, ResponseObserver};
use crate::PathParams;
use arc_swap::ArcSwap;
use http::Method;
use mime::Mime;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// What to do when a registration collides with an existing handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacePolicy {
    /// Refuse the registration with [`RegisterError::Duplicate`].
    #[default]
    Fail,
    /// Swap the handler in place.
    Replace,
}

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("handler already registered for {host} {template} ({method:?}, {content_type:?})")]
    Duplicate { host: String, template: String, method: Option<Method>, content_type: Option<String> },

    #[error("a content type binding requires a method")]
    ContentTypeWithoutMethod,

    #[error("invalid url template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: &'static str },

    #[error("invalid host pattern '{pattern}'")]
    InvalidHost { pattern: String },

    #[error("invalid redirect target '{target}'")]
    InvalidRedirectTarget { target: String },
}

impl RegisterError {
    pub(crate) fn invalid_template(template: &str, reason: &'static str) -> Self {
        RegisterError::InvalidTemplate { template: template.to_string(), reason }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no matching host node for '{host}'")]
    NoHost { host: String },

    #[error("no route matches path '{path}'")]
    NoMatch { path: String },

    #[error("method {method} not allowed for path '{path}'")]
    MethodNotAllowed { method: Method, path: String },
}

/// Registration descriptor: where a handler is mounted plus its per-route
/// collaborators.
///
/// Several templates and content types may be given; the handler is bound to
/// the full cross product in one atomic registration.
pub struct Route {
    host: String,
    templates: Vec<String>,
    method: Option<Method>,
    content_types: Vec<Mime>,
    request_observer: Option<Arc<dyn RequestObserver>>,
    response_observer: Option<Arc<dyn ResponseObserver>>,
    error_handler: Option<Arc<dyn RouteErrorHandler>>,
}

impl Route {
    pub fn new(host: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            templates: vec![template.into()],
            method: None,
            content_types: Vec::new(),
            request_observer: None,
            response_observer: None,
            error_handler: None,
        }
    }

    /// Adds another template bound to the same handler.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.templates.push(template.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn content_type(mut self, content_type: Mime) -> Self {
        self.content_types.push(content_type);
        self
    }

    pub fn observe_request(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.request_observer = Some(observer);
        self
    }

    pub fn observe_response(mut self, observer: Arc<dyn ResponseObserver>) -> Self {
        self.response_observer = Some(observer);
        self
    }

    pub fn on_error(mut self, error_handler: Arc<dyn RouteErrorHandler>) -> Self {
        self.error_handler = Some(error_handler);
        self
    }
}

/// Immutable snapshot produced by a successful resolve; consumed once per
/// request.
pub struct RouteHandle {
    handler: Arc<dyn RequestHandler>,
    error_handler: Option<Arc<dyn RouteErrorHandler>>,
    request_observer: Option<Arc<dyn RequestObserver>>,
    response_observer: Option<Arc<dyn ResponseObserver>>,
    params: PathParams,
    content_type: Option<Mime>,
}

impl RouteHandle {
    pub fn handler(&self) -> &Arc<dyn RequestHandler> {
        &self.handler
    }

    pub fn error_handler(&self) -> Option<&Arc<dyn RouteErrorHandler>> {
        self.error_handler.as_ref()
    }

    pub fn request_observer(&self) -> Option<&Arc<dyn RequestObserver>> {
        self.request_observer.as_ref()
    }

    pub fn response_observer(&self) -> Option<&Arc<dyn ResponseObserver>> {
        self.response_observer.as_ref()
    }

    /// Captures of the winning template, in template order.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn take_params(&mut self) -> PathParams {
        std::mem::take(&mut self.params)
    }

    /// The concrete type negotiation settled on, when it did.
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }
}

impl fmt::Debug for RouteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteHandle")
            .field("params", &self.params)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default)]
struct RouteTable {
    hosts: Vec<HostEntry>,
}

#[derive(Clone)]
struct HostEntry {
    pattern: HostPattern,
    routes: Vec<UrlEntry>,
}

#[derive(Clone)]
struct UrlEntry {
    template: UrlTemplate,
    /// registration order, breaks rank ties deterministically
    order: u64,
    methods: HashMap<Method, MethodEntry>,
    /// method-agnostic default for this template
    fallback: Option<Arc<dyn RequestHandler>>,
}

#[derive(Clone, Default)]
struct MethodEntry {
    default: Option<Arc<dyn RequestHandler>>,
    leaves: Vec<(Mime, Arc<dyn RequestHandler>)>,
    error_handler: Option<Arc<dyn RouteErrorHandler>>,
    request_observer: Option<Arc<dyn RequestObserver>>,
    response_observer: Option<Arc<dyn ResponseObserver>>,
}

pub struct Router {
    table: ArcSwap<RouteTable>,
    write_lock: Mutex<()>,
    order: AtomicU64,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { table: ArcSwap::from_pointee(RouteTable::default()), write_lock: Mutex::new(()), order: AtomicU64::new(0) }
    }

    /// Registers `handler` at every (template × content type) combination of
    /// `route`. The registration is atomic: on any error nothing is
    /// published.
    pub fn register(
        &self,
        route: Route,
        handler: Arc<dyn RequestHandler>,
        policy: ReplacePolicy,
    ) -> Result<(), RegisterError> {
        if route.method.is_none() && !route.content_types.is_empty() {
            return Err(RegisterError::ContentTypeWithoutMethod);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = RouteTable::clone(&self.table.load());

        for raw_template in &route.templates {
            let template = UrlTemplate::parse(raw_template)?;
            if route.content_types.is_empty() {
                self.insert(&mut table, &route, &template, None, &handler, policy)?;
            } else {
                for content_type in &route.content_types {
                    self.insert(&mut table, &route, &template, Some(content_type), &handler, policy)?;
                }
            }
        }

        self.table.store(Arc::new(table));
        Ok(())
    }

    fn insert(
        &self,
        table: &mut RouteTable,
        route: &Route,
        template: &UrlTemplate,
        content_type: Option<&Mime>,
        handler: &Arc<dyn RequestHandler>,
        policy: ReplacePolicy,
    ) -> Result<(), RegisterError> {
        let pattern = HostPattern::parse(&route.host)
            .ok_or_else(|| RegisterError::InvalidHost { pattern: route.host.clone() })?;

        let host_entry = match table.hosts.iter_mut().find(|entry| entry.pattern == pattern) {
            Some(entry) => entry,
            None => {
                table.hosts.push(HostEntry { pattern, routes: Vec::new() });
                table.hosts.last_mut().expect("just pushed")
            }
        };

        let url_entry = match host_entry.routes.iter_mut().find(|entry| entry.template.same_shape(template)) {
            Some(entry) => entry,
            None => {
                let order = self.order.fetch_add(1, Ordering::Relaxed);
                host_entry.routes.push(UrlEntry {
                    template: template.clone(),
                    order,
                    methods: HashMap::new(),
                    fallback: None,
                });
                host_entry.routes.last_mut().expect("just pushed")
            }
        };

        let duplicate = || RegisterError::Duplicate {
            host: route.host.clone(),
            template: template.as_str().to_string(),
            method: route.method.clone(),
            content_type: content_type.map(|m| m.essence_str().to_string()),
        };

        let Some(method) = &route.method else {
            if url_entry.fallback.is_some() && policy == ReplacePolicy::Fail {
                return Err(duplicate());
            }
            url_entry.fallback = Some(handler.clone());
            return Ok(());
        };

        let method_entry = url_entry.methods.entry(method.clone()).or_default();

        match content_type {
            None => {
                if method_entry.default.is_some() && policy == ReplacePolicy::Fail {
                    return Err(duplicate());
                }
                method_entry.default = Some(handler.clone());
            }
            Some(mime) => {
                match method_entry.leaves.iter_mut().find(|(m, _)| m.essence_str() == mime.essence_str()) {
                    Some((_, existing)) => {
                        if policy == ReplacePolicy::Fail {
                            return Err(duplicate());
                        }
                        *existing = handler.clone();
                    }
                    None => method_entry.leaves.push((mime.clone(), handler.clone())),
                }
            }
        }

        if let Some(observer) = &route.request_observer {
            method_entry.request_observer = Some(observer.clone());
        }
        if let Some(observer) = &route.response_observer {
            method_entry.response_observer = Some(observer.clone());
        }
        if let Some(error_handler) = &route.error_handler {
            method_entry.error_handler = Some(error_handler.clone());
        }

        Ok(())
    }

    /// Resolves a request to the handler snapshot that should serve it.
    ///
    /// `accept` is the raw `Accept` header value driving content
    /// negotiation.
    pub fn resolve(
        &self,
        host: &str,
        path: &str,
        method: &Method,
        accept: Option<&str>,
    ) -> Result<RouteHandle, ResolveError> {
        let table = self.table.load();

        let host_entry = table
            .hosts
            .iter()
            .filter(|entry| entry.pattern.matches(host))
            .min_by_key(|entry| entry.pattern.precedence())
            .ok_or_else(|| ResolveError::NoHost { host: host.to_string() })?;

        let mut matches: Vec<(&UrlEntry, PathParams)> =
            host_entry.routes.iter().filter_map(|entry| entry.template.matches(path).map(|p| (entry, p))).collect();

        if matches.is_empty() {
            return Err(ResolveError::NoMatch { path: path.to_string() });
        }

        // highest rank first; registration order settles ties (stable)
        matches.sort_by_key(|(entry, _)| (Reverse(entry.template.rank()), entry.order));

        let (winner, params) = matches
            .into_iter()
            .find(|(entry, _)| entry.methods.contains_key(method) || entry.fallback.is_some())
            .ok_or_else(|| ResolveError::MethodNotAllowed { method: method.clone(), path: path.to_string() })?;

        let Some(method_entry) = winner.methods.get(method) else {
            let Some(fallback) = &winner.fallback else {
                return Err(ResolveError::MethodNotAllowed { method: method.clone(), path: path.to_string() });
            };
            return Ok(RouteHandle {
                handler: fallback.clone(),
                error_handler: None,
                request_observer: None,
                response_observer: None,
                params,
                content_type: None,
            });
        };

        let available: Vec<Mime> = method_entry.leaves.iter().map(|(mime, _)| mime.clone()).collect();

        let (handler, content_type) = match best_match(accept, &available) {
            Some(Preference::Concrete(mime)) => {
                let handler = method_entry
                    .leaves
                    .iter()
                    .find(|(m, _)| m.essence_str() == mime.essence_str())
                    .map(|(_, h)| h.clone())
                    .expect("negotiated type comes from the leaf set");
                (handler, Some(mime))
            }
            Some(Preference::Any) => {
                // anything goes: method default, else the leaf set's first
                // entry, else the template's method-agnostic fallback
                let handler = method_entry
                    .default
                    .clone()
                    .or_else(|| method_entry.leaves.first().map(|(_, h)| h.clone()))
                    .or_else(|| winner.fallback.clone());
                match handler {
                    Some(handler) => (handler, None),
                    None => return Err(ResolveError::NoMatch { path: path.to_string() }),
                }
            }
            None => {
                let handler = method_entry.default.clone().or_else(|| winner.fallback.clone());
                match handler {
                    Some(handler) => (handler, None),
                    None => return Err(ResolveError::NoMatch { path: path.to_string() }),
                }
            }
        };

        Ok(RouteHandle {
            handler,
            error_handler: method_entry.error_handler.clone(),
            request_observer: method_entry.request_observer.clone(),
            response_observer: method_entry.response_observer.clone(),
            params,
            content_type,
        })
    }
}
