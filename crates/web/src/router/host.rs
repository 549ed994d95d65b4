//! Hostname patterns for the first routing level.
//!
//! Four shapes, from most to least specific: `host:port`, `host:*` (any
//! port, also what a bare `host` means), `*:port`, and `*`. Hostnames are
//! matched case-insensitively.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// `example.com:8080`
    Exact { host: String, port: u16 },
    /// `example.com:*` or bare `example.com`
    AnyPort { host: String },
    /// `*:8080`
    AnyHost { port: u16 },
    /// `*`
    Any,
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern.is_empty() {
            return None;
        }
        if pattern == "*" {
            return Some(HostPattern::Any);
        }

        match pattern.rsplit_once(':') {
            Some(("*", port)) => port.parse().ok().map(|port| HostPattern::AnyHost { port }),
            Some((host, "*")) if !host.is_empty() => Some(HostPattern::AnyPort { host: host.to_string() }),
            Some((host, port)) if !host.is_empty() => {
                port.parse().ok().map(|port| HostPattern::Exact { host: host.to_string(), port })
            }
            _ => Some(HostPattern::AnyPort { host: pattern }),
        }
    }

    /// Lower is more specific; resolution tries patterns in this order.
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            HostPattern::Exact { .. } => 0,
            HostPattern::AnyPort { .. } => 1,
            HostPattern::AnyHost { .. } => 2,
            HostPattern::Any => 3,
        }
    }

    /// Matches a request authority, e.g. `example.com:8080` or
    /// `example.com`. A request without a port never matches an
    /// `Exact`/`AnyHost` pattern.
    pub fn matches(&self, authority: &str) -> bool {
        let authority = authority.trim();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host, Some(port)),
                Err(_) => (authority, None),
            },
            None => (authority, None),
        };

        match self {
            HostPattern::Exact { host: h, port: p } => host.eq_ignore_ascii_case(h) && port == Some(*p),
            HostPattern::AnyPort { host: h } => host.eq_ignore_ascii_case(h),
            HostPattern::AnyHost { port: p } => port == Some(*p),
            HostPattern::Any => true,
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPattern::Exact { host, port } => write!(f, "{host}:{port}"),
            HostPattern::AnyPort { host } => write!(f, "{host}:*"),
            HostPattern::AnyHost { port } => write!(f, "*:{port}"),
            HostPattern::Any => f.write_str("*"),
        }
    }
}
