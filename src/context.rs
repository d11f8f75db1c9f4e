//! Collaborators the interceptors read from: the current request, the
//! current actor and the state of the response channel.

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::env;

/// Read-only view of the request an interceptor runs inside.
///
/// Callers without a request in scope (background jobs, schedulers) pass
/// `None` instead of an implementation.
pub trait RequestContext: Send + Sync {
    fn method(&self) -> Option<&str>;
    fn uri(&self) -> Option<&str>;
    /// Header name/value pairs in arrival order.
    fn headers(&self) -> Vec<(String, String)>;
    /// Parameter name to values, in arrival order.
    fn params(&self) -> Vec<(String, Vec<String>)>;
    fn client_ip(&self) -> Option<&str>;
    fn user_agent(&self) -> Option<&str>;
}

/// Owned snapshot of a request, suitable for most transports.
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    pub method: Option<String>,
    pub uri: Option<String>,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, Vec<String>)>,
    pub peer_ip: Option<String>,
}

impl RequestSnapshot {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        RequestSnapshot {
            method: Some(method.into()),
            uri: Some(uri.into()),
            ..Default::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == name) {
            Some((_, values)) => values.push(value),
            None => self.params.push((name, vec![value])),
        }
        self
    }

    pub fn peer_ip(mut self, ip: impl Into<String>) -> Self {
        self.peer_ip = Some(ip.into());
        self
    }

    /// Add every `key=value` pair of a raw query string, percent-decoded.
    pub fn with_query(mut self, query: &str) -> Self {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            self = self.param(decode_component(key), decode_component(value));
        }
        self
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

impl RequestContext for RequestSnapshot {
    fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    fn params(&self) -> Vec<(String, Vec<String>)> {
        self.params.clone()
    }

    /// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the peer.
    fn client_ip(&self) -> Option<&str> {
        let forwarded = self
            .header_value("x-forwarded-for")
            .and_then(|v| v.split(',').map(str::trim).find(|ip| is_usable_ip(ip)));
        forwarded
            .or_else(|| self.header_value("x-real-ip").map(str::trim).filter(|ip| is_usable_ip(ip)))
            .or(self.peer_ip.as_deref())
    }

    fn user_agent(&self) -> Option<&str> {
        self.header_value("user-agent")
    }
}

fn is_usable_ip(value: &str) -> bool {
    !value.is_empty() && !value.eq_ignore_ascii_case("unknown")
}

#[cfg(feature = "http")]
impl From<&http::request::Parts> for RequestSnapshot {
    fn from(parts: &http::request::Parts) -> Self {
        RequestSnapshot::from_http(&parts.method, &parts.uri, &parts.headers)
    }
}

#[cfg(feature = "http")]
impl RequestSnapshot {
    pub fn from_request<B>(request: &http::Request<B>) -> Self {
        RequestSnapshot::from_http(request.method(), request.uri(), request.headers())
    }

    /// Non-UTF-8 header values are skipped.
    fn from_http(method: &http::Method, uri: &http::Uri, headers: &http::HeaderMap) -> Self {
        let mut snapshot = RequestSnapshot::new(method.as_str(), uri.path());
        snapshot.headers = headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        match uri.query() {
            Some(query) => snapshot.with_query(query),
            None => snapshot,
        }
    }
}

/// Current actor, as far as it can be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub username: Option<String>,
}

/// Optional source of the authenticated principal.
///
/// Returning `None` is the normal answer for anonymous requests and must never
/// be treated as an error by the logging path.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self, request: Option<&dyn RequestContext>) -> Option<Identity>;
}

/// Address and host name of this process, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub ip: String,
    pub host: String,
}

impl ServerInfo {
    pub fn new(ip: impl Into<String>, host: impl Into<String>) -> Self {
        ServerInfo { ip: ip.into(), host: host.into() }
    }

    /// Best-effort lookup; unresolved parts fall back to `"unknown"`.
    pub fn detect() -> Self {
        let host = env::env_or(env::LOG_SERVER_HOST_ENV, "");
        let host = if host.is_empty() {
            env::env_or("HOSTNAME", "unknown")
        } else {
            host
        };

        let ip = (host.as_str(), 0)
            .to_socket_addrs()
            .ok()
            .and_then(|addrs| {
                let all: Vec<_> = addrs.collect();
                all.iter()
                    .find(|a| !a.ip().is_loopback())
                    .or_else(|| all.first())
                    .map(|a| a.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        ServerInfo { ip, host }
    }
}

/// Whether the response for the current request has already started.
pub trait ResponseState: Send + Sync {
    fn is_committed(&self) -> bool;
}

impl ResponseState for bool {
    fn is_committed(&self) -> bool {
        *self
    }
}

/// Shared flag a transport flips once it has begun writing the response.
#[derive(Debug, Clone, Default)]
pub struct CommitFlag(Arc<AtomicBool>);

impl CommitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl ResponseState for CommitFlag {
    fn is_committed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
