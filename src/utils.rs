//! Stateless helpers shared by the interceptors.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Debug, Write as _};
use tracing::debug;
use uuid::Uuid;

use crate::context::{IdentityProvider, RequestContext, ServerInfo};
use crate::error::ConfigError;
use crate::record::{LogRecord, LogType};

/// Appended to every value cut by [`truncate`].
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// Replacement for values of redacted headers.
pub const REDACTED_VALUE: &str = "******";

/// 32 lower-case hex characters, unique per event.
pub fn generate_log_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Build a record carrying only identity and context fields.
///
/// The identity lookup is best-effort: a missing provider or a provider that
/// returns `None` simply leaves `user_id` / `username` empty.
pub fn create_log_record(
    log_type: LogType,
    request: Option<&dyn RequestContext>,
    identity: Option<&dyn IdentityProvider>,
    server: &ServerInfo,
) -> LogRecord {
    let mut record = LogRecord::new(generate_log_id(), log_type);
    record.server_ip = Some(server.ip.clone());
    record.server_host = Some(server.host.clone());

    if let Some(request) = request {
        record.request_method = request.method().map(str::to_string);
        record.request_uri = request.uri().map(str::to_string);
        record.client_ip = request.client_ip().map(str::to_string);
        record.user_agent = request.user_agent().map(str::to_string);
    }

    if let Some(actor) = identity.and_then(|p| p.current_identity(request)) {
        record.user_id = actor.user_id;
        record.username = actor.username;
    } else {
        debug!(log_id = %record.log_id, "no identity resolved for log record");
    }

    record
}

/// Cut `text` to `max_length` characters and append [`TRUNCATION_MARKER`].
///
/// Lengths are counted in `char`s so multi-byte text is never split.
pub fn truncate(text: Option<String>, max_length: usize) -> Option<String> {
    let text = text?;
    match text.char_indices().nth(max_length) {
        None => Some(text),
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
            out.push_str(&text[..cut]);
            out.push_str(TRUNCATION_MARKER);
            Some(out)
        }
    }
}

/// Returns `true` when `uri` matches any of the glob `patterns`.
///
/// Patterns are compiled on every call; hot paths should build a
/// [`PathMatcher`] once instead. Invalid patterns never match.
pub fn should_exclude<S: AsRef<str>>(uri: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| match glob_to_regex(pattern.as_ref()) {
        Ok(regex) => regex.is_match(uri),
        Err(e) => {
            debug!(pattern = pattern.as_ref(), error = %e, "skipping invalid exclusion pattern");
            false
        }
    })
}

/// Pre-compiled set of exclusion globs.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    patterns: Vec<Regex>,
}

impl PathMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                glob_to_regex(p.as_ref()).map_err(|source| ConfigError::Pattern {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PathMatcher { patterns })
    }

    pub fn is_excluded(&self, uri: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(uri))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// `**` matches anything including `/`, `*` anything except `/`; every other
/// character is literal. The whole URI has to match.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() * 2 + 2);
    source.push('^');
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("**") {
            source.push_str(".*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            source.push_str("[^/]*");
            rest = tail;
        } else {
            let next = rest.find('*').unwrap_or(rest.len());
            source.push_str(&regex::escape(&rest[..next]));
            rest = &rest[next..];
        }
    }
    source.push('$');
    Regex::new(&source)
}

/// Best-effort JSON rendering; falls back to the `Debug` form on failure.
pub fn to_json<T: Serialize + Debug + ?Sized>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            debug!(error = %e, "falling back to debug rendering");
            format!("{:?}", value)
        }
    }
}

/// Message of the error followed by every `source()` in the chain.
pub fn get_stack_trace(error: &(dyn Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    if source.is_some() {
        out.push_str("\n\nCaused by:");
    }
    let mut depth = 0;
    while let Some(cause) = source {
        let _ = write!(out, "\n    {}: {}", depth, cause);
        depth += 1;
        source = cause.source();
    }
    out
}

/// Render request parameters as `k=v1,v2&k2=v3`.
pub fn request_params(request: &dyn RequestContext) -> String {
    request
        .params()
        .iter()
        .map(|(key, values)| format!("{}={}", key, values.join(",")))
        .collect::<Vec<_>>()
        .join("&")
}

/// Collect request headers, masking the values of `redacted` names.
///
/// The result is keyed by header name, so it iterates in name order rather
/// than arrival order. A repeated name keeps its first value.
pub fn request_headers<S: AsRef<str>>(
    request: &dyn RequestContext,
    redacted: &[S],
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for (name, value) in request.headers() {
        let masked = redacted.iter().any(|r| r.as_ref().eq_ignore_ascii_case(&name));
        let value = if masked { REDACTED_VALUE.to_string() } else { value };
        headers.entry(name).or_insert(value);
    }
    headers
}

/// Display adapter printing `None` as `N/A`.
pub(crate) struct OrNa<'a>(pub &'a Option<String>);

impl fmt::Display for OrNa<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or("N/A"))
    }
}
