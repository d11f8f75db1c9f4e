//! Wrappers that record a [`LogRecord`] around a unit of work.
//!
//! Every interceptor follows the same protocol: an entry gate (global and
//! per-category switches, excluded paths), record construction, the wrapped
//! call itself, success or failure bookkeeping, and finalization followed by
//! dispatch. The wrapped call's result is always returned untouched.

mod access;
mod exception;
mod operation;

pub use access::{AccessLog, AccessLogInterceptor};
pub use exception::{ErrorResponse, ExceptionInterceptor, Handled, GENERIC_ERROR_MESSAGE};
pub use operation::{OperationLog, OperationLogInterceptor};

use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::LogConfig;
use crate::context::{IdentityProvider, RequestContext, ServerInfo};
use crate::dispatcher::Dispatcher;
use crate::error::ConfigError;
use crate::record::{LogRecord, LogType};
use crate::utils::{self, PathMatcher};

/// Component and method an interceptor is wrapped around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub class_name: String,
    pub method_name: String,
}

impl CallTarget {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        CallTarget {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }
}

/// Everything the interceptors share: configuration, compiled exclusion
/// patterns, server identity, the optional identity provider and the
/// dispatcher. Built once at startup and shared behind an `Arc`.
pub struct InterceptorContext {
    config: Arc<LogConfig>,
    excluded: PathMatcher,
    server: ServerInfo,
    identity: Option<Arc<dyn IdentityProvider>>,
    dispatcher: Arc<Dispatcher>,
}

impl InterceptorContext {
    /// Compile the exclusion patterns and detect the server identity.
    ///
    /// **Returns**
    /// - `Err(ConfigError::Pattern { .. })` if an excluded path cannot be
    ///   compiled.
    pub fn new(config: Arc<LogConfig>, dispatcher: Arc<Dispatcher>) -> Result<Self, ConfigError> {
        let excluded = PathMatcher::new(&config.excluded_paths)?;
        config.log_summary();
        Ok(InterceptorContext {
            config,
            excluded,
            server: ServerInfo::detect(),
            identity: None,
            dispatcher,
        })
    }

    pub fn with_identity(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    pub fn with_server_info(mut self, server: ServerInfo) -> Self {
        self.server = server;
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    fn is_excluded(&self, request: Option<&dyn RequestContext>) -> bool {
        request
            .and_then(|r| r.uri())
            .is_some_and(|uri| self.excluded.is_excluded(uri))
    }

    fn new_record(&self, log_type: LogType, request: Option<&dyn RequestContext>) -> LogRecord {
        let mut record =
            utils::create_log_record(log_type, request, self.identity.as_deref(), &self.server);
        record.app_name = Some(self.config.app_name.clone());
        record
    }

    fn truncate_request(&self, text: String) -> Option<String> {
        utils::truncate(Some(text), self.config.max_request_length)
    }

    fn truncate_response(&self, text: String) -> Option<String> {
        utils::truncate(Some(text), self.config.max_response_length)
    }
}

fn apply_target(record: &mut LogRecord, target: Option<&CallTarget>) {
    if let Some(target) = target {
        record.class_name = Some(target.class_name.clone());
        record.method_name = Some(target.method_name.clone());
    }
}

/// A record between invocation and dispatch.
///
/// If the wrapped future is dropped before [`InFlight::finish`] runs, the
/// guard still finalizes the record as a failure and submits it without
/// blocking. The exception reads `"panicked"` when the drop happens during
/// unwinding and `"cancelled"` otherwise.
struct InFlight<'a> {
    ctx: &'a InterceptorContext,
    record: Option<LogRecord>,
    started: Instant,
}

impl<'a> InFlight<'a> {
    fn start(ctx: &'a InterceptorContext, record: LogRecord) -> Self {
        InFlight {
            ctx,
            record: Some(record),
            started: Instant::now(),
        }
    }

    fn succeed(&mut self, status: u16, result: Option<String>) {
        if let Some(record) = self.record.as_mut() {
            record.success = true;
            record.response_status = Some(status);
            record.response_result = result;
        }
    }

    fn fail(&mut self, error: &(dyn Error + 'static), with_trace: bool) {
        if let Some(record) = self.record.as_mut() {
            record.success = false;
            record.exception = Some(error.to_string());
            if with_trace {
                record.stack_trace = Some(utils::get_stack_trace(error));
            }
        }
    }

    fn seal(&mut self) -> Option<LogRecord> {
        let mut record = self.record.take()?;
        record.finalize(self.started.elapsed(), self.ctx.config.slow_request_threshold_ms);
        Some(record)
    }

    async fn finish(mut self) {
        if let Some(record) = self.seal() {
            self.ctx.dispatcher.dispatch(record).await;
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let reason = if std::thread::panicking() { "panicked" } else { "cancelled" };
        if let Some(record) = self.record.as_mut() {
            record.success = false;
            record.exception.get_or_insert_with(|| reason.to_string());
        }
        if let Some(record) = self.seal() {
            debug!(log_id = %record.log_id, reason, "intercepted call did not complete");
            self.ctx.dispatcher.dispatch_detached(record);
        }
    }
}
