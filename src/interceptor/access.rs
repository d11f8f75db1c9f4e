use serde::Serialize;
use std::error::Error;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use super::{apply_target, CallTarget, InFlight, InterceptorContext};
use crate::context::RequestContext;
use crate::record::LogType;
use crate::utils;

/// Per-endpoint access log settings. Unset flags fall back to the global
/// defaults in [`crate::config::LogConfig`].
#[derive(Debug, Clone, Default)]
pub struct AccessLog {
    pub description: Option<String>,
    pub record_params: Option<bool>,
    pub record_result: Option<bool>,
    pub record_headers: Option<bool>,
    pub target: Option<CallTarget>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.is_empty()).then_some(description);
        self
    }

    pub fn record_params(mut self, record: bool) -> Self {
        self.record_params = Some(record);
        self
    }

    pub fn record_result(mut self, record: bool) -> Self {
        self.record_result = Some(record);
        self
    }

    pub fn record_headers(mut self, record: bool) -> Self {
        self.record_headers = Some(record);
        self
    }

    pub fn target(mut self, class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        self.target = Some(CallTarget::new(class_name, method_name));
        self
    }
}

/// Records one [`LogType::Access`] entry per request handled.
#[derive(Clone)]
pub struct AccessLogInterceptor {
    ctx: Arc<InterceptorContext>,
}

impl AccessLogInterceptor {
    pub fn new(ctx: Arc<InterceptorContext>) -> Self {
        AccessLogInterceptor { ctx }
    }

    /// Run `call` and record it as an access log entry.
    ///
    /// Nothing is recorded when there is no request in scope, when access
    /// logging is switched off, or when the request path is excluded. The
    /// value or error produced by `call` is returned unchanged in every case.
    pub async fn intercept<F, Fut, T, E>(
        &self,
        access: &AccessLog,
        request: Option<&dyn RequestContext>,
        call: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + Debug,
        E: Error + 'static,
    {
        let ctx = &*self.ctx;
        let config = ctx.config();
        let Some(request) = request else {
            return call().await;
        };
        if !config.access_active() || ctx.is_excluded(Some(request)) {
            return call().await;
        }

        let mut record = ctx.new_record(LogType::Access, Some(request));
        record.description = access.description.clone();
        apply_target(&mut record, access.target.as_ref());

        if access.record_params.unwrap_or(config.record_request_params) {
            record.request_params = ctx.truncate_request(utils::request_params(request));
        }
        if access.record_headers.unwrap_or(config.record_headers) {
            record.request_headers = Some(utils::request_headers(request, &config.redacted_headers));
        }

        let mut in_flight = InFlight::start(ctx, record);
        let outcome = call().await;

        match &outcome {
            Ok(value) => {
                let result = access
                    .record_result
                    .unwrap_or(config.record_response_result)
                    .then(|| utils::to_json(value))
                    .and_then(|json| ctx.truncate_response(json));
                in_flight.succeed(200, result);
            }
            Err(e) => in_flight.fail(e, true),
        }

        in_flight.finish().await;
        outcome
    }
}
