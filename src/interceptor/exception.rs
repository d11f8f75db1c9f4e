use chrono::Utc;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::InterceptorContext;
use crate::context::{RequestContext, ResponseState};
use crate::record::{LogRecord, LogType};
use crate::utils;

/// Message used when the failure renders as an empty string.
pub const GENERIC_ERROR_MESSAGE: &str = "Internal server error";

/// Uniform error payload returned for failures that reach the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: u16,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ErrorResponse {
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        ErrorResponse {
            success: false,
            code: 500,
            message: if message.is_empty() {
                GENERIC_ERROR_MESSAGE.to_string()
            } else {
                message
            },
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// A failure that went through the [`ExceptionInterceptor`].
///
/// `error` is the original failure, untouched. `response` is the payload to
/// send, or `None` when the response had already been committed and must not
/// be written again.
#[derive(Debug)]
pub struct Handled<E> {
    pub error: E,
    pub response: Option<ErrorResponse>,
}

impl<E> Handled<E> {
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: fmt::Display> fmt::Display for Handled<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<E: Error + 'static> Error for Handled<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Last line of defence for failures escaping a request handler.
///
/// Every failure is recorded as a [`LogType::Exception`] entry with its full
/// trace. If the response has not been committed yet, an [`ErrorResponse`] is
/// produced; otherwise the failure is only logged.
#[derive(Clone)]
pub struct ExceptionInterceptor {
    ctx: Arc<InterceptorContext>,
}

impl ExceptionInterceptor {
    pub fn new(ctx: Arc<InterceptorContext>) -> Self {
        ExceptionInterceptor { ctx }
    }

    /// Run `call`; successful results pass straight through.
    pub async fn intercept<F, Fut, T, E>(
        &self,
        request: Option<&dyn RequestContext>,
        response: &dyn ResponseState,
        call: F,
    ) -> Result<T, Handled<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        let started = Instant::now();
        match call().await {
            Ok(value) => Ok(value),
            Err(error) => {
                let (record, payload) = self.prepare(&error, request, response, started.elapsed());
                if let Some(record) = record {
                    self.ctx.dispatcher().dispatch(record).await;
                }
                Err(Handled { error, response: payload })
            }
        }
    }

    /// Record a failure caught elsewhere and build the payload for it.
    pub async fn handle_error<E>(
        &self,
        error: &E,
        request: Option<&dyn RequestContext>,
        response: &dyn ResponseState,
    ) -> Option<ErrorResponse>
    where
        E: Error + 'static,
    {
        let (record, payload) = self.prepare(error, request, response, Duration::ZERO);
        if let Some(record) = record {
            self.ctx.dispatcher().dispatch(record).await;
        }
        payload
    }

    /// Build the record (if exception logging applies) and the payload.
    ///
    /// Kept synchronous so no borrow of the error is held across the
    /// dispatch; the returned values are owned and `Send`.
    fn prepare(
        &self,
        error: &(dyn Error + 'static),
        request: Option<&dyn RequestContext>,
        response: &dyn ResponseState,
        elapsed: Duration,
    ) -> (Option<LogRecord>, Option<ErrorResponse>) {
        let ctx = &*self.ctx;
        let config = ctx.config();
        let message = error.to_string();
        let committed = response.is_committed();
        if committed {
            warn!(error = %message, "response already committed, skipping error payload");
        }

        let record = (config.exception_active() && !ctx.is_excluded(request)).then(|| {
            let mut record = ctx.new_record(LogType::Exception, request);
            record.success = false;
            record.exception = Some(message.clone());
            record.stack_trace = Some(utils::get_stack_trace(error));
            if !committed {
                record.response_status = Some(500);
            }
            if config.record_request_params {
                record.request_params = request
                    .map(utils::request_params)
                    .filter(|p| !p.is_empty())
                    .and_then(|p| ctx.truncate_request(p));
            }
            record.finalize(elapsed, config.slow_request_threshold_ms);
            record
        });

        (record, (!committed).then(|| ErrorResponse::internal(message)))
    }
}
