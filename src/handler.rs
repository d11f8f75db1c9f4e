use crate::record::LogRecord;
use crate::utils::OrNa;
use async_trait::async_trait;
use std::error::Error;
use tracing::{error, info, warn};

/// Error type returned by [`LogHandler::handle`].
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Destination for finished [`LogRecord`]s.
///
/// Implementations decide where a record goes (console, database, message
/// queue, ...). The dispatcher calls every registered handler in ascending
/// [`order`](LogHandler::order); a handler that errors or panics is logged and
/// skipped without affecting the others or the intercepted call.
#[async_trait]
pub trait LogHandler: Send + Sync {
    /// Consume one finalized record.
    ///
    /// **Parameters**
    /// - `record`: sealed record shared with every other handler. Handlers
    ///   must not assume exclusive access and cannot mutate it.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was accepted.
    /// - `Err(..)` on failure; the dispatcher logs it and moves on to the next
    ///   handler. There is no retry.
    async fn handle(&self, record: &LogRecord) -> Result<(), HandlerError>;

    /// Priority; lower runs first. Defaults to the lowest priority.
    fn order(&self) -> i32 {
        i32::MAX
    }

    /// Name used in diagnostics when this handler fails.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Handler installed when nothing else is registered.
///
/// Writes each record to the `tracing` output using three tiers: failures at
/// `ERROR`, slow but successful calls at `WARN`, everything else as a
/// one-line `INFO` summary.
#[derive(Debug, Clone, Default)]
pub struct DefaultLogHandler;

impl DefaultLogHandler {
    fn render_failure(record: &LogRecord) -> String {
        format!(
            "\n+----------------------------------------------------------------\n\
             | FAILED {}\n\
             | request: {} {}\n\
             | user: {} ({})\n\
             | ip: {}\n\
             | module: {}\n\
             | operation: {}\n\
             | took: {}ms\n\
             | error: {}\n\
             +----------------------------------------------------------------",
            record.log_type,
            OrNa(&record.request_method),
            OrNa(&record.request_uri),
            record.username.as_deref().unwrap_or("anonymous"),
            OrNa(&record.user_id),
            OrNa(&record.client_ip),
            OrNa(&record.module),
            OrNa(&record.description),
            record.execution_time,
            OrNa(&record.exception),
        )
    }

    fn render_slow(record: &LogRecord) -> String {
        format!(
            "\n+----------------------------------------------------------------\n\
             | SLOW REQUEST\n\
             | request: {} {}\n\
             | user: {} ({})\n\
             | ip: {}\n\
             | took: {}ms\n\
             | params: {}\n\
             +----------------------------------------------------------------",
            OrNa(&record.request_method),
            OrNa(&record.request_uri),
            record.username.as_deref().unwrap_or("anonymous"),
            OrNa(&record.user_id),
            OrNa(&record.client_ip),
            record.execution_time,
            OrNa(&record.request_params),
        )
    }
}

#[async_trait]
impl LogHandler for DefaultLogHandler {
    async fn handle(&self, record: &LogRecord) -> Result<(), HandlerError> {
        if !record.success {
            error!(log_id = %record.log_id, "{}", Self::render_failure(record));
        } else if record.slow_request {
            warn!(log_id = %record.log_id, "{}", Self::render_slow(record));
        } else {
            info!(log_id = %record.log_id, "{}", record.to_simple_log());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DefaultLogHandler"
    }
}
