use crate::handler::{HandlerError, LogHandler};
use crate::record::LogRecord;
use async_trait::async_trait;

/// A handler that simply drops all records.
///
/// Useful for measuring the overhead of the interceptors and the dispatcher
/// without any I/O, and for tests that don't care about the output.
#[derive(Clone, Default)]
pub struct NoopHandler;

#[async_trait]
impl LogHandler for NoopHandler {
    async fn handle(&self, _record: &LogRecord) -> Result<(), HandlerError> {
        Ok(())
    }
}
