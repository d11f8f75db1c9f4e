pub mod record;
pub mod context;
pub mod utils;
pub mod handler;
pub mod dispatcher;
pub mod interceptor;

pub mod config;
pub mod env;
pub mod error;
pub mod init;
pub mod layer;
pub mod noop_handler;

pub use config::LogConfig;
pub use context::{Identity, IdentityProvider, RequestContext, RequestSnapshot, ResponseState, ServerInfo};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use handler::{DefaultLogHandler, HandlerError, LogHandler};
pub use interceptor::{
    AccessLog, AccessLogInterceptor, ErrorResponse, ExceptionInterceptor, Handled, InterceptorContext,
    OperationLog, OperationLogInterceptor,
};
pub use record::{LogRecord, LogType, OperationType};
