use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Category of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogType {
    Access,
    Operation,
    Exception,
    System,
    Security,
}

impl LogType {
    /// Human readable label used in console output.
    pub fn label(&self) -> &'static str {
        match self {
            LogType::Access => "access log",
            LogType::Operation => "operation log",
            LogType::Exception => "exception log",
            LogType::System => "system log",
            LogType::Security => "security log",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of business operation recorded by the operation interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Query,
    Insert,
    Update,
    Delete,
    Export,
    Import,
    Login,
    Logout,
    Grant,
    Upload,
    Download,
    #[default]
    Other,
}

impl OperationType {
    /// Upper-case name stored in [`LogRecord::operation_type`].
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Query => "QUERY",
            OperationType::Insert => "INSERT",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
            OperationType::Export => "EXPORT",
            OperationType::Import => "IMPORT",
            OperationType::Login => "LOGIN",
            OperationType::Logout => "LOGOUT",
            OperationType::Grant => "GRANT",
            OperationType::Upload => "UPLOAD",
            OperationType::Download => "DOWNLOAD",
            OperationType::Other => "OTHER",
        }
    }
}

/// Structured description of one intercepted event.
///
/// A record is created at interception entry with only its context fields,
/// filled in while the wrapped call runs, and sealed by [`LogRecord::finalize`]
/// once the call has completed. After that it is shared read-only with every
/// handler through an `Arc`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub log_id: String,
    pub log_type: LogType,

    pub app_name: Option<String>,
    pub server_ip: Option<String>,
    pub server_host: Option<String>,
    pub request_uri: Option<String>,
    pub request_method: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,

    pub user_id: Option<String>,
    pub username: Option<String>,

    pub module: Option<String>,
    pub operation_type: Option<String>,
    pub description: Option<String>,
    pub class_name: Option<String>,
    pub method_name: Option<String>,

    pub request_params: Option<String>,
    /// Captured headers keyed by name; the first value of a repeated name wins.
    pub request_headers: Option<BTreeMap<String, String>>,
    pub response_result: Option<String>,

    pub success: bool,
    pub exception: Option<String>,
    pub stack_trace: Option<String>,
    pub response_status: Option<u16>,

    /// Elapsed wall-clock milliseconds of the wrapped call.
    pub execution_time: u64,
    pub slow_request: bool,
    /// Completion timestamp; `None` until the record is finalized.
    pub create_time: Option<DateTime<Utc>>,

    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    /// Empty record of the given type with a caller-supplied id.
    pub fn new(log_id: impl Into<String>, log_type: LogType) -> Self {
        LogRecord {
            log_id: log_id.into(),
            log_type,
            app_name: None,
            server_ip: None,
            server_host: None,
            request_uri: None,
            request_method: None,
            client_ip: None,
            user_agent: None,
            user_id: None,
            username: None,
            module: None,
            operation_type: None,
            description: None,
            class_name: None,
            method_name: None,
            request_params: None,
            request_headers: None,
            response_result: None,
            success: true,
            exception: None,
            stack_trace: None,
            response_status: None,
            execution_time: 0,
            slow_request: false,
            create_time: None,
            extra: BTreeMap::new(),
        }
    }

    /// Seal the record after the wrapped call returned or failed.
    ///
    /// `slow_request` is always recomputed from `elapsed`; `create_time` is
    /// only set the first time this is called.
    pub fn finalize(&mut self, elapsed: Duration, slow_threshold_ms: u64) {
        self.execution_time = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.slow_request = is_slow(self.execution_time, slow_threshold_ms);
        if self.create_time.is_none() {
            self.create_time = Some(Utc::now());
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.create_time.is_some()
    }

    /// Pretty-printed JSON rendering of the whole record.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    /// One-line summary used by the default handler for ordinary records.
    pub fn to_simple_log(&self) -> String {
        let mut line = format!(
            "[{}] {} {} | user: {} | ip: {} | took: {}ms",
            self.log_type,
            self.request_method.as_deref().unwrap_or("-"),
            self.request_uri.as_deref().unwrap_or("-"),
            self.username.as_deref().unwrap_or("anonymous"),
            self.client_ip.as_deref().unwrap_or("-"),
            self.execution_time,
        );
        if self.slow_request {
            line.push_str(" | SLOW");
        }
        if !self.success {
            line.push_str(" | FAILED");
        }
        line
    }
}

/// Slow-request rule shared by every interceptor.
pub fn is_slow(execution_time_ms: u64, threshold_ms: u64) -> bool {
    execution_time_ms > threshold_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_computes_slow_flag() {
        let mut fast = LogRecord::new("a", LogType::Access);
        fast.finalize(Duration::from_millis(50), 3000);
        assert_eq!(fast.execution_time, 50);
        assert!(!fast.slow_request);

        let mut slow = LogRecord::new("b", LogType::Access);
        slow.finalize(Duration::from_millis(5000), 3000);
        assert!(slow.slow_request);
    }

    #[test]
    fn threshold_is_exclusive() {
        assert!(!is_slow(3000, 3000));
        assert!(is_slow(3001, 3000));
    }

    #[test]
    fn create_time_is_set_once() {
        let mut record = LogRecord::new("c", LogType::Operation);
        assert!(!record.is_finalized());
        record.finalize(Duration::from_millis(1), 10);
        let first = record.create_time;
        record.finalize(Duration::from_millis(20), 10);
        assert_eq!(record.create_time, first);
        assert!(record.slow_request);
    }

    #[test]
    fn simple_log_marks_failures() {
        let mut record = LogRecord::new("d", LogType::Access);
        record.request_method = Some("GET".into());
        record.request_uri = Some("/api/users".into());
        record.success = false;
        let line = record.to_simple_log();
        assert!(line.starts_with("[access log] GET /api/users"));
        assert!(line.contains("anonymous"));
        assert!(line.ends_with("FAILED"));
    }

    #[test]
    fn json_uses_camel_case() {
        let record = LogRecord::new("e", LogType::Exception);
        let json = record.to_json();
        assert!(json.contains("\"logId\": \"e\""));
        assert!(json.contains("\"logType\": \"EXCEPTION\""));
    }
}
