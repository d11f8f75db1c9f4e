//! Environment variable names read by [`crate::config::LogConfig::apply_env_overrides`]
//! and by [`crate::context::ServerInfo::detect`].
//!
//! These are purely helpers; the interceptors and the dispatcher only ever
//! see an already-built configuration value.

/// Master switch, `true` / `false`.
pub const LOG_ENABLED_ENV: &str = "LOG_ENABLED";

/// Access log switch.
pub const LOG_ACCESS_ENABLED_ENV: &str = "LOG_ACCESS_ENABLED";

/// Operation log switch.
pub const LOG_OPERATION_ENABLED_ENV: &str = "LOG_OPERATION_ENABLED";

/// Exception log switch.
pub const LOG_EXCEPTION_ENABLED_ENV: &str = "LOG_EXCEPTION_ENABLED";

/// Dispatch on the worker pool instead of the calling task.
pub const LOG_ASYNC_ENV: &str = "LOG_ASYNC";

/// Slow request threshold in milliseconds.
pub const LOG_SLOW_THRESHOLD_MS_ENV: &str = "LOG_SLOW_THRESHOLD_MS";

/// Application name stamped on every record.
pub const LOG_APP_NAME_ENV: &str = "LOG_APP_NAME";

/// Overrides the detected host name in [`crate::context::ServerInfo`].
pub const LOG_SERVER_HOST_ENV: &str = "LOG_SERVER_HOST";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a variable and parse it, ignoring it when absent or malformed.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
