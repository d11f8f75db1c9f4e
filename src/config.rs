//! Immutable logging configuration.
//!
//! Built once at startup (defaults, a TOML file, environment overrides) and
//! then shared as `Arc<LogConfig>`; nothing mutates it afterwards.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::env;
use crate::error::ConfigError;

/// Switches, limits and pool sizing for the logging pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Master switch; when `false` every interceptor is a pass-through.
    pub enabled: bool,
    pub access_enabled: bool,
    pub operation_enabled: bool,
    pub exception_enabled: bool,

    /// Defaults used when a descriptor does not override them.
    pub record_request_params: bool,
    pub record_response_result: bool,
    pub record_headers: bool,

    /// Truncation limits in characters.
    pub max_request_length: usize,
    pub max_response_length: usize,

    /// Globs (`*` within a segment, `**` across segments) never logged.
    pub excluded_paths: Vec<String>,

    /// Header names (case-insensitive) whose values are masked.
    pub redacted_headers: Vec<String>,

    pub slow_request_threshold_ms: u64,

    /// Fan out on the worker pool instead of the calling task.
    pub async_dispatch: bool,

    pub app_name: String,

    pub thread_pool: ThreadPoolConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            access_enabled: true,
            operation_enabled: true,
            exception_enabled: true,
            record_request_params: true,
            record_response_result: true,
            record_headers: false,
            max_request_length: 2000,
            max_response_length: 2000,
            excluded_paths: [
                "/actuator/**",
                "/health",
                "/favicon.ico",
                "/swagger-ui/**",
                "/v3/api-docs/**",
                "/doc.html",
                "/webjars/**",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            redacted_headers: ["authorization", "cookie", "set-cookie", "proxy-authorization"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            slow_request_threshold_ms: 3000,
            async_dispatch: true,
            app_name: "unknown".to_string(),
            thread_pool: ThreadPoolConfig::default(),
        }
    }
}

/// Sizing of the background worker pool used in async mode.
///
/// When the queue is full and `max_size` workers are already running, the
/// record is handled on the dispatching task instead of being dropped.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub name_prefix: String,
    /// Idle time after which workers above `core_size` stop.
    pub keep_alive_secs: u64,
    /// How long shutdown waits for queued records.
    pub await_termination_secs: u64,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            core_size: 2,
            max_size: 5,
            queue_capacity: 100,
            name_prefix: "log-worker-".to_string(),
            keep_alive_secs: 60,
            await_termination_secs: 60,
        }
    }
}

impl ThreadPoolConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn await_termination(&self) -> Duration {
        Duration::from_secs(self.await_termination_secs)
    }
}

impl LogConfig {
    pub fn access_active(&self) -> bool {
        self.enabled && self.access_enabled
    }

    pub fn operation_active(&self) -> bool {
        self.enabled && self.operation_enabled
    }

    pub fn exception_active(&self) -> bool {
        self.enabled && self.exception_enabled
    }

    /// Defaults with `LOG_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Override selected fields from the environment. Malformed values are
    /// ignored and the current value kept.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env::env_parse(env::LOG_ENABLED_ENV) {
            self.enabled = v;
        }
        if let Some(v) = env::env_parse(env::LOG_ACCESS_ENABLED_ENV) {
            self.access_enabled = v;
        }
        if let Some(v) = env::env_parse(env::LOG_OPERATION_ENABLED_ENV) {
            self.operation_enabled = v;
        }
        if let Some(v) = env::env_parse(env::LOG_EXCEPTION_ENABLED_ENV) {
            self.exception_enabled = v;
        }
        if let Some(v) = env::env_parse(env::LOG_ASYNC_ENV) {
            self.async_dispatch = v;
        }
        if let Some(v) = env::env_parse(env::LOG_SLOW_THRESHOLD_MS_ENV) {
            self.slow_request_threshold_ms = v;
        }
        let app_name = env::env_or(env::LOG_APP_NAME_ENV, "");
        if !app_name.is_empty() {
            self.app_name = app_name;
        }
    }

    /// Range checks serde cannot express. All problems are reported at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.max_request_length == 0 {
            problems.push("max_request_length must be > 0".to_string());
        }
        if self.max_response_length == 0 {
            problems.push("max_response_length must be > 0".to_string());
        }
        let pool = &self.thread_pool;
        if pool.core_size == 0 {
            problems.push("thread_pool.core_size must be > 0".to_string());
        }
        if pool.max_size < pool.core_size {
            problems.push(format!(
                "thread_pool.max_size ({}) must be >= core_size ({})",
                pool.max_size, pool.core_size
            ));
        }
        if pool.queue_capacity == 0 {
            problems.push("thread_pool.queue_capacity must be > 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join(", ")))
        }
    }

    /// Startup banner describing what is switched on.
    pub fn log_summary(&self) {
        let on_off = |flag: bool| if flag { "enabled" } else { "disabled" };
        info!(
            app = %self.app_name,
            operation = on_off(self.operation_active()),
            access = on_off(self.access_active()),
            exception = on_off(self.exception_active()),
            async_dispatch = on_off(self.async_dispatch),
            slow_threshold_ms = self.slow_request_threshold_ms,
            "request logging initialized"
        );
    }
}

/// Load a TOML file, apply environment overrides and validate the result.
pub fn load_config(path: &Path) -> Result<LogConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Parse TOML text without touching the environment.
pub fn parse_config(content: &str) -> Result<LogConfig, ConfigError> {
    let config: LogConfig = toml::from_str(content)?;
    Ok(config)
}
