use std::time::Duration;

/// Error returned when loading or validating a [`crate::config::LogConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid log configuration: {0}")]
    Invalid(String),

    #[error("invalid excluded path pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Error returned by the [`crate::dispatcher::Dispatcher`] lifecycle.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("async dispatch requires a running tokio runtime")]
    NoRuntime,

    #[error("log workers did not drain within {0:?}")]
    ShutdownTimeout(Duration),
}
