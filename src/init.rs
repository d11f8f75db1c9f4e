use crate::dispatcher::Dispatcher;
use crate::layer::SystemLogLayer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::Registry;

/// Subscriber settings for processes that use this crate.
///
/// **Fields**
/// - `default_directive`: filter used when `RUST_LOG` is not set.
/// - `enable_stdout`: add a `fmt` layer printing to stdout. The
///   [`crate::handler::DefaultLogHandler`] writes through it.
/// - `capture_system_errors`: when a dispatcher is passed to
///   [`init_tracing_with_config`], also install a [`SystemLogLayer`] so
///   `ERROR` events from the rest of the process become system log records.
/// - `system_channel_buffer`: capacity of that layer's channel.
#[derive(Clone, Debug)]
pub struct SubscriberConfig {
    pub default_directive: String,
    pub enable_stdout: bool,
    pub capture_system_errors: bool,
    pub system_channel_buffer: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            enable_stdout: true,
            capture_system_errors: true,
            system_channel_buffer: 1024,
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// **Parameters**
/// - `config`: [`SubscriberConfig`] controlling filtering and output.
/// - `dispatcher`: target for captured system errors; `None` disables the
///   capture regardless of `config.capture_system_errors`.
/// - `app_name`: stamped on captured system records.
///
/// **Returns**
/// - The background task of the [`SystemLogLayer`], if one was installed.
/// - `Err(TryInitError)` if a global subscriber was already set.
///
/// Capturing system errors spawns a task, so that variant must be called
/// inside a tokio runtime.
pub fn init_tracing_with_config(
    config: &SubscriberConfig,
    dispatcher: Option<Arc<Dispatcher>>,
    app_name: &str,
) -> Result<Option<JoinHandle<()>>, TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    let (system_layer, task) = match dispatcher.filter(|_| config.capture_system_errors) {
        Some(dispatcher) => {
            let (layer, task) = SystemLogLayer::new(dispatcher, config.system_channel_buffer);
            (Some(layer.with_app_name(app_name)), Some(task))
        }
        None => (None, None),
    };
    let fmt_layer = config.enable_stdout.then(tracing_subscriber::fmt::layer);

    Registry::default()
        .with(filter)
        .with(system_layer)
        .with(fmt_layer)
        .try_init()?;

    Ok(task)
}

/// Install a stdout subscriber with default filtering and no system capture.
pub fn init_tracing() -> Result<(), TryInitError> {
    init_tracing_with_config(
        &SubscriberConfig {
            capture_system_errors: false,
            ..SubscriberConfig::default()
        },
        None,
        "",
    )
    .map(|_| ())
}
