use crate::dispatcher::Dispatcher;
use crate::record::{LogRecord, LogType};
use crate::utils::generate_log_id;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Target prefix of events emitted by this crate; never captured.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// `tracing_subscriber` layer that turns `ERROR` events into
/// [`LogType::System`] records and forwards them to a [`Dispatcher`] through
/// a bounded channel and a background task.
///
/// Events emitted by this crate are ignored so that a handler writing
/// through `tracing` cannot feed its own output back into the pipeline.
/// When the channel is full new records are dropped and counted.
pub struct SystemLogLayer {
    sender: mpsc::Sender<LogRecord>,
    app_name: Option<String>,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full.
    pub dropped_events: Arc<AtomicU64>,
}

impl SystemLogLayer {
    /// Create the layer and spawn the task that dispatches captured records.
    ///
    /// Must be called inside a tokio runtime. The task ends once the layer
    /// (and with it the channel sender) is dropped.
    pub fn new(dispatcher: Arc<Dispatcher>, buffer: usize) -> (Self, JoinHandle<()>) {
        // Enforce minimal thresholds to avoid degenerate configs.
        let buffer = buffer.max(16);
        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                dispatcher.dispatch(record).await;
            }
        });

        (
            Self {
                sender: tx,
                app_name: None,
                total_events: Arc::new(AtomicU64::new(0)),
                enqueued_events: Arc::new(AtomicU64::new(0)),
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    fn to_record(&self, event: &Event<'_>) -> LogRecord {
        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let meta = event.metadata();
        let mut record = LogRecord::new(generate_log_id(), LogType::System);
        record.app_name = self.app_name.clone();
        record.success = false;
        record.module = Some(meta.target().to_string());
        record.class_name = meta.module_path().map(str::to_string);
        record.exception = message;
        record.extra = fields;
        if let Some(file) = meta.file() {
            record.extra.insert("file".to_string(), serde_json::Value::from(file));
        }
        if let Some(line) = meta.line() {
            record.extra.insert("line".to_string(), serde_json::Value::from(line));
        }
        record.extra.insert("level".to_string(), serde_json::Value::from(meta.level().as_str()));
        record.finalize(Duration::ZERO, u64::MAX);
        record
    }
}

impl<S> Layer<S> for SystemLogLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if *meta.level() > Level::ERROR || meta.target().starts_with(OWN_TARGET) {
            return;
        }

        let record = self.to_record(event);
        if self.sender.try_send(record).is_ok() {
            self.enqueued_events.fetch_add(1, Ordering::Relaxed);
        } else {
            // Reporting through tracing here would re-enter the subscriber.
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct FieldVisitor<'a> {
    fields: &'a mut BTreeMap<String, serde_json::Value>,
    message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}
