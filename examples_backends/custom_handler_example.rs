use std::sync::Arc;

use async_trait::async_trait;
use intercept_log_sink::context::CommitFlag;
use intercept_log_sink::init::{init_tracing_with_config, SubscriberConfig};
use intercept_log_sink::{
    AccessLog, AccessLogInterceptor, DefaultLogHandler, Dispatcher, ExceptionInterceptor,
    HandlerError, InterceptorContext, LogConfig, LogHandler, LogRecord, RequestSnapshot,
};
use tracing::{error, info};

/// Example of shipping records to a store this crate knows nothing about by
/// implementing [`LogHandler`] directly. Imagine this talks to some
/// proprietary DB; here it just prints the JSON document.
struct MyCustomDbHandler;

#[async_trait]
impl LogHandler for MyCustomDbHandler {
    async fn handle(&self, record: &LogRecord) -> Result<(), HandlerError> {
        // Here you would call your own client library for the target DB.
        println!("[my-custom-db] {}", record.to_json());
        Ok(())
    }

    fn order(&self) -> i32 {
        1
    }
}

#[derive(Debug, thiserror::Error)]
#[error("payment gateway timed out")]
struct GatewayTimeout;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig::from_env();
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .async_dispatch(config.async_dispatch)
            .pool(config.thread_pool.clone())
            .handler(Arc::new(MyCustomDbHandler))
            .handler(Arc::new(DefaultLogHandler))
            .build()?,
    );

    let system_task = init_tracing_with_config(
        &SubscriberConfig::default(),
        Some(Arc::clone(&dispatcher)),
        &config.app_name,
    )?;

    let ctx = Arc::new(InterceptorContext::new(Arc::new(config), Arc::clone(&dispatcher))?);
    let access = AccessLogInterceptor::new(Arc::clone(&ctx));
    let exceptions = ExceptionInterceptor::new(ctx);

    info!("custom handler example started");

    let request = RequestSnapshot::new("POST", "/api/payments")
        .with_query("orderId=42&currency=EUR")
        .header("Authorization", "Bearer secret")
        .peer_ip("203.0.113.9");
    let paid = access
        .intercept(&AccessLog::new().record_headers(true), Some(&request), || async {
            Ok::<_, GatewayTimeout>("receipt-42")
        })
        .await?;
    info!(receipt = paid, "payment accepted");

    let response = CommitFlag::new();
    if let Err(handled) = exceptions
        .intercept(Some(&request), &response, || async { Err::<(), _>(GatewayTimeout) })
        .await
    {
        if let Some(payload) = handled.response {
            println!("error payload: {}", serde_json::to_string(&payload)?);
        }
    }

    // Captured by the system log layer and dispatched like any other record.
    error!(target: "payments", gateway = "acme", "settlement batch failed");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    dispatcher.shutdown().await?;
    if let Some(task) = system_task {
        task.abort();
    }
    Ok(())
}
