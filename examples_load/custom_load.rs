use std::sync::Arc;
use std::time::{Duration, Instant};

use intercept_log_sink::config::ThreadPoolConfig;
use intercept_log_sink::noop_handler::NoopHandler;
use intercept_log_sink::{
    Dispatcher, InterceptorContext, LogConfig, OperationLog, OperationLogInterceptor, OperationType,
};

#[derive(Debug, thiserror::Error)]
#[error("stock for sku {0} exhausted")]
struct OutOfStock(u64);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    intercept_log_sink::init::init_tracing()?;

    // Small queue and few workers, so the caller-runs path gets exercised.
    let pool = ThreadPoolConfig {
        core_size: 1,
        max_size: 2,
        queue_capacity: 16,
        await_termination_secs: 10,
        ..ThreadPoolConfig::default()
    };
    let config = LogConfig {
        app_name: "inventory".to_string(),
        thread_pool: pool.clone(),
        ..LogConfig::default()
    };

    let dispatcher = Arc::new(
        Dispatcher::builder()
            .async_dispatch(true)
            .pool(pool)
            .handler(Arc::new(NoopHandler))
            .build()?,
    );
    let ctx = Arc::new(InterceptorContext::new(Arc::new(config), Arc::clone(&dispatcher))?);
    let operations = OperationLogInterceptor::new(ctx);
    let descriptor = OperationLog::new("inventory", OperationType::Update).description("reserve stock");

    let n: u64 = 100_000;
    let start = Instant::now();

    for sku in 0..n {
        let _ = operations
            .intercept(&descriptor, None, &(sku, 1u32), || async move {
                if sku % 50 == 0 {
                    Err(OutOfStock(sku))
                } else {
                    Ok(sku)
                }
            })
            .await;
    }

    let elapsed = start.elapsed();
    println!(
        "custom config: intercepted {} calls in {:?} (~{:.0} calls/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    dispatcher.shutdown_timeout(Duration::from_secs(5)).await?;
    println!("{:?}", dispatcher.stats());
    Ok(())
}
