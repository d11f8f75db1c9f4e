use std::sync::Arc;
use std::time::Instant;

use intercept_log_sink::noop_handler::NoopHandler;
use intercept_log_sink::{
    AccessLog, AccessLogInterceptor, Dispatcher, InterceptorContext, LogConfig, RequestSnapshot,
};

#[derive(Debug, thiserror::Error)]
#[error("order {0} rejected")]
struct Rejected(u64);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    intercept_log_sink::init::init_tracing()?;

    let config = LogConfig::default();
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .async_dispatch(true)
            .pool(config.thread_pool.clone())
            .handler(Arc::new(NoopHandler))
            .build()?,
    );
    let ctx = Arc::new(InterceptorContext::new(Arc::new(config), Arc::clone(&dispatcher))?);
    let access = AccessLogInterceptor::new(ctx);
    let descriptor = AccessLog::new().description("load test");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        let request = RequestSnapshot::new("GET", format!("/api/orders/{i}")).param("page", "1");
        let _ = access
            .intercept(&descriptor, Some(&request), || async move {
                if i % 100 == 0 {
                    Err(Rejected(i))
                } else {
                    Ok(i)
                }
            })
            .await;
    }

    let elapsed = start.elapsed();
    println!(
        "default config: intercepted {} calls in {:?} (~{:.0} calls/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    dispatcher.shutdown().await?;
    println!("{:?}", dispatcher.stats());
    Ok(())
}
