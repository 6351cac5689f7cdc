//! Retry and polling example
//!
//! This example wraps a flaky operation that fails twice before succeeding,
//! shows the retry policy absorbing those failures, then polls the same
//! operation silently in the background.
//!
//! Usage:
//!   cargo run --example retry_and_polling

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use query_runtime::{Query, QueryParams};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; RUST_LOG=query_runtime=debug shows retry decisions.
    tracing_subscriber::fmt::init();

    let attempts = Arc::new(AtomicUsize::new(0));

    let query = Query::builder("flaky_metrics", {
        let attempts = attempts.clone();
        move |_params: QueryParams, _abort| {
            let attempts = attempts.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n % 3 != 0 {
                    anyhow::bail!("transient failure on attempt {n}");
                }
                Ok(json!({ "attempt": n, "load": 0.42 }))
            }
        }
    })
    .cache_time(Duration::ZERO)
    .retry_count(2)
    .retry_delay(Duration::from_millis(100))
    .retry_backoff(true)
    .polling_interval(Duration::from_millis(500))
    .on_success(|data| println!("success: {data}"))
    .on_error(|err| println!("gave up: {err}"))
    .build()?;

    // The first two invocations fail; the retry policy waits 100ms, then
    // 200ms, and the third invocation succeeds.
    let metrics = query.execute().await?;
    println!("fetched after retries: {metrics}");

    // Polling re-executes silently every 500ms. Tick failures are retried
    // the same way and never touch the visible error state.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let state = query.state();
    println!(
        "after polling: {} successful ticks, data = {:?}",
        state.polling_count, state.data
    );

    query.stop_polling();
    Ok(())
}
