//! Basic usage example
//!
//! This example demonstrates the core query lifecycle: building a query
//! around an async operation, executing it, observing state changes and
//! being served from cache on a repeat call.
//!
//! Usage:
//!   cargo run --example basic_usage

use std::time::Duration;

use serde_json::json;

use query_runtime::{Query, QueryParams};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // The wrapped operation: any async work returning a serializable value.
    // Here we simulate a network fetch with a short sleep.
    let query = Query::builder("fetch_user", |params: QueryParams, abort| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        if abort.is_aborted() {
            anyhow::bail!("fetch aborted");
        }
        Ok(json!({ "id": params["id"], "name": "Ada Lovelace" }))
    })
    .params(json!({ "id": 1 }))
    .cache_time(Duration::from_secs(60))
    .on_change(|state| println!("state changed: {:?}", state.status))
    .build()?;

    let user = query.execute().await?;
    println!("fetched: {user}");

    // Same parameters, fresh cache entry: this call is served without the
    // 200ms fetch, and without a Loading transition.
    let cached = query.execute().await?;
    println!("cached:  {cached}");
    assert_eq!(user, cached);

    // Switch parameters; the next execution fetches under a new cache key.
    query.update_params(json!({ "id": 2 }))?;
    let other = query.execute().await?;
    println!("other:   {other}");

    Ok(())
}
