use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_test::{assert_pending, assert_ready};

use query_runtime::cache::CacheService;
use query_runtime::{Error, ExecuteOptions, Query, QueryParams};

fn slow_counting_query(calls: Arc<AtomicUsize>, deduplicate: bool) -> Query<Value> {
    Query::builder("fetch_user", move |params: QueryParams, _abort| {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!({ "id": params["id"], "fetch": n }))
        }
    })
    .params(json!({ "id": 1 }))
    .cache_time(Duration::ZERO)
    .deduplicate(deduplicate)
    .build()
    .expect("query should build")
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_calls_invoke_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = slow_counting_query(calls.clone(), true);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let query = query.clone();
        handles.push(tokio::spawn(async move { query.execute().await }));
        // Stagger the callers; all five still land on the same in-flight
        // request.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_callers_stay_pending_until_shared_outcome_settles() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = slow_counting_query(calls.clone(), true);

    // Poll two callers by hand: the first poll registers the in-flight
    // request, the second joins it, and neither resolves before the
    // operation does.
    let mut first = tokio_test::task::spawn(query.execute());
    assert_pending!(first.poll());
    let mut second = tokio_test::task::spawn(query.execute());
    assert_pending!(second.poll());

    tokio::time::sleep(Duration::from_millis(30)).await;

    let a = assert_ready!(first.poll()).unwrap();
    let b = assert_ready!(second.poll()).unwrap();
    assert_eq!(a, b);
    assert_eq!(a["fetch"], json!(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dedup_shares_across_queries_on_one_service() {
    let service = Arc::new(CacheService::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let build = || {
        Query::builder("fetch_user", {
            let calls = calls.clone();
            move |_params: QueryParams, _abort| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(json!(n))
                }
            }
        })
        .params(json!({ "id": 1 }))
        .cache_time(Duration::ZERO)
        .cache_service(service.clone())
        .build()
        .unwrap()
    };
    let a = build();
    let b = build();

    let (ra, rb) = tokio::join!(a.execute(), b.execute());
    assert_eq!(ra.unwrap(), rb.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dedup_opt_out_invokes_separately() {
    let service = Arc::new(CacheService::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let build = || {
        Query::builder("fetch_user", {
            let calls = calls.clone();
            move |_params: QueryParams, _abort| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(json!("v"))
                }
            }
        })
        .cache_time(Duration::ZERO)
        .cache_service(service.clone())
        .deduplicate(false)
        .build()
        .unwrap()
    };
    let a = build();
    let b = build();

    let (ra, rb) = tokio::join!(a.execute(), b.execute());
    ra.unwrap();
    rb.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_per_call_dedup_override() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = slow_counting_query(calls.clone(), true);

    let first = {
        let query = query.clone();
        tokio::spawn(async move { query.execute().await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    // Opting out supersedes the in-flight call instead of joining it.
    let second = query
        .execute_with(ExecuteOptions::new().deduplicate(false))
        .await
        .unwrap();

    assert!(first.await.unwrap().unwrap_err().is_abort());
    assert_eq!(second["fetch"], json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_count_bounds_invocations() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = Query::builder("always_fails", {
        let calls = calls.clone();
        move |_params: QueryParams, _abort| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(anyhow::anyhow!("boom"))
            }
        }
    })
    .retry_count(2)
    .retry_delay(Duration::from_millis(100))
    .build()
    .unwrap();

    let err = query.execute().await.unwrap_err();
    assert!(matches!(err, Error::Operation(_)));
    // First invocation plus two retries, then the failure is final.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(query.state().is_error());
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_delays() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = Query::builder("always_fails", {
        let calls = calls.clone();
        move |_params: QueryParams, _abort| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(anyhow::anyhow!("boom"))
            }
        }
    })
    .retry_count(3)
    .retry_delay(Duration::from_millis(100))
    .retry_backoff(true)
    .build()
    .unwrap();

    let start = Instant::now();
    query.execute().await.unwrap_err();
    // 100 + 200 + 400 ms of backoff between the four invocations.
    assert_eq!(start.elapsed(), Duration::from_millis(700));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_delay_when_backoff_disabled() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = Query::builder("always_fails", {
        let calls = calls.clone();
        move |_params: QueryParams, _abort| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(anyhow::anyhow!("boom"))
            }
        }
    })
    .retry_count(2)
    .retry_delay(Duration::from_millis(50))
    .retry_backoff(false)
    .build()
    .unwrap();

    let start = Instant::now();
    query.execute().await.unwrap_err();
    assert_eq!(start.elapsed(), Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_midway() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = Query::builder("flaky", {
        let calls = calls.clone();
        move |_params: QueryParams, _abort| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("not yet"))
                } else {
                    Ok(json!("finally"))
                }
            }
        }
    })
    .retry_count(5)
    .retry_delay(Duration::from_millis(10))
    .build()
    .unwrap();

    assert_eq!(query.execute().await.unwrap(), json!("finally"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let state = query.state();
    assert!(state.is_success());
    assert_eq!(state.retry_attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_retry_delay_stops_retrying() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = Query::builder("always_fails", {
        let calls = calls.clone();
        move |_params: QueryParams, _abort| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(anyhow::anyhow!("boom"))
            }
        }
    })
    .retry_count(5)
    .retry_delay(Duration::from_secs(10))
    .build()
    .unwrap();

    let pending = {
        let query = query.clone();
        tokio::spawn(async move { query.execute().await })
    };
    // Let the first invocation fail and the retry delay begin.
    tokio::time::sleep(Duration::from_millis(5)).await;
    query.cancel();

    assert!(pending.await.unwrap().unwrap_err().is_abort());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(query.state().error.is_none());
}
