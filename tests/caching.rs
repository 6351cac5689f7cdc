use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use query_runtime::cache::CacheService;
use query_runtime::{ExecuteOptions, Query, QueryParams, QueryStatus};

fn counting_query(
    calls: Arc<AtomicUsize>,
    cache_time: Duration,
    stale_time: Duration,
) -> Query<Value> {
    Query::builder("fetch_user", move |params: QueryParams, _abort| {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "id": params["id"], "fetch": n }))
        }
    })
    .params(json!({ "id": 1 }))
    .cache_time(cache_time)
    .stale_time(stale_time)
    .build()
    .expect("query should build")
}

#[tokio::test(start_paused = true)]
async fn test_fresh_entry_served_without_invoking() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = counting_query(calls.clone(), Duration::from_secs(60), Duration::ZERO);

    let first = query.execute().await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    let second = query.execute().await.unwrap();

    // Zero stale_time means "fresh for as long as cached": one fetch only.
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_skips_loading_transition() {
    let statuses: Arc<Mutex<Vec<QueryStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = statuses.clone();
    let calls = Arc::new(AtomicUsize::new(0));

    let query = Query::builder("fetch_user", {
        let calls = calls.clone();
        move |_params: QueryParams, _abort| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!("value"))
            }
        }
    })
    .cache_time(Duration::from_secs(5))
    .stale_time(Duration::from_secs(5))
    .on_change(move |state| seen.lock().unwrap().push(state.status))
    .build()
    .unwrap();

    query.execute().await.unwrap();
    tokio::time::advance(Duration::from_secs(4)).await;
    query.execute().await.unwrap();

    // The second call went Success -> Success directly.
    assert_eq!(
        *statuses.lock().unwrap(),
        vec![QueryStatus::Loading, QueryStatus::Success, QueryStatus::Success]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Past the cache window the entry is gone and a fetch happens again.
    tokio::time::advance(Duration::from_secs(2)).await;
    query.execute().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_cache_time_always_invokes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = counting_query(calls.clone(), Duration::ZERO, Duration::ZERO);

    for _ in 0..3 {
        query.execute().await.unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_triggers_refetch_but_seeds_data() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seeded: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = seeded.clone();

    let query = Query::builder("fetch_user", {
        let calls = calls.clone();
        move |_params: QueryParams, _abort| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(json!(n))
            }
        }
    })
    .cache_time(Duration::from_secs(60))
    .stale_time(Duration::from_secs(5))
    .on_change(move |state| {
        if state.is_loading() {
            seen.lock().unwrap().push(state.data.clone());
        }
    })
    .build()
    .unwrap();

    assert_eq!(query.execute().await.unwrap(), json!(1));

    // Stale but still cached: the call re-fetches, with the stale value
    // visible while it loads.
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(query.execute().await.unwrap(), json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // Loading first clears data, then the stale entry is seeded back in.
    assert_eq!(*seeded.lock().unwrap(), vec![None, None, Some(json!(1))]);
}

#[tokio::test(start_paused = true)]
async fn test_ignore_cache_forces_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = counting_query(calls.clone(), Duration::from_secs(60), Duration::ZERO);

    query.execute().await.unwrap();
    query
        .execute_with(ExecuteOptions::new().ignore_cache(true))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shared_service_shares_entries_across_queries() {
    let service = Arc::new(CacheService::new());
    let calls_a = Arc::new(AtomicUsize::new(0));
    let calls_b = Arc::new(AtomicUsize::new(0));

    let build = |calls: Arc<AtomicUsize>, value: &'static str| {
        Query::builder("shared_fetch", move |_params: QueryParams, _abort| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!(value))
            }
        })
        .params(json!({ "id": 9 }))
        .cache_time(Duration::from_secs(60))
        .cache_service(service.clone())
        .build()
        .unwrap()
    };
    let a = build(calls_a.clone(), "from-a");
    let b = build(calls_b.clone(), "from-b");

    assert_eq!(a.execute().await.unwrap(), json!("from-a"));
    // Same operation name and params, same service: b is served a's entry.
    assert_eq!(b.execute().await.unwrap(), json!("from-a"));
    assert_eq!(calls_a.load(Ordering::SeqCst), 1);
    assert_eq!(calls_b.load(Ordering::SeqCst), 0);

    let stats = service.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.sets, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_next_fetch() {
    let service = Arc::new(CacheService::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let query = Query::builder("fetch_user", {
        let calls = calls.clone();
        move |_params: QueryParams, _abort| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!("v"))
            }
        }
    })
    .cache_time(Duration::from_secs(60))
    .cache_service(service.clone())
    .build()
    .unwrap();

    query.execute().await.unwrap();
    query.execute().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let key = query.cache_key().unwrap();
    assert!(service.invalidate(&key).await.unwrap());
    query.execute().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_key_salt_isolates_queries_on_shared_service() {
    let service = Arc::new(CacheService::new());
    let build = |salt: &str, value: &'static str| {
        Query::builder("tenant_fetch", move |_params: QueryParams, _abort| {
            let value = value.to_string();
            async move { Ok(json!(value)) }
        })
        .cache_time(Duration::from_secs(60))
        .cache_service(service.clone())
        .key_salt(salt.to_string())
        .build()
        .unwrap()
    };
    let a = build("tenant-a", "a-data");
    let b = build("tenant-b", "b-data");

    assert_eq!(a.execute().await.unwrap(), json!("a-data"));
    assert_eq!(b.execute().await.unwrap(), json!("b-data"));
}

#[tokio::test(start_paused = true)]
async fn test_keep_previous_data_spans_loading() {
    let during_loading: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = during_loading.clone();

    let query = Query::builder("fetch", |_params: QueryParams, _abort| async move {
        Ok(json!("fresh"))
    })
    .cache_time(Duration::ZERO)
    .keep_previous_data(true)
    .on_change(move |state| {
        if state.is_loading() {
            seen.lock().unwrap().push(state.data.clone());
        }
    })
    .build()
    .unwrap();

    query.execute().await.unwrap();
    query.execute().await.unwrap();
    assert_eq!(
        *during_loading.lock().unwrap(),
        vec![None, Some(json!("fresh"))]
    );
}
