//! 数据源缓存与推送测试

use super::support::{FakeHttp, FakeStream, Gate};
use crate::config::RuntimeConfig;
use crate::datasource::{
    request_params, CacheKey, DataStatus, DatasourceResolver, DisabledStream, HttpRequest,
};
use crate::error::DataError;
use crate::expr::Scope;
use crate::model::{DatasourceDescriptor, HttpSpec};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn descriptor(raw: Value) -> DatasourceDescriptor {
    serde_json::from_value(raw).unwrap()
}

fn http_source(id: &str, url: &str) -> DatasourceDescriptor {
    descriptor(json!({ "id": id, "kind": "http", "http": { "url": url } }))
}

fn stream_source(id: &str, channel: &str) -> DatasourceDescriptor {
    descriptor(json!({ "id": id, "kind": "websocket", "websocket": { "channel": channel } }))
}

fn resolver(http: Arc<FakeHttp>) -> DatasourceResolver {
    DatasourceResolver::new(http, Arc::new(FakeStream::new()), RuntimeConfig::default())
}

fn no_params() -> Map<String, Value> {
    Map::new()
}

#[test]
fn test_cache_key_is_canonical() {
    let mut a = Map::new();
    a.insert("region".to_string(), json!("EMEA"));
    a.insert("page".to_string(), json!(2));
    let mut b = Map::new();
    b.insert("page".to_string(), json!(2));
    b.insert("region".to_string(), json!("EMEA"));

    let key = CacheKey::new("revenue", &a);
    assert_eq!(key, CacheKey::new("revenue", &b));
    assert_eq!(key.datasource_id(), "revenue");
    assert_ne!(key, CacheKey::new("orders", &a));
    assert_ne!(key, CacheKey::new("revenue", &no_params()));
}

/// 数据源 id 自身含冒号时仍能原样取回
#[tokio::test]
async fn test_cache_key_keeps_id_with_colon() {
    let mut params = Map::new();
    params.insert("region".to_string(), json!("EMEA"));
    let key = CacheKey::new("sales:eu", &params);
    assert_eq!(key.datasource_id(), "sales:eu");
    assert_eq!(key.params(), r#"{"region":"EMEA"}"#);
    assert_ne!(key, CacheKey::new("sales", &params));

    let http = Arc::new(FakeHttp::new().respond("/sales", Ok(json!(3))));
    let resolver = resolver(http);
    let mut changes = resolver.subscribe();
    resolver.resolve(&http_source("sales:eu", "/sales"), &no_params());
    assert_eq!(changes.recv().await.unwrap().datasource_id(), "sales:eu");
}

#[test]
fn test_request_rendering() {
    let spec: HttpSpec = serde_json::from_value(json!({
        "method": "post",
        "url": "/regions/{{params.region}}/revenue",
        "headers": { "X-Region": "{{params.region}}" },
        "params": { "region": "{{state.region}}", "limit": 10, "cursor": null },
        "body": { "filter": "{{params.region}}" }
    }))
    .unwrap();
    let state = json!({ "region": "EMEA" });
    let scope = Scope::new().with("state", &state);

    let mut config = RuntimeConfig::default();
    config.http.base_url = Some("https://api.example.com/".to_string());
    config.http.headers.insert("Accept".to_string(), "application/json".to_string());

    let params = crate::datasource::render_params(&spec, &scope).unwrap();
    assert_eq!(params.get("region"), Some(&json!("EMEA")));

    let request = HttpRequest::from_spec(&spec, &params, &Scope::new(), &config).unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.url, "https://api.example.com/regions/EMEA/revenue");
    assert_eq!(request.headers.get("X-Region").map(String::as_str), Some("EMEA"));
    assert_eq!(request.headers.get("Accept").map(String::as_str), Some("application/json"));
    assert_eq!(request.body, Some(json!({ "filter": "EMEA" })));
    // null 参数不进入查询串
    assert_eq!(
        request.query,
        vec![("limit".to_string(), "10".to_string()), ("region".to_string(), "EMEA".to_string())]
    );
}

/// 渲染结果里的 `{{` 不会被再次求值
#[test]
fn test_params_rendered_once() {
    let spec: HttpSpec = serde_json::from_value(json!({
        "url": "/search",
        "params": { "q": "{{state.query}}" }
    }))
    .unwrap();
    let state = json!({ "query": "{{state.secret}}", "secret": "leak" });
    let scope = Scope::new().with("state", &state);
    let params = crate::datasource::render_params(&spec, &scope).unwrap();
    let request = HttpRequest::from_spec(&spec, &params, &scope, &RuntimeConfig::default()).unwrap();
    assert_eq!(request.query, vec![("q".to_string(), "{{state.secret}}".to_string())]);
}

#[test]
fn test_static_source_resolves_immediately() {
    let resolver = resolver(Arc::new(FakeHttp::new()));
    let source = descriptor(json!({ "id": "summary", "kind": "static", "value": { "count": 3 } }));
    let resolution = resolver.resolve(&source, &no_params());
    assert_eq!(resolution.status, DataStatus::Success);
    assert_eq!(resolution.value, Some(json!({ "count": 3 })));
}

/// 没有异步运行时时请求直接失败，不会 panic
#[test]
fn test_http_without_runtime_fails() {
    let http = Arc::new(FakeHttp::new());
    let resolver = resolver(Arc::clone(&http));
    let resolution = resolver.resolve(&http_source("revenue", "/revenue"), &no_params());
    assert_eq!(resolution.status, DataStatus::Error);
    assert_eq!(resolution.error, Some(DataError::NoRuntime));
    assert_eq!(http.calls(), 0);
}

/// 并发解析同一个键只发起一次请求
#[tokio::test]
async fn test_concurrent_resolves_share_one_fetch() {
    let gate = Arc::new(Gate::default());
    let http = Arc::new(FakeHttp::gated(Arc::clone(&gate)).respond("/revenue", Ok(json!({ "total": 42 }))));
    let resolver = resolver(Arc::clone(&http));
    let source = http_source("revenue", "/revenue");

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let resolver = resolver.clone();
        let source = source.clone();
        tasks.push(tokio::spawn(async move {
            resolver.resolve_settled(&source, &Map::new()).await
        }));
    }

    gate.started.notified().await;
    assert_eq!(resolver.in_flight(), 1);
    gate.release.notify_one();

    for task in tasks {
        let resolution = task.await.unwrap();
        assert_eq!(resolution.status, DataStatus::Success);
        assert_eq!(resolution.value, Some(json!({ "total": 42 })));
    }
    resolver.settle().await;
    assert_eq!(http.calls(), 1);
    assert_eq!(resolver.in_flight(), 0);
}

/// 关闭解析器后在途请求立即收尾，settle 不会一直等待
#[tokio::test]
async fn test_close_settles_in_flight_fetch() {
    let gate = Arc::new(Gate::default());
    let http = Arc::new(FakeHttp::gated(Arc::clone(&gate)).respond("/revenue", Ok(json!(1))));
    let resolver = resolver(http);
    let source = http_source("revenue", "/revenue");

    resolver.resolve(&source, &no_params());
    gate.started.notified().await;
    assert_eq!(resolver.in_flight(), 1);

    resolver.close();
    tokio::time::timeout(Duration::from_secs(5), resolver.settle())
        .await
        .expect("settle after close");
    assert_eq!(resolver.in_flight(), 0);

    let resolution = resolver.peek(&source, &no_params()).unwrap();
    assert_eq!(resolution.status, DataStatus::Error);
    assert_eq!(resolution.error, Some(DataError::Closed));
}

#[tokio::test]
async fn test_distinct_params_are_distinct_entries() {
    let http = Arc::new(FakeHttp::new().respond("/revenue", Ok(json!(1))));
    let resolver = resolver(Arc::clone(&http));
    let source = descriptor(json!({
        "id": "revenue",
        "kind": "http",
        "http": { "url": "/revenue", "params": { "region": "{{state.region}}" } }
    }));

    for region in ["EMEA", "APAC", "EMEA"] {
        let state = json!({ "region": region });
        let scope = Scope::new().with("state", &state);
        let params = request_params(&source, &scope).unwrap();
        resolver.resolve(&source, &params);
        resolver.settle().await;
    }

    assert_eq!(http.calls(), 2);
    let regions: Vec<_> = http.requests().into_iter().map(|r| r.query).collect();
    assert_eq!(
        regions,
        vec![
            vec![("region".to_string(), "EMEA".to_string())],
            vec![("region".to_string(), "APAC".to_string())],
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry_refetches_with_stale_value() {
    let http = Arc::new(FakeHttp::new().respond("/revenue", Ok(json!(1))));
    let resolver = resolver(Arc::clone(&http));
    let source = descriptor(json!({
        "id": "revenue",
        "kind": "http",
        "http": { "url": "/revenue" },
        "cache": { "ttlMs": 1000 }
    }));

    assert_eq!(resolver.resolve(&source, &no_params()).status, DataStatus::Loading);
    resolver.settle().await;

    tokio::time::advance(Duration::from_millis(500)).await;
    let cached = resolver.resolve(&source, &no_params());
    assert_eq!(cached.status, DataStatus::Success);
    assert_eq!(http.calls(), 1);

    http.set_response("/revenue", Ok(json!(2)));
    tokio::time::advance(Duration::from_millis(600)).await;
    let revalidating = resolver.resolve(&source, &no_params());
    assert_eq!(revalidating.status, DataStatus::Loading);
    assert_eq!(revalidating.value, Some(json!(1)));

    resolver.settle().await;
    assert_eq!(http.calls(), 2);
    assert_eq!(resolver.peek(&source, &no_params()).unwrap().value, Some(json!(2)));
}

#[tokio::test]
async fn test_manual_cache_ignores_ttl() {
    let http = Arc::new(FakeHttp::new().respond("/config", Ok(json!("v1"))));
    let mut config = RuntimeConfig::default();
    config.cache.default_ttl_ms = Some(0);
    let resolver = DatasourceResolver::new(http.clone(), Arc::new(FakeStream::new()), config);
    let source = descriptor(json!({
        "id": "config",
        "kind": "http",
        "http": { "url": "/config" },
        "cache": { "manual": true }
    }));

    resolver.resolve(&source, &no_params());
    resolver.settle().await;
    resolver.resolve(&source, &no_params());
    resolver.settle().await;
    assert_eq!(http.calls(), 1);

    assert_eq!(resolver.refresh("config"), 1);
    resolver.settle().await;
    assert_eq!(http.calls(), 2);
}

/// 刷新期间保留旧值，新结果到达后替换
#[tokio::test]
async fn test_refresh_keeps_stale_value() {
    let http = Arc::new(FakeHttp::new().respond("/revenue", Ok(json!({ "total": 1 }))));
    let resolver = resolver(Arc::clone(&http));
    let source = http_source("revenue", "/revenue");
    let mut changes = resolver.subscribe();

    resolver.resolve(&source, &no_params());
    resolver.settle().await;
    assert_eq!(changes.recv().await.unwrap().datasource_id(), "revenue");

    http.set_response("/revenue", Ok(json!({ "total": 2 })));
    assert_eq!(resolver.refresh("revenue"), 1);
    let pending = resolver.peek(&source, &no_params()).unwrap();
    assert_eq!(pending.status, DataStatus::Loading);
    assert_eq!(pending.value, Some(json!({ "total": 1 })));
    assert!(pending.is_stale());

    resolver.settle().await;
    let fresh = resolver.peek(&source, &no_params()).unwrap();
    assert_eq!(fresh.status, DataStatus::Success);
    assert_eq!(fresh.value, Some(json!({ "total": 2 })));
}

#[tokio::test]
async fn test_error_keeps_last_value() {
    let http = Arc::new(FakeHttp::new().respond("/revenue", Ok(json!(10))));
    let resolver = resolver(Arc::clone(&http));
    let source = http_source("revenue", "/revenue");

    resolver.resolve(&source, &no_params());
    resolver.settle().await;

    let failure = DataError::Http {
        status: 503,
        message: "unavailable".to_string(),
    };
    http.set_response("/revenue", Err(failure.clone()));
    resolver.refresh("revenue");
    resolver.settle().await;

    let resolution = resolver.resolve(&source, &no_params());
    assert_eq!(resolution.status, DataStatus::Error);
    assert_eq!(resolution.value, Some(json!(10)));
    assert_eq!(resolution.error, Some(failure));
    // 失败结果同样被缓存，不会每次渲染都重试
    assert_eq!(http.calls(), 2);
}

#[tokio::test]
async fn test_first_fetch_error_has_no_value() {
    let http = Arc::new(FakeHttp::new());
    let resolver = resolver(Arc::clone(&http));
    let resolution = resolver
        .resolve_settled(&http_source("missing", "/missing"), &no_params())
        .await;
    assert_eq!(resolution.status, DataStatus::Error);
    assert_eq!(resolution.value, None);
    assert!(matches!(resolution.error, Some(DataError::Http { status: 404, .. })));
}

/// 描述符变化后旧条目失效
#[tokio::test]
async fn test_changed_descriptor_evicts_entry() {
    let http = Arc::new(
        FakeHttp::new()
            .respond("/v1", Ok(json!("old")))
            .respond("/v2", Ok(json!("new"))),
    );
    let resolver = resolver(Arc::clone(&http));
    let v1 = descriptor(json!({ "id": "feed", "kind": "http", "http": { "url": "/v1" }, "version": 1 }));
    let v2 = descriptor(json!({ "id": "feed", "kind": "http", "http": { "url": "/v2" }, "version": 2 }));
    let other = http_source("other", "/v1");

    resolver.resolve(&v1, &no_params());
    resolver.resolve(&other, &no_params());
    resolver.settle().await;

    resolver.retain_descriptors(&[v2.clone(), other.clone()]);
    assert!(resolver.peek(&v2, &no_params()).is_none());
    assert!(resolver.peek(&other, &no_params()).is_some());

    let resolution = resolver.resolve_settled(&v2, &no_params()).await;
    assert_eq!(resolution.value, Some(json!("new")));
    assert_eq!(http.calls(), 3);
}

/// 失效后迟到的结果被丢弃
#[tokio::test]
async fn test_invalidate_discards_late_result() {
    let gate = Arc::new(Gate::default());
    let http = Arc::new(FakeHttp::gated(Arc::clone(&gate)).respond("/slow", Ok(json!("late"))));
    let resolver = resolver(Arc::clone(&http));
    let source = http_source("slow", "/slow");

    resolver.resolve(&source, &no_params());
    gate.started.notified().await;
    resolver.invalidate("slow");
    gate.release.notify_one();
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert!(resolver.peek(&source, &no_params()).is_none());
}

#[tokio::test]
async fn test_stream_routes_by_datasource_id() {
    let stream = Arc::new(FakeStream::new());
    let resolver =
        DatasourceResolver::new(Arc::new(FakeHttp::new()), stream.clone(), RuntimeConfig::default());
    let price = stream_source("price", "ticks");
    let volume = stream_source("volume", "ticks");
    let mut changes = resolver.subscribe();

    assert_eq!(resolver.resolve(&price, &no_params()).status, DataStatus::Loading);
    resolver.resolve(&volume, &no_params());
    stream.wait_connected().await;
    assert_eq!(stream.subscriptions(), 1);

    stream.push("ticks", "price", json!(101.5)).await;
    assert_eq!(changes.recv().await.unwrap().datasource_id(), "price");
    assert_eq!(resolver.peek(&price, &no_params()).unwrap().value, Some(json!(101.5)));
    assert_eq!(resolver.peek(&volume, &no_params()).unwrap().status, DataStatus::Loading);

    // 以频道名为 id 的消息分发给频道上的所有数据源
    stream.push("ticks", "ticks", json!({ "halted": true })).await;
    changes.recv().await.unwrap();
    changes.recv().await.unwrap();
    assert_eq!(
        resolver.peek(&price, &no_params()).unwrap().value,
        Some(json!({ "halted": true }))
    );
    assert_eq!(
        resolver.peek(&volume, &no_params()).unwrap().value,
        Some(json!({ "halted": true }))
    );
}

/// 迟到的订阅者立即拿到最近一次推送
#[tokio::test]
async fn test_stream_replays_latest_to_late_subscriber() {
    let stream = Arc::new(FakeStream::new());
    let resolver =
        DatasourceResolver::new(Arc::new(FakeHttp::new()), stream.clone(), RuntimeConfig::default());
    let price = stream_source("price", "ticks");
    let mut changes = resolver.subscribe();

    resolver.resolve(&price, &no_params());
    stream.wait_connected().await;
    stream.push("ticks", "price", json!(7)).await;
    changes.recv().await.unwrap();

    resolver.invalidate("price");
    let late = resolver.resolve(&price, &no_params());
    assert_eq!(late.status, DataStatus::Success);
    assert_eq!(late.value, Some(json!(7)));
    assert_eq!(stream.subscriptions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stream_reconnects_after_disconnect() {
    let stream = Arc::new(FakeStream::new());
    let mut config = RuntimeConfig::default();
    config.websocket.reconnect_backoff_ms = 10;
    let resolver = DatasourceResolver::new(Arc::new(FakeHttp::new()), stream.clone(), config);
    let price = stream_source("price", "ticks");
    let mut changes = resolver.subscribe();

    resolver.resolve(&price, &no_params());
    stream.wait_connected().await;
    stream.push("ticks", "price", json!(1)).await;
    changes.recv().await.unwrap();

    stream.disconnect("ticks");
    stream.wait_connected().await;
    assert_eq!(stream.subscriptions(), 2);
    assert_eq!(resolver.peek(&price, &no_params()).unwrap().value, Some(json!(1)));

    stream.push("ticks", "price", json!(2)).await;
    changes.recv().await.unwrap();
    assert_eq!(resolver.peek(&price, &no_params()).unwrap().value, Some(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn test_stream_subscribe_failure_marks_error() {
    let mut config = RuntimeConfig::default();
    config.websocket.reconnect_attempts = 2;
    config.websocket.reconnect_backoff_ms = 5;
    let resolver = DatasourceResolver::new(Arc::new(FakeHttp::new()), Arc::new(DisabledStream), config);
    let price = stream_source("price", "ticks");

    let resolution = resolver.resolve_settled(&price, &no_params()).await;
    assert_eq!(resolution.status, DataStatus::Error);
    assert!(matches!(resolution.error, Some(DataError::Stream(_))));
}
