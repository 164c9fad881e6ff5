//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 失效订阅集成测试

use crate::common::{setup_logging, test_config, wait_until, MockCacheServer, ScriptedWatchClient};
use nearcache::backend::{
    CacheCounters, CacheItem, HashHostResolver, LocalCacheStore, TcpConnectionPool,
};
use nearcache::config::Config;
use nearcache::multi::MultiUpdate;
use nearcache::serialization::DefaultTransCoder;
use nearcache::sync::{LocalCacheWatch, PollOutcome, TcpWatchClient, TouchBatcher, WatchClient};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[path = "../common/mod.rs"]
mod common;

fn build_watch(config: &Config, client: Arc<dyn WatchClient>) -> Arc<LocalCacheWatch> {
    let host = config.client.servers[0].clone();
    let store = Arc::new(LocalCacheStore::new(host.clone(), Arc::new(CacheCounters::new())));
    let engine = MultiUpdate::new(
        Arc::new(HashHostResolver::new(config.client.servers.clone())),
        Arc::new(TcpConnectionPool::new(config.client.connection_timeout(), 2)),
        Arc::new(DefaultTransCoder::new()),
        &config.client,
    );
    let touch = Arc::new(TouchBatcher::new(
        host,
        engine,
        Duration::from_millis(config.touch.idle_delay_ms),
    ));
    Arc::new(LocalCacheWatch::new(store, client, touch, config.watch.clone()))
}

fn scripted_watch() -> (Arc<LocalCacheWatch>, Arc<ScriptedWatchClient>) {
    let config = test_config(vec!["127.0.0.1:7788".to_string()]);
    let client = Arc::new(ScriptedWatchClient::new());
    (build_watch(&config, client.clone()), client)
}

fn item(key: &str, cache_id: u64) -> Arc<CacheItem> {
    Arc::new(CacheItem::new(key, b"value".to_vec(), 0, cache_id, None))
}

/// 测试注册失败后重试
#[tokio::test]
async fn test_register_retries_after_failure() {
    let (watch, client) = scripted_watch();
    client.push_create(Err("refused".to_string()));
    client.push_create(Ok(0));
    client.push_create(Ok(7));

    assert_eq!(watch.poll_once().await, PollOutcome::RegisterFailed);
    assert_eq!(watch.watch_id(), 0);
    assert_eq!(watch.poll_once().await, PollOutcome::RegisterFailed);
    assert_eq!(watch.poll_once().await, PollOutcome::Registered(7));
    assert_eq!(watch.watch_id(), 7);
    assert_eq!(client.create_calls(), 3);
}

/// 测试失效令牌淘汰匹配的条目并推进ack
#[tokio::test]
async fn test_invalidation_evicts_and_advances_ack() {
    let (watch, client) = scripted_watch();
    client.push_create(Ok(3));
    client.push_check(Ok(vec![11, 10, 99]));
    watch.poll_once().await;

    watch.put("a", item("a", 10));
    watch.put("b", item("b", 11));
    watch.put("c", item("c", 12));

    let outcome = watch.poll_once().await;
    assert_eq!(
        outcome,
        PollOutcome::Invalidated {
            tokens: 3,
            evicted: 2
        }
    );
    assert_eq!(watch.ack_cache_id(), 11);
    assert!(watch.get("a").is_none());
    assert!(watch.get("b").is_none());
    assert!(watch.get("c").is_some());
    assert_eq!(watch.store().counters().total_count(), 1);

    watch.poll_once().await;
    assert_eq!(client.check_calls(), vec![(3, 0), (3, 11)]);
}

/// 测试过期令牌不影响已被本地覆盖的条目
#[tokio::test]
async fn test_stale_token_is_ignored() {
    let (watch, client) = scripted_watch();
    client.push_create(Ok(1));
    client.push_check(Ok(vec![20]));
    watch.poll_once().await;

    watch.put("k", item("k", 20));
    watch.put("k", item("k", 21));

    assert_eq!(
        watch.poll_once().await,
        PollOutcome::Invalidated {
            tokens: 1,
            evicted: 0
        }
    );
    assert_eq!(watch.get("k").unwrap().cache_id, 21);
}

/// 测试单次长轮询失败会立即重试一次
#[tokio::test]
async fn test_single_failure_is_retried() {
    let (watch, client) = scripted_watch();
    client.push_create(Ok(5));
    client.push_check(Err("broken pipe".to_string()));
    client.push_check(Ok(vec![42]));
    watch.poll_once().await;
    watch.put("k", item("k", 42));

    let outcome = watch.poll_once().await;
    assert_eq!(
        outcome,
        PollOutcome::Invalidated {
            tokens: 1,
            evicted: 1
        }
    );
    assert_eq!(watch.watch_id(), 5);
    assert_eq!(client.check_calls().len(), 2);
}

/// 测试连续两次失败清空本地缓存并回到未注册
#[tokio::test]
async fn test_repeated_failure_resets_state() {
    let (watch, client) = scripted_watch();
    client.push_create(Ok(5));
    client.push_check(Ok(vec![100]));
    client.push_check(Err("timeout".to_string()));
    client.push_check(Err("timeout".to_string()));
    client.push_create(Ok(6));
    watch.poll_once().await;
    watch.poll_once().await;
    assert_eq!(watch.ack_cache_id(), 100);

    watch.put("a", item("a", 1));
    watch.put("b", item("b", 2));
    watch.get("a");

    assert_eq!(watch.poll_once().await, PollOutcome::Reset);
    assert_eq!(watch.watch_id(), 0);
    assert_eq!(watch.ack_cache_id(), 0);
    assert!(watch.store().is_empty());
    assert_eq!(watch.store().counters().total_count(), 0);
    assert_eq!(watch.store().counters().total_size(), 0);

    assert_eq!(watch.poll_once().await, PollOutcome::Registered(6));
}

/// 测试空结果返回过快时休眠
#[tokio::test]
async fn test_fast_empty_poll_sleeps() {
    let (watch, client) = scripted_watch();
    client.push_create(Ok(1));
    client.push_check(Ok(Vec::new()));
    watch.poll_once().await;

    let started = Instant::now();
    assert_eq!(watch.poll_once().await, PollOutcome::Idle);
    assert!(started.elapsed() >= Duration::from_millis(20));
}

/// 测试读取并续期
#[tokio::test]
async fn test_get_and_touch_queues_touch() {
    let (watch, _client) = scripted_watch();
    watch.put("k", item("k", 9));

    let touched = watch.get_and_touch("k", Some(60)).unwrap();
    assert_eq!(touched.expiration(), Some(60));
    assert!(watch.store().is_active("k"));
    assert_eq!(watch.touch_batcher().pending_len(), 1);
    assert!(watch.get_and_touch("missing", Some(60)).is_none());
    assert_eq!(watch.touch_batcher().pending_len(), 1);
}

/// 测试与模拟服务器之间的端到端失效
#[tokio::test]
async fn test_end_to_end_invalidation_over_tcp() {
    setup_logging();
    let server = MockCacheServer::start().await;
    let config = test_config(vec![server.addr()]);
    let pool = Arc::new(TcpConnectionPool::new(config.client.connection_timeout(), 2));
    let client = Arc::new(TcpWatchClient::new(pool, 0, config.client.connection_timeout()));
    let watch = build_watch(&config, client);

    watch.start();
    assert!(wait_until(Duration::from_secs(3), || watch.watch_id() != 0).await);

    let cache_id = server.insert("user:1", b"alice");
    watch.put("user:1", item("user:1", cache_id));
    watch.put("user:2", item("user:2", 999_999));

    server.insert("user:1", b"bob");
    assert!(wait_until(Duration::from_secs(3), || watch.get("user:1").is_none()).await);
    assert!(watch.get("user:2").is_some());
    assert_eq!(watch.ack_cache_id(), cache_id);

    watch.shutdown().await;
    assert_eq!(watch.watch_id(), 0);
    assert!(watch.store().is_empty());
}

/// 测试服务器拒绝checkWatch时清空并重新注册
#[tokio::test]
async fn test_server_side_watch_loss_triggers_reregister() {
    setup_logging();
    let server = MockCacheServer::start().await;
    let config = test_config(vec![server.addr()]);
    let pool = Arc::new(TcpConnectionPool::new(config.client.connection_timeout(), 2));
    let client = Arc::new(TcpWatchClient::new(pool, 0, config.client.connection_timeout()));
    let watch = build_watch(&config, client);

    assert!(matches!(watch.poll_once().await, PollOutcome::Registered(_)));
    watch.put("k", item("k", 1));

    server.set_fail_check_watch(true);
    assert_eq!(watch.poll_once().await, PollOutcome::Reset);
    assert!(watch.store().is_empty());

    server.set_fail_check_watch(false);
    assert!(matches!(watch.poll_once().await, PollOutcome::Registered(_)));
    assert_eq!(server.watch_count(), 2);
}
