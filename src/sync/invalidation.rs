//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了本地缓存的失效订阅循环，通过长轮询保持本地副本与服务器一致。

use super::touch::TouchBatcher;
use super::watch_client::WatchClient;
use crate::backend::{CacheItem, LocalCacheStore};
use crate::config::WatchConfig;
use crate::metrics::GLOBAL_METRICS;
use crate::protocol::NO_WATCH;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// 单轮循环的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 注册成功
    Registered(u32),
    /// 注册失败，等待后重试
    RegisterFailed,
    /// 收到失效令牌，附带被淘汰的条目数
    Invalidated { tokens: usize, evicted: usize },
    /// 长轮询正常返回但没有变化
    Idle,
    /// 连续两次长轮询失败，本地缓存已清空
    Reset,
}

/// 单主机的本地缓存及其失效订阅
///
/// 持有该主机的本地存储、续期批处理器和长轮询会话。
/// watchID为0表示未注册；只有连续失败或关闭时才回到未注册状态。
pub struct LocalCacheWatch {
    host: String,
    store: Arc<LocalCacheStore>,
    client: Arc<dyn WatchClient>,
    touch: Arc<TouchBatcher>,
    config: WatchConfig,
    watch_id: AtomicU32,
    ack_cache_id: AtomicU64,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LocalCacheWatch {
    /// 创建新的失效订阅
    ///
    /// # 参数
    ///
    /// * `store` - 该主机的本地存储
    /// * `client` - 长轮询客户端
    /// * `touch` - 该主机的续期批处理器
    /// * `config` - 订阅配置
    pub fn new(
        store: Arc<LocalCacheStore>,
        client: Arc<dyn WatchClient>,
        touch: Arc<TouchBatcher>,
        config: WatchConfig,
    ) -> Self {
        Self {
            host: store.host().to_string(),
            store,
            client,
            touch,
            config,
            watch_id: AtomicU32::new(NO_WATCH),
            ack_cache_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn store(&self) -> &Arc<LocalCacheStore> {
        &self.store
    }

    pub fn touch_batcher(&self) -> &Arc<TouchBatcher> {
        &self.touch
    }

    pub fn watch_id(&self) -> u32 {
        self.watch_id.load(Ordering::Acquire)
    }

    pub fn ack_cache_id(&self) -> u64 {
        self.ack_cache_id.load(Ordering::Acquire)
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheItem>> {
        self.store.get(key)
    }

    /// 读取并续期
    ///
    /// 命中时立即更新本地过期时间，并把续期排入批处理器
    pub fn get_and_touch(&self, key: &str, expiration: Option<u64>) -> Option<Arc<CacheItem>> {
        let item = self.store.get(key)?;
        self.touch.touch(key, Arc::clone(&item), expiration);
        Some(item)
    }

    pub fn put(&self, key: &str, item: Arc<CacheItem>) {
        self.store.put(key, item);
    }

    pub fn remove(&self, key: &str) -> Option<Arc<CacheItem>> {
        self.store.remove(key)
    }

    /// 启动长轮询循环和续期批处理器
    pub fn start(self: &Arc<Self>) {
        let watch = Arc::clone(self);
        let handle = tokio::spawn(async move { watch.run().await });
        *self.handle.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        self.touch.start();
    }

    async fn run(&self) {
        info!("LocalCacheWatch {} run", self.host);
        loop {
            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };

            let pause = match outcome {
                PollOutcome::RegisterFailed => {
                    Some(Duration::from_millis(self.config.register_retry_delay_ms))
                }
                _ => None,
            };
            if let Some(pause) = pause {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
        info!("LocalCacheWatch {} stopped", self.host);
    }

    /// 执行一轮：未注册时注册，否则长轮询一次
    ///
    /// 空结果返回过快时在本轮内休眠，避免空转
    #[instrument(skip(self), level = "debug", fields(host = %self.host))]
    pub async fn poll_once(&self) -> PollOutcome {
        if self.watch_id() == NO_WATCH {
            return self.register().await;
        }

        let started = Instant::now();
        let mut result = self.check().await;
        let round_trip = started.elapsed();
        if let Err(e) = &result {
            debug!("checkWatch on {} failed, retrying once: {}", self.host, e);
            result = self.check().await;
        }

        match result {
            Ok(ids) if !ids.is_empty() => {
                let evicted = self.store.update(&ids);
                self.ack_cache_id.store(ids[0], Ordering::Release);
                GLOBAL_METRICS.record_invalidation(&self.host, ids.len(), evicted);
                debug!(
                    "Applied {} invalidation tokens on {}, evicted {}",
                    ids.len(),
                    self.host,
                    evicted
                );
                PollOutcome::Invalidated {
                    tokens: ids.len(),
                    evicted,
                }
            }
            Ok(_) => {
                let min_round_trip = Duration::from_millis(self.config.min_poll_round_trip_ms);
                if round_trip < min_round_trip {
                    tokio::time::sleep(min_round_trip).await;
                }
                PollOutcome::Idle
            }
            Err(e) => {
                error!(
                    "LocalCacheWatch can not check with server {} watchID={}, clear all local cache: {}",
                    self.host,
                    self.watch_id(),
                    e
                );
                self.reset();
                GLOBAL_METRICS.record_watch_reset(&self.host);
                PollOutcome::Reset
            }
        }
    }

    async fn register(&self) -> PollOutcome {
        match self
            .client
            .create_watch(&self.host, self.config.max_next_check_interval)
            .await
        {
            Ok(watch_id) if watch_id != NO_WATCH => {
                self.ack_cache_id.store(0, Ordering::Release);
                self.watch_id.store(watch_id, Ordering::Release);
                info!("LocalCacheWatch {} watchID={}", self.host, watch_id);
                PollOutcome::Registered(watch_id)
            }
            Ok(_) => {
                warn!("createWatch on {} returned no watch", self.host);
                PollOutcome::RegisterFailed
            }
            Err(e) => {
                warn!("createWatch on {} failed: {}", self.host, e);
                PollOutcome::RegisterFailed
            }
        }
    }

    async fn check(&self) -> crate::error::Result<Vec<u64>> {
        self.client
            .check_watch(
                &self.host,
                self.watch_id(),
                self.config.max_next_check_interval,
                self.ack_cache_id(),
            )
            .await
    }

    /// 清空本地缓存并回到未注册状态
    fn reset(&self) {
        self.store.clear();
        self.watch_id.store(NO_WATCH, Ordering::Release);
        self.ack_cache_id.store(0, Ordering::Release);
    }

    /// 停止长轮询和续期批处理器，并清空本地缓存
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.touch.shutdown().await;

        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("LocalCacheWatch {} task ended abnormally: {}", self.host, e);
            }
        }
        self.reset();
        info!("LocalCacheWatch {} shut down", self.host);
    }
}
