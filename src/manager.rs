//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存管理器，负责组装每台服务器的本地缓存、失效订阅和批量更新引擎。

use crate::backend::{
    CacheCounters, CacheItem, ConnectionProvider, HashHostResolver, HostResolver, LocalCacheStore,
    TcpConnectionPool,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::metrics::GLOBAL_METRICS;
use crate::multi::{MultiDeleteItem, MultiUpdate, MultiUpdateItem};
use crate::protocol::UpdateSubOp;
use crate::serialization::{DefaultTransCoder, JsonSerializer, Serializer, TransCoder};
use crate::sync::{LocalCacheWatch, TcpWatchClient, TouchBatcher, WatchClient};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// 缓存管理器
///
/// 每台配置的服务器对应一个 [`LocalCacheWatch`]，所有本地存储共享同一组容量计数器。
/// 前台的批量更新共用一个引擎，调用之间串行。
pub struct CacheManager {
    config: Config,
    resolver: Arc<dyn HostResolver>,
    codec: Arc<dyn TransCoder>,
    serializer: JsonSerializer,
    counters: Arc<CacheCounters>,
    watches: HashMap<String, Arc<LocalCacheWatch>>,
    engine: tokio::sync::Mutex<MultiUpdate>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    /// 使用默认组件创建缓存管理器
    ///
    /// 默认组件为murmur3主机路由、TCP连接池、默认编码器和TCP长轮询客户端
    pub fn new(config: Config) -> Result<Self> {
        let resolver: Arc<dyn HostResolver> =
            Arc::new(HashHostResolver::new(config.client.servers.clone()));
        let connections: Arc<dyn ConnectionProvider> = Arc::new(TcpConnectionPool::new(
            config.client.connection_timeout(),
            config.client.max_idle_connections,
        ));
        let codec: Arc<dyn TransCoder> = Arc::new(DefaultTransCoder::with_compress_threshold(
            config.local_cache.compress_threshold,
        ));
        let watch_client: Arc<dyn WatchClient> = Arc::new(TcpWatchClient::new(
            Arc::clone(&connections),
            config.client.group_id,
            config.client.connection_timeout(),
        ));
        Self::with_components(config, resolver, connections, codec, watch_client)
    }

    /// 使用指定组件创建缓存管理器
    ///
    /// # 参数
    ///
    /// * `config` - 配置
    /// * `resolver` - 键到主机的映射
    /// * `connections` - 连接提供者
    /// * `codec` - 键值编码器
    /// * `watch_client` - 失效订阅客户端
    #[instrument(skip_all, level = "info", fields(server_count = config.client.servers.len()))]
    pub fn with_components(
        config: Config,
        resolver: Arc<dyn HostResolver>,
        connections: Arc<dyn ConnectionProvider>,
        codec: Arc<dyn TransCoder>,
        watch_client: Arc<dyn WatchClient>,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::ConfigError)?;

        let counters = Arc::new(CacheCounters::new());
        let mut watches = HashMap::new();
        if config.local_cache.enabled {
            for host in resolver.hosts() {
                let store = Arc::new(LocalCacheStore::new(host.clone(), Arc::clone(&counters)));
                let touch_engine = MultiUpdate::new(
                    Arc::clone(&resolver),
                    Arc::clone(&connections),
                    Arc::clone(&codec),
                    &config.client,
                );
                let touch = Arc::new(TouchBatcher::new(
                    host.clone(),
                    touch_engine,
                    Duration::from_millis(config.touch.idle_delay_ms),
                ));
                let watch = LocalCacheWatch::new(
                    store,
                    Arc::clone(&watch_client),
                    touch,
                    config.watch.clone(),
                );
                watches.insert(host, Arc::new(watch));
            }
        }
        info!("CacheManager created with {} local caches", watches.len());

        let engine = MultiUpdate::new(
            Arc::clone(&resolver),
            connections,
            Arc::clone(&codec),
            &config.client,
        );
        Ok(Self {
            config,
            resolver,
            codec,
            serializer: JsonSerializer::new(),
            counters,
            watches,
            engine: tokio::sync::Mutex::new(engine),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn counters(&self) -> &Arc<CacheCounters> {
        &self.counters
    }

    /// 指定主机的本地缓存
    pub fn watch(&self, host: &str) -> Option<Arc<LocalCacheWatch>> {
        self.watches.get(host).cloned()
    }

    /// 启动所有后台任务：失效订阅、续期批处理和容量清理
    pub fn start(self: &Arc<Self>) {
        for watch in self.watches.values() {
            watch.start();
        }
        if self.watches.is_empty() {
            return;
        }

        let manager = Arc::clone(self);
        let interval = Duration::from_millis(self.config.local_cache.drop_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.enforce_capacity();
                    }
                }
            }
            debug!("Capacity sweeper stopped");
        });
        *self.sweeper.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        info!("CacheManager started");
    }

    fn watch_for_key(&self, key: &str) -> Option<&Arc<LocalCacheWatch>> {
        let host = self.resolver.resolve_host(key)?;
        self.watches.get(&host)
    }

    /// 读取本地缓存
    pub fn get(&self, key: &str) -> Option<Arc<CacheItem>> {
        self.watch_for_key(key)?.get(key)
    }

    /// 读取本地缓存并续期
    pub fn get_and_touch(&self, key: &str, expiration: Option<u64>) -> Option<Arc<CacheItem>> {
        self.watch_for_key(key)?.get_and_touch(key, expiration)
    }

    /// 写入本地缓存
    ///
    /// 本地缓存关闭时忽略；键无法路由时返回错误
    pub fn put(&self, key: &str, item: Arc<CacheItem>) -> Result<()> {
        if !self.config.local_cache.enabled {
            return Ok(());
        }
        let watch = self.watch_for_key(key).ok_or_else(|| {
            CacheError::Validation(format!("can not get host with the key {}", key))
        })?;
        watch.put(key, item);
        Ok(())
    }

    /// 删除本地缓存
    pub fn remove(&self, key: &str) -> Option<Arc<CacheItem>> {
        self.watch_for_key(key)?.remove(key)
    }

    /// 读取并反序列化本地缓存的值
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(item) = self.get(key) else {
            return Ok(None);
        };
        let bytes = self.codec.decode_value(&item.value, item.flags)?;
        self.serializer.deserialize(&bytes).map(Some)
    }

    /// 序列化并写入本地缓存
    ///
    /// # 参数
    ///
    /// * `key` - 缓存键
    /// * `value` - 值
    /// * `cache_id` - 服务器分配的版本号
    /// * `expiration` - 相对过期时间（秒）
    pub fn put_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        cache_id: u64,
        expiration: Option<u64>,
    ) -> Result<()> {
        let bytes = self.serializer.serialize(value)?;
        let item = CacheItem::new(key, bytes, 0, cache_id, expiration);
        self.put(key, Arc::new(item))
    }

    async fn multi_update(&self, items: &mut [MultiUpdateItem], op: UpdateSubOp) -> usize {
        let processed = self.engine.lock().await.multi_update(items, op).await;
        for item in items.iter() {
            if item.is_success() {
                self.remove(&item.key);
            }
        }
        processed
    }

    pub async fn multi_add(&self, items: &mut [MultiUpdateItem]) -> usize {
        self.multi_update(items, UpdateSubOp::Add).await
    }

    pub async fn multi_set(&self, items: &mut [MultiUpdateItem]) -> usize {
        self.multi_update(items, UpdateSubOp::Set).await
    }

    pub async fn multi_replace(&self, items: &mut [MultiUpdateItem]) -> usize {
        self.multi_update(items, UpdateSubOp::Replace).await
    }

    pub async fn multi_append(&self, items: &mut [MultiUpdateItem]) -> usize {
        self.multi_update(items, UpdateSubOp::Append).await
    }

    pub async fn multi_prepend(&self, items: &mut [MultiUpdateItem]) -> usize {
        self.multi_update(items, UpdateSubOp::Prepend).await
    }

    pub async fn multi_delete(&self, items: &mut [MultiDeleteItem]) -> usize {
        let processed = self.engine.lock().await.multi_delete(items).await;
        for item in items.iter() {
            if item.deleted {
                self.remove(&item.key);
            }
        }
        processed
    }

    /// 最近一次前台批量调用的错误
    pub async fn last_error(&self) -> Option<String> {
        self.engine.lock().await.last_error().map(str::to_string)
    }

    /// 超出容量上限时逐批淘汰非活跃条目
    ///
    /// 每次只淘汰上次轮转以来未被读取的条目，随后每个存储轮转一次。
    /// 活跃条目在本轮不会被淘汰，超出的部分留给下一轮。
    ///
    /// # 返回值
    ///
    /// 返回淘汰的条目数
    pub fn enforce_capacity(&self) -> usize {
        let mut dropped = 0;
        if self.over_capacity() {
            'sweep: loop {
                let mut round = 0;
                for watch in self.watches.values() {
                    if !self.over_capacity() {
                        break 'sweep;
                    }
                    round += watch.store().evict_inactive(self.victim_budget());
                }
                dropped += round;
                if round == 0 {
                    break;
                }
            }
            for watch in self.watches.values() {
                watch.store().demote_active();
            }
        }

        GLOBAL_METRICS
            .set_local_cache_usage(self.counters.total_size(), self.counters.total_count());
        if dropped > 0 {
            debug!("Capacity sweep dropped {} items", dropped);
        }
        dropped
    }

    fn over_capacity(&self) -> bool {
        let limits = &self.config.local_cache;
        self.counters.total_size() > limits.max_size
            || self.counters.total_count() > limits.max_count
    }

    /// 单次淘汰的数量：条目数超限时不超过超出的部分
    fn victim_budget(&self) -> usize {
        let limits = &self.config.local_cache;
        let excess = self.counters.total_count().saturating_sub(limits.max_count);
        if excess > 0 {
            limits.drop_batch_size.min(excess as usize)
        } else {
            limits.drop_batch_size
        }
    }

    /// 关闭所有后台任务并清空本地缓存
    #[instrument(skip(self), level = "info")]
    pub async fn shutdown(&self) -> Result<()> {
        info!("开始关闭缓存管理器...");
        self.shutdown.cancel();

        let sweeper = self.sweeper.lock().unwrap_or_else(|p| p.into_inner()).take();
        let mut errors = Vec::new();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!("容量清理任务异常结束: {}", e);
                errors.push(format!("sweeper: {}", e));
            }
        }

        for watch in self.watches.values() {
            watch.shutdown().await;
        }

        if errors.is_empty() {
            info!("缓存管理器已关闭");
            Ok(())
        } else {
            Err(CacheError::ShutdownError(errors.join(", ")))
        }
    }
}
