//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了续期（touch）批处理器，把本地续期合并后批量发往服务器。

use crate::backend::CacheItem;
use crate::multi::{MultiUpdate, MultiUpdateItem};
use crate::protocol::UpdateSubOp;
use crate::utils::current_tick_ms;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// 续期批处理器
///
/// 同一个键的多次续期只保留最后一次。
pub struct TouchBatcher {
    host: String,
    pending: DashMap<String, Arc<CacheItem>>,
    engine: tokio::sync::Mutex<MultiUpdate>,
    idle_delay: Duration,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TouchBatcher {
    /// 创建新的续期批处理器
    ///
    /// # 参数
    ///
    /// * `host` - 所属主机，仅用于日志
    /// * `engine` - 专用的批量更新引擎
    /// * `idle_delay` - 没有可处理条目时的空闲间隔
    pub fn new(host: impl Into<String>, engine: MultiUpdate, idle_delay: Duration) -> Self {
        Self {
            host: host.into(),
            pending: DashMap::new(),
            engine: tokio::sync::Mutex::new(engine),
            idle_delay,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// 记录一次续期
    ///
    /// 立即更新条目的过期时间；服务器端的续期由后台批量发送
    pub fn touch(&self, key: &str, item: Arc<CacheItem>, expiration: Option<u64>) {
        item.set_expiration(expiration);
        self.pending.insert(key.to_string(), item);
    }

    /// 待发送的续期数
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 取出当前所有待发送条目并提交一次
    ///
    /// # 返回值
    ///
    /// 返回服务器确认的条目数
    #[instrument(skip(self), level = "debug", fields(host = %self.host))]
    pub async fn flush_once(&self) -> usize {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let now = current_tick_ms();
        let mut items: Vec<MultiUpdateItem> = keys
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .map(|(key, item)| touch_item(key, &item, now))
            .collect();
        if items.is_empty() {
            return 0;
        }

        let mut engine = self.engine.lock().await;
        let processed = engine.multi_update(&mut items, UpdateSubOp::Touch).await;
        if let Some(err) = engine.last_error() {
            warn!("Touch batch to {} incomplete: {}", self.host, err);
        }
        debug!("Touched {}/{} items on {}", processed, items.len(), self.host);
        processed
    }

    /// 启动后台刷新任务
    pub fn start(self: &Arc<Self>) {
        let batcher = Arc::clone(self);
        let handle = tokio::spawn(async move { batcher.run().await });
        let mut slot = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(handle);
    }

    async fn run(&self) {
        info!("TouchBatcher {} run", self.host);
        while !self.shutdown.is_cancelled() {
            let processed = if self.pending.is_empty() {
                0
            } else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    processed = self.flush_once() => processed,
                }
            };

            if processed == 0 {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_delay) => {}
                }
            }
        }
        info!("TouchBatcher {} stopped", self.host);
    }

    /// 停止后台刷新任务
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("TouchBatcher {} task ended abnormally: {}", self.host, e);
            }
        }
    }
}

/// 构造续期请求条目
///
/// 本地已过期的条目以0发送，使服务器立即过期；其余按条目当前的过期时间
fn touch_item(key: String, item: &CacheItem, now: u64) -> MultiUpdateItem {
    let expiration = if item.is_expired_at(now) {
        Some(0)
    } else {
        item.expiration()
    };
    MultiUpdateItem::new(key, Vec::new())
        .with_cache_id(item.cache_id)
        .with_expiration(expiration)
}
