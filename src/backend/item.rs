//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了本地缓存条目。

use crate::utils::current_tick_ms;
use std::sync::atomic::{AtomicU64, Ordering};

/// 表示“永不过期”的内部哨兵值
const NEVER: u64 = u64::MAX;

/// 本地缓存条目
///
/// 值和版本号（cache_id）在创建后不变；过期时间可以被touch原地更新，
/// 因此用原子类型保存，条目以 `Arc` 在存储和续期批处理之间共享。
#[derive(Debug)]
pub struct CacheItem {
    pub key: String,
    pub value: Vec<u8>,
    /// 编解码标志
    pub flags: u32,
    /// 用于容量统计的字节数
    pub value_size: u64,
    /// 服务器分配的版本号
    pub cache_id: u64,
    expiration: AtomicU64,
    expire_time: AtomicU64,
}

impl CacheItem {
    /// 创建新的缓存条目
    ///
    /// # 参数
    ///
    /// * `key` - 缓存键
    /// * `value` - 值（已编码的字节）
    /// * `flags` - 编解码标志
    /// * `cache_id` - 服务器分配的版本号
    /// * `expiration` - 相对过期时间（秒），None表示永不过期
    pub fn new(
        key: impl Into<String>,
        value: Vec<u8>,
        flags: u32,
        cache_id: u64,
        expiration: Option<u64>,
    ) -> Self {
        let value_size = value.len() as u64;
        let item = Self {
            key: key.into(),
            value,
            flags,
            value_size,
            cache_id,
            expiration: AtomicU64::new(NEVER),
            expire_time: AtomicU64::new(NEVER),
        };
        item.set_expiration(expiration);
        item
    }

    /// 相对过期时间（秒）
    pub fn expiration(&self) -> Option<u64> {
        match self.expiration.load(Ordering::Acquire) {
            NEVER => None,
            secs => Some(secs),
        }
    }

    /// 绝对过期tick（毫秒），None表示永不过期
    pub fn expire_time(&self) -> Option<u64> {
        match self.expire_time.load(Ordering::Acquire) {
            NEVER => None,
            tick => Some(tick),
        }
    }

    /// 更新过期时间，并以当前tick重新计算绝对过期时间
    pub fn set_expiration(&self, expiration: Option<u64>) {
        match expiration {
            Some(secs) => {
                let secs = secs.min(NEVER - 1);
                let deadline = current_tick_ms().saturating_add(secs.saturating_mul(1000));
                self.expiration.store(secs, Ordering::Release);
                self.expire_time
                    .store(deadline.min(NEVER - 1), Ordering::Release);
            }
            None => {
                self.expiration.store(NEVER, Ordering::Release);
                self.expire_time.store(NEVER, Ordering::Release);
            }
        }
    }

    /// 在给定tick时是否已过期
    pub fn is_expired_at(&self, tick: u64) -> bool {
        match self.expire_time() {
            Some(deadline) => deadline <= tick,
            None => false,
        }
    }

    /// 当前是否已过期
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_tick_ms())
    }
}
