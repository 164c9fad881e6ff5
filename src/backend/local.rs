//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了本地缓存存储，采用active/inactive两代结构实现近似LRU的淘汰。

use super::item::CacheItem;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, instrument};

/// 全局容量计数器
///
/// 所有主机的本地存储共享同一组计数器，只做原子加减。
#[derive(Debug, Default)]
pub struct CacheCounters {
    size: AtomicU64,
    count: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有本地条目值的总字节数
    pub fn total_size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// 所有本地条目的总数
    pub fn total_count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn account(&self, item: &CacheItem) {
        self.size.fetch_add(item.value_size, Ordering::AcqRel);
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self, item: &CacheItem) {
        self.size.fetch_sub(item.value_size, Ordering::AcqRel);
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 受锁保护的部分：inactive代和版本号反向索引
#[derive(Default)]
struct Generations {
    inactive: HashMap<String, Arc<CacheItem>>,
    by_cache_id: HashMap<u64, String>,
}

/// 本地缓存存储
///
/// 每个键恰好位于 `active` 或 `inactive` 之一；反向索引覆盖两代，
/// 条目当前的 cache_id 总是指回该键。`active` 支持无锁读取，
/// 所有跨代移动以及反向索引的修改都在同一把锁内完成。
pub struct LocalCacheStore {
    host: String,
    active: DashMap<String, Arc<CacheItem>>,
    generations: Mutex<Generations>,
    counters: Arc<CacheCounters>,
}

impl LocalCacheStore {
    /// 创建新的本地存储
    ///
    /// # 参数
    ///
    /// * `host` - 该存储对应的服务器
    /// * `counters` - 与其他存储共享的容量计数器
    pub fn new(host: impl Into<String>, counters: Arc<CacheCounters>) -> Self {
        Self {
            host: host.into(),
            active: DashMap::new(),
            generations: Mutex::new(Generations::default()),
            counters,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn counters(&self) -> &Arc<CacheCounters> {
        &self.counters
    }

    fn lock(&self) -> MutexGuard<'_, Generations> {
        self.generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 获取缓存条目
    ///
    /// 先无锁查找active；未命中时在锁内把条目从inactive移动到active。
    pub fn get(&self, key: &str) -> Option<Arc<CacheItem>> {
        if let Some(item) = self.active.get(key) {
            return Some(item.value().clone());
        }

        let mut gens = self.lock();
        // 等锁期间可能已被其他读取提升
        if let Some(item) = self.active.get(key) {
            return Some(item.value().clone());
        }
        let item = gens.inactive.remove(key)?;
        self.active.insert(key.to_string(), item.clone());
        Some(item)
    }

    /// 写入缓存条目
    ///
    /// 新条目总是进入inactive；同键旧条目先被淘汰再计入新条目。
    #[instrument(skip(self, item), level = "debug", fields(host = %self.host))]
    pub fn put(&self, key: &str, item: Arc<CacheItem>) {
        let mut gens = self.lock();

        let old = match gens.inactive.remove(key) {
            Some(old) => Some(old),
            None => self.active.remove(key).map(|(_, old)| old),
        };
        if let Some(old) = old {
            self.counters.release(&old);
            gens.by_cache_id.remove(&old.cache_id);
        }

        // 同一版本号不应出现在两个键上，若出现则淘汰旧的持有者
        if let Some(owner) = gens.by_cache_id.remove(&item.cache_id) {
            if owner != key {
                if let Some(evicted) = self.take_locked(&mut gens, &owner) {
                    self.counters.release(&evicted);
                }
            }
        }

        self.counters.account(&item);
        gens.by_cache_id.insert(item.cache_id, key.to_string());
        gens.inactive.insert(key.to_string(), item);
        debug!("Local put: key={}, total_count={}", key, self.counters.total_count());
    }

    /// 删除缓存条目
    pub fn remove(&self, key: &str) -> Option<Arc<CacheItem>> {
        let mut gens = self.lock();
        let item = self.take_locked(&mut gens, key)?;
        gens.by_cache_id.remove(&item.cache_id);
        self.counters.release(&item);
        Some(item)
    }

    /// 从任一代中取出条目（调用者持有锁）
    fn take_locked(&self, gens: &mut Generations, key: &str) -> Option<Arc<CacheItem>> {
        match self.active.remove(key) {
            Some((_, item)) => Some(item),
            None => gens.inactive.remove(key),
        }
    }

    /// 两代轮转
    ///
    /// 先淘汰至多 `max_count` 个inactive条目（按迭代顺序），
    /// 再把所有active条目降级到inactive并清空active。
    ///
    /// # 返回值
    ///
    /// 返回被淘汰的条目数
    #[instrument(skip(self), level = "debug", fields(host = %self.host))]
    pub fn drop_inactive(&self, max_count: usize) -> usize {
        let mut gens = self.lock();
        debug!(
            "dropInactive host={} inactive_size={} active_size={}",
            self.host,
            gens.inactive.len(),
            self.active.len()
        );

        let dropped = self.evict_locked(&mut gens, max_count);
        self.demote_locked(&mut gens);
        dropped
    }

    /// 只淘汰inactive条目，不做轮转
    ///
    /// # 返回值
    ///
    /// 返回被淘汰的条目数
    pub fn evict_inactive(&self, max_count: usize) -> usize {
        let mut gens = self.lock();
        self.evict_locked(&mut gens, max_count)
    }

    /// 把所有active条目降级到inactive
    pub fn demote_active(&self) {
        let mut gens = self.lock();
        self.demote_locked(&mut gens);
    }

    fn evict_locked(&self, gens: &mut Generations, max_count: usize) -> usize {
        let victims: Vec<String> = gens.inactive.keys().take(max_count).cloned().collect();
        let mut dropped = 0;
        for key in victims {
            if let Some(item) = gens.inactive.remove(&key) {
                gens.by_cache_id.remove(&item.cache_id);
                self.counters.release(&item);
                dropped += 1;
            }
        }
        dropped
    }

    fn demote_locked(&self, gens: &mut Generations) {
        let inactive = &mut gens.inactive;
        self.active.retain(|key, item| {
            inactive.insert(key.clone(), item.clone());
            false
        });
    }

    /// 清空本地存储
    #[instrument(skip(self), level = "debug", fields(host = %self.host))]
    pub fn clear(&self) {
        let mut gens = self.lock();
        for (_, item) in gens.inactive.drain() {
            self.counters.release(&item);
        }
        let counters = &self.counters;
        self.active.retain(|_, item| {
            counters.release(item);
            false
        });
        gens.by_cache_id.clear();
        debug!("Local cache cleared: host={}", self.host);
    }

    /// 处理服务器推送的失效版本号
    ///
    /// 只有当条目当前的 cache_id 与通知的版本号一致时才删除；
    /// 已被本地更新覆盖的旧版本号不影响条目。
    ///
    /// # 返回值
    ///
    /// 返回被删除的条目数
    pub fn update(&self, cache_ids: &[u64]) -> usize {
        if cache_ids.is_empty() {
            return 0;
        }

        let mut gens = self.lock();
        let mut evicted = 0;
        for &cache_id in cache_ids {
            let key = match gens.by_cache_id.remove(&cache_id) {
                Some(key) => key,
                None => continue,
            };

            let matches = match self.active.get(&key) {
                Some(item) => Some(item.cache_id == cache_id),
                None => gens.inactive.get(&key).map(|item| item.cache_id == cache_id),
            };

            if matches == Some(true) {
                if let Some(item) = self.take_locked(&mut gens, &key) {
                    self.counters.release(&item);
                    evicted += 1;
                }
            }
        }
        debug!(
            "Local invalidation: host={}, notified={}, evicted={}",
            self.host,
            cache_ids.len(),
            evicted
        );
        evicted
    }

    /// 反向索引查询：版本号当前属于哪个键
    pub fn key_for_cache_id(&self, cache_id: u64) -> Option<String> {
        self.lock().by_cache_id.get(&cache_id).cloned()
    }

    /// 键是否位于active代
    pub fn is_active(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn inactive_len(&self) -> usize {
        self.lock().inactive.len()
    }

    pub fn reverse_index_len(&self) -> usize {
        self.lock().by_cache_id.len()
    }

    pub fn len(&self) -> usize {
        let gens = self.lock();
        gens.inactive.len() + self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 检查两代划分与反向索引是否一致
    ///
    /// 在没有并发修改的时间点调用才有意义。
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let gens = self.lock();
        let mut seen = 0usize;

        let mut check = |key: &str, item: &CacheItem| -> std::result::Result<(), String> {
            seen += 1;
            match gens.by_cache_id.get(&item.cache_id) {
                Some(owner) if owner == key => Ok(()),
                Some(owner) => Err(format!(
                    "cache_id {} of key {} points to {}",
                    item.cache_id, key, owner
                )),
                None => Err(format!("cache_id {} of key {} not indexed", item.cache_id, key)),
            }
        };

        for entry in self.active.iter() {
            if gens.inactive.contains_key(entry.key()) {
                return Err(format!("key {} present in both generations", entry.key()));
            }
            check(entry.key(), entry.value())?;
        }
        for (key, item) in gens.inactive.iter() {
            check(key, item)?;
        }

        if seen != gens.by_cache_id.len() {
            return Err(format!(
                "reverse index has {} entries for {} keys",
                gens.by_cache_id.len(),
                seen
            ));
        }
        Ok(())
    }
}
