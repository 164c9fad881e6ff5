//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存客户端的指标收集和监控功能。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集和存储缓存客户端的各种运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 批量请求条目数统计
    /// key: "host:op:result"
    pub requests_total: Arc<Mutex<HashMap<String, u64>>>,
    /// 失效令牌数和淘汰条目数
    /// key: host -> (tokens, evicted)
    pub invalidations: Arc<Mutex<HashMap<String, (u64, u64)>>>,
    /// 长轮询连续失败导致的重置次数
    pub watch_resets: Arc<Mutex<HashMap<String, u64>>>,
    /// 操作耗时（累积时间和次数）
    /// key: "component:op" -> (total_duration_secs, count)
    pub operation_duration: Arc<Mutex<HashMap<String, (f64, u64)>>>,
    /// 本地缓存总字节数和条目数
    pub local_cache_usage: Arc<Mutex<(u64, u64)>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

impl Metrics {
    /// 记录请求指标
    ///
    /// # 参数
    ///
    /// * `host` - 服务器地址
    /// * `op` - 操作类型（add/set/touch/delete...）
    /// * `result` - 条目结果（success/rejected）
    pub fn record_request(&self, host: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "cache_request", host, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}", host, op, result);
        *lock(&self.requests_total).entry(key).or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, component: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}", component, op);
        let mut map = lock(&self.operation_duration);
        let entry = map.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 记录一批失效令牌
    pub fn record_invalidation(&self, host: &str, tokens: usize, evicted: usize) {
        let mut map = lock(&self.invalidations);
        let entry = map.entry(host.to_string()).or_insert((0, 0));
        entry.0 += tokens as u64;
        entry.1 += evicted as u64;
    }

    /// 记录一次订阅重置
    pub fn record_watch_reset(&self, host: &str) {
        *lock(&self.watch_resets).entry(host.to_string()).or_insert(0) += 1;
    }

    /// 设置本地缓存用量
    pub fn set_local_cache_usage(&self, size: u64, count: u64) {
        *lock(&self.local_cache_usage) = (size, count);
    }

    /// 读取某个请求计数，不存在时为0
    pub fn request_count(&self, host: &str, op: &str, result: &str) -> u64 {
        lock(&self.requests_total)
            .get(&format!("{}:{}:{}", host, op, result))
            .copied()
            .unwrap_or(0)
    }

    /// 清空所有指标
    pub fn reset(&self) {
        lock(&self.requests_total).clear();
        lock(&self.invalidations).clear();
        lock(&self.watch_resets).clear();
        lock(&self.operation_duration).clear();
        *lock(&self.local_cache_usage) = (0, 0);
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为文本返回，用于监控系统采集
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let reqs = lock(&metrics.requests_total);
    let invalidations = lock(&metrics.invalidations);
    let resets = lock(&metrics.watch_resets);
    let dur = lock(&metrics.operation_duration);
    let (size, count) = *lock(&metrics.local_cache_usage);

    let mut output = String::new();
    for (k, v) in reqs.iter() {
        let parts: Vec<&str> = k.rsplitn(3, ':').collect();
        if parts.len() == 3 {
            output.push_str(&format!(
                "nearcache_requests_total{{host=\"{}\", op=\"{}\", result=\"{}\"}} {}\n",
                parts[2], parts[1], parts[0], v
            ));
        }
    }
    for (host, (tokens, evicted)) in invalidations.iter() {
        output.push_str(&format!(
            "nearcache_invalidation_tokens_total{{host=\"{}\"}} {}\n",
            host, tokens
        ));
        output.push_str(&format!(
            "nearcache_invalidation_evicted_total{{host=\"{}\"}} {}\n",
            host, evicted
        ));
    }
    for (host, v) in resets.iter() {
        output.push_str(&format!(
            "nearcache_watch_resets_total{{host=\"{}\"}} {}\n",
            host, v
        ));
    }
    for (k, (total, count)) in dur.iter() {
        if let Some((component, op)) = k.split_once(':') {
            output.push_str(&format!(
                "nearcache_operation_duration_seconds_sum{{component=\"{}\", operation=\"{}\"}} {}\n",
                component, op, total
            ));
            output.push_str(&format!(
                "nearcache_operation_duration_seconds_count{{component=\"{}\", operation=\"{}\"}} {}\n",
                component, op, count
            ));
        }
    }
    output.push_str(&format!("nearcache_local_cache_bytes {}\n", size));
    output.push_str(&format!("nearcache_local_cache_items {}\n", count));
    output
}
