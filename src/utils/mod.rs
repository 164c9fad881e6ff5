//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 统一工具模块
//!
//! 提供测试和运行时共用的工具函数，包括：
//! - 日志设置工具
//! - 单调时钟（tick）工具
//! - 服务器配置创建工具

use crate::config::{ClientConfig, Config};
use lazy_static::lazy_static;
use std::sync::Once;
use std::time::Instant;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

lazy_static! {
    static ref TICK_BASE: Instant = Instant::now();
}

pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new("debug"))
            .try_init()
            .ok();
    });
}

/// 当前单调tick（毫秒）
///
/// 进程内单调递增，从第一次调用附近开始计数，
/// 仅用于计算本地过期时间，不与服务器时钟比较。
pub fn current_tick_ms() -> u64 {
    TICK_BASE.elapsed().as_millis() as u64
}

/// 创建指向给定服务器列表的配置
pub fn create_config_for_servers(servers: Vec<String>) -> Config {
    Config {
        client: ClientConfig {
            servers,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// 校验缓存键
///
/// 键不能为空，编码后的长度必须能放进16位长度字段
pub fn validate_key(key: &str) -> std::result::Result<(), String> {
    if key.is_empty() {
        return Err("key cannot be empty".to_string());
    }
    if key.len() > u16::MAX as usize {
        return Err(format!(
            "key length {} exceeds maximum of {} bytes",
            key.len(),
            u16::MAX
        ));
    }
    Ok(())
}
