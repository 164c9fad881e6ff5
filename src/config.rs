//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存客户端的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub local_cache: LocalCacheConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub touch: TouchConfig,
}

/// 客户端连接配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ClientConfig {
    /// 缓存服务器列表（host:port）
    pub servers: Vec<String>,
    /// 分组ID，随每条请求发送
    pub group_id: u32,
    /// 建立连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 单次批量调用允许占用的最长时间（毫秒）
    pub max_busy_time_ms: u64,
    /// 每个连接发送缓冲区大小（字节）
    pub socket_write_buffer_size: usize,
    /// 每个主机保留的空闲连接数上限
    pub max_idle_connections: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:7788".to_string()],
            group_id: 0,
            connection_timeout_ms: 3000,
            max_busy_time_ms: 5000,
            socket_write_buffer_size: 64 * 1024,
            max_idle_connections: 8,
        }
    }
}

impl ClientConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn max_busy_time(&self) -> Duration {
        Duration::from_millis(self.max_busy_time_ms)
    }
}

/// 本地缓存配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LocalCacheConfig {
    /// 是否启用本地缓存
    pub enabled: bool,
    /// 本地缓存总字节数上限
    pub max_size: u64,
    /// 本地缓存条目数上限
    pub max_count: u64,
    /// 容量检查间隔（毫秒）
    pub drop_interval_ms: u64,
    /// 每次淘汰的inactive条目数
    pub drop_batch_size: usize,
    /// 超过该大小的值压缩后发送（字节），0表示不压缩
    pub compress_threshold: usize,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 64 * 1024 * 1024, // 64MB
            max_count: 100_000,
            drop_interval_ms: 1000,
            drop_batch_size: 1000,
            compress_threshold: 0,
        }
    }
}

/// 失效订阅配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct WatchConfig {
    /// 长轮询最长等待时间（秒）
    pub max_next_check_interval: u32,
    /// 注册失败后的重试间隔（毫秒）
    pub register_retry_delay_ms: u64,
    /// 空结果返回过快时的休眠时间（毫秒）
    pub min_poll_round_trip_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_next_check_interval: 600,
            register_retry_delay_ms: 1000,
            min_poll_round_trip_ms: 200,
        }
    }
}

/// 续期批处理配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TouchConfig {
    /// 无待刷新条目时的空闲间隔（毫秒）
    pub idle_delay_ms: u64,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self { idle_delay_ms: 10 }
    }
}

impl Config {
    /// 从TOML字符串解析配置并校验
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| CacheError::ConfigError(e.to_string()))?;
        config.validate().map_err(CacheError::ConfigError)?;
        Ok(config)
    }

    /// 从TOML文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CacheError::ConfigError(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有必需的字段都已设置，并且值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        let client = &self.client;
        if client.servers.is_empty() {
            return Err("At least one server must be configured".to_string());
        }
        for server in &client.servers {
            if server.trim().is_empty() {
                return Err("Server address cannot be empty".to_string());
            }
        }

        if !(100..=30000).contains(&client.connection_timeout_ms) {
            return Err("connection_timeout_ms must be between 100 and 30000 ms".to_string());
        }

        if !(10..=600_000).contains(&client.max_busy_time_ms) {
            return Err("max_busy_time_ms must be between 10 and 600000 ms".to_string());
        }

        // 至少要能容纳一条记录的固定头部
        if client.socket_write_buffer_size < 64 {
            return Err("socket_write_buffer_size must be at least 64 bytes".to_string());
        }

        let local = &self.local_cache;
        if local.enabled {
            if local.max_size == 0 {
                return Err("local_cache max_size cannot be zero".to_string());
            }
            if local.max_count == 0 {
                return Err("local_cache max_count cannot be zero".to_string());
            }
            if local.drop_interval_ms == 0 {
                return Err("local_cache drop_interval_ms cannot be zero".to_string());
            }
            if local.drop_batch_size == 0 {
                return Err("local_cache drop_batch_size cannot be zero".to_string());
            }
        }

        let watch = &self.watch;
        if watch.max_next_check_interval == 0 || watch.max_next_check_interval > 3600 {
            return Err("watch max_next_check_interval must be between 1 and 3600 seconds".to_string());
        }

        Ok(())
    }
}
