//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了按主机复用的TCP连接池。

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// 连接提供者
///
/// `release` 把协议状态完整的连接归还复用（软关闭）；
/// 协议状态未知的连接直接丢弃即为硬关闭。
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// 获取到指定主机的连接
    async fn acquire(&self, host: &str) -> Result<TcpStream>;

    /// 归还连接
    fn release(&self, host: &str, stream: TcpStream);
}

/// TCP连接池
pub struct TcpConnectionPool {
    idle: DashMap<String, Vec<TcpStream>>,
    connect_timeout: Duration,
    max_idle_per_host: usize,
}

impl TcpConnectionPool {
    /// 创建新的连接池
    ///
    /// # 参数
    ///
    /// * `connect_timeout` - 建立连接超时时间
    /// * `max_idle_per_host` - 每个主机保留的空闲连接数上限
    pub fn new(connect_timeout: Duration, max_idle_per_host: usize) -> Self {
        Self {
            idle: DashMap::new(),
            connect_timeout,
            max_idle_per_host,
        }
    }

    /// 指定主机的空闲连接数
    pub fn idle_count(&self, host: &str) -> usize {
        self.idle.get(host).map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConnectionProvider for TcpConnectionPool {
    #[instrument(skip(self), level = "debug")]
    async fn acquire(&self, host: &str) -> Result<TcpStream> {
        let pooled = self.idle.get_mut(host).and_then(|mut conns| conns.pop());
        if let Some(stream) = pooled {
            debug!("Reusing pooled connection to {}", host);
            return Ok(stream);
        }

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(host))
            .await
            .map_err(|_| CacheError::Timeout(format!("connect to {} timed out", host)))?
            .map_err(|e| CacheError::Transport(format!("connect to {} failed: {}", host, e)))?;
        stream.set_nodelay(true)?;
        debug!("Opened new connection to {}", host);
        Ok(stream)
    }

    fn release(&self, host: &str, stream: TcpStream) {
        let mut conns = self.idle.entry(host.to_string()).or_default();
        if conns.len() < self.max_idle_per_host {
            conns.push(stream);
        }
    }
}
