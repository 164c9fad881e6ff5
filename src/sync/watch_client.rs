//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效订阅（watch）的长轮询RPC。

use crate::backend::ConnectionProvider;
use crate::error::{CacheError, Result};
use crate::protocol::{
    encode_check_watch, encode_create_watch, CATEGORY_CACHE, NO_WATCH, TYPE_CHECK_WATCH_RES,
    TYPE_CREATE_WATCH_RES, TYPE_ERROR_RES,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// 单次checkWatch返回的令牌数上限，超出视为协议错误
const MAX_CHECK_WATCH_IDS: u32 = 1 << 24;

/// 令牌列表的初始容量，更多的令牌随读取增长
const INITIAL_IDS_CAPACITY: u32 = 1024;

/// 失效订阅客户端
#[async_trait]
pub trait WatchClient: Send + Sync {
    /// 注册watch，返回非0的watchID
    async fn create_watch(&self, host: &str, max_next_check_interval: u32) -> Result<u32>;

    /// 长轮询，返回自ack以来被修改的cache_id列表
    async fn check_watch(
        &self,
        host: &str,
        watch_id: u32,
        max_next_check_interval: u32,
        ack_cache_id: u64,
    ) -> Result<Vec<u64>>;
}

/// 基于TCP连接池的失效订阅客户端
pub struct TcpWatchClient {
    connections: Arc<dyn ConnectionProvider>,
    group_id: u32,
    connect_timeout: Duration,
}

impl TcpWatchClient {
    pub fn new(connections: Arc<dyn ConnectionProvider>, group_id: u32, connect_timeout: Duration) -> Self {
        Self {
            connections,
            group_id,
            connect_timeout,
        }
    }

    /// 在超时内完成一次请求/响应，按结果决定归还还是丢弃连接
    async fn call(
        &self,
        host: &str,
        timeout: Duration,
        request: &[u8],
        success_type: u8,
    ) -> Result<WatchReply> {
        let mut stream = self.connections.acquire(host).await?;
        let result =
            tokio::time::timeout(timeout, exchange(&mut stream, request, success_type)).await;

        match result {
            Ok(Ok(reply)) => {
                self.connections.release(host, stream);
                Ok(reply)
            }
            Ok(Err(CacheError::ServerRejection(reason))) => {
                self.connections.release(host, stream);
                Err(CacheError::ServerRejection(reason))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CacheError::Timeout(format!(
                "watch call to {} timed out after {:?}",
                host, timeout
            ))),
        }
    }
}

enum WatchReply {
    WatchId(u32),
    CacheIds(Vec<u64>),
}

fn transport(e: std::io::Error) -> CacheError {
    CacheError::Transport(e.to_string())
}

async fn exchange(stream: &mut TcpStream, request: &[u8], success_type: u8) -> Result<WatchReply> {
    send_and_expect(stream, request, success_type).await?;
    if success_type == TYPE_CREATE_WATCH_RES {
        return Ok(WatchReply::WatchId(stream.read_u32().await.map_err(transport)?));
    }

    let count = stream.read_u32().await.map_err(transport)?;
    if count > MAX_CHECK_WATCH_IDS {
        return Err(CacheError::Protocol(format!(
            "checkWatch returned {} ids",
            count
        )));
    }
    let mut ids = Vec::with_capacity(count.min(INITIAL_IDS_CAPACITY) as usize);
    for _ in 0..count {
        ids.push(stream.read_u64().await.map_err(transport)?);
    }
    Ok(WatchReply::CacheIds(ids))
}

/// 发送请求并读取响应头；错误响应读取原因码后返回 `ServerRejection`
async fn send_and_expect(stream: &mut TcpStream, request: &[u8], success_type: u8) -> Result<()> {
    stream.write_all(request).await.map_err(transport)?;

    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await.map_err(transport)?;

    match (header[0], header[1]) {
        (CATEGORY_CACHE, kind) if kind == success_type => Ok(()),
        (CATEGORY_CACHE, TYPE_ERROR_RES) => {
            let reason = stream.read_u16().await.map_err(transport)?;
            Err(CacheError::ServerRejection(reason))
        }
        (category, kind) => Err(CacheError::Protocol(format!(
            "unexpected watch response header category={} type={}",
            category, kind
        ))),
    }
}

#[async_trait]
impl WatchClient for TcpWatchClient {
    #[instrument(skip(self), level = "debug")]
    async fn create_watch(&self, host: &str, max_next_check_interval: u32) -> Result<u32> {
        let request = encode_create_watch(self.group_id, max_next_check_interval);
        let reply = self
            .call(host, self.connect_timeout, &request, TYPE_CREATE_WATCH_RES)
            .await?;

        match reply {
            WatchReply::WatchId(NO_WATCH) => Err(CacheError::WatchError(format!(
                "server {} returned no watch",
                host
            ))),
            WatchReply::WatchId(watch_id) => {
                debug!("Created watch {} on {}", watch_id, host);
                Ok(watch_id)
            }
            WatchReply::CacheIds(_) => Err(CacheError::Protocol(
                "createWatch answered with a cache id list".to_string(),
            )),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn check_watch(
        &self,
        host: &str,
        watch_id: u32,
        max_next_check_interval: u32,
        ack_cache_id: u64,
    ) -> Result<Vec<u64>> {
        let request =
            encode_check_watch(self.group_id, watch_id, max_next_check_interval, ack_cache_id);
        let timeout = Duration::from_secs(max_next_check_interval as u64) + self.connect_timeout;

        match self.call(host, timeout, &request, TYPE_CHECK_WATCH_RES).await? {
            WatchReply::CacheIds(ids) => Ok(ids),
            WatchReply::WatchId(_) => Err(CacheError::Protocol(
                "checkWatch answered with a watch id".to_string(),
            )),
        }
    }
}
