//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了测试的通用工具函数：日志设置、进程内模拟缓存服务器和脚本化的失效订阅客户端。

#![allow(dead_code)]

use async_trait::async_trait;
use nearcache::config::Config;
use nearcache::error::{CacheError, Result};
use nearcache::protocol::*;
use nearcache::sync::WatchClient;
use nearcache::utils::create_config_for_servers;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub fn setup_logging() {
    nearcache::utils::setup_logging();
}

/// 创建指向给定服务器、超时较短的测试配置
pub fn test_config(servers: Vec<String>) -> Config {
    let mut config = create_config_for_servers(servers);
    config.client.connection_timeout_ms = 500;
    config.client.max_busy_time_ms = 2000;
    config.watch.max_next_check_interval = 1;
    config.watch.register_retry_delay_ms = 50;
    config.watch.min_poll_round_trip_ms = 20;
    config
}

/// 服务器上保存的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    pub value: Vec<u8>,
    pub flags: u32,
    pub cache_id: u64,
    pub expiration: u32,
}

#[derive(Default)]
struct ServerState {
    items: HashMap<Vec<u8>, StoredItem>,
    next_cache_id: u64,
    watches: HashMap<u32, Vec<u64>>,
    next_watch_id: u32,
    refuse_watch: bool,
    fail_check_watch: bool,
    requests: HashMap<u8, usize>,
}

impl ServerState {
    fn issue_cache_id(&mut self) -> u64 {
        self.next_cache_id += 1;
        self.next_cache_id
    }

    fn invalidate(&mut self, cache_id: u64) {
        for pending in self.watches.values_mut() {
            pending.push(cache_id);
        }
    }

    fn apply_update(
        &mut self,
        op_flag: u8,
        cache_id: u64,
        flags: u32,
        expiration: u32,
        key: Vec<u8>,
        data: Vec<u8>,
    ) -> std::result::Result<u64, u16> {
        let op = UpdateSubOp::from_op_flag(op_flag).ok_or(REASON_UNKNOWN_COMMAND)?;
        let existing = self.items.get(&key).cloned();
        if let Some(current) = &existing {
            if cache_id != 0 && current.cache_id != cache_id {
                return Err(REASON_MISMATCH);
            }
        }

        let value = match (op, &existing) {
            (UpdateSubOp::Add, Some(_)) => return Err(REASON_EXISTS),
            (UpdateSubOp::Add, None) | (UpdateSubOp::Set, _) => data,
            (_, None) => return Err(REASON_NOT_FOUND),
            (UpdateSubOp::Replace, Some(_)) => data,
            (UpdateSubOp::Append, Some(current)) => [current.value.clone(), data].concat(),
            (UpdateSubOp::Prepend, Some(current)) => [data, current.value.clone()].concat(),
            (UpdateSubOp::Touch, Some(current)) => {
                let cache_id = current.cache_id;
                if let Some(item) = self.items.get_mut(&key) {
                    item.expiration = expiration;
                }
                return Ok(cache_id);
            }
        };

        if let Some(current) = existing {
            self.invalidate(current.cache_id);
        }
        let new_cache_id = self.issue_cache_id();
        self.items.insert(
            key,
            StoredItem {
                value,
                flags,
                cache_id: new_cache_id,
                expiration,
            },
        );
        Ok(new_cache_id)
    }

    fn apply_delete(&mut self, cache_id: u64, key: &[u8]) -> std::result::Result<(), u16> {
        let current = self.items.get(key).ok_or(REASON_NOT_FOUND)?;
        if cache_id != 0 && current.cache_id != cache_id {
            return Err(REASON_MISMATCH);
        }
        let old = current.cache_id;
        self.items.remove(key);
        self.invalidate(old);
        Ok(())
    }
}

/// 进程内模拟缓存服务器
///
/// 实现更新、删除、createWatch和checkWatch，每次修改都会向所有watch推送旧的cache_id
pub struct MockCacheServer {
    addr: String,
    state: Arc<Mutex<ServerState>>,
    handle: JoinHandle<()>,
}

impl MockCacheServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = serve(stream, state).await;
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    pub fn get(&self, key: &str) -> Option<StoredItem> {
        self.state.lock().unwrap().items.get(key.as_bytes()).cloned()
    }

    /// 直接写入一个条目，返回分配的cache_id
    pub fn insert(&self, key: &str, value: &[u8]) -> u64 {
        let mut state = self.state.lock().unwrap();
        state
            .apply_update(
                UpdateSubOp::Set.op_flag(),
                0,
                0,
                EXPIRATION_NEVER,
                key.as_bytes().to_vec(),
                value.to_vec(),
            )
            .unwrap()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn push_invalidation(&self, cache_id: u64) {
        self.state.lock().unwrap().invalidate(cache_id);
    }

    pub fn set_refuse_watch(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_watch = refuse;
    }

    pub fn set_fail_check_watch(&self, fail: bool) {
        self.state.lock().unwrap().fail_check_watch = fail;
    }

    pub fn watch_count(&self) -> usize {
        self.state.lock().unwrap().watches.len()
    }

    /// 收到的某类请求数
    pub fn request_count(&self, kind: u8) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for MockCacheServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn write_error(stream: &mut (impl AsyncWriteExt + Unpin), reason: u16) -> std::io::Result<()> {
    let mut frame = vec![CATEGORY_CACHE, TYPE_ERROR_RES];
    frame.extend_from_slice(&reason.to_be_bytes());
    stream.write_all(&frame).await
}

async fn serve(stream: TcpStream, state: Arc<Mutex<ServerState>>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let _category = match reader.read_u8().await {
            Ok(category) => category,
            Err(_) => return Ok(()),
        };
        let kind = reader.read_u8().await?;
        *state.lock().unwrap().requests.entry(kind).or_insert(0) += 1;

        match kind {
            TYPE_UPDATE_REQ => {
                let op_flag = reader.read_u8().await?;
                let cache_id = reader.read_u64().await?;
                let _group_id = reader.read_u32().await?;
                let flags = reader.read_u32().await?;
                let expiration = reader.read_u32().await?;
                let _watch_id = reader.read_u32().await?;
                let key_len = reader.read_u16().await? as usize;
                let data_len = reader.read_u32().await? as usize;
                let mut key = vec![0u8; key_len];
                reader.read_exact(&mut key).await?;
                let mut data = vec![0u8; data_len];
                reader.read_exact(&mut data).await?;

                let result = state
                    .lock()
                    .unwrap()
                    .apply_update(op_flag, cache_id, flags, expiration, key, data);
                match result {
                    Ok(new_cache_id) => {
                        let mut frame = vec![CATEGORY_CACHE, TYPE_UPDATE_RES];
                        frame.extend_from_slice(&new_cache_id.to_be_bytes());
                        writer.write_all(&frame).await?;
                    }
                    Err(reason) => write_error(&mut writer, reason).await?,
                }
            }
            TYPE_DELETE_REQ => {
                let _op_flag = reader.read_u8().await?;
                let cache_id = reader.read_u64().await?;
                let _group_id = reader.read_u32().await?;
                let key_len = reader.read_u16().await? as usize;
                let mut key = vec![0u8; key_len];
                reader.read_exact(&mut key).await?;

                let result = state.lock().unwrap().apply_delete(cache_id, &key);
                match result {
                    Ok(()) => writer.write_all(&[CATEGORY_CACHE, TYPE_DELETE_RES]).await?,
                    Err(reason) => write_error(&mut writer, reason).await?,
                }
            }
            TYPE_CREATE_WATCH_REQ => {
                let _group_id = reader.read_u32().await?;
                let _interval = reader.read_u32().await?;
                let watch_id = {
                    let mut state = state.lock().unwrap();
                    if state.refuse_watch {
                        None
                    } else {
                        state.next_watch_id += 1;
                        let watch_id = state.next_watch_id;
                        state.watches.insert(watch_id, Vec::new());
                        Some(watch_id)
                    }
                };
                match watch_id {
                    Some(watch_id) => {
                        let mut frame = vec![CATEGORY_CACHE, TYPE_CREATE_WATCH_RES];
                        frame.extend_from_slice(&watch_id.to_be_bytes());
                        writer.write_all(&frame).await?;
                    }
                    None => write_error(&mut writer, REASON_UNKNOWN_COMMAND).await?,
                }
            }
            TYPE_CHECK_WATCH_REQ => {
                let _group_id = reader.read_u32().await?;
                let watch_id = reader.read_u32().await?;
                let interval = reader.read_u32().await?;
                let _ack = reader.read_u64().await?;

                let deadline = tokio::time::Instant::now() + Duration::from_secs(interval as u64);
                let ids = loop {
                    let polled = {
                        let mut state = state.lock().unwrap();
                        if state.fail_check_watch {
                            Err(REASON_WATCH_NOT_FOUND)
                        } else {
                            match state.watches.get_mut(&watch_id) {
                                None => Err(REASON_WATCH_NOT_FOUND),
                                Some(pending) if !pending.is_empty() => {
                                    let mut ids = std::mem::take(pending);
                                    ids.sort_unstable_by(|a, b| b.cmp(a));
                                    Ok(Some(ids))
                                }
                                Some(_) => Ok(None),
                            }
                        }
                    };
                    match polled {
                        Ok(Some(ids)) => break Ok(ids),
                        Ok(None) if tokio::time::Instant::now() >= deadline => break Ok(Vec::new()),
                        Ok(None) => tokio::time::sleep(Duration::from_millis(5)).await,
                        Err(reason) => break Err(reason),
                    }
                };

                match ids {
                    Ok(ids) => {
                        let mut frame = vec![CATEGORY_CACHE, TYPE_CHECK_WATCH_RES];
                        frame.extend_from_slice(&(ids.len() as u32).to_be_bytes());
                        for id in ids {
                            frame.extend_from_slice(&id.to_be_bytes());
                        }
                        writer.write_all(&frame).await?;
                    }
                    Err(reason) => write_error(&mut writer, reason).await?,
                }
            }
            _ => {
                write_error(&mut writer, REASON_UNKNOWN_COMMAND).await?;
                return Ok(());
            }
        }
    }
}

/// 接受连接、读取请求但从不回复的服务器
pub struct BlackHoleServer {
    addr: String,
    handle: JoinHandle<()>,
}

impl BlackHoleServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
            }
        });
        Self { addr, handle }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }
}

impl Drop for BlackHoleServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// 读到第一批字节后立即关闭连接的服务器
pub struct ClosingServer {
    addr: String,
    handle: JoinHandle<()>,
}

impl ClosingServer {
    pub async fn start() -> Self {
        Self::start_after(Duration::ZERO).await
    }

    /// 读到请求后等待 `delay` 再关闭连接
    pub async fn start_after(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    let _ = stream.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    drop(stream);
                });
            }
        });
        Self { addr, handle }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }
}

impl Drop for ClosingServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// 按脚本返回结果的失效订阅客户端
///
/// 脚本用完后createWatch返回固定的watchID，checkWatch返回空列表
#[derive(Default)]
pub struct ScriptedWatchClient {
    creates: Mutex<VecDeque<std::result::Result<u32, String>>>,
    checks: Mutex<VecDeque<std::result::Result<Vec<u64>, String>>>,
    check_calls: Mutex<Vec<(u32, u64)>>,
    create_calls: AtomicUsize,
}

impl ScriptedWatchClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_create(&self, result: std::result::Result<u32, String>) {
        self.creates.lock().unwrap().push_back(result);
    }

    pub fn push_check(&self, result: std::result::Result<Vec<u64>, String>) {
        self.checks.lock().unwrap().push_back(result);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// 每次checkWatch收到的(watchID, ackCacheID)
    pub fn check_calls(&self) -> Vec<(u32, u64)> {
        self.check_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WatchClient for ScriptedWatchClient {
    async fn create_watch(&self, _host: &str, _max_next_check_interval: u32) -> Result<u32> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        match self.creates.lock().unwrap().pop_front() {
            Some(Ok(watch_id)) => Ok(watch_id),
            Some(Err(e)) => Err(CacheError::Transport(e)),
            None => Ok(1),
        }
    }

    async fn check_watch(
        &self,
        _host: &str,
        watch_id: u32,
        _max_next_check_interval: u32,
        ack_cache_id: u64,
    ) -> Result<Vec<u64>> {
        self.check_calls
            .lock()
            .unwrap()
            .push((watch_id, ack_cache_id));
        let scripted = self.checks.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(ids)) => Ok(ids),
            Some(Err(e)) => Err(CacheError::Transport(e)),
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// 等待条件成立，超时返回false
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
