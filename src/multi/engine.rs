//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了多主机批量更新引擎。

use super::connection::{Connection, Finished};
use super::{BatchRecord, EncodeContext, MultiDeleteItem, MultiUpdateItem};
use crate::backend::{ConnectionProvider, HostResolver};
use crate::config::ClientConfig;
use crate::error::{CacheError, Result};
use crate::metrics::GLOBAL_METRICS;
use crate::protocol::{ResponseOutcome, UpdateSubOp, UPDATE_REPLY};
use crate::serialization::TransCoder;
use crate::utils::validate_key;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

/// 一次批量调用的汇总
#[derive(Default)]
struct DispatchReport {
    outcomes: Vec<(usize, ResponseOutcome)>,
    successes: usize,
    last_rejection: Option<u16>,
    error: Option<CacheError>,
}

/// 多主机批量更新引擎
///
/// 把一批条目按主机分组，每个主机一个连接，在同一个等待集合上并发读写，
/// 直到所有响应到达、出现传输错误或超过 `max_busy_time`。
///
/// 单个实例同一时间只服务一个调用；并发调用需要各自持有实例。
pub struct MultiUpdate {
    resolver: Arc<dyn HostResolver>,
    connections: Arc<dyn ConnectionProvider>,
    codec: Arc<dyn TransCoder>,
    group_id: u32,
    max_busy_time: Duration,
    write_buffer_size: usize,
    last_error: Option<String>,
}

impl MultiUpdate {
    /// 创建新的批量更新引擎
    ///
    /// # 参数
    ///
    /// * `resolver` - 键到主机的映射
    /// * `connections` - 连接提供者
    /// * `codec` - 键值编码器
    /// * `config` - 客户端配置（group_id、超时和写缓冲大小）
    pub fn new(
        resolver: Arc<dyn HostResolver>,
        connections: Arc<dyn ConnectionProvider>,
        codec: Arc<dyn TransCoder>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            resolver,
            connections,
            codec,
            group_id: config.group_id,
            max_busy_time: config.max_busy_time(),
            write_buffer_size: config.socket_write_buffer_size,
            last_error: None,
        }
    }

    /// 最近一次调用的错误描述
    ///
    /// 每次调用开始时清空；调用级失败或最后一个服务端拒绝都会记录在这里
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// 批量更新
    ///
    /// # 返回值
    ///
    /// 返回成功的条目数。每个条目的 `new_cache_id` 或 `reason` 被写回。
    /// 参数校验失败时返回0且不产生任何网络IO。
    #[instrument(skip(self, items), level = "debug", fields(count = items.len(), op = sub_op.as_str()))]
    pub async fn multi_update(&mut self, items: &mut [MultiUpdateItem], sub_op: UpdateSubOp) -> usize {
        self.execute(items, sub_op.op_flag(), sub_op.as_str()).await
    }

    /// 批量删除
    ///
    /// # 返回值
    ///
    /// 返回删除成功的条目数，每个条目的 `deleted` 或 `reason` 被写回
    #[instrument(skip(self, items), level = "debug", fields(count = items.len()))]
    pub async fn multi_delete(&mut self, items: &mut [MultiDeleteItem]) -> usize {
        self.execute(items, UPDATE_REPLY, "delete").await
    }

    async fn execute<R: BatchRecord>(&mut self, items: &mut [R], op_flag: u8, op: &str) -> usize {
        self.last_error = None;
        for item in items.iter_mut() {
            item.clear_outcome();
        }

        let started = std::time::Instant::now();
        let report = self.dispatch(&*items, op_flag, op).await;
        GLOBAL_METRICS.record_duration("multi", op, started.elapsed().as_secs_f64());

        for (index, outcome) in report.outcomes {
            items[index].apply(outcome);
        }

        if let Some(err) = report.error {
            error!("multi {} failed: {}", op, err);
            self.last_error = Some(format!("multi {}: {}", op, err));
        } else if let Some(reason) = report.last_rejection {
            self.last_error = Some(format!("multi {}: response error reason={}", op, reason));
        }
        report.successes
    }

    /// 按主机分组，保持主机首次出现的顺序
    fn partition<R: BatchRecord>(&self, items: &[R]) -> Result<Vec<(String, Vec<usize>)>> {
        if items.is_empty() {
            return Err(CacheError::Validation("item list is empty".to_string()));
        }

        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        for (index, item) in items.iter().enumerate() {
            validate_key(item.key())
                .map_err(|e| CacheError::Validation(format!("item {}: {}", index, e)))?;
            let host = self.resolver.resolve_host(item.key()).ok_or_else(|| {
                CacheError::Validation(format!("can not get host with the key {}", item.key()))
            })?;

            match slots.get(&host) {
                Some(&slot) => groups[slot].1.push(index),
                None => {
                    slots.insert(host.clone(), groups.len());
                    groups.push((host, vec![index]));
                }
            }
        }
        Ok(groups)
    }

    async fn dispatch<R: BatchRecord>(&self, items: &[R], op_flag: u8, op: &str) -> DispatchReport {
        let mut report = DispatchReport::default();
        let groups = match self.partition(items) {
            Ok(groups) => groups,
            Err(e) => {
                report.error = Some(e);
                return report;
            }
        };

        let ctx = EncodeContext {
            codec: self.codec.as_ref(),
            group_id: self.group_id,
            op_flag,
        };

        let mut conns = Vec::with_capacity(groups.len());
        for (host, indexes) in groups {
            match self.connections.acquire(&host).await {
                Ok(stream) => conns.push(Connection::new(
                    host,
                    stream,
                    items,
                    indexes,
                    self.write_buffer_size,
                )),
                Err(e) => {
                    warn!("Failed to acquire connection to {}: {}", host, e);
                    report.error = Some(e);
                    break;
                }
            }
        }

        if report.error.is_none() {
            debug!("Dispatching {} items over {} connections", items.len(), conns.len());
            report.error = self.drive_all(&mut conns, &ctx).await.err();
        }

        for conn in conns {
            self.settle(conn.finish(), op, &mut report);
        }
        report
    }

    /// 在同一个等待集合上推进所有连接
    async fn drive_all<R: BatchRecord>(
        &self,
        conns: &mut [Connection<'_, R>],
        ctx: &EncodeContext<'_>,
    ) -> Result<()> {
        let deadline = Instant::now() + self.max_busy_time;
        let mut waits: FuturesUnordered<_> = conns.iter_mut().map(|conn| conn.drive(ctx)).collect();

        loop {
            match tokio::time::timeout_at(deadline, waits.next()).await {
                Ok(Some(Ok(()))) => {}
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => return Ok(()),
                Err(_) => {
                    return Err(CacheError::Timeout(format!(
                        "timed out with {} connection(s) unfinished after {:?}",
                        waits.len(),
                        self.max_busy_time
                    )))
                }
            }
        }
    }

    /// 收集单个连接的结果并决定软关闭还是硬关闭
    fn settle(&self, finished: Finished, op: &str, report: &mut DispatchReport) {
        let Finished {
            host,
            stream,
            reusable,
            outcomes,
        } = finished;

        for (index, outcome) in outcomes {
            match outcome {
                ResponseOutcome::Success(_) => {
                    report.successes += 1;
                    GLOBAL_METRICS.record_request(&host, op, "success");
                }
                ResponseOutcome::Rejected(reason) => {
                    report.last_rejection = Some(reason);
                    GLOBAL_METRICS.record_request(&host, op, "rejected");
                }
            }
            report.outcomes.push((index, outcome));
        }

        if reusable {
            self.connections.release(&host, stream);
        } else {
            debug!("Closing connection to {} with unfinished responses", host);
            drop(stream);
        }
    }
}
