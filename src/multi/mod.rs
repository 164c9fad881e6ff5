//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了多主机批量更新/删除：请求条目、单连接状态和多路复用引擎。

mod connection;
mod engine;

pub use engine::MultiUpdate;

use crate::error::{CacheError, Result};
use crate::protocol::{
    encode_delete, wire_expiration, ResponseDecoder, ResponseOutcome, UpdateRecord,
};
use crate::serialization::TransCoder;

/// 批量更新条目
///
/// 调用方持有；引擎在调用返回前把结果写回 `new_cache_id` 或 `reason`。
#[derive(Debug, Clone, Default)]
pub struct MultiUpdateItem {
    pub key: String,
    pub value: Vec<u8>,
    /// 请求依赖的版本号，0表示无条件写入
    pub cache_id: u64,
    /// 相对过期时间（秒），None表示永不过期
    pub expiration: Option<u64>,
    /// 成功后服务器分配的新版本号
    pub new_cache_id: u64,
    /// 失败时服务器返回的原因码
    pub reason: Option<u16>,
}

impl MultiUpdateItem {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_id(mut self, cache_id: u64) -> Self {
        self.cache_id = cache_id;
        self
    }

    pub fn with_expiration(mut self, expiration: Option<u64>) -> Self {
        self.expiration = expiration;
        self
    }

    /// 是否已成功
    pub fn is_success(&self) -> bool {
        self.reason.is_none() && self.new_cache_id != 0
    }
}

/// 批量删除条目
#[derive(Debug, Clone, Default)]
pub struct MultiDeleteItem {
    pub key: String,
    /// 请求依赖的版本号，0表示无条件删除
    pub cache_id: u64,
    /// 是否删除成功
    pub deleted: bool,
    /// 失败时服务器返回的原因码
    pub reason: Option<u16>,
}

impl MultiDeleteItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_id(mut self, cache_id: u64) -> Self {
        self.cache_id = cache_id;
        self
    }
}

/// 编码请求记录时的调用级参数
pub(crate) struct EncodeContext<'a> {
    pub codec: &'a dyn TransCoder,
    pub group_id: u32,
    pub op_flag: u8,
}

/// 可以批量发送的请求条目
pub(crate) trait BatchRecord: Sync {
    fn key(&self) -> &str;

    /// 编码一条完整的请求记录，追加到 `out`
    fn encode(&self, ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<()>;

    /// 与该请求类型匹配的响应解码器
    fn decoder(expected: usize) -> ResponseDecoder;

    fn clear_outcome(&mut self);

    fn apply(&mut self, outcome: ResponseOutcome);
}

fn check_key_len(key: &[u8]) -> Result<()> {
    if key.len() > u16::MAX as usize {
        return Err(CacheError::Validation(format!(
            "encoded key length {} exceeds {}",
            key.len(),
            u16::MAX
        )));
    }
    Ok(())
}

impl BatchRecord for MultiUpdateItem {
    fn key(&self) -> &str {
        &self.key
    }

    fn encode(&self, ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<()> {
        let key = ctx.codec.encode_key(&self.key)?;
        check_key_len(&key)?;
        let (data, flags) = ctx.codec.encode_value(&self.value)?;
        if data.len() > u32::MAX as usize {
            return Err(CacheError::Validation(format!(
                "value of key {} is too large: {} bytes",
                self.key,
                data.len()
            )));
        }

        UpdateRecord {
            op_flag: ctx.op_flag,
            cache_id: self.cache_id,
            group_id: ctx.group_id,
            flags,
            expiration: wire_expiration(self.expiration),
            key: &key,
            data: &data,
        }
        .encode(out);
        Ok(())
    }

    fn decoder(expected: usize) -> ResponseDecoder {
        ResponseDecoder::for_update(expected)
    }

    fn clear_outcome(&mut self) {
        self.new_cache_id = 0;
        self.reason = None;
    }

    fn apply(&mut self, outcome: ResponseOutcome) {
        match outcome {
            ResponseOutcome::Success(cache_id) => self.new_cache_id = cache_id,
            ResponseOutcome::Rejected(reason) => self.reason = Some(reason),
        }
    }
}

impl BatchRecord for MultiDeleteItem {
    fn key(&self) -> &str {
        &self.key
    }

    fn encode(&self, ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<()> {
        let key = ctx.codec.encode_key(&self.key)?;
        check_key_len(&key)?;
        encode_delete(self.cache_id, ctx.group_id, &key, out);
        Ok(())
    }

    fn decoder(expected: usize) -> ResponseDecoder {
        ResponseDecoder::for_delete(expected)
    }

    fn clear_outcome(&mut self) {
        self.deleted = false;
        self.reason = None;
    }

    fn apply(&mut self, outcome: ResponseOutcome) {
        match outcome {
            ResponseOutcome::Success(_) => self.deleted = true,
            ResponseOutcome::Rejected(reason) => self.reason = Some(reason),
        }
    }
}
