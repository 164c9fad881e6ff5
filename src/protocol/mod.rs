//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了与缓存服务器通信的二进制协议：常量、请求记录编码和响应解码。
//! 所有多字节整数均为大端序。

pub mod decoder;

pub use decoder::{DecodeState, ResponseDecoder, ResponseOutcome};

/// 缓存类请求/响应的分类标记
pub const CATEGORY_CACHE: u8 = 1;

pub const TYPE_ERROR_RES: u8 = 0xFF;
pub const TYPE_UPDATE_REQ: u8 = 20;
pub const TYPE_UPDATE_RES: u8 = 21;
pub const TYPE_DELETE_REQ: u8 = 30;
pub const TYPE_DELETE_RES: u8 = 31;
pub const TYPE_CREATE_WATCH_REQ: u8 = 50;
pub const TYPE_CREATE_WATCH_RES: u8 = 51;
pub const TYPE_CHECK_WATCH_REQ: u8 = 52;
pub const TYPE_CHECK_WATCH_RES: u8 = 53;

/// opFlag中的“需要回复”位
pub const UPDATE_REPLY: u8 = 0x80;

/// 表示“未注册watch”的watchID
pub const NO_WATCH: u32 = 0;

/// 线上表示“永不过期”的expiration
pub const EXPIRATION_NEVER: u32 = u32::MAX;

pub const REASON_UNKNOWN_COMMAND: u16 = 1;
pub const REASON_NOT_FOUND: u16 = 2;
pub const REASON_EXISTS: u16 = 3;
pub const REASON_MISMATCH: u16 = 4;
pub const REASON_TOO_LARGE: u16 = 5;
pub const REASON_WATCH_NOT_FOUND: u16 = 6;

/// 响应头长度
pub const HEADER_LENGTH: usize = 2;
/// 更新请求固定头长度（不含键和值）
pub const UPDATE_HEADER_LENGTH: usize = 33;
/// 删除请求固定头长度（不含键）
pub const DELETE_HEADER_LENGTH: usize = 17;
/// 更新成功响应体长度（新的cache_id）
pub const UPDATE_BODY_LENGTH: usize = 8;
/// 错误响应体长度（原因码）
pub const ERROR_BODY_LENGTH: usize = 2;

/// 更新子操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateSubOp {
    Add = 1,
    Set = 2,
    Replace = 3,
    Append = 4,
    Prepend = 5,
    Touch = 6,
}

impl UpdateSubOp {
    /// 合并“需要回复”位后的opFlag
    pub fn op_flag(self) -> u8 {
        self as u8 | UPDATE_REPLY
    }

    pub fn from_op_flag(flag: u8) -> Option<Self> {
        match flag & !UPDATE_REPLY {
            1 => Some(UpdateSubOp::Add),
            2 => Some(UpdateSubOp::Set),
            3 => Some(UpdateSubOp::Replace),
            4 => Some(UpdateSubOp::Append),
            5 => Some(UpdateSubOp::Prepend),
            6 => Some(UpdateSubOp::Touch),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpdateSubOp::Add => "add",
            UpdateSubOp::Set => "set",
            UpdateSubOp::Replace => "replace",
            UpdateSubOp::Append => "append",
            UpdateSubOp::Prepend => "prepend",
            UpdateSubOp::Touch => "touch",
        }
    }
}

/// 相对过期时间转换为线上格式，超出32位的值截断为最大值
pub fn wire_expiration(expiration: Option<u64>) -> u32 {
    match expiration {
        Some(secs) => secs.min(EXPIRATION_NEVER as u64) as u32,
        None => EXPIRATION_NEVER,
    }
}

/// 更新请求记录的字段
pub struct UpdateRecord<'a> {
    pub op_flag: u8,
    pub cache_id: u64,
    pub group_id: u32,
    pub flags: u32,
    pub expiration: u32,
    pub key: &'a [u8],
    pub data: &'a [u8],
}

impl UpdateRecord<'_> {
    pub fn encoded_len(&self) -> usize {
        UPDATE_HEADER_LENGTH + self.key.len() + self.data.len()
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.push(CATEGORY_CACHE);
        out.push(TYPE_UPDATE_REQ);
        out.push(self.op_flag);
        out.extend_from_slice(&self.cache_id.to_be_bytes());
        out.extend_from_slice(&self.group_id.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&NO_WATCH.to_be_bytes());
        out.extend_from_slice(&(self.key.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(self.key);
        out.extend_from_slice(self.data);
    }
}

/// 删除请求记录
pub fn encode_delete(cache_id: u64, group_id: u32, key: &[u8], out: &mut Vec<u8>) {
    out.reserve(DELETE_HEADER_LENGTH + key.len());
    out.push(CATEGORY_CACHE);
    out.push(TYPE_DELETE_REQ);
    out.push(UPDATE_REPLY);
    out.extend_from_slice(&cache_id.to_be_bytes());
    out.extend_from_slice(&group_id.to_be_bytes());
    out.extend_from_slice(&(key.len() as u16).to_be_bytes());
    out.extend_from_slice(key);
}

/// createWatch请求
pub fn encode_create_watch(group_id: u32, max_next_check_interval: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    out.push(CATEGORY_CACHE);
    out.push(TYPE_CREATE_WATCH_REQ);
    out.extend_from_slice(&group_id.to_be_bytes());
    out.extend_from_slice(&max_next_check_interval.to_be_bytes());
    out
}

/// checkWatch请求
pub fn encode_check_watch(
    group_id: u32,
    watch_id: u32,
    max_next_check_interval: u32,
    ack_cache_id: u64,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(22);
    out.push(CATEGORY_CACHE);
    out.push(TYPE_CHECK_WATCH_REQ);
    out.extend_from_slice(&group_id.to_be_bytes());
    out.extend_from_slice(&watch_id.to_be_bytes());
    out.extend_from_slice(&max_next_check_interval.to_be_bytes());
    out.extend_from_slice(&ack_cache_id.to_be_bytes());
    out
}
