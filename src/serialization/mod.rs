//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了键值编解码机制：线上传输用的 TransCoder，以及类型化值的序列化器。

pub mod json;
pub mod transcoder;

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

pub use json::JsonSerializer;
pub use transcoder::{DefaultTransCoder, FLAG_COMPRESSED};

/// 序列化器特征
///
/// 定义序列化和反序列化操作的接口
pub trait Serializer: Send + Sync {
    /// 序列化值为字节数组
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// 从字节数组反序列化值
    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;
}

/// 键值编码器
///
/// 负责把键和值转换成线上字节，值附带编解码标志
pub trait TransCoder: Send + Sync {
    /// 编码键
    fn encode_key(&self, key: &str) -> Result<Vec<u8>>;

    /// 编码值，返回线上字节和标志
    fn encode_value(&self, value: &[u8]) -> Result<(Vec<u8>, u32)>;

    /// 按标志解码值
    fn decode_value(&self, data: &[u8], flags: u32) -> Result<Vec<u8>>;
}
