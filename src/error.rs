//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存客户端的错误类型和处理机制。

use thiserror::Error;

/// 缓存客户端错误类型枚举
///
/// 按照失败的影响范围划分：参数校验失败和传输失败会中止整个批量调用，
/// 服务端拒绝只影响单个条目。
#[derive(Error, Debug)]
pub enum CacheError {
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 参数校验失败（空批次、非法键、无法解析主机）
    #[error("Validation error: {0}")]
    Validation(String),

    /// 连接读写失败
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 无法识别的响应
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// 服务端拒绝，附带原因码
    #[error("Server rejected request, reason={0}")]
    ServerRejection(u16),

    /// 失效订阅（watch）错误
    #[error("Watch error: {0}")]
    WatchError(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 关闭错误
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl CacheError {
    /// 是否属于调用级别的传输失败
    pub fn is_transport(&self) -> bool {
        matches!(self, CacheError::Transport(_) | CacheError::IoError(_))
    }
}

/// 缓存操作结果类型别名
pub type Result<T> = std::result::Result<T, CacheError>;
