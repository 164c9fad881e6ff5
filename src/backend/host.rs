//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了键到服务器的路由。

use murmur3::murmur3_32;

const HASH_SEED: u32 = 0x9747_b28c;

/// 主机解析器
///
/// 根据键决定请求发往哪台服务器
pub trait HostResolver: Send + Sync {
    /// 解析键所属的主机，无法解析时返回None
    fn resolve_host(&self, key: &str) -> Option<String>;

    /// 所有已知主机
    fn hosts(&self) -> Vec<String>;
}

/// 基于murmur3哈希取模的主机解析器
#[derive(Clone, Debug)]
pub struct HashHostResolver {
    servers: Vec<String>,
}

impl HashHostResolver {
    pub fn new(servers: Vec<String>) -> Self {
        Self { servers }
    }
}

impl HostResolver for HashHostResolver {
    fn resolve_host(&self, key: &str) -> Option<String> {
        match self.servers.len() {
            0 => None,
            1 => Some(self.servers[0].clone()),
            len => {
                let mut bytes = key.as_bytes();
                let hash = murmur3_32(&mut bytes, HASH_SEED).ok()?;
                Some(self.servers[hash as usize % len].clone())
            }
        }
    }

    fn hosts(&self) -> Vec<String> {
        self.servers.clone()
    }
}
