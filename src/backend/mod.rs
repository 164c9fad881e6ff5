//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存客户端的后端组件：本地存储、主机路由和连接池。

pub mod host;
pub mod item;
pub mod local;
pub mod pool;

pub use host::{HashHostResolver, HostResolver};
pub use item::CacheItem;
pub use local::{CacheCounters, LocalCacheStore};
pub use pool::{ConnectionProvider, TcpConnectionPool};
