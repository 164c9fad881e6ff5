//! nearcache - 带失效订阅的客户端近端缓存
//!
//! 在客户端进程内保存服务器数据的本地副本，通过长轮询订阅服务器的失效通知保持一致，
//! 并提供多主机批量更新和续期批处理。

#![doc(html_root_url = "https://docs.rs/nearcache/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod multi;
pub mod protocol;
pub mod serialization;
pub mod sync;
pub mod utils;

// Re-export commonly used items
pub use backend::{CacheItem, LocalCacheStore};
pub use config::Config;
pub use error::{CacheError, Result};
pub use manager::CacheManager;
pub use multi::{MultiDeleteItem, MultiUpdate, MultiUpdateItem};
pub use protocol::UpdateSubOp;

/// nearcache 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
