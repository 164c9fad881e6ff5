//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了本地缓存的后台同步机制，包括失效订阅和续期批处理。

pub mod invalidation;
pub mod touch;
pub mod watch_client;

pub use invalidation::{LocalCacheWatch, PollOutcome};
pub use touch::TouchBatcher;
pub use watch_client::{TcpWatchClient, WatchClient};
