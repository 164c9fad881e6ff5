//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了默认的键值编码器实现。

use super::TransCoder;
use crate::error::{CacheError, Result};

/// 值已被gzip压缩
pub const FLAG_COMPRESSED: u32 = 0x0002;

/// 默认编码器
///
/// 键按UTF-8编码；值原样传输，超过阈值时压缩
#[derive(Clone, Debug, Default)]
pub struct DefaultTransCoder {
    /// 压缩阈值（字节），0表示不压缩
    compress_threshold: usize,
}

impl DefaultTransCoder {
    /// 创建不压缩的编码器
    pub fn new() -> Self {
        Self {
            compress_threshold: 0,
        }
    }

    /// 创建按阈值压缩的编码器
    pub fn with_compress_threshold(threshold: usize) -> Self {
        Self {
            compress_threshold: threshold,
        }
    }

    fn should_compress(&self, len: usize) -> bool {
        self.compress_threshold > 0 && len >= self.compress_threshold
    }
}

impl TransCoder for DefaultTransCoder {
    fn encode_key(&self, key: &str) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(CacheError::Serialization("empty key".to_string()));
        }
        Ok(key.as_bytes().to_vec())
    }

    fn encode_value(&self, value: &[u8]) -> Result<(Vec<u8>, u32)> {
        if self.should_compress(value.len()) {
            #[cfg(feature = "flate2")]
            {
                use flate2::write::GzEncoder;
                use flate2::Compression;
                use std::io::Write;

                let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
                encoder
                    .write_all(value)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                let compressed = encoder
                    .finish()
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                return Ok((compressed, FLAG_COMPRESSED));
            }
        }
        Ok((value.to_vec(), 0))
    }

    fn decode_value(&self, data: &[u8], flags: u32) -> Result<Vec<u8>> {
        if flags & FLAG_COMPRESSED == 0 {
            return Ok(data.to_vec());
        }

        #[cfg(feature = "flate2")]
        {
            use flate2::read::GzDecoder;
            use std::io::Read;

            let mut decoder = GzDecoder::new(data);
            let mut decoded = Vec::new();
            decoder
                .read_to_end(&mut decoded)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            Ok(decoded)
        }

        #[cfg(not(feature = "flate2"))]
        {
            Err(CacheError::Serialization(
                "compressed value received but flate2 feature is disabled".to_string(),
            ))
        }
    }
}
