//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了批量请求中单个主机连接的读写状态。

use super::{BatchRecord, EncodeContext};
use crate::error::{CacheError, Result};
use crate::protocol::{ResponseDecoder, ResponseOutcome};
use std::io::ErrorKind;
use tokio::io::Interest;
use tokio::net::TcpStream;

const READ_CHUNK: usize = 4096;

/// 请求写缓冲
///
/// 按顺序把条目编码进固定容量的缓冲区。放不下的记录留到下一轮，
/// 单条超过容量的记录独占一轮。每条记录只编码一次。
struct RequestWriter<'a, R> {
    records: Vec<&'a R>,
    cursor: usize,
    carry: Option<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
    capacity: usize,
    written: usize,
}

impl<'a, R: BatchRecord> RequestWriter<'a, R> {
    fn new(records: Vec<&'a R>, capacity: usize) -> Self {
        Self {
            records,
            cursor: 0,
            carry: None,
            buf: Vec::with_capacity(capacity),
            pos: 0,
            capacity: capacity.max(1),
            written: 0,
        }
    }

    fn has_pending_records(&self) -> bool {
        self.carry.is_some() || self.cursor < self.records.len()
    }

    fn is_finished(&self) -> bool {
        self.pos == self.buf.len() && !self.has_pending_records()
    }

    fn fill(&mut self, ctx: &EncodeContext<'_>) -> Result<()> {
        self.buf.clear();
        self.pos = 0;

        if let Some(carried) = self.carry.take() {
            self.buf = carried;
            if self.buf.len() >= self.capacity {
                return Ok(());
            }
        }

        let mut record = Vec::new();
        while self.cursor < self.records.len() {
            record.clear();
            self.records[self.cursor].encode(ctx, &mut record)?;
            self.cursor += 1;

            if self.buf.is_empty() || self.buf.len() + record.len() <= self.capacity {
                self.buf.extend_from_slice(&record);
                if self.buf.len() >= self.capacity {
                    break;
                }
            } else {
                self.carry = Some(std::mem::take(&mut record));
                break;
            }
        }
        Ok(())
    }

    /// 尽可能多地写出，直到套接字不可写或全部写完
    fn write_to(&mut self, stream: &TcpStream, ctx: &EncodeContext<'_>, host: &str) -> Result<()> {
        loop {
            if self.pos == self.buf.len() {
                if !self.has_pending_records() {
                    return Ok(());
                }
                self.fill(ctx)?;
            }

            match stream.try_write(&self.buf[self.pos..]) {
                Ok(n) => {
                    self.pos += n;
                    self.written += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    return Err(CacheError::Transport(format!(
                        "write to {} failed: {}",
                        host, e
                    )))
                }
            }
        }
    }
}

/// 单个主机的批量连接
pub(crate) struct Connection<'a, R> {
    host: String,
    stream: TcpStream,
    indexes: Vec<usize>,
    writer: RequestWriter<'a, R>,
    decoder: ResponseDecoder,
}

/// 连接结束后的结果
pub(crate) struct Finished {
    pub host: String,
    pub stream: TcpStream,
    /// 协议状态完整，可以归还复用
    pub reusable: bool,
    /// 已解码的结果，按条目下标
    pub outcomes: Vec<(usize, ResponseOutcome)>,
}

impl<'a, R: BatchRecord> Connection<'a, R> {
    pub fn new(
        host: String,
        stream: TcpStream,
        items: &'a [R],
        indexes: Vec<usize>,
        buffer_size: usize,
    ) -> Self {
        let records = indexes.iter().map(|&index| &items[index]).collect();
        Self {
            decoder: R::decoder(indexes.len()),
            writer: RequestWriter::new(records, buffer_size),
            host,
            stream,
            indexes,
        }
    }

    /// 推进读写直到该主机的全部响应到达
    ///
    /// 写完之后只等待可读事件。任何读写失败都作为传输错误返回。
    pub async fn drive(&mut self, ctx: &EncodeContext<'_>) -> Result<()> {
        let Self {
            host,
            stream,
            writer,
            decoder,
            ..
        } = self;
        let mut chunk = vec![0u8; READ_CHUNK];

        while !decoder.is_done() {
            let interest = if writer.is_finished() {
                Interest::READABLE
            } else {
                Interest::READABLE | Interest::WRITABLE
            };
            let ready = stream
                .ready(interest)
                .await
                .map_err(|e| CacheError::Transport(format!("poll {} failed: {}", host, e)))?;

            if ready.is_readable() {
                match stream.try_read(&mut chunk) {
                    Ok(0) => {
                        return Err(CacheError::Transport(format!(
                            "connection to {} closed by peer after {} of {} responses",
                            host,
                            decoder.decoded(),
                            writer.records.len()
                        )))
                    }
                    Ok(n) => {
                        decoder.feed(&chunk[..n]);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => {
                        return Err(CacheError::Transport(format!(
                            "read from {} failed: {}",
                            host, e
                        )))
                    }
                }
            }

            if ready.is_writable() && !writer.is_finished() {
                writer.write_to(stream, ctx, host)?;
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Finished {
        let reusable = self.decoder.is_done() || self.writer.written == 0;
        let outcomes = self
            .indexes
            .into_iter()
            .zip(self.decoder.into_outcomes())
            .collect();
        Finished {
            host: self.host,
            stream: self.stream,
            reusable,
            outcomes,
        }
    }
}
