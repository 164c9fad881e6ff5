//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了批量请求响应流的解码状态机。

use super::{
    CATEGORY_CACHE, ERROR_BODY_LENGTH, HEADER_LENGTH, TYPE_DELETE_RES, TYPE_ERROR_RES,
    TYPE_UPDATE_RES, UPDATE_BODY_LENGTH,
};
use tracing::warn;

/// 解码状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// 读取2字节响应头
    ReadHeader,
    /// 读取成功响应体（新的cache_id）
    ReadFixedBody,
    /// 读取2字节错误原因码
    ReadErrorBody,
    /// 所有条目的响应都已读取
    Done,
}

/// 单个条目的响应结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// 成功，附带新的cache_id（删除响应为0）
    Success(u64),
    /// 服务端拒绝，附带原因码
    Rejected(u16),
}

impl ResponseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ResponseOutcome::Success(_))
    }
}

/// 响应解码器
///
/// 每个连接一个实例。字节可以任意切分后多次喂入，
/// 未读完的帧保存在内部缓冲区中，下次读取时继续。
/// 响应按请求发送顺序到达，第N个结果对应第N个条目。
#[derive(Debug)]
pub struct ResponseDecoder {
    state: DecodeState,
    scratch: [u8; UPDATE_BODY_LENGTH],
    filled: usize,
    success_type: u8,
    success_body_len: usize,
    expected: usize,
    outcomes: Vec<ResponseOutcome>,
    successes: usize,
}

impl ResponseDecoder {
    fn new(success_type: u8, success_body_len: usize, expected: usize) -> Self {
        Self {
            state: if expected == 0 {
                DecodeState::Done
            } else {
                DecodeState::ReadHeader
            },
            scratch: [0; UPDATE_BODY_LENGTH],
            filled: 0,
            success_type,
            success_body_len,
            expected,
            outcomes: Vec::with_capacity(expected),
            successes: 0,
        }
    }

    /// 更新响应解码器，成功响应带8字节新cache_id
    pub fn for_update(expected: usize) -> Self {
        Self::new(TYPE_UPDATE_RES, UPDATE_BODY_LENGTH, expected)
    }

    /// 删除响应解码器，成功响应没有响应体
    pub fn for_delete(expected: usize) -> Self {
        Self::new(TYPE_DELETE_RES, 0, expected)
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    /// 已解码的条目数
    pub fn decoded(&self) -> usize {
        self.outcomes.len()
    }

    /// 已解码的成功条目数
    pub fn successes(&self) -> usize {
        self.successes
    }

    pub fn outcomes(&self) -> &[ResponseOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<ResponseOutcome> {
        self.outcomes
    }

    fn frame_len(&self) -> usize {
        match self.state {
            DecodeState::ReadHeader => HEADER_LENGTH,
            DecodeState::ReadFixedBody => self.success_body_len,
            DecodeState::ReadErrorBody => ERROR_BODY_LENGTH,
            DecodeState::Done => 0,
        }
    }

    /// 喂入读到的字节
    ///
    /// # 返回值
    ///
    /// 返回消耗的字节数；解码完成后多余的字节不会被消耗
    pub fn feed(&mut self, mut input: &[u8]) -> usize {
        let mut consumed = 0;
        while self.state != DecodeState::Done && !input.is_empty() {
            let want = self.frame_len();
            let take = (want - self.filled).min(input.len());
            self.scratch[self.filled..self.filled + take].copy_from_slice(&input[..take]);
            self.filled += take;
            input = &input[take..];
            consumed += take;

            if self.filled == want {
                self.complete_frame();
            }
        }
        consumed
    }

    fn complete_frame(&mut self) {
        self.filled = 0;
        match self.state {
            DecodeState::ReadHeader => {
                let (category, kind) = (self.scratch[0], self.scratch[1]);
                if category == CATEGORY_CACHE && kind == self.success_type {
                    if self.success_body_len == 0 {
                        self.record(ResponseOutcome::Success(0));
                    } else {
                        self.state = DecodeState::ReadFixedBody;
                    }
                } else {
                    if category != CATEGORY_CACHE || kind != TYPE_ERROR_RES {
                        warn!(
                            "Unexpected response header category={} type={}, decoding as error",
                            category, kind
                        );
                    }
                    self.state = DecodeState::ReadErrorBody;
                }
            }
            DecodeState::ReadFixedBody => {
                let cache_id = u64::from_be_bytes(self.scratch);
                self.record(ResponseOutcome::Success(cache_id));
            }
            DecodeState::ReadErrorBody => {
                let reason = u16::from_be_bytes([self.scratch[0], self.scratch[1]]);
                self.record(ResponseOutcome::Rejected(reason));
            }
            DecodeState::Done => {}
        }
    }

    fn record(&mut self, outcome: ResponseOutcome) {
        if outcome.is_success() {
            self.successes += 1;
        }
        self.outcomes.push(outcome);
        self.state = if self.outcomes.len() == self.expected {
            DecodeState::Done
        } else {
            DecodeState::ReadHeader
        };
    }
}
