//! 记录分帧与缓冲池。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 从字节流中切出完整 TLS 记录：先读 5 字节头部，再按头部声明的长度读取负载；
//! - 解密后的明文可能多于调用方缓冲区，需要一个残留缓冲区把多余部分留给下一次读取；
//! - 残留缓冲区在读空后归还到共享缓冲池，避免每次读取都重新分配。
//!
//! ## 契约（What）
//! - [`RECORD_HEADER_SIZE`] 为 5，负载长度位于头部第 3、4 字节（大端）；
//! - 声明长度超过 [`MAX_RECORD_PAYLOAD`] 或内容类型非法时返回协议错误，不会尝试读取负载；
//! - [`DecryptedResidue`] 任意时刻满足“未读字节数 ≤ 缓冲区长度”，读空即归还缓冲。

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use crate::error::TlsSessionError;

/// 记录头部长度。
pub const RECORD_HEADER_SIZE: usize = 5;

/// 单条记录允许的最大负载：2^14 明文加上 2048 字节扩展余量。
pub const MAX_RECORD_PAYLOAD: usize = 16 * 1024 + 2048;

/// 记录内容类型。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
    Heartbeat = 24,
}

impl ContentType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            20 => Some(Self::ChangeCipherSpec),
            21 => Some(Self::Alert),
            22 => Some(Self::Handshake),
            23 => Some(Self::ApplicationData),
            24 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// 解析后的记录头部。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: [u8; 2],
    pub payload_len: usize,
}

impl RecordHeader {
    /// 解析 5 字节头部并检查负载上限。
    pub fn parse(header: &[u8; RECORD_HEADER_SIZE]) -> Result<Self, TlsSessionError> {
        let content_type = ContentType::from_u8(header[0]).ok_or_else(|| {
            TlsSessionError::protocol(
                "invalid_record",
                format!("未知的记录内容类型 {}", header[0]),
            )
        })?;
        let payload_len = usize::from(u16::from_be_bytes([header[3], header[4]]));
        if payload_len > MAX_RECORD_PAYLOAD {
            return Err(TlsSessionError::protocol(
                "record_overflow",
                format!("记录声明长度 {payload_len} 超过上限 {MAX_RECORD_PAYLOAD}"),
            ));
        }
        Ok(Self {
            content_type,
            version: [header[1], header[2]],
            payload_len,
        })
    }

    /// 整条记录（头部加负载）的长度。
    pub fn frame_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload_len
    }
}

/// 共享的记录缓冲池。
///
/// # 契约（What）
/// - `rent` 总是返回一个空缓冲，容量至少为 `buffer_capacity`；
/// - `give_back` 清空后放回，池中缓冲数量超过 `max_pooled` 时直接丢弃。
#[derive(Debug)]
pub struct RecordBufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    buffer_capacity: usize,
    max_pooled: usize,
}

impl RecordBufferPool {
    pub fn new(buffer_capacity: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            buffer_capacity,
            max_pooled,
        }
    }

    pub fn shared(buffer_capacity: usize, max_pooled: usize) -> Arc<Self> {
        Arc::new(Self::new(buffer_capacity, max_pooled))
    }

    pub fn rent(&self) -> BytesMut {
        match self.buffers.lock().pop() {
            Some(buffer) => buffer,
            None => BytesMut::with_capacity(self.buffer_capacity),
        }
    }

    pub fn give_back(&self, mut buffer: BytesMut) {
        buffer.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buffer);
        }
    }

    /// 当前池中空闲缓冲数量。
    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }
}

impl Default for RecordBufferPool {
    fn default() -> Self {
        Self::new(RECORD_HEADER_SIZE + MAX_RECORD_PAYLOAD, 64)
    }
}

/// 已解密但尚未交付给调用方的明文。
#[derive(Debug, Default)]
pub struct DecryptedResidue {
    buffer: Option<BytesMut>,
}

impl DecryptedResidue {
    /// 未读字节数。
    pub fn remaining(&self) -> usize {
        self.buffer.as_ref().map_or(0, BytesMut::len)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// 取得可写入解密明文的缓冲区，必要时从池中租借。
    pub fn buffer_mut(&mut self, pool: &RecordBufferPool) -> &mut BytesMut {
        self.buffer.get_or_insert_with(|| pool.rent())
    }

    /// 把尽可能多的明文复制到 `dst`，读空后归还缓冲。
    pub fn copy_to(&mut self, dst: &mut [u8], pool: &RecordBufferPool) -> usize {
        let Some(buffer) = self.buffer.as_mut() else {
            return 0;
        };
        let n = dst.len().min(buffer.len());
        dst[..n].copy_from_slice(&buffer[..n]);
        buffer.advance(n);
        if buffer.is_empty() {
            self.release(pool);
        }
        n
    }

    /// 归还缓冲（若有），丢弃未读数据。
    pub fn release(&mut self, pool: &RecordBufferPool) {
        if let Some(buffer) = self.buffer.take() {
            pool.give_back(buffer);
        }
    }
}
