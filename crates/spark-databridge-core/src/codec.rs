//! 批次编码边界。
//!
//! 事件负载的线格式不属于发布代理的职责，代理只依赖 [`BatchEncoder`] 把一批事件
//! 变成一段字节。默认实现 [`JsonFrameEncoder`] 采用“4 字节大端长度 + JSON 数组”
//! 的单帧格式，[`decode_json_frame`] 为接收端（以及测试替身）提供对称的解码。

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    error::{DataBridgeError, Result},
    event::Event,
};

/// 单帧允许的最大负载长度。
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// 把一批事件编码为可直接写入传输连接的字节。
///
/// 实现必须保持批次内事件顺序；同一批次重复编码必须得到相同字节，
/// 以便重发时接收端看到的是完全一致的帧。
pub trait BatchEncoder: Send + Sync + fmt::Debug {
    /// 编码器名称，仅用于日志。
    fn name(&self) -> &'static str;

    /// 将 `events` 追加编码到 `dst` 末尾；失败时 `dst` 保持调用前的长度。
    fn encode(&self, events: &[Event], dst: &mut BytesMut) -> Result<()>;
}

/// 长度前缀 JSON 帧编码器。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFrameEncoder;

impl BatchEncoder for JsonFrameEncoder {
    fn name(&self) -> &'static str {
        "json-frame"
    }

    fn encode(&self, events: &[Event], dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        dst.put_u32(0);
        let written = serde_json::to_writer((&mut *dst).writer(), events);
        if let Err(err) = written {
            dst.truncate(start);
            return Err(DataBridgeError::Encode {
                reason: err.to_string(),
            });
        }

        let body_len = dst.len() - start - LENGTH_PREFIX;
        if body_len > MAX_FRAME_LEN {
            dst.truncate(start);
            return Err(DataBridgeError::Encode {
                reason: format!("frame of {body_len} bytes exceeds limit of {MAX_FRAME_LEN}"),
            });
        }
        let prefix = (body_len as u32).to_be_bytes();
        dst[start..start + LENGTH_PREFIX].copy_from_slice(&prefix);
        Ok(())
    }
}

/// 从缓冲区头部解码一帧。
///
/// - 数据不足一帧时返回 `Ok(None)` 且不消费任何字节；
/// - 成功时消费整帧并返回事件，顺序与编码时一致。
pub fn decode_json_frame(src: &mut BytesMut) -> Result<Option<Vec<Event>>> {
    if src.len() < LENGTH_PREFIX {
        return Ok(None);
    }
    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
    let body_len = u32::from_be_bytes(prefix) as usize;
    if body_len > MAX_FRAME_LEN {
        return Err(DataBridgeError::Encode {
            reason: format!("incoming frame of {body_len} bytes exceeds limit of {MAX_FRAME_LEN}"),
        });
    }
    if src.len() < LENGTH_PREFIX + body_len {
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX);
    let body = src.split_to(body_len);
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|err| DataBridgeError::Encode {
            reason: format!("malformed frame: {err}"),
        })
}
