//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为发布代理的每一层（传输工厂、连接池、发布端点）提供同一套错误语言，
//!   避免各层各自定义字符串错误导致重试决策分散；
//! - 每个变体附带稳定错误码，运维脚本与日志检索无需解析自然语言文案。
//!
//! ## 分类约定（What）
//! - `UnsupportedProtocol` / `PoolClosed` / `Encode` / `InvalidConfiguration` / `InvalidReceiverUrl`：
//!   对当前调用是致命的，不进入失败恢复流程；
//! - `TransportSetup` / `PoolExhausted` / `PublishIo`：意味着“本批事件未到达接收端”，
//!   由发布端点转换为失败记录交给恢复协调器；
//! - `TransportInit`：只在工厂构造阶段出现，非严格模式下被本地吸收并回退到默认信任根。

use std::{io, time::Duration};

use thiserror::Error;

use crate::address::ReceiverAddress;

/// 发布代理的统一错误类型。
#[derive(Debug, Error)]
pub enum DataBridgeError {
    /// 调用方请求了工厂未实现的传输协议。
    #[error("unsupported protocol `{protocol}`, only `{supported}` is supported")]
    UnsupportedProtocol {
        protocol: String,
        supported: &'static str,
    },

    /// 信任库 / 证书 / 算法链路初始化失败。
    #[error("failed to initialise TLS trust context: {reason}")]
    TransportInit {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// 建连、握手或套接字选项设置失败。
    #[error("failed to open transport to {address}: {source}")]
    TransportSetup {
        address: ReceiverAddress,
        #[source]
        source: io::Error,
    },

    /// 在有界等待内既无空闲连接也无剩余容量。
    #[error("connection pool for {address} exhausted ({max} connections) after waiting {waited:?}")]
    PoolExhausted {
        address: ReceiverAddress,
        max: usize,
        waited: Duration,
    },

    /// 连接池已关闭。
    #[error("connection pool for {address} is closed")]
    PoolClosed { address: ReceiverAddress },

    /// 已建立连接上的写入失败。
    #[error("failed to publish to {address}: {source}")]
    PublishIo {
        address: ReceiverAddress,
        #[source]
        source: io::Error,
    },

    /// 批次序列化失败。
    #[error("failed to encode event batch: {reason}")]
    Encode { reason: String },

    /// 传输配置不合法。
    #[error("invalid agent configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// 接收端 URL 无法解析。
    #[error("invalid receiver url `{url}`: {reason}")]
    InvalidReceiverUrl { url: String, reason: String },
}

impl DataBridgeError {
    /// 稳定错误码，格式为 `spark.databridge.<域>.<原因>`。
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedProtocol { .. } => "spark.databridge.transport.unsupported_protocol",
            Self::TransportInit { .. } => "spark.databridge.transport.init_failed",
            Self::TransportSetup { .. } => "spark.databridge.transport.setup_failed",
            Self::PoolExhausted { .. } => "spark.databridge.pool.exhausted",
            Self::PoolClosed { .. } => "spark.databridge.pool.closed",
            Self::PublishIo { .. } => "spark.databridge.publish.io_failed",
            Self::Encode { .. } => "spark.databridge.codec.encode_failed",
            Self::InvalidConfiguration { .. } => "spark.databridge.config.invalid",
            Self::InvalidReceiverUrl { .. } => "spark.databridge.config.invalid_receiver_url",
        }
    }

    /// 该错误是否表示一次可通过重发恢复的投递失败。
    ///
    /// - 返回 `true` 的错误会被发布端点交给失败恢复协调器；
    /// - 其余错误直接随失败记录返回调用方。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportSetup { .. } | Self::PoolExhausted { .. } | Self::PublishIo { .. }
        )
    }

    /// 若错误与某个接收端相关，返回该地址。
    pub fn receiver(&self) -> Option<&ReceiverAddress> {
        match self {
            Self::TransportSetup { address, .. }
            | Self::PoolExhausted { address, .. }
            | Self::PoolClosed { address }
            | Self::PublishIo { address, .. } => Some(address),
            _ => None,
        }
    }
}

/// crate 内统一的 `Result` 别名。
pub type Result<T, E = DataBridgeError> = core::result::Result<T, E>;
