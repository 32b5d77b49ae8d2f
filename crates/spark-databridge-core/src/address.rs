use std::{fmt, str::FromStr, sync::Arc};

use crate::error::DataBridgeError;

/// TLS 传输唯一支持的协议标识。
pub const SSL_PROTOCOL: &str = "ssl";

/// 一个逻辑接收端的地址：`{protocol, host, port}`。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接池按接收端分片，地址既是分片键也是日志字段，需要廉价克隆与稳定的 `Hash`；
/// - 协议标识保留为字符串而非枚举，使“请求了未实现的协议”能够抵达传输工厂并以
///   [`DataBridgeError::UnsupportedProtocol`] 明确失败，而不是在解析阶段被吞掉。
///
/// ## 契约（What）
/// - 构造后不可变；协议统一存储为小写；
/// - `Display` 输出 `protocol://host:port`，IPv6 主机自动加方括号；
/// - `FromStr` 接受同样的格式。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReceiverAddress {
    protocol: Arc<str>,
    host: Arc<str>,
    port: u16,
}

impl ReceiverAddress {
    /// 直接以三元组构造地址。
    pub fn new(protocol: impl AsRef<str>, host: impl AsRef<str>, port: u16) -> Self {
        Self {
            protocol: Arc::from(protocol.as_ref().trim().to_ascii_lowercase()),
            host: Arc::from(host.as_ref().trim()),
            port,
        }
    }

    /// 以 `ssl` 协议构造地址。
    pub fn ssl(host: impl AsRef<str>, port: u16) -> Self {
        Self::new(SSL_PROTOCOL, host, port)
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` 形式，可直接交给 `TcpStream::connect`。
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ReceiverAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.authority())
    }
}

impl FromStr for ReceiverAddress {
    type Err = DataBridgeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let url = raw.trim();
        let invalid = |reason: &str| DataBridgeError::InvalidReceiverUrl {
            url: url.to_owned(),
            reason: reason.to_owned(),
        };

        let (protocol, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("missing `<protocol>://` prefix"))?;
        if protocol.is_empty() {
            return Err(invalid("empty protocol"));
        }

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port"))?;
            (host, port)
        } else {
            rest.rsplit_once(':')
                .ok_or_else(|| invalid("missing port"))?
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = port
            .trim_end_matches('/')
            .parse::<u16>()
            .map_err(|_| invalid("port is not a number in 0..=65535"))?;

        Ok(Self::new(protocol, host, port))
    }
}

/// 解析以逗号分隔的接收端列表（故障转移组），保持原有顺序。
pub fn parse_receiver_list(raw: &str) -> Result<Vec<ReceiverAddress>, DataBridgeError> {
    let receivers = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ReceiverAddress::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    if receivers.is_empty() {
        return Err(DataBridgeError::InvalidReceiverUrl {
            url: raw.to_owned(),
            reason: "no receiver configured".to_owned(),
        });
    }
    Ok(receivers)
}
