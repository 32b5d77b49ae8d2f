use std::{borrow::Cow, io, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use spark_databridge_core::{ReceiverAddress, TransportClient};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tokio_rustls::client::TlsStream;

use crate::{
    error::{self, CLOSE, FLUSH, WRITE},
    suites::{protocol_name, suite_name},
    util::run_with_timeout,
};

/// 已完成握手的 TLS 客户端连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接池借出的最小单元：每个实例独占一条 `TlsStream<TcpStream>`，
///   借用方通过 `&mut self` 写入，无需额外互斥；
/// - 握手元数据（协商的协议版本与密码套件）在构造时快照，便于日志与测试断言。
///
/// ## 逻辑（How）
/// - 流以 `Option` 持有，`close` 通过 `take()` 保证幂等；
/// - 写入 / 刷新 / 关闭均受套接字超时约束；任何写侧失败都会把连接标记为 `broken`，
///   之后 `is_connected` 返回 `false`，连接池归还时据此丢弃该连接。
///
/// ## 契约（What）
/// - `is_connected`：流仍在、未被标记损坏且内核仍能给出对端地址；
/// - `close`：发送 `close_notify` 并关闭写方向，失败只返回错误，状态仍视为已关闭。
#[derive(Debug)]
pub struct TlsClient {
    id: String,
    address: ReceiverAddress,
    stream: Option<TlsStream<TcpStream>>,
    broken: bool,
    io_timeout: Duration,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    negotiated_protocol: Option<String>,
    negotiated_cipher_suite: Option<String>,
    enabled_cipher_suites: Vec<String>,
    supported_cipher_suites: Vec<String>,
}

impl TlsClient {
    pub(crate) fn new(
        address: ReceiverAddress,
        stream: TlsStream<TcpStream>,
        io_timeout: Duration,
        enabled_cipher_suites: Vec<String>,
        supported_cipher_suites: Vec<String>,
    ) -> Self {
        let (tcp, connection) = stream.get_ref();
        let local_addr = tcp.local_addr().ok();
        let peer_addr = tcp.peer_addr().ok();
        let negotiated_protocol = connection.protocol_version().map(protocol_name);
        let negotiated_cipher_suite = connection.negotiated_cipher_suite().map(suite_name);
        let id = match local_addr {
            Some(local) => format!("tls:{local}->{address}"),
            None => format!("tls:?->{address}"),
        };

        Self {
            id,
            address,
            stream: Some(stream),
            broken: false,
            io_timeout,
            local_addr,
            peer_addr,
            negotiated_protocol,
            negotiated_cipher_suite,
            enabled_cipher_suites,
            supported_cipher_suites,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// 握手协商出的协议版本，如 `TLSv1.3`。
    pub fn negotiated_protocol(&self) -> Option<&str> {
        self.negotiated_protocol.as_deref()
    }

    /// 握手协商出的密码套件（IANA 拼写）。
    pub fn negotiated_cipher_suite(&self) -> Option<&str> {
        self.negotiated_cipher_suite.as_deref()
    }

    pub fn enabled_cipher_suites(&self) -> &[String] {
        &self.enabled_cipher_suites
    }

    pub fn supported_cipher_suites(&self) -> &[String] {
        &self.supported_cipher_suites
    }

    fn stream_mut(&mut self, kind: error::OperationKind) -> io::Result<&mut TlsStream<TcpStream>> {
        if self.broken {
            return Err(error::not_connected(kind));
        }
        self.stream.as_mut().ok_or_else(|| error::not_connected(kind))
    }

    fn mark_broken(&mut self, kind: error::OperationKind, err: &io::Error) {
        self.broken = true;
        tracing::debug!(
            code = kind.code,
            client = %self.id,
            error = %err,
            "tls connection marked broken"
        );
    }
}

#[async_trait]
impl TransportClient for TlsClient {
    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }

    fn address(&self) -> &ReceiverAddress {
        &self.address
    }

    fn is_connected(&self) -> bool {
        match &self.stream {
            Some(stream) if !self.broken => stream.get_ref().0.peer_addr().is_ok(),
            _ => false,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let timeout = self.io_timeout;
        let stream = self.stream_mut(WRITE)?;
        let result = run_with_timeout(WRITE, timeout, stream.write_all(buf)).await;
        if let Err(err) = &result {
            self.mark_broken(WRITE, err);
        }
        result
    }

    async fn flush(&mut self) -> io::Result<()> {
        let timeout = self.io_timeout;
        let stream = self.stream_mut(FLUSH)?;
        let result = run_with_timeout(FLUSH, timeout, stream.flush()).await;
        if let Err(err) = &result {
            self.mark_broken(FLUSH, err);
        }
        result
    }

    async fn close(&mut self) -> io::Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        self.broken = true;
        run_with_timeout(CLOSE, self.io_timeout, stream.shutdown()).await
    }
}
