use std::{borrow::Cow, fmt, io};

use async_trait::async_trait;

use crate::{address::ReceiverAddress, error::Result};

/// 一条已建立、已认证的到接收端的传输连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让连接池与发布端点只面向“能写字节、能自检、能关闭”的最小能力编程，
///   TLS 套接字与进程内测试替身在构造时二选一，而不是通过继承层级分派；
/// - 对象安全（`Box<dyn TransportClient>`），连接池因此可以对任意传输变体保持同一份代码。
///
/// ## 契约（What）
/// - `is_connected`：纯本地检查，不得触发网络往返；真实存活性在写入时才暴露；
/// - `write_all` / `flush`：写出整段字节，失败后实现应让 `is_connected` 返回 `false`；
/// - `close`：幂等；第二次调用必须返回 `Ok(())` 且不影响其它连接。
///
/// ## 风险与权衡（Trade-offs）
/// - 写操作需要 `&mut self`，同一连接在同一时刻只可能被一个借用方持有，
///   这由连接池的借出语义在类型层面保证。
#[async_trait]
pub trait TransportClient: Send + Sync + fmt::Debug {
    /// 日志与测试使用的连接标识。
    fn id(&self) -> Cow<'_, str>;

    /// 连接所属的接收端。
    fn address(&self) -> &ReceiverAddress;

    /// 套接字是否仍处于已连接状态。
    fn is_connected(&self) -> bool;

    /// 写出全部字节。
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// 刷新底层缓冲。
    async fn flush(&mut self) -> io::Result<()>;

    /// 关闭连接。
    async fn close(&mut self) -> io::Result<()>;
}

/// 按传输变体实现的连接工厂能力：`{create, validate, terminate}`。
///
/// # 契约（What）
/// - `create`：为一个接收端建立新连接；协议标识不受支持时返回
///   [`DataBridgeError::UnsupportedProtocol`](crate::DataBridgeError::UnsupportedProtocol)
///   且不得打开任何套接字；
/// - `validate`：廉价的本地检查，默认委托给 [`TransportClient::is_connected`]；
/// - `terminate`：尽力关闭，错误只记录日志，绝不向上传播。
#[async_trait]
pub trait ClientPoolFactory: Send + Sync + fmt::Debug {
    /// 工厂支持的协议标识。
    fn protocol(&self) -> &'static str;

    async fn create(&self, address: &ReceiverAddress) -> Result<Box<dyn TransportClient>>;

    fn validate(&self, client: &dyn TransportClient) -> bool {
        client.is_connected()
    }

    async fn terminate(&self, client: &mut dyn TransportClient) {
        if let Err(err) = client.close().await {
            tracing::warn!(
                client = %client.id(),
                receiver = %client.address(),
                error = %err,
                "cannot close transport client cleanly"
            );
        }
    }
}
