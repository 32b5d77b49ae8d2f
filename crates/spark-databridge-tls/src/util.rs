use std::{future::Future, io, time::Duration};

use crate::error::{self, OperationKind};

/// 为一次网络操作套上套接字超时。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 建连、握手、写入与关闭都必须受同一个 `socket_timeout_ms` 约束，
///   集中在此处避免每个调用点各写一遍 `tokio::time::timeout`；
/// - 超时被转换为 `io::ErrorKind::TimedOut`，调用方只需处理 `io::Error`。
///
/// ## 契约（What）
/// - `future` 在 `timeout` 内完成时原样返回其结果；
/// - 超时后 `future` 被丢弃，返回的错误文案包含操作名与时长。
pub(crate) async fn run_with_timeout<F, T>(kind: OperationKind, timeout: Duration, future: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(error::timed_out(kind, timeout)),
    }
}
