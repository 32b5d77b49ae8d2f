use std::{fmt, sync::Arc};

use bytes::BytesMut;
use spark_databridge_core::{
    Ack, BatchEncoder, DataBridgeError, Event, FailureRecord, ReceiverAddress, Result,
};

use crate::{pool::ConnectionPool, recovery::FailureCallback};

/// 单次发布尝试的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    Connecting,
    Sending,
    Succeeded,
    Failed,
}

impl PublishState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Sending => "sending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 面向单个接收端的逻辑发布客户端。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“借连接 → 编码 → 写出 → 归还 / 驱逐”封装为一次调用，发布方只看到确认或失败记录；
/// - 端点本身不持有长期连接，两次发布之间所有状态都在连接池中。
///
/// ## 逻辑（How）
/// - `try_publish`：单次尝试，状态机 `IDLE → CONNECTING → SENDING → {SUCCEEDED, FAILED}`；
///   写入失败时驱逐连接并返回 `PublishIo`；
/// - `publish`：在 `try_publish` 之上接入失败恢复协调器。可重试的失败把整批事件交给回调，
///   回调只会调用 `try_publish`，重发深度因此被限制为一次。
///
/// ## 契约（What）
/// - 空批次立即成功，不借用连接；
/// - 编码失败、`UnsupportedProtocol` 与 `PoolClosed` 不进入恢复流程，直接以携带整批事件的
///   [`FailureRecord`] 返回；
/// - 批次要么整体确认，要么整体（或回调给出的未送达子序列）进入失败记录；
/// - 经恢复送达时，确认中的接收端是批次实际落地的接收端（故障转移时为备用端点），
///   失败记录中的接收端始终是首次失败的端点。
///
/// ## 风险与权衡（Trade-offs）
/// - 端点不串行化并发调用方；同一端点上的并发发布各自借用连接，彼此之间不保证顺序。
#[derive(Clone)]
pub struct DataEndpoint {
    address: ReceiverAddress,
    pool: ConnectionPool,
    encoder: Arc<dyn BatchEncoder>,
    callback: Arc<dyn FailureCallback>,
}

impl DataEndpoint {
    pub fn new(
        address: ReceiverAddress,
        pool: ConnectionPool,
        encoder: Arc<dyn BatchEncoder>,
        callback: Arc<dyn FailureCallback>,
    ) -> Self {
        Self {
            address,
            pool,
            encoder,
            callback,
        }
    }

    pub fn address(&self) -> &ReceiverAddress {
        &self.address
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn callback(&self) -> &Arc<dyn FailureCallback> {
        &self.callback
    }

    /// 以另一个失败回调构造同一接收端的端点。
    pub fn with_callback(&self, callback: Arc<dyn FailureCallback>) -> Self {
        Self {
            callback,
            ..self.clone()
        }
    }

    /// 单次发布尝试，不触发失败恢复。
    pub async fn try_publish(&self, events: &[Event]) -> Result<Ack> {
        if events.is_empty() {
            return Ok(Ack::new(self.address.clone(), 0));
        }

        let mut frame = BytesMut::new();
        self.encoder.encode(events, &mut frame)?;

        self.trace(PublishState::Connecting, events.len());
        let mut lent = match self.pool.borrow(&self.address).await {
            Ok(lent) => lent,
            Err(err) => {
                self.trace_failure(events.len(), &err);
                return Err(err);
            }
        };

        self.trace(PublishState::Sending, events.len());
        match lent.send(&frame).await {
            Ok(()) => {
                self.pool.release(lent).await;
                self.trace(PublishState::Succeeded, events.len());
                Ok(Ack::new(self.address.clone(), events.len()))
            }
            Err(source) => {
                self.pool.evict(lent).await;
                let err = DataBridgeError::PublishIo {
                    address: self.address.clone(),
                    source,
                };
                self.trace_failure(events.len(), &err);
                Err(err)
            }
        }
    }

    /// 发布一批事件；失败时交给失败恢复协调器。
    pub async fn publish(&self, events: Vec<Event>) -> std::result::Result<Ack, FailureRecord> {
        if events.is_empty() {
            return Ok(Ack::new(self.address.clone(), 0));
        }

        let cause = match self.try_publish(&events).await {
            Ok(ack) => return Ok(ack),
            Err(cause) => cause,
        };
        if !cause.is_retryable() {
            tracing::warn!(
                receiver = %self.address,
                events = events.len(),
                code = cause.code(),
                error = %cause,
                "publish failed without recovery"
            );
            return Err(FailureRecord::new(events, self.address.clone(), cause));
        }

        let total = events.len();
        tracing::warn!(
            receiver = %self.address,
            events = total,
            code = cause.code(),
            error = %cause,
            "publish failed, handing batch to failure callback"
        );
        let outcome = self.callback.resend(events, self).await;
        if outcome.unresolved.is_empty() {
            tracing::info!(
                receiver = %self.address,
                delivered_to = %outcome.receiver,
                events = total,
                "batch recovered"
            );
            Ok(Ack::new(outcome.receiver, total).recovered())
        } else {
            tracing::error!(
                receiver = %self.address,
                events = outcome.unresolved.len(),
                "batch left unresolved after recovery"
            );
            Err(FailureRecord::new(outcome.unresolved, self.address.clone(), cause))
        }
    }

    fn trace(&self, state: PublishState, events: usize) {
        tracing::debug!(receiver = %self.address, state = %state, events, "publish state");
    }

    fn trace_failure(&self, events: usize, err: &DataBridgeError) {
        tracing::debug!(
            receiver = %self.address,
            state = %PublishState::Failed,
            events,
            code = err.code(),
            "publish state"
        );
    }
}

impl fmt::Debug for DataEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataEndpoint")
            .field("address", &self.address)
            .field("encoder", &self.encoder.name())
            .field("callback", &self.callback)
            .finish()
    }
}
