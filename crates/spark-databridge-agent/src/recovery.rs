//! # 失败恢复协调器
//!
//! ## 意图（Why）
//! - 发布失败后由一个显式的函数值决定“这批事件还能不能送达”，而不是让传输异常穿透到调用方；
//! - 策略可组合：退避、死信钩子等横切行为包在基础策略外层，而不必各写一个子类。
//!
//! ## 契约（What）
//! - [`FailureCallback::try_resend_events`] 对每次调用只做一次重发尝试；
//! - 返回空序列表示全部送达，否则返回未送达的子序列，顺序与原批次一致；
//! - 预期内的传输失败只通过返回值表达，不会 panic 也不会返回错误；
//! - [`FailureCallback::resend`] 额外报告重发落到了哪个接收端，端点据此填写确认中的接收端。
//!
//! ## 注意事项（Trade-offs）
//! - 回调在失败路径上内联执行，退避会直接拉长该次 `publish` 的耗时；
//!   需要长间隔重试的调用方应在上层调度，而不是把退避设得很大。

use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use spark_databridge_core::{Event, ReceiverAddress};

use crate::endpoint::DataEndpoint;

/// 一次重发尝试的结果。
#[derive(Clone, Debug, PartialEq)]
pub struct ResendOutcome {
    /// 未送达的事件，保持原批次顺序。
    pub unresolved: Vec<Event>,
    /// 重发尝试所用的接收端；`unresolved` 为空时即批次实际送达的接收端。
    pub receiver: ReceiverAddress,
}

/// 失败回调：`(events, failed_endpoint) → unresolved_events`。
#[async_trait]
pub trait FailureCallback: Send + Sync + fmt::Debug {
    async fn try_resend_events(&self, events: Vec<Event>, failed: &DataEndpoint) -> Vec<Event>;

    /// 与 `try_resend_events` 相同，并报告重发所用的接收端。
    ///
    /// 默认实现认为重发经由失败端点本身；改道到其他接收端的策略需要覆盖此方法。
    async fn resend(&self, events: Vec<Event>, failed: &DataEndpoint) -> ResendOutcome {
        ResendOutcome {
            unresolved: self.try_resend_events(events, failed).await,
            receiver: failed.address().clone(),
        }
    }
}

/// 默认策略：经失败端点重发一次。
///
/// 失败连接已被驱逐，重发会借到另一条空闲连接或新建连接。
#[derive(Clone, Copy, Debug, Default)]
pub struct ResendOnce;

#[async_trait]
impl FailureCallback for ResendOnce {
    async fn try_resend_events(&self, events: Vec<Event>, failed: &DataEndpoint) -> Vec<Event> {
        resend_through(failed, events).await
    }
}

/// 不重发，所有事件都视为未送达。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoResend;

#[async_trait]
impl FailureCallback for NoResend {
    async fn try_resend_events(&self, events: Vec<Event>, _failed: &DataEndpoint) -> Vec<Event> {
        events
    }
}

/// 故障转移：经备用接收端重发一次。
///
/// 备用端点轮询选取，并跳过与失败端点地址相同的条目；没有可用备用端点时退化为
/// 经失败端点重发。
#[derive(Debug)]
pub struct FailoverResend {
    alternates: Vec<DataEndpoint>,
    cursor: AtomicUsize,
}

impl FailoverResend {
    pub fn new(alternates: impl IntoIterator<Item = DataEndpoint>) -> Self {
        Self {
            alternates: alternates.into_iter().collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn alternates(&self) -> &[DataEndpoint] {
        &self.alternates
    }

    fn next_alternate(&self, failed: &ReceiverAddress) -> Option<&DataEndpoint> {
        let candidates: Vec<&DataEndpoint> = self
            .alternates
            .iter()
            .filter(|endpoint| endpoint.address() != failed)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index])
    }
}

#[async_trait]
impl FailureCallback for FailoverResend {
    async fn try_resend_events(&self, events: Vec<Event>, failed: &DataEndpoint) -> Vec<Event> {
        self.resend(events, failed).await.unresolved
    }

    async fn resend(&self, events: Vec<Event>, failed: &DataEndpoint) -> ResendOutcome {
        let target = match self.next_alternate(failed.address()) {
            Some(alternate) => {
                tracing::info!(
                    from = %failed.address(),
                    to = %alternate.address(),
                    events = events.len(),
                    "failing over batch to alternate receiver"
                );
                alternate
            }
            None => failed,
        };
        ResendOutcome {
            unresolved: resend_through(target, events).await,
            receiver: target.address().clone(),
        }
    }
}

async fn resend_through(endpoint: &DataEndpoint, events: Vec<Event>) -> Vec<Event> {
    match endpoint.try_publish(&events).await {
        Ok(_) => Vec::new(),
        Err(err) => {
            tracing::warn!(
                receiver = %endpoint.address(),
                events = events.len(),
                code = err.code(),
                error = %err,
                "resend attempt failed"
            );
            events
        }
    }
}

/// 在内层策略前等待固定时长。
#[derive(Debug)]
pub struct Backoff<C> {
    inner: C,
    delay: Duration,
}

#[async_trait]
impl<C: FailureCallback> FailureCallback for Backoff<C> {
    async fn try_resend_events(&self, events: Vec<Event>, failed: &DataEndpoint) -> Vec<Event> {
        self.resend(events, failed).await.unresolved
    }

    async fn resend(&self, events: Vec<Event>, failed: &DataEndpoint) -> ResendOutcome {
        tokio::time::sleep(self.delay).await;
        self.inner.resend(events, failed).await
    }
}

/// 内层策略留下未送达事件时调用死信钩子。
pub struct InspectUnresolved<C, F> {
    inner: C,
    hook: F,
}

#[async_trait]
impl<C, F> FailureCallback for InspectUnresolved<C, F>
where
    C: FailureCallback,
    F: Fn(&[Event], &ReceiverAddress) + Send + Sync,
{
    async fn try_resend_events(&self, events: Vec<Event>, failed: &DataEndpoint) -> Vec<Event> {
        self.resend(events, failed).await.unresolved
    }

    async fn resend(&self, events: Vec<Event>, failed: &DataEndpoint) -> ResendOutcome {
        let outcome = self.inner.resend(events, failed).await;
        if !outcome.unresolved.is_empty() {
            (self.hook)(&outcome.unresolved, failed.address());
        }
        outcome
    }
}

impl<C: fmt::Debug, F> fmt::Debug for InspectUnresolved<C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InspectUnresolved")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// 失败回调的组合子。
pub trait FailureCallbackExt: FailureCallback + Sized {
    /// 每次重发前先等待 `delay`。
    fn with_backoff(self, delay: Duration) -> Backoff<Self> {
        Backoff { inner: self, delay }
    }

    /// 重发后仍有未送达事件时调用 `hook`。
    fn on_unresolved<F>(self, hook: F) -> InspectUnresolved<Self, F>
    where
        F: Fn(&[Event], &ReceiverAddress) + Send + Sync,
    {
        InspectUnresolved { inner: self, hook }
    }
}

impl<T: FailureCallback> FailureCallbackExt for T {}
