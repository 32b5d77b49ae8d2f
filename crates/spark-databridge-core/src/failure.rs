use std::fmt;

use crate::{address::ReceiverAddress, error::DataBridgeError, event::Event};

/// 一批未能送达的事件及其来源端点。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“这批事件没有到达接收端”具象化为值，而不是让传输层异常穿透到发布调用方；
/// - 失败记录只在失败瞬间构造并被恢复流程消费，从不持久化。
///
/// ## 契约（What）
/// - `events` 保持原批次顺序，重发时按同样顺序写出；
/// - `receiver` 为首次失败的接收端；
/// - `cause` 为首次失败的原因，恢复流程即便改道也不会覆盖它。
#[derive(Debug)]
pub struct FailureRecord {
    pub events: Vec<Event>,
    pub receiver: ReceiverAddress,
    pub cause: DataBridgeError,
}

impl FailureRecord {
    pub fn new(events: Vec<Event>, receiver: ReceiverAddress, cause: DataBridgeError) -> Self {
        Self {
            events,
            receiver,
            cause,
        }
    }

    /// 未送达的事件数量。
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 取回未送达事件，供上层调度器稍后再次投递。
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} event(s) undelivered to {}: {}",
            self.events.len(),
            self.receiver,
            self.cause
        )
    }
}

impl std::error::Error for FailureRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}
