use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::ReceiverAddress;

/// 一条节流 / 分析遥测事件。
///
/// 事件对发布代理是不透明的：代理只负责按批次顺序投递，不解析字段含义，
/// 也不为事件分配身份。字段布局沿用网关侧遥测记录：流标识、时间戳以及
/// 元数据 / 关联数据 / 负载三段有序数据，外加一张任意字符串映射。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub stream_id: String,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meta_data: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub correlation_data: Vec<Value>,
    #[serde(default)]
    pub payload_data: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arbitrary_data: BTreeMap<String, String>,
}

impl Event {
    pub fn new(stream_id: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            stream_id: stream_id.into(),
            timestamp_ms,
            ..Self::default()
        }
    }

    pub fn with_meta_data(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.meta_data = values.into_iter().collect();
        self
    }

    pub fn with_correlation_data(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.correlation_data = values.into_iter().collect();
        self
    }

    pub fn with_payload(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.payload_data = values.into_iter().collect();
        self
    }

    pub fn with_arbitrary(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arbitrary_data.insert(key.into(), value.into());
        self
    }
}

/// 一次成功发布的确认。
///
/// - `delivered`：本批事件数量；
/// - `recovered`：为 `true` 表示首发失败、由失败恢复协调器重发成功。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub receiver: ReceiverAddress,
    pub delivered: usize,
    pub recovered: bool,
}

impl Ack {
    pub fn new(receiver: ReceiverAddress, delivered: usize) -> Self {
        Self {
            receiver,
            delivered,
            recovered: false,
        }
    }

    pub fn recovered(mut self) -> Self {
        self.recovered = true;
        self
    }
}
