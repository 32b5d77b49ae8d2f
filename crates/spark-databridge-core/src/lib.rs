#![deny(unsafe_code)]
#![doc = r#"
# spark-databridge-core

## 设计动机（Why）
- 网关执法层的每个实例都要把节流 / 分析遥测事件推送到远端聚合接收端；
  本 crate 收纳发布代理各层共享的“共同语言”，让 TLS 传输实现、连接池与发布端点
  只依赖契约而不互相依赖实现细节。

## 核心契约（What）
- [`ReceiverAddress`]：`{protocol, host, port}`，连接池的分片键；
- [`Event`] / [`Ack`] / [`FailureRecord`]：批次、确认与失败记录；
- [`AgentConfiguration`]：进程启动时构造一次的只读传输配置；
- [`DataBridgeError`]：错误分类，附稳定错误码与可重试判定；
- [`TransportClient`] / [`ClientPoolFactory`]：按传输变体实现的能力接口；
- [`BatchEncoder`]：事件批次到字节的外部序列化边界。

## 实现策略（How）
- 能力接口借助 `async-trait` 保持对象安全，连接池以 `Box<dyn TransportClient>` 统一持有连接；
- 配置以 `serde` 派生并通过 `toml` 载入，错误由 `thiserror` 派生。
"#]

pub mod address;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod failure;
pub mod transport;

pub use address::{ReceiverAddress, SSL_PROTOCOL, parse_receiver_list};
pub use codec::{BatchEncoder, JsonFrameEncoder, MAX_FRAME_LEN, decode_json_frame};
pub use config::{AgentConfiguration, TrustStoreType};
pub use error::{DataBridgeError, Result};
pub use event::{Ack, Event};
pub use failure::FailureRecord;
pub use transport::{ClientPoolFactory, TransportClient};
