#![deny(unsafe_code)]
#![doc = r#"
# spark-databridge-agent

## 设计动机（Why）
- 网关执法层的多个发布任务并发地把节流遥测推送到少数几个长寿命接收端；
  TLS 握手昂贵，连接必须按接收端复用并且总量有界；
- 接收端短暂不可用时事件不能被静默丢弃，但重试也不能无限循环。

## 核心契约（What）
- [`ConnectionPool`]：按接收端分片、容量有界、借用有界等待的连接池；
- [`DataEndpoint`]：`publish(batch) → Result<Ack, FailureRecord>`，失败时把整批事件交给失败回调；
- [`FailureCallback`]：一次重发尝试，返回未送达子序列；[`FailureCallbackExt`] 提供退避与死信组合子；
- [`Agent`]：显式构造的代理上下文，持有配置与共享连接池；
- [`memory`]：不碰套接字的传输替身，供测试编排故障。

## 实现策略（How）
- 连接池以 `DashMap` 分片、`parking_lot::Mutex` 保护空闲栈、Tokio 信号量计量容量；
- 失败回调借助 `async-trait` 保持对象安全，端点以 `Arc<dyn FailureCallback>` 持有策略。

## 风险与考量（Trade-offs）
- 投递语义为至少一次：部分写出后失败的批次会被整体重发，接收端需容忍重复。
"#]

pub mod agent;
pub mod endpoint;
pub mod memory;
pub mod pool;
pub mod recovery;
pub mod telemetry;

pub use agent::Agent;
pub use endpoint::{DataEndpoint, PublishState};
pub use pool::{ConnectionPool, PoolSettings, PoolStats, PooledClient};
pub use recovery::{
    Backoff, FailoverResend, FailureCallback, FailureCallbackExt, InspectUnresolved, NoResend,
    ResendOnce, ResendOutcome,
};
pub use telemetry::{TelemetryError, init_tracing};
