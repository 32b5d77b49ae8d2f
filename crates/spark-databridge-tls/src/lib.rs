#![deny(unsafe_code)]
#![doc = r#"
# spark-databridge-tls

## 设计动机（Why）
- **安全出口**：发布代理与远端接收端之间的每条连接都必须加密并校验接收端证书；
- **可运维性**：信任库失败、握手失败与网络抖动在日志中可区分（Security / Transient），
  但对连接池统一表现为 `TransportSetup`。

## 核心契约（What）
- [`SecureClientFactory`]：读取 [`AgentConfiguration`](spark_databridge_core::AgentConfiguration)，
  构造一次 `rustls::ClientConfig`，并作为 [`ClientPoolFactory`](spark_databridge_core::ClientPoolFactory)
  为每个接收端建立 [`TlsClient`]；
- [`TrustSource`]：记录信任根来自配置的信任库、内置 Web PKI 根证书还是调用方注入；
- 协议与密码套件白名单接受 `TLSv1.2` / `TLS_AES_128_GCM_SHA256` 一类的名字，无法识别的条目被跳过。

## 实现策略（How）
- 使用 `rustls`（ring 后端）+ `tokio-rustls` 完成异步握手；
- 建连、握手、写入与关闭统一经 `run_with_timeout` 受套接字超时约束。

## 风险与考量（Trade-offs）
- 非严格模式下信任库不可用会回退到公共根证书，私有 CA 部署应开启 `trust_store_strict`；
- 口令保护的信任库容器不受支持，口令字段仅产生一条告警。
"#]

mod client;
mod error;
mod factory;
mod suites;
mod trust;
mod util;

pub use client::TlsClient;
pub use error::{SetupFailureClass, classify};
pub use factory::SecureClientFactory;
pub use trust::TrustSource;
