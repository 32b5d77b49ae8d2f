use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装全局 tracing Subscriber 时可能出现的错误。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// 宿主进程已经设置过全局 Subscriber。
    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet,
    #[error("failed to install tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

/// 为独立运行的发布代理安装 `fmt + EnvFilter` Subscriber。
///
/// # 教案式说明
/// - **意图（Why）**：代理嵌入网关进程时由宿主负责日志初始化；独立运行或调试时需要一个
///   开箱即用的入口；
/// - **逻辑（How）**：`RUST_LOG` 存在且合法时优先，否则使用 `default_directive`
///   （如 `"info"` 或 `"spark_databridge_agent=debug"`）；
/// - **契约（What）**：外部已设置 Subscriber 时返回 [`TelemetryError::SubscriberAlreadySet`]，
///   不会覆盖宿主配置。
pub fn init_tracing(default_directive: &str) -> Result<(), TelemetryError> {
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
