use std::sync::Arc;

use spark_databridge_core::{
    AgentConfiguration, BatchEncoder, ClientPoolFactory, DataBridgeError, JsonFrameEncoder,
    ReceiverAddress, Result, parse_receiver_list,
};
use spark_databridge_tls::SecureClientFactory;

use crate::{
    endpoint::DataEndpoint,
    pool::{ConnectionPool, PoolSettings},
    recovery::{FailoverResend, FailureCallback, ResendOnce},
};

/// 发布代理的显式上下文。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 取代进程级单例注册表：配置、传输工厂与连接池在进程启动时构造一次，
///   之后以值的形式传给需要它们的端点；测试可以注入任意传输工厂与配置。
///
/// ## 契约（What）
/// - [`Agent::new`] 校验配置并构造 TLS 工厂（信任库回退或严格模式在此决定）；
/// - [`Agent::with_factory`] 接受任意 [`ClientPoolFactory`] 实现；
/// - 同一个 `Agent` 产出的所有端点共享一个连接池；
/// - [`Agent::shutdown`] 关闭连接池，之后所有端点的发布都以 `PoolClosed` 失败。
#[derive(Clone, Debug)]
pub struct Agent {
    config: Arc<AgentConfiguration>,
    pool: ConnectionPool,
    encoder: Arc<dyn BatchEncoder>,
}

impl Agent {
    pub fn new(config: AgentConfiguration) -> Result<Self> {
        config.validate()?;
        let factory = SecureClientFactory::new(&config)?;
        Self::with_factory(config, Arc::new(factory))
    }

    pub fn with_factory(config: AgentConfiguration, factory: Arc<dyn ClientPoolFactory>) -> Result<Self> {
        config.validate()?;
        let pool = ConnectionPool::new(factory, PoolSettings::from_config(&config));
        tracing::info!(
            protocol = pool.factory().protocol(),
            max_per_receiver = config.max_connections_per_receiver,
            pool_wait_timeout_ms = config.pool_wait_timeout_ms,
            "databridge agent initialised"
        );
        Ok(Self {
            config: Arc::new(config),
            pool,
            encoder: Arc::new(JsonFrameEncoder),
        })
    }

    /// 替换批次编码器，仅影响之后创建的端点。
    pub fn with_encoder(mut self, encoder: Arc<dyn BatchEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &AgentConfiguration {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// 以默认的 [`ResendOnce`] 策略创建端点。
    pub fn endpoint(&self, address: ReceiverAddress) -> DataEndpoint {
        self.endpoint_with_callback(address, Arc::new(ResendOnce))
    }

    pub fn endpoint_with_callback(
        &self,
        address: ReceiverAddress,
        callback: Arc<dyn FailureCallback>,
    ) -> DataEndpoint {
        DataEndpoint::new(address, self.pool.clone(), Arc::clone(&self.encoder), callback)
    }

    /// 由 `ssl://a:1,ssl://b:2` 形式的故障转移组创建端点。
    ///
    /// 第一个地址为主接收端，其余地址作为 [`FailoverResend`] 的备用端点；
    /// 只有一个地址时等价于 [`Agent::endpoint`]。
    pub fn failover_endpoint(&self, receivers: &str) -> Result<DataEndpoint> {
        let mut addresses = parse_receiver_list(receivers)?.into_iter();
        let Some(primary) = addresses.next() else {
            return Err(DataBridgeError::InvalidReceiverUrl {
                url: receivers.to_owned(),
                reason: "no receiver configured".to_owned(),
            });
        };
        let alternates: Vec<DataEndpoint> = addresses.map(|address| self.endpoint(address)).collect();
        if alternates.is_empty() {
            return Ok(self.endpoint(primary));
        }
        Ok(self.endpoint_with_callback(primary, Arc::new(FailoverResend::new(alternates))))
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
