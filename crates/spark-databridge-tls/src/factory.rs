use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use spark_databridge_core::{
    AgentConfiguration, ClientPoolFactory, DataBridgeError, ReceiverAddress, Result, SSL_PROTOCOL,
    TransportClient,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::{
    client::TlsClient,
    error::{CONNECT, HANDSHAKE, setup_error},
    suites::{self, CipherPolicy},
    trust::{TrustSource, default_root_store, load_trust_store},
    util::run_with_timeout,
};

/// 面向接收端的 TLS 连接工厂。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 信任库、协议白名单与密码套件只在构造时解析一次，之后每条连接共享同一个
///   `Arc<ClientConfig>`，建连路径上不再触碰文件系统；
/// - 作为 [`ClientPoolFactory`] 的 TLS 变体接入连接池，连接池对具体传输一无所知。
///
/// ## 逻辑（How）
/// 1. 加载信任库；失败时按 `trust_store_strict` 决定拒绝构造或回退到内置 Web PKI 根证书；
/// 2. 按配置裁剪协议版本与密码套件，构造 `ClientConfig`；
/// 3. `create` 依次执行：协议校验 → 带超时的 TCP 建连 → `TCP_NODELAY` → 带超时的握手。
///
/// ## 契约（What）
/// - 协议标识不是 `ssl`（大小写不敏感）时返回 [`DataBridgeError::UnsupportedProtocol`]，
///   此时不会打开任何套接字；
/// - 建连与握手失败统一映射为 [`DataBridgeError::TransportSetup`]，保留底层 `io::Error`；
/// - 回退模式下先输出一条 `error` 再输出一条 `warn`，两条日志都不会阻止构造成功。
///
/// ## 风险与权衡（Trade-offs）
/// - 回退到公共根证书意味着私有 CA 签发的接收端证书将无法通过校验，
///   故障会推迟到第一次握手才暴露；需要“配置错即启动失败”的部署应开启严格模式。
#[derive(Clone, Debug)]
pub struct SecureClientFactory {
    tls_config: Arc<ClientConfig>,
    io_timeout: Duration,
    trust_source: TrustSource,
    enabled_cipher_suites: Vec<String>,
    supported_cipher_suites: Vec<String>,
    enabled_protocols: Vec<String>,
}

impl SecureClientFactory {
    /// 按配置构造工厂，信任根来自配置的信任库（或回退）。
    pub fn new(config: &AgentConfiguration) -> Result<Self> {
        config.validate()?;
        let (roots, trust_source) = match load_trust_store(config) {
            Ok(loaded) => loaded,
            Err(err) if config.trust_store_strict => {
                tracing::error!(
                    code = err.code(),
                    error = %err,
                    "trust store unavailable and strict mode is enabled"
                );
                return Err(err);
            }
            Err(err) if config.trust_store_path.is_none() => {
                tracing::info!(
                    reason = %err,
                    "no trust store configured, using built-in web PKI roots"
                );
                (default_root_store(), TrustSource::PlatformDefault)
            }
            Err(err) => {
                tracing::error!(
                    code = err.code(),
                    error = %err,
                    "cannot load configured trust store"
                );
                tracing::warn!("falling back to built-in web PKI roots for receiver verification");
                (default_root_store(), TrustSource::PlatformDefault)
            }
        };
        Self::build(config, roots, trust_source)
    }

    /// 以调用方提供的根证书集合构造工厂，忽略配置中的信任库字段。
    pub fn with_root_store(config: &AgentConfiguration, roots: RootCertStore) -> Result<Self> {
        config.validate()?;
        Self::build(config, roots, TrustSource::Provided)
    }

    fn build(config: &AgentConfiguration, roots: RootCertStore, trust_source: TrustSource) -> Result<Self> {
        let CipherPolicy {
            provider,
            versions,
            enabled_cipher_suites,
            supported_cipher_suites,
            enabled_protocols,
        } = suites::resolve(config)?;

        let tls_config = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&versions)
            .map_err(|err| DataBridgeError::InvalidConfiguration {
                reason: format!("incompatible TLS protocols and cipher suites: {err}"),
            })?
            .with_root_certificates(roots)
            .with_no_client_auth();

        tracing::info!(
            trust = ?trust_source,
            protocols = ?enabled_protocols,
            ciphers = enabled_cipher_suites.len(),
            socket_timeout_ms = config.socket_timeout_ms(),
            "secure client factory ready"
        );

        Ok(Self {
            tls_config: Arc::new(tls_config),
            io_timeout: config.socket_timeout(),
            trust_source,
            enabled_cipher_suites,
            supported_cipher_suites,
            enabled_protocols,
        })
    }

    pub fn trust_source(&self) -> &TrustSource {
        &self.trust_source
    }

    /// 实际启用的密码套件（IANA 拼写，按配置顺序）。
    pub fn enabled_cipher_suites(&self) -> &[String] {
        &self.enabled_cipher_suites
    }

    /// 加密后端支持的全部密码套件。
    pub fn supported_cipher_suites(&self) -> &[String] {
        &self.supported_cipher_suites
    }

    pub fn enabled_protocols(&self) -> &[String] {
        &self.enabled_protocols
    }

    pub fn socket_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// 建立一条 TLS 连接并返回具体类型，便于调用方读取握手元数据。
    pub async fn connect(&self, address: &ReceiverAddress) -> Result<TlsClient> {
        if !address.protocol().eq_ignore_ascii_case(SSL_PROTOCOL) {
            return Err(DataBridgeError::UnsupportedProtocol {
                protocol: address.protocol().to_owned(),
                supported: SSL_PROTOCOL,
            });
        }

        let server_name = ServerName::try_from(address.host().to_owned()).map_err(|err| {
            setup_error(
                HANDSHAKE,
                address,
                io::Error::new(io::ErrorKind::InvalidInput, err),
            )
        })?;

        let tcp = run_with_timeout(CONNECT, self.io_timeout, TcpStream::connect(address.authority()))
            .await
            .map_err(|err| setup_error(CONNECT, address, err))?;
        tcp.set_nodelay(true)
            .map_err(|err| setup_error(CONNECT, address, err))?;

        let connector = TlsConnector::from(Arc::clone(&self.tls_config));
        let stream = run_with_timeout(HANDSHAKE, self.io_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|err| setup_error(HANDSHAKE, address, err))?;

        let client = TlsClient::new(
            address.clone(),
            stream,
            self.io_timeout,
            self.enabled_cipher_suites.clone(),
            self.supported_cipher_suites.clone(),
        );
        tracing::debug!(
            client = %client.id(),
            protocol = client.negotiated_protocol().unwrap_or("unknown"),
            cipher = client.negotiated_cipher_suite().unwrap_or("unknown"),
            "tls connection established"
        );
        Ok(client)
    }
}

#[async_trait]
impl ClientPoolFactory for SecureClientFactory {
    fn protocol(&self) -> &'static str {
        SSL_PROTOCOL
    }

    async fn create(&self, address: &ReceiverAddress) -> Result<Box<dyn TransportClient>> {
        let client = self.connect(address).await?;
        Ok(Box::new(client))
    }
}
