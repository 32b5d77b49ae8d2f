//! # 传输配置
//!
//! ## 意图（Why）
//! - 取代进程级单例注册表：配置在进程启动时构造一次，之后以只读引用交给传输工厂与连接池，
//!   测试可以直接注入另一份配置而无需触碰全局状态；
//! - 字段与网关侧代理配置一一对应（信任库、套接字超时、协议 / 密码套件白名单），
//!   另补充连接池容量与等待时长。
//!
//! ## 契约（What）
//! - 全部字段可选，缺省值见 [`AgentConfiguration::default`]；
//! - 协议与密码套件以逗号分隔字符串保存，空字符串表示“不限制”；
//! - [`AgentConfiguration::validate`] 拒绝零容量与零超时。
//!
//! ## 注意事项（Trade-offs）
//! - 仅支持 TOML 载入；从环境变量组装配置属于宿主进程的职责。

use std::{fmt, fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{DataBridgeError, Result};

pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_CONNECTIONS_PER_RECEIVER: usize = 8;
pub const DEFAULT_POOL_WAIT_TIMEOUT_MS: u64 = 3_000;

/// 信任库容器格式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustStoreType {
    /// 一个或多个 PEM 证书。
    #[default]
    Pem,
    /// 单个 DER 证书。
    Der,
}

impl fmt::Display for TrustStoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem => f.write_str("pem"),
            Self::Der => f.write_str("der"),
        }
    }
}

/// 发布代理的传输配置。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfiguration {
    pub trust_store_path: Option<PathBuf>,
    pub trust_store_password: Option<String>,
    pub trust_store_type: TrustStoreType,
    /// 严格模式：信任库加载失败时拒绝构造工厂，而不是回退到默认信任根。
    pub trust_store_strict: bool,
    pub socket_timeout_ms: u64,
    pub ssl_enabled_protocols: String,
    pub ciphers: String,
    pub max_connections_per_receiver: usize,
    pub pool_wait_timeout_ms: u64,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            trust_store_path: None,
            trust_store_password: None,
            trust_store_type: TrustStoreType::Pem,
            trust_store_strict: false,
            socket_timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
            ssl_enabled_protocols: String::new(),
            ciphers: String::new(),
            max_connections_per_receiver: DEFAULT_MAX_CONNECTIONS_PER_RECEIVER,
            pool_wait_timeout_ms: DEFAULT_POOL_WAIT_TIMEOUT_MS,
        }
    }
}

impl AgentConfiguration {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|err| DataBridgeError::InvalidConfiguration {
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件解析并校验。
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| DataBridgeError::InvalidConfiguration {
            reason: format!("cannot read {}: {err}", path.display()),
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(DataBridgeError::InvalidConfiguration {
                reason: reason.to_owned(),
            })
        };
        if self.socket_timeout_ms == 0 {
            return invalid("socket_timeout_ms must be greater than zero");
        }
        if self.max_connections_per_receiver == 0 {
            return invalid("max_connections_per_receiver must be greater than zero");
        }
        if self.pool_wait_timeout_ms == 0 {
            return invalid("pool_wait_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn socket_timeout_ms(&self) -> u64 {
        self.socket_timeout_ms
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    /// 原始的逗号分隔协议列表。
    pub fn ssl_enabled_protocols(&self) -> &str {
        &self.ssl_enabled_protocols
    }

    /// 原始的逗号分隔密码套件列表。
    pub fn ciphers(&self) -> &str {
        &self.ciphers
    }

    /// 按配置顺序拆分后的协议列表；为空表示使用平台默认值。
    pub fn enabled_protocol_list(&self) -> Vec<String> {
        split_list(&self.ssl_enabled_protocols)
    }

    /// 去除空白并拆分后的密码套件列表；为空表示启用全部受支持套件。
    pub fn cipher_list(&self) -> Vec<String> {
        split_list(&self.ciphers)
    }

    pub fn pool_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_wait_timeout_ms)
    }

    pub fn with_trust_store(mut self, path: impl Into<PathBuf>, kind: TrustStoreType) -> Self {
        self.trust_store_path = Some(path.into());
        self.trust_store_type = kind;
        self
    }

    pub fn with_trust_store_password(mut self, password: impl Into<String>) -> Self {
        self.trust_store_password = Some(password.into());
        self
    }

    pub fn with_strict_trust_store(mut self, strict: bool) -> Self {
        self.trust_store_strict = strict;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_enabled_protocols(mut self, protocols: impl Into<String>) -> Self {
        self.ssl_enabled_protocols = protocols.into();
        self
    }

    pub fn with_ciphers(mut self, ciphers: impl Into<String>) -> Self {
        self.ciphers = ciphers.into();
        self
    }

    pub fn with_pool_capacity(mut self, max_connections_per_receiver: usize) -> Self {
        self.max_connections_per_receiver = max_connections_per_receiver;
        self
    }

    pub fn with_pool_wait_timeout(mut self, timeout: Duration) -> Self {
        self.pool_wait_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

impl fmt::Debug for AgentConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfiguration")
            .field("trust_store_path", &self.trust_store_path)
            .field(
                "trust_store_password",
                &self.trust_store_password.as_ref().map(|_| "<redacted>"),
            )
            .field("trust_store_type", &self.trust_store_type)
            .field("trust_store_strict", &self.trust_store_strict)
            .field("socket_timeout_ms", &self.socket_timeout_ms)
            .field("ssl_enabled_protocols", &self.ssl_enabled_protocols)
            .field("ciphers", &self.ciphers)
            .field("max_connections_per_receiver", &self.max_connections_per_receiver)
            .field("pool_wait_timeout_ms", &self.pool_wait_timeout_ms)
            .finish()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|item| !item.is_empty())
        .collect()
}
