use rustls::{
    ProtocolVersion, SupportedCipherSuite, SupportedProtocolVersion,
    crypto::{CryptoProvider, ring},
};
use spark_databridge_core::{AgentConfiguration, DataBridgeError};

/// 由配置裁剪后的协议版本与密码套件。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 运维沿用 JSSE 风格的名字配置白名单（`TLSv1.2`、`TLS_AES_128_GCM_SHA256`），
///   rustls 则使用 `TLS13_AES_128_GCM_SHA256` 一类的内部名字；此处统一两种拼写；
/// - rustls 的协议与套件是 `ClientConfig` 的一部分，只能在工厂构造时确定一次。
///
/// ## 契约（What）
/// - 密码套件未配置时启用 provider 支持的全部套件；
/// - 协议未配置时使用 rustls 默认版本集合；
/// - 无法识别的名字记录告警并跳过；非空白名单裁剪后为空时返回
///   [`DataBridgeError::InvalidConfiguration`]。
#[derive(Debug)]
pub(crate) struct CipherPolicy {
    pub(crate) provider: CryptoProvider,
    pub(crate) versions: Vec<&'static SupportedProtocolVersion>,
    pub(crate) enabled_cipher_suites: Vec<String>,
    pub(crate) supported_cipher_suites: Vec<String>,
    pub(crate) enabled_protocols: Vec<String>,
}

pub(crate) fn resolve(config: &AgentConfiguration) -> Result<CipherPolicy, DataBridgeError> {
    let mut provider = ring::default_provider();
    let supported_cipher_suites: Vec<String> =
        provider.cipher_suites.iter().map(|suite| suite_name(*suite)).collect();

    let requested_ciphers = config.cipher_list();
    if !requested_ciphers.is_empty() {
        let mut selected = Vec::with_capacity(requested_ciphers.len());
        for name in &requested_ciphers {
            let wanted = canonical_suite_name(name);
            match provider
                .cipher_suites
                .iter()
                .find(|suite| suite_name(**suite) == wanted)
            {
                Some(suite) if !selected.contains(suite) => selected.push(*suite),
                Some(_) => {}
                None => tracing::warn!(cipher = %name, "ignoring unsupported cipher suite"),
            }
        }
        if selected.is_empty() {
            return Err(invalid(format!(
                "none of the configured ciphers `{}` is supported",
                config.ciphers()
            )));
        }
        provider.cipher_suites = selected;
    }

    let requested_protocols = config.enabled_protocol_list();
    let versions: Vec<&'static SupportedProtocolVersion> = if requested_protocols.is_empty() {
        rustls::DEFAULT_VERSIONS.to_vec()
    } else {
        let mut versions = Vec::with_capacity(requested_protocols.len());
        for name in &requested_protocols {
            match protocol_version(name) {
                Some(version) if !versions.contains(&version) => versions.push(version),
                Some(_) => {}
                None => tracing::warn!(protocol = %name, "ignoring unsupported TLS protocol"),
            }
        }
        if versions.is_empty() {
            return Err(invalid(format!(
                "none of the configured protocols `{}` is supported",
                config.ssl_enabled_protocols()
            )));
        }
        versions
    };

    let enabled_cipher_suites = provider
        .cipher_suites
        .iter()
        .map(|suite| suite_name(*suite))
        .collect();
    let enabled_protocols = versions
        .iter()
        .map(|version| protocol_name(version.version))
        .collect();

    Ok(CipherPolicy {
        provider,
        versions,
        enabled_cipher_suites,
        supported_cipher_suites,
        enabled_protocols,
    })
}

/// 以 IANA 拼写返回密码套件名。
pub(crate) fn suite_name(suite: SupportedCipherSuite) -> String {
    canonical_suite_name(&format!("{:?}", suite.suite()))
}

/// 协议版本的 JSSE 风格名字，如 `TLSv1.3`。
pub(crate) fn protocol_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_owned(),
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_owned(),
        other => format!("{other:?}"),
    }
}

fn canonical_suite_name(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.strip_prefix("TLS13_") {
        Some(rest) => format!("TLS_{rest}"),
        None => upper,
    }
}

fn protocol_version(name: &str) -> Option<&'static SupportedProtocolVersion> {
    match name.trim().to_ascii_uppercase().replace('_', ".").as_str() {
        "TLSV1.2" | "TLS1.2" => Some(&rustls::version::TLS12),
        "TLSV1.3" | "TLS1.3" => Some(&rustls::version::TLS13),
        _ => None,
    }
}

fn invalid(reason: String) -> DataBridgeError {
    DataBridgeError::InvalidConfiguration { reason }
}
