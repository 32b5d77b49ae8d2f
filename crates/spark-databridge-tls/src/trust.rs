use std::{fs, io, path::Path};

use rustls::{
    RootCertStore,
    pki_types::{CertificateDer, pem::PemObject},
};
use spark_databridge_core::{AgentConfiguration, DataBridgeError, TrustStoreType};

/// 信任根的来源，用于日志与诊断。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustSource {
    /// 来自配置的信任库文件。
    TrustStore { path: String, certificates: usize },
    /// 信任库不可用时回退到内置的 Web PKI 根证书。
    PlatformDefault,
    /// 调用方直接注入的根证书集合。
    Provided,
}

/// 按配置加载信任库：打开容器 → 解析证书 → 构建根证书集合。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 链路上任何一步失败都折叠为同一个 [`DataBridgeError::TransportInit`]；
/// - 未配置路径同样视为失败，由调用方决定回退还是拒绝启动；
/// - PEM / DER 容器不加密，配置了口令时仅记录一条告警。
///
/// ## 逻辑（How）
/// 1. 读取整个文件，保留底层 `io::Error` 作为错误源；
/// 2. 按 `trust_store_type` 解析为一个或多个 `CertificateDer`；
/// 3. 逐个加入 `RootCertStore`，rustls 拒绝的证书同样视为初始化失败。
pub(crate) fn load_trust_store(config: &AgentConfiguration) -> Result<(RootCertStore, TrustSource), DataBridgeError> {
    let path = config
        .trust_store_path
        .as_deref()
        .ok_or_else(|| init_error("no trust store configured", None))?;

    if config.trust_store_password.is_some() {
        tracing::warn!(
            trust_store = %path.display(),
            kind = %config.trust_store_type,
            "trust store password is ignored for unencrypted certificate containers"
        );
    }

    let certificates = read_certificates(path, config.trust_store_type)?;
    if certificates.is_empty() {
        return Err(init_error(
            &format!("trust store {} contains no certificates", path.display()),
            None,
        ));
    }

    let mut store = RootCertStore::empty();
    for certificate in certificates {
        store.add(certificate).map_err(|err| {
            init_error(
                &format!("rejected certificate in {}: {err}", path.display()),
                None,
            )
        })?;
    }

    let source = TrustSource::TrustStore {
        path: path.display().to_string(),
        certificates: store.len(),
    };
    Ok((store, source))
}

/// 内置 Web PKI 根证书集合。
pub(crate) fn default_root_store() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.into(),
    }
}

fn read_certificates(path: &Path, kind: TrustStoreType) -> Result<Vec<CertificateDer<'static>>, DataBridgeError> {
    let raw = fs::read(path).map_err(|err| {
        init_error(&format!("cannot open trust store {}", path.display()), Some(err))
    })?;
    match kind {
        TrustStoreType::Pem => CertificateDer::pem_slice_iter(&raw)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                init_error(
                    &format!("malformed PEM trust store {}: {err}", path.display()),
                    None,
                )
            }),
        TrustStoreType::Der => Ok(vec![CertificateDer::from(raw)]),
    }
}

fn init_error(reason: &str, source: Option<io::Error>) -> DataBridgeError {
    DataBridgeError::TransportInit {
        reason: reason.to_owned(),
        source,
    }
}
