use std::{fmt, io, time::Duration};

use rustls::{AlertDescription, Error as RustlsError};
use spark_databridge_core::{DataBridgeError, ReceiverAddress};

/// TLS 客户端错误映射模块。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 建连失败对连接池而言只有一种结果（借用失败），但运维需要区分“证书不被信任”
///   与“网络抖动”，因此在映射为 [`DataBridgeError::TransportSetup`] 的同时给出分类；
/// - 超时在 Tokio 中表现为 `Elapsed`，此处统一转换为 `io::ErrorKind::TimedOut`，
///   使上层只面对 `io::Error`。
///
/// ## 契约（What）
/// - `OperationKind` 描述一类操作（建连 / 握手 / 写 / 刷新 / 关闭）的错误码与默认文案；
/// - `setup_error` 保留原始 `io::Error` 作为错误源并输出一条带分类的日志；
/// - `classify` 对嵌套的 `rustls::Error` 做细分，其余按 IO 错误处理。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.databridge.tls.connect_failed",
    message: "tcp connect",
};

pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    code: "spark.databridge.tls.handshake_failed",
    message: "tls handshake",
};

pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.databridge.tls.write_failed",
    message: "tls write",
};

pub(crate) const FLUSH: OperationKind = OperationKind {
    code: "spark.databridge.tls.flush_failed",
    message: "tls flush",
};

pub(crate) const CLOSE: OperationKind = OperationKind {
    code: "spark.databridge.tls.close_failed",
    message: "tls close",
};

/// 建连失败的粗粒度分类，仅用于日志。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupFailureClass {
    /// 证书、告警或协议违规；重试通常无济于事。
    Security,
    /// 网络或资源类瞬时故障。
    Transient,
}

impl fmt::Display for SetupFailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Security => f.write_str("security"),
            Self::Transient => f.write_str("transient"),
        }
    }
}

pub(crate) fn setup_error(kind: OperationKind, address: &ReceiverAddress, source: io::Error) -> DataBridgeError {
    let class = classify(&source);
    tracing::warn!(
        code = kind.code,
        receiver = %address,
        class = %class,
        error = %source,
        "{} failed",
        kind.message
    );
    DataBridgeError::TransportSetup {
        address: address.clone(),
        source,
    }
}

pub(crate) fn timed_out(kind: OperationKind, after: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{} timed out after {after:?}", kind.message),
    )
}

pub(crate) fn not_connected(kind: OperationKind) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("{} on a closed connection", kind.message),
    )
}

pub fn classify(error: &io::Error) -> SetupFailureClass {
    if let Some(source) = error.get_ref()
        && let Some(rustls_error) = source.downcast_ref::<RustlsError>()
    {
        return classify_rustls(rustls_error);
    }
    SetupFailureClass::Transient
}

fn classify_rustls(error: &RustlsError) -> SetupFailureClass {
    use RustlsError::*;
    match error {
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | PeerIncompatible(_)
        | DecryptError
        | NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType
        | NoApplicationProtocol => SetupFailureClass::Security,
        AlertReceived(alert) => classify_alert(alert),
        _ => SetupFailureClass::Transient,
    }
}

fn classify_alert(alert: &AlertDescription) -> SetupFailureClass {
    use AlertDescription::*;
    match alert {
        CloseNotify | UserCanceled | NoRenegotiation | InternalError => {
            SetupFailureClass::Transient
        }
        _ => SetupFailureClass::Security,
    }
}
