//! TLS 连接工厂的端到端握手测试。
//!
//! 每个用例在本地回环地址上启动一个 `tokio-rustls` 接收端，证书链由 `rcgen`
//! 动态签发（测试 CA → 接收端证书，SAN 为 `127.0.0.1`），接收端把每条连接
//! 收到的明文整体转发到通道中供断言。

use std::{
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Context;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, SanType};
use rustls::{
    ServerConfig,
    crypto::ring,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
};
use spark_databridge_core::{
    AgentConfiguration, ClientPoolFactory, DataBridgeError, ReceiverAddress, TransportClient,
    TrustStoreType,
};
use spark_databridge_tls::{SecureClientFactory, SetupFailureClass, TrustSource, classify};
use tokio::{
    io::AsyncReadExt,
    net::TcpListener,
    sync::mpsc,
};
use tokio_rustls::TlsAcceptor;

/// 测试 PKI：CA 证书（PEM / DER）与接收端的服务端配置。
struct TestPki {
    ca_pem: String,
    ca_der: CertificateDer<'static>,
    server_config: Arc<ServerConfig>,
}

/// 签发测试 CA 与接收端证书。
///
/// - CA 为自签名、无路径长度限制；
/// - 接收端证书同时带 `localhost` 与 `127.0.0.1` 两个 SAN，客户端按 IP 校验。
fn test_pki() -> anyhow::Result<TestPki> {
    let mut ca_params = CertificateParams::default();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "databridge test ca");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().context("生成 CA 私钥失败")?;
    let ca = ca_params.self_signed(&ca_key).context("签发 CA 证书失败")?;

    let mut leaf_params =
        CertificateParams::new(vec!["localhost".to_owned()]).context("构造接收端证书参数失败")?;
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, "databridge receiver");
    leaf_params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    let leaf_key = KeyPair::generate().context("生成接收端私钥失败")?;
    let leaf = leaf_params
        .signed_by(&leaf_key, &ca, &ca_key)
        .context("签发接收端证书失败")?;

    let private_key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
    let server_config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .context("选择服务端协议版本失败")?
        .with_no_client_auth()
        .with_single_cert(vec![leaf.der().clone(), ca.der().clone()], private_key)
        .context("构建服务端 TLS 配置失败")?;

    Ok(TestPki {
        ca_pem: ca.pem(),
        ca_der: ca.der().clone(),
        server_config: Arc::new(server_config),
    })
}

/// 本地 TLS 接收端。
struct TestReceiver {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    payloads: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl TestReceiver {
    fn address(&self) -> ReceiverAddress {
        ReceiverAddress::ssl("127.0.0.1", self.addr.port())
    }

    async fn next_payload(&mut self) -> anyhow::Result<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(5), self.payloads.recv())
            .await
            .context("等待接收端数据超时")?
            .context("接收端通道已关闭")
    }
}

async fn spawn_receiver(config: Arc<ServerConfig>) -> anyhow::Result<TestReceiver> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accepted = Arc::new(AtomicUsize::new(0));
    let (tx, payloads) = mpsc::unbounded_channel();
    let acceptor = TlsAcceptor::from(config);

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut stream) = acceptor.accept(tcp).await else {
                    return;
                };
                let mut received = Vec::new();
                if stream.read_to_end(&mut received).await.is_ok() {
                    let _ = tx.send(received);
                }
            });
        }
    });

    Ok(TestReceiver {
        addr,
        accepted,
        payloads,
    })
}

fn trust_store_file(contents: &[u8]) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}

/// PEM 信任库 + 正常握手：工厂报告信任来源，连接可校验、可写，关闭后对端收到完整字节。
#[tokio::test(flavor = "multi_thread")]
async fn publishes_bytes_over_verified_connection() -> anyhow::Result<()> {
    let pki = test_pki()?;
    let mut receiver = spawn_receiver(Arc::clone(&pki.server_config)).await?;
    let store = trust_store_file(pki.ca_pem.as_bytes())?;
    let config = AgentConfiguration::default()
        .with_trust_store(store.path(), TrustStoreType::Pem)
        .with_socket_timeout(Duration::from_secs(5));

    let factory = SecureClientFactory::new(&config)?;
    assert!(matches!(
        factory.trust_source(),
        TrustSource::TrustStore { certificates: 1, .. }
    ));

    let mut client = factory.create(&receiver.address()).await?;
    assert!(client.is_connected());
    assert!(factory.validate(client.as_ref()));
    assert_eq!(client.address(), &receiver.address());

    client.write_all(b"throttle-event-batch").await?;
    client.flush().await?;
    factory.terminate(client.as_mut()).await;

    assert_eq!(receiver.next_payload().await?, b"throttle-event-batch");
    Ok(())
}

/// DER 信任库同样可用。
#[tokio::test(flavor = "multi_thread")]
async fn der_trust_store_is_accepted() -> anyhow::Result<()> {
    let pki = test_pki()?;
    let receiver = spawn_receiver(Arc::clone(&pki.server_config)).await?;
    let store = trust_store_file(pki.ca_der.as_ref())?;
    let config = AgentConfiguration::default().with_trust_store(store.path(), TrustStoreType::Der);

    let factory = SecureClientFactory::new(&config)?;
    let client = factory.connect(&receiver.address()).await?;
    assert!(client.is_connected());
    assert!(client.peer_addr().is_some());
    // 未配置密码套件时启用全部受支持套件。
    assert!(!client.enabled_cipher_suites().is_empty());
    assert_eq!(client.enabled_cipher_suites(), client.supported_cipher_suites());
    Ok(())
}

/// 非 `ssl` 协议在打开任何套接字之前即被拒绝。
#[tokio::test(flavor = "multi_thread")]
async fn unsupported_protocol_opens_no_socket() -> anyhow::Result<()> {
    let pki = test_pki()?;
    let receiver = spawn_receiver(Arc::clone(&pki.server_config)).await?;
    let factory = SecureClientFactory::with_root_store(&AgentConfiguration::default(), {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(pki.ca_der.clone())?;
        roots
    })?;

    let address = ReceiverAddress::new("PLAINTEXT", "127.0.0.1", receiver.addr.port());
    let err = factory.create(&address).await.expect_err("plaintext must be rejected");
    assert!(matches!(err, DataBridgeError::UnsupportedProtocol { .. }));
    assert!(!err.is_retryable());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(receiver.accepted.load(Ordering::SeqCst), 0);
    Ok(())
}

/// 重复终止是无害的；终止后连接不再通过校验。
#[tokio::test(flavor = "multi_thread")]
async fn terminate_is_idempotent() -> anyhow::Result<()> {
    let pki = test_pki()?;
    let receiver = spawn_receiver(Arc::clone(&pki.server_config)).await?;
    let mut roots = rustls::RootCertStore::empty();
    roots.add(pki.ca_der.clone())?;
    let factory = SecureClientFactory::with_root_store(&AgentConfiguration::default(), roots)?;

    let mut client = factory.create(&receiver.address()).await?;
    factory.terminate(client.as_mut()).await;
    factory.terminate(client.as_mut()).await;
    assert!(!client.is_connected());
    assert!(!factory.validate(client.as_ref()));

    let err = client.write_all(b"late").await.expect_err("closed client");
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    Ok(())
}

/// 协议与密码套件白名单在握手中生效。
#[tokio::test(flavor = "multi_thread")]
async fn restricted_protocols_and_ciphers_are_negotiated() -> anyhow::Result<()> {
    let pki = test_pki()?;
    let receiver = spawn_receiver(Arc::clone(&pki.server_config)).await?;

    let cases = [
        ("TLSv1.3", "TLS_AES_256_GCM_SHA384", "TLS_AES_256_GCM_SHA384"),
        (
            "TLSv1.2",
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, TLS_NOT_A_SUITE",
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        ),
    ];
    for (protocol, ciphers, expected_suite) in cases {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(pki.ca_der.clone())?;
        let config = AgentConfiguration::default()
            .with_enabled_protocols(protocol)
            .with_ciphers(ciphers);
        let factory = SecureClientFactory::with_root_store(&config, roots)?;
        assert_eq!(factory.enabled_protocols(), [protocol]);
        assert_eq!(factory.enabled_cipher_suites(), [expected_suite]);

        let client = factory.connect(&receiver.address()).await?;
        assert_eq!(client.negotiated_protocol(), Some(protocol));
        assert_eq!(client.negotiated_cipher_suite(), Some(expected_suite));
        assert_eq!(client.enabled_cipher_suites(), [expected_suite]);
        assert!(client.supported_cipher_suites().len() > 1);
    }
    Ok(())
}

/// 信任库路径失效时回退到内置根证书：工厂可以构造，但私有 CA 的握手以安全类错误失败。
#[tokio::test(flavor = "multi_thread")]
async fn fallback_roots_reject_private_receiver() -> anyhow::Result<()> {
    let pki = test_pki()?;
    let receiver = spawn_receiver(Arc::clone(&pki.server_config)).await?;
    let config = AgentConfiguration::default()
        .with_trust_store("/nonexistent/databridge/ca.pem", TrustStoreType::Pem)
        .with_trust_store_password("ignored");

    let factory = SecureClientFactory::new(&config)?;
    assert_eq!(factory.trust_source(), &TrustSource::PlatformDefault);

    match factory.create(&receiver.address()).await {
        Err(DataBridgeError::TransportSetup { source, address }) => {
            assert_eq!(address, receiver.address());
            assert_eq!(classify(&source), SetupFailureClass::Security);
        }
        other => panic!("expected handshake failure, got {other:?}"),
    }

    let strict = config.with_strict_trust_store(true);
    assert!(matches!(
        SecureClientFactory::new(&strict),
        Err(DataBridgeError::TransportInit { .. })
    ));
    Ok(())
}

/// 无人监听的端口：建连失败是可重试的 `TransportSetup`。
#[tokio::test(flavor = "multi_thread")]
async fn refused_connection_is_retryable_setup_failure() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let factory = SecureClientFactory::new(
        &AgentConfiguration::default().with_socket_timeout(Duration::from_secs(2)),
    )?;
    let err = factory
        .create(&ReceiverAddress::ssl("127.0.0.1", port))
        .await
        .expect_err("nothing listens on the port");
    assert!(matches!(err, DataBridgeError::TransportSetup { .. }));
    assert!(err.is_retryable());
    Ok(())
}
