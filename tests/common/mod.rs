//! Common utilities for integration tests
#![allow(dead_code)]

use disguise_relay::config::{BackendConfig, ListenerConfig, RelayConfig, RelayTuning};
use disguise_relay::settings::disguise_response;
use disguise_relay::{tls, Address, RelayServer};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::TlsConnector;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Find a port nothing listens on
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Generate temporary certificate files for testing
pub fn generate_test_certs() -> (PathBuf, PathBuf) {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let temp_dir = std::env::temp_dir();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    let unique_id = format!("{}-{}-{}", timestamp, counter, std::process::id());

    let cert_path = temp_dir.join(format!("relay-test-cert-{}.pem", unique_id));
    let key_path = temp_dir.join(format!("relay-test-key-{}.pem", unique_id));

    tls::generate_self_signed_cert(
        "localhost",
        &["127.0.0.1".to_string(), "localhost".to_string()],
        &cert_path,
        &key_path,
    )
    .expect("Failed to generate test certificates");

    (cert_path, key_path)
}

/// Backend that greets each connection with `tag` and then echoes everything back
pub async fn start_tagged_backend(tag: &'static [u8]) -> SocketAddr {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind backend");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if socket.write_all(tag).await.is_err() {
                    return;
                }
                let mut buf = vec![0u8; 8192];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

pub struct Backends {
    pub ssh: SocketAddr,
    pub openvpn: SocketAddr,
    pub vmess: SocketAddr,
    pub default: SocketAddr,
}

impl Backends {
    pub async fn start() -> Self {
        Self {
            ssh: start_tagged_backend(b"[ssh]").await,
            openvpn: start_tagged_backend(b"[openvpn]").await,
            vmess: start_tagged_backend(b"[vmess]").await,
            default: start_tagged_backend(b"[default]").await,
        }
    }

    pub fn config(&self) -> BackendConfig {
        BackendConfig {
            ssh: Address::from(self.ssh),
            openvpn: Address::from(self.openvpn),
            vmess: Address::from(self.vmess),
            default: Some(Address::from(self.default)),
        }
    }
}

/// Fast timeouts for tests
pub fn test_tuning() -> RelayTuning {
    RelayTuning {
        connect_timeout_secs: 2,
        handshake_timeout_secs: 2,
        poll_interval_ms: 100,
        ..RelayTuning::default()
    }
}

pub fn relay_config(listeners: Vec<ListenerConfig>, backends: BackendConfig) -> RelayConfig {
    RelayConfig {
        listeners,
        backends,
        relay: test_tuning(),
    }
}

/// A running relay bound to ephemeral ports
pub struct RunningRelay {
    pub addrs: Vec<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl RunningRelay {
    pub fn addr(&self) -> SocketAddr {
        self.addrs[0]
    }

    /// Stop accepting and wait until every listener has closed
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await.unwrap().unwrap();
        }
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn start_relay(config: RelayConfig) -> RunningRelay {
    let server = RelayServer::bind(&config).expect("Failed to bind relay");
    let addrs = server
        .local_addrs()
        .unwrap()
        .into_iter()
        .map(|(_, addr)| addr)
        .collect();

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async move {
        let _ = rx.await;
    }));

    RunningRelay {
        addrs,
        shutdown: Some(tx),
        handle: Some(handle),
    }
}

pub fn default_disguise() -> Vec<u8> {
    disguise_response("Switching Protocols").to_vec()
}

/// Read exactly `len` bytes or fail the test
pub async fn read_n<S: AsyncRead + Unpin>(stream: &mut S, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(IO_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("Timeout waiting for data")
        .expect("Failed to read data");
    buf
}

/// Read until the peer closes; resets count as a close
pub async fn read_until_close<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match timeout(IO_TIMEOUT, stream.read(&mut buf))
            .await
            .expect("Timeout waiting for close")
        {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
    received
}

pub fn tls_connector() -> TlsConnector {
    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(NoCertificateVerification));
    TlsConnector::from(Arc::new(config))
}

pub async fn connect_tls(
    addr: SocketAddr,
) -> tokio_rustls::client::TlsStream<TcpStream> {
    let tcp = TcpStream::connect(addr).await.expect("Failed to connect");
    let server_name = ServerName::try_from("localhost").unwrap();
    timeout(IO_TIMEOUT, tls_connector().connect(server_name, tcp))
        .await
        .expect("TLS handshake timed out")
        .expect("TLS handshake failed")
}

/// Cleanup function for test resources
pub struct TestCleanup {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
}

impl TestCleanup {
    pub fn new(cert_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            cert_path: Some(cert_path),
            key_path: Some(key_path),
        }
    }
}

impl Drop for TestCleanup {
    fn drop(&mut self) {
        if let Some(cert) = self.cert_path.take() {
            let _ = std::fs::remove_file(cert);
        }
        if let Some(key) = self.key_path.take() {
            let _ = std::fs::remove_file(key);
        }
    }
}

/// 不验证证书的验证器（仅用于测试）
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer,
        _intermediates: &[CertificateDer],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
