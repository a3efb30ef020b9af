use crate::config::{ListenerConfig, RelayConfig};
use crate::listener::Listener;
use crate::sys;
use crate::tls;
use crate::transport::{PlainAcceptor, StreamAcceptor, TlsStreamAcceptor};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// 一组已绑定的监听器，共享同一份会话设置
pub struct RelayServer {
    listeners: Vec<Listener>,
}

impl RelayServer {
    /// 构造设置、准备证书并绑定全部监听器
    pub fn bind(config: &RelayConfig) -> Result<Self> {
        let settings = Arc::new(config.to_settings());
        let handshake_timeout = config.relay.handshake_timeout();

        let mut listeners = Vec::with_capacity(config.listeners.len());
        for listener_config in &config.listeners {
            let acceptor = build_acceptor(listener_config, handshake_timeout)?;
            let listener = Listener::bind(listener_config, Arc::clone(&settings), acceptor)
                .with_context(|| format!("Failed to start listener '{}'", listener_config.name))?;
            listeners.push(listener);
        }

        let registry = &settings.registry;
        info!(
            "Backends: ssh={} openvpn={} vmess={} default={}",
            registry.ssh(),
            registry.openvpn(),
            registry.vmess(),
            registry.default_backend()
        );

        Ok(Self { listeners })
    }

    pub fn local_addrs(&self) -> std::io::Result<Vec<(String, SocketAddr)>> {
        self.listeners
            .iter()
            .map(|l| Ok((l.name().to_string(), l.local_addr()?)))
            .collect()
    }

    /// 运行直到 Ctrl+C
    pub async fn run(self) -> Result<()> {
        info!("Waiting for connections... (Press Ctrl+C to stop)");
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await
    }

    /// 运行直到 `shutdown` 完成：所有监听器停止接入，已建立的会话继续运行
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let mut handles = Vec::with_capacity(self.listeners.len());
        for listener in self.listeners {
            let mut shutdown_rx = shutdown_tx.subscribe();
            let name = listener.name().to_string();
            let handle = tokio::spawn(listener.run_until(async move {
                let _ = shutdown_rx.recv().await;
            }));
            handles.push((name, handle));
        }

        shutdown.await;
        info!("Received shutdown signal, stopping listeners...");
        let _ = shutdown_tx.send(());

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Listener '{}' failed: {:#}", name, e),
                Err(e) => error!("Listener '{}' task aborted: {}", name, e),
            }
        }

        info!("Relay stopped gracefully");
        Ok(())
    }
}

/// 按监听器配置选择明文或 TLS 接入方式
///
/// TLS 未配置证书路径时在临时目录生成自签名证书
pub fn build_acceptor(
    config: &ListenerConfig,
    handshake_timeout: Duration,
) -> Result<Arc<dyn StreamAcceptor>> {
    let Some(ref tls_config) = config.tls else {
        return Ok(Arc::new(PlainAcceptor));
    };

    let (cert_path, key_path) = match tls_config.resolved_paths() {
        Some(paths) => paths,
        None => tls::generate_temporary_cert(&config.name, &config.bind_addr)?,
    };
    let server_config = tls::load_server_config(&cert_path, &key_path)
        .with_context(|| format!("Failed to load TLS material for '{}'", config.name))?;

    Ok(Arc::new(TlsStreamAcceptor::new(
        TlsAcceptor::from(server_config),
        handshake_timeout,
    )))
}

/// 运行中继直到 Ctrl+C
pub async fn run_server(config: RelayConfig) -> Result<()> {
    match sys::raise_nofile_limit(config.relay.nofile_limit) {
        Ok(limit) => info!("Open file limit: {}", limit),
        Err(e) => warn!("Failed to raise open file limit: {}", e),
    }

    let server = RelayServer::bind(&config)?;
    for (name, addr) in server.local_addrs()? {
        info!("Listener '{}' bound to {}", name, addr);
    }
    server.run().await
}
