/// 监听器
///
/// 一个端口一个 accept 循环，每个接入连接在独立任务中完成（可选的）TLS 握手并运行会话。
/// 会话的失败止于任务边界，只记录日志。
use crate::address::Address;
use crate::config::ListenerConfig;
use crate::connection::{Connection, Role};
use crate::error::Result;
use crate::rate_limiter::AcceptLimiter;
use crate::session::ProxySession;
use crate::settings::RelaySettings;
use crate::transport::StreamAcceptor;
use anyhow::Context;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// accept 出错后的退避时间（例如文件描述符耗尽）
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Listener {
    name: String,
    inner: TcpListener,
    acceptor: Arc<dyn StreamAcceptor>,
    settings: Arc<RelaySettings>,
    limiter: Option<AcceptLimiter>,
}

impl Listener {
    /// 绑定端口（`SO_REUSEADDR` + 指定 backlog）
    ///
    /// 需要在 tokio 运行时内调用
    pub fn bind(
        config: &ListenerConfig,
        settings: Arc<RelaySettings>,
        acceptor: Arc<dyn StreamAcceptor>,
    ) -> anyhow::Result<Self> {
        let host = config
            .bind_addr
            .trim_start_matches('[')
            .trim_end_matches(']');
        let socket_addr = (host, config.bind_port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve bind address {}", config.endpoint()))?
            .next()
            .with_context(|| format!("No address found for {}", config.endpoint()))?;

        let socket = socket2::Socket::new(
            socket2::Domain::for_address(socket_addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket
            .bind(&socket_addr.into())
            .with_context(|| format!("Failed to bind {}", socket_addr))?;
        let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
        socket.listen(backlog)?;

        let inner = TcpListener::from_std(socket.into())?;

        let limiter = config
            .rate_limit
            .clone()
            .map(AcceptLimiter::new)
            .transpose()?;

        Ok(Self {
            name: config.name.clone(),
            inner,
            acceptor,
            settings,
            limiter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// 运行 accept 循环直到 `shutdown` 完成
    ///
    /// 返回时监听 socket 被关闭；已经在运行的会话不受影响
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = self.local_addr()?;
        info!(
            "Listener '{}' accepting on {} ({})",
            self.name,
            local_addr,
            self.acceptor.mode()
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.inner.accept() => {
                    match result {
                        Ok((stream, peer)) => self.dispatch(stream, peer),
                        Err(e) => {
                            error!("Listener '{}' failed to accept connection: {}", self.name, e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Listener '{}' on {} stopping", self.name, local_addr);
                    break;
                }
            }
        }

        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        if let Some(ref limiter) = self.limiter {
            if let Err(wait_time) = limiter.check() {
                warn!(
                    "Rate limit exceeded on '{}', dropping {} (retry after {:?})",
                    self.name, peer, wait_time
                );
                return;
            }
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let acceptor = Arc::clone(&self.acceptor);
        let settings = Arc::clone(&self.settings);
        let listener = self.name.clone();

        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, peer, acceptor, settings).await {
                if e.is_disconnect() {
                    debug!(listener = %listener, kind = e.kind(), "Session with {} ended: {}", peer, e);
                } else {
                    warn!(listener = %listener, kind = e.kind(), "Session with {} failed: {}", peer, e);
                }
            }
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Arc<dyn StreamAcceptor>,
    settings: Arc<RelaySettings>,
) -> Result<()> {
    let transport = acceptor.wrap(stream).await?;
    let client = Connection::new(Role::Client, Address::from(peer), transport);
    ProxySession::new(client, settings).run().await?;
    Ok(())
}
