use crate::error::{RelayError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// 传输层连接抽象
///
/// 统一封装明文 TCP 和服务端 TLS 流
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Transport
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 装箱后的传输流，连接只持有这一种类型
pub type BoxedStream = Box<dyn Transport>;

/// 监听器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListenerMode {
    /// 明文 TCP
    #[default]
    Plain,
    /// 服务端 TLS
    Tls,
}

impl std::fmt::Display for ListenerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerMode::Plain => write!(f, "plain"),
            ListenerMode::Tls => write!(f, "tls"),
        }
    }
}

/// 把刚 accept 的 TCP 流包装成客户端传输流
///
/// 在每个连接自己的任务里调用，TLS 握手不会阻塞 accept 循环
#[async_trait]
pub trait StreamAcceptor: Send + Sync {
    async fn wrap(&self, stream: TcpStream) -> Result<BoxedStream>;

    fn mode(&self) -> ListenerMode;
}

/// 明文：直接使用 TCP 流
pub struct PlainAcceptor;

#[async_trait]
impl StreamAcceptor for PlainAcceptor {
    async fn wrap(&self, stream: TcpStream) -> Result<BoxedStream> {
        Ok(Box::new(stream))
    }

    fn mode(&self) -> ListenerMode {
        ListenerMode::Plain
    }
}

/// TLS：先完成服务端握手
pub struct TlsStreamAcceptor {
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl TlsStreamAcceptor {
    pub fn new(acceptor: TlsAcceptor, handshake_timeout: Duration) -> Self {
        Self {
            acceptor,
            handshake_timeout,
        }
    }
}

#[async_trait]
impl StreamAcceptor for TlsStreamAcceptor {
    async fn wrap(&self, stream: TcpStream) -> Result<BoxedStream> {
        let handshake = self.acceptor.accept(stream);
        match tokio::time::timeout(self.handshake_timeout, handshake).await {
            Ok(Ok(tls_stream)) => {
                debug!("TLS handshake completed");
                Ok(Box::new(tls_stream))
            }
            Ok(Err(e)) => Err(RelayError::TlsHandshake(e)),
            Err(_) => Err(RelayError::TlsHandshake(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("handshake not completed within {:?}", self.handshake_timeout),
            ))),
        }
    }

    fn mode(&self) -> ListenerMode {
        ListenerMode::Tls
    }
}
