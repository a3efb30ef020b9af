/// 自定义错误类型
///
/// 会话内的所有失败都收敛为 `RelayError`，由监听器在会话边界记录日志
use std::io;
use std::time::Duration;
use thiserror::Error;

/// 中继的主要错误类型
#[derive(Error, Debug)]
pub enum RelayError {
    /// Socket 读写失败
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 后端拨号失败
    #[error("Failed to connect to backend {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 后端拨号超时
    #[error("Connecting to backend {addr} timed out after {duration:?}")]
    DialTimeout { addr: String, duration: Duration },

    /// 无法解析的 HTTP 请求
    #[error("Malformed HTTP request: {0}")]
    MalformedRequest(String),

    /// TLS 握手失败
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(#[source] io::Error),

    /// 试图写入或排队零字节
    #[error("Refusing to queue or write an empty buffer")]
    EmptyWrite,

    /// 连接已关闭
    #[error("Connection to {0} is already closed")]
    ConnectionClosed(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// 创建拨号失败错误
    pub fn dial(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Dial {
            addr: addr.into(),
            source,
        }
    }

    /// 创建拨号超时错误
    pub fn dial_timeout(addr: impl Into<String>, duration: Duration) -> Self {
        Self::DialTimeout {
            addr: addr.into(),
            duration,
        }
    }

    /// 创建请求解析错误
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 错误类别，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Dial { .. } => "dial",
            Self::DialTimeout { .. } => "dial_timeout",
            Self::MalformedRequest(_) => "malformed_request",
            Self::TlsHandshake(_) => "tls_handshake",
            Self::EmptyWrite => "empty_write",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::Config(_) => "config",
        }
    }

    /// 是否为拨号阶段的错误（超时或拒绝）
    pub fn is_dial_failure(&self) -> bool {
        matches!(self, Self::Dial { .. } | Self::DialTimeout { .. })
    }

    /// 对端正常断开类的 I/O 错误，记录为 debug 即可
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
