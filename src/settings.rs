use crate::registry::BackendRegistry;
use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认拨号超时
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 就绪等待的轮询间隔，只用于重新检查存活状态，不是空闲超时
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 单次读取的临时缓冲区大小
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// 对端积压超过该值时暂停读取另一侧
pub const DEFAULT_MAX_BACKLOG: usize = 32 * DEFAULT_READ_BUFFER_SIZE;

/// 默认的伪装响应原因短语
pub const DEFAULT_DISGUISE_REASON: &str = "Switching Protocols";

/// 未命中签名、也不是 CONNECT 的流量如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTrafficPolicy {
    /// 重建请求后转发到默认后端
    #[default]
    ForwardDefault,
    /// 只回复伪装响应，继续等待下一块数据再分类
    AwaitTunnel,
}

/// 构造 `HTTP/1.1 101 <reason>\r\n\r\n`
pub fn disguise_response(reason: &str) -> Bytes {
    let status = StatusCode::SWITCHING_PROTOCOLS;
    Bytes::from(format!("HTTP/1.1 {} {}\r\n\r\n", status.as_u16(), reason))
}

/// 会话运行时设置
///
/// 启动时由配置构造一次，之后以 `Arc` 只读共享
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub registry: BackendRegistry,
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub read_buffer_size: usize,
    pub max_backlog: usize,
    pub unknown_traffic: UnknownTrafficPolicy,
    pub disguise: Bytes,
}

impl RelaySettings {
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_backlog: DEFAULT_MAX_BACKLOG,
            unknown_traffic: UnknownTrafficPolicy::default(),
            disguise: disguise_response(DEFAULT_DISGUISE_REASON),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::new(BackendRegistry::default())
    }
}
