use anyhow::{Context, Result};

use crate::address::Address;
use crate::settings::UnknownTrafficPolicy;

use super::{BackendConfig, ListenerConfig, RelayConfig, RelayTuning};

/// RelayConfig Builder
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    listeners: Vec<ListenerConfig>,
    backends: BackendConfig,
    relay: RelayTuning,
}

impl RelayConfigBuilder {
    /// 创建新的 Builder
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加监听器
    pub fn listener(mut self, listener: ListenerConfig) -> Self {
        self.listeners.push(listener);
        self
    }

    /// 设置 SSH 后端
    pub fn ssh_backend(mut self, addr: Address) -> Self {
        self.backends.ssh = addr;
        self
    }

    /// 设置 OpenVPN 后端
    pub fn openvpn_backend(mut self, addr: Address) -> Self {
        self.backends.openvpn = addr;
        self
    }

    /// 设置 VMess 后端
    pub fn vmess_backend(mut self, addr: Address) -> Self {
        self.backends.vmess = addr;
        self
    }

    /// 设置未识别流量的默认后端
    pub fn default_backend(mut self, addr: Address) -> Self {
        self.backends.default = Some(addr);
        self
    }

    /// 设置拨号超时
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.relay.connect_timeout_secs = secs;
        self
    }

    /// 设置 TLS 握手超时
    pub fn handshake_timeout_secs(mut self, secs: u64) -> Self {
        self.relay.handshake_timeout_secs = secs;
        self
    }

    /// 设置未识别流量的处理策略
    pub fn unknown_traffic(mut self, policy: UnknownTrafficPolicy) -> Self {
        self.relay.unknown_traffic = policy;
        self
    }

    /// 设置伪装响应的原因短语
    pub fn disguise_reason(mut self, reason: impl Into<String>) -> Self {
        self.relay.disguise_reason = reason.into();
        self
    }

    /// 设置单方向积压上限
    pub fn max_backlog_bytes(mut self, bytes: usize) -> Self {
        self.relay.max_backlog_bytes = bytes;
        self
    }

    /// 设置文件描述符限制目标
    pub fn nofile_limit(mut self, limit: u64) -> Self {
        self.relay.nofile_limit = limit;
        self
    }

    /// 构建 RelayConfig 并验证
    pub fn build(self) -> Result<RelayConfig> {
        let config = RelayConfig {
            listeners: self.listeners,
            backends: self.backends,
            relay: self.relay,
        };
        config.validate().context("Invalid relay configuration")?;
        Ok(config)
    }
}
