// 配置管理模块 - 使用模块化设计

mod builder;
mod validator;

pub use builder::RelayConfigBuilder;
pub use validator::ConfigValidator;

use crate::address::Address;
use crate::rate_limiter::RateLimitConfig;
use crate::registry::BackendRegistry;
use crate::settings::{
    disguise_response, RelaySettings, UnknownTrafficPolicy, DEFAULT_DISGUISE_REASON,
    DEFAULT_MAX_BACKLOG, DEFAULT_READ_BUFFER_SIZE,
};
use crate::transport::ListenerMode;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_backlog() -> u32 {
    128
}

/// 监听器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// 监听器名称，用于日志
    pub name: String,
    /// 监听地址
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// 监听端口
    pub bind_port: u16,
    /// listen 队列长度
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// 配置后以 TLS 方式接入
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsListenerConfig>,
    /// 接入速率限制（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

impl ListenerConfig {
    /// 明文监听器
    pub fn plain(name: impl Into<String>, bind_addr: impl Into<String>, bind_port: u16) -> Self {
        Self {
            name: name.into(),
            bind_addr: bind_addr.into(),
            bind_port,
            backlog: default_backlog(),
            tls: None,
            rate_limit: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsListenerConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn mode(&self) -> ListenerMode {
        if self.tls.is_some() {
            ListenerMode::Tls
        } else {
            ListenerMode::Plain
        }
    }

    /// `bind_addr:bind_port`，IPv6 地址加方括号
    pub fn endpoint(&self) -> String {
        Address::new(self.bind_addr.clone(), self.bind_port).to_string()
    }
}

/// TLS 监听器的证书配置
///
/// 两个路径都省略时启动阶段自动生成自签名证书；只给 `cert_path` 时
/// 该文件需同时包含证书和私钥
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsListenerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
}

impl TlsListenerConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
        }
    }

    /// 需要自动生成证书
    pub fn auto_generate() -> Self {
        Self::default()
    }

    /// 证书和私钥路径；`None` 表示需要自动生成
    pub fn resolved_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            (Some(combined), None) => Some((combined.clone(), combined.clone())),
            _ => None,
        }
    }
}

/// 后端地址表
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub ssh: Address,
    pub openvpn: Address,
    pub vmess: Address,
    /// 未识别流量的去向，默认与 ssh 相同
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Address>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let registry = BackendRegistry::default();
        Self {
            ssh: registry.ssh().clone(),
            openvpn: registry.openvpn().clone(),
            vmess: registry.vmess().clone(),
            default: None,
        }
    }
}

impl BackendConfig {
    pub fn registry(&self) -> BackendRegistry {
        let registry =
            BackendRegistry::new(self.ssh.clone(), self.openvpn.clone(), self.vmess.clone());
        match &self.default {
            Some(default) => registry.with_default(default.clone()),
            None => registry,
        }
    }
}

/// 会话行为参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayTuning {
    /// 后端拨号超时（秒）
    pub connect_timeout_secs: u64,
    /// TLS 握手超时（秒）
    pub handshake_timeout_secs: u64,
    /// 会话循环的存活检查间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 单次读取的缓冲区大小
    pub read_buffer_size: usize,
    /// 单个方向允许积压的最大字节数，超过后暂停读取对侧
    pub max_backlog_bytes: usize,
    /// 未识别流量的处理策略
    pub unknown_traffic: UnknownTrafficPolicy,
    /// 伪装响应的原因短语
    pub disguise_reason: String,
    /// 启动时把文件描述符软限制提高到该值
    pub nofile_limit: u64,
}

impl Default for RelayTuning {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            handshake_timeout_secs: 10,
            poll_interval_ms: 1000,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_backlog_bytes: DEFAULT_MAX_BACKLOG,
            unknown_traffic: UnknownTrafficPolicy::default(),
            disguise_reason: DEFAULT_DISGUISE_REASON.to_string(),
            nofile_limit: 65536,
        }
    }
}

impl RelayTuning {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// 完整的中继配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub backends: BackendConfig,
    #[serde(default)]
    pub relay: RelayTuning,
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_relay_config(self)
    }

    /// 从 TOML 文本解析并验证
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: RelayConfig =
            toml::from_str(content).context("Failed to parse relay configuration")?;
        config
            .validate()
            .context("Relay configuration validation failed")?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        Self::from_toml(&content)
    }

    /// 会话共享的只读设置
    pub fn to_settings(&self) -> RelaySettings {
        let mut settings = RelaySettings::new(self.backends.registry());
        settings.connect_timeout = self.relay.connect_timeout();
        settings.poll_interval = self.relay.poll_interval();
        settings.read_buffer_size = self.relay.read_buffer_size;
        settings.max_backlog = self.relay.max_backlog_bytes;
        settings.unknown_traffic = self.relay.unknown_traffic;
        settings.disguise = disguise_response(&self.relay.disguise_reason);
        settings
    }
}
