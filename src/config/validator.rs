use anyhow::{bail, Result};
use std::collections::HashSet;
use tracing::warn;

use super::{ListenerConfig, RelayConfig, RelayTuning, TlsListenerConfig};
use crate::rate_limiter::RateLimitConfig;

/// 单次读取缓冲区的允许范围
const MIN_READ_BUFFER: usize = 512;
const MAX_READ_BUFFER: usize = 1024 * 1024;
const MAX_BACKLOG_LIMIT: usize = 64 * 1024 * 1024;

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证端口号
    pub fn validate_port(port: u16, context: &str) -> Result<()> {
        if port == 0 {
            bail!("{}: port cannot be 0", context);
        }
        Ok(())
    }

    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            bail!("{}: address cannot be empty", context);
        }
        Ok(())
    }

    /// 验证名称不为空
    pub fn validate_name(name: &str, context: &str) -> Result<()> {
        if name.trim().is_empty() {
            bail!("{}: name cannot be empty", context);
        }
        Ok(())
    }

    /// 验证完整配置
    pub fn validate_relay_config(config: &RelayConfig) -> Result<()> {
        if config.listeners.is_empty() {
            bail!("At least one [[listeners]] entry is required");
        }

        let mut names = HashSet::new();
        let mut endpoints = HashSet::new();
        for listener in &config.listeners {
            Self::validate_listener(listener)?;

            if !names.insert(listener.name.as_str()) {
                bail!("Duplicate listener name '{}'", listener.name);
            }
            if !endpoints.insert(listener.endpoint()) {
                bail!(
                    "Listener '{}': endpoint {} is already used by another listener",
                    listener.name,
                    listener.endpoint()
                );
            }
        }

        Self::validate_tuning(&config.relay)
    }

    /// 验证单个监听器
    pub fn validate_listener(listener: &ListenerConfig) -> Result<()> {
        Self::validate_name(&listener.name, "Listener")?;
        let context = format!("Listener '{}'", listener.name);
        Self::validate_address(&listener.bind_addr, &context)?;
        Self::validate_port(listener.bind_port, &context)?;

        if listener.backlog == 0 {
            bail!("{}: backlog must be greater than 0", context);
        }
        if let Some(ref tls) = listener.tls {
            Self::validate_tls(tls, &context)?;
        }
        if let Some(ref rate_limit) = listener.rate_limit {
            Self::validate_rate_limit_config(rate_limit)?;
        }
        Ok(())
    }

    /// 只有私钥没有证书是无效的
    pub fn validate_tls(tls: &TlsListenerConfig, context: &str) -> Result<()> {
        if tls.cert_path.is_none() && tls.key_path.is_some() {
            bail!(
                "{}: key_path requires cert_path (omit both to auto-generate a certificate)",
                context
            );
        }
        Ok(())
    }

    /// 验证速率限制配置
    pub fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<()> {
        if config.requests_per_second == 0 {
            bail!("rate_limit.requests_per_second must be greater than 0");
        }
        if config.burst_size == 0 {
            bail!("rate_limit.burst_size must be greater than 0");
        }
        if config.burst_size < config.requests_per_second {
            warn!(
                "rate_limit.burst_size ({}) is less than requests_per_second ({}), \
                 this may cause frequent rate limiting",
                config.burst_size, config.requests_per_second
            );
        }
        Ok(())
    }

    /// 验证会话参数
    pub fn validate_tuning(tuning: &RelayTuning) -> Result<()> {
        if tuning.connect_timeout_secs == 0 {
            bail!("relay.connect_timeout_secs must be greater than 0");
        }
        if tuning.handshake_timeout_secs == 0 {
            bail!("relay.handshake_timeout_secs must be greater than 0");
        }
        if tuning.poll_interval_ms == 0 {
            bail!("relay.poll_interval_ms must be greater than 0");
        }
        if !(MIN_READ_BUFFER..=MAX_READ_BUFFER).contains(&tuning.read_buffer_size) {
            bail!(
                "relay.read_buffer_size must be between {} and {} (current: {})",
                MIN_READ_BUFFER,
                MAX_READ_BUFFER,
                tuning.read_buffer_size
            );
        }
        if tuning.max_backlog_bytes < tuning.read_buffer_size
            || tuning.max_backlog_bytes > MAX_BACKLOG_LIMIT
        {
            bail!(
                "relay.max_backlog_bytes must be between read_buffer_size ({}) and {} (current: {})",
                tuning.read_buffer_size,
                MAX_BACKLOG_LIMIT,
                tuning.max_backlog_bytes
            );
        }

        let reason = tuning.disguise_reason.trim();
        if reason.is_empty() {
            bail!("relay.disguise_reason cannot be empty");
        }
        if reason.contains(['\r', '\n']) {
            bail!("relay.disguise_reason cannot contain line breaks");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;

    fn config_with(listeners: Vec<ListenerConfig>) -> RelayConfig {
        RelayConfig {
            listeners,
            backends: Default::default(),
            relay: Default::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = config_with(vec![
            ListenerConfig::plain("http", "0.0.0.0", 80),
            ListenerConfig::plain("https", "0.0.0.0", 443).with_tls(TlsListenerConfig::default()),
        ]);
        assert!(ConfigValidator::validate_relay_config(&config).is_ok());
    }

    #[test]
    fn test_requires_listener() {
        assert!(ConfigValidator::validate_relay_config(&config_with(vec![])).is_err());
    }

    #[test]
    fn test_duplicate_names_and_endpoints() {
        let config = config_with(vec![
            ListenerConfig::plain("a", "0.0.0.0", 80),
            ListenerConfig::plain("a", "0.0.0.0", 81),
        ]);
        let err = ConfigValidator::validate_relay_config(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate listener name"));

        let config = config_with(vec![
            ListenerConfig::plain("a", "0.0.0.0", 80),
            ListenerConfig::plain("b", "0.0.0.0", 80),
        ]);
        let err = ConfigValidator::validate_relay_config(&config).unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[test]
    fn test_listener_fields() {
        assert!(ConfigValidator::validate_listener(&ListenerConfig::plain("", "0.0.0.0", 80)).is_err());
        assert!(ConfigValidator::validate_listener(&ListenerConfig::plain("x", " ", 80)).is_err());
        assert!(ConfigValidator::validate_listener(&ListenerConfig::plain("x", "0.0.0.0", 0)).is_err());
        assert!(ConfigValidator::validate_listener(
            &ListenerConfig::plain("x", "0.0.0.0", 80).with_backlog(0)
        )
        .is_err());
    }

    #[test]
    fn test_tls_key_without_cert() {
        let tls = TlsListenerConfig {
            cert_path: None,
            key_path: Some("key.pem".into()),
        };
        assert!(ConfigValidator::validate_tls(&tls, "Listener 'x'").is_err());

        let combined = TlsListenerConfig {
            cert_path: Some("combined.pem".into()),
            key_path: None,
        };
        assert!(ConfigValidator::validate_tls(&combined, "Listener 'x'").is_ok());
    }

    #[test]
    fn test_rate_limit_values() {
        let zero = RateLimitConfig {
            requests_per_second: 0,
            burst_size: 1,
        };
        assert!(ConfigValidator::validate_rate_limit_config(&zero).is_err());
        assert!(ConfigValidator::validate_rate_limit_config(&RateLimitConfig::default()).is_ok());
    }

    #[test]
    fn test_tuning_bounds() {
        let mut tuning = RelayTuning::default();
        assert!(ConfigValidator::validate_tuning(&tuning).is_ok());

        tuning.read_buffer_size = 100;
        assert!(ConfigValidator::validate_tuning(&tuning).is_err());
        tuning.read_buffer_size = 2 * 1024 * 1024;
        assert!(ConfigValidator::validate_tuning(&tuning).is_err());
        tuning.read_buffer_size = 512;
        assert!(ConfigValidator::validate_tuning(&tuning).is_ok());

        tuning.max_backlog_bytes = 256;
        assert!(ConfigValidator::validate_tuning(&tuning).is_err());
        tuning.max_backlog_bytes = 128 * 1024 * 1024;
        assert!(ConfigValidator::validate_tuning(&tuning).is_err());
        tuning.max_backlog_bytes = 512;
        assert!(ConfigValidator::validate_tuning(&tuning).is_ok());

        tuning.connect_timeout_secs = 0;
        assert!(ConfigValidator::validate_tuning(&tuning).is_err());
        tuning.connect_timeout_secs = 5;

        tuning.disguise_reason = "OK\r\nX-Injected: 1".to_string();
        assert!(ConfigValidator::validate_tuning(&tuning).is_err());
        tuning.disguise_reason = "   ".to_string();
        assert!(ConfigValidator::validate_tuning(&tuning).is_err());
    }
}
