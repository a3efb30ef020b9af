/// 接入速率限制
///
/// 每个监听器一个 token bucket；超出配额的新连接直接关闭
use crate::error::{RelayError, Result};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// 速率限制配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 每秒允许的新连接数
    pub requests_per_second: u32,
    /// 突发容量
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100,
            burst_size: 200,
        }
    }
}

#[derive(Clone)]
pub struct AcceptLimiter {
    inner: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    config: RateLimitConfig,
}

impl AcceptLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        let rate = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            RelayError::config("rate_limit.requests_per_second must be greater than 0")
        })?;
        let burst = NonZeroU32::new(config.burst_size)
            .ok_or_else(|| RelayError::config("rate_limit.burst_size must be greater than 0"))?;

        let quota = Quota::per_second(rate).allow_burst(burst);
        Ok(Self {
            inner: Arc::new(GovernorLimiter::direct(quota)),
            config,
        })
    }

    /// 非阻塞地取一个令牌；被限流时返回还需等待的时间
    pub fn check(&self) -> std::result::Result<(), Duration> {
        self.inner
            .check()
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }
}

impl std::fmt::Debug for AcceptLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptLimiter")
            .field("config", &self.config)
            .finish()
    }
}
