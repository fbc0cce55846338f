//! 按键限流
//!
//! 每个键一个令牌桶（governor），键通常是 `provider:<id>` 或客户端地址。

use dispatch_config::RateLimitConfig;
use dispatch_errors::{DispatchError, DispatchResult};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub struct KeyedRateLimiter {
    config: RateLimitConfig,
    limiters: Arc<RwLock<HashMap<String, Arc<DefaultDirectRateLimiter>>>>,
}

impl std::fmt::Debug for KeyedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRateLimiter")
            .field("config", &self.config)
            .field("limiters", &"<HashMap>")
            .finish()
    }
}

impl KeyedRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 消耗一个令牌；超限返回 RateLimited
    pub async fn check(&self, key: &str) -> DispatchResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let limiter = self.get_or_create_limiter(key).await;
        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let retry_after = not_until.wait_time_from(DefaultClock::default().now());
                debug!(key = %key, retry_after_ms = retry_after.as_millis() as u64, "Rate limited");
                Err(DispatchError::RateLimited {
                    key: key.to_string(),
                    retry_after_ms: retry_after.as_millis() as u64,
                })
            }
        }
    }

    pub async fn tracked_keys(&self) -> usize {
        self.limiters.read().await.len()
    }

    async fn get_or_create_limiter(&self, key: &str) -> Arc<DefaultDirectRateLimiter> {
        {
            let read_guard = self.limiters.read().await;
            if let Some(limiter) = read_guard.get(key) {
                return Arc::clone(limiter);
            }
        }

        let mut write_guard = self.limiters.write().await;

        // 拿到写锁后再检查一次
        if let Some(limiter) = write_guard.get(key) {
            return Arc::clone(limiter);
        }

        let rate =
            NonZeroU32::new(self.config.requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.config.burst.max(1)).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)));

        write_guard.insert(key.to_string(), Arc::clone(&limiter));
        limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rps: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst,
        }
    }

    #[tokio::test]
    async fn test_burst_then_limited() {
        let limiter = KeyedRateLimiter::new(config(1, 2));

        limiter.check("provider:p1").await.unwrap();
        limiter.check("provider:p1").await.unwrap();
        let err = limiter.check("provider:p1").await.unwrap_err();

        match err {
            DispatchError::RateLimited { key, retry_after_ms } => {
                assert_eq!(key, "provider:p1");
                assert!(retry_after_ms <= 1000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = KeyedRateLimiter::new(config(1, 1));

        limiter.check("provider:p1").await.unwrap();
        assert!(limiter.check("provider:p1").await.is_err());
        limiter.check("provider:p2").await.unwrap();
        assert_eq!(limiter.tracked_keys().await, 2);
    }

    #[tokio::test]
    async fn test_disabled_never_limits() {
        let limiter = KeyedRateLimiter::new(RateLimitConfig {
            enabled: false,
            requests_per_second: 1,
            burst: 1,
        });
        for _ in 0..10 {
            limiter.check("k").await.unwrap();
        }
        assert_eq!(limiter.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_single_limiter() {
        let limiter = Arc::new(KeyedRateLimiter::new(config(1, 100)));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.check("shared").await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(limiter.tracked_keys().await, 1);
    }
}
