use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 按键限流配置（令牌桶）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10,
            burst: 20,
        }
    }
}

impl ConfigValidator for RateLimitConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }
        ValidationUtils::validate_count(
            self.requests_per_second as usize,
            100_000,
            "rate_limit.requests_per_second",
        )?;
        ValidationUtils::validate_count(self.burst as usize, 100_000, "rate_limit.burst")?;
        Ok(())
    }
}
