use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 派单相关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 服务商响应窗口（秒）
    pub offer_window_seconds: u64,
    /// 服务商检索半径（公里）
    pub search_radius_km: f64,
    /// 每个请求最多派给多少个服务商
    pub max_providers_per_dispatch: usize,
    /// 过期扫描间隔（秒）
    pub expiry_sweep_interval_seconds: u64,
    /// 是否发布 dispatch.accepted / rejected / expired 事件
    pub emit_outcome_events: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_window_seconds: 300,
            search_radius_km: 50.0,
            max_providers_per_dispatch: 5,
            expiry_sweep_interval_seconds: 30,
            emit_outcome_events: false,
        }
    }
}

impl ConfigValidator for DispatchConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(
            self.offer_window_seconds,
            86_400,
            "dispatch.offer_window_seconds",
        )?;
        ValidationUtils::validate_positive_km(self.search_radius_km, "dispatch.search_radius_km")?;
        ValidationUtils::validate_count(
            self.max_providers_per_dispatch,
            100,
            "dispatch.max_providers_per_dispatch",
        )?;
        ValidationUtils::validate_seconds(
            self.expiry_sweep_interval_seconds,
            3600,
            "dispatch.expiry_sweep_interval_seconds",
        )?;
        Ok(())
    }
}

/// 进程内事件总线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 队列容量，满时发布方等待
    pub buffer_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

impl ConfigValidator for BusConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.buffer_size, 1_000_000, "bus.buffer_size")
    }
}
