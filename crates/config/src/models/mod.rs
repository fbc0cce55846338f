pub mod app_config;
pub mod database;
pub mod dispatch;
pub mod metrics;
pub mod rate_limit;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatch::{BusConfig, DispatchConfig};
pub use metrics::MetricsConfig;
pub use rate_limit::RateLimitConfig;
