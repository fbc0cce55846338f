//! 派单 Worker
//!
//! 订阅 `request.created`，为每个新请求挑选服务商、创建派单并推送通知。

pub mod metrics;
pub mod service;

pub use service::{DispatchSummary, DispatchWorker, WORKER_NAME};
