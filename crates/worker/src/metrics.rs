//! Worker 指标

use metrics::{counter, describe_counter};

/// 成功创建的派单数
pub const OFFERS_CREATED: &str = "dispatch_offers_created_total";

/// 持久化失败而跳过的派单数
pub const OFFERS_FAILED: &str = "dispatch_offers_failed_total";

/// 半径内没有候选服务商的请求数
pub const REQUESTS_UNMATCHED: &str = "dispatch_requests_unmatched_total";

/// 注册指标描述，在安装 recorder 之后调用一次
pub fn register_metrics() {
    describe_counter!(OFFERS_CREATED, "Total dispatch offers created by the worker");
    describe_counter!(OFFERS_FAILED, "Total dispatch offers skipped after a persistence error");
    describe_counter!(REQUESTS_UNMATCHED, "Total requests with no eligible provider");
}

pub(crate) fn record_offers(created: usize, failed: usize) {
    counter!(OFFERS_CREATED).increment(created as u64);
    if failed > 0 {
        counter!(OFFERS_FAILED).increment(failed as u64);
    }
}

pub(crate) fn record_unmatched() {
    counter!(REQUESTS_UNMATCHED).increment(1);
}
