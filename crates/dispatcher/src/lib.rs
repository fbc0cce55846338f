//! 派单核心
//!
//! 地理匹配、派单状态机、过期扫描以及服务请求生命周期。

pub mod expiry;
pub mod lifecycle;
pub mod matching;
pub mod requests;

pub use expiry::ExpirySweeper;
pub use lifecycle::DispatchLifecycleManager;
pub use matching::{rank, rank_top, MatchingService};
pub use requests::{NewServiceRequest, RequestLifecycleService};
