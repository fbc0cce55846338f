//! 领域仓储与外部端口抽象
//!
//! 定义数据访问和外部协作方的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    Dispatch, DispatchStatus, MatchCriteria, Notification, ProviderCandidate, ServiceRequest,
};
use dispatch_errors::DispatchResult;

/// 派单仓储抽象
#[async_trait]
pub trait DispatchRepository: Send + Sync {
    async fn create(&self, dispatch: &Dispatch) -> DispatchResult<()>;
    async fn get_by_id(&self, id: &str) -> DispatchResult<Option<Dispatch>>;
    /// 条件更新：仅当当前状态属于 `expected` 时写入新状态，返回是否更新成功
    async fn transition_status(
        &self,
        id: &str,
        expected: &[DispatchStatus],
        new_status: DispatchStatus,
        updated_at: DateTime<Utc>,
    ) -> DispatchResult<bool>;
    async fn list_by_request(&self, request_id: &str) -> DispatchResult<Vec<Dispatch>>;
    /// 服务商名下仍可响应的派单
    async fn list_pending_by_provider(
        &self,
        provider_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<Vec<Dispatch>>;
    /// 将所有超时的 pending/sent 派单置为 expired，返回受影响的派单
    async fn expire_old(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Dispatch>>;
}

/// 服务请求仓储抽象
#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn create(&self, request: &ServiceRequest) -> DispatchResult<()>;
    async fn get_by_id(&self, id: &str) -> DispatchResult<Option<ServiceRequest>>;
    async fn update(&self, request: &ServiceRequest) -> DispatchResult<()>;
}

/// 服务商目录
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// 返回指定范围内、服务于该类别的候选者，顺序不保证
    async fn find_providers_in_radius(
        &self,
        criteria: &MatchCriteria,
    ) -> DispatchResult<Vec<ProviderCandidate>>;
}

/// 通知发送端口
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 批量发送；失败返回 Delivery 错误
    async fn send_batch(&self, notifications: &[Notification]) -> DispatchResult<()>;
}
