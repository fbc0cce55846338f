//! 派单状态机
//!
//! ```text
//! pending/sent --accept(服务商)--> accepted
//! pending/sent --reject(服务商)--> rejected
//! pending/sent --expire()-------> expired   (now > expires_at)
//! ```
//!
//! 派单的 `status` 只由这里写入。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use dispatch_config::DispatchConfig;
use dispatch_domain::entities::{Dispatch, DispatchStatus};
use dispatch_domain::events::{DispatchOutcomeEvent, DomainEvent};
use dispatch_domain::messaging::EventBus;
use dispatch_domain::repositories::DispatchRepository;
use dispatch_errors::{DispatchError, DispatchResult};
use dispatch_infrastructure::KeyedRateLimiter;

/// 服务商对派单的响应
#[derive(Debug, Clone, Copy)]
enum Response {
    Accept,
    Reject,
}

impl Response {
    fn target(self) -> DispatchStatus {
        match self {
            Response::Accept => DispatchStatus::Accepted,
            Response::Reject => DispatchStatus::Rejected,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Response::Accept => "accept",
            Response::Reject => "reject",
        }
    }
}

pub struct DispatchLifecycleManager {
    repository: Arc<dyn DispatchRepository>,
    offer_window: Duration,
    rate_limiter: Option<Arc<KeyedRateLimiter>>,
    outcome_bus: Option<Arc<dyn EventBus>>,
}

impl DispatchLifecycleManager {
    pub fn new(repository: Arc<dyn DispatchRepository>, config: &DispatchConfig) -> Self {
        Self {
            repository,
            offer_window: Duration::seconds(config.offer_window_seconds as i64),
            rate_limiter: None,
            outcome_bus: None,
        }
    }

    /// accept/reject 前按 `provider:<id>` 限流
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<KeyedRateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// 发布 dispatch.accepted / rejected / expired 事件
    pub fn with_outcome_events(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.outcome_bus = Some(bus);
        self
    }

    pub fn offer_window(&self) -> Duration {
        self.offer_window
    }

    /// 持久化一条新派单，只接受 pending 或 sent 状态
    pub async fn create(&self, dispatch: &Dispatch) -> DispatchResult<()> {
        if !dispatch.is_open() {
            return Err(DispatchError::validation_error(format!(
                "新派单的状态必须是 pending 或 sent，实际为 {}",
                dispatch.status
            )));
        }
        self.repository.create(dispatch).await?;
        debug!("创建派单: {}", dispatch.entity_description());
        Ok(())
    }

    /// 以当前时间和报价窗口生成并保存派单
    pub async fn offer(
        &self,
        request_id: &str,
        provider_id: &str,
        distance_km: f64,
        status: DispatchStatus,
    ) -> DispatchResult<Dispatch> {
        let dispatch = Dispatch::new_offer(
            request_id,
            provider_id,
            distance_km,
            status,
            Utc::now(),
            self.offer_window,
        );
        self.create(&dispatch).await?;
        Ok(dispatch)
    }

    #[instrument(skip_all, fields(dispatch_id = %id, provider_id = %caller_provider_id))]
    pub async fn accept(&self, id: &str, caller_provider_id: &str) -> DispatchResult<Dispatch> {
        self.respond(id, caller_provider_id, Response::Accept).await
    }

    #[instrument(skip_all, fields(dispatch_id = %id, provider_id = %caller_provider_id))]
    pub async fn reject(&self, id: &str, caller_provider_id: &str) -> DispatchResult<Dispatch> {
        self.respond(id, caller_provider_id, Response::Reject).await
    }

    async fn respond(
        &self,
        id: &str,
        caller_provider_id: &str,
        response: Response,
    ) -> DispatchResult<Dispatch> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.check(&format!("provider:{caller_provider_id}")).await?;
        }

        let mut dispatch = self.get(id).await?;
        let now = Utc::now();
        match response {
            Response::Accept => dispatch.accept(caller_provider_id, now)?,
            Response::Reject => dispatch.reject(caller_provider_id, now)?,
        }

        // 条件更新失败说明状态已被并发修改
        let updated = self
            .repository
            .transition_status(id, &DispatchStatus::OPEN, response.target(), now)
            .await?;
        if !updated {
            let current = self
                .repository
                .get_by_id(id)
                .await?
                .map(|d| d.status.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(DispatchError::invalid_transition(
                "dispatch",
                id,
                current,
                response.as_str(),
            ));
        }

        info!(
            dispatch_id = %dispatch.id,
            request_id = %dispatch.request_id,
            action = response.as_str(),
            "Dispatch answered by provider"
        );
        self.publish_outcome(&dispatch).await;
        Ok(dispatch)
    }

    /// 把所有超过报价窗口的 open 派单置为 expired，返回受影响的数量
    pub async fn expire_old(&self, now: DateTime<Utc>) -> DispatchResult<usize> {
        let expired = self.repository.expire_old(now).await?;
        if !expired.is_empty() {
            info!("Expired {} dispatches", expired.len());
        }
        for dispatch in &expired {
            self.publish_outcome(dispatch).await;
        }
        Ok(expired.len())
    }

    pub async fn get(&self, id: &str) -> DispatchResult<Dispatch> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| DispatchError::dispatch_not_found(id))
    }

    pub async fn list_by_request(&self, request_id: &str) -> DispatchResult<Vec<Dispatch>> {
        self.repository.list_by_request(request_id).await
    }

    /// 服务商尚未响应且未过期的派单
    pub async fn list_pending_for_provider(
        &self,
        provider_id: &str,
    ) -> DispatchResult<Vec<Dispatch>> {
        self.repository
            .list_pending_by_provider(provider_id, Utc::now())
            .await
    }

    async fn publish_outcome(&self, dispatch: &Dispatch) {
        let Some(bus) = &self.outcome_bus else {
            return;
        };
        let outcome = DispatchOutcomeEvent {
            dispatch_id: dispatch.id.clone(),
            request_id: dispatch.request_id.clone(),
            provider_id: dispatch.provider_id.clone(),
            status: dispatch.status,
        };
        let Some(event) = DomainEvent::dispatch_outcome(outcome) else {
            return;
        };

        let result = async {
            let envelope = event.to_envelope(&dispatch.request_id)?;
            bus.publish(event.topic(), envelope.to_bytes()?).await
        }
        .await;
        if let Err(e) = result {
            warn!(
                dispatch_id = %dispatch.id,
                topic = event.topic(),
                error = %e,
                "Failed to publish dispatch outcome event"
            );
        }
    }
}
