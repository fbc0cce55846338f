use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, info_span, warn, Instrument};

use dispatch_config::DispatchConfig;
use dispatch_dispatcher::{rank_top, DispatchLifecycleManager};
use dispatch_domain::entities::{Dispatch, DispatchStatus, MatchCriteria, Notification};
use dispatch_domain::events::{topics, DispatchSentEvent, EventEnvelope, RequestCreatedEvent};
use dispatch_domain::messaging::{publish_event, subscribe_typed, EventBus, EventConsumer};
use dispatch_domain::repositories::{NotificationSender, ProviderDirectory};
use dispatch_errors::DispatchResult;

use crate::metrics::{record_offers, record_unmatched};

pub const WORKER_NAME: &str = "dispatch-worker";

/// 一次派单的结果
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub candidates: usize,
    pub dispatches: Vec<Dispatch>,
    pub failed: usize,
    pub notified: bool,
}

/// 为新建的服务请求自动派单
pub struct DispatchWorker {
    directory: Arc<dyn ProviderDirectory>,
    lifecycle: Arc<DispatchLifecycleManager>,
    notifier: Arc<dyn NotificationSender>,
    bus: Arc<dyn EventBus>,
    search_radius_km: f64,
    max_providers: usize,
}

impl DispatchWorker {
    pub fn new(
        directory: Arc<dyn ProviderDirectory>,
        lifecycle: Arc<DispatchLifecycleManager>,
        notifier: Arc<dyn NotificationSender>,
        bus: Arc<dyn EventBus>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            directory,
            lifecycle,
            notifier,
            bus,
            search_radius_km: config.search_radius_km,
            max_providers: config.max_providers_per_dispatch,
        }
    }

    /// 在总线上订阅 `request.created`，必须在总线启动前调用
    pub async fn register(self: &Arc<Self>) -> DispatchResult<()> {
        subscribe_typed::<RequestCreatedEvent, _>(
            self.bus.as_ref(),
            WORKER_NAME,
            Arc::clone(self),
        )
        .await?;
        info!("Dispatch worker subscribed to {}", topics::REQUEST_CREATED);
        Ok(())
    }

    /// 处理一个 request.created 事件
    ///
    /// 目录查询失败直接返回错误；单个派单持久化失败、通知失败、
    /// 汇总事件发布失败都只记录日志。
    pub async fn dispatch_request(
        &self,
        correlation_id: &str,
        event: &RequestCreatedEvent,
    ) -> DispatchResult<DispatchSummary> {
        let criteria = MatchCriteria::new(
            event.latitude,
            event.longitude,
            self.search_radius_km,
            event.category.clone(),
        );
        let candidates = self.directory.find_providers_in_radius(&criteria).await?;

        if candidates.is_empty() {
            info!(category = %event.category, "No providers found for request");
            record_unmatched();
            return Ok(DispatchSummary::default());
        }

        let candidate_count = candidates.len();
        let ranked = rank_top(
            candidates,
            event.latitude,
            event.longitude,
            self.search_radius_km,
            self.max_providers,
        );
        debug!(
            "候选服务商 {} 个，选中 {} 个",
            candidate_count,
            ranked.len()
        );

        let mut dispatches = Vec::with_capacity(ranked.len());
        let mut failed = 0;
        for candidate in &ranked {
            match self
                .lifecycle
                .offer(
                    &event.request_id,
                    candidate.provider_id(),
                    candidate.distance_km,
                    DispatchStatus::Sent,
                )
                .await
            {
                Ok(dispatch) => dispatches.push(dispatch),
                Err(e) => {
                    failed += 1;
                    warn!(
                        provider_id = %candidate.provider_id(),
                        error = %e,
                        "Failed to create dispatch, continuing with remaining providers"
                    );
                }
            }
        }
        record_offers(dispatches.len(), failed);

        let notified = self.notify(event, &dispatches).await;

        let sent = DispatchSentEvent {
            request_id: event.request_id.clone(),
            provider_ids: dispatches.iter().map(|d| d.provider_id.clone()).collect(),
            count: dispatches.len(),
        };
        if let Err(e) =
            publish_event(self.bus.as_ref(), topics::DISPATCH_SENT, correlation_id, &sent).await
        {
            warn!(error = %e, "Failed to publish dispatch.sent event");
        }

        info!(
            candidates = candidate_count,
            created = dispatches.len(),
            failed,
            "Request dispatched"
        );

        Ok(DispatchSummary {
            candidates: candidate_count,
            dispatches,
            failed,
            notified,
        })
    }

    async fn notify(&self, event: &RequestCreatedEvent, dispatches: &[Dispatch]) -> bool {
        if dispatches.is_empty() {
            return false;
        }

        let notifications: Vec<Notification> = dispatches
            .iter()
            .map(|dispatch| Notification {
                provider_id: dispatch.provider_id.clone(),
                title: format!("New {} request", event.category),
                body: event.description.clone(),
                data: HashMap::from([
                    ("dispatch_id".to_string(), dispatch.id.clone()),
                    ("request_id".to_string(), dispatch.request_id.clone()),
                    (
                        "distance_km".to_string(),
                        format!("{:.1}", dispatch.distance_km),
                    ),
                ]),
            })
            .collect();

        match self.notifier.send_batch(&notifications).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    notifications = notifications.len(),
                    error = %e,
                    "Failed to send provider notifications"
                );
                false
            }
        }
    }
}

#[async_trait]
impl EventConsumer<RequestCreatedEvent> for DispatchWorker {
    async fn consume(
        &self,
        envelope: &EventEnvelope,
        event: RequestCreatedEvent,
    ) -> DispatchResult<()> {
        let span = info_span!(
            "dispatch_request",
            request_id = %event.request_id,
            correlation_id = %envelope.correlation_id
        );
        self.dispatch_request(&envelope.correlation_id, &event)
            .instrument(span)
            .await
            .map(|_| ())
    }
}
