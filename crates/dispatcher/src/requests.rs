//! 服务请求生命周期
//!
//! open → accepted → in_progress → completed，open|accepted → cancelled。
//! 每次状态变更成功后发布对应事件，correlation_id 为请求ID。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use dispatch_domain::entities::ServiceRequest;
use dispatch_domain::events::{DomainEvent, RequestCreatedEvent};
use dispatch_domain::messaging::EventBus;
use dispatch_domain::repositories::RequestRepository;
use dispatch_errors::{DispatchError, DispatchResult};

/// 创建请求的输入
#[derive(Debug, Clone)]
pub struct NewServiceRequest {
    pub customer_id: String,
    pub category: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub service_id: Option<String>,
}

impl NewServiceRequest {
    fn validate(&self) -> DispatchResult<()> {
        if self.customer_id.trim().is_empty() {
            return Err(DispatchError::validation_error("customer_id 不能为空"));
        }
        if self.category.trim().is_empty() {
            return Err(DispatchError::validation_error("category 不能为空"));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(DispatchError::validation_error(format!(
                "纬度超出范围: {}",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(DispatchError::validation_error(format!(
                "经度超出范围: {}",
                self.longitude
            )));
        }
        Ok(())
    }
}

pub struct RequestLifecycleService {
    repository: Arc<dyn RequestRepository>,
    bus: Arc<dyn EventBus>,
}

impl RequestLifecycleService {
    pub fn new(repository: Arc<dyn RequestRepository>, bus: Arc<dyn EventBus>) -> Self {
        Self { repository, bus }
    }

    #[instrument(
        skip(self, input),
        fields(customer_id = %input.customer_id, category = %input.category)
    )]
    pub async fn create(&self, input: NewServiceRequest) -> DispatchResult<ServiceRequest> {
        input.validate()?;

        let mut request = ServiceRequest::new(
            input.customer_id,
            input.category,
            input.description,
            input.latitude,
            input.longitude,
        );
        request.service_id = input.service_id;
        self.repository.create(&request).await?;

        info!(request_id = %request.id, "Service request created");
        self.publish(DomainEvent::RequestCreated(RequestCreatedEvent::from(&request)), &request.id)
            .await;
        Ok(request)
    }

    pub async fn get(&self, id: &str) -> DispatchResult<ServiceRequest> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| DispatchError::request_not_found(id))
    }

    pub async fn accept(&self, id: &str, provider_id: &str) -> DispatchResult<ServiceRequest> {
        let mut request = self.get(id).await?;
        request.accept(provider_id, Utc::now())?;
        self.save(&request).await?;
        self.publish(DomainEvent::RequestAccepted(request.clone()), &request.id)
            .await;
        Ok(request)
    }

    pub async fn start(&self, id: &str, provider_id: &str) -> DispatchResult<ServiceRequest> {
        let mut request = self.get(id).await?;
        request.start(provider_id, Utc::now())?;
        self.save(&request).await?;
        self.publish(DomainEvent::RequestStarted(request.clone()), &request.id)
            .await;
        Ok(request)
    }

    pub async fn complete(&self, id: &str, provider_id: &str) -> DispatchResult<ServiceRequest> {
        let mut request = self.get(id).await?;
        request.complete(provider_id, Utc::now())?;
        self.save(&request).await?;
        self.publish(DomainEvent::RequestCompleted(request.clone()), &request.id)
            .await;
        Ok(request)
    }

    pub async fn cancel(&self, id: &str, customer_id: &str) -> DispatchResult<ServiceRequest> {
        let mut request = self.get(id).await?;
        request.cancel(customer_id, Utc::now())?;
        self.save(&request).await?;
        self.publish(DomainEvent::RequestCancelled(request.clone()), &request.id)
            .await;
        Ok(request)
    }

    async fn save(&self, request: &ServiceRequest) -> DispatchResult<()> {
        self.repository.update(request).await?;
        info!(
            request_id = %request.id,
            status = %request.status,
            "Service request updated"
        );
        Ok(())
    }

    /// 发布失败只记录日志，状态变更已经生效
    async fn publish(&self, event: DomainEvent, correlation_id: &str) {
        let topic = event.topic();
        let result = async {
            let envelope = event.to_envelope(correlation_id)?;
            self.bus.publish(topic, envelope.to_bytes()?).await
        }
        .await;

        if let Err(e) = result {
            warn!(
                topic,
                correlation_id,
                error = %e,
                "Failed to publish request event"
            );
        }
    }
}
