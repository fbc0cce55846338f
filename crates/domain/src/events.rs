//! 领域事件与事件信封
//!
//! 所有跨组件的事件都先包装为 [`EventEnvelope`] 再交给事件总线，
//! 信封只在发布时创建一次，之后不再修改。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{DispatchStatus, ServiceRequest};
use dispatch_errors::{DispatchError, DispatchResult};

/// 事件主题
pub mod topics {
    pub const REQUEST_CREATED: &str = "request.created";
    pub const REQUEST_ACCEPTED: &str = "request.accepted";
    pub const REQUEST_STARTED: &str = "request.started";
    pub const REQUEST_COMPLETED: &str = "request.completed";
    pub const REQUEST_CANCELLED: &str = "request.cancelled";
    pub const DISPATCH_SENT: &str = "dispatch.sent";
    pub const DISPATCH_ACCEPTED: &str = "dispatch.accepted";
    pub const DISPATCH_REJECTED: &str = "dispatch.rejected";
    pub const DISPATCH_EXPIRED: &str = "dispatch.expired";
}

/// 事件信封
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event_id: String,
    pub correlation_id: String,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// 包装事件；correlation_id 为空时生成新的ID
    pub fn wrap<T: Serialize + ?Sized>(
        topic: &str,
        correlation_id: &str,
        payload: &T,
    ) -> DispatchResult<Self> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| DispatchError::serialization(format!("{topic}: {e}")))?;
        let correlation_id = if correlation_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            correlation_id.to_string()
        };

        Ok(Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id,
            topic: topic.to_string(),
            timestamp: Utc::now(),
            payload,
        })
    }

    pub fn to_bytes(&self) -> DispatchResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DispatchError::serialization(e.to_string()))
    }

    /// 解包
    pub fn from_bytes(data: &[u8]) -> DispatchResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| DispatchError::deserialization(format!("事件信封格式错误: {e}")))
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> DispatchResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DispatchError::deserialization(format!("{} 事件内容格式错误: {e}", self.topic))
        })
    }
}

/// 绑定固定主题的事件类型
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TOPIC: &'static str;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestCreatedEvent {
    pub request_id: String,
    pub customer_id: String,
    pub category: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl EventPayload for RequestCreatedEvent {
    const TOPIC: &'static str = topics::REQUEST_CREATED;
}

impl From<&ServiceRequest> for RequestCreatedEvent {
    fn from(request: &ServiceRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            customer_id: request.customer_id.clone(),
            category: request.category.clone(),
            description: request.description.clone(),
            latitude: request.latitude,
            longitude: request.longitude,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchSentEvent {
    pub request_id: String,
    pub provider_ids: Vec<String>,
    pub count: usize,
}

impl EventPayload for DispatchSentEvent {
    const TOPIC: &'static str = topics::DISPATCH_SENT;
}

/// 派单终态事件（accepted / rejected / expired）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchOutcomeEvent {
    pub dispatch_id: String,
    pub request_id: String,
    pub provider_id: String,
    pub status: DispatchStatus,
}

/// 按主题区分的事件联合体，用于边界处统一解码
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    RequestCreated(RequestCreatedEvent),
    RequestAccepted(ServiceRequest),
    RequestStarted(ServiceRequest),
    RequestCompleted(ServiceRequest),
    RequestCancelled(ServiceRequest),
    DispatchSent(DispatchSentEvent),
    DispatchAccepted(DispatchOutcomeEvent),
    DispatchRejected(DispatchOutcomeEvent),
    DispatchExpired(DispatchOutcomeEvent),
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::RequestCreated(_) => topics::REQUEST_CREATED,
            DomainEvent::RequestAccepted(_) => topics::REQUEST_ACCEPTED,
            DomainEvent::RequestStarted(_) => topics::REQUEST_STARTED,
            DomainEvent::RequestCompleted(_) => topics::REQUEST_COMPLETED,
            DomainEvent::RequestCancelled(_) => topics::REQUEST_CANCELLED,
            DomainEvent::DispatchSent(_) => topics::DISPATCH_SENT,
            DomainEvent::DispatchAccepted(_) => topics::DISPATCH_ACCEPTED,
            DomainEvent::DispatchRejected(_) => topics::DISPATCH_REJECTED,
            DomainEvent::DispatchExpired(_) => topics::DISPATCH_EXPIRED,
        }
    }

    /// 派单终态对应的事件
    pub fn dispatch_outcome(event: DispatchOutcomeEvent) -> Option<Self> {
        match event.status {
            DispatchStatus::Accepted => Some(DomainEvent::DispatchAccepted(event)),
            DispatchStatus::Rejected => Some(DomainEvent::DispatchRejected(event)),
            DispatchStatus::Expired => Some(DomainEvent::DispatchExpired(event)),
            DispatchStatus::Pending | DispatchStatus::Sent => None,
        }
    }

    pub fn from_envelope(envelope: &EventEnvelope) -> DispatchResult<Self> {
        let event = match envelope.topic.as_str() {
            topics::REQUEST_CREATED => DomainEvent::RequestCreated(envelope.decode_payload()?),
            topics::REQUEST_ACCEPTED => DomainEvent::RequestAccepted(envelope.decode_payload()?),
            topics::REQUEST_STARTED => DomainEvent::RequestStarted(envelope.decode_payload()?),
            topics::REQUEST_COMPLETED => DomainEvent::RequestCompleted(envelope.decode_payload()?),
            topics::REQUEST_CANCELLED => DomainEvent::RequestCancelled(envelope.decode_payload()?),
            topics::DISPATCH_SENT => DomainEvent::DispatchSent(envelope.decode_payload()?),
            topics::DISPATCH_ACCEPTED => DomainEvent::DispatchAccepted(envelope.decode_payload()?),
            topics::DISPATCH_REJECTED => DomainEvent::DispatchRejected(envelope.decode_payload()?),
            topics::DISPATCH_EXPIRED => DomainEvent::DispatchExpired(envelope.decode_payload()?),
            other => {
                return Err(DispatchError::deserialization(format!(
                    "未知的事件主题: {other}"
                )))
            }
        };
        Ok(event)
    }

    pub fn to_envelope(&self, correlation_id: &str) -> DispatchResult<EventEnvelope> {
        let topic = self.topic();
        match self {
            DomainEvent::RequestCreated(e) => EventEnvelope::wrap(topic, correlation_id, e),
            DomainEvent::RequestAccepted(r)
            | DomainEvent::RequestStarted(r)
            | DomainEvent::RequestCompleted(r)
            | DomainEvent::RequestCancelled(r) => EventEnvelope::wrap(topic, correlation_id, r),
            DomainEvent::DispatchSent(e) => EventEnvelope::wrap(topic, correlation_id, e),
            DomainEvent::DispatchAccepted(e)
            | DomainEvent::DispatchRejected(e)
            | DomainEvent::DispatchExpired(e) => EventEnvelope::wrap(topic, correlation_id, e),
        }
    }
}
