use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dispatch_errors::{DispatchError, DispatchResult};

/// 派单：向某个服务商发出的一次接单邀请
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dispatch {
    pub id: String,
    pub request_id: String,
    pub provider_id: String,
    pub status: DispatchStatus,
    pub distance_km: f64, // 保留两位小数
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Pending,
    Sent,
    Accepted,
    Rejected,
    Expired,
}

impl DispatchStatus {
    /// 尚可被接受、拒绝或过期的状态
    pub const OPEN: [DispatchStatus; 2] = [DispatchStatus::Pending, DispatchStatus::Sent];

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Sent => "sent",
            DispatchStatus::Accepted => "accepted",
            DispatchStatus::Rejected => "rejected",
            DispatchStatus::Expired => "expired",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, DispatchStatus::Pending | DispatchStatus::Sent)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DispatchStatus::Pending),
            "sent" => Ok(DispatchStatus::Sent),
            "accepted" => Ok(DispatchStatus::Accepted),
            "rejected" => Ok(DispatchStatus::Rejected),
            "expired" => Ok(DispatchStatus::Expired),
            _ => Err(DispatchError::validation_error(format!(
                "未知的派单状态: {s}"
            ))),
        }
    }
}

impl Dispatch {
    /// 创建一条新的派单，过期时间 = 创建时间 + 报价窗口
    pub fn new_offer(
        request_id: impl Into<String>,
        provider_id: impl Into<String>,
        distance_km: f64,
        status: DispatchStatus,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            provider_id: provider_id.into(),
            status,
            distance_km: crate::geo::round_km(distance_km),
            expires_at: now + offer_window,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// 已超过报价窗口但还未被清理
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now > self.expires_at
    }

    /// 校验调用方是否可以对该派单执行接受/拒绝
    pub fn ensure_actionable_by(
        &self,
        caller_provider_id: &str,
        action: &str,
    ) -> DispatchResult<()> {
        if self.provider_id != caller_provider_id || !self.is_open() {
            return Err(DispatchError::invalid_transition(
                "dispatch",
                &self.id,
                self.status,
                action,
            ));
        }
        Ok(())
    }

    pub fn accept(&mut self, caller_provider_id: &str, now: DateTime<Utc>) -> DispatchResult<()> {
        self.ensure_actionable_by(caller_provider_id, "accept")?;
        self.status = DispatchStatus::Accepted;
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(&mut self, caller_provider_id: &str, now: DateTime<Utc>) -> DispatchResult<()> {
        self.ensure_actionable_by(caller_provider_id, "reject")?;
        self.status = DispatchStatus::Rejected;
        self.updated_at = now;
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> DispatchResult<()> {
        if !self.is_expired_at(now) {
            return Err(DispatchError::invalid_transition(
                "dispatch",
                &self.id,
                self.status,
                "expire",
            ));
        }
        self.status = DispatchStatus::Expired;
        self.updated_at = now;
        Ok(())
    }

    pub fn entity_description(&self) -> String {
        format!(
            "派单 {} (请求: {}, 服务商: {}, 状态: {})",
            self.id, self.request_id, self.provider_id, self.status
        )
    }
}

/// 匹配条件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchCriteria {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub category: String,
    pub service_id: Option<String>,
}

impl MatchCriteria {
    pub fn new(latitude: f64, longitude: f64, radius_km: f64, category: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            radius_km,
            category: category.into(),
            service_id: None,
        }
    }

    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }
}

/// 服务商目录返回的候选者
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderCandidate {
    pub provider_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_online: bool,
    pub categories: Vec<String>,
}

impl ProviderCandidate {
    pub fn serves(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

/// 经过距离计算与排序后的候选者
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub candidate: ProviderCandidate,
    pub distance_km: f64,
}

impl RankedCandidate {
    pub fn provider_id(&self) -> &str {
        &self.candidate.provider_id
    }
}

/// 推送给服务商的通知
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub provider_id: String,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

/// 客户发起的服务请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRequest {
    pub id: String,
    pub customer_id: String,
    pub provider_id: Option<String>,
    pub service_id: Option<String>,
    pub category: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: RequestStatus,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "open",
            RequestStatus::Accepted => "accepted",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(RequestStatus::Open),
            "accepted" => Ok(RequestStatus::Accepted),
            "in_progress" => Ok(RequestStatus::InProgress),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            _ => Err(DispatchError::validation_error(format!(
                "未知的请求状态: {s}"
            ))),
        }
    }
}

impl ServiceRequest {
    pub fn new(
        customer_id: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.into(),
            provider_id: None,
            service_id: None,
            category: category.into(),
            description: description.into(),
            latitude,
            longitude,
            status: RequestStatus::Open,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn invalid(&self, action: &str) -> DispatchError {
        DispatchError::invalid_transition("request", &self.id, self.status, action)
    }

    fn ensure_assigned_to(&self, provider_id: &str) -> DispatchResult<()> {
        match self.provider_id.as_deref() {
            Some(assigned) if assigned == provider_id => Ok(()),
            _ => Err(DispatchError::permission(format!(
                "服务商 {provider_id} 不是请求 {} 的承接方",
                self.id
            ))),
        }
    }

    /// open -> accepted
    pub fn accept(&mut self, provider_id: &str, now: DateTime<Utc>) -> DispatchResult<()> {
        if self.status != RequestStatus::Open {
            return Err(self.invalid("accept"));
        }
        self.provider_id = Some(provider_id.to_string());
        self.status = RequestStatus::Accepted;
        self.accepted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// accepted -> in_progress，仅限承接的服务商
    pub fn start(&mut self, provider_id: &str, now: DateTime<Utc>) -> DispatchResult<()> {
        if self.status != RequestStatus::Accepted {
            return Err(self.invalid("start"));
        }
        self.ensure_assigned_to(provider_id)?;
        self.status = RequestStatus::InProgress;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// in_progress -> completed，仅限承接的服务商
    pub fn complete(&mut self, provider_id: &str, now: DateTime<Utc>) -> DispatchResult<()> {
        if self.status != RequestStatus::InProgress {
            return Err(self.invalid("complete"));
        }
        self.ensure_assigned_to(provider_id)?;
        self.status = RequestStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// open|accepted -> cancelled，仅限下单客户
    pub fn cancel(&mut self, customer_id: &str, now: DateTime<Utc>) -> DispatchResult<()> {
        if self.customer_id != customer_id {
            return Err(DispatchError::permission(format!(
                "客户 {customer_id} 无权取消请求 {}",
                self.id
            )));
        }
        if !matches!(self.status, RequestStatus::Open | RequestStatus::Accepted) {
            return Err(self.invalid("cancel"));
        }
        self.status = RequestStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}
