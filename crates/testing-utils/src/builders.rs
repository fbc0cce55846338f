//! Test data builders

use chrono::{DateTime, Duration, Utc};
use dispatch_domain::entities::{Dispatch, DispatchStatus, ProviderCandidate};

/// Builder for ProviderCandidate
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    candidate: ProviderCandidate,
}

impl CandidateBuilder {
    pub fn new(provider_id: &str) -> Self {
        Self {
            candidate: ProviderCandidate {
                provider_id: provider_id.to_string(),
                latitude: 0.0,
                longitude: 0.0,
                is_online: true,
                categories: vec!["cleaning".to_string()],
            },
        }
    }

    pub fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.candidate.latitude = latitude;
        self.candidate.longitude = longitude;
        self
    }

    pub fn online(mut self, is_online: bool) -> Self {
        self.candidate.is_online = is_online;
        self
    }

    pub fn offline(self) -> Self {
        self.online(false)
    }

    pub fn with_categories(mut self, categories: &[&str]) -> Self {
        self.candidate.categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn build(self) -> ProviderCandidate {
        self.candidate
    }
}

/// Builder for Dispatch
#[derive(Debug, Clone)]
pub struct DispatchBuilder {
    dispatch: Dispatch,
}

impl DispatchBuilder {
    pub fn new(request_id: &str, provider_id: &str) -> Self {
        Self {
            dispatch: Dispatch::new_offer(
                request_id,
                provider_id,
                1.0,
                DispatchStatus::Sent,
                Utc::now(),
                Duration::minutes(5),
            ),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.dispatch.id = id.to_string();
        self
    }

    pub fn with_status(mut self, status: DispatchStatus) -> Self {
        self.dispatch.status = status;
        self
    }

    pub fn with_distance(mut self, distance_km: f64) -> Self {
        self.dispatch.distance_km = distance_km;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        let window = self.dispatch.expires_at - self.dispatch.created_at;
        self.dispatch.created_at = created_at;
        self.dispatch.updated_at = created_at;
        self.dispatch.expires_at = created_at + window;
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.dispatch.expires_at = expires_at;
        self
    }

    /// 过期时间设在过去
    pub fn already_expired(self) -> Self {
        let past = Utc::now() - Duration::minutes(1);
        self.expires_at(past)
    }

    pub fn build(self) -> Dispatch {
        self.dispatch
    }
}
