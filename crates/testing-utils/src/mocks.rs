//! Mock implementations for all repository and port traits
//!
//! In-memory doubles for unit tests, with switches for injecting failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_domain::entities::{
    Dispatch, DispatchStatus, MatchCriteria, Notification, ProviderCandidate, ServiceRequest,
};
use dispatch_domain::events::EventEnvelope;
use dispatch_domain::messaging::{BusMessage, EventBus, EventHandler};
use dispatch_domain::repositories::{
    DispatchRepository, NotificationSender, ProviderDirectory, RequestRepository,
};
use dispatch_errors::{DispatchError, DispatchResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Mock implementation of DispatchRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockDispatchRepository {
    dispatches: Arc<Mutex<Vec<Dispatch>>>,
    failing_providers: Arc<Mutex<HashSet<String>>>,
    fail_all: Arc<AtomicBool>,
    concurrent_write: Arc<Mutex<Option<DispatchStatus>>>,
}

impl MockDispatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// create() fails for dispatches addressed to this provider
    pub fn fail_create_for_provider(&self, provider_id: &str) {
        self.failing_providers
            .lock()
            .unwrap()
            .insert(provider_id.to_string());
    }

    /// every operation fails with a Persistence error
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// the next transition_status() first overwrites the row with this status,
    /// as if another writer got there between read and update
    pub fn write_concurrently_before_transition(&self, status: DispatchStatus) {
        *self.concurrent_write.lock().unwrap() = Some(status);
    }

    pub fn insert(&self, dispatch: Dispatch) {
        self.dispatches.lock().unwrap().push(dispatch);
    }

    pub fn all(&self) -> Vec<Dispatch> {
        self.dispatches.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.dispatches.lock().unwrap().len()
    }

    fn check_available(&self) -> DispatchResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(DispatchError::persistence("mock repository unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl DispatchRepository for MockDispatchRepository {
    async fn create(&self, dispatch: &Dispatch) -> DispatchResult<()> {
        self.check_available()?;
        if self
            .failing_providers
            .lock()
            .unwrap()
            .contains(&dispatch.provider_id)
        {
            return Err(DispatchError::persistence(format!(
                "mock insert failed for provider {}",
                dispatch.provider_id
            )));
        }
        let mut dispatches = self.dispatches.lock().unwrap();
        if dispatches.iter().any(|d| d.id == dispatch.id) {
            return Err(DispatchError::persistence("duplicate dispatch id"));
        }
        dispatches.push(dispatch.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> DispatchResult<Option<Dispatch>> {
        self.check_available()?;
        Ok(self
            .dispatches
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn transition_status(
        &self,
        id: &str,
        expected: &[DispatchStatus],
        new_status: DispatchStatus,
        updated_at: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        self.check_available()?;
        let mut dispatches = self.dispatches.lock().unwrap();
        if let Some(status) = self.concurrent_write.lock().unwrap().take() {
            if let Some(dispatch) = dispatches.iter_mut().find(|d| d.id == id) {
                dispatch.status = status;
            }
        }
        match dispatches
            .iter_mut()
            .find(|d| d.id == id && expected.contains(&d.status))
        {
            Some(dispatch) => {
                dispatch.status = new_status;
                dispatch.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_by_request(&self, request_id: &str) -> DispatchResult<Vec<Dispatch>> {
        self.check_available()?;
        Ok(self
            .dispatches
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn list_pending_by_provider(
        &self,
        provider_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<Vec<Dispatch>> {
        self.check_available()?;
        Ok(self
            .dispatches
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.provider_id == provider_id && d.is_open() && d.expires_at > now)
            .cloned()
            .collect())
    }

    async fn expire_old(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Dispatch>> {
        self.check_available()?;
        let mut expired = Vec::new();
        for dispatch in self.dispatches.lock().unwrap().iter_mut() {
            if dispatch.expire(now).is_ok() {
                expired.push(dispatch.clone());
            }
        }
        Ok(expired)
    }
}

/// Mock implementation of RequestRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockRequestRepository {
    requests: Arc<Mutex<HashMap<String, ServiceRequest>>>,
}

impl MockRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ServiceRequest> {
        self.requests.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl RequestRepository for MockRequestRepository {
    async fn create(&self, request: &ServiceRequest) -> DispatchResult<()> {
        self.requests
            .lock()
            .unwrap()
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> DispatchResult<Option<ServiceRequest>> {
        Ok(self.get(id))
    }

    async fn update(&self, request: &ServiceRequest) -> DispatchResult<()> {
        let mut requests = self.requests.lock().unwrap();
        match requests.get_mut(&request.id) {
            Some(existing) => {
                *existing = request.clone();
                Ok(())
            }
            None => Err(DispatchError::request_not_found(&request.id)),
        }
    }
}

/// Mock provider directory: filters by category only, records every query
#[derive(Debug, Clone, Default)]
pub struct MockProviderDirectory {
    candidates: Arc<Mutex<Vec<ProviderCandidate>>>,
    queries: Arc<Mutex<Vec<MatchCriteria>>>,
    fail: Arc<AtomicBool>,
}

impl MockProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidates(candidates: Vec<ProviderCandidate>) -> Self {
        let directory = Self::default();
        *directory.candidates.lock().unwrap() = candidates;
        directory
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<MatchCriteria> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderDirectory for MockProviderDirectory {
    async fn find_providers_in_radius(
        &self,
        criteria: &MatchCriteria,
    ) -> DispatchResult<Vec<ProviderCandidate>> {
        self.queries.lock().unwrap().push(criteria.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::persistence("mock provider directory unavailable"));
        }
        Ok(self
            .candidates
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.serves(&criteria.category))
            .cloned()
            .collect())
    }
}

/// Notification sender that records every batch
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    batches: Arc<Mutex<Vec<Vec<Notification>>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn batches(&self) -> Vec<Vec<Notification>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_batch(&self, notifications: &[Notification]) -> DispatchResult<()> {
        self.batches.lock().unwrap().push(notifications.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::delivery("mock push gateway unavailable"));
        }
        Ok(())
    }
}

/// Event bus double: records published messages and can replay them to subscribers
#[derive(Clone, Default)]
pub struct RecordingEventBus {
    published: Arc<Mutex<Vec<BusMessage>>>,
    subscriptions: Arc<Mutex<Vec<(String, Arc<dyn EventHandler>)>>>,
    fail_publish: Arc<AtomicBool>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Envelopes published on `topic`, in publish order
    pub fn envelopes(&self, topic: &str) -> Vec<EventEnvelope> {
        self.published()
            .iter()
            .filter(|m| m.topic == topic)
            .filter_map(|m| EventEnvelope::from_bytes(&m.payload).ok())
            .collect()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Invoke every handler subscribed to `topic` inline
    pub async fn deliver(&self, topic: &str, payload: Vec<u8>) -> Vec<DispatchResult<()>> {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, h)| Arc::clone(h))
            .collect();

        let message = BusMessage::new(topic, payload);
        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            results.push(handler.handle(&message).await);
        }
        results
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> DispatchResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(DispatchError::BusClosed);
        }
        self.published
            .lock()
            .unwrap()
            .push(BusMessage::new(topic, payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> DispatchResult<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .push((topic.to_string(), handler));
        Ok(())
    }

    async fn start(&self, _shutdown_rx: broadcast::Receiver<()>) -> DispatchResult<()> {
        Ok(())
    }

    async fn close(&self) -> DispatchResult<()> {
        Ok(())
    }
}

/// Event handler that records received messages
#[derive(Debug)]
pub struct RecordingHandler {
    name: String,
    received: tokio::sync::Mutex<Vec<BusMessage>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            received: tokio::sync::Mutex::new(Vec::new()),
            fail: false,
            delay: None,
        }
    }

    /// Records the message, then returns an error
    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn messages(&self) -> Vec<BusMessage> {
        self.received.lock().await.clone()
    }

    pub async fn payloads_as_strings(&self) -> Vec<String> {
        self.received
            .lock()
            .await
            .iter()
            .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &BusMessage) -> DispatchResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.received.lock().await.push(message.clone());
        if self.fail {
            return Err(DispatchError::internal(format!("{} failed", self.name)));
        }
        Ok(())
    }
}
