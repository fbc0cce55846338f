use std::sync::Arc;

use dispatch_dispatcher::{NewServiceRequest, RequestLifecycleService};
use dispatch_domain::entities::{RequestStatus, ServiceRequest};
use dispatch_domain::events::{topics, RequestCreatedEvent};
use dispatch_errors::DispatchError;
use dispatch_testing_utils::{MockRequestRepository, RecordingEventBus};

fn new_request() -> NewServiceRequest {
    NewServiceRequest {
        customer_id: "cust-1".to_string(),
        category: "cleaning".to_string(),
        description: "deep clean".to_string(),
        latitude: 31.23,
        longitude: 121.47,
        service_id: None,
    }
}

fn service() -> (RequestLifecycleService, Arc<MockRequestRepository>, Arc<RecordingEventBus>) {
    let repository = Arc::new(MockRequestRepository::new());
    let bus = Arc::new(RecordingEventBus::new());
    let service = RequestLifecycleService::new(repository.clone(), bus.clone());
    (service, repository, bus)
}

#[tokio::test]
async fn test_create_publishes_request_created() {
    let (service, repository, bus) = service();

    let request = service.create(new_request()).await.unwrap();
    assert_eq!(request.status, RequestStatus::Open);
    assert!(repository.get(&request.id).is_some());

    let envelopes = bus.envelopes(topics::REQUEST_CREATED);
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].correlation_id, request.id);
    let event: RequestCreatedEvent = envelopes[0].decode_payload().unwrap();
    assert_eq!(event.request_id, request.id);
    assert_eq!(event.category, "cleaning");
    assert!((event.latitude - 31.23).abs() < 1e-9);
}

#[tokio::test]
async fn test_create_validates_input() {
    let (service, repository, bus) = service();

    let mut input = new_request();
    input.latitude = 91.0;
    let err = service.create(input).await.unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));

    let mut input = new_request();
    input.category = " ".to_string();
    assert!(service.create(input).await.is_err());

    assert!(repository.get("anything").is_none());
    assert!(bus.published().is_empty());
}

#[tokio::test]
async fn test_full_lifecycle_publishes_each_step() {
    let (service, _repository, bus) = service();
    let request = service.create(new_request()).await.unwrap();

    let accepted = service.accept(&request.id, "prov-1").await.unwrap();
    assert_eq!(accepted.status, RequestStatus::Accepted);
    assert_eq!(accepted.provider_id.as_deref(), Some("prov-1"));

    let started = service.start(&request.id, "prov-1").await.unwrap();
    assert_eq!(started.status, RequestStatus::InProgress);

    let completed = service.complete(&request.id, "prov-1").await.unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
    assert!(completed.completed_at.is_some());

    let topics_seen: Vec<String> = bus.published().into_iter().map(|m| m.topic).collect();
    assert_eq!(
        topics_seen,
        vec![
            topics::REQUEST_CREATED,
            topics::REQUEST_ACCEPTED,
            topics::REQUEST_STARTED,
            topics::REQUEST_COMPLETED
        ]
    );

    let snapshot: ServiceRequest = bus.envelopes(topics::REQUEST_COMPLETED)[0]
        .decode_payload()
        .unwrap();
    assert_eq!(snapshot.id, completed.id);
    assert_eq!(snapshot.status, RequestStatus::Completed);
    assert_eq!(snapshot.provider_id.as_deref(), Some("prov-1"));
}

#[tokio::test]
async fn test_start_by_other_provider_is_denied() {
    let (service, _repository, _bus) = service();
    let request = service.create(new_request()).await.unwrap();
    service.accept(&request.id, "prov-1").await.unwrap();

    let err = service.start(&request.id, "prov-2").await.unwrap_err();
    assert!(matches!(err, DispatchError::Permission(_)));
}

#[tokio::test]
async fn test_cancel_rules() {
    let (service, _repository, bus) = service();
    let request = service.create(new_request()).await.unwrap();

    let err = service.cancel(&request.id, "someone-else").await.unwrap_err();
    assert!(matches!(err, DispatchError::Permission(_)));

    service.accept(&request.id, "prov-1").await.unwrap();
    let cancelled = service.cancel(&request.id, "cust-1").await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(bus.envelopes(topics::REQUEST_CANCELLED).len(), 1);

    let err = service.cancel(&request.id, "cust-1").await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_in_progress_cannot_be_cancelled() {
    let (service, _repository, _bus) = service();
    let request = service.create(new_request()).await.unwrap();
    service.accept(&request.id, "prov-1").await.unwrap();
    service.start(&request.id, "prov-1").await.unwrap();

    let err = service.cancel(&request.id, "cust-1").await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let (service, _repository, _bus) = service();
    let err = service.accept("missing", "prov-1").await.unwrap_err();
    assert!(matches!(err, DispatchError::RequestNotFound { .. }));
}

#[tokio::test]
async fn test_publish_failure_keeps_state_change() {
    let (service, repository, bus) = service();
    bus.set_fail_publish(true);

    let request = service.create(new_request()).await.unwrap();
    let accepted = service.accept(&request.id, "prov-1").await.unwrap();

    assert_eq!(
        repository.get(&request.id).map(|r| r.status),
        Some(RequestStatus::Accepted)
    );
    assert_eq!(accepted.status, RequestStatus::Accepted);
}
