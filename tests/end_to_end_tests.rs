use std::sync::Arc;

use chrono::{Duration, Utc};
use dispatch_config::AppConfig;
use dispatch_dispatcher::NewServiceRequest;
use dispatch_domain::entities::{DispatchStatus, ProviderCandidate, RequestStatus};
use dispatch_domain::events::{topics, DispatchSentEvent, EventEnvelope};
use dispatch_domain::messaging::EventBus;
use dispatch_errors::DispatchError;
use dispatch_infrastructure::SqliteDatabase;
use dispatch_service::Application;
use dispatch_testing_utils::{CandidateBuilder, RecordingHandler};
use tokio::sync::broadcast;

struct Harness {
    app: Application,
    sent: Arc<RecordingHandler>,
    _shutdown_tx: broadcast::Sender<()>,
}

async fn start_app(providers: Vec<ProviderCandidate>) -> Harness {
    let database = SqliteDatabase::in_memory().await.unwrap();
    let app = Application::with_database(AppConfig::default(), database);

    for provider in &providers {
        app.directory().upsert_provider(provider, 25.0).await.unwrap();
    }

    let sent = Arc::new(RecordingHandler::new("dispatch-sent-recorder"));
    app.bus()
        .subscribe(topics::DISPATCH_SENT, sent.clone())
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    app.start(shutdown_rx).await.unwrap();

    Harness {
        app,
        sent,
        _shutdown_tx: shutdown_tx,
    }
}

fn cleaning_request(latitude: f64, longitude: f64) -> NewServiceRequest {
    NewServiceRequest {
        customer_id: "cust-1".to_string(),
        category: "cleaning".to_string(),
        description: "weekly clean".to_string(),
        latitude,
        longitude,
        service_id: None,
    }
}

fn seven_online_providers() -> Vec<ProviderCandidate> {
    (0..7)
        .map(|i| {
            CandidateBuilder::new(&format!("prov-{i}"))
                .at(0.0, 0.01 * (i + 1) as f64)
                .build()
        })
        .collect()
}

/// 关闭总线会先处理完队列中的消息
async fn drain(harness: &Harness) {
    harness.app.bus().close().await.unwrap();
}

#[tokio::test]
async fn test_request_created_offers_top_five_providers() {
    let harness = start_app(seven_online_providers()).await;

    let request = harness
        .app
        .requests()
        .create(cleaning_request(0.0, 0.0))
        .await
        .unwrap();
    drain(&harness).await;

    let dispatches = harness
        .app
        .lifecycle()
        .list_by_request(&request.id)
        .await
        .unwrap();
    assert_eq!(dispatches.len(), 5);
    for dispatch in &dispatches {
        assert_eq!(dispatch.status, DispatchStatus::Sent);
        assert_eq!(dispatch.expires_at - dispatch.created_at, Duration::minutes(5));
    }

    let mut providers: Vec<_> = dispatches.iter().map(|d| d.provider_id.clone()).collect();
    providers.sort();
    assert_eq!(providers, vec!["prov-0", "prov-1", "prov-2", "prov-3", "prov-4"]);

    let messages = harness.sent.messages().await;
    assert_eq!(messages.len(), 1);
    let envelope = EventEnvelope::from_bytes(&messages[0].payload).unwrap();
    assert_eq!(envelope.correlation_id, request.id);
    let event: DispatchSentEvent = envelope.decode_payload().unwrap();
    assert_eq!(event.request_id, request.id);
    assert_eq!(event.count, 5);
    assert_eq!(event.provider_ids[0], "prov-0");

    harness.app.stop().await.unwrap();
}

#[tokio::test]
async fn test_request_without_nearby_providers_creates_nothing() {
    let far_away = vec![CandidateBuilder::new("far").at(10.0, 10.0).build()];
    let harness = start_app(far_away).await;

    let request = harness
        .app
        .requests()
        .create(cleaning_request(0.0, 0.0))
        .await
        .unwrap();
    drain(&harness).await;

    let dispatches = harness
        .app
        .lifecycle()
        .list_by_request(&request.id)
        .await
        .unwrap();
    assert!(dispatches.is_empty());
    assert!(harness.sent.messages().await.is_empty());

    harness.app.stop().await.unwrap();
}

#[tokio::test]
async fn test_provider_accepts_offer_once() {
    let harness = start_app(seven_online_providers()).await;
    let requests = harness.app.requests();
    let lifecycle = harness.app.lifecycle();

    let request = requests.create(cleaning_request(0.0, 0.0)).await.unwrap();
    drain(&harness).await;

    let offers = lifecycle.list_pending_for_provider("prov-0").await.unwrap();
    assert_eq!(offers.len(), 1);
    let offer = &offers[0];

    let err = lifecycle.accept(&offer.id, "prov-1").await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidTransition { .. }));

    let accepted = lifecycle.accept(&offer.id, "prov-0").await.unwrap();
    assert_eq!(accepted.status, DispatchStatus::Accepted);

    let err = lifecycle.accept(&offer.id, "prov-0").await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidTransition { .. }));
    assert!(lifecycle
        .list_pending_for_provider("prov-0")
        .await
        .unwrap()
        .is_empty());

    let request = requests.accept(&request.id, "prov-0").await.unwrap();
    assert_eq!(request.status, RequestStatus::Accepted);

    harness.app.stop().await.unwrap();
}

#[tokio::test]
async fn test_unanswered_offers_expire_once() {
    let harness = start_app(seven_online_providers()).await;
    let lifecycle = harness.app.lifecycle();

    let request = harness
        .app
        .requests()
        .create(cleaning_request(0.0, 0.0))
        .await
        .unwrap();
    drain(&harness).await;

    let offers = lifecycle.list_by_request(&request.id).await.unwrap();
    lifecycle.reject(&offers[0].id, &offers[0].provider_id).await.unwrap();

    assert_eq!(harness.app.sweep_expired().await.unwrap(), 0);

    let later = Utc::now() + Duration::minutes(6);
    assert_eq!(lifecycle.expire_old(later).await.unwrap(), 4);
    assert_eq!(lifecycle.expire_old(later).await.unwrap(), 0);

    let statuses: Vec<_> = lifecycle
        .list_by_request(&request.id)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.status)
        .collect();
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == DispatchStatus::Expired)
            .count(),
        4
    );
    assert!(statuses.contains(&DispatchStatus::Rejected));

    harness.app.stop().await.unwrap();
}

#[tokio::test]
async fn test_manual_match_ranks_online_before_offline() {
    let providers = vec![
        CandidateBuilder::new("A").at(0.0, 0.01).build(),
        CandidateBuilder::new("B").at(0.0, 0.02).offline().build(),
        CandidateBuilder::new("C").at(10.0, 10.0).build(),
    ];
    let harness = start_app(providers).await;

    let request = harness
        .app
        .requests()
        .create(cleaning_request(0.0, 0.0))
        .await
        .unwrap();
    drain(&harness).await;

    let dispatches = harness
        .app
        .matching()
        .match_request(&request, 5.0)
        .await
        .unwrap();

    let ranked: Vec<_> = dispatches.iter().map(|d| d.provider_id.as_str()).collect();
    assert_eq!(ranked, vec!["A", "B"]);
    assert!(dispatches.iter().all(|d| d.status == DispatchStatus::Pending));
    assert_eq!(dispatches[0].distance_km, 1.11);
    assert_eq!(dispatches[1].distance_km, 2.22);

    harness.app.stop().await.unwrap();
}

#[tokio::test]
async fn test_publish_after_stop_fails() {
    let harness = start_app(Vec::new()).await;
    harness.app.stop().await.unwrap();

    let err = harness
        .app
        .bus()
        .publish(topics::REQUEST_CREATED, b"{}".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::BusClosed));
}
