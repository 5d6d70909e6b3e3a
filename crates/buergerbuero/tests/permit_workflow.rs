//! End-to-end behavior of the permit request lifecycle through the public service facade,
//! the HTTP router and the event dispatcher.

mod common {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::response::Response;
    use serde_json::Value;

    use buergerbuero::permits::{
        DispatchConfig, DispatcherHandle, EventDispatcher, EventEnvelope, EventSettings,
        EventSink, InMemoryPermitStore, PermitWorkflowService, RecordingEventSink, RetryPolicy,
        TransportError,
    };

    pub(super) fn fast_retries(max_retries: usize) -> DispatchConfig {
        DispatchConfig {
            queue_capacity: 8,
            retry: RetryPolicy {
                max_retries,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
            },
            dead_letter_capacity: 8,
        }
    }

    pub(super) fn service_with<S: EventSink>(
        sink: Arc<S>,
        config: DispatchConfig,
    ) -> (
        Arc<PermitWorkflowService<InMemoryPermitStore>>,
        DispatcherHandle,
    ) {
        let (emitter, dispatcher) = EventDispatcher::spawn(sink, config);
        let service = Arc::new(PermitWorkflowService::new(
            Arc::new(InMemoryPermitStore::new()),
            emitter,
            EventSettings::default(),
        ));
        (service, dispatcher)
    }

    pub(super) fn recording() -> (
        Arc<PermitWorkflowService<InMemoryPermitStore>>,
        Arc<RecordingEventSink>,
        DispatcherHandle,
    ) {
        let sink = Arc::new(RecordingEventSink::default());
        let (service, dispatcher) = service_with(sink.clone(), fast_retries(1));
        (service, sink, dispatcher)
    }

    /// Broker that is down for good.
    #[derive(Default)]
    pub(super) struct OfflineBroker {
        pub(super) attempts: AtomicUsize,
    }

    impl EventSink for OfflineBroker {
        async fn publish(&self, _envelope: &EventEnvelope) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Unavailable("connection refused".to_string()))
        }
    }

    pub(super) fn post(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("valid request")
    }

    pub(super) fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("valid request")
    }

    pub(super) async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }
}

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use buergerbuero::permits::{
    permit_router, DeadLetterReason, PermitRequestStatus, WorkflowError,
};
use common::*;

#[tokio::test]
async fn lifecycle_scenarios_through_the_router() {
    let (service, sink, dispatcher) = recording();
    let router = permit_router(service.clone());

    let empty = router
        .clone()
        .oneshot(get("/api/v1/permit-requests/open"))
        .await
        .expect("route executes");
    assert_eq!(empty.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(empty).await,
        json!({ "errors": ["No permit requests found"] })
    );

    let permit = router
        .clone()
        .oneshot(post("/api/v1/permits", &json!({ "title": "Parkausweis" })))
        .await
        .expect("route executes");
    assert_eq!(
        json_body(permit).await,
        json!({ "permit": { "id": 1, "title": "Parkausweis", "description": null } })
    );

    let submitted = router
        .clone()
        .oneshot(post(
            "/api/v1/permit-requests",
            &json!({ "permit_id": 1, "citizen_id": 42 }),
        ))
        .await
        .expect("route executes");
    assert_eq!(json_body(submitted).await, json!({ "success": true }));

    let approval = json!({ "valid_until": "2026-01-01" });
    let approved = router
        .clone()
        .oneshot(post("/api/v1/permit-requests/1/approve", &approval))
        .await
        .expect("route executes");
    assert_eq!(approved.status(), StatusCode::OK);

    let repeated = router
        .clone()
        .oneshot(post("/api/v1/permit-requests/1/approve", &approval))
        .await
        .expect("route executes");
    assert_eq!(repeated.status(), StatusCode::BAD_REQUEST);

    let malformed = router
        .oneshot(post("/api/v1/permit-requests/abc/reject", &json!({})))
        .await
        .expect("route executes");
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let stored = service
        .permit_request_by_id("1")
        .await
        .expect("request stored");
    assert_eq!(stored.status, PermitRequestStatus::Approved);

    dispatcher.shutdown().await;
    let published = sink.published();
    assert_eq!(published.len(), 1);

    let body: serde_json::Value =
        serde_json::from_slice(&published[0].to_body().expect("serializes")).expect("json");
    assert_eq!(body["event_id"], json!(1101));
    assert_eq!(body["event_name"], json!("PermitRequestApproved"));
    assert_eq!(body["service_name"], json!("buergerbuero"));
    assert_eq!(body["permit_request_id"], json!(1));
    assert_eq!(body["valid_until"], json!("2026-01-01"));
    assert!(body.get("routing_key").is_none());
}

#[tokio::test]
async fn unreachable_broker_dead_letters_without_failing_the_transition() {
    let broker = Arc::new(OfflineBroker::default());
    let (service, dispatcher) = service_with(broker.clone(), fast_retries(2));

    service
        .create_permit(&json!({ "title": "Sondernutzung" }))
        .await
        .expect("permit created");
    let request = service
        .create_permit_request(&json!({ "permit_id": 1, "citizen_id": 3 }))
        .await
        .expect("request created");
    let rejected = service
        .reject_permit_request(&request.id.to_string())
        .await
        .expect("transition succeeds regardless of the broker");
    assert_eq!(rejected.status, PermitRequestStatus::Rejected);

    let dead_letters = dispatcher.dead_letters().clone();
    dispatcher.shutdown().await;

    assert_eq!(broker.attempts.load(Ordering::SeqCst), 3);
    let letters = dead_letters.snapshot();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].envelope.event_name(), "PermitRequestRejected");
    assert!(matches!(
        letters[0].reason,
        DeadLetterReason::RetriesExhausted { attempts: 3, .. }
    ));
}

#[tokio::test]
async fn decisions_after_shutdown_are_persisted_and_dead_lettered() {
    let (service, sink, dispatcher) = recording();
    service
        .create_permit(&json!({ "title": "Parkausweis" }))
        .await
        .expect("permit created");
    service
        .create_permit_request(&json!({ "permit_id": 1, "citizen_id": 42 }))
        .await
        .expect("request created");

    let dead_letters = dispatcher.dead_letters().clone();
    dispatcher.shutdown().await;

    let approved = service
        .approve_permit_request("1", &json!({}))
        .await
        .expect("store write still succeeds");
    assert_eq!(approved.valid_until, None);
    assert!(sink.published().is_empty());
    assert_eq!(
        dead_letters.snapshot()[0].reason,
        DeadLetterReason::QueueClosed
    );
}

#[tokio::test]
async fn validation_messages_are_reported_per_violation() {
    let (service, _sink, _dispatcher) = recording();

    let error = service
        .create_permit_request(&json!({ "permit_id": 0, "citizen_id": "42" }))
        .await
        .expect_err("invalid body");

    assert!(matches!(error, WorkflowError::Validation(_)));
    assert_eq!(
        error.messages(),
        [
            "instance.permit_id must be greater than or equal to 1",
            "instance.citizen_id is not of a type(s) integer",
        ]
    );
}

#[tokio::test]
async fn citizen_requests_are_stored_without_events() {
    let (service, sink, dispatcher) = recording();
    let router = permit_router(service);

    let created = router
        .clone()
        .oneshot(post(
            "/api/v1/requests",
            &json!({ "citizen_id": 42.0, "lastname": "Mustermann", "city_code": "51147" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(created.status(), StatusCode::OK);
    let created = json_body(created).await;
    assert_eq!(created["request"]["citizen_id"], json!(42));

    let fetched = router
        .oneshot(get("/api/v1/requests/1"))
        .await
        .expect("route executes");
    assert_eq!(json_body(fetched).await, created);

    dispatcher.shutdown().await;
    assert!(sink.published().is_empty());
}
