use std::sync::Arc;
use std::time::Duration;

use axum::response::Response;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Barrier;

use crate::permits::dispatch::{
    DispatchConfig, DispatcherHandle, EventDispatcher, RecordingEventSink, RetryPolicy,
};
use crate::permits::domain::{
    CitizenId, CitizenRequest, CitizenRequestId, NewCitizenRequest, NewPermitRequest, Permit,
    PermitDraft, PermitId, PermitRequest, PermitRequestId, PermitRequestStatus,
};
use crate::permits::events::EventSettings;
use crate::permits::memory::InMemoryPermitStore;
use crate::permits::service::PermitWorkflowService;
use crate::permits::store::{PermitStore, StoreError};

pub(super) struct Harness<S> {
    pub(super) service: Arc<PermitWorkflowService<S>>,
    pub(super) store: Arc<S>,
    pub(super) sink: Arc<RecordingEventSink>,
    pub(super) dispatcher: DispatcherHandle,
}

impl<S: PermitStore + 'static> Harness<S> {
    /// Drain the dispatcher so every queued event is visible on the sink.
    pub(super) async fn published_after_shutdown(self) -> Vec<crate::permits::EventEnvelope> {
        let sink = self.sink.clone();
        self.dispatcher.shutdown().await;
        sink.published()
    }
}

pub(super) fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        queue_capacity: 16,
        retry: RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 2.0,
        },
        dead_letter_capacity: 16,
    }
}

pub(super) fn harness_with<S: PermitStore + 'static>(store: S) -> Harness<S> {
    let store = Arc::new(store);
    let sink = Arc::new(RecordingEventSink::default());
    let (emitter, dispatcher) = EventDispatcher::spawn(sink.clone(), dispatch_config());
    let service = Arc::new(PermitWorkflowService::new(
        store.clone(),
        emitter,
        EventSettings::default(),
    ));
    Harness {
        service,
        store,
        sink,
        dispatcher,
    }
}

pub(super) fn harness() -> Harness<InMemoryPermitStore> {
    harness_with(InMemoryPermitStore::new())
}

pub(super) fn parking_permit() -> Value {
    json!({ "title": "Parkausweis" })
}

pub(super) fn citizen_request(permit_id: u64) -> Value {
    json!({ "permit_id": permit_id, "citizen_id": 42, "description": "Anwohnerparken" })
}

/// Creates one permit and one pending request for citizen 42.
pub(super) async fn seeded<S: PermitStore + 'static>(harness: &Harness<S>) -> PermitRequest {
    let permit = harness
        .service
        .create_permit(&parking_permit())
        .await
        .expect("permit created");
    harness
        .service
        .create_permit_request(&citizen_request(permit.id.0))
        .await
        .expect("request created")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) struct UnavailableStore;

fn offline() -> StoreError {
    StoreError::Unavailable("database offline".to_string())
}

impl PermitStore for UnavailableStore {
    async fn create_permit(&self, _draft: PermitDraft) -> Result<Permit, StoreError> {
        Err(offline())
    }

    async fn permit(&self, _id: PermitId) -> Result<Option<Permit>, StoreError> {
        Err(offline())
    }

    async fn update_permit(
        &self,
        _id: PermitId,
        _draft: PermitDraft,
    ) -> Result<Option<Permit>, StoreError> {
        Err(offline())
    }

    async fn delete_permit(&self, _id: PermitId) -> Result<bool, StoreError> {
        Err(offline())
    }

    async fn permits(&self) -> Result<Vec<Permit>, StoreError> {
        Err(offline())
    }

    async fn create_request(
        &self,
        _request: NewPermitRequest,
        _created_at: DateTime<Utc>,
    ) -> Result<Option<PermitRequest>, StoreError> {
        Err(offline())
    }

    async fn permit_request(
        &self,
        _id: PermitRequestId,
    ) -> Result<Option<PermitRequest>, StoreError> {
        Err(offline())
    }

    async fn open_requests(&self) -> Result<Vec<PermitRequest>, StoreError> {
        Err(offline())
    }

    async fn citizen_requests(
        &self,
        _citizen_id: CitizenId,
    ) -> Result<Vec<PermitRequest>, StoreError> {
        Err(offline())
    }

    async fn decide(
        &self,
        _decided: PermitRequest,
        _expected: PermitRequestStatus,
    ) -> Result<bool, StoreError> {
        Err(offline())
    }

    async fn create_citizen_request(
        &self,
        _request: NewCitizenRequest,
        _created_at: DateTime<Utc>,
    ) -> Result<Option<CitizenRequest>, StoreError> {
        Err(offline())
    }

    async fn citizen_request(
        &self,
        _id: CitizenRequestId,
    ) -> Result<Option<CitizenRequest>, StoreError> {
        Err(offline())
    }
}

/// Reads succeed but every decision write fails.
pub(super) struct ReadOnlyStore(pub(super) InMemoryPermitStore);

impl PermitStore for ReadOnlyStore {
    async fn create_permit(&self, draft: PermitDraft) -> Result<Permit, StoreError> {
        self.0.create_permit(draft).await
    }

    async fn permit(&self, id: PermitId) -> Result<Option<Permit>, StoreError> {
        self.0.permit(id).await
    }

    async fn update_permit(
        &self,
        id: PermitId,
        draft: PermitDraft,
    ) -> Result<Option<Permit>, StoreError> {
        self.0.update_permit(id, draft).await
    }

    async fn delete_permit(&self, id: PermitId) -> Result<bool, StoreError> {
        self.0.delete_permit(id).await
    }

    async fn permits(&self) -> Result<Vec<Permit>, StoreError> {
        self.0.permits().await
    }

    async fn create_request(
        &self,
        request: NewPermitRequest,
        created_at: DateTime<Utc>,
    ) -> Result<Option<PermitRequest>, StoreError> {
        self.0.create_request(request, created_at).await
    }

    async fn permit_request(
        &self,
        id: PermitRequestId,
    ) -> Result<Option<PermitRequest>, StoreError> {
        self.0.permit_request(id).await
    }

    async fn open_requests(&self) -> Result<Vec<PermitRequest>, StoreError> {
        self.0.open_requests().await
    }

    async fn citizen_requests(
        &self,
        citizen_id: CitizenId,
    ) -> Result<Vec<PermitRequest>, StoreError> {
        self.0.citizen_requests(citizen_id).await
    }

    async fn decide(
        &self,
        _decided: PermitRequest,
        _expected: PermitRequestStatus,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("read only replica".to_string()))
    }

    async fn create_citizen_request(
        &self,
        request: NewCitizenRequest,
        created_at: DateTime<Utc>,
    ) -> Result<Option<CitizenRequest>, StoreError> {
        self.0.create_citizen_request(request, created_at).await
    }

    async fn citizen_request(
        &self,
        id: CitizenRequestId,
    ) -> Result<Option<CitizenRequest>, StoreError> {
        self.0.citizen_request(id).await
    }
}

/// Holds every request read at a barrier so concurrent transitions all observe `PENDING`
/// before any of them writes.
pub(super) struct RacingStore {
    pub(super) inner: InMemoryPermitStore,
    pub(super) barrier: Barrier,
}

impl RacingStore {
    pub(super) fn new(contenders: usize) -> Self {
        Self {
            inner: InMemoryPermitStore::new(),
            barrier: Barrier::new(contenders),
        }
    }
}

impl PermitStore for RacingStore {
    async fn create_permit(&self, draft: PermitDraft) -> Result<Permit, StoreError> {
        self.inner.create_permit(draft).await
    }

    async fn permit(&self, id: PermitId) -> Result<Option<Permit>, StoreError> {
        self.inner.permit(id).await
    }

    async fn update_permit(
        &self,
        id: PermitId,
        draft: PermitDraft,
    ) -> Result<Option<Permit>, StoreError> {
        self.inner.update_permit(id, draft).await
    }

    async fn delete_permit(&self, id: PermitId) -> Result<bool, StoreError> {
        self.inner.delete_permit(id).await
    }

    async fn permits(&self) -> Result<Vec<Permit>, StoreError> {
        self.inner.permits().await
    }

    async fn create_request(
        &self,
        request: NewPermitRequest,
        created_at: DateTime<Utc>,
    ) -> Result<Option<PermitRequest>, StoreError> {
        self.inner.create_request(request, created_at).await
    }

    async fn permit_request(
        &self,
        id: PermitRequestId,
    ) -> Result<Option<PermitRequest>, StoreError> {
        let current = self.inner.permit_request(id).await;
        self.barrier.wait().await;
        current
    }

    async fn open_requests(&self) -> Result<Vec<PermitRequest>, StoreError> {
        self.inner.open_requests().await
    }

    async fn citizen_requests(
        &self,
        citizen_id: CitizenId,
    ) -> Result<Vec<PermitRequest>, StoreError> {
        self.inner.citizen_requests(citizen_id).await
    }

    async fn decide(
        &self,
        decided: PermitRequest,
        expected: PermitRequestStatus,
    ) -> Result<bool, StoreError> {
        self.inner.decide(decided, expected).await
    }

    async fn create_citizen_request(
        &self,
        request: NewCitizenRequest,
        created_at: DateTime<Utc>,
    ) -> Result<Option<CitizenRequest>, StoreError> {
        self.inner.create_citizen_request(request, created_at).await
    }

    async fn citizen_request(
        &self,
        id: CitizenRequestId,
    ) -> Result<Option<CitizenRequest>, StoreError> {
        self.inner.citizen_request(id).await
    }
}
