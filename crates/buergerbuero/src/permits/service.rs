use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info};

use super::dispatch::EventEmitter;
use super::domain::{
    Approval, CitizenId, CitizenRequest, CitizenRequestId, NewCitizenRequest, NewPermitRequest,
    Permit, PermitDraft, PermitId, PermitRequest, PermitRequestId, PermitRequestStatus,
};
use super::events::{EventError, EventSettings};
use super::lifecycle::{self, Decision, TransitionRejected};
use super::store::{PermitStore, StoreError};
use super::validation::{self, Schema, ValidationErrors};

const PERMIT_NOT_FOUND: &str = "Permit was not found.";
const PERMITS_NOT_FOUND: &str = "No permits were found.";
const REQUEST_NOT_FOUND: &str = "Permit request was not found.";
const REQUESTS_NOT_FOUND: &str = "No permit requests found";
const CITIZEN_REQUEST_NOT_FOUND: &str = "Request was not found.";

/// Service composing validation, the permit store, the request state machine and the
/// event emitter. Holds no per-call state.
pub struct PermitWorkflowService<S> {
    store: Arc<S>,
    events: EventEmitter,
    settings: EventSettings,
}

impl<S> PermitWorkflowService<S>
where
    S: PermitStore + 'static,
{
    pub fn new(store: Arc<S>, events: EventEmitter, settings: EventSettings) -> Self {
        Self {
            store,
            events,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn create_permit(&self, input: &Value) -> Result<Permit, WorkflowError> {
        const FAILURE: &str = "Could not create permit";
        let draft: PermitDraft = parse_body(input, validation::new_permit_schema())?;

        let permit = self
            .store
            .create_permit(draft)
            .await
            .map_err(persistence(FAILURE))?;
        info!(permit_id = %permit.id, "permit created");
        Ok(permit)
    }

    pub async fn permit_by_id(&self, raw_id: &str) -> Result<Permit, WorkflowError> {
        let id = PermitId(parse_path_id(raw_id)?);
        self.store
            .permit(id)
            .await
            .map_err(persistence("Could not get permit from database"))?
            .ok_or(WorkflowError::NotFound(PERMIT_NOT_FOUND))
    }

    pub async fn update_permit(&self, raw_id: &str, input: &Value) -> Result<Permit, WorkflowError> {
        const FAILURE: &str = "Could not update permit";
        let id = PermitId(parse_path_id(raw_id)?);
        let draft: PermitDraft = parse_body(input, validation::update_permit_schema())?;

        let permit = self
            .store
            .update_permit(id, draft)
            .await
            .map_err(persistence(FAILURE))?
            .ok_or(WorkflowError::Declined(FAILURE))?;
        info!(permit_id = %permit.id, "permit updated");
        Ok(permit)
    }

    pub async fn delete_permit(&self, raw_id: &str) -> Result<bool, WorkflowError> {
        let id = PermitId(parse_path_id(raw_id)?);
        let deleted = self
            .store
            .delete_permit(id)
            .await
            .map_err(persistence("Could not delete permit"))?;
        info!(permit_id = %id, deleted, "permit deletion processed");
        Ok(deleted)
    }

    pub async fn all_permits(&self) -> Result<Vec<Permit>, WorkflowError> {
        let permits = self
            .store
            .permits()
            .await
            .map_err(persistence("Could not get all permits"))?;
        non_empty(permits, PERMITS_NOT_FOUND)
    }

    /// Insert a `PENDING` request. No event is emitted until the request is decided.
    pub async fn create_permit_request(
        &self,
        input: &Value,
    ) -> Result<PermitRequest, WorkflowError> {
        const FAILURE: &str = "Could not create permit request";
        let request: NewPermitRequest = parse_body(input, validation::new_permit_request_schema())?;
        let permit_id = request.permit_id;
        let citizen_id = request.citizen_id;

        let Some(created) = self
            .store
            .create_request(request, Utc::now())
            .await
            .map_err(persistence(FAILURE))?
        else {
            info!(%permit_id, %citizen_id, "permit request references unknown permit or citizen");
            return Err(WorkflowError::Declined(FAILURE));
        };

        info!(permit_request_id = %created.id, %permit_id, %citizen_id, "permit request created");
        Ok(created)
    }

    pub async fn open_permit_requests(&self) -> Result<Vec<PermitRequest>, WorkflowError> {
        let requests = self
            .store
            .open_requests()
            .await
            .map_err(persistence("Could not get permit requests from database"))?;
        non_empty(requests, REQUESTS_NOT_FOUND)
    }

    pub async fn permit_request_by_id(&self, raw_id: &str) -> Result<PermitRequest, WorkflowError> {
        let id = PermitRequestId(parse_path_id(raw_id)?);
        self.store
            .permit_request(id)
            .await
            .map_err(persistence("Could not get permit request from database"))?
            .ok_or(WorkflowError::NotFound(REQUEST_NOT_FOUND))
    }

    pub async fn citizen_permit_requests(
        &self,
        raw_citizen_id: &str,
    ) -> Result<Vec<PermitRequest>, WorkflowError> {
        let citizen_id = CitizenId(parse_path_id(raw_citizen_id)?);
        let requests = self
            .store
            .citizen_requests(citizen_id)
            .await
            .map_err(persistence("Could not get permit requests from database"))?;
        non_empty(requests, REQUESTS_NOT_FOUND)
    }

    pub async fn approve_permit_request(
        &self,
        raw_id: &str,
        input: &Value,
    ) -> Result<PermitRequest, WorkflowError> {
        let id = PermitRequestId(parse_path_id(raw_id)?);
        let approval: Approval = parse_body(input, validation::approval_schema())?;
        self.decide(
            id,
            Decision::Approve {
                valid_until: approval.valid_until,
            },
        )
        .await
    }

    pub async fn reject_permit_request(&self, raw_id: &str) -> Result<PermitRequest, WorkflowError> {
        let id = PermitRequestId(parse_path_id(raw_id)?);
        self.decide(id, Decision::Reject).await
    }

    /// Record a general citizen request. These carry no lifecycle and emit no events.
    pub async fn create_citizen_request(
        &self,
        input: &Value,
    ) -> Result<CitizenRequest, WorkflowError> {
        const FAILURE: &str = "Could not create request";
        let request: NewCitizenRequest =
            parse_body(input, validation::new_citizen_request_schema())?;
        let citizen_id = request.citizen_id;

        let Some(created) = self
            .store
            .create_citizen_request(request, Utc::now())
            .await
            .map_err(persistence(FAILURE))?
        else {
            info!(%citizen_id, "citizen request references unknown citizen");
            return Err(WorkflowError::Declined(FAILURE));
        };

        info!(request_id = %created.id, %citizen_id, "citizen request created");
        Ok(created)
    }

    pub async fn citizen_request_by_id(
        &self,
        raw_id: &str,
    ) -> Result<CitizenRequest, WorkflowError> {
        let id = CitizenRequestId(parse_path_id(raw_id)?);
        self.store
            .citizen_request(id)
            .await
            .map_err(persistence("Could not get request from database"))?
            .ok_or(WorkflowError::NotFound(CITIZEN_REQUEST_NOT_FOUND))
    }

    /// Persist a decision with a status-conditioned write, then enqueue its event. Nothing is
    /// emitted when planning, envelope construction or the write fails.
    async fn decide(
        &self,
        request_id: PermitRequestId,
        decision: Decision,
    ) -> Result<PermitRequest, WorkflowError> {
        let context = decision.action().failure_message();
        let current = self
            .store
            .permit_request(request_id)
            .await
            .map_err(persistence(context))?;

        let now = Utc::now();
        let transition = lifecycle::plan(request_id, current, decision, now).map_err(refused)?;
        let envelope = transition
            .event
            .envelope(&self.settings, now)
            .map_err(|source| {
                error!(error = %source, %request_id, "could not build permit request event");
                WorkflowError::Event { context, source }
            })?;

        let swapped = self
            .store
            .decide(transition.record.clone(), PermitRequestStatus::Pending)
            .await
            .map_err(persistence(context))?;
        if !swapped {
            return Err(refused(lifecycle::superseded(request_id, decision)));
        }

        info!(
            permit_request_id = %request_id,
            status = %transition.record.status,
            "permit request decided"
        );
        self.events.emit(envelope);
        Ok(transition.record)
    }
}

/// Outcome of a failed workflow operation. Display strings are safe to show to callers.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("{0}")]
    NotFound(&'static str),
    /// The store refused the write, e.g. a request referencing an unknown permit.
    #[error("{0}")]
    Declined(&'static str),
    #[error("{}", .0.action.failure_message())]
    TransitionRejected(TransitionRejected),
    #[error("{context}")]
    Persistence {
        context: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("{context}")]
    Event {
        context: &'static str,
        #[source]
        source: EventError,
    },
}

impl WorkflowError {
    /// Caller-facing messages: one per violation for validation failures, otherwise the
    /// single generic message.
    pub fn messages(&self) -> Vec<String> {
        match self {
            WorkflowError::Validation(errors) => errors.messages().to_vec(),
            other => vec![other.to_string()],
        }
    }
}

fn parse_path_id(raw: &str) -> Result<u64, WorkflowError> {
    validation::parse_path_id(raw).map_err(|errors| {
        debug!(%errors, "rejected path identifier");
        WorkflowError::Validation(errors)
    })
}

fn parse_body<T: DeserializeOwned>(input: &Value, schema: &Schema) -> Result<T, WorkflowError> {
    let parsed = validation::validate(input, schema).and_then(|()| {
        serde_json::from_value(input.clone())
            .map_err(|err| ValidationErrors::single(format!("instance {err}")))
    });
    parsed.map_err(|errors| {
        debug!(%errors, "rejected request body");
        WorkflowError::Validation(errors)
    })
}

fn non_empty<T>(items: Vec<T>, message: &'static str) -> Result<Vec<T>, WorkflowError> {
    if items.is_empty() {
        Err(WorkflowError::NotFound(message))
    } else {
        Ok(items)
    }
}

fn persistence(context: &'static str) -> impl FnOnce(StoreError) -> WorkflowError {
    move |source| {
        error!(error = %source, context, "permit store operation failed");
        WorkflowError::Persistence { context, source }
    }
}

fn refused(rejected: TransitionRejected) -> WorkflowError {
    info!(
        permit_request_id = %rejected.request_id,
        action = %rejected.action,
        reason = %rejected.reason,
        "permit request transition refused"
    );
    WorkflowError::TransitionRejected(rejected)
}
