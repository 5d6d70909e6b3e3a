//! Permit administration, the permit request lifecycle and general citizen requests.
//!
//! Requests flow through validation, the [`PermitStore`], the request state machine in
//! [`lifecycle`] and finally the [`EventEmitter`], which hands decision events to a
//! background dispatcher.

pub mod dispatch;
pub mod domain;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod router;
pub mod service;
pub mod store;
pub mod validation;

#[cfg(test)]
mod tests;

pub use dispatch::{
    DeadLetter, DeadLetterReason, DeadLetters, DispatchConfig, DispatcherHandle, EventDispatcher,
    EventEmitter, EventSink, RecordingEventSink, RetryPolicy, TracingEventSink, TransportError,
};
pub use domain::{
    Approval, CitizenId, CitizenRequest, CitizenRequestId, NewCitizenRequest, NewPermitRequest,
    Permit, PermitDraft, PermitId, PermitRequest, PermitRequestId, PermitRequestStatus,
};
pub use events::{EventEnvelope, EventError, EventSettings, PermitEvent};
pub use lifecycle::{Decision, RejectionReason, TransitionAction, TransitionRejected};
pub use memory::InMemoryPermitStore;
pub use router::permit_router;
pub use service::{PermitWorkflowService, WorkflowError};
pub use store::{PermitStore, StoreError};
pub use validation::ValidationErrors;
