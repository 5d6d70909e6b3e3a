use std::future::Future;

use chrono::{DateTime, Utc};

use super::domain::{
    CitizenId, CitizenRequest, CitizenRequestId, NewCitizenRequest, NewPermitRequest, Permit,
    PermitDraft, PermitId, PermitRequest, PermitRequestId, PermitRequestStatus,
};

/// Durable record of permits and permit requests.
///
/// Every method may suspend on I/O. Implementations own all persisted state; callers hold
/// nothing across calls.
pub trait PermitStore: Send + Sync {
    fn create_permit(
        &self,
        draft: PermitDraft,
    ) -> impl Future<Output = Result<Permit, StoreError>> + Send;

    fn permit(
        &self,
        id: PermitId,
    ) -> impl Future<Output = Result<Option<Permit>, StoreError>> + Send;

    /// Returns `None` when no permit with `id` exists.
    fn update_permit(
        &self,
        id: PermitId,
        draft: PermitDraft,
    ) -> impl Future<Output = Result<Option<Permit>, StoreError>> + Send;

    /// Returns `false` when nothing was deleted, including when open requests still
    /// reference the permit.
    fn delete_permit(&self, id: PermitId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// All permits ordered by id.
    fn permits(&self) -> impl Future<Output = Result<Vec<Permit>, StoreError>> + Send;

    /// Inserts a `PENDING` request. Returns `None`, persisting nothing, when the referenced
    /// permit or citizen does not exist.
    fn create_request(
        &self,
        request: NewPermitRequest,
        created_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<PermitRequest>, StoreError>> + Send;

    fn permit_request(
        &self,
        id: PermitRequestId,
    ) -> impl Future<Output = Result<Option<PermitRequest>, StoreError>> + Send;

    /// `PENDING` requests ordered by id.
    fn open_requests(&self) -> impl Future<Output = Result<Vec<PermitRequest>, StoreError>> + Send;

    fn citizen_requests(
        &self,
        citizen_id: CitizenId,
    ) -> impl Future<Output = Result<Vec<PermitRequest>, StoreError>> + Send;

    /// Replaces the stored request with `decided` only if its current status equals
    /// `expected`. Returns whether the swap happened; at most one concurrent caller wins.
    fn decide(
        &self,
        decided: PermitRequest,
        expected: PermitRequestStatus,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Inserts a general citizen request. Returns `None`, persisting nothing, when the
    /// citizen is unknown.
    fn create_citizen_request(
        &self,
        request: NewCitizenRequest,
        created_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<CitizenRequest>, StoreError>> + Send;

    fn citizen_request(
        &self,
        id: CitizenRequestId,
    ) -> impl Future<Output = Result<Option<CitizenRequest>, StoreError>> + Send;
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
