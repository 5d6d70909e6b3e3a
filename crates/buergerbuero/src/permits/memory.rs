use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{
    CitizenId, CitizenRequest, CitizenRequestId, NewCitizenRequest, NewPermitRequest, Permit,
    PermitDraft, PermitId, PermitRequest, PermitRequestId, PermitRequestStatus,
};
use super::store::{PermitStore, StoreError};

#[derive(Debug, Default)]
struct StoreState {
    permits: BTreeMap<PermitId, Permit>,
    requests: BTreeMap<PermitRequestId, PermitRequest>,
    citizen_requests: BTreeMap<CitizenRequestId, CitizenRequest>,
    last_permit_id: u64,
    last_request_id: u64,
    last_citizen_request_id: u64,
}

/// Process-local reference store. Clones share the same state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPermitStore {
    state: Arc<Mutex<StoreState>>,
    citizens: Option<Arc<BTreeSet<CitizenId>>>,
}

impl InMemoryPermitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict request creation to a known set of citizens. Without a registry any
    /// positive citizen id is accepted.
    pub fn with_citizens(citizens: impl IntoIterator<Item = CitizenId>) -> Self {
        Self {
            state: Arc::default(),
            citizens: Some(Arc::new(citizens.into_iter().collect())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    fn knows_citizen(&self, citizen_id: CitizenId) -> bool {
        self.citizens
            .as_ref()
            .map_or(true, |citizens| citizens.contains(&citizen_id))
    }
}

impl PermitStore for InMemoryPermitStore {
    async fn create_permit(&self, draft: PermitDraft) -> Result<Permit, StoreError> {
        let mut state = self.lock()?;
        state.last_permit_id += 1;
        let permit = Permit {
            id: PermitId(state.last_permit_id),
            title: draft.title,
            description: draft.description,
        };
        state.permits.insert(permit.id, permit.clone());
        Ok(permit)
    }

    async fn permit(&self, id: PermitId) -> Result<Option<Permit>, StoreError> {
        Ok(self.lock()?.permits.get(&id).cloned())
    }

    async fn update_permit(
        &self,
        id: PermitId,
        draft: PermitDraft,
    ) -> Result<Option<Permit>, StoreError> {
        let mut state = self.lock()?;
        Ok(state.permits.get_mut(&id).map(|permit| {
            permit.title = draft.title;
            permit.description = draft.description;
            permit.clone()
        }))
    }

    async fn delete_permit(&self, id: PermitId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let referenced = state
            .requests
            .values()
            .any(|request| request.permit_id == id && request.is_open());
        if referenced {
            return Ok(false);
        }
        Ok(state.permits.remove(&id).is_some())
    }

    async fn permits(&self) -> Result<Vec<Permit>, StoreError> {
        Ok(self.lock()?.permits.values().cloned().collect())
    }

    async fn create_request(
        &self,
        request: NewPermitRequest,
        created_at: DateTime<Utc>,
    ) -> Result<Option<PermitRequest>, StoreError> {
        let mut state = self.lock()?;
        if !state.permits.contains_key(&request.permit_id) || !self.knows_citizen(request.citizen_id)
        {
            return Ok(None);
        }

        state.last_request_id += 1;
        let record = PermitRequest {
            id: PermitRequestId(state.last_request_id),
            permit_id: request.permit_id,
            citizen_id: request.citizen_id,
            description: request.description,
            status: PermitRequestStatus::Pending,
            valid_until: None,
            created_at,
            decided_at: None,
        };
        state.requests.insert(record.id, record.clone());
        Ok(Some(record))
    }

    async fn permit_request(
        &self,
        id: PermitRequestId,
    ) -> Result<Option<PermitRequest>, StoreError> {
        Ok(self.lock()?.requests.get(&id).cloned())
    }

    async fn open_requests(&self) -> Result<Vec<PermitRequest>, StoreError> {
        Ok(self
            .lock()?
            .requests
            .values()
            .filter(|request| request.is_open())
            .cloned()
            .collect())
    }

    async fn citizen_requests(
        &self,
        citizen_id: CitizenId,
    ) -> Result<Vec<PermitRequest>, StoreError> {
        Ok(self
            .lock()?
            .requests
            .values()
            .filter(|request| request.citizen_id == citizen_id)
            .cloned()
            .collect())
    }

    async fn decide(
        &self,
        decided: PermitRequest,
        expected: PermitRequestStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.requests.get_mut(&decided.id) {
            Some(current) if current.status == expected => {
                *current = decided;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_citizen_request(
        &self,
        request: NewCitizenRequest,
        created_at: DateTime<Utc>,
    ) -> Result<Option<CitizenRequest>, StoreError> {
        if !self.knows_citizen(request.citizen_id) {
            return Ok(None);
        }

        let mut state = self.lock()?;
        state.last_citizen_request_id += 1;
        let record = CitizenRequest {
            id: CitizenRequestId(state.last_citizen_request_id),
            details: request,
            created_at,
        };
        state.citizen_requests.insert(record.id, record.clone());
        Ok(Some(record))
    }

    async fn citizen_request(
        &self,
        id: CitizenRequestId,
    ) -> Result<Option<CitizenRequest>, StoreError> {
        Ok(self.lock()?.citizen_requests.get(&id).cloned())
    }
}
