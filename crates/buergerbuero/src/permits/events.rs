//! Outbound event envelopes describing permit request decisions.
//!
//! Every envelope carries `event_id`, `service_name`, `event_name` and `date` next to the
//! event specific payload fields. The routing key only addresses the transport and is never
//! part of the serialized body.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::domain::{CitizenId, PermitId, PermitRequestId};

/// Event ids below this value are reserved.
pub const DEFAULT_MINIMUM_EVENT_ID: u32 = 1000;
pub const DEFAULT_SERVICE_NAME: &str = "buergerbuero";
/// Canonical envelope timestamp: UTC, ISO-8601, whole seconds.
pub const EVENT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Deployment specific envelope settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSettings {
    pub service_name: String,
    pub minimum_event_id: u32,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            minimum_event_id: DEFAULT_MINIMUM_EVENT_ID,
        }
    }
}

/// Guard failures raised while building an envelope. These indicate programming or
/// deployment mistakes, not user input problems.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event name must be a non-empty string")]
    EmptyName,
    #[error("event id {id} is reserved, ids must be >= {minimum}")]
    ReservedId { id: u32, minimum: u32 },
    #[error("routing key must be a non-empty string")]
    EmptyRoutingKey,
    #[error("event payload could not be serialized: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    event_id: u32,
    service_name: String,
    event_name: String,
    date: String,
    #[serde(skip)]
    routing_key: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl EventEnvelope {
    pub fn new(
        event_name: impl Into<String>,
        event_id: u32,
        routing_key: impl Into<String>,
        settings: &EventSettings,
        at: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        let event_name = event_name.into();
        let routing_key = routing_key.into();

        if event_name.is_empty() {
            return Err(EventError::EmptyName);
        }
        if event_id < settings.minimum_event_id {
            return Err(EventError::ReservedId {
                id: event_id,
                minimum: settings.minimum_event_id,
            });
        }
        if routing_key.is_empty() {
            return Err(EventError::EmptyRoutingKey);
        }

        Ok(Self {
            event_id,
            service_name: settings.service_name.clone(),
            event_name,
            date: at.format(EVENT_DATE_FORMAT).to_string(),
            routing_key,
            payload: Map::new(),
        })
    }

    /// Attach payload fields. Fields colliding with envelope names are ignored.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, EventError> {
        let value =
            serde_json::to_value(payload).map_err(|err| EventError::Payload(err.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(EventError::Payload("payload must be a JSON object".to_string()));
        };

        for (key, value) in fields {
            if !matches!(
                key.as_str(),
                "event_id" | "service_name" | "event_name" | "date"
            ) {
                self.payload.insert(key, value);
            }
        }
        Ok(self)
    }

    pub fn event_id(&self) -> u32 {
        self.event_id
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Serialized body handed to the transport.
    pub fn to_body(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|err| EventError::Payload(err.to_string()))
    }
}

/// Domain events emitted when a permit request leaves `PENDING`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PermitEvent {
    Approved {
        permit_request_id: PermitRequestId,
        permit_id: PermitId,
        citizen_id: CitizenId,
        valid_until: Option<NaiveDate>,
    },
    Rejected {
        permit_request_id: PermitRequestId,
        permit_id: PermitId,
        citizen_id: CitizenId,
    },
}

impl PermitEvent {
    pub const fn event_id(&self) -> u32 {
        match self {
            PermitEvent::Approved { .. } => 1101,
            PermitEvent::Rejected { .. } => 1102,
        }
    }

    pub const fn event_name(&self) -> &'static str {
        match self {
            PermitEvent::Approved { .. } => "PermitRequestApproved",
            PermitEvent::Rejected { .. } => "PermitRequestRejected",
        }
    }

    pub const fn routing_key(&self) -> &'static str {
        match self {
            PermitEvent::Approved { .. } => "buergerbuero.permit_request.approved",
            PermitEvent::Rejected { .. } => "buergerbuero.permit_request.rejected",
        }
    }

    pub fn permit_request_id(&self) -> PermitRequestId {
        match self {
            PermitEvent::Approved {
                permit_request_id, ..
            }
            | PermitEvent::Rejected {
                permit_request_id, ..
            } => *permit_request_id,
        }
    }

    pub fn envelope(
        &self,
        settings: &EventSettings,
        at: DateTime<Utc>,
    ) -> Result<EventEnvelope, EventError> {
        EventEnvelope::new(
            self.event_name(),
            self.event_id(),
            self.routing_key(),
            settings,
            at,
        )?
        .with_payload(self)
    }
}
