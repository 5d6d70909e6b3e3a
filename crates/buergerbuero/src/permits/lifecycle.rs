//! Permit request state machine.
//!
//! `PENDING` is entered at creation and may move once to `APPROVED` or `REJECTED`; both are
//! terminal. Planning a transition is pure: it returns the record to persist and the event to
//! emit, and the caller persists the record with a status-conditioned write before emitting.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use super::domain::{PermitRequest, PermitRequestId, PermitRequestStatus};
use super::events::PermitEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve { valid_until: Option<NaiveDate> },
    Reject,
}

impl Decision {
    pub const fn action(self) -> TransitionAction {
        match self {
            Decision::Approve { .. } => TransitionAction::Approve,
            Decision::Reject => TransitionAction::Reject,
        }
    }

    pub const fn target(self) -> PermitRequestStatus {
        match self {
            Decision::Approve { .. } => PermitRequestStatus::Approved,
            Decision::Reject => PermitRequestStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    Approve,
    Reject,
}

impl TransitionAction {
    pub const fn failure_message(self) -> &'static str {
        match self {
            TransitionAction::Approve => "Could not approve permit request",
            TransitionAction::Reject => "Could not reject permit request",
        }
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionAction::Approve => f.write_str("approve"),
            TransitionAction::Reject => f.write_str("reject"),
        }
    }
}

/// Internal cause of a refused transition. Callers only see the generic action message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    NotFound,
    AlreadyDecided(PermitRequestStatus),
    /// A concurrent transition won the status-conditioned write.
    Superseded,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::NotFound => f.write_str("request does not exist"),
            RejectionReason::AlreadyDecided(status) => write!(f, "request is already {status}"),
            RejectionReason::Superseded => f.write_str("request was decided concurrently"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} permit request {request_id}: {reason}")]
pub struct TransitionRejected {
    pub request_id: PermitRequestId,
    pub action: TransitionAction,
    pub reason: RejectionReason,
}

/// Outcome of a legal transition: the decided record and its single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub record: PermitRequest,
    pub event: PermitEvent,
}

pub fn plan(
    request_id: PermitRequestId,
    current: Option<PermitRequest>,
    decision: Decision,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionRejected> {
    let rejected = |reason: RejectionReason| TransitionRejected {
        request_id,
        action: decision.action(),
        reason,
    };

    let mut record = current.ok_or_else(|| rejected(RejectionReason::NotFound))?;
    if record.status != PermitRequestStatus::Pending {
        return Err(rejected(RejectionReason::AlreadyDecided(record.status)));
    }

    record.status = decision.target();
    record.decided_at = Some(now);

    let event = match decision {
        Decision::Approve { valid_until } => {
            record.valid_until = valid_until;
            PermitEvent::Approved {
                permit_request_id: record.id,
                permit_id: record.permit_id,
                citizen_id: record.citizen_id,
                valid_until,
            }
        }
        Decision::Reject => {
            record.valid_until = None;
            PermitEvent::Rejected {
                permit_request_id: record.id,
                permit_id: record.permit_id,
                citizen_id: record.citizen_id,
            }
        }
    };

    Ok(Transition { record, event })
}

/// Refusal for a transition that lost the status-conditioned write.
pub fn superseded(request_id: PermitRequestId, decision: Decision) -> TransitionRejected {
    TransitionRejected {
        request_id,
        action: decision.action(),
        reason: RejectionReason::Superseded,
    }
}
