use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a permit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermitId(#[serde(deserialize_with = "whole_number")] pub u64);

/// Store-assigned identifier of a citizen's permit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermitRequestId(#[serde(deserialize_with = "whole_number")] pub u64);

/// Identifier of an authenticated citizen, issued by the external identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitizenId(#[serde(deserialize_with = "whole_number")] pub u64);

/// Store-assigned identifier of a general citizen request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitizenRequestId(#[serde(deserialize_with = "whole_number")] pub u64);

/// Accepts `7` as well as `7.0`; JSON clients do not always distinguish the two.
fn whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    struct WholeNumber;

    impl<'de> Visitor<'de> for WholeNumber {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative whole number")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| E::invalid_value(Unexpected::Signed(value), &self))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<u64, E> {
            if value.is_finite() && value.fract() == 0.0 && (0.0..u64::MAX as f64).contains(&value)
            {
                Ok(value as u64)
            } else {
                Err(E::invalid_value(Unexpected::Float(value), &self))
            }
        }
    }

    deserializer.deserialize_u64(WholeNumber)
}

impl fmt::Display for CitizenRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PermitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PermitRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CitizenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A permit type citizens can apply for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit {
    pub id: PermitId,
    pub title: String,
    pub description: Option<String>,
}

/// Staff supplied fields used both when creating and when updating a permit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A citizen's application submitted against a permit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermitRequest {
    pub permit_id: PermitId,
    pub citizen_id: CitizenId,
    #[serde(default)]
    pub description: Option<String>,
}

/// Optional decision data accompanying an approval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
}

/// Persisted permit request including its decision state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitRequest {
    pub id: PermitRequestId,
    pub permit_id: PermitId,
    pub citizen_id: CitizenId,
    pub description: Option<String>,
    pub status: PermitRequestStatus,
    pub valid_until: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl PermitRequest {
    pub fn is_open(&self) -> bool {
        self.status == PermitRequestStatus::Pending
    }
}

/// Contact details and reason a citizen submits with a general request to the office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCitizenRequest {
    pub citizen_id: CitizenId,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub city_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitizenRequest {
    pub id: CitizenRequestId,
    #[serde(flatten)]
    pub details: NewCitizenRequest,
    pub created_at: DateTime<Utc>,
}

/// Decision state of a permit request. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermitRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl PermitRequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PermitRequestStatus::Pending => "PENDING",
            PermitRequestStatus::Approved => "APPROVED",
            PermitRequestStatus::Rejected => "REJECTED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, PermitRequestStatus::Pending)
    }
}

impl fmt::Display for PermitRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
