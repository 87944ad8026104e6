use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ids::UserId;

/// Why a signed-in user may not start an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No entitlement record exists for the user.
    MissingRow,
    /// The record was explicitly deactivated.
    Inactive,
    /// The record's expiry is not in the future.
    Expired,
    /// The entitlement lookup itself failed.
    Blocked,
}

impl DenyReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::MissingRow => "missing_row",
            DenyReason::Inactive => "inactive",
            DenyReason::Expired => "expired",
            DenyReason::Blocked => "blocked",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access grant owned by the external store. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementRecord {
    pub user_id: UserId,
    pub active: bool,
    pub never_expires: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl EntitlementRecord {
    /// Validity is derived: `active && (never_expires || expires_at > now)`.
    ///
    /// # Errors
    ///
    /// Returns `DenyReason::Inactive` or `DenyReason::Expired`.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), DenyReason> {
        if !self.active {
            return Err(DenyReason::Inactive);
        }
        if self.never_expires {
            return Ok(());
        }
        match self.expires_at {
            Some(at) if at > now => Ok(()),
            _ => Err(DenyReason::Expired),
        }
    }
}

/// Applies the validity rule to an optional record.
///
/// # Errors
///
/// Returns `DenyReason::MissingRow` when there is no record, otherwise the
/// reason produced by [`EntitlementRecord::check`].
pub fn evaluate(record: Option<&EntitlementRecord>, now: DateTime<Utc>) -> Result<(), DenyReason> {
    record.map_or(Err(DenyReason::MissingRow), |r| r.check(now))
}
