use super::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Code,
    ManagerAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Cashier,
    Manager,
    Owner,
}

/// An authenticated employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub employee_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManagerCredentials {
    pub employee_id: String,
    pub pin: String,
}

/// Manager sign-off for a sale under the configured minimum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub transaction_id: String,
    pub sale_amount: Money,
    pub minimum_amount: Money,
    pub requested_by: String,
    #[serde(skip_serializing)]
    pub code: String,
    pub status: ApprovalStatus,
    pub resolution: Option<ResolutionMethod>,
    pub resolved_by: Option<String>,
    pub failed_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }

    pub(crate) fn resolve(&mut self, status: ApprovalStatus, method: Option<ResolutionMethod>, by: Option<String>) {
        self.status = status;
        self.resolution = method;
        self.resolved_by = by;
        self.resolved_at = Some(Utc::now());
    }
}
