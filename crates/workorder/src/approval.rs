//! Customer (or staff) accept/decline decisions on line items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::ItemId;

/// A single accept/decline verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Declined,
}

/// Verdict for one line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDecision {
    pub item_id: ItemId,
    pub decision: Decision,
}

/// What the caller decided: blanket approval of everything not already
/// declined, or an explicit per-item list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecisions {
    ApproveAll,
    PerItem(Vec<ItemDecision>),
}

/// How the approval reached us. Customer self-service through the portal is
/// the only mutation path open to non-staff actors; everything else is
/// staff-entered on the customer's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationMethod {
    CustomerPortal,
    Staff,
}

impl AuthorizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationMethod::CustomerPortal => "customer_portal",
            AuthorizationMethod::Staff => "staff",
        }
    }

    /// Display-name fallback when the approving party has no name on file.
    pub fn generic_actor(&self) -> &'static str {
        match self {
            AuthorizationMethod::CustomerPortal => "Customer",
            AuthorizationMethod::Staff => "Shop staff",
        }
    }
}

/// Who approved the estimate, how, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub method: AuthorizationMethod,
    pub authorized_by: String,
    pub authorized_at: DateTime<Utc>,
}
