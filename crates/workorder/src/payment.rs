//! Payments recorded against a work order.
//!
//! Payments are append-only: there is no edit or delete operation anywhere
//! in the engine. Corrections are new payments or a status change, never a
//! mutation of history.

use core::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use autoshop_core::{Cents, DomainError};

/// Payment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PaymentId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("PaymentId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Accepted payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Debit,
    Check,
    ETransfer,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Debit => "debit",
            PaymentMethod::Check => "check",
            PaymentMethod::ETransfer => "e_transfer",
            PaymentMethod::Online => "online",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "debit" => Ok(PaymentMethod::Debit),
            "check" => Ok(PaymentMethod::Check),
            "e_transfer" => Ok(PaymentMethod::ETransfer),
            "online" => Ok(PaymentMethod::Online),
            other => Err(DomainError::validation(format!(
                "unknown payment method '{other}' (expected cash, card, debit, check, e_transfer or online)"
            ))),
        }
    }
}

/// Payment status. Defaults to completed; only completed payments count
/// toward the reconciled balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Completed,
    Pending,
    Failed,
}

/// One recorded payment. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Cents,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sum of all completed payments.
pub fn completed_total(payments: &[Payment]) -> Cents {
    let sum = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .fold(0i64, |acc, p| acc.saturating_add(p.amount.amount()));
    Cents::new(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(amount: i64, status: PaymentStatus) -> Payment {
        Payment {
            id: PaymentId::new(),
            amount: Cents::new(amount),
            method: PaymentMethod::Card,
            status,
            reference_number: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn only_completed_payments_count() {
        let payments = vec![
            payment(5_000, PaymentStatus::Completed),
            payment(2_000, PaymentStatus::Pending),
            payment(1_000, PaymentStatus::Failed),
            payment(500, PaymentStatus::Completed),
        ];
        assert_eq!(completed_total(&payments), Cents::new(5_500));
    }

    #[test]
    fn method_round_trips_through_strings() {
        for s in ["cash", "card", "debit", "check", "e_transfer", "online"] {
            let m: PaymentMethod = s.parse().unwrap();
            assert_eq!(m.as_str(), s);
        }
        assert!("barter".parse::<PaymentMethod>().is_err());
    }
}
