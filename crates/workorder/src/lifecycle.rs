//! Work order status lifecycle: states, the declared edge table, and the
//! history entries appended on every change.

use core::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use autoshop_core::DomainError;

/// Actor label recorded when a status change carries no explicit actor.
pub const GENERIC_STAFF_ACTOR: &str = "Shop staff";

/// Work order status.
///
/// `Draft` is initial; `Paid` and `Void` are terminal. `Void` is the cancel
/// path reachable from every non-terminal state. `Paid` is reachable via the
/// declared forward edge from `Invoiced` and via the payment-triggered
/// system transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Draft,
    Estimated,
    SentToCustomer,
    Approved,
    InProgress,
    Completed,
    Invoiced,
    Paid,
    Void,
}

impl WorkOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkOrderStatus::Paid | WorkOrderStatus::Void)
    }

    /// Items, discount and tax rate may only change while this returns true.
    pub fn is_editable(self) -> bool {
        !self.is_terminal()
    }

    /// Statuses a customer may still act on through the approval workflow.
    pub fn is_pending_approval(self) -> bool {
        matches!(
            self,
            WorkOrderStatus::Estimated | WorkOrderStatus::SentToCustomer
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Draft => "draft",
            WorkOrderStatus::Estimated => "estimated",
            WorkOrderStatus::SentToCustomer => "sent_to_customer",
            WorkOrderStatus::Approved => "approved",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::Completed => "completed",
            WorkOrderStatus::Invoiced => "invoiced",
            WorkOrderStatus::Paid => "paid",
            WorkOrderStatus::Void => "void",
        }
    }

    /// Context tag for the customer notification emitted on entry, when any.
    ///
    /// Delivery is owned by a decoupled bus consumer; a send failure can
    /// never roll back the status change that triggered it.
    pub fn notification_tag(self) -> Option<&'static str> {
        match self {
            WorkOrderStatus::SentToCustomer => Some("estimate_sent"),
            WorkOrderStatus::InProgress => Some("work_started"),
            WorkOrderStatus::Completed => Some("work_completed"),
            WorkOrderStatus::Invoiced => Some("invoice_ready"),
            _ => None,
        }
    }
}

impl core::fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkOrderStatus::Draft),
            "estimated" => Ok(WorkOrderStatus::Estimated),
            "sent_to_customer" => Ok(WorkOrderStatus::SentToCustomer),
            "approved" => Ok(WorkOrderStatus::Approved),
            "in_progress" => Ok(WorkOrderStatus::InProgress),
            "completed" => Ok(WorkOrderStatus::Completed),
            "invoiced" => Ok(WorkOrderStatus::Invoiced),
            "paid" => Ok(WorkOrderStatus::Paid),
            "void" => Ok(WorkOrderStatus::Void),
            other => Err(DomainError::validation(format!(
                "unknown work order status '{other}'"
            ))),
        }
    }
}

/// Who initiated a transition.
///
/// `System` is reserved for the payment-triggered `* -> paid` edge emitted
/// by payment reconciliation; it bypasses the declared edge list. Everything
/// user-initiated is `Requested` and validated against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Requested,
    System,
}

/// Whether a transition between two statuses is legal.
pub fn transition_allowed(
    from: WorkOrderStatus,
    to: WorkOrderStatus,
    kind: TransitionKind,
) -> bool {
    use WorkOrderStatus::*;

    if kind == TransitionKind::System {
        // Amount-triggered flip to paid. Never out of a terminal state.
        return to == Paid && !from.is_terminal();
    }

    // Cancel path: void is reachable from every non-terminal state.
    if to == Void {
        return !from.is_terminal();
    }

    // Declared forward edges.
    matches!(
        (from, to),
        (Draft, Estimated)
            | (Estimated, SentToCustomer)
            | (Estimated, Approved)
            | (SentToCustomer, Approved)
            | (Approved, InProgress)
            | (InProgress, Completed)
            | (Completed, Invoiced)
            | (Invoiced, Paid)
    )
}

/// Append-only record of one status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: WorkOrderStatus,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::WorkOrderStatus::*;
    use super::*;

    #[test]
    fn declared_forward_edges_are_allowed() {
        let edges = [
            (Draft, Estimated),
            (Estimated, SentToCustomer),
            (Estimated, Approved),
            (SentToCustomer, Approved),
            (Approved, InProgress),
            (InProgress, Completed),
            (Completed, Invoiced),
            (Invoiced, Paid),
        ];
        for (from, to) in edges {
            assert!(
                transition_allowed(from, to, TransitionKind::Requested),
                "{from} -> {to} should be legal"
            );
        }
    }

    #[test]
    fn skipping_stages_is_rejected() {
        assert!(!transition_allowed(Draft, Completed, TransitionKind::Requested));
        assert!(!transition_allowed(Draft, Approved, TransitionKind::Requested));
        assert!(!transition_allowed(Estimated, InProgress, TransitionKind::Requested));
        assert!(!transition_allowed(Approved, Invoiced, TransitionKind::Requested));
    }

    #[test]
    fn backward_edges_are_rejected() {
        assert!(!transition_allowed(Completed, InProgress, TransitionKind::Requested));
        assert!(!transition_allowed(Approved, Estimated, TransitionKind::Requested));
    }

    #[test]
    fn void_is_reachable_from_every_non_terminal_state() {
        for from in [Draft, Estimated, SentToCustomer, Approved, InProgress, Completed, Invoiced] {
            assert!(transition_allowed(from, Void, TransitionKind::Requested));
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for to in [Draft, Estimated, SentToCustomer, Approved, InProgress, Completed, Invoiced, Void] {
            assert!(!transition_allowed(Paid, to, TransitionKind::Requested));
            assert!(!transition_allowed(Void, to, TransitionKind::Requested));
        }
        assert!(!transition_allowed(Void, Paid, TransitionKind::System));
        assert!(!transition_allowed(Paid, Paid, TransitionKind::System));
    }

    #[test]
    fn system_transition_reaches_paid_from_any_non_terminal_state() {
        for from in [Draft, Estimated, SentToCustomer, Approved, InProgress, Completed, Invoiced] {
            assert!(transition_allowed(from, Paid, TransitionKind::System));
        }
        // But a requested paid transition still needs the declared edge.
        assert!(!transition_allowed(InProgress, Paid, TransitionKind::Requested));
    }

    #[test]
    fn notification_tags_cover_the_customer_facing_statuses() {
        assert_eq!(SentToCustomer.notification_tag(), Some("estimate_sent"));
        assert_eq!(InProgress.notification_tag(), Some("work_started"));
        assert_eq!(Completed.notification_tag(), Some("work_completed"));
        assert_eq!(Invoiced.notification_tag(), Some("invoice_ready"));
        assert_eq!(Draft.notification_tag(), None);
        assert_eq!(Paid.notification_tag(), None);
        assert_eq!(Void.notification_tag(), None);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            "draft",
            "estimated",
            "sent_to_customer",
            "approved",
            "in_progress",
            "completed",
            "invoiced",
            "paid",
            "void",
        ] {
            let status: WorkOrderStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!("shipped".parse::<WorkOrderStatus>().is_err());
    }
}
