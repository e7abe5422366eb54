//! `autoshop-workorder` — work order ledger & lifecycle engine.
//!
//! The one subsystem with real invariants: billable line items, derived
//! monetary totals, a status lifecycle with an explicit edge table,
//! customer-side line-item approval, and payment reconciliation. Pure
//! domain; all IO lives behind the dispatcher in the infra crate.

pub mod approval;
pub mod item;
pub mod ledger;
pub mod lifecycle;
pub mod order;
pub mod payment;

pub use approval::{
    ApprovalDecisions, Authorization, AuthorizationMethod, Decision, ItemDecision,
};
pub use item::{ItemId, ItemStatus, ItemType, WorkOrderItem};
pub use ledger::Totals;
pub use lifecycle::{StatusHistoryEntry, TransitionKind, WorkOrderStatus, transition_allowed};
pub use order::{
    AddItem, ApplyDecisions, ChangeStatus, OpenWorkOrder, RecordPayment, RemoveItem, SetDiscount,
    SetNotes, SetTaxRate, UpdateItem, WORK_ORDER_AGGREGATE_TYPE, WorkOrder, WorkOrderCommand,
    WorkOrderEvent, WorkOrderId, display_number,
};
pub use payment::{Payment, PaymentId, PaymentMethod, PaymentStatus, completed_total};
