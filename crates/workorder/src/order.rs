//! The work order aggregate: the only thing external callers address.
//!
//! Commands are decided by `handle` (pure, no mutation) and state evolves
//! through `apply`. Every money-affecting event ends with a full ledger
//! recompute from the authoritative item set, so the stored totals are a
//! derived view and can never drift from the items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use autoshop_core::{
    Aggregate, AggregateId, AggregateRoot, AppointmentId, Cents, CustomerId, DomainError, Quantity,
    ServiceId, ShopId, TaxRate, TechnicianId, VehicleId, money::line_total,
};
use autoshop_events::Event;

use crate::approval::{
    ApprovalDecisions, Authorization, AuthorizationMethod, Decision, ItemDecision,
};
use crate::item::{ItemId, ItemStatus, ItemType, WorkOrderItem};
use crate::ledger::Totals;
use crate::lifecycle::{
    GENERIC_STAFF_ACTOR, StatusHistoryEntry, TransitionKind, WorkOrderStatus, transition_allowed,
};
use crate::payment::{
    Payment, PaymentId, PaymentMethod, PaymentStatus, completed_total,
};

/// Stream/aggregate type tag used by the event store and projections.
pub const WORK_ORDER_AGGREGATE_TYPE: &str = "work_order";

/// Work order identifier (shop-scoped via `shop_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkOrderId(pub AggregateId);

impl WorkOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for WorkOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Human-readable identifier shown alongside the opaque id.
///
/// The +1000 offset is a cosmetic convention, not a security boundary.
pub fn display_number(number: u64) -> String {
    format!("WO-{}", 1000 + number)
}

/// Aggregate root: WorkOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrder {
    id: WorkOrderId,
    shop_id: Option<ShopId>,
    number: u64,
    customer_id: Option<CustomerId>,
    vehicle_id: Option<VehicleId>,
    appointment_id: Option<AppointmentId>,
    status: WorkOrderStatus,
    items: Vec<WorkOrderItem>,
    payments: Vec<Payment>,
    discount: Cents,
    discount_reason: Option<String>,
    tax_rate: TaxRate,
    totals: Totals,
    notes: Option<String>,
    internal_notes: Option<String>,
    authorization: Option<Authorization>,
    history: Vec<StatusHistoryEntry>,
    opened_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl WorkOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: WorkOrderId) -> Self {
        Self {
            id,
            shop_id: None,
            number: 0,
            customer_id: None,
            vehicle_id: None,
            appointment_id: None,
            status: WorkOrderStatus::Draft,
            items: Vec::new(),
            payments: Vec::new(),
            discount: Cents::ZERO,
            discount_reason: None,
            tax_rate: TaxRate::default(),
            totals: Totals::default(),
            notes: None,
            internal_notes: None,
            authorization: None,
            history: Vec::new(),
            opened_at: None,
            completed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> WorkOrderId {
        self.id
    }

    pub fn shop_id(&self) -> Option<ShopId> {
        self.shop_id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn display_id(&self) -> String {
        display_number(self.number)
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn vehicle_id(&self) -> Option<VehicleId> {
        self.vehicle_id
    }

    pub fn appointment_id(&self) -> Option<AppointmentId> {
        self.appointment_id
    }

    pub fn status(&self) -> WorkOrderStatus {
        self.status
    }

    pub fn items(&self) -> &[WorkOrderItem] {
        &self.items
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn discount(&self) -> Cents {
        self.discount
    }

    pub fn discount_reason(&self) -> Option<&str> {
        self.discount_reason.as_deref()
    }

    pub fn tax_rate(&self) -> TaxRate {
        self.tax_rate
    }

    /// Derived totals; always consistent with the current item set.
    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn internal_notes(&self) -> Option<&str> {
        self.internal_notes.as_deref()
    }

    pub fn authorization(&self) -> Option<&Authorization> {
        self.authorization.as_ref()
    }

    pub fn history(&self) -> &[StatusHistoryEntry] {
        &self.history
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Cumulative completed payments.
    pub fn amount_paid(&self) -> Cents {
        completed_total(&self.payments)
    }

    /// Balance due, floored at zero for reporting.
    pub fn balance_due(&self) -> Cents {
        self.totals.total.saturating_sub_floor_zero(self.amount_paid())
    }

    pub fn is_editable(&self) -> bool {
        self.status.is_editable()
    }
}

impl AggregateRoot for WorkOrder {
    type Id = WorkOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// -------------------------
// Commands
// -------------------------

/// Command: OpenWorkOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenWorkOrder {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    /// Durable sequential number allocated by the caller.
    pub number: u64,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub appointment_id: Option<AppointmentId>,
    pub tax_rate: Option<TaxRate>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub item_id: ItemId,
    pub item_type: ItemType,
    pub service_id: Option<ServiceId>,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Cents,
    pub cost: Option<Cents>,
    pub technician: Option<TechnicianId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateItem. `None` fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItem {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub item_id: ItemId,
    pub item_type: Option<ItemType>,
    pub description: Option<String>,
    pub quantity: Option<Quantity>,
    pub unit_price: Option<Cents>,
    pub cost: Option<Cents>,
    pub status: Option<ItemStatus>,
    pub technician: Option<TechnicianId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetDiscount (order-level discount in cents, with a reason).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDiscount {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub discount: Cents,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetTaxRate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTaxRate {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub tax_rate: TaxRate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetNotes. `None` fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetNotes {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub notes: Option<String>,
    pub internal_notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus (user-requested transition).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub to: WorkOrderStatus,
    pub changed_by: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyDecisions (approval workflow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyDecisions {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub decisions: ApprovalDecisions,
    pub method: AuthorizationMethod,
    pub authorized_by: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment (payment reconciliation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub payment_id: PaymentId,
    pub amount: Cents,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOrderCommand {
    OpenWorkOrder(OpenWorkOrder),
    AddItem(AddItem),
    UpdateItem(UpdateItem),
    RemoveItem(RemoveItem),
    SetDiscount(SetDiscount),
    SetTaxRate(SetTaxRate),
    SetNotes(SetNotes),
    ChangeStatus(ChangeStatus),
    ApplyDecisions(ApplyDecisions),
    RecordPayment(RecordPayment),
}

// -------------------------
// Events
// -------------------------

/// Event: WorkOrderOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderOpened {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub number: u64,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub appointment_id: Option<AppointmentId>,
    pub tax_rate: TaxRate,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded (carries the fully built item, total included).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub item: WorkOrderItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemUpdated (carries the full post-update item, total recomputed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdated {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub item: WorkOrderItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DiscountChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountChanged {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub discount: Cents,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TaxRateChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRateChanged {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub tax_rate: TaxRate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: NotesChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesChanged {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub notes: Option<String>,
    pub internal_notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
///
/// `kind` distinguishes user-requested transitions (validated against the
/// edge table) from the payment-triggered system flip to paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub from: WorkOrderStatus,
    pub to: WorkOrderStatus,
    pub kind: TransitionKind,
    pub changed_by: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DecisionsApplied (resolved per-item verdicts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionsApplied {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub items: Vec<ItemDecision>,
    pub method: AuthorizationMethod,
    pub authorized_by: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub payment: Payment,
    /// Cumulative completed payments after this one.
    pub total_paid: Cents,
    /// Balance due after this payment, floored at zero.
    pub balance_due: Cents,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOrderEvent {
    WorkOrderOpened(WorkOrderOpened),
    ItemAdded(ItemAdded),
    ItemUpdated(ItemUpdated),
    ItemRemoved(ItemRemoved),
    DiscountChanged(DiscountChanged),
    TaxRateChanged(TaxRateChanged),
    NotesChanged(NotesChanged),
    StatusChanged(StatusChanged),
    DecisionsApplied(DecisionsApplied),
    PaymentRecorded(PaymentRecorded),
}

impl Event for WorkOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkOrderEvent::WorkOrderOpened(_) => "workorder.opened",
            WorkOrderEvent::ItemAdded(_) => "workorder.item_added",
            WorkOrderEvent::ItemUpdated(_) => "workorder.item_updated",
            WorkOrderEvent::ItemRemoved(_) => "workorder.item_removed",
            WorkOrderEvent::DiscountChanged(_) => "workorder.discount_changed",
            WorkOrderEvent::TaxRateChanged(_) => "workorder.tax_rate_changed",
            WorkOrderEvent::NotesChanged(_) => "workorder.notes_changed",
            WorkOrderEvent::StatusChanged(_) => "workorder.status_changed",
            WorkOrderEvent::DecisionsApplied(_) => "workorder.decisions_applied",
            WorkOrderEvent::PaymentRecorded(_) => "workorder.payment_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WorkOrderEvent::WorkOrderOpened(e) => e.occurred_at,
            WorkOrderEvent::ItemAdded(e) => e.occurred_at,
            WorkOrderEvent::ItemUpdated(e) => e.occurred_at,
            WorkOrderEvent::ItemRemoved(e) => e.occurred_at,
            WorkOrderEvent::DiscountChanged(e) => e.occurred_at,
            WorkOrderEvent::TaxRateChanged(e) => e.occurred_at,
            WorkOrderEvent::NotesChanged(e) => e.occurred_at,
            WorkOrderEvent::StatusChanged(e) => e.occurred_at,
            WorkOrderEvent::DecisionsApplied(e) => e.occurred_at,
            WorkOrderEvent::PaymentRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for WorkOrder {
    type Command = WorkOrderCommand;
    type Event = WorkOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WorkOrderEvent::WorkOrderOpened(e) => {
                self.id = e.work_order_id;
                self.shop_id = Some(e.shop_id);
                self.number = e.number;
                self.customer_id = Some(e.customer_id);
                self.vehicle_id = Some(e.vehicle_id);
                self.appointment_id = e.appointment_id;
                self.status = WorkOrderStatus::Draft;
                self.tax_rate = e.tax_rate;
                self.notes = e.notes.clone();
                self.opened_at = Some(e.occurred_at);
                self.created = true;
            }
            WorkOrderEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
                self.recompute_totals();
            }
            WorkOrderEvent::ItemUpdated(e) => {
                if let Some(existing) = self.items.iter_mut().find(|i| i.id == e.item.id) {
                    *existing = e.item.clone();
                }
                self.recompute_totals();
            }
            WorkOrderEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.id != e.item_id);
                self.recompute_totals();
            }
            WorkOrderEvent::DiscountChanged(e) => {
                self.discount = e.discount;
                self.discount_reason = e.reason.clone();
                self.recompute_totals();
            }
            WorkOrderEvent::TaxRateChanged(e) => {
                self.tax_rate = e.tax_rate;
                self.recompute_totals();
            }
            WorkOrderEvent::NotesChanged(e) => {
                if e.notes.is_some() {
                    self.notes = e.notes.clone();
                }
                if e.internal_notes.is_some() {
                    self.internal_notes = e.internal_notes.clone();
                }
            }
            WorkOrderEvent::StatusChanged(e) => {
                self.status = e.to;
                if e.to == WorkOrderStatus::Completed {
                    self.completed_at = Some(e.occurred_at);
                }
                self.history.push(StatusHistoryEntry {
                    status: e.to,
                    changed_by: e.changed_by.clone(),
                    changed_at: e.occurred_at,
                });
            }
            WorkOrderEvent::DecisionsApplied(e) => {
                for verdict in &e.items {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == verdict.item_id) {
                        item.status = match verdict.decision {
                            Decision::Approved => ItemStatus::Approved,
                            Decision::Declined => ItemStatus::Declined,
                        };
                    }
                }
                self.authorization = Some(Authorization {
                    method: e.method,
                    authorized_by: e.authorized_by.clone(),
                    authorized_at: e.occurred_at,
                });
                self.recompute_totals();
            }
            WorkOrderEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            WorkOrderCommand::OpenWorkOrder(cmd) => self.handle_open(cmd),
            WorkOrderCommand::AddItem(cmd) => self.handle_add_item(cmd),
            WorkOrderCommand::UpdateItem(cmd) => self.handle_update_item(cmd),
            WorkOrderCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            WorkOrderCommand::SetDiscount(cmd) => self.handle_set_discount(cmd),
            WorkOrderCommand::SetTaxRate(cmd) => self.handle_set_tax_rate(cmd),
            WorkOrderCommand::SetNotes(cmd) => self.handle_set_notes(cmd),
            WorkOrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
            WorkOrderCommand::ApplyDecisions(cmd) => self.handle_apply_decisions(cmd),
            WorkOrderCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
        }
    }
}

impl WorkOrder {
    fn recompute_totals(&mut self) {
        self.totals = Totals::compute(&self.items, self.discount, self.tax_rate);
    }

    fn ensure_shop(&self, shop_id: ShopId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.shop_id != Some(shop_id) {
            return Err(DomainError::invariant("shop mismatch"));
        }
        Ok(())
    }

    fn ensure_work_order_id(&self, work_order_id: WorkOrderId) -> Result<(), DomainError> {
        if self.id != work_order_id {
            return Err(DomainError::invariant("work_order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, shop_id: ShopId, work_order_id: WorkOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_shop(shop_id)?;
        self.ensure_work_order_id(work_order_id)
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if !self.status.is_editable() {
            return Err(DomainError::invariant(format!(
                "work order is {} and closed to edits",
                self.status
            )));
        }
        Ok(())
    }

    fn validate_price_for_type(item_type: ItemType, unit_price: Cents) -> Result<(), DomainError> {
        // Discount lines may carry either sign; the ledger subtracts their
        // magnitude. Everything else must be non-negative.
        if item_type != ItemType::Discount && unit_price.is_negative() {
            return Err(DomainError::validation(
                "unit price must not be negative for non-discount items",
            ));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenWorkOrder) -> Result<Vec<WorkOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("work order already exists"));
        }

        Ok(vec![WorkOrderEvent::WorkOrderOpened(WorkOrderOpened {
            shop_id: cmd.shop_id,
            work_order_id: cmd.work_order_id,
            number: cmd.number,
            customer_id: cmd.customer_id,
            vehicle_id: cmd.vehicle_id,
            appointment_id: cmd.appointment_id,
            tax_rate: cmd.tax_rate.unwrap_or_default(),
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<WorkOrderEvent>, DomainError> {
        self.ensure_exists(cmd.shop_id, cmd.work_order_id)?;
        self.ensure_editable()?;

        if cmd.description.trim().is_empty() {
            return Err(DomainError::validation("item description must not be empty"));
        }
        Self::validate_price_for_type(cmd.item_type, cmd.unit_price)?;

        let total = line_total(cmd.quantity, cmd.unit_price)
            .ok_or_else(|| DomainError::invariant("line total overflow"))?;

        let item = WorkOrderItem {
            id: cmd.item_id,
            item_type: cmd.item_type,
            service_id: cmd.service_id,
            description: cmd.description.clone(),
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            cost: cmd.cost,
            total,
            status: ItemStatus::Unspecified,
            technician: cmd.technician,
            sort_order: (self.items.len() as u32) + 1,
        };

        Ok(vec![WorkOrderEvent::ItemAdded(ItemAdded {
            shop_id: cmd.shop_id,
            work_order_id: cmd.work_order_id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_item(&self, cmd: &UpdateItem) -> Result<Vec<WorkOrderEvent>, DomainError> {
        self.ensure_exists(cmd.shop_id, cmd.work_order_id)?;
        self.ensure_editable()?;

        let mut item = self
            .items
            .iter()
            .find(|i| i.id == cmd.item_id)
            .cloned()
            .ok_or_else(DomainError::not_found)?;

        if let Some(item_type) = cmd.item_type {
            item.item_type = item_type;
        }
        if let Some(description) = &cmd.description {
            if description.trim().is_empty() {
                return Err(DomainError::validation("item description must not be empty"));
            }
            item.description = description.clone();
        }
        if let Some(quantity) = cmd.quantity {
            item.quantity = quantity;
        }
        if let Some(unit_price) = cmd.unit_price {
            item.unit_price = unit_price;
        }
        if let Some(cost) = cmd.cost {
            item.cost = Some(cost);
        }
        if let Some(status) = cmd.status {
            item.status = status;
        }
        if let Some(technician) = cmd.technician {
            item.technician = Some(technician);
        }

        Self::validate_price_for_type(item.item_type, item.unit_price)?;

        // Full recompute even for single-field edits; no partial shortcut.
        item.total = line_total(item.quantity, item.unit_price)
            .ok_or_else(|| DomainError::invariant("line total overflow"))?;

        Ok(vec![WorkOrderEvent::ItemUpdated(ItemUpdated {
            shop_id: cmd.shop_id,
            work_order_id: cmd.work_order_id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<WorkOrderEvent>, DomainError> {
        self.ensure_exists(cmd.shop_id, cmd.work_order_id)?;
        self.ensure_editable()?;

        if !self.items.iter().any(|i| i.id == cmd.item_id) {
            return Err(DomainError::not_found());
        }

        Ok(vec![WorkOrderEvent::ItemRemoved(ItemRemoved {
            shop_id: cmd.shop_id,
            work_order_id: cmd.work_order_id,
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_discount(&self, cmd: &SetDiscount) -> Result<Vec<WorkOrderEvent>, DomainError> {
        self.ensure_exists(cmd.shop_id, cmd.work_order_id)?;
        self.ensure_editable()?;

        if cmd.discount.is_negative() {
            return Err(DomainError::validation("discount must not be negative"));
        }

        Ok(vec![WorkOrderEvent::DiscountChanged(DiscountChanged {
            shop_id: cmd.shop_id,
            work_order_id: cmd.work_order_id,
            discount: cmd.discount,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_tax_rate(&self, cmd: &SetTaxRate) -> Result<Vec<WorkOrderEvent>, DomainError> {
        self.ensure_exists(cmd.shop_id, cmd.work_order_id)?;
        self.ensure_editable()?;

        Ok(vec![WorkOrderEvent::TaxRateChanged(TaxRateChanged {
            shop_id: cmd.shop_id,
            work_order_id: cmd.work_order_id,
            tax_rate: cmd.tax_rate,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_notes(&self, cmd: &SetNotes) -> Result<Vec<WorkOrderEvent>, DomainError> {
        self.ensure_exists(cmd.shop_id, cmd.work_order_id)?;

        Ok(vec![WorkOrderEvent::NotesChanged(NotesChanged {
            shop_id: cmd.shop_id,
            work_order_id: cmd.work_order_id,
            notes: cmd.notes.clone(),
            internal_notes: cmd.internal_notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<WorkOrderEvent>, DomainError> {
        self.ensure_exists(cmd.shop_id, cmd.work_order_id)?;

        if cmd.to == self.status {
            return Err(DomainError::conflict(format!(
                "work order is already {}",
                self.status
            )));
        }

        if !transition_allowed(self.status, cmd.to, TransitionKind::Requested) {
            return Err(DomainError::conflict(format!(
                "illegal status transition: {} -> {}",
                self.status, cmd.to
            )));
        }

        Ok(vec![WorkOrderEvent::StatusChanged(StatusChanged {
            shop_id: cmd.shop_id,
            work_order_id: cmd.work_order_id,
            from: self.status,
            to: cmd.to,
            kind: TransitionKind::Requested,
            changed_by: cmd
                .changed_by
                .clone()
                .unwrap_or_else(|| GENERIC_STAFF_ACTOR.to_string()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply_decisions(
        &self,
        cmd: &ApplyDecisions,
    ) -> Result<Vec<WorkOrderEvent>, DomainError> {
        self.ensure_exists(cmd.shop_id, cmd.work_order_id)?;

        if !self.status.is_pending_approval() {
            return Err(DomainError::conflict(
                "estimate no longer pending approval",
            ));
        }

        let resolved: Vec<ItemDecision> = match &cmd.decisions {
            ApprovalDecisions::ApproveAll => self
                .items
                .iter()
                .filter(|i| i.status != ItemStatus::Declined)
                .map(|i| ItemDecision {
                    item_id: i.id,
                    decision: Decision::Approved,
                })
                .collect(),
            ApprovalDecisions::PerItem(list) => {
                if list.is_empty() {
                    return Err(DomainError::validation("decisions must not be empty"));
                }
                for verdict in list {
                    if !self.items.iter().any(|i| i.id == verdict.item_id) {
                        return Err(DomainError::not_found());
                    }
                }
                list.clone()
            }
        };

        let authorized_by = cmd
            .authorized_by
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| cmd.method.generic_actor().to_string());

        Ok(vec![
            WorkOrderEvent::DecisionsApplied(DecisionsApplied {
                shop_id: cmd.shop_id,
                work_order_id: cmd.work_order_id,
                items: resolved,
                method: cmd.method,
                authorized_by: authorized_by.clone(),
                occurred_at: cmd.occurred_at,
            }),
            WorkOrderEvent::StatusChanged(StatusChanged {
                shop_id: cmd.shop_id,
                work_order_id: cmd.work_order_id,
                from: self.status,
                to: WorkOrderStatus::Approved,
                kind: TransitionKind::Requested,
                changed_by: authorized_by,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_record_payment(
        &self,
        cmd: &RecordPayment,
    ) -> Result<Vec<WorkOrderEvent>, DomainError> {
        self.ensure_exists(cmd.shop_id, cmd.work_order_id)?;

        if self.status == WorkOrderStatus::Void {
            return Err(DomainError::invariant(
                "cannot record a payment on a void work order",
            ));
        }
        if !cmd.amount.is_positive() {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let payment = Payment {
            id: cmd.payment_id,
            amount: cmd.amount,
            method: cmd.method,
            status: PaymentStatus::Completed,
            reference_number: cmd.reference_number.clone(),
            notes: cmd.notes.clone(),
            created_at: cmd.occurred_at,
        };

        let total_paid = self
            .amount_paid()
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invariant("cumulative payments overflow"))?;
        let balance_due = self.totals.total.saturating_sub_floor_zero(total_paid);

        let mut events = vec![WorkOrderEvent::PaymentRecorded(PaymentRecorded {
            shop_id: cmd.shop_id,
            work_order_id: cmd.work_order_id,
            payment,
            total_paid,
            balance_due,
            occurred_at: cmd.occurred_at,
        })];

        // Amount-triggered transition: completed payments cover the total.
        // Emitted in the same batch so both commit atomically or not at all.
        if total_paid >= self.totals.total
            && self.status != WorkOrderStatus::Paid
            && transition_allowed(self.status, WorkOrderStatus::Paid, TransitionKind::System)
        {
            events.push(WorkOrderEvent::StatusChanged(StatusChanged {
                shop_id: cmd.shop_id,
                work_order_id: cmd.work_order_id,
                from: self.status,
                to: WorkOrderStatus::Paid,
                kind: TransitionKind::System,
                changed_by: "payment reconciliation".to_string(),
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }
}
