//! Work order list read model, maintained from the event bus.
//!
//! The projection is disposable: it can be cleared and rebuilt from the
//! event streams at any time. Per-stream cursors make `apply_envelope`
//! idempotent under at-least-once delivery.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use autoshop_core::{
    AggregateId, AppointmentId, Cents, CustomerId, ShopId, TaxRate, VehicleId,
};
use autoshop_events::EventEnvelope;
use autoshop_workorder::{
    Decision, ItemStatus, Totals, WORK_ORDER_AGGREGATE_TYPE, WorkOrderEvent, WorkOrderId,
    WorkOrderItem, WorkOrderStatus, display_number,
};

use crate::read_model::ShopStore;

/// One work order as the list/detail queries see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrderReadModel {
    pub work_order_id: WorkOrderId,
    pub number: u64,
    pub status: WorkOrderStatus,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub appointment_id: Option<AppointmentId>,
    pub items: Vec<WorkOrderItem>,
    pub discount: Cents,
    pub tax_rate: TaxRate,
    pub totals: Totals,
    pub amount_paid: Cents,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrderReadModel {
    pub fn display_id(&self) -> String {
        display_number(self.number)
    }

    pub fn balance_due(&self) -> Cents {
        self.totals.total.saturating_sub_floor_zero(self.amount_paid)
    }

    fn recompute(&mut self) {
        self.totals = Totals::compute(&self.items, self.discount, self.tax_rate);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    shop_id: ShopId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum WorkOrderProjectionError {
    #[error("failed to deserialize work order event: {0}")]
    Deserialize(String),
    #[error("shop isolation violation: {0}")]
    ShopIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
    #[error("event arrived before the opening event for its stream")]
    MissingOpen,
}

#[derive(Debug)]
pub struct WorkOrdersProjection<S>
where
    S: ShopStore<WorkOrderId, WorkOrderReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> WorkOrdersProjection<S>
where
    S: ShopStore<WorkOrderId, WorkOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn cursor(&self, shop_id: ShopId, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors
                .get(&CursorKey { shop_id, aggregate_id })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, shop_id: ShopId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(CursorKey { shop_id, aggregate_id }, seq);
        }
    }

    pub fn get(&self, shop_id: ShopId, work_order_id: &WorkOrderId) -> Option<WorkOrderReadModel> {
        self.store.get(shop_id, work_order_id)
    }

    /// All work orders for a shop, optionally filtered by status,
    /// newest number first.
    pub fn list(&self, shop_id: ShopId, status: Option<WorkOrderStatus>) -> Vec<WorkOrderReadModel> {
        let mut all = self.store.list(shop_id);
        if let Some(status) = status {
            all.retain(|rm| rm.status == status);
        }
        all.sort_by(|a, b| b.number.cmp(&a.number));
        all
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), WorkOrderProjectionError> {
        if envelope.aggregate_type() != WORK_ORDER_AGGREGATE_TYPE {
            return Ok(());
        }

        let shop_id = envelope.shop_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursor(shop_id, aggregate_id);
        if seq == 0 {
            return Err(WorkOrderProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate delivery; already applied.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(WorkOrderProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: WorkOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| WorkOrderProjectionError::Deserialize(e.to_string()))?;

        let (event_shop, work_order_id) = event_refs(&ev);
        if event_shop != shop_id {
            return Err(WorkOrderProjectionError::ShopIsolation(
                "event shop_id does not match envelope shop_id".to_string(),
            ));
        }
        if work_order_id.0 != aggregate_id {
            return Err(WorkOrderProjectionError::ShopIsolation(
                "event work_order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let occurred_at = autoshop_events::Event::occurred_at(&ev);

        match ev {
            WorkOrderEvent::WorkOrderOpened(e) => {
                self.store.upsert(
                    shop_id,
                    e.work_order_id,
                    WorkOrderReadModel {
                        work_order_id: e.work_order_id,
                        number: e.number,
                        status: WorkOrderStatus::Draft,
                        customer_id: e.customer_id,
                        vehicle_id: e.vehicle_id,
                        appointment_id: e.appointment_id,
                        items: vec![],
                        discount: Cents::ZERO,
                        tax_rate: e.tax_rate,
                        totals: Totals::default(),
                        amount_paid: Cents::ZERO,
                        updated_at: occurred_at,
                    },
                );
            }
            other => {
                let mut rm = self
                    .store
                    .get(shop_id, &work_order_id)
                    .ok_or(WorkOrderProjectionError::MissingOpen)?;

                match other {
                    WorkOrderEvent::WorkOrderOpened(_) => unreachable!(),
                    WorkOrderEvent::ItemAdded(e) => {
                        rm.items.push(e.item);
                        rm.recompute();
                    }
                    WorkOrderEvent::ItemUpdated(e) => {
                        if let Some(existing) = rm.items.iter_mut().find(|i| i.id == e.item.id) {
                            *existing = e.item;
                        }
                        rm.recompute();
                    }
                    WorkOrderEvent::ItemRemoved(e) => {
                        rm.items.retain(|i| i.id != e.item_id);
                        rm.recompute();
                    }
                    WorkOrderEvent::DiscountChanged(e) => {
                        rm.discount = e.discount;
                        rm.recompute();
                    }
                    WorkOrderEvent::TaxRateChanged(e) => {
                        rm.tax_rate = e.tax_rate;
                        rm.recompute();
                    }
                    WorkOrderEvent::NotesChanged(_) => {}
                    WorkOrderEvent::StatusChanged(e) => {
                        rm.status = e.to;
                    }
                    WorkOrderEvent::DecisionsApplied(e) => {
                        for verdict in &e.items {
                            if let Some(item) =
                                rm.items.iter_mut().find(|i| i.id == verdict.item_id)
                            {
                                item.status = match verdict.decision {
                                    Decision::Approved => ItemStatus::Approved,
                                    Decision::Declined => ItemStatus::Declined,
                                };
                            }
                        }
                        rm.recompute();
                    }
                    WorkOrderEvent::PaymentRecorded(e) => {
                        rm.amount_paid = e.total_paid;
                    }
                }

                rm.updated_at = occurred_at;
                self.store.upsert(shop_id, work_order_id, rm);
            }
        }

        self.update_cursor(shop_id, aggregate_id, seq);
        Ok(())
    }
}

fn event_refs(ev: &WorkOrderEvent) -> (ShopId, WorkOrderId) {
    match ev {
        WorkOrderEvent::WorkOrderOpened(e) => (e.shop_id, e.work_order_id),
        WorkOrderEvent::ItemAdded(e) => (e.shop_id, e.work_order_id),
        WorkOrderEvent::ItemUpdated(e) => (e.shop_id, e.work_order_id),
        WorkOrderEvent::ItemRemoved(e) => (e.shop_id, e.work_order_id),
        WorkOrderEvent::DiscountChanged(e) => (e.shop_id, e.work_order_id),
        WorkOrderEvent::TaxRateChanged(e) => (e.shop_id, e.work_order_id),
        WorkOrderEvent::NotesChanged(e) => (e.shop_id, e.work_order_id),
        WorkOrderEvent::StatusChanged(e) => (e.shop_id, e.work_order_id),
        WorkOrderEvent::DecisionsApplied(e) => (e.shop_id, e.work_order_id),
        WorkOrderEvent::PaymentRecorded(e) => (e.shop_id, e.work_order_id),
    }
}
