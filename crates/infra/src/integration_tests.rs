//! Full pipeline tests: dispatcher -> store -> bus -> projection worker and
//! notification worker, all in memory.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use autoshop_core::{
    AggregateId, Cents, CustomerId, ExpectedVersion, Quantity, ShopId, TaxRate, VehicleId,
};
use autoshop_events::{EventEnvelope, InMemoryEventBus};
use autoshop_workorder::{
    AddItem, ApplyDecisions, ApprovalDecisions, AuthorizationMethod, ChangeStatus, Decision,
    ItemDecision, ItemId, ItemType, OpenWorkOrder, PaymentId, PaymentMethod, RecordPayment,
    SetTaxRate, WORK_ORDER_AGGREGATE_TYPE, WorkOrder, WorkOrderCommand, WorkOrderId,
    WorkOrderStatus,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, UncommittedEvent};
use crate::notifications::{
    Contact, InMemoryContactDirectory, RecordingGateway, spawn_notification_worker,
};
use crate::projections::{WorkOrderReadModel, WorkOrdersProjection};
use crate::read_model::InMemoryShopStore;
use crate::workers::BusWorker;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Store = Arc<InMemoryEventStore>;
type Projection = Arc<WorkOrdersProjection<Arc<InMemoryShopStore<WorkOrderId, WorkOrderReadModel>>>>;

struct Harness {
    shop_id: ShopId,
    work_order_id: WorkOrderId,
    customer_id: CustomerId,
    vehicle_id: VehicleId,
    dispatcher: CommandDispatcher<Store, Bus>,
    projection: Projection,
    gateway: Arc<RecordingGateway>,
    workers: Vec<crate::workers::WorkerHandle>,
}

impl Harness {
    fn new() -> Self {
        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let projection: Projection =
            Arc::new(WorkOrdersProjection::new(Arc::new(InMemoryShopStore::new())));
        let gateway = Arc::new(RecordingGateway::new());
        let directory = Arc::new(InMemoryContactDirectory::new());

        let projection_worker = {
            let projection = Arc::clone(&projection);
            BusWorker::spawn("work-orders-projection", Arc::clone(&bus), None, move |env| {
                projection.apply_envelope(&env)
            })
        };
        let notification_worker = spawn_notification_worker(
            Arc::clone(&bus),
            Arc::clone(&gateway),
            Arc::clone(&directory),
        );

        let shop_id = ShopId::new();
        let customer_id = CustomerId::new();
        let vehicle_id = VehicleId::new();
        directory.insert_contact(
            shop_id,
            customer_id,
            Contact {
                display_name: "Dana Whitfield".to_string(),
                email: Some("dana@example.com".to_string()),
                phone: None,
            },
        );
        directory.insert_vehicle(shop_id, vehicle_id, "2019 Subaru Outback".to_string());

        Self {
            shop_id,
            work_order_id: WorkOrderId::new(AggregateId::new()),
            customer_id,
            vehicle_id,
            dispatcher: CommandDispatcher::new(store, bus),
            projection,
            gateway,
            workers: vec![projection_worker, notification_worker],
        }
    }

    fn dispatch(&self, command: WorkOrderCommand) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch::<WorkOrder>(
                self.shop_id,
                self.work_order_id.0,
                WORK_ORDER_AGGREGATE_TYPE,
                command,
                |_, id| WorkOrder::empty(WorkOrderId::new(id)),
            )
            .map(|_| ())
    }

    fn open(&self) {
        self.dispatch(WorkOrderCommand::OpenWorkOrder(OpenWorkOrder {
            shop_id: self.shop_id,
            work_order_id: self.work_order_id,
            number: 7,
            customer_id: self.customer_id,
            vehicle_id: self.vehicle_id,
            appointment_id: None,
            tax_rate: Some(TaxRate::zero()),
            notes: None,
            occurred_at: Utc::now(),
        }))
        .unwrap();
    }

    fn add_item(&self, item_type: ItemType, quantity: i64, unit_price: i64) -> ItemId {
        let item_id = ItemId::new();
        self.dispatch(WorkOrderCommand::AddItem(AddItem {
            shop_id: self.shop_id,
            work_order_id: self.work_order_id,
            item_id,
            item_type,
            service_id: None,
            description: "pipeline test item".to_string(),
            quantity: Quantity::new(Decimal::from(quantity)).unwrap(),
            unit_price: Cents::new(unit_price),
            cost: None,
            technician: None,
            occurred_at: Utc::now(),
        }))
        .unwrap();
        item_id
    }

    fn change_status(&self, to: WorkOrderStatus) {
        self.dispatch(WorkOrderCommand::ChangeStatus(ChangeStatus {
            shop_id: self.shop_id,
            work_order_id: self.work_order_id,
            to,
            changed_by: None,
            occurred_at: Utc::now(),
        }))
        .unwrap();
    }

    fn read_model(&self) -> Option<WorkOrderReadModel> {
        self.projection.get(self.shop_id, &self.work_order_id)
    }

    fn shutdown(self) {
        for worker in self.workers {
            worker.shutdown();
        }
    }
}

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn full_pipeline_from_draft_to_paid() {
    let h = Harness::new();

    h.open();
    h.add_item(ItemType::Labor, 1, 8_000);
    let part_id = h.add_item(ItemType::Part, 2, 1_500);
    h.dispatch(WorkOrderCommand::SetTaxRate(SetTaxRate {
        shop_id: h.shop_id,
        work_order_id: h.work_order_id,
        tax_rate: TaxRate::default(),
        occurred_at: Utc::now(),
    }))
    .unwrap();

    h.change_status(WorkOrderStatus::Estimated);
    h.change_status(WorkOrderStatus::SentToCustomer);

    h.dispatch(WorkOrderCommand::ApplyDecisions(ApplyDecisions {
        shop_id: h.shop_id,
        work_order_id: h.work_order_id,
        decisions: ApprovalDecisions::PerItem(vec![ItemDecision {
            item_id: part_id,
            decision: Decision::Declined,
        }]),
        method: AuthorizationMethod::CustomerPortal,
        authorized_by: None,
        occurred_at: Utc::now(),
    }))
    .unwrap();

    h.change_status(WorkOrderStatus::InProgress);
    h.change_status(WorkOrderStatus::Completed);
    h.change_status(WorkOrderStatus::Invoiced);

    // 8000 + 13% = 9040 after the part was declined.
    h.dispatch(WorkOrderCommand::RecordPayment(RecordPayment {
        shop_id: h.shop_id,
        work_order_id: h.work_order_id,
        payment_id: PaymentId::new(),
        amount: Cents::new(9_040),
        method: PaymentMethod::Card,
        reference_number: None,
        notes: None,
        occurred_at: Utc::now(),
    }))
    .unwrap();

    wait_for("read model to reach paid", || {
        h.read_model().is_some_and(|rm| rm.status == WorkOrderStatus::Paid)
    });

    let rm = h.read_model().unwrap();
    assert_eq!(rm.display_id(), "WO-1007");
    assert_eq!(rm.totals.subtotal, Cents::new(8_000));
    assert_eq!(rm.totals.tax, Cents::new(1_040));
    assert_eq!(rm.totals.total, Cents::new(9_040));
    assert_eq!(rm.amount_paid, Cents::new(9_040));
    assert_eq!(rm.balance_due(), Cents::ZERO);

    wait_for("customer-facing notifications", || h.gateway.sent().len() >= 4);
    let sent = h.gateway.sent();
    let templates: Vec<&str> = sent.iter().map(|r| r.template_context.as_str()).collect();
    assert_eq!(
        templates,
        vec!["estimate_sent", "work_started", "work_completed", "invoice_ready"]
    );
    assert!(sent.iter().all(|r| r.recipient == "dana@example.com"));
    assert!(
        sent.iter()
            .all(|r| r.vehicle_description.as_deref() == Some("2019 Subaru Outback"))
    );

    h.shutdown();
}

#[test]
fn stale_append_is_rejected_by_optimistic_concurrency() {
    // Two writers race the same stream: the first append at version 0 wins,
    // the second append still expecting version 0 loses.
    let store = InMemoryEventStore::new();
    let shop_id = ShopId::new();
    let aggregate_id = AggregateId::new();

    let event = || UncommittedEvent {
        event_id: uuid::Uuid::now_v7(),
        shop_id,
        aggregate_id,
        aggregate_type: WORK_ORDER_AGGREGATE_TYPE.to_string(),
        event_type: "workorder.notes_changed".to_string(),
        event_version: 1,
        occurred_at: Utc::now(),
        payload: serde_json::json!({}),
    };

    store
        .append(vec![event()], ExpectedVersion::Exact(0))
        .unwrap();
    let err = store
        .append(vec![event()], ExpectedVersion::Exact(0))
        .unwrap_err();
    assert!(matches!(err, EventStoreError::Concurrency(_)));

    // Retrying against the fresh version succeeds.
    store
        .append(vec![event()], ExpectedVersion::Exact(1))
        .unwrap();
}

#[test]
fn illegal_transition_through_dispatcher_is_a_conflict() {
    let h = Harness::new();
    h.open();

    let err = h
        .dispatch(WorkOrderCommand::ChangeStatus(ChangeStatus {
            shop_id: h.shop_id,
            work_order_id: h.work_order_id,
            to: WorkOrderStatus::Completed,
            changed_by: None,
            occurred_at: Utc::now(),
        }))
        .unwrap_err();
    assert!(matches!(err, DispatchError::Concurrency(_)));

    h.shutdown();
}

#[test]
fn notification_failure_never_blocks_state_changes() {
    let h = Harness::new();
    h.open();
    h.add_item(ItemType::Labor, 1, 5_000);
    h.change_status(WorkOrderStatus::Estimated);

    // Gateway down: the transition still commits and the worker stays alive.
    h.gateway.fail_next_sends(true);
    h.change_status(WorkOrderStatus::SentToCustomer);

    wait_for("read model to reach sent_to_customer", || {
        h.read_model()
            .is_some_and(|rm| rm.status == WorkOrderStatus::SentToCustomer)
    });
    assert!(h.gateway.sent().is_empty());

    // Gateway back up: the next customer-facing transition notifies again.
    h.gateway.fail_next_sends(false);
    h.dispatch(WorkOrderCommand::ApplyDecisions(ApplyDecisions {
        shop_id: h.shop_id,
        work_order_id: h.work_order_id,
        decisions: ApprovalDecisions::ApproveAll,
        method: AuthorizationMethod::Staff,
        authorized_by: None,
        occurred_at: Utc::now(),
    }))
    .unwrap();
    h.change_status(WorkOrderStatus::InProgress);

    wait_for("work_started notification", || {
        h.gateway
            .sent()
            .iter()
            .any(|r| r.template_context == "work_started")
    });

    h.shutdown();
}

#[test]
fn unreachable_contact_is_skipped_silently() {
    let h = Harness::new();
    // No contact on file for this customer.
    let lonely_customer = CustomerId::new();
    h.dispatch(WorkOrderCommand::OpenWorkOrder(OpenWorkOrder {
        shop_id: h.shop_id,
        work_order_id: h.work_order_id,
        number: 8,
        customer_id: lonely_customer,
        vehicle_id: h.vehicle_id,
        appointment_id: None,
        tax_rate: None,
        notes: None,
        occurred_at: Utc::now(),
    }))
    .unwrap();
    h.change_status(WorkOrderStatus::Estimated);
    h.change_status(WorkOrderStatus::SentToCustomer);

    wait_for("read model to reach sent_to_customer", || {
        h.read_model()
            .is_some_and(|rm| rm.status == WorkOrderStatus::SentToCustomer)
    });
    assert!(h.gateway.sent().is_empty());

    h.shutdown();
}

#[test]
fn list_filters_by_status_within_one_shop() {
    let h = Harness::new();
    h.open();
    h.change_status(WorkOrderStatus::Estimated);

    // Second order in the same shop stays in draft.
    let second = WorkOrderId::new(AggregateId::new());
    h.dispatcher
        .dispatch::<WorkOrder>(
            h.shop_id,
            second.0,
            WORK_ORDER_AGGREGATE_TYPE,
            WorkOrderCommand::OpenWorkOrder(OpenWorkOrder {
                shop_id: h.shop_id,
                work_order_id: second,
                number: 9,
                customer_id: h.customer_id,
                vehicle_id: h.vehicle_id,
                appointment_id: None,
                tax_rate: None,
                notes: None,
                occurred_at: Utc::now(),
            }),
            |_, id| WorkOrder::empty(WorkOrderId::new(id)),
        )
        .unwrap();

    wait_for("both orders projected", || {
        h.projection.list(h.shop_id, None).len() == 2
    });

    let drafts = h.projection.list(h.shop_id, Some(WorkOrderStatus::Draft));
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].work_order_id, second);

    // Other shops see nothing.
    assert!(h.projection.list(ShopId::new(), None).is_empty());

    h.shutdown();
}
