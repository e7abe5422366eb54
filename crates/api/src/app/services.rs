use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use autoshop_core::{AggregateId, AppointmentId, DomainError, ShopId};
use autoshop_events::{EventEnvelope, InMemoryEventBus};
use autoshop_infra::{
    catalog::{CatalogEntry, InMemoryServiceCatalog, ServiceCatalog},
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{EventStore, InMemoryEventStore, StoredEvent},
    notifications::{InMemoryContactDirectory, NotificationGateway, spawn_notification_worker},
    projections::{WorkOrderReadModel, WorkOrdersProjection},
    read_model::InMemoryShopStore,
    workers::{BusWorker, WorkerHandle},
};
use autoshop_workorder::{WorkOrder, WorkOrderEvent, WorkOrderId, WorkOrderStatus};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Store = Arc<InMemoryEventStore>;
type Projection = Arc<WorkOrdersProjection<Arc<InMemoryShopStore<WorkOrderId, WorkOrderReadModel>>>>;
type Dispatcher = CommandDispatcher<Store, Bus>;

/// What a resolved portal token grants: one customer acting on one work
/// order in one shop. The engine trusts this identity completely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalGrant {
    pub shop_id: ShopId,
    pub work_order_id: WorkOrderId,
    pub customer_name: Option<String>,
}

/// All wiring behind the HTTP handlers.
pub struct AppServices {
    dispatcher: Dispatcher,
    store: Store,
    projection: Projection,
    catalog: Arc<InMemoryServiceCatalog>,
    directory: Arc<InMemoryContactDirectory>,
    /// Per-shop durable order number counters.
    numbers: Mutex<HashMap<ShopId, u64>>,
    /// One open work order per appointment.
    appointments: Mutex<HashMap<(ShopId, AppointmentId), WorkOrderId>>,
    portal_tokens: RwLock<HashMap<String, PortalGrant>>,
    workers: Mutex<Vec<WorkerHandle>>,
}

/// Wire up in-memory infra: store + bus + projection worker + notification
/// worker, using a gateway that just logs deliveries.
pub fn build_services() -> AppServices {
    struct LoggingGateway;
    impl NotificationGateway for LoggingGateway {
        fn send(
            &self,
            request: autoshop_infra::notifications::NotificationRequest,
        ) -> Result<(), autoshop_infra::notifications::NotificationError> {
            tracing::info!(
                recipient = %request.recipient,
                template = %request.template_context,
                work_order_id = %request.work_order_id,
                "notification dispatched"
            );
            Ok(())
        }
    }

    build_services_with_gateway(Arc::new(LoggingGateway))
}

pub fn build_services_with_gateway<G>(gateway: G) -> AppServices
where
    G: NotificationGateway + 'static,
{
    let store: Store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let projection: Projection =
        Arc::new(WorkOrdersProjection::new(Arc::new(InMemoryShopStore::new())));
    let directory = Arc::new(InMemoryContactDirectory::new());

    let projection_worker = {
        let projection = Arc::clone(&projection);
        BusWorker::spawn("work-orders-projection", Arc::clone(&bus), None, move |env| {
            projection.apply_envelope(&env)
        })
    };
    let notification_worker =
        spawn_notification_worker(Arc::clone(&bus), gateway, Arc::clone(&directory));

    AppServices {
        dispatcher: CommandDispatcher::new(Arc::clone(&store), bus),
        store,
        projection,
        catalog: Arc::new(InMemoryServiceCatalog::new()),
        directory,
        numbers: Mutex::new(HashMap::new()),
        appointments: Mutex::new(HashMap::new()),
        portal_tokens: RwLock::new(HashMap::new()),
        workers: Mutex::new(vec![projection_worker, notification_worker]),
    }
}

impl AppServices {
    pub fn dispatch<A>(
        &self,
        shop_id: ShopId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(ShopId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: autoshop_core::Aggregate<Error = DomainError>,
        A::Event: autoshop_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch::<A>(shop_id, aggregate_id, aggregate_type, command, make_aggregate)
    }

    /// Rehydrate a work order from its stream (authoritative detail view).
    pub fn load_work_order(
        &self,
        shop_id: ShopId,
        work_order_id: WorkOrderId,
    ) -> Result<WorkOrder, DispatchError> {
        let history = self.store.load_stream(shop_id, work_order_id.0)?;
        if history.is_empty() {
            return Err(DispatchError::NotFound);
        }

        let mut aggregate = WorkOrder::empty(work_order_id);
        let mut sorted = history;
        sorted.sort_by_key(|e| e.sequence_number);
        for stored in sorted {
            let ev: WorkOrderEvent = serde_json::from_value(stored.payload)
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            autoshop_core::Aggregate::apply(&mut aggregate, &ev);
        }
        Ok(aggregate)
    }

    pub fn work_order_get(
        &self,
        shop_id: ShopId,
        work_order_id: &WorkOrderId,
    ) -> Option<WorkOrderReadModel> {
        self.projection.get(shop_id, work_order_id)
    }

    pub fn work_orders_list(
        &self,
        shop_id: ShopId,
        status: Option<WorkOrderStatus>,
    ) -> Vec<WorkOrderReadModel> {
        self.projection.list(shop_id, status)
    }

    /// Next per-shop order number (durable in a real deployment; monotonic
    /// per process here).
    pub fn allocate_number(&self, shop_id: ShopId) -> u64 {
        let mut numbers = self.numbers.lock().unwrap_or_else(|e| e.into_inner());
        let counter = numbers.entry(shop_id).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Claim an appointment for a new work order. Returns the already-linked
    /// work order id when the appointment was claimed before.
    pub fn claim_appointment(
        &self,
        shop_id: ShopId,
        appointment_id: AppointmentId,
        work_order_id: WorkOrderId,
    ) -> Result<(), WorkOrderId> {
        let mut map = self.appointments.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(&(shop_id, appointment_id)) {
            Some(existing) => Err(*existing),
            None => {
                map.insert((shop_id, appointment_id), work_order_id);
                Ok(())
            }
        }
    }

    /// Undo a claim when the open command fails after claiming.
    pub fn release_appointment(&self, shop_id: ShopId, appointment_id: AppointmentId) {
        let mut map = self.appointments.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&(shop_id, appointment_id));
    }

    pub fn catalog_lookup(
        &self,
        shop_id: ShopId,
        service_id: autoshop_core::ServiceId,
    ) -> Option<CatalogEntry> {
        self.catalog.lookup(shop_id, service_id)
    }

    pub fn catalog(&self) -> &Arc<InMemoryServiceCatalog> {
        &self.catalog
    }

    pub fn directory(&self) -> &Arc<InMemoryContactDirectory> {
        &self.directory
    }

    /// Mint an opaque portal token for a customer to act on one work order.
    pub fn issue_portal_token(
        &self,
        shop_id: ShopId,
        work_order_id: WorkOrderId,
        customer_name: Option<String>,
    ) -> String {
        let token = Uuid::now_v7().simple().to_string();
        if let Ok(mut tokens) = self.portal_tokens.write() {
            tokens.insert(
                token.clone(),
                PortalGrant {
                    shop_id,
                    work_order_id,
                    customer_name,
                },
            );
        }
        token
    }

    pub fn resolve_portal_token(&self, token: &str) -> Option<PortalGrant> {
        self.portal_tokens.read().ok()?.get(token).cloned()
    }

    /// Stop background workers (graceful shutdown, used by tests).
    pub fn shutdown_workers(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for worker in workers.drain(..) {
            worker.shutdown();
        }
    }
}
