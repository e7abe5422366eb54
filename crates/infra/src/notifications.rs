//! Outbound customer notifications, decoupled from the mutation path.
//!
//! Status changes land on the event bus after they are committed; a
//! background worker turns the customer-facing ones into
//! `NotificationRequest`s and hands them to a gateway. A gateway failure or
//! an unreachable contact is logged and dropped — it can never affect the
//! committed status change that triggered it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use autoshop_core::{AggregateId, CustomerId, ShopId, VehicleId};
use autoshop_events::{EventBus, EventEnvelope};
use autoshop_workorder::{WORK_ORDER_AGGREGATE_TYPE, WorkOrderEvent, WorkOrderId};

use crate::workers::{BusWorker, WorkerHandle};

/// What a gateway is asked to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Resolved contact address (email or phone).
    pub recipient: String,
    /// Template selector: estimate_sent, work_started, work_completed,
    /// invoice_ready.
    pub template_context: String,
    pub vehicle_description: Option<String>,
    pub customer_id: CustomerId,
    pub work_order_id: WorkOrderId,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification send failed: {0}")]
    Send(String),
}

/// Delivery seam. Implementations own transport (email, SMS, push).
pub trait NotificationGateway: Send + Sync {
    fn send(&self, request: NotificationRequest) -> Result<(), NotificationError>;
}

impl<G> NotificationGateway for Arc<G>
where
    G: NotificationGateway + ?Sized,
{
    fn send(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        (**self).send(request)
    }
}

/// A reachable customer contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    /// Preferred delivery address: email first, phone second.
    pub fn recipient(&self) -> Option<String> {
        self.email.clone().or_else(|| self.phone.clone())
    }
}

/// Resolves customers and vehicles to displayable contact data. Backed by
/// whatever CRM the shop runs; in-memory here.
pub trait ContactDirectory: Send + Sync {
    fn contact_for(&self, shop_id: ShopId, customer_id: CustomerId) -> Option<Contact>;
    fn vehicle_description(&self, shop_id: ShopId, vehicle_id: VehicleId) -> Option<String>;
}

impl<D> ContactDirectory for Arc<D>
where
    D: ContactDirectory + ?Sized,
{
    fn contact_for(&self, shop_id: ShopId, customer_id: CustomerId) -> Option<Contact> {
        (**self).contact_for(shop_id, customer_id)
    }

    fn vehicle_description(&self, shop_id: ShopId, vehicle_id: VehicleId) -> Option<String> {
        (**self).vehicle_description(shop_id, vehicle_id)
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryContactDirectory {
    contacts: RwLock<HashMap<(ShopId, CustomerId), Contact>>,
    vehicles: RwLock<HashMap<(ShopId, VehicleId), String>>,
}

impl InMemoryContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_contact(&self, shop_id: ShopId, customer_id: CustomerId, contact: Contact) {
        if let Ok(mut map) = self.contacts.write() {
            map.insert((shop_id, customer_id), contact);
        }
    }

    pub fn insert_vehicle(&self, shop_id: ShopId, vehicle_id: VehicleId, description: String) {
        if let Ok(mut map) = self.vehicles.write() {
            map.insert((shop_id, vehicle_id), description);
        }
    }
}

impl ContactDirectory for InMemoryContactDirectory {
    fn contact_for(&self, shop_id: ShopId, customer_id: CustomerId) -> Option<Contact> {
        self.contacts.read().ok()?.get(&(shop_id, customer_id)).cloned()
    }

    fn vehicle_description(&self, shop_id: ShopId, vehicle_id: VehicleId) -> Option<String> {
        self.vehicles.read().ok()?.get(&(shop_id, vehicle_id)).cloned()
    }
}

/// Test gateway that records requests and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<NotificationRequest>>,
    fail: Mutex<bool>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_sends(&self, fail: bool) {
        if let Ok(mut f) = self.fail.lock() {
            *f = fail;
        }
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationGateway for RecordingGateway {
    fn send(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(NotificationError::Send("gateway unavailable".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request);
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone)]
struct StreamRefs {
    customer_id: CustomerId,
    vehicle_id: VehicleId,
}

/// Bus consumer that turns committed status changes into notification
/// requests.
///
/// Learns each stream's customer/vehicle references from its opening event,
/// so it needs no access to the event store or the read model.
pub struct NotificationConsumer<G, D> {
    gateway: G,
    directory: D,
    refs: HashMap<(ShopId, AggregateId), StreamRefs>,
}

impl<G, D> NotificationConsumer<G, D>
where
    G: NotificationGateway,
    D: ContactDirectory,
{
    pub fn new(gateway: G, directory: D) -> Self {
        Self {
            gateway,
            directory,
            refs: HashMap::new(),
        }
    }

    /// Handle one envelope. Always returns `Ok`: every skip/failure mode is
    /// logged here and swallowed.
    pub fn handle(&mut self, envelope: EventEnvelope<JsonValue>) -> Result<(), NotificationError> {
        if envelope.aggregate_type() != WORK_ORDER_AGGREGATE_TYPE {
            return Ok(());
        }

        let ev: WorkOrderEvent = match serde_json::from_value(envelope.payload().clone()) {
            Ok(ev) => ev,
            Err(err) => {
                warn!(error = %err, "notification consumer could not deserialize event");
                return Ok(());
            }
        };

        match ev {
            WorkOrderEvent::WorkOrderOpened(e) => {
                self.refs.insert(
                    (e.shop_id, envelope.aggregate_id()),
                    StreamRefs {
                        customer_id: e.customer_id,
                        vehicle_id: e.vehicle_id,
                    },
                );
            }
            WorkOrderEvent::StatusChanged(e) => {
                let Some(tag) = e.to.notification_tag() else {
                    return Ok(());
                };

                let Some(refs) = self.refs.get(&(e.shop_id, envelope.aggregate_id())).copied()
                else {
                    debug!(
                        work_order_id = %e.work_order_id,
                        "no opening event seen for stream, skipping notification"
                    );
                    return Ok(());
                };

                let Some(contact) = self.directory.contact_for(e.shop_id, refs.customer_id)
                else {
                    debug!(
                        work_order_id = %e.work_order_id,
                        "customer has no contact on file, skipping notification"
                    );
                    return Ok(());
                };
                let Some(recipient) = contact.recipient() else {
                    debug!(
                        work_order_id = %e.work_order_id,
                        "customer contact is unreachable, skipping notification"
                    );
                    return Ok(());
                };

                let request = NotificationRequest {
                    recipient,
                    template_context: tag.to_string(),
                    vehicle_description: self
                        .directory
                        .vehicle_description(e.shop_id, refs.vehicle_id),
                    customer_id: refs.customer_id,
                    work_order_id: e.work_order_id,
                };

                if let Err(err) = self.gateway.send(request) {
                    // Swallowed: delivery is best-effort, state is committed.
                    warn!(
                        work_order_id = %e.work_order_id,
                        template = tag,
                        error = %err,
                        "notification send failed"
                    );
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// Spawn the notification worker on a bus subscription.
pub fn spawn_notification_worker<B, G, D>(bus: B, gateway: G, directory: D) -> WorkerHandle
where
    B: EventBus<EventEnvelope<JsonValue>> + Send + Sync + 'static,
    G: NotificationGateway + 'static,
    D: ContactDirectory + 'static,
{
    let mut consumer = NotificationConsumer::new(gateway, directory);
    BusWorker::spawn("notifications", bus, None, move |envelope| {
        consumer.handle(envelope)
    })
}
