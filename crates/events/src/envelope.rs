use serde::{Deserialize, Serialize};
use uuid::Uuid;

use autoshop_core::{AggregateId, ShopId};

/// Messages that carry their shop context (used by workers to filter).
pub trait ShopScoped {
    fn shop_id(&self) -> ShopId;
}

/// Envelope for an event, carrying shop + stream metadata.
///
/// This is the unit appended to an event stream and published on the bus.
///
/// Notes:
/// - **Shop isolation** is enforced here via `shop_id`.
/// - **Append-only**: `sequence_number` is monotonically increasing per
///   stream, so one work order's mutations are totally ordered.
/// - `payload` is the domain-agnostic event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    shop_id: ShopId,

    aggregate_id: AggregateId,
    aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        shop_id: ShopId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            shop_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn shop_id(&self) -> ShopId {
        self.shop_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E> ShopScoped for EventEnvelope<E> {
    fn shop_id(&self) -> ShopId {
        self.shop_id
    }
}
