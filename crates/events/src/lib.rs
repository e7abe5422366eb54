//! `autoshop-events` — event contracts and pub/sub mechanics.
//!
//! Events are facts: immutable, versioned, append-only. This crate carries
//! the `Event` trait, the shop-scoped envelope, the bus abstraction and an
//! in-memory bus for tests/dev.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, ShopScoped};
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::InMemoryEventBus;
