//! `autoshop-core` — domain foundation building blocks.
//!
//! Pure domain primitives only: identifiers, the error model, aggregate
//! traits, and money/quantity arithmetic. No infrastructure concerns.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{
    AggregateId, AppointmentId, CustomerId, ServiceId, ShopId, TechnicianId, VehicleId,
};
pub use money::{Cents, Quantity, TaxRate};
