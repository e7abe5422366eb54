//! Infrastructure layer: event store, command dispatch, read models,
//! background workers and the outbound notification seam.

pub mod catalog;
pub mod command_dispatcher;
pub mod event_store;
pub mod notifications;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;
