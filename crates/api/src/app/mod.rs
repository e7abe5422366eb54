//! HTTP application wiring (axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (event store/bus, projection,
//!   workers, dispatcher, portal tokens)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app() -> Router {
    build_app_with_services(Arc::new(services::build_services()))
}

/// Router over externally built services (tests inject their own wiring).
pub fn build_app_with_services(services: Arc<services::AppServices>) -> Router {
    // Staff routes: require the trusted gateway's shop context headers.
    let staff = routes::work_orders::router()
        .layer(Extension(Arc::clone(&services)))
        .layer(axum::middleware::from_fn(
            middleware::shop_context_middleware,
        ));

    // The portal route authenticates through its opaque token instead.
    let portal = routes::portal::router().layer(Extension(services));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(staff)
        .merge(portal)
}
