//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, sandbox portals, orchestrator, intake and bus
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware::{self, SessionResolver};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// The SMS webhook is called by the gateway and is not behind caller auth.
pub fn build_app(services: Arc<services::AppServices>, sessions: Arc<dyn SessionResolver>) -> Router {
    let auth_state = middleware::AuthState { sessions };

    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::webhooks::router())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
