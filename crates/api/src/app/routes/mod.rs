use axum::Router;

pub mod purchases;
pub mod system;
pub mod webhooks;

/// Router for all caller-authenticated endpoints.
pub fn router() -> Router {
    Router::new().nest("/bulk-purchase", purchases::router())
}
