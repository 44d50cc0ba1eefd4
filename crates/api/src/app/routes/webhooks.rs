use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tracing::info;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/webhooks/sms", post(receive_sms))
}

/// Append an inbound SMS for the OTP waiter to find.
pub async fn receive_sms(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SmsWebhookRequest>,
) -> axum::response::Response {
    if body.sender.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "sender must not be blank");
    }

    match services.messages.append(&body.sender, body.raw).await {
        Ok(message) => {
            info!(message_id = message.id, sender = %message.sender, "inbound sms stored");
            (StatusCode::CREATED, Json(dto::SmsWebhookResponse { id: message.id })).into_response()
        }
        Err(e) => errors::message_store_error_to_response(e),
    }
}
