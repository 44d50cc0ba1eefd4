use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use voucherflow_infra::jobs::JobStoreError;
use voucherflow_infra::otp::MessageStoreError;
use voucherflow_infra::workflow::IntakeError;

pub fn intake_error_to_response(err: IntakeError) -> axum::response::Response {
    match err {
        IntakeError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        IntakeError::JobStore(e) => job_store_error_to_response(e),
        IntakeError::Enqueue { .. } => json_error(StatusCode::SERVICE_UNAVAILABLE, "enqueue_error", err.to_string()),
    }
}

pub fn job_store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        JobStoreError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        JobStoreError::Domain(e) => json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", e.to_string()),
        JobStoreError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
    }
}

pub fn message_store_error_to_response(err: MessageStoreError) -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
