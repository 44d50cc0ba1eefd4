use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use voucherflow_core::JobId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_purchase))
        .route("/:id", get(get_purchase))
}

/// Create a job and enqueue it; the workflow runs in the background.
pub async fn create_purchase(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<dto::CreatePurchaseRequest>,
) -> axum::response::Response {
    match services
        .intake
        .submit(Some(caller.user_id()), body.amount, body.quantity)
        .await
    {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(dto::CreatePurchaseResponse {
                job_id: job.id,
                status: job.status,
            }),
        )
            .into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

/// Jobs owned by someone else look the same as missing ones.
pub async fn get_purchase(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.jobs.find_job(job_id).await {
        Ok(Some(job)) if job.user_id == Some(caller.user_id()) => {
            Json(dto::JobResponse::from(job)).into_response()
        }
        Ok(_) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        Err(e) => errors::job_store_error_to_response(e),
    }
}
