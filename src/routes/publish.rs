use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::error_response;
use crate::error::DispatchError;
use crate::models::{PublishRequest, PublishResponse};
use crate::state::AppState;

/// POST /publish - Fan an event out to the topic's matching subscribers.
pub async fn publish(
    State(state): State<AppState>,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Rejected publish body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    match state.dispatcher.dispatch(request).await {
        Ok(report) => Json(PublishResponse {
            delivered: report.delivered,
        })
        .into_response(),
        Err(DispatchError::Validation(e)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(DispatchError::Registry(e)) => {
            tracing::error!("Failed to resolve subscribers: {}", e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Subscription registry unavailable")
        }
    }
}
