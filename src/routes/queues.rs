use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::error_response;
use crate::error::QueueError;
use crate::models::{ReceiveQuery, ReceiveResponse};
use crate::state::AppState;

/// GET /queues/{queue_ref}/messages?max=... - Drain the oldest deliveries of one queue.
pub async fn receive_messages(
    State(state): State<AppState>,
    Path(queue_ref): Path<String>,
    Query(query): Query<ReceiveQuery>,
) -> Response {
    match state.queue.receive(&queue_ref, query.max).await {
        Ok(messages) => Json(ReceiveResponse {
            queue_ref,
            messages,
        })
        .into_response(),
        Err(QueueError::UnknownQueue(q)) => {
            error_response(StatusCode::NOT_FOUND, format!("Queue not found: {}", q))
        }
        Err(e) => {
            tracing::error!("Failed to receive from {}: {}", queue_ref, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Queue error")
        }
    }
}
