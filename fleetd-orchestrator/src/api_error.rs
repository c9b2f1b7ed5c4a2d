//! Shared REST error mapping for every orchestrator service module, the same
//! `ErrorKind -> StatusCode` table the agent uses (§4.H.1, §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use fleetd_core::{ClusterError, ErrorKind};
use tracing::warn;

pub struct ApiError(pub ClusterError);

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorKind::ResourceExhausted => StatusCode::INSUFFICIENT_STORAGE,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(error = %self.0, "request failed");
        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "code": self.0.kind().canonical_name(),
            })),
        )
            .into_response()
    }
}
