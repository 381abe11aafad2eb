use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures that can occur before a session exists — everything after a
/// successful upgrade is handled inside the session's own reader/writer
/// tasks and never reaches an HTTP response. `RequestTimeout` and
/// `ServiceOverloaded` surface from the tower resiliency layer wrapped
/// around the whole router, not from admission logic itself.
#[derive(Debug, Error)]
pub enum AdmissionError {
	#[error("missing required ticketId header")]
	MissingTicketId,

	#[error("websocket upgrade failed: {0}")]
	UpgradeFailed(String),

	#[error("request did not complete within the configured deadline")]
	RequestTimeout,

	#[error("server is at its concurrent-request limit")]
	ServiceOverloaded,

	#[error("unhandled tower layer error: {0}")]
	TowerError(#[from] tower::BoxError),
}

impl IntoResponse for AdmissionError {
	fn into_response(self) -> Response {
		let status = match &self {
			Self::MissingTicketId => StatusCode::BAD_REQUEST,
			Self::UpgradeFailed(_) | Self::TowerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
			Self::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
			Self::ServiceOverloaded => StatusCode::SERVICE_UNAVAILABLE,
		};
		(status, self.to_string()).into_response()
	}
}

/// Maps a boxed error from the tower layer stack (timeout, load-shed) to a
/// response, matching the teacher's `handle_tower_error` pattern.
pub async fn handle_tower_error(error: tower::BoxError) -> AdmissionError {
	if error.is::<tower::timeout::error::Elapsed>() {
		tracing::warn!(error = %error, "request timed out");
		AdmissionError::RequestTimeout
	} else if error.is::<tower::load_shed::error::Overloaded>() {
		tracing::warn!("service overloaded, shedding request");
		AdmissionError::ServiceOverloaded
	} else {
		tracing::error!(error = %error, "unhandled tower layer error");
		AdmissionError::TowerError(error)
	}
}
