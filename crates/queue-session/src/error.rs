use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("session actor is no longer running")]
	ActorUnavailable,

	#[error("failed to retrieve session state")]
	StateRetrievalFailed,

	#[error("outbound channel is closed or full")]
	OutboundUnavailable,

	#[error("frame exceeds the configured maximum size of {limit} bytes")]
	FrameTooLarge { limit: usize },

	#[error("malformed frame: {0}")]
	MalformedFrame(#[from] serde_json::Error),
}
