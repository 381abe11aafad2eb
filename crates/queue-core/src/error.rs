use thiserror::Error;

/// Errors surfaced at the edges of the queue core (config refresh, the HTTP
/// side-calls it depends on). The Queue/Stats worker loops themselves never
/// propagate errors out — they log and continue, per the admission
/// pipeline's error-handling design.
#[derive(Debug, Error)]
pub enum QueueError {
	#[error("config store unavailable: {0}")]
	ConfigStoreUnavailable(String),

	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),

	#[error("failed to read online-user count from main server: {0}")]
	OnlineUsersFetchFailed(String),

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}
