use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
	#[error("main server request failed: {0}")]
	RequestFailed(String),

	#[error("main server returned status {status}: {body}")]
	ApiError { status: u16, body: String },

	#[error("failed to parse main server response: {0}")]
	ParseError(String),
}

impl From<reqwest::Error> for HubError {
	fn from(err: reqwest::Error) -> Self {
		Self::RequestFailed(err.to_string())
	}
}
