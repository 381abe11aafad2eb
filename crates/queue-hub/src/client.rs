use crate::error::HubError;
use queue_protocol::{LoginClientEvent, LoginServerEvent};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(250);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Capped exponential backoff: `base * 2^(attempt-1)`, clamped to `cap`.
fn backoff_for_attempt(attempt: u32) -> Duration {
	RETRY_BACKOFF_BASE.saturating_mul(1u32 << (attempt - 1)).min(RETRY_BACKOFF_CAP)
}

/// The handful of HTTP calls the hub makes back to the main game server:
/// the login side-call performed at admission time, and the two optional
/// pre-upgrade side-calls the acceptance handler may issue.
pub struct MainServerClient {
	client: reqwest::Client,
	base_url: String,
	verbose_dump: bool,
}

impl MainServerClient {
	pub fn new(base_url: impl Into<String>, verbose_dump: bool) -> Self {
		Self {
			client: reqwest::Client::builder().timeout(Duration::from_secs(10)).build().expect("reqwest client config is valid"),
			base_url: base_url.into(),
			verbose_dump,
		}
	}

	/// Exchanges a cached login attempt for a JWT. A non-2xx response from
	/// the main server is still a valid outcome — it comes back as an
	/// `Ok(LoginServerEvent)` carrying that status code and an empty JWT,
	/// so the caller can forward it to the client and keep the session
	/// alive for a retry. Only a transport-level failure (after retries
	/// are exhausted) or an unparseable success body returns `Err`; the
	/// caller treats that as "emit no result" per the admission pipeline's
	/// error-handling design.
	pub async fn login(&self, platform: &str, event: &LoginClientEvent) -> Result<LoginServerEvent, HubError> {
		let url = format!("{}/api/user/authorization{}", self.base_url, event.kind.url_suffix());
		let body = json!({ event.kind.token_field(): event.token });

		let response = self
			.post_with_retry(
				&url,
				&body,
				&[
					("Content-Type", "application/json"),
					("platform", platform),
					("deviceid", event.device_id.as_str()),
					("sessionid", event.session_id.as_str()),
				],
			)
			.await?;

		let status = response.status().as_u16();
		if !response.status().is_success() {
			return Ok(LoginServerEvent { status_code: status, jwt: String::new() });
		}

		#[derive(serde::Deserialize)]
		struct AuthResponse {
			data: AuthResponseData,
		}
		#[derive(serde::Deserialize)]
		struct AuthResponseData {
			jwt: String,
		}
		let parsed: AuthResponse = response.json().await.map_err(|e| HubError::ParseError(e.to_string()))?;

		Ok(LoginServerEvent { status_code: status, jwt: parsed.data.jwt })
	}

	/// `GET /api/room/session` with header `jwt` — optional pre-upgrade
	/// side-call: is the caller already seated in a room?
	pub async fn room_session(&self, jwt: &str) -> Result<SessionCheckOutcome, HubError> {
		let url = format!("{}/api/room/session", self.base_url);
		let response = self.get_with_retry(&url, jwt).await?;
		Self::interpret_session_check(response, "inRoom").await
	}

	/// `GET /api/user/session` with header `jwt` — optional pre-upgrade
	/// side-call: was the caller's last heartbeat recent enough that they're
	/// still considered in-game?
	pub async fn user_session(&self, jwt: &str) -> Result<SessionCheckOutcome, HubError> {
		let url = format!("{}/api/user/session", self.base_url);
		let response = self.get_with_retry(&url, jwt).await?;
		Self::interpret_session_check(response, "recentHeartbeat").await
	}

	/// Status 503 anywhere means the main server is under maintenance —
	/// treated as "skip queueing" rather than an upstream error, per spec.
	/// Any other non-success status degrades conservatively to "queue
	/// needed": we'd rather make a caller wait than admit them around a
	/// check we couldn't evaluate.
	async fn interpret_session_check(response: reqwest::Response, no_queue_field: &str) -> Result<SessionCheckOutcome, HubError> {
		if response.status().as_u16() == 503 {
			return Ok(SessionCheckOutcome::Maintenance);
		}
		if !response.status().is_success() {
			return Ok(SessionCheckOutcome::QueueNeeded);
		}

		let body: serde_json::Value = response.json().await.map_err(|e| HubError::ParseError(e.to_string()))?;
		let no_queue_needed = body.get("data").and_then(|data| data.get(no_queue_field)).and_then(serde_json::Value::as_bool).unwrap_or(false);

		Ok(if no_queue_needed { SessionCheckOutcome::NoQueueNeeded } else { SessionCheckOutcome::QueueNeeded })
	}

	async fn get_with_retry(&self, url: &str, jwt: &str) -> Result<reqwest::Response, HubError> {
		let mut last_err = None;
		for attempt in 1..=MAX_ATTEMPTS {
			let request = self.client.get(url).header("jwt", jwt);

			if self.verbose_dump {
				debug!(url, attempt, "dispatching main-server request");
			}

			match request.send().await {
				Ok(response) => {
					if self.verbose_dump {
						debug!(url, status = %response.status(), "main-server response");
					}
					return Ok(response);
				}
				Err(e) => {
					last_err = Some(e);
					if attempt < MAX_ATTEMPTS {
						tokio::time::sleep(backoff_for_attempt(attempt)).await;
					}
				}
			}
		}
		Err(last_err.expect("loop always sets last_err before exhausting attempts").into())
	}

	async fn post_with_retry(&self, url: &str, body: &serde_json::Value, headers: &[(&str, &str)]) -> Result<reqwest::Response, HubError> {
		let mut last_err = None;
		for attempt in 1..=MAX_ATTEMPTS {
			let mut request = self.client.post(url).json(body);
			for (name, value) in headers {
				request = request.header(*name, *value);
			}

			if self.verbose_dump {
				debug!(url, attempt, "dispatching main-server request");
			}

			match request.send().await {
				Ok(response) => {
					if self.verbose_dump {
						debug!(url, status = %response.status(), "main-server response");
					}
					return Ok(response);
				}
				Err(e) => {
					last_err = Some(e);
					if attempt < MAX_ATTEMPTS {
						tokio::time::sleep(backoff_for_attempt(attempt)).await;
					}
				}
			}
		}
		Err(last_err.expect("loop always sets last_err before exhausting attempts").into())
	}
}

/// Result of a pre-upgrade session check against the main server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheckOutcome {
	/// The caller is still queue-eligible per this check.
	QueueNeeded,
	/// This check alone is sufficient reason to bypass the queue entirely.
	NoQueueNeeded,
	/// The main server is down for maintenance; skip queueing altogether.
	Maintenance,
}

#[cfg(test)]
mod tests {
	use super::*;
	use queue_protocol::LoginTypeCode;

	#[test]
	fn url_and_field_selection_match_the_wire_contract() {
		assert_eq!(LoginTypeCode::Apple.url_suffix(), "/apple");
		assert_eq!(LoginTypeCode::Apple.token_field(), "accessToken");
	}
}
