use tokio::time::{Duration, Instant};

/// Liveness state of one session, tracked by its actor. Activity resets
/// the staleness clock; a session that hasn't produced activity within
/// `PongWait` (2.5x the configured ping interval) is eligible to be
/// marked stale and disconnected by its reader task.
#[derive(Debug, Clone)]
pub struct SessionState {
	pub is_active: bool,
	pub is_stale: bool,
	pub last_activity: Instant,
	pub stale_reason: Option<String>,
	pub disconnect_reason: Option<String>,
}

impl SessionState {
	pub fn new() -> Self {
		Self {
			is_active: true,
			is_stale: false,
			last_activity: Instant::now(),
			stale_reason: None,
			disconnect_reason: None,
		}
	}

	pub fn record_activity(&mut self) {
		self.last_activity = Instant::now();
		self.is_stale = false;
		self.stale_reason = None;
	}

	pub fn should_be_stale(&self, pong_wait: Duration) -> bool {
		self.is_active && Instant::now().saturating_duration_since(self.last_activity) >= pong_wait
	}

	pub fn mark_stale(&mut self, reason: impl Into<String>) {
		self.is_stale = true;
		self.stale_reason = Some(reason.into());
	}

	pub fn disconnect(&mut self, reason: impl Into<String>) {
		self.is_active = false;
		self.disconnect_reason = Some(reason.into());
	}
}

impl Default for SessionState {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn fresh_state_is_active_and_not_stale() {
		let state = SessionState::new();
		assert!(state.is_active);
		assert!(!state.is_stale);
	}

	#[tokio::test(start_paused = true)]
	async fn goes_stale_once_pong_wait_elapses_without_activity() {
		let state = SessionState::new();
		assert!(!state.should_be_stale(Duration::from_secs(75)));

		tokio::time::advance(Duration::from_secs(76)).await;
		assert!(state.should_be_stale(Duration::from_secs(75)));
	}

	#[tokio::test(start_paused = true)]
	async fn recording_activity_resets_the_staleness_clock() {
		let mut state = SessionState::new();
		tokio::time::advance(Duration::from_secs(76)).await;
		assert!(state.should_be_stale(Duration::from_secs(75)));

		state.record_activity();
		assert!(!state.should_be_stale(Duration::from_secs(75)));
		assert!(!state.is_stale);
	}

	#[tokio::test(start_paused = true)]
	async fn disconnect_clears_active_and_records_reason() {
		let mut state = SessionState::new();
		state.disconnect("client closed");
		assert!(!state.is_active);
		assert_eq!(state.disconnect_reason.as_deref(), Some("client closed"));
	}
}
