use std::time::Duration;
use tokio::time::Instant;

/// A client's place in line. Owned exclusively by the Queue worker loop —
/// nothing outside that loop ever holds a `&mut Ticket`.
#[derive(Debug, Clone)]
pub struct Ticket {
	pub ticket_id: String,
	pub position: i32,
	pub is_active: bool,
	pub is_dirty: bool,
	pub create_time: Instant,
	pub inactive_time: Option<Instant>,
}

impl Ticket {
	pub fn new(ticket_id: String, position: i32) -> Self {
		Self {
			ticket_id,
			position,
			is_active: true,
			is_dirty: true,
			create_time: Instant::now(),
			inactive_time: None,
		}
	}

	/// Re-enter an existing ticket: reactivate it in place rather than
	/// losing its queue position.
	pub fn reactivate(&mut self) {
		self.is_active = true;
		self.is_dirty = true;
		self.inactive_time = None;
	}

	/// Mark as having left (disconnected); it stays in the queue, eligible
	/// for reclamation once stale.
	pub fn deactivate(&mut self, now: Instant) {
		self.is_active = false;
		self.inactive_time = Some(now);
	}

	/// A ticket is stale once it has been inactive for longer than
	/// `stale_period`. An active ticket, or one that has never gone
	/// inactive, is never stale.
	pub fn is_stale(&self, now: Instant, stale_period: Duration) -> bool {
		match (self.is_active, self.inactive_time) {
			(false, Some(inactive_since)) => now.saturating_duration_since(inactive_since) >= stale_period,
			_ => false,
		}
	}
}

/// Advance a wrapping ticket position counter: 1, 2, ..., i32::MAX, 1, ...
/// Position 0 is never issued; it is reserved to mean "not queued".
pub fn next_position(current: i32) -> i32 {
	if current == i32::MAX {
		1
	} else {
		current + 1
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::time::{self, Duration as TokioDuration};

	#[test]
	fn next_position_wraps_at_i32_max_to_one() {
		assert_eq!(next_position(1), 2);
		assert_eq!(next_position(i32::MAX), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn fresh_ticket_is_never_stale() {
		let ticket = Ticket::new("t1".into(), 1);
		assert!(!ticket.is_stale(Instant::now(), Duration::from_secs(30)));
	}

	#[tokio::test(start_paused = true)]
	async fn inactive_ticket_becomes_stale_after_the_configured_period() {
		let mut ticket = Ticket::new("t1".into(), 1);
		ticket.deactivate(Instant::now());

		assert!(!ticket.is_stale(Instant::now(), Duration::from_secs(30)));

		time::advance(TokioDuration::from_secs(31)).await;
		assert!(ticket.is_stale(Instant::now(), Duration::from_secs(30)));
	}

	#[tokio::test(start_paused = true)]
	async fn reactivating_a_stale_ticket_clears_staleness() {
		let mut ticket = Ticket::new("t1".into(), 1);
		ticket.deactivate(Instant::now());
		time::advance(TokioDuration::from_secs(60)).await;
		assert!(ticket.is_stale(Instant::now(), Duration::from_secs(30)));

		ticket.reactivate();
		assert!(!ticket.is_stale(Instant::now(), Duration::from_secs(30)));
		assert!(ticket.is_active);
		assert!(ticket.is_dirty);
	}
}
