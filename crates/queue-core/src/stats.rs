use std::collections::VecDeque;
use std::time::Duration;

/// Head/tail position tracking plus a sliding-window average wait
/// estimate, broadcast to every connected client whenever it changes.
#[derive(Debug, Clone)]
pub struct Stats {
	pub head_position: i32,
	pub tail_position: i32,
	avg_wait: Duration,
	window: VecDeque<Duration>,
	window_size: usize,
}

impl Stats {
	pub fn new(init_avg_wait: Duration, window_size: usize) -> Self {
		Self {
			head_position: 0,
			tail_position: 0,
			avg_wait: init_avg_wait,
			window: VecDeque::with_capacity(window_size),
			window_size,
		}
	}

	pub fn avg_wait(&self) -> Duration {
		self.avg_wait
	}

	/// Issue the next tail position, wrapping i32::MAX back to 1.
	pub fn incr_tail(&mut self) -> i32 {
		self.tail_position = crate::ticket::next_position(self.tail_position);
		self.tail_position
	}

	/// Recompute head_position from the current queue order: the position
	/// of the first ticket if any remain, else it collapses to tail.
	pub fn reset_head(&mut self, front_position: Option<i32>) {
		self.head_position = front_position.unwrap_or(self.tail_position);
	}

	/// Fold this tick's observed wait durations into the sliding window and
	/// recompute the average. Samples are admitted in the order observed;
	/// once the window is full, the oldest sample is evicted per new one.
	pub fn update_avg_wait(&mut self, wait_durations: impl IntoIterator<Item = Duration>) {
		for duration in wait_durations {
			if self.window.len() >= self.window_size {
				self.window.pop_front();
			}
			self.window.push_back(duration);
		}

		if self.window.is_empty() {
			return;
		}

		let total: Duration = self.window.iter().sum();
		self.avg_wait = total / self.window.len() as u32;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tail_position_wraps_like_ticket_positions() {
		let mut stats = Stats::new(Duration::from_secs(180), 50);
		stats.tail_position = i32::MAX;
		assert_eq!(stats.incr_tail(), 1);
	}

	#[test]
	fn reset_head_tracks_front_of_queue_or_collapses_to_tail() {
		let mut stats = Stats::new(Duration::from_secs(180), 50);
		stats.tail_position = 7;
		stats.reset_head(Some(3));
		assert_eq!(stats.head_position, 3);

		stats.reset_head(None);
		assert_eq!(stats.head_position, 7);
	}

	#[test]
	fn avg_wait_starts_at_the_configured_initial_estimate() {
		let stats = Stats::new(Duration::from_secs(180), 50);
		assert_eq!(stats.avg_wait(), Duration::from_secs(180));
	}

	#[test]
	fn avg_wait_is_the_mean_of_the_window() {
		let mut stats = Stats::new(Duration::from_secs(180), 50);
		stats.update_avg_wait([Duration::from_secs(10), Duration::from_secs(20), Duration::from_secs(30)]);
		assert_eq!(stats.avg_wait(), Duration::from_secs(20));
	}

	#[test]
	fn window_evicts_oldest_sample_once_full() {
		let mut stats = Stats::new(Duration::from_secs(180), 2);
		stats.update_avg_wait([Duration::from_secs(10), Duration::from_secs(20)]);
		assert_eq!(stats.avg_wait(), Duration::from_secs(15));

		// third sample evicts the first (10s), leaving 20s and 30s
		stats.update_avg_wait([Duration::from_secs(30)]);
		assert_eq!(stats.avg_wait(), Duration::from_secs(25));
	}
}
