use crate::capacity::CapacityState;
use crate::stats::Stats;
use crate::ticket::Ticket;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Channel buffer depth for every queue-facing channel, matching the
/// original implementation's buffered Go channels.
pub const CHANNEL_CAPACITY: usize = 1024;

/// A ticket becoming dirty (freshly created, reactivated, or newly
/// admitted) needs its owner notified of its current position.
#[derive(Debug, Clone)]
pub struct DirtyTicket {
	pub ticket_id: String,
	pub position: i32,
}

/// A stats snapshot, broadcast to every connected client.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
	pub head_position: i32,
	pub tail_position: i32,
	pub avg_wait: Duration,
}

/// Handle for sending Enter/Leave commands into the queue's single owning
/// task. Cloning is cheap; every session holds one.
#[derive(Clone)]
pub struct QueueHandle {
	enter_tx: mpsc::Sender<String>,
	leave_tx: mpsc::Sender<String>,
}

impl QueueHandle {
	/// A client wants a place in line (or to reclaim its existing one).
	pub async fn enter(&self, ticket_id: String) {
		if self.enter_tx.send(ticket_id).await.is_err() {
			warn!("queue enter channel closed; queue worker has shut down");
		}
	}

	/// A client disconnected; its ticket becomes inactive (not removed).
	pub async fn leave(&self, ticket_id: String) {
		if self.leave_tx.send(ticket_id).await.is_err() {
			warn!("queue leave channel closed; queue worker has shut down");
		}
	}
}

/// Outbound notification channels a hub subscribes to.
pub struct QueueNotifications {
	pub dirty_rx: mpsc::Receiver<DirtyTicket>,
	pub finish_rx: mpsc::Receiver<String>,
	pub stats_rx: mpsc::Receiver<StatsSnapshot>,
}

/// The ticket queue. Owned exclusively by `run`; every mutation happens on
/// that single task, so `Queue` itself carries no internal synchronization.
/// Enter/Leave arrive over channels; dequeuing and stale reclamation run on
/// a ticker tick in the same loop, so there is never a second writer to
/// race against.
pub struct Queue {
	tickets: IndexMap<String, Ticket>,
	stats: Stats,
	capacity: Arc<CapacityState>,
	ticket_stale: Duration,
	dequeue_interval: Duration,
	notify_stats_interval: Duration,
	max_dequeue_per_interval: u32,
	enter_rx: mpsc::Receiver<String>,
	leave_rx: mpsc::Receiver<String>,
	notify_dirty_tx: mpsc::Sender<DirtyTicket>,
	notify_finish_tx: mpsc::Sender<String>,
	notify_stats_tx: mpsc::Sender<StatsSnapshot>,
}

#[allow(clippy::too_many_arguments)]
impl Queue {
	pub fn new(
		capacity: Arc<CapacityState>, ticket_stale: Duration, dequeue_interval: Duration, notify_stats_interval: Duration, max_dequeue_per_interval: u32, init_avg_wait: Duration, average_wait_window_size: usize,
	) -> (Self, QueueHandle, QueueNotifications) {
		let (enter_tx, enter_rx) = mpsc::channel(CHANNEL_CAPACITY);
		let (leave_tx, leave_rx) = mpsc::channel(CHANNEL_CAPACITY);
		let (notify_dirty_tx, dirty_rx) = mpsc::channel(CHANNEL_CAPACITY);
		let (notify_finish_tx, finish_rx) = mpsc::channel(CHANNEL_CAPACITY);
		let (notify_stats_tx, stats_rx) = mpsc::channel(CHANNEL_CAPACITY);

		let queue = Self {
			tickets: IndexMap::new(),
			stats: Stats::new(init_avg_wait, average_wait_window_size),
			capacity,
			ticket_stale,
			dequeue_interval,
			notify_stats_interval,
			max_dequeue_per_interval,
			enter_rx,
			leave_rx,
			notify_dirty_tx,
			notify_finish_tx,
			notify_stats_tx,
		};

		(queue, QueueHandle { enter_tx, leave_tx }, QueueNotifications { dirty_rx, finish_rx, stats_rx })
	}

	/// Drives the queue until `cancel_token` fires. Intended to be spawned
	/// as its own task and never called from more than one place.
	pub async fn run(mut self, cancel_token: CancellationToken) {
		let mut dequeue_ticker = tokio::time::interval(self.dequeue_interval);
		let mut stats_ticker = tokio::time::interval(self.notify_stats_interval);

		loop {
			tokio::select! {
				_ = cancel_token.cancelled() => {
					info!("queue worker shutting down");
					return;
				}
				Some(ticket_id) = self.enter_rx.recv() => {
					self.handle_enter(ticket_id).await;
				}
				Some(ticket_id) = self.leave_rx.recv() => {
					self.handle_leave(ticket_id);
				}
				_ = dequeue_ticker.tick() => {
					self.handle_dequeue_tick().await;
				}
				_ = stats_ticker.tick() => {
					self.handle_stats_tick().await;
				}
			}
		}
	}

	async fn handle_enter(&mut self, ticket_id: String) {
		let now = Instant::now();
		match self.tickets.get_mut(&ticket_id) {
			Some(ticket) if !ticket.is_stale(now, self.ticket_stale) => {
				ticket.reactivate();
				debug!(ticket_id, "reactivated existing ticket");
			}
			_ => {
				self.tickets.shift_remove(&ticket_id);
				let position = self.stats.incr_tail();
				self.tickets.insert(ticket_id.clone(), Ticket::new(ticket_id.clone(), position));
				debug!(ticket_id, position, "issued new ticket");
			}
		}
	}

	fn handle_leave(&mut self, ticket_id: String) {
		if let Some(ticket) = self.tickets.get_mut(&ticket_id) {
			ticket.deactivate(Instant::now());
			debug!(ticket_id, "ticket marked inactive");
		}
	}

	async fn handle_dequeue_tick(&mut self) {
		let now = Instant::now();

		let mut to_dequeue = Vec::new();
		for (id, ticket) in &self.tickets {
			if to_dequeue.len() as u32 >= self.max_dequeue_per_interval {
				break;
			}
			if !ticket.is_active {
				continue;
			}
			if !self.capacity.take_one_slot() {
				break;
			}
			to_dequeue.push(id.clone());
		}

		let mut wait_durations = Vec::with_capacity(to_dequeue.len());
		for id in &to_dequeue {
			if let Some(ticket) = self.tickets.shift_remove(id) {
				wait_durations.push(now.saturating_duration_since(ticket.create_time));
				if self.notify_finish_tx.send(id.clone()).await.is_err() {
					warn!(ticket_id = %id, "finish notification channel closed");
				}
			}
		}

		let stale_ids: Vec<String> = self.tickets.iter().filter(|(_, t)| t.is_stale(now, self.ticket_stale)).map(|(id, _)| id.clone()).collect();
		for id in &stale_ids {
			self.tickets.shift_remove(id);
			debug!(ticket_id = %id, "reclaimed stale ticket");
		}

		let front_position = self.tickets.first().map(|(_, t)| t.position);
		self.stats.reset_head(front_position);
		self.stats.update_avg_wait(wait_durations);
	}

	/// Runs on its own ticker, independent of the dequeue pass: always emit
	/// the current stats snapshot, then walk the queue once and flush every
	/// ticket whose dirty flag is set. Coalescing the dirty walk onto this
	/// slower ticker (rather than broadcasting per-mutation) keeps a burst of
	/// reconnects from generating an update per ticket per event.
	async fn handle_stats_tick(&mut self) {
		let snapshot = StatsSnapshot {
			head_position: self.stats.head_position,
			tail_position: self.stats.tail_position,
			avg_wait: self.stats.avg_wait(),
		};
		if self.notify_stats_tx.send(snapshot).await.is_err() {
			warn!("stats notification channel closed");
		}
		self.dump_tickets();

		let mut dirty_tickets = Vec::new();
		for ticket in self.tickets.values_mut() {
			if ticket.is_dirty {
				ticket.is_dirty = false;
				dirty_tickets.push(DirtyTicket {
					ticket_id: ticket.ticket_id.clone(),
					position: ticket.position,
				});
			}
		}
		for dirty in dirty_tickets {
			if self.notify_dirty_tx.send(dirty).await.is_err() {
				warn!("dirty-ticket notification channel closed");
			}
		}
	}

	/// Debug-level dump of the live ticket table, for operational
	/// troubleshooting. Only formats the ticket list when the `debug`
	/// level is actually enabled, so this costs nothing in normal
	/// operation and becomes useful the moment `/debug` flips the
	/// tracing filter.
	fn dump_tickets(&self) {
		if !tracing::enabled!(tracing::Level::DEBUG) {
			return;
		}
		for (id, ticket) in &self.tickets {
			debug!(ticket_id = %id, position = ticket.position, active = ticket.is_active, dirty = ticket.is_dirty, "ticket");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration as StdDuration;

	fn new_queue(capacity: Arc<CapacityState>) -> (QueueHandle, QueueNotifications, CancellationToken, tokio::task::JoinHandle<()>) {
		let (queue, handle, notifications) = Queue::new(capacity, StdDuration::from_secs(30), StdDuration::from_millis(10), StdDuration::from_millis(10), 500, StdDuration::from_secs(180), 50);
		let cancel = CancellationToken::new();
		let join = tokio::spawn(queue.run(cancel.clone()));
		(handle, notifications, cancel, join)
	}

	#[tokio::test(start_paused = true)]
	async fn entering_issues_a_ticket_and_marks_it_dirty() {
		let capacity = Arc::new(CapacityState::new(0, 1.0, true)); // no free slots: nothing dequeues
		let (handle, mut notifications, cancel, join) = new_queue(capacity);

		handle.enter("alice".into()).await;
		tokio::time::advance(StdDuration::from_millis(15)).await;

		let dirty = notifications.dirty_rx.recv().await.expect("dirty notification");
		assert_eq!(dirty.ticket_id, "alice");
		assert_eq!(dirty.position, 1);

		cancel.cancel();
		join.await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn dequeue_respects_available_capacity_in_fifo_order() {
		let capacity = Arc::new(CapacityState::new(100, 1.0, true));
		capacity.replenish(99); // exactly one free slot
		let (handle, mut notifications, cancel, join) = new_queue(capacity);

		handle.enter("alice".into()).await;
		handle.enter("bob".into()).await;
		tokio::time::advance(StdDuration::from_millis(15)).await;

		let finished = notifications.finish_rx.recv().await.expect("one ticket finishes");
		assert_eq!(finished, "alice");
		assert!(notifications.finish_rx.try_recv().is_err(), "bob should still be waiting, no free slots left");

		cancel.cancel();
		join.await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn leaving_does_not_remove_the_ticket_immediately() {
		let capacity = Arc::new(CapacityState::new(0, 1.0, true));
		let (handle, mut notifications, cancel, join) = new_queue(capacity);

		handle.enter("alice".into()).await;
		tokio::time::advance(StdDuration::from_millis(15)).await;
		let _ = notifications.dirty_rx.recv().await;

		handle.leave("alice".into()).await;
		// reconnecting before the ticket goes stale reactivates it in place,
		// rather than issuing a new position.
		handle.enter("alice".into()).await;
		tokio::time::advance(StdDuration::from_millis(15)).await;
		let dirty = notifications.dirty_rx.recv().await.expect("reactivation notification");
		assert_eq!(dirty.position, 1, "re-entering before staleness keeps the original position");

		cancel.cancel();
		join.await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn stale_inactive_tickets_are_reclaimed() {
		let capacity = Arc::new(CapacityState::new(0, 1.0, true));
		let (handle, mut notifications, cancel, join) = new_queue(capacity);

		handle.enter("alice".into()).await;
		tokio::time::advance(StdDuration::from_millis(15)).await;
		let _ = notifications.dirty_rx.recv().await;

		handle.leave("alice".into()).await;
		tokio::time::advance(StdDuration::from_secs(31)).await;

		// re-entering after staleness issues a brand new ticket position
		handle.enter("alice".into()).await;
		tokio::time::advance(StdDuration::from_millis(15)).await;
		let dirty = notifications.dirty_rx.recv().await.expect("fresh ticket notification");
		assert_eq!(dirty.position, 2, "the stale ticket was reclaimed, so re-entry gets a new tail position");

		cancel.cancel();
		join.await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn stats_snapshot_is_emitted_every_tick_even_with_no_dirty_tickets() {
		let capacity = Arc::new(CapacityState::new(0, 1.0, true));
		let (handle, mut notifications, cancel, join) = new_queue(capacity);

		handle.enter("alice".into()).await;
		tokio::time::advance(StdDuration::from_millis(15)).await;
		let _ = notifications.dirty_rx.recv().await;
		let _ = notifications.stats_rx.recv().await;

		// No further mutation happens, but the stats ticker still fires.
		tokio::time::advance(StdDuration::from_millis(10)).await;
		notifications.stats_rx.recv().await.expect("stats snapshot emitted unconditionally on every tick");
		assert!(notifications.dirty_rx.try_recv().is_err(), "no dirty ticket to flush this tick");

		cancel.cancel();
		join.await.unwrap();
	}
}
