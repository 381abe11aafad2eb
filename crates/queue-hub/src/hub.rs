use crate::client::MainServerClient;
use crate::login_cache::LoginCache;
use crate::registry::ClientRegistry;
use queue_core::{DirtyTicket, QueueHandle, QueueNotifications, StatsSnapshot};
use queue_protocol::{EventCode, LoginClientEvent, LoginServerEvent, QueueStatsServerEvent, TicketServerEvent, WsMessage};
use queue_session::SessionHandle;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Buffer depth for the hub's own inbound command channel, matching the
/// queue's channel sizing.
pub const COMMAND_CAPACITY: usize = 1024;

/// Commands the acceptance layer and each session's reader task feed into
/// the hub's client loop.
pub enum HubCommand {
	Register(SessionHandle),
	Unregister(String),
	Login(String, LoginClientEvent),
}

/// Session registry, login cache, and the two fan-in loops that connect
/// them to the queue: the client loop (registration + inbound login
/// attempts) and the queue loop (dirty-ticket/stats/finish fan-out).
pub struct Hub {
	registry: Arc<ClientRegistry>,
	login_cache: Arc<LoginCache>,
	queue: QueueHandle,
	client: Arc<MainServerClient>,
}

impl Hub {
	pub fn new(queue: QueueHandle, client: Arc<MainServerClient>) -> (Self, mpsc::Sender<HubCommand>, mpsc::Receiver<HubCommand>) {
		let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
		(
			Self {
				registry: Arc::new(ClientRegistry::new()),
				login_cache: Arc::new(LoginCache::new()),
				queue,
				client,
			},
			tx,
			rx,
		)
	}

	pub fn registry(&self) -> Arc<ClientRegistry> {
		self.registry.clone()
	}

	/// Drives session registration/login intake until `cancel_token` fires.
	pub async fn run_client_loop(&self, mut commands: mpsc::Receiver<HubCommand>, cancel_token: CancellationToken) {
		loop {
			tokio::select! {
				_ = cancel_token.cancelled() => {
					info!("hub client loop shutting down");
					return;
				}
				Some(command) = commands.recv() => {
					match command {
						HubCommand::Register(handle) => {
							// Entering the queue happens only once a login payload is
							// cached (the `Login` arm below) — registering a session
							// with nothing to log in with yet must not create a ticket
							// a dequeue tick could finish with no login to perform.
							self.registry.register(handle);
						}
						HubCommand::Unregister(ticket_id) => {
							self.registry.unregister(&ticket_id);
							self.login_cache.remove(&ticket_id);
							self.queue.leave(ticket_id).await;
						}
						HubCommand::Login(ticket_id, event) => {
							self.login_cache.insert(ticket_id.clone(), event);
							// A client may (re)send its login attempt before or after
							// being admitted; re-entering is a no-op reactivation if
							// the ticket is still live.
							self.queue.enter(ticket_id).await;
						}
					}
				}
			}
		}
	}

	/// Drives the queue's notification fan-out until the channels close
	/// (which happens once the queue worker that owns their sender halves
	/// shuts down). `Finish` events spawn their own finalize task rather
	/// than being awaited inline here — a slow login side-call for one
	/// admission must not delay dirty-ticket/stats fan-out, or the next
	/// admission's own side-call, per spec (logins run parallel across
	/// admissions).
	pub async fn run_queue_loop(self: Arc<Self>, mut notifications: QueueNotifications) {
		loop {
			tokio::select! {
				Some(dirty) = notifications.dirty_rx.recv() => {
					self.deliver_ticket_update(dirty).await;
				}
				Some(snapshot) = notifications.stats_rx.recv() => {
					self.broadcast_stats(snapshot).await;
				}
				Some(ticket_id) = notifications.finish_rx.recv() => {
					let hub = self.clone();
					tokio::spawn(async move { hub.finalize(ticket_id).await });
				}
				else => {
					info!("hub queue loop shutting down: all queue channels closed");
					return;
				}
			}
		}
	}

	async fn deliver_ticket_update(&self, dirty: DirtyTicket) {
		let Some(handle) = self.registry.get(&dirty.ticket_id) else {
			return;
		};
		let payload = TicketServerEvent { ticket_id: dirty.ticket_id, position: dirty.position };
		match WsMessage::new(EventCode::Ticket, &payload) {
			Ok(message) => {
				if handle.send(message).is_err() {
					self.drop_unreachable_session(&handle).await;
				}
			}
			Err(e) => warn!(error = %e, "failed to encode ticket update"),
		}
	}

	async fn broadcast_stats(&self, snapshot: StatsSnapshot) {
		let payload = QueueStatsServerEvent {
			head_position: snapshot.head_position,
			tail_position: snapshot.tail_position,
			avg_wait_msec: i64::try_from(snapshot.avg_wait.as_millis()).unwrap_or(i64::MAX),
		};
		let message = match WsMessage::new(EventCode::QueueStats, &payload) {
			Ok(message) => message,
			Err(e) => {
				warn!(error = %e, "failed to encode stats snapshot");
				return;
			}
		};

		let mut unreachable = Vec::new();
		self.registry.for_each(|handle| {
			if handle.send(message.clone()).is_err() {
				unreachable.push(handle.clone());
			}
		});
		for handle in &unreachable {
			self.drop_unreachable_session(handle).await;
		}
	}

	/// The outbound channel is drop-nothing: a send failure (full or
	/// closed) means the session itself, not just the frame, must go —
	/// per the backpressure policy, a stuck consumer takes its session
	/// down rather than silently losing a frame.
	async fn drop_unreachable_session(&self, handle: &SessionHandle) {
		warn!(ticket_id = %handle.ticket_id, "outbound channel unavailable, dropping session");
		self.registry.unregister(&handle.ticket_id);
		self.login_cache.remove(&handle.ticket_id);
		self.queue.leave(handle.ticket_id.clone()).await;
		handle.disconnect("outbound channel unavailable").await;
	}

	/// A ticket was dequeued: perform the login side-call and deliver the
	/// result. Only `statusCode == 200` counts as success, per spec —
	/// the session is then disconnected, its job (wait, then log in)
	/// done. Any other status, or a transport failure entirely, leaves
	/// the session registered so the client can retry its login attempt.
	async fn finalize(&self, ticket_id: String) {
		let Some(handle) = self.registry.get(&ticket_id) else {
			self.login_cache.remove(&ticket_id);
			return;
		};
		let Some(login_event) = self.login_cache.get(&ticket_id) else {
			warn!(ticket_id, "ticket finished with no cached login attempt");
			return;
		};

		match self.client.login(&handle.platform, &login_event).await {
			Ok(result) => {
				let succeeded = result.status_code == 200;
				let delivered = self.send_login_result(&handle, &result);
				if succeeded {
					self.login_cache.remove(&ticket_id);
					self.registry.unregister(&ticket_id);
					handle.disconnect("login complete").await;
				} else if !delivered {
					self.drop_unreachable_session(&handle).await;
				}
			}
			Err(e) => {
				warn!(ticket_id, error = %e, "login side-call failed, emitting no result");
			}
		}
	}

	/// Returns whether the outbound channel was still usable — `false`
	/// only on a channel failure (full or closed), not on an encode
	/// failure, which is a bug in the payload rather than a reason to
	/// drop the session.
	fn send_login_result(&self, handle: &SessionHandle, result: &LoginServerEvent) -> bool {
		match WsMessage::new(EventCode::Login, result) {
			Ok(message) => handle.send(message).is_ok(),
			Err(e) => {
				warn!(error = %e, "failed to encode login result");
				true
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use queue_core::{CapacityState, Queue};
	use std::time::Duration as StdDuration;

	fn new_hub() -> (Arc<Hub>, mpsc::Sender<HubCommand>, mpsc::Receiver<HubCommand>, QueueNotifications, CancellationToken, tokio::task::JoinHandle<()>) {
		let capacity = Arc::new(CapacityState::new(0, 1.0, true));
		let (queue, queue_handle, notifications) = Queue::new(capacity, StdDuration::from_secs(30), StdDuration::from_millis(10), StdDuration::from_millis(10), 500, StdDuration::from_secs(180), 50);
		let cancel = CancellationToken::new();
		let queue_task = tokio::spawn(queue.run(cancel.clone()));

		let client = Arc::new(MainServerClient::new("http://127.0.0.1:1", false));
		let (hub, tx, rx) = Hub::new(queue_handle, client);
		(Arc::new(hub), tx, rx, notifications, cancel, queue_task)
	}

	#[tokio::test]
	async fn registering_a_session_adds_it_to_the_registry_without_entering_the_queue() {
		let (hub, hub_tx, hub_rx, mut notifications, cancel, queue_task) = new_hub();
		let client_cancel = CancellationToken::new();
		let client_loop = tokio::spawn({
			let hub = hub.clone();
			let client_cancel = client_cancel.clone();
			async move { hub.run_client_loop(hub_rx, client_cancel).await }
		});

		let parent = CancellationToken::new();
		let new_session = SessionHandle::new("t1".into(), "ios".into(), "127.0.0.1".into(), &parent);
		tokio::spawn(new_session.actor.run());
		let handle = new_session.handle.clone();

		hub_tx.send(HubCommand::Register(handle)).await.unwrap();
		tokio::time::sleep(StdDuration::from_millis(20)).await;
		assert_eq!(hub.registry().len(), 1);
		assert!(hub.registry().get("t1").is_some());
		// Registering alone must not create a ticket — only a cached login
		// attempt does that, so no dirty-ticket notification should appear.
		assert!(notifications.dirty_rx.try_recv().is_err());

		hub_tx.send(HubCommand::Unregister("t1".into())).await.unwrap();
		tokio::time::sleep(StdDuration::from_millis(20)).await;
		assert!(hub.registry().is_empty());

		client_cancel.cancel();
		cancel.cancel();
		let _ = client_loop.await;
		let _ = queue_task.await;
	}

	#[tokio::test]
	async fn caching_a_login_attempt_is_what_enters_the_queue() {
		let (hub, hub_tx, hub_rx, mut notifications, cancel, queue_task) = new_hub();
		let client_cancel = CancellationToken::new();
		let client_loop = tokio::spawn({
			let hub = hub.clone();
			let client_cancel = client_cancel.clone();
			async move { hub.run_client_loop(hub_rx, client_cancel).await }
		});

		let parent = CancellationToken::new();
		let new_session = SessionHandle::new("t1".into(), "ios".into(), "127.0.0.1".into(), &parent);
		tokio::spawn(new_session.actor.run());
		hub_tx.send(HubCommand::Register(new_session.handle.clone())).await.unwrap();

		let login_event = queue_protocol::LoginClientEvent {
			kind: queue_protocol::LoginTypeCode::Device,
			token: "tok".into(),
			device_id: "dev".into(),
			session_id: "sess".into(),
		};
		hub_tx.send(HubCommand::Login("t1".into(), login_event)).await.unwrap();

		let dirty = notifications.dirty_rx.recv().await.expect("login caused an Enter, issuing a ticket");
		assert_eq!(dirty.ticket_id, "t1");

		client_cancel.cancel();
		cancel.cancel();
		let _ = client_loop.await;
		let _ = queue_task.await;
	}

	#[tokio::test]
	async fn dirty_ticket_updates_are_delivered_only_to_the_registered_session() {
		let (hub, _hub_tx, _hub_rx, _notifications, cancel, queue_task) = new_hub();

		let parent = CancellationToken::new();
		let new_session = SessionHandle::new("t1".into(), "ios".into(), "127.0.0.1".into(), &parent);
		tokio::spawn(new_session.actor.run());
		hub.registry.register(new_session.handle.clone());
		let mut outbound_rx = new_session.outbound_rx;

		hub.deliver_ticket_update(DirtyTicket { ticket_id: "t1".into(), position: 7 }).await;
		let message = outbound_rx.recv().await.expect("ticket update delivered");
		assert_eq!(message.code(), Some(EventCode::Ticket));

		// No session registered under "unknown" means delivery is silently skipped.
		hub.deliver_ticket_update(DirtyTicket { ticket_id: "unknown".into(), position: 1 }).await;
		assert!(outbound_rx.try_recv().is_err());

		cancel.cancel();
		let _ = queue_task.await;
	}

	#[tokio::test]
	async fn a_full_outbound_channel_drops_the_session_instead_of_the_frame() {
		let (hub, _hub_tx, _hub_rx, _notifications, cancel, queue_task) = new_hub();

		let parent = CancellationToken::new();
		let new_session = SessionHandle::new("t1".into(), "ios".into(), "127.0.0.1".into(), &parent);
		tokio::spawn(new_session.actor.run());
		hub.registry.register(new_session.handle.clone());
		// Leave outbound_rx undrained and fill the channel past capacity.
		for i in 0..(queue_session::OUTBOUND_CAPACITY + 1) {
			hub.deliver_ticket_update(DirtyTicket {
				ticket_id: "t1".into(),
				position: i32::try_from(i).unwrap(),
			})
			.await;
		}

		assert!(hub.registry().get("t1").is_none(), "a send failure must drop the session, not just the frame");

		cancel.cancel();
		let _ = queue_task.await;
	}
}
