use crate::actor::SessionActor;
use crate::command::SessionCommand;
use crate::error::SessionError;
use crate::state::SessionState;
use crate::types::ConnectionId;
use queue_protocol::WsMessage;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Outbound frames queued per session before the writer task drains them.
/// Generous enough that a burst of stats/ticket updates never blocks the
/// hub loop under normal operation.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Upper bound the writer task gives itself to flush any still-buffered
/// frames once a session is torn down, so a just-sent login result or
/// ticket update has a chance to reach the wire before the socket closes.
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Cheaply cloneable reference to a session: a command channel into its
/// actor, an outbound frame channel its writer task drains, and the
/// cancellation token that tears its reader/writer tasks down.
#[derive(Clone)]
pub struct SessionHandle {
	pub ticket_id: String,
	pub connection_id: ConnectionId,
	pub platform: String,
	pub remote_ip: String,
	cmd_tx: mpsc::Sender<SessionCommand>,
	outbound_tx: mpsc::Sender<WsMessage>,
	cancel_token: CancellationToken,
}

/// The receiver half a session's writer task owns, paired with a fresh
/// `SessionHandle` and the actor that must be spawned alongside it.
pub struct NewSession {
	pub handle: SessionHandle,
	pub actor: SessionActor,
	pub outbound_rx: mpsc::Receiver<WsMessage>,
}

impl SessionHandle {
	pub fn new(ticket_id: String, platform: String, remote_ip: String, parent_cancel: &CancellationToken) -> NewSession {
		let (cmd_tx, cmd_rx) = mpsc::channel(32);
		let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
		let cancel_token = parent_cancel.child_token();

		NewSession {
			handle: SessionHandle {
				ticket_id,
				connection_id: ConnectionId::new(),
				platform,
				remote_ip,
				cmd_tx,
				outbound_tx,
				cancel_token,
			},
			actor: SessionActor::new(cmd_rx),
			outbound_rx,
		}
	}

	pub fn cancel_token(&self) -> &CancellationToken {
		&self.cancel_token
	}

	pub async fn record_activity(&self) {
		let _ = self.cmd_tx.send(SessionCommand::RecordActivity).await;
	}

	pub async fn check_stale(&self, pong_wait: Duration) -> Result<bool, SessionError> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.cmd_tx.send(SessionCommand::CheckStale { pong_wait, reply: reply_tx }).await.map_err(|_| SessionError::ActorUnavailable)?;
		reply_rx.await.map_err(|_| SessionError::StateRetrievalFailed)
	}

	pub async fn mark_stale(&self, reason: impl Into<String>) {
		let _ = self.cmd_tx.send(SessionCommand::MarkStale { reason: reason.into() }).await;
	}

	pub async fn disconnect(&self, reason: impl Into<String>) {
		let _ = self.cmd_tx.send(SessionCommand::Disconnect { reason: reason.into() }).await;
	}

	pub async fn get_state(&self) -> Result<SessionState, SessionError> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.cmd_tx.send(SessionCommand::GetState { reply: reply_tx }).await.map_err(|_| SessionError::ActorUnavailable)?;
		reply_rx.await.map_err(|_| SessionError::StateRetrievalFailed)
	}

	/// Stop the session's actor and cancel its reader/writer tasks. Safe to
	/// call more than once.
	pub async fn shutdown(&self) {
		let _ = self.cmd_tx.send(SessionCommand::Shutdown).await;
		self.cancel_token.cancel();
	}

	/// Queue a frame for delivery. The channel is drop-nothing: a full
	/// channel means the client's writer task is unusually backed up, and
	/// since some frames (the login result) are one-shot and not
	/// superseded by a later frame of the same kind, the frame is never
	/// silently discarded. Instead the caller gets an error and is
	/// expected to drop the session, per the backpressure policy (a stuck
	/// consumer takes its session down with it, not a single frame).
	pub fn send(&self, message: WsMessage) -> Result<(), SessionError> {
		match self.outbound_tx.try_send(message) {
			Ok(()) => Ok(()),
			Err(mpsc::error::TrySendError::Full(_)) => {
				warn!(ticket_id = %self.ticket_id, connection_id = %self.connection_id, "outbound channel full, dropping session");
				Err(SessionError::OutboundUnavailable)
			}
			Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::OutboundUnavailable),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use queue_protocol::{EventCode, ShouldQueueEvent};

	#[tokio::test(start_paused = true)]
	async fn state_round_trips_through_the_actor() {
		let parent = CancellationToken::new();
		let new_session = SessionHandle::new("t1".into(), "test".into(), "127.0.0.1".into(), &parent);
		tokio::spawn(new_session.actor.run());

		let state = new_session.handle.get_state().await.unwrap();
		assert!(state.is_active);

		new_session.handle.record_activity().await;
		let stale = new_session.handle.check_stale(Duration::from_secs(75)).await.unwrap();
		assert!(!stale);

		new_session.handle.shutdown().await;
		assert!(new_session.handle.cancel_token().is_cancelled());
	}

	#[tokio::test]
	async fn send_delivers_frames_to_the_outbound_receiver() {
		let parent = CancellationToken::new();
		let mut new_session = SessionHandle::new("t1".into(), "test".into(), "127.0.0.1".into(), &parent);
		tokio::spawn(new_session.actor.run());

		let msg = WsMessage::new(EventCode::ShouldQueue, &ShouldQueueEvent { should_queue: true }).unwrap();
		new_session.handle.send(msg).unwrap();

		let received = new_session.outbound_rx.recv().await.unwrap();
		assert_eq!(received.code(), Some(EventCode::ShouldQueue));
	}
}
