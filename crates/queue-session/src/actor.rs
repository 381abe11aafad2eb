use crate::command::SessionCommand;
use crate::state::SessionState;
use tokio::sync::mpsc;
use tracing::debug;

/// Owns the single mutable `SessionState`. All access goes through
/// `SessionCommand`s sent over `rx`, so the state itself never needs a
/// lock — mirroring the queue's single-writer discipline at a per-session
/// scale instead of a process-wide one.
pub struct SessionActor {
	state: SessionState,
	rx: mpsc::Receiver<SessionCommand>,
}

impl SessionActor {
	pub fn new(rx: mpsc::Receiver<SessionCommand>) -> Self {
		Self { state: SessionState::new(), rx }
	}

	pub async fn run(mut self) {
		while let Some(command) = self.rx.recv().await {
			match command {
				SessionCommand::RecordActivity => {
					self.state.record_activity();
				}
				SessionCommand::CheckStale { pong_wait, reply } => {
					let stale = self.state.should_be_stale(pong_wait);
					let _ = reply.send(stale);
				}
				SessionCommand::MarkStale { reason } => {
					debug!(reason, "session marked stale");
					self.state.mark_stale(reason);
				}
				SessionCommand::Disconnect { reason } => {
					debug!(reason, "session disconnected");
					self.state.disconnect(reason);
				}
				SessionCommand::GetState { reply } => {
					let _ = reply.send(self.state.clone());
				}
				SessionCommand::Shutdown => {
					return;
				}
			}
		}
	}
}
