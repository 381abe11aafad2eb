use crate::state::SessionState;
use tokio::sync::oneshot;
use tokio::time::Duration;

/// Commands accepted by a session's actor loop.
pub enum SessionCommand {
	RecordActivity,
	CheckStale { pong_wait: Duration, reply: oneshot::Sender<bool> },
	MarkStale { reason: String },
	Disconnect { reason: String },
	GetState { reply: oneshot::Sender<SessionState> },
	Shutdown,
}
