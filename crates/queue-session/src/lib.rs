pub mod actor;
pub mod command;
pub mod error;
pub mod handle;
pub mod state;
pub mod types;

pub use actor::SessionActor;
pub use command::SessionCommand;
pub use error::SessionError;
pub use handle::{NewSession, SessionHandle, CLOSE_GRACE_PERIOD, OUTBOUND_CAPACITY};
pub use state::SessionState;
pub use types::ConnectionId;
