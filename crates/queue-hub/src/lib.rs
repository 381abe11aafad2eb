pub mod client;
pub mod error;
pub mod hub;
pub mod login_cache;
pub mod registry;

pub use client::{MainServerClient, SessionCheckOutcome};
pub use error::HubError;
pub use hub::{Hub, HubCommand, COMMAND_CAPACITY};
pub use login_cache::LoginCache;
pub use registry::ClientRegistry;
