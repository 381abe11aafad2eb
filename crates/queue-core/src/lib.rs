pub mod capacity;
pub mod config;
pub mod error;
pub mod queue;
pub mod stats;
pub mod ticket;

pub use capacity::{CapacityState, ConfigStore, HttpOnlineUsersClient, InMemoryConfigStore, OnlineUsersClient, RedisConfigStore};
pub use config::Config;
pub use error::QueueError;
pub use queue::{DirtyTicket, Queue, QueueHandle, QueueNotifications, StatsSnapshot};
pub use stats::Stats;
pub use ticket::Ticket;
