use dashmap::DashMap;
use queue_protocol::LoginClientEvent;

/// Holds each ticket's login attempt from the moment it arrives until the
/// ticket is admitted and the side-call can actually be made. A client may
/// resend a `LoginClientEvent` (e.g. after a failed attempt); the newest
/// one replaces the cached value.
#[derive(Default)]
pub struct LoginCache {
	entries: DashMap<String, LoginClientEvent>,
}

impl LoginCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, ticket_id: String, event: LoginClientEvent) {
		self.entries.insert(ticket_id, event);
	}

	pub fn get(&self, ticket_id: &str) -> Option<LoginClientEvent> {
		self.entries.get(ticket_id).map(|entry| entry.value().clone())
	}

	pub fn remove(&self, ticket_id: &str) {
		self.entries.remove(ticket_id);
	}
}
