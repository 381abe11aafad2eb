use dashmap::DashMap;
use queue_session::SessionHandle;

/// Every currently-connected session, keyed by ticket id. Concurrent
/// registration/lookup/removal from many session tasks at once is exactly
/// what `DashMap` is for, unlike the queue itself, which has a single
/// writer by design.
#[derive(Default)]
pub struct ClientRegistry {
	sessions: DashMap<String, SessionHandle>,
}

impl ClientRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, handle: SessionHandle) {
		self.sessions.insert(handle.ticket_id.clone(), handle);
	}

	pub fn unregister(&self, ticket_id: &str) -> Option<SessionHandle> {
		self.sessions.remove(ticket_id).map(|(_, handle)| handle)
	}

	pub fn get(&self, ticket_id: &str) -> Option<SessionHandle> {
		self.sessions.get(ticket_id).map(|entry| entry.value().clone())
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	pub fn for_each(&self, mut f: impl FnMut(&SessionHandle)) {
		for entry in &self.sessions {
			f(entry.value());
		}
	}
}
