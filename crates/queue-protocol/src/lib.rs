//! Wire types for the admission-control queue duplex protocol.
//!
//! Every frame exchanged over the websocket is a [`WsMessage`] envelope
//! carrying an [`EventCode`] and an opaque JSON payload. The payload shape
//! for each code is fixed by the five event structs below; field names
//! match the wire contract exactly (camelCase, as sent by clients).

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifies the shape of a frame's `eventData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EventCode {
	ShouldQueue = 1000,
	Login = 1001,
	QueueStats = 1002,
	Ticket = 1003,
}

impl EventCode {
	pub fn from_u32(code: u32) -> Option<Self> {
		match code {
			1000 => Some(Self::ShouldQueue),
			1001 => Some(Self::Login),
			1002 => Some(Self::QueueStats),
			1003 => Some(Self::Ticket),
			_ => None,
		}
	}

	pub fn as_u32(self) -> u32 {
		self as u32
	}
}

impl fmt::Display for EventCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_u32())
	}
}

/// Which third-party identity provider a login request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoginTypeCode {
	Facebook = 0,
	Google = 1,
	Apple = 2,
	Line = 3,
	Device = 4,
}

impl Serialize for LoginTypeCode {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_u8(*self as u8)
	}
}

impl<'de> Deserialize<'de> for LoginTypeCode {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let code = u8::deserialize(deserializer)?;
		Self::from_u8(code).ok_or_else(|| serde::de::Error::custom(format!("unknown login type code {code}")))
	}
}

impl LoginTypeCode {
	pub fn from_u8(code: u8) -> Option<Self> {
		match code {
			0 => Some(Self::Facebook),
			1 => Some(Self::Google),
			2 => Some(Self::Apple),
			3 => Some(Self::Line),
			4 => Some(Self::Device),
			_ => None,
		}
	}

	/// Path suffix appended to the main server's authorization endpoint.
	pub fn url_suffix(self) -> &'static str {
		match self {
			Self::Facebook => "/facebook",
			Self::Google => "/google",
			Self::Apple => "/apple",
			Self::Line => "/line",
			Self::Device => "/device",
		}
	}

	/// JSON field name carrying the provider token/id in the outbound
	/// authorization request body.
	pub fn token_field(self) -> &'static str {
		match self {
			Self::Facebook | Self::Google => "token",
			Self::Apple | Self::Line => "accessToken",
			Self::Device => "uniqueId",
		}
	}
}

/// The envelope every frame is wrapped in, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
	#[serde(rename = "eventCode")]
	pub event_code: u32,
	#[serde(rename = "eventData")]
	pub event_data: Value,
}

impl WsMessage {
	pub fn new<T: Serialize>(code: EventCode, data: &T) -> Result<Self, serde_json::Error> {
		Ok(Self {
			event_code: code.as_u32(),
			event_data: serde_json::to_value(data)?,
		})
	}

	pub fn code(&self) -> Option<EventCode> {
		EventCode::from_u32(self.event_code)
	}

	pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
		serde_json::from_value(self.event_data.clone())
	}
}

/// First message sent to a freshly-upgraded connection: whether it must
/// wait in the queue at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShouldQueueEvent {
	#[serde(rename = "shouldQueue")]
	pub should_queue: bool,
}

/// Client -> server: a login attempt, cached by the hub until the ticket
/// is admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginClientEvent {
	#[serde(rename = "type")]
	pub kind: LoginTypeCode,
	pub token: String,
	#[serde(rename = "deviceId")]
	pub device_id: String,
	#[serde(rename = "sessionId")]
	pub session_id: String,
}

/// Server -> client: the outcome of the login side-call performed at
/// admission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginServerEvent {
	#[serde(rename = "statusCode")]
	pub status_code: u16,
	pub jwt: String,
}

/// Server -> all clients: a stats snapshot, broadcast whenever the queue's
/// stats worker observes a change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueStatsServerEvent {
	#[serde(rename = "headPosition")]
	pub head_position: i32,
	#[serde(rename = "tailPosition")]
	pub tail_position: i32,
	#[serde(rename = "avgWaitMsec")]
	pub avg_wait_msec: i64,
}

/// Server -> one client: that client's own ticket, sent whenever its
/// dirty flag is observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketServerEvent {
	#[serde(rename = "ticketId")]
	pub ticket_id: String,
	pub position: i32,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn event_code_round_trips_through_wire_ints() {
		for code in [EventCode::ShouldQueue, EventCode::Login, EventCode::QueueStats, EventCode::Ticket] {
			assert_eq!(EventCode::from_u32(code.as_u32()), Some(code));
		}
		assert_eq!(EventCode::from_u32(9999), None);
	}

	#[test]
	fn login_type_code_serializes_as_bare_integer() {
		let json = serde_json::to_string(&LoginTypeCode::Apple).unwrap();
		assert_eq!(json, "2");
		let back: LoginTypeCode = serde_json::from_str("4").unwrap();
		assert_eq!(back, LoginTypeCode::Device);
		assert!(serde_json::from_str::<LoginTypeCode>("7").is_err());
	}

	#[test]
	fn login_type_code_maps_to_url_suffix_and_field_name() {
		assert_eq!(LoginTypeCode::Facebook.url_suffix(), "/facebook");
		assert_eq!(LoginTypeCode::Facebook.token_field(), "token");
		assert_eq!(LoginTypeCode::Apple.url_suffix(), "/apple");
		assert_eq!(LoginTypeCode::Apple.token_field(), "accessToken");
		assert_eq!(LoginTypeCode::Device.url_suffix(), "/device");
		assert_eq!(LoginTypeCode::Device.token_field(), "uniqueId");
	}

	#[test]
	fn ws_message_wraps_and_unwraps_typed_payload() {
		let stats = QueueStatsServerEvent {
			head_position: 3,
			tail_position: 42,
			avg_wait_msec: 15_000,
		};
		let msg = WsMessage::new(EventCode::QueueStats, &stats).unwrap();
		assert_eq!(msg.code(), Some(EventCode::QueueStats));

		let decoded: QueueStatsServerEvent = msg.decode().unwrap();
		assert_eq!(decoded.head_position, 3);
		assert_eq!(decoded.tail_position, 42);
		assert_eq!(decoded.avg_wait_msec, 15_000);
	}

	#[test]
	fn login_client_event_uses_exact_wire_field_names() {
		let raw = r#"{"type":2,"token":"abc","deviceId":"dev-1","sessionId":"sess-1"}"#;
		let event: LoginClientEvent = serde_json::from_str(raw).unwrap();
		assert_eq!(event.kind, LoginTypeCode::Apple);
		assert_eq!(event.device_id, "dev-1");
		assert_eq!(event.session_id, "sess-1");
	}
}
