use crate::error::AdmissionError;
use crate::{CoreContext, RealtimeContext};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use queue_hub::{HubCommand, SessionCheckOutcome};
use queue_protocol::{EventCode, LoginClientEvent, ShouldQueueEvent, WsMessage};
use queue_session::{SessionError, SessionHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn websocket_handler(
	State(core): State<Arc<CoreContext>>,
	State(realtime): State<Arc<RealtimeContext>>,
	ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
	headers: HeaderMap,
	ws: WebSocketUpgrade,
) -> axum::response::Response {
	let ticket_id = match headers.get("ticketId").and_then(|v| v.to_str().ok()) {
		Some(id) if !id.is_empty() => id.to_owned(),
		_ => return AdmissionError::MissingTicketId.into_response(),
	};
	let jwt = headers.get("jwt").and_then(|v| v.to_str().ok()).map(str::to_owned);
	let platform = headers.get("platform").and_then(|v| v.to_str().ok()).unwrap_or("unknown").to_owned();
	let remote_ip = remote_addr.ip().to_string();

	ws.on_upgrade(move |socket| handle_socket(socket, core, realtime, ticket_id, jwt, platform, remote_ip))
}

/// Two optional pre-upgrade side-calls let an already-in-game caller skip
/// the queue entirely. Without a `jwt` header neither check can be made, so
/// the caller falls through to ordinary queueing.
async fn session_check_outcome(realtime: &RealtimeContext, jwt: Option<&str>) -> SessionCheckOutcome {
	let Some(jwt) = jwt else {
		return SessionCheckOutcome::QueueNeeded;
	};

	match realtime.main_server.room_session(jwt).await {
		Ok(SessionCheckOutcome::NoQueueNeeded) => return SessionCheckOutcome::NoQueueNeeded,
		Ok(SessionCheckOutcome::Maintenance) => return SessionCheckOutcome::Maintenance,
		Ok(SessionCheckOutcome::QueueNeeded) => {}
		Err(e) => warn!(error = %e, "room session check failed"),
	}

	match realtime.main_server.user_session(jwt).await {
		Ok(outcome) => outcome,
		Err(e) => {
			warn!(error = %e, "user session check failed");
			SessionCheckOutcome::QueueNeeded
		}
	}
}

async fn handle_socket(socket: WebSocket, core: Arc<CoreContext>, realtime: Arc<RealtimeContext>, ticket_id: String, jwt: Option<String>, platform: String, remote_ip: String) {
	let (mut sender, mut receiver) = socket.split();

	let mut should_queue = realtime.capacity.should_queue();
	if should_queue {
		match session_check_outcome(&realtime, jwt.as_deref()).await {
			SessionCheckOutcome::NoQueueNeeded | SessionCheckOutcome::Maintenance => should_queue = false,
			SessionCheckOutcome::QueueNeeded => {}
		}
	}

	if let Ok(msg) = WsMessage::new(EventCode::ShouldQueue, &ShouldQueueEvent { should_queue }) {
		let _ = sender.send(Message::Text(serde_json::to_string(&msg).unwrap_or_default())).await;
	}

	if !should_queue {
		// 1013 = "Try Again Later", matching the original's CloseTryAgainLater.
		let _ = sender
			.send(Message::Close(Some(axum::extract::ws::CloseFrame {
				code: 1013,
				reason: "No need queue".into(),
			})))
			.await;
		return;
	}

	let new_session = SessionHandle::new(ticket_id.clone(), platform, remote_ip, &core.cancel_token);
	let actor_task = tokio::spawn(new_session.actor.run());
	let handle = new_session.handle;
	let mut outbound_rx = new_session.outbound_rx;

	let connection_id = handle.connection_id;
	if realtime.hub_commands.send(HubCommand::Register(handle.clone())).await.is_err() {
		warn!(ticket_id, %connection_id, "hub is no longer accepting registrations");
		return;
	}
	info!(ticket_id, %connection_id, "websocket connection admitted to queue");

	let writer_cancel = handle.cancel_token().clone();
	let ping_interval = core.config.ping_interval;
	let writer_task = tokio::spawn(async move {
		let mut ping_ticker = tokio::time::interval(ping_interval);
		loop {
			tokio::select! {
				_ = writer_cancel.cancelled() => {
					// Give any frame already queued (a login result, a final
					// ticket update) a chance to reach the wire before the
					// socket goes down.
					let drain_deadline = tokio::time::Instant::now() + queue_session::CLOSE_GRACE_PERIOD;
					while tokio::time::Instant::now() < drain_deadline {
						match outbound_rx.try_recv() {
							Ok(msg) => {
								let Ok(text) = serde_json::to_string(&msg) else { continue };
								if sender.send(Message::Text(text)).await.is_err() {
									break;
								}
							}
							Err(_) => break,
						}
					}
					break;
				}
				maybe_msg = outbound_rx.recv() => {
					match maybe_msg {
						Some(msg) => {
							let Ok(text) = serde_json::to_string(&msg) else { continue };
							if sender.send(Message::Text(text)).await.is_err() {
								break;
							}
						}
						None => break,
					}
				}
				_ = ping_ticker.tick() => {
					if sender.send(Message::Ping(Vec::new())).await.is_err() {
						break;
					}
				}
			}
		}
		let _ = sender.close().await;
	});

	let reader_cancel = handle.cancel_token().clone();
	let reader_handle = handle.clone();
	let pong_wait = core.config.pong_wait();
	let max_message_bytes = core.config.max_message_bytes;
	let hub_commands = realtime.hub_commands.clone();
	let reader_ticket_id = ticket_id.clone();
	let reader_task = tokio::spawn(async move {
		let mut stale_check = tokio::time::interval(pong_wait);
		loop {
			tokio::select! {
				_ = reader_cancel.cancelled() => break,
				_ = stale_check.tick() => {
					if reader_handle.check_stale(pong_wait).await.unwrap_or(false) {
						reader_handle.mark_stale("no activity within pong wait").await;
						break;
					}
				}
				maybe_msg = receiver.next() => {
					match maybe_msg {
						Some(Ok(Message::Text(text))) => {
							if let Err(e) = check_frame_size(&text, max_message_bytes) {
								warn!(ticket_id = %reader_ticket_id, error = %e, "closing connection on oversized frame");
								break;
							}
							reader_handle.record_activity().await;
							if let Err(e) = dispatch_inbound(&hub_commands, &reader_ticket_id, &text).await {
								warn!(ticket_id = %reader_ticket_id, error = %e, "dropping malformed frame");
							}
						}
						Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
							reader_handle.record_activity().await;
						}
						Some(Ok(Message::Close(_))) | None => break,
						Some(Ok(Message::Binary(_))) => {}
						Some(Err(e)) => {
							warn!(ticket_id = %reader_ticket_id, error = %e, "websocket read error");
							break;
						}
					}
				}
			}
		}
	});

	let _ = tokio::join!(reader_task, writer_task);
	actor_task.abort();

	let _ = realtime.hub_commands.send(HubCommand::Unregister(ticket_id.clone())).await;
	info!(ticket_id, %connection_id, "websocket connection closed");
}

fn check_frame_size(text: &str, limit: usize) -> Result<(), SessionError> {
	if text.len() > limit {
		return Err(SessionError::FrameTooLarge { limit });
	}
	Ok(())
}

async fn dispatch_inbound(hub_commands: &tokio::sync::mpsc::Sender<HubCommand>, ticket_id: &str, text: &str) -> Result<(), SessionError> {
	let msg: WsMessage = serde_json::from_str(text)?;
	if msg.code() != Some(EventCode::Login) {
		return Ok(());
	}
	let login_event: LoginClientEvent = msg.decode()?;
	let _ = hub_commands.send(HubCommand::Login(ticket_id.to_owned(), login_event)).await;
	Ok(())
}
