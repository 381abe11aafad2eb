pub mod error;
pub mod websocket;

use axum::extract::FromRef;
use queue_core::{CapacityState, Config, HttpOnlineUsersClient, Queue, QueueHandle, RedisConfigStore};
use queue_hub::{Hub, HubCommand};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Process-wide configuration and the token every background task
/// derives its own cancellation from.
pub struct CoreContext {
	pub config: Arc<Config>,
	pub cancel_token: CancellationToken,
}

/// Everything the websocket handler needs to admit and register a
/// connection: the capacity gate, the queue's Enter/Leave handle, and the
/// channel into the hub's client loop.
pub struct RealtimeContext {
	pub capacity: Arc<CapacityState>,
	pub queue: QueueHandle,
	pub hub_commands: mpsc::Sender<HubCommand>,
	pub registry: Arc<queue_hub::ClientRegistry>,
	pub main_server: Arc<queue_hub::MainServerClient>,
}

#[derive(Clone)]
pub struct AppState {
	pub core: Arc<CoreContext>,
	pub realtime: Arc<RealtimeContext>,
}

impl FromRef<AppState> for Arc<CoreContext> {
	fn from_ref(state: &AppState) -> Self {
		state.core.clone()
	}
}

impl FromRef<AppState> for Arc<RealtimeContext> {
	fn from_ref(state: &AppState) -> Self {
		state.realtime.clone()
	}
}

/// Background tasks spawned by `AppState::build`, held so `main` can await
/// them during graceful shutdown.
pub struct BackgroundTasks {
	pub queue: JoinHandle<()>,
	pub hub_client_loop: JoinHandle<()>,
	pub hub_queue_loop: JoinHandle<()>,
	pub capacity_estimator: JoinHandle<()>,
}

impl AppState {
	pub async fn build(config: Config, cancel_token: CancellationToken) -> anyhow::Result<(Self, BackgroundTasks)> {
		let config = Arc::new(config);

		let capacity = Arc::new(CapacityState::new(config.online_users_threshold, config.start_queue_threshold, config.is_queue_enabled));

		let (queue, queue_handle, queue_notifications) = Queue::new(
			capacity.clone(),
			config.ticket_stale,
			config.dequeue_interval,
			config.notify_stats_interval,
			config.max_dequeue_per_interval,
			config.init_avg_wait,
			config.average_wait_window_size,
		);
		let queue_task = tokio::spawn(queue.run(cancel_token.child_token()));

		let main_server_client = Arc::new(queue_hub::MainServerClient::new(config.main_server_host.clone(), config.verbose_http_dump));
		let (hub, hub_tx, hub_rx) = Hub::new(queue_handle.clone(), main_server_client.clone());
		let hub = Arc::new(hub);
		let registry = hub.registry();

		let hub_client_loop = tokio::spawn({
			let hub = hub.clone();
			let cancel = cancel_token.child_token();
			async move { hub.run_client_loop(hub_rx, cancel).await }
		});
		let hub_queue_loop = tokio::spawn({
			let hub = hub.clone();
			async move { hub.run_queue_loop(queue_notifications).await }
		});

		let config_store = RedisConfigStore::new(&config.redis_host)?;
		let online_users_client = HttpOnlineUsersClient::new(&config.main_server_host, config.main_server_auth_token.clone());
		let capacity_estimator = tokio::spawn({
			let capacity = capacity.clone();
			let interval = config.capacity_refresh_interval;
			let cancel = cancel_token.child_token();
			async move { queue_core::capacity::run_capacity_estimator(capacity, config_store, online_users_client, interval, cancel).await }
		});

		let state = Self {
			core: Arc::new(CoreContext { config, cancel_token }),
			realtime: Arc::new(RealtimeContext { capacity, queue: queue_handle, hub_commands: hub_tx, registry, main_server: main_server_client }),
		};

		let tasks = BackgroundTasks {
			queue: queue_task,
			hub_client_loop,
			hub_queue_loop,
			capacity_estimator,
		};

		Ok((state, tasks))
	}
}
