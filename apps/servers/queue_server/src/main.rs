use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::Router;
use queue_core::Config;
use queue_server::error::handle_tower_error;
use queue_server::websocket::websocket_handler;
use queue_server::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::{limit::ConcurrencyLimitLayer, load_shed::LoadShedLayer, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

type FilterHandle = Arc<reload::Handle<EnvFilter, Registry>>;

/// Builds the subscriber with a reloadable filter layer so `/debug` can
/// flip verbosity at runtime without a restart, matching the original's
/// `PUT/DELETE /debug` toggle over its zap logger level.
fn init_tracing(config: &Config) -> FilterHandle {
	let filter = EnvFilter::try_new(&config.rust_log).unwrap_or_else(|_| EnvFilter::new("info"));
	let (filter, handle) = reload::Layer::new(filter);
	tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
	Arc::new(handle)
}

async fn healthz() -> StatusCode {
	StatusCode::OK
}

/// Drops the filter to `debug` for every target, regardless of `RUST_LOG`.
async fn enable_debug(State(handle): State<FilterHandle>) -> StatusCode {
	match handle.reload(EnvFilter::new("debug")) {
		Ok(()) => {
			tracing::info!("debug logging enabled via /debug");
			StatusCode::OK
		}
		Err(e) => {
			tracing::warn!(error = %e, "failed to reload tracing filter");
			StatusCode::INTERNAL_SERVER_ERROR
		}
	}
}

/// Restores the filter to `info` for every target.
async fn disable_debug(State(handle): State<FilterHandle>) -> StatusCode {
	match handle.reload(EnvFilter::new("info")) {
		Ok(()) => {
			tracing::info!("debug logging disabled via /debug");
			StatusCode::OK
		}
		Err(e) => {
			tracing::warn!(error = %e, "failed to reload tracing filter");
			StatusCode::INTERNAL_SERVER_ERROR
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	dotenv::dotenv().ok();
	let config = Config::new();
	let filter_handle = init_tracing(&config);

	let cancel_token = CancellationToken::new();
	let port = config.port;
	let max_concurrent_connections = config.max_concurrent_connections;
	let request_timeout = Duration::from_millis(config.request_timeout_ms);
	let (state, tasks) = AppState::build(config, cancel_token.clone()).await?;

	let debug_routes = Router::new().route("/debug", put(enable_debug).delete(disable_debug)).with_state(filter_handle);

	// Timeout/load-shed/concurrency-limit wrap the whole router, including
	// the websocket upgrade route — this is safe because axum's upgrade
	// future is detached from the request future the moment the 101
	// response is returned, so these layers only ever bound the admission
	// handshake itself, never the lifetime of an admitted connection.
	let app = Router::new()
		.route("/ws", get(websocket_handler))
		.route("/healthz", get(healthz))
		.with_state(state)
		.merge(debug_routes)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(HandleErrorLayer::new(handle_tower_error))
				.layer(ConcurrencyLimitLayer::new(max_concurrent_connections))
				.layer(TimeoutLayer::new(request_timeout))
				.layer(LoadShedLayer::new()),
		);

	let addr = SocketAddr::from(([0, 0, 0, 0], port));
	let listener = TcpListener::bind(addr).await?;
	tracing::info!(%addr, "queue_server listening");

	let shutdown_cancel = cancel_token.clone();
	tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		tracing::info!("shutdown signal received");
		shutdown_cancel.cancel();
	});

	axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).with_graceful_shutdown(cancel_token.cancelled_owned()).await?;

	tracing::info!("draining background tasks");
	let drain = async {
		let _ = tasks.queue.await;
		let _ = tasks.hub_client_loop.await;
		let _ = tasks.hub_queue_loop.await;
		let _ = tasks.capacity_estimator.await;
	};
	if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
		tracing::warn!("background tasks did not drain within the shutdown grace period");
	}

	Ok(())
}
