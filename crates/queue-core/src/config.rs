use clap::Parser;
use std::time::Duration;

/// Process configuration for the queue server. Every field has an `env`
/// fallback so the same binary runs unconfigured in development and fully
/// pinned in production.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	#[arg(long, env = "PORT", default_value = "8080", help = "TCP port the HTTP/websocket listener binds to")]
	pub port: u16,

	#[arg(long, env = "MAIN_SERVER_HOST", help = "Base URL of the main game server this queue sits in front of")]
	pub main_server_host: String,

	#[arg(long, env = "MAIN_SERVER_AUTH_TOKEN", default_value = "", help = "jtoken header value sent with the online-users side-call")]
	pub main_server_auth_token: String,

	#[arg(long, env = "REDIS_HOST", default_value = "redis://127.0.0.1:6379", help = "Redis connection URL backing the shared config hash")]
	pub redis_host: String,

	#[arg(
        long,
        env = "SESSION_STALE_SECONDS",
        default_value = "300",
        value_parser = parse_duration_secs,
        help = "A session with no pong/activity for this long is considered dead"
    )]
	pub session_stale: Duration,

	#[arg(
        long,
        env = "TICKET_STALE_SECONDS",
        default_value = "30",
        value_parser = parse_duration_secs,
        help = "An inactive ticket older than this is reclaimed by the dequeue loop"
    )]
	pub ticket_stale: Duration,

	#[arg(
        long,
        env = "NOTIFY_STATS_INTERVAL_SECONDS",
        default_value = "5",
        value_parser = parse_duration_secs,
        help = "How often the stats worker may broadcast a stats snapshot"
    )]
	pub notify_stats_interval: Duration,

	#[arg(
        long,
        env = "DEQUEUE_INTERVAL_SECONDS",
        default_value = "10",
        value_parser = parse_duration_secs,
        help = "Tick period of the queue's dequeue scheduler"
    )]
	pub dequeue_interval: Duration,

	#[arg(long, env = "MAX_DEQUEUE_PER_INTERVAL", default_value = "500", help = "Upper bound on tickets admitted in a single dequeue tick")]
	pub max_dequeue_per_interval: u32,

	#[arg(
        long,
        env = "INIT_AVG_WAIT_SECONDS",
        default_value = "180",
        value_parser = parse_duration_secs,
        help = "Average-wait estimate reported before the sliding window has any samples"
    )]
	pub init_avg_wait: Duration,

	#[arg(long, env = "AVERAGE_WAIT_WINDOW_SIZE", default_value = "50", help = "Number of recent wait-time samples kept for the average-wait estimate")]
	pub average_wait_window_size: usize,

	#[arg(
        long,
        env = "PING_INTERVAL_SECONDS",
        default_value = "30",
        value_parser = parse_duration_secs,
        help = "Heartbeat ping interval for every session; PongWait is derived as 2.5x this value"
    )]
	pub ping_interval: Duration,

	#[arg(
        long,
        env = "CAPACITY_REFRESH_INTERVAL_SECONDS",
        default_value = "5",
        value_parser = parse_duration_secs,
        help = "How often the capacity estimator polls the main server for the online-user count"
    )]
	pub capacity_refresh_interval: Duration,

	#[arg(long, env = "ONLINE_USERS_THRESHOLD", default_value = "0", help = "Online-user count at which the main server is considered at capacity")]
	pub online_users_threshold: u32,

	#[arg(
        long,
        env = "START_QUEUE_THRESHOLD",
        default_value = "1.0",
        help = "Fraction of online_users_threshold at which queueing begins; shouldQueue fires once online_users >= online_users_threshold * start_queue_threshold"
    )]
	pub start_queue_threshold: f64,

	#[arg(long, env = "IS_QUEUE_ENABLED", default_value = "true", help = "Master switch; when false every connection bypasses the queue entirely")]
	pub is_queue_enabled: bool,

	#[arg(long, env = "MAX_MESSAGE_BYTES", default_value = "8192", help = "Maximum accepted inbound websocket frame size")]
	pub max_message_bytes: usize,

	#[arg(long, env = "RUST_LOG", default_value = "info", help = "Default tracing filter directive, overridable at runtime")]
	pub rust_log: String,

	#[arg(long, env = "VERBOSE_HTTP_DUMP", default_value = "false", help = "Log method/url/status of every main-server side-call at debug level")]
	pub verbose_http_dump: bool,

	#[arg(long, env = "MAX_CONCURRENT_CONNECTIONS", default_value = "10000", help = "Upper bound on in-flight HTTP requests (the websocket upgrade handshake counts as one; the connection itself is not held open against this limit)")]
	pub max_concurrent_connections: usize,

	#[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "5000", help = "Deadline for the synchronous portion of an HTTP request, including the websocket upgrade handshake itself (not the lifetime of the resulting connection)")]
	pub request_timeout_ms: u64,
}

impl Config {
	pub fn new() -> Self {
		Self::parse()
	}

	#[cfg(test)]
	pub fn test() -> Self {
		Self {
			port: 0,
			main_server_host: "http://localhost:9999".into(),
			main_server_auth_token: "test-token".into(),
			redis_host: "redis://127.0.0.1:6379".into(),
			session_stale: Duration::from_secs(300),
			ticket_stale: Duration::from_secs(30),
			notify_stats_interval: Duration::from_secs(5),
			dequeue_interval: Duration::from_millis(50),
			max_dequeue_per_interval: 500,
			init_avg_wait: Duration::from_secs(180),
			average_wait_window_size: 50,
			ping_interval: Duration::from_secs(30),
			capacity_refresh_interval: Duration::from_secs(5),
			online_users_threshold: 100,
			start_queue_threshold: 1.0,
			is_queue_enabled: true,
			max_message_bytes: 8192,
			rust_log: "debug".into(),
			verbose_http_dump: false,
			max_concurrent_connections: 10_000,
			request_timeout_ms: 5_000,
		}
	}

	/// Derived from `ping_interval` per spec: a session is considered
	/// unresponsive once this much time passes without a pong/activity.
	pub fn pong_wait(&self) -> Duration {
		self.ping_interval.mul_f64(2.5)
	}
}

fn parse_duration_secs(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_configuration_knobs_table() {
		let config = Config::try_parse_from(["queue_server", "--main-server-host", "http://main"]).unwrap();
		assert_eq!(config.session_stale, Duration::from_secs(300));
		assert_eq!(config.ticket_stale, Duration::from_secs(30));
		assert_eq!(config.notify_stats_interval, Duration::from_secs(5));
		assert_eq!(config.dequeue_interval, Duration::from_secs(10));
		assert_eq!(config.max_dequeue_per_interval, 500);
		assert_eq!(config.init_avg_wait, Duration::from_secs(180));
		assert_eq!(config.average_wait_window_size, 50);
		assert_eq!(config.ping_interval, Duration::from_secs(30));
		assert!((config.start_queue_threshold - 1.0).abs() < f64::EPSILON);
		assert_eq!(config.max_concurrent_connections, 10_000);
		assert_eq!(config.request_timeout_ms, 5_000);
	}

	#[test]
	fn pong_wait_is_two_and_a_half_times_ping_interval() {
		let config = Config::test();
		assert_eq!(config.pong_wait(), Duration::from_secs(75));
	}

	#[test]
	fn parse_duration_secs_rejects_non_numeric_input() {
		assert!(parse_duration_secs("not-a-number").is_err());
		assert_eq!(parse_duration_secs("42").unwrap(), Duration::from_secs(42));
	}
}
