use clap::{Args, Parser, ValueEnum};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub messaging: MessagingConfig,

    #[command(flatten)]
    pub websocket: WsConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct DatabaseConfig {
    /// Database connection URL. When omitted the server keeps all state in memory.
    #[arg(long = "database-url", env = "CONFIDE_DATABASE_URL")]
    pub url: Option<String>,

    /// Maximum number of pooled connections
    #[arg(long, env = "CONFIDE_DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub max_connections: u32,

    /// Minimum number of idle connections kept open
    #[arg(long, env = "CONFIDE_DB_MIN_CONNECTIONS", default_value_t = 2)]
    pub min_connections: u32,

    /// Seconds to wait for a free connection before failing
    #[arg(long, env = "CONFIDE_DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub acquire_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "CONFIDE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "CONFIDE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Port for the management (health) server
    #[arg(long, env = "CONFIDE_MGMT_PORT", default_value_t = 9090)]
    pub mgmt_port: u16,

    /// Seconds to wait for sessions to drain during shutdown
    #[arg(long, env = "CONFIDE_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Secret key for JWT signing
    #[arg(long, env = "CONFIDE_JWT_SECRET")]
    pub jwt_secret: String,

    /// Access token time-to-live in seconds
    #[arg(long, env = "CONFIDE_ACCESS_TOKEN_TTL_SECS", default_value_t = 3600)]
    pub access_token_ttl_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct MessagingConfig {
    /// How long after creation a message may still be edited by its sender
    #[arg(long, env = "CONFIDE_EDIT_WINDOW_SECS", default_value_t = 600)]
    pub edit_window_secs: i64,
}

#[derive(Clone, Debug, Args)]
pub struct WsConfig {
    /// Size of the per-connection outbound event buffer
    #[arg(long, env = "CONFIDE_WS_OUTBOUND_BUFFER_SIZE", default_value_t = 64)]
    pub outbound_buffer_size: usize,

    /// Seconds allowed for token validation and membership checks before a connection is refused
    #[arg(long, env = "CONFIDE_WS_ADMISSION_TIMEOUT_SECS", default_value_t = 10)]
    pub admission_timeout_secs: u64,

    /// Interval between server heartbeat pings
    #[arg(long, env = "CONFIDE_WS_PING_INTERVAL_SECS", default_value_t = 30)]
    pub ping_interval_secs: u64,

    /// Grace period after a ping before a silent connection is dropped
    #[arg(long, env = "CONFIDE_WS_PING_TIMEOUT_SECS", default_value_t = 10)]
    pub ping_timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint (gRPC). Export is disabled when unset.
    #[arg(long, env = "CONFIDE_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Log output format
    #[arg(long, env = "CONFIDE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
