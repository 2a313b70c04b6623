//! Configuration surface recognized by the bus and each adapter (spec §6).

use crate::schema::ValidationMode;
use crate::security::rate_limiter::RateLimiterConfig;

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub app: String,
    pub validation_mode: ValidationMode,
    pub retention_capacity: usize,
    pub max_handlers_per_topic: usize,
    pub debug: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            app: "default".to_string(),
            validation_mode: ValidationMode::Off,
            retention_capacity: 500,
            max_handlers_per_topic: 64,
            debug: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransportKind {
    Auto,
    BroadcastChannel,
    SharedWorker,
    Storage,
}

#[derive(Debug, Clone)]
pub struct CrossTabConfig {
    pub channel_name: String,
    pub transport: TransportKind,
    pub client_id: Option<String>,
    pub enable_leadership: bool,
    pub emit_system_events: bool,
    pub dedupe_window_ms: u64,
    pub dedupe_cache_size: usize,
    pub max_message_size: usize,
    pub rate_limit: Option<RateLimiterConfig>,
    pub expected_origin: Option<String>,
    pub batch_interval_ms: u32,
    pub max_batch_size: usize,
    /// Script URL for the `SharedWorker` broker. `None` means the
    /// `SharedWorker` kind is never attempted, including under `Auto`.
    pub shared_worker_script_url: Option<String>,
    pub shared_worker_reconnect_attempts: u32,
    pub debug: bool,
}

impl Default for CrossTabConfig {
    fn default() -> Self {
        Self {
            channel_name: "pubsub-mfe".to_string(),
            transport: TransportKind::Auto,
            client_id: None,
            enable_leadership: false,
            emit_system_events: true,
            dedupe_window_ms: 60_000,
            dedupe_cache_size: 1000,
            max_message_size: 64 * 1024,
            rate_limit: Some(RateLimiterConfig::default()),
            expected_origin: None,
            batch_interval_ms: 20,
            max_batch_size: 25,
            shared_worker_script_url: None,
            shared_worker_reconnect_attempts: 5,
            debug: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IframeHostConfig {
    pub trusted_origins: Vec<String>,
    pub handshake_timeout_ms: u32,
    pub max_retries: u32,
    pub auto_reconnect: bool,
    pub enforce_schema_validation: bool,
    pub debug: bool,
}

impl Default for IframeHostConfig {
    fn default() -> Self {
        Self {
            trusted_origins: Vec::new(),
            handshake_timeout_ms: 5_000,
            max_retries: 2,
            auto_reconnect: true,
            enforce_schema_validation: false,
            debug: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IframeClientConfig {
    pub expected_host_origin: String,
    pub handshake_timeout_ms: u32,
    pub auto_reconnect: bool,
    pub debug: bool,
}

impl Default for IframeClientConfig {
    fn default() -> Self {
        Self {
            expected_host_origin: String::new(),
            handshake_timeout_ms: 5_000,
            auto_reconnect: true,
            debug: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub namespace: String,
    pub max_messages: usize,
    pub ttl_seconds: u64,
    pub gc_interval_ms: u32,
    pub debug: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            max_messages: 500,
            ttl_seconds: 3600,
            gc_interval_ms: 60_000,
            debug: false,
        }
    }
}
