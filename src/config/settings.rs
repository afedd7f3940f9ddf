use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the WebSocket server, the broker and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the address the server binds to, how many connections it
/// accepts at once and how many pulls one connection may have waiting.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub max_pending_pulls: usize,
}

/// Configuration settings for the broker.
///
/// Controls message retention, the GC cadence of every topic and how long
/// an unused topic lives.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    /// Retained messages older than this are evicted.
    pub message_ttl_secs: u64,
    /// Upper bound on retained messages per topic.
    pub max_retained_messages: usize,
    pub gc_interval_ms: u64,
    /// Capacity of each actor's command queue.
    pub command_buffer: usize,
    /// Deliveries a subscriber may leave unread before it is dropped.
    pub subscriber_buffer: usize,
    /// Pull timeouts below this are raised to it.
    pub min_pull_timeout_ms: u64,
    /// `0` keeps topics alive forever.
    pub idle_topic_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

impl BrokerSettings {
    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        // a zero period would make tokio's interval panic
        Duration::from_millis(self.gc_interval_ms.max(1))
    }

    pub fn min_pull_timeout(&self) -> Duration {
        Duration::from_millis(self.min_pull_timeout_ms.max(1))
    }

    pub fn idle_topic_ttl(&self) -> Option<Duration> {
        match self.idle_topic_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn command_buffer(&self) -> usize {
        self.command_buffer.max(1)
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer.max(1)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_connections: Option<usize>,
    pub max_pending_pulls: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub message_ttl_secs: Option<u64>,
    pub max_retained_messages: Option<usize>,
    pub gc_interval_ms: Option<u64>,
    pub command_buffer: Option<usize>,
    pub subscriber_buffer: Option<usize>,
    pub min_pull_timeout_ms: Option<u64>,
    pub idle_topic_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every missing value from `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                max_connections: server
                    .max_connections
                    .unwrap_or(default.server.max_connections),
                max_pending_pulls: server
                    .max_pending_pulls
                    .unwrap_or(default.server.max_pending_pulls),
            },
            broker: BrokerSettings {
                message_ttl_secs: broker
                    .message_ttl_secs
                    .unwrap_or(default.broker.message_ttl_secs),
                max_retained_messages: broker
                    .max_retained_messages
                    .unwrap_or(default.broker.max_retained_messages),
                gc_interval_ms: broker
                    .gc_interval_ms
                    .unwrap_or(default.broker.gc_interval_ms),
                command_buffer: broker
                    .command_buffer
                    .unwrap_or(default.broker.command_buffer),
                subscriber_buffer: broker
                    .subscriber_buffer
                    .unwrap_or(default.broker.subscriber_buffer),
                min_pull_timeout_ms: broker
                    .min_pull_timeout_ms
                    .unwrap_or(default.broker.min_pull_timeout_ms),
                idle_topic_ttl_secs: broker
                    .idle_topic_ttl_secs
                    .unwrap_or(default.broker.idle_topic_ttl_secs),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            message_ttl_secs: 70,
            max_retained_messages: 100,
            gc_interval_ms: 1000,
            command_buffer: 64,
            subscriber_buffer: 1024,
            min_pull_timeout_ms: 1,
            idle_topic_ttl_secs: 0,
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                max_connections: 1000,
                max_pending_pulls: 16,
            },
            broker: BrokerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
