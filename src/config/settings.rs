use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker server, the broker engine, the client
/// side and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the broker server.
///
/// Defines the host and port the broker will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration settings for the broker engine.
///
/// Controls connection limits, frame size and the timeouts used while
/// delivering to subscribers and transformers.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub max_frame_len: usize,
    pub connect_timeout_ms: u64,
    pub transform_timeout_ms: u64,
}

/// Configuration settings for clients and listeners.
///
/// `ack_timeout_ms` left unset means acknowledgement waits are unbounded.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub ack_timeout_ms: Option<u64>,
    pub listen_host: String,
    pub listen_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub max_frame_len: Option<usize>,
    pub connect_timeout_ms: Option<u64>,
    pub transform_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub ack_timeout_ms: Option<u64>,
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 5000,
            },
            broker: BrokerSettings::default(),
            client: ClientSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_frame_len: 1024 * 1024,
            connect_timeout_ms: 2000,
            transform_timeout_ms: 5000,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 5000,
            ack_timeout_ms: None,
            listen_host: "0.0.0.0".to_string(),
            listen_port: 5500,
        }
    }
}
