mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, ClientSettings, LoggingSettings, ServerSettings, Settings};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing every configuration section
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("MYCELIA")
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        broker: BrokerSettings {
            max_connections: partial
                .broker
                .as_ref()
                .and_then(|b| b.max_connections)
                .unwrap_or(default.broker.max_connections),
            max_frame_len: partial
                .broker
                .as_ref()
                .and_then(|b| b.max_frame_len)
                .unwrap_or(default.broker.max_frame_len),
            connect_timeout_ms: partial
                .broker
                .as_ref()
                .and_then(|b| b.connect_timeout_ms)
                .unwrap_or(default.broker.connect_timeout_ms),
            transform_timeout_ms: partial
                .broker
                .as_ref()
                .and_then(|b| b.transform_timeout_ms)
                .unwrap_or(default.broker.transform_timeout_ms),
        },
        client: ClientSettings {
            broker_host: partial
                .client
                .as_ref()
                .and_then(|c| c.broker_host.clone())
                .unwrap_or(default.client.broker_host),
            broker_port: partial
                .client
                .as_ref()
                .and_then(|c| c.broker_port)
                .unwrap_or(default.client.broker_port),
            ack_timeout_ms: partial
                .client
                .as_ref()
                .and_then(|c| c.ack_timeout_ms)
                .or(default.client.ack_timeout_ms),
            listen_host: partial
                .client
                .as_ref()
                .and_then(|c| c.listen_host.clone())
                .unwrap_or(default.client.listen_host),
            listen_port: partial
                .client
                .as_ref()
                .and_then(|c| c.listen_port)
                .unwrap_or(default.client.listen_port),
        },
        logging: LoggingSettings {
            level: partial
                .logging
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.logging.level),
        },
    })
}

#[cfg(test)]
mod tests;
