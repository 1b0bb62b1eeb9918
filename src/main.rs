//! CLI for Mycelia
//!
//! Subcommands:
//! - `broker`: run the broker server
//! - `listen`: print every payload delivered to a local port
//! - `send`: send a message and print the acknowledgement
//! - `add-route`, `add-channel`, `add-subscriber`, ...: administrative commands

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mycelia::broker::Broker;
use mycelia::client::Client;
use mycelia::config::{Settings, load_config};
use mycelia::listener::{Listener, decode_payload};
use mycelia::protocol::{AckPolicy, Command, Endpoint};
use mycelia::transport::start_broker_server;
use mycelia::utils::{MyceliaError, logging};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mycelia")]
enum Cli {
    /// Start the broker server
    Broker,
    /// Listen for deliveries and print them
    Listen {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send a message to a route and wait for its acknowledgement
    Send {
        route: String,
        payload: String,
        /// Deliver to this channel only
        #[arg(long)]
        channel: Option<String>,
        /// Give up waiting for the ack after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Acknowledge after delivery instead of on acceptance
        #[arg(long)]
        wait_delivery: bool,
    },
    AddRoute {
        route: String,
    },
    AddChannel {
        route: String,
        channel: String,
    },
    AddSubscriber {
        route: String,
        channel: String,
        /// Subscriber address as host:port
        endpoint: Endpoint,
    },
    RemoveSubscriber {
        route: String,
        channel: String,
        endpoint: Endpoint,
    },
    AddTransformer {
        route: String,
        channel: String,
        endpoint: Endpoint,
    },
    RemoveTransformer {
        route: String,
        channel: String,
        endpoint: Endpoint,
    },
    /// Ask the broker to stop
    Shutdown,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("{}", MyceliaError::from(e));
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    if let Err(e) = run(cli, settings).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(&settings.client);

    let command = match cli {
        Cli::Broker => return run_broker(settings).await,
        Cli::Listen { host, port } => {
            let mut client_settings = settings.client.clone();
            client_settings.listen_host = host.unwrap_or(client_settings.listen_host);
            client_settings.listen_port = port.unwrap_or(client_settings.listen_port);
            return run_listener(&client_settings).await;
        }
        Cli::Send {
            route,
            payload,
            channel,
            timeout_ms,
            wait_delivery,
        } => {
            let mut message = client.message(route, payload);
            if let Some(channel) = channel {
                message = message.with_channel(channel);
            }
            if let Some(ms) = timeout_ms {
                message = message.with_timeout(Duration::from_millis(ms));
            }
            if wait_delivery {
                message = message.with_ack_policy(AckPolicy::OnDelivered);
            }
            let ack = client.send_and_get_ack(&message).await?;
            println!("{} {:?}", ack.uid, ack.ack);
            return Ok(());
        }
        Cli::AddRoute { route } => Command::AddRoute { route },
        Cli::AddChannel { route, channel } => Command::AddChannel { route, channel },
        Cli::AddSubscriber {
            route,
            channel,
            endpoint,
        } => Command::AddSubscriber {
            route,
            channel,
            endpoint,
        },
        Cli::RemoveSubscriber {
            route,
            channel,
            endpoint,
        } => Command::RemoveSubscriber {
            route,
            channel,
            endpoint,
        },
        Cli::AddTransformer {
            route,
            channel,
            endpoint,
        } => Command::AddTransformer {
            route,
            channel,
            endpoint,
        },
        Cli::RemoveTransformer {
            route,
            channel,
            endpoint,
        } => Command::RemoveTransformer {
            route,
            channel,
            endpoint,
        },
        Cli::Shutdown => Command::Shutdown,
    };

    let name = command.name();
    let ack = client.process_command(command).await?;
    info!(uid = %ack.uid, "{} acknowledged", name);
    Ok(())
}

async fn run_broker(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let broker = Arc::new(Broker::new(&settings.broker));

    tokio::select! {
        result = start_broker_server(&addr, broker, settings.broker.clone()) => {
            result?;
            info!("Broker shut down.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_listener(
    settings: &mycelia::config::ClientSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = Listener::from_settings(settings, |payload: Vec<u8>| {
        println!("{}", decode_payload(&payload));
        None
    })
    .await?;
    let stop = listener.stop_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    listener.start().await?;
    Ok(())
}
