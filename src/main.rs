//! CLI for Tidings
//!
//! Subcommands:
//! - `serve`: run the WebSocket server
//! - `client`: push a message and pull it back (useful for smoke tests)

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tidings::Broker;
use tidings::config::{load_config, load_config_from};
use tidings::transport::start_websocket_server;
use tidings::utils::logging;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tidings")]
enum Command {
    /// Start the WebSocket server
    Serve {
        /// Configuration file (extension optional); defaults to config/default
        #[arg(long)]
        config: Option<String>,
    },
    /// Push one message and pull it back
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long, default_value = "test")]
        topic: String,
        #[arg(long, default_value = "Hello")]
        message: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    match Command::parse() {
        Command::Serve { config } => {
            if let Err(e) = run_server(config.as_deref()).await {
                // no-op if the configured subscriber is already installed
                logging::init("info");
                error!("Server failed: {}", e);
            }
        }
        Command::Client {
            url,
            topic,
            message,
        } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &topic, &message).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server(config: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = match config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    logging::init(&settings.logging.level);

    let broker = Broker::new(settings.broker.clone());

    tokio::select! {
        result = start_websocket_server(&settings.server, broker) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_client(url: &str, topic: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;

    let push = json!({ "type": "push", "topic": topic, "message": message });
    ws_stream
        .send(WsMessage::text(push.to_string()))
        .await?;
    if let Some(frame) = ws_stream.next().await {
        println!("Push response: {}", frame?.to_text()?);
    }

    let pull = json!({ "type": "pull", "topic": topic, "timeout_ms": 1000 });
    ws_stream
        .send(WsMessage::text(pull.to_string()))
        .await?;
    if let Some(frame) = ws_stream.next().await {
        println!("Pull response: {}", frame?.to_text()?);
    }

    ws_stream.close(None).await?;
    Ok(())
}
