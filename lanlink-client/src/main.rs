//! lanlink client — entry point.
//!
//! ```text
//! lanlink-client                 Run in the foreground
//! lanlink-client --config <path> Load a custom config TOML
//! lanlink-client --gen-config    Write default config to stdout
//! ```
//!
//! Discovers a server on the LAN, keeps a connection alive, and sends
//! demo status/track traffic while logging server responses.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lanlink_core::dispatch::MessageData;
use lanlink_core::{
    ClientSession, KeepAliveMessage, LinkConfig, MessageDispatcher, RequestMessage,
    ResponseMessage, StatusMessage, TrackMessage,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lanlink-client", about = "LAN discovery client for framed messaging")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "lanlink-client.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Device id reported in status messages.
    #[arg(long, default_value = "lanlink-demo")]
    device_id: String,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&LinkConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = LinkConfig::load(&cli.config);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("lanlink-client v{}", env!("CARGO_PKG_VERSION"));
    info!("service identity: {}", config.service_identity);
    info!("discovery port: {}", config.discovery_port);

    let mut session = ClientSession::new(config.clone());
    session.start();

    let mut dispatcher = MessageDispatcher::new();
    dispatcher.add_handler(ResponseMessage::any(), |response: &ResponseMessage, _| {
        info!(key = %response.key, result = %response.result, message = %response.message, "response");
    });
    dispatcher.on_unmatched(|message| {
        warn!(message_type = %message.message_type(), "unrecognised message");
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut index: i32 = 0;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received — shutting down");
                break;
            }
            _ = ticker.tick() => {
                dispatcher.process(&session);

                let state = session.state();
                if !state.is_connected() {
                    debug!(%state, "waiting for server");
                    continue;
                }

                session.send(KeepAliveMessage.serialize());
                session.send(TrackMessage::sample("demo", index, index as f32 * 0.5).serialize());
                if index % 10 == 0 {
                    let status = StatusMessage {
                        device_id: cli.device_id.clone(),
                        battery: 100,
                        session_id: "demo".into(),
                        message: String::new(),
                        state: state.to_string(),
                        section: 0,
                    };
                    session.send(status.serialize());
                    session.send(RequestMessage::command(RequestMessage::PLAY).serialize());
                }
                index += 1;
            }
        }
    }

    session.stop().await;
    Ok(())
}
