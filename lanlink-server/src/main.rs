//! lanlink server — entry point.
//!
//! ```text
//! lanlink-server                 Run in the foreground
//! lanlink-server --config <path> Load a custom config TOML
//! lanlink-server --gen-config    Write default config to stdout
//! ```
//!
//! Advertises itself on the LAN, accepts client connections, and
//! answers `Request` messages with targeted `Response` replies while
//! logging incoming status and track traffic.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lanlink_core::dispatch::MessageData;
use lanlink_core::{
    ConnectionId, KeepAliveMessage, LinkConfig, Message, MessageDispatcher, RequestMessage,
    ResponseMessage, ServerEvent, ServerHost, StatusMessage, TrackMessage,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lanlink-server", about = "LAN-discoverable framed message server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "lanlink-server.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
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

    info!("lanlink-server v{}", env!("CARGO_PKG_VERSION"));
    info!("service identity: {}", config.service_identity);
    info!("discovery port: {}", config.discovery_port);
    info!("tcp port: {}", config.tcp_port);

    let mut host = ServerHost::new(config.clone());
    host.start().await?;
    let mut events = host.take_events().ok_or("event channel unavailable")?;

    // Handlers run inside dispatcher.process on this task; replies go
    // through a channel back to the host's outbound queue.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<(Option<ConnectionId>, Message)>();

    let mut dispatcher = MessageDispatcher::new();
    dispatcher.add_handler(StatusMessage::default(), |status: &StatusMessage, origin| {
        info!(
            ?origin,
            device = %status.device_id,
            battery = status.battery,
            state = %status.state,
            "status report"
        );
    });
    dispatcher.add_handler(TrackMessage::any(), |track: &TrackMessage, origin| {
        info!(?origin, key = %track.key, index = track.index, value = track.value, "track sample");
    });
    let replies = reply_tx.clone();
    dispatcher.add_handler(RequestMessage::any(), move |request: &RequestMessage, origin| {
        info!(?origin, key = %request.key, section = request.section, "request received");
        let response = ResponseMessage::ok(&request.key, "done").serialize();
        let _ = replies.send((origin, response));
    });
    dispatcher.add_handler(KeepAliveMessage, |_: &KeepAliveMessage, origin| {
        debug!(?origin, "keep-alive");
    });
    dispatcher.on_unmatched(|message| {
        warn!(message_type = %message.message_type(), "unrecognised message");
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(config.send_interval());

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received — shutting down");
                break;
            }
            Some(event) = events.recv() => match event {
                ServerEvent::ClientConnected(id, addr) => {
                    info!(%id, %addr, clients = host.client_count(), "client connected");
                }
                ServerEvent::ClientDisconnected(id, addr) => {
                    info!(%id, %addr, clients = host.client_count(), "client disconnected");
                }
            },
            _ = ticker.tick() => {
                dispatcher.process(&host);
                while let Ok((target, reply)) = reply_rx.try_recv() {
                    host.send(reply, target);
                }
            }
        }
    }

    host.stop().await;
    Ok(())
}
