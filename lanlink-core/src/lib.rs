//! # lanlink-core
//!
//! LAN discovery and framed TCP messaging for controller/controlled
//! application pairs.
//!
//! This crate contains:
//! - **Message**: the text-framed wire unit, its encoder and the
//!   stream scanner (`Message`, `FieldValue`)
//! - **Codec**: `MessageCodec` for `Framed`-style I/O via `tokio_util`
//! - **Discovery**: UDP broadcast discovery — `Beacon` (server-side
//!   responder), `Probe` (client-side requester), `Advertisement`
//! - **Session**: `ClientSession`, the client connection state machine
//! - **Server**: `ServerHost`, the multi-connection accept/timeout
//!   manager
//! - **Dispatch**: `MessageDispatcher` routing decoded messages to
//!   typed `MessageData` handlers
//! - **Protocol**: the typed records (status, track, request,
//!   response, keep-alive) used by the demo applications
//! - **Config**: `LinkConfig`, TOML-backed deployment configuration
//! - **Error**: `LinkError` — typed, `thiserror`-based errors

pub mod codec;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod protocol;
pub mod server;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::MessageCodec;
pub use config::LinkConfig;
pub use discovery::{
    ADVERTISEMENT_TIMEOUT, Advertisement, Beacon, DEFAULT_DISCOVERY_PORT, DiscoveryCallback,
    PROBE_INTERVAL, Probe,
};
pub use dispatch::{MessageData, MessageDispatcher, MessageEmitter};
pub use error::LinkError;
pub use message::{ConnectionId, FieldValue, Message};
pub use protocol::{
    KeepAliveMessage, RequestMessage, ResponseMessage, StatusMessage, TrackMessage,
};
pub use server::{ServerEvent, ServerHost};
pub use session::{ClientSession, SessionState};
