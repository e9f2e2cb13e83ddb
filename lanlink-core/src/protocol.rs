//! Typed message records used by the demo applications.
//!
//! Each record is plain data over the generic framing contract:
//! a type tag, positional fields, and [`MessageData`] behavior. Records
//! built with `for_key` act as key-filtered prototypes — they only
//! claim messages whose first field equals that key, so one dispatcher
//! can fan a shared type tag out to per-key handlers.

use crate::dispatch::MessageData;
use crate::message::Message;

/// Shared matching rule for records whose first field is a routing key.
fn tag_and_key_match(tag: &str, match_key: Option<&str>, message: &Message) -> bool {
    message.message_type() == tag
        && match_key.is_none_or(|key| message.field::<String>(0) == key)
}

// ── Status ───────────────────────────────────────────────────────

/// Periodic device status report.
///
/// Fields: device id, battery percentage, session id, free-form
/// message, state name, section index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusMessage {
    pub device_id: String,
    pub battery: i32,
    pub session_id: String,
    pub message: String,
    pub state: String,
    pub section: i32,
}

impl StatusMessage {
    pub const TAG: &'static str = "Status";
}

impl MessageData for StatusMessage {
    fn matches(&self, message: &Message) -> bool {
        message.message_type() == Self::TAG
    }

    fn parse(&mut self, message: &Message) {
        self.device_id = message.field(0);
        self.battery = message.field(1);
        self.session_id = message.field(2);
        self.message = message.field(3);
        self.state = message.field(4);
        self.section = message.field(5);
    }

    fn serialize(&self) -> Message {
        Message::build(
            Self::TAG,
            &[
                &self.device_id,
                &self.battery,
                &self.session_id,
                &self.message,
                &self.state,
                &self.section,
            ],
        )
    }
}

// ── Track ────────────────────────────────────────────────────────

/// A keyed telemetry sample: `Track:key,index,value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMessage {
    match_key: Option<String>,
    pub key: String,
    pub index: i32,
    pub value: f32,
}

impl TrackMessage {
    pub const TAG: &'static str = "Track";

    /// A prototype matching every `Track` message.
    pub fn any() -> Self {
        Self::default()
    }

    /// A prototype matching only `Track` messages carrying `key`.
    pub fn for_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            match_key: Some(key.clone()),
            key,
            ..Self::default()
        }
    }

    pub fn sample(key: impl Into<String>, index: i32, value: f32) -> Self {
        Self {
            match_key: None,
            key: key.into(),
            index,
            value,
        }
    }
}

impl MessageData for TrackMessage {
    fn matches(&self, message: &Message) -> bool {
        tag_and_key_match(Self::TAG, self.match_key.as_deref(), message)
    }

    fn parse(&mut self, message: &Message) {
        self.key = message.field(0);
        self.index = message.field(1);
        self.value = message.field(2);
    }

    fn serialize(&self) -> Message {
        Message::build(Self::TAG, &[&self.key, &self.index, &self.value])
    }
}

// ── Request ──────────────────────────────────────────────────────

/// A control command from the controller to the controlled app.
///
/// Only `goto_section` carries an argument; every other key is bare.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMessage {
    match_key: Option<String>,
    pub key: String,
    pub section: i32,
}

impl RequestMessage {
    pub const TAG: &'static str = "Request";

    pub const PLAY: &'static str = "play";
    pub const STOP: &'static str = "stop";
    pub const REWIND: &'static str = "rewind";
    pub const GOTO_SECTION: &'static str = "goto_section";

    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            match_key: Some(key.clone()),
            key,
            section: 0,
        }
    }

    pub fn command(key: impl Into<String>) -> Self {
        Self {
            match_key: None,
            key: key.into(),
            section: 0,
        }
    }

    pub fn goto_section(section: i32) -> Self {
        Self {
            match_key: None,
            key: Self::GOTO_SECTION.into(),
            section,
        }
    }
}

impl MessageData for RequestMessage {
    fn matches(&self, message: &Message) -> bool {
        tag_and_key_match(Self::TAG, self.match_key.as_deref(), message)
    }

    fn parse(&mut self, message: &Message) {
        if self.match_key.is_none() {
            self.key = message.field(0);
        }
        if self.key == Self::GOTO_SECTION {
            self.section = message.field(1);
        }
    }

    fn serialize(&self) -> Message {
        if self.key == Self::GOTO_SECTION {
            Message::build(Self::TAG, &[&self.key, &self.section])
        } else {
            Message::build(Self::TAG, &[&self.key])
        }
    }
}

// ── Response ─────────────────────────────────────────────────────

/// The controlled app's reply to a [`RequestMessage`], echoing the
/// request key with a result and a human-readable message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseMessage {
    match_key: Option<String>,
    pub key: String,
    pub result: String,
    pub message: String,
}

impl ResponseMessage {
    pub const TAG: &'static str = "Response";

    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            match_key: Some(key.clone()),
            key,
            ..Self::default()
        }
    }

    pub fn ok(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            match_key: None,
            key: key.into(),
            result: "ok".into(),
            message: message.into(),
        }
    }
}

impl MessageData for ResponseMessage {
    fn matches(&self, message: &Message) -> bool {
        tag_and_key_match(Self::TAG, self.match_key.as_deref(), message)
    }

    fn parse(&mut self, message: &Message) {
        if self.match_key.is_none() {
            self.key = message.field(0);
        }
        self.result = message.field(1);
        self.message = message.field(2);
    }

    fn serialize(&self) -> Message {
        Message::build(Self::TAG, &[&self.key, &self.result, &self.message])
    }
}

// ── KeepAlive ────────────────────────────────────────────────────

/// Bare liveness ping; carries no fields, exists to refresh the
/// server's activity timestamp for the sending connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveMessage;

impl KeepAliveMessage {
    pub const TAG: &'static str = "KeepAlive";
}

impl MessageData for KeepAliveMessage {
    fn matches(&self, message: &Message) -> bool {
        message.message_type() == Self::TAG
    }

    fn parse(&mut self, _message: &Message) {}

    fn serialize(&self) -> Message {
        Message::build(Self::TAG, &[])
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_round_trip() {
        let sample = TrackMessage::sample("volume", 5, 3.5);
        let wire = sample.serialize();
        assert_eq!(wire.data(), b"Track:volume,5,3.5\r\n");

        let mut parsed = TrackMessage::any();
        assert!(parsed.matches(&wire));
        parsed.parse(&wire);
        assert_eq!(parsed.key, "volume");
        assert_eq!(parsed.index, 5);
        assert_eq!(parsed.value, 3.5);
    }

    #[test]
    fn key_filter_rejects_other_keys() {
        let volume = TrackMessage::sample("volume", 0, 0.0).serialize();
        let pan = TrackMessage::sample("pan", 0, 0.0).serialize();
        let prototype = TrackMessage::for_key("volume");
        assert!(prototype.matches(&volume));
        assert!(!prototype.matches(&pan));
        assert!(TrackMessage::any().matches(&pan));
    }

    #[test]
    fn status_round_trip_with_empty_fields() {
        let status = StatusMessage {
            device_id: "dev-1".into(),
            battery: 87,
            session_id: "s9".into(),
            message: String::new(),
            state: "running".into(),
            section: 2,
        };
        let wire = status.serialize();
        let mut parsed = StatusMessage::default();
        assert!(parsed.matches(&wire));
        parsed.parse(&wire);
        assert_eq!(parsed, status);
    }

    #[test]
    fn goto_section_carries_its_argument() {
        let wire = RequestMessage::goto_section(4).serialize();
        assert_eq!(wire.data(), b"Request:goto_section,4\r\n");

        let mut parsed = RequestMessage::any();
        parsed.parse(&wire);
        assert_eq!(parsed.key, RequestMessage::GOTO_SECTION);
        assert_eq!(parsed.section, 4);
    }

    #[test]
    fn bare_request_serializes_key_only() {
        let wire = RequestMessage::command(RequestMessage::PLAY).serialize();
        assert_eq!(wire.data(), b"Request:play\r\n");
    }

    #[test]
    fn key_filtered_request_keeps_its_key_on_parse() {
        let wire = RequestMessage::command(RequestMessage::STOP).serialize();
        let mut prototype = RequestMessage::for_key(RequestMessage::STOP);
        assert!(prototype.matches(&wire));
        prototype.parse(&wire);
        assert_eq!(prototype.key, RequestMessage::STOP);
    }

    #[test]
    fn response_round_trip() {
        let wire = ResponseMessage::ok("play", "started").serialize();
        let mut parsed = ResponseMessage::any();
        assert!(parsed.matches(&wire));
        parsed.parse(&wire);
        assert_eq!(parsed.result, "ok");
        assert_eq!(parsed.message, "started");
    }

    #[test]
    fn keep_alive_is_bare() {
        let wire = KeepAliveMessage.serialize();
        assert_eq!(wire.data(), b"KeepAlive:\r\n");
        assert!(KeepAliveMessage.matches(&wire));
    }
}
