//! The framed text message unit and its wire scanner.
//!
//! Wire format: `TYPE:field1,field2,...,fieldN\r\n`. Fields are UTF-8
//! text separated by `,`; a comma preceded by `\` does not end the
//! field (and the backslash is kept in the extracted text — see
//! DESIGN.md). The frame terminator is `\r\n`; a `\r` not followed by
//! `\n` is ordinary payload.
//!
//! [`Message::build`] produces a complete frame including the
//! terminator; [`Message::from_stream`] slices complete frames out of a
//! read buffer, leaving any partial trailing frame for the next read.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};

use tracing::warn;

/// Identity tag for one accepted server-side connection.
///
/// Stamped onto every message decoded from that connection so replies
/// can be targeted back at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ── Message ──────────────────────────────────────────────────────

/// One framed unit of the text wire protocol.
///
/// Holds the raw bytes of a single frame plus an optional origin tag.
/// Encoded messages carry the `\r\n` terminator; messages decoded by
/// [`Message::from_stream`] have it stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    data: Vec<u8>,
    origin: Option<ConnectionId>,
}

impl Message {
    /// Type tag reported for frames without a valid `TYPE:` prefix.
    pub const NONE: &'static str = "None";

    /// Wrap raw frame bytes without validation.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, origin: None }
    }

    /// Encode a frame from a type tag and displayable field values.
    ///
    /// No escaping is performed; callers must pre-escape commas inside
    /// field values. An absent value is passed as `""` — the separator
    /// is still emitted, so field indices stay stable.
    pub fn build(msg_type: &str, fields: &[&dyn fmt::Display]) -> Self {
        let mut text = String::with_capacity(64);
        text.push_str(msg_type);
        text.push(':');
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                text.push(',');
            }
            let _ = write!(text, "{field}");
        }
        text.push_str("\r\n");
        Self {
            data: text.into_bytes(),
            origin: None,
        }
    }

    /// The raw frame bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The connection this message arrived on (server side), or the
    /// connection it is targeted at when queued for sending.
    pub fn origin(&self) -> Option<ConnectionId> {
        self.origin
    }

    /// Tag this message with a connection identity.
    pub fn with_origin(mut self, origin: Option<ConnectionId>) -> Self {
        self.origin = origin;
        self
    }

    /// The logical type tag: the text before the first `:`.
    ///
    /// Returns [`Message::NONE`] when the colon is missing, sits at
    /// index 0, or the prefix is not valid UTF-8.
    pub fn message_type(&self) -> &str {
        match self.data.iter().position(|&b| b == b':') {
            Some(p) if p > 0 => std::str::from_utf8(&self.data[..p]).unwrap_or(Self::NONE),
            _ => Self::NONE,
        }
    }

    /// Extract field `index` and convert it to `T`.
    ///
    /// An absent or empty field yields `T::default()` silently; a field
    /// that fails to parse yields `T::default()` and logs a warning.
    /// This never panics on malformed input.
    pub fn field<T: FieldValue>(&self, index: usize) -> T {
        match self.field_text(index) {
            None | Some("") => T::default(),
            Some(text) => match T::parse_field(text) {
                Some(value) => value,
                None => {
                    warn!(
                        index,
                        text,
                        frame = %self,
                        "failed to parse message field; using zero value"
                    );
                    T::default()
                }
            },
        }
    }

    /// Borrow the raw text of field `index`, honoring the
    /// backslash-comma escape. `None` when the field does not exist.
    fn field_text(&self, index: usize) -> Option<&str> {
        let colon = self.data.iter().position(|&b| b == b':')?;
        let mut body = &self.data[colon + 1..];
        // Encoded frames still carry the terminator; it is not field text.
        if body.ends_with(b"\r\n") {
            body = &body[..body.len() - 2];
        }

        let mut remaining = index;
        let mut field_start = 0usize;
        let mut pos = 0usize;
        loop {
            let comma = body[pos..].iter().position(|&b| b == b',').map(|r| pos + r);
            match comma {
                // `\,` suppresses the split; the backslash stays in the text.
                Some(j) if j > 0 && body[j - 1] == b'\\' => pos = j + 1,
                Some(j) => {
                    if remaining == 0 {
                        return std::str::from_utf8(&body[field_start..j]).ok();
                    }
                    remaining -= 1;
                    field_start = j + 1;
                    pos = field_start;
                }
                None => {
                    if remaining == 0 {
                        return std::str::from_utf8(&body[field_start..]).ok();
                    }
                    return None;
                }
            }
        }
    }

    /// Scan `bytes[*start..len]` for complete frames and enqueue one
    /// [`Message`] per frame found, tagged with `origin`.
    ///
    /// `start` is advanced past every consumed frame and ends at the
    /// first unconsumed byte, so a partial trailing frame (including a
    /// `\r` with no following byte yet) stays in the buffer for the
    /// next read. Returns the number of frames decoded.
    pub fn from_stream(
        bytes: &[u8],
        start: &mut usize,
        len: usize,
        queue: &mut VecDeque<Message>,
        origin: Option<ConnectionId>,
    ) -> usize {
        let mut pos = *start;
        let mut count = 0;
        while pos < len {
            let Some(rel) = bytes[pos..len].iter().position(|&b| b == b'\r') else {
                break;
            };
            let cr = pos + rel;
            if cr + 1 >= len {
                // The `\n` may arrive with the next read.
                break;
            }
            if bytes[cr + 1] != b'\n' {
                pos = cr + 1;
                continue;
            }
            queue.push_back(Message {
                data: bytes[*start..cr].to_vec(),
                origin,
            });
            count += 1;
            pos = cr + 2;
            *start = pos;
        }
        count
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

// ── FieldValue ───────────────────────────────────────────────────

/// A type that can be extracted from a message field.
///
/// The supported set is closed on purpose: string, signed/unsigned
/// integers, floats, and bool, each with an explicit non-throwing
/// parse. `None` from [`parse_field`](FieldValue::parse_field) means
/// the caller falls back to the type's zero value.
pub trait FieldValue: Default {
    fn parse_field(text: &str) -> Option<Self>
    where
        Self: Sized;
}

impl FieldValue for String {
    fn parse_field(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

macro_rules! numeric_field_value {
    ($($ty:ty),*) => {
        $(impl FieldValue for $ty {
            fn parse_field(text: &str) -> Option<Self> {
                text.trim().parse().ok()
            }
        })*
    };
}

numeric_field_value!(i32, i64, u16, u32, f32, f64);

impl FieldValue for bool {
    fn parse_field(text: &str) -> Option<Self> {
        if text.eq_ignore_ascii_case("true") {
            Some(true)
        } else if text.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(frame: &[u8]) -> Message {
        let mut queue = VecDeque::new();
        let mut start = 0;
        let n = Message::from_stream(frame, &mut start, frame.len(), &mut queue, None);
        assert_eq!(n, 1);
        queue.pop_front().unwrap()
    }

    #[test]
    fn encode_then_decode_track() {
        let msg = Message::build("Track", &[&"k", &5, &3.5]);
        assert_eq!(msg.data(), b"Track:k,5,3.5\r\n");

        let decoded = decode_one(msg.data());
        assert_eq!(decoded.message_type(), "Track");
        assert_eq!(decoded.field::<String>(0), "k");
        assert_eq!(decoded.field::<i32>(1), 5);
        assert_eq!(decoded.field::<f64>(2), 3.5);
    }

    #[test]
    fn fields_readable_before_decode() {
        // Encoded frames still carry the terminator; the last field
        // must not include it.
        let msg = Message::build("Status", &[&"dev", &87]);
        assert_eq!(msg.field::<String>(0), "dev");
        assert_eq!(msg.field::<i32>(1), 87);
    }

    #[test]
    fn escaped_comma_suppresses_split_but_keeps_backslash() {
        let msg = decode_one(b"Note:a\\,b,c\r\n");
        assert_eq!(msg.field::<String>(0), "a\\,b");
        assert_eq!(msg.field::<String>(1), "c");
    }

    #[test]
    fn empty_field_list_is_legal() {
        let msg = decode_one(b"KeepAlive:\r\n");
        assert_eq!(msg.message_type(), "KeepAlive");
        assert_eq!(msg.field::<String>(0), "");
        assert_eq!(msg.field::<i32>(0), 0);
    }

    #[test]
    fn missing_and_out_of_range_fields_yield_zero_values() {
        let msg = decode_one(b"Status:dev,,ws\r\n");
        assert_eq!(msg.field::<String>(0), "dev");
        assert_eq!(msg.field::<i32>(1), 0);
        assert_eq!(msg.field::<String>(2), "ws");
        assert_eq!(msg.field::<String>(7), "");
        assert_eq!(msg.field::<f32>(7), 0.0);
    }

    #[test]
    fn unparseable_field_yields_zero_value() {
        let msg = decode_one(b"Track:k,notanumber\r\n");
        assert_eq!(msg.field::<i32>(1), 0);
        assert_eq!(msg.field::<bool>(1), false);
    }

    #[test]
    fn missing_colon_gives_none_type() {
        let msg = decode_one(b"garbage without colon\r\n");
        assert_eq!(msg.message_type(), Message::NONE);
        assert_eq!(msg.field::<String>(0), "");
    }

    #[test]
    fn colon_at_index_zero_gives_none_type() {
        let msg = decode_one(b":a,b\r\n");
        assert_eq!(msg.message_type(), Message::NONE);
    }

    #[test]
    fn lone_cr_is_not_a_terminator() {
        let msg = decode_one(b"A:1\rx\r\n");
        assert_eq!(msg.data(), b"A:1\rx");
        assert_eq!(msg.message_type(), "A");
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let buf = b"A:1\r\nB:2\r\nC:3\r\n";
        let mut queue = VecDeque::new();
        let mut start = 0;
        let n = Message::from_stream(buf, &mut start, buf.len(), &mut queue, None);
        assert_eq!(n, 3);
        assert_eq!(start, buf.len());
        let types: Vec<_> = queue.iter().map(|m| m.message_type().to_string()).collect();
        assert_eq!(types, ["A", "B", "C"]);
    }

    #[test]
    fn partial_trailing_frame_stays_in_buffer() {
        let buf = b"A:1\r\nB:partial";
        let mut queue = VecDeque::new();
        let mut start = 0;
        let n = Message::from_stream(buf, &mut start, buf.len(), &mut queue, None);
        assert_eq!(n, 1);
        assert_eq!(&buf[start..], b"B:partial");
    }

    #[test]
    fn cr_at_end_of_buffer_is_partial() {
        // The `\n` may be in the next read; do not consume the `\r`.
        let buf = b"A:1\r";
        let mut queue = VecDeque::new();
        let mut start = 0;
        let n = Message::from_stream(buf, &mut start, buf.len(), &mut queue, None);
        assert_eq!(n, 0);
        assert_eq!(start, 0);
    }

    #[test]
    fn split_at_any_offset_decodes_identically() {
        let wire = b"Track:k,5,3.5\r\nStatus:dev,87\r\n";
        let mut whole = VecDeque::new();
        let mut start = 0;
        Message::from_stream(wire, &mut start, wire.len(), &mut whole, None);

        for split in 0..wire.len() {
            let mut buf: Vec<u8> = Vec::new();
            let mut queue = VecDeque::new();

            buf.extend_from_slice(&wire[..split]);
            let mut idx = 0;
            Message::from_stream(&buf, &mut idx, buf.len(), &mut queue, None);
            buf.drain(..idx);

            buf.extend_from_slice(&wire[split..]);
            let mut idx = 0;
            Message::from_stream(&buf, &mut idx, buf.len(), &mut queue, None);

            assert_eq!(queue, whole, "split at {split}");
        }
    }

    #[test]
    fn origin_tag_applied_to_decoded_frames() {
        let buf = b"A:1\r\n";
        let mut queue = VecDeque::new();
        let mut start = 0;
        Message::from_stream(buf, &mut start, buf.len(), &mut queue, Some(ConnectionId(7)));
        assert_eq!(queue.pop_front().unwrap().origin(), Some(ConnectionId(7)));
    }

    #[test]
    fn bool_field_parses_case_insensitively() {
        let msg = decode_one(b"Flag:True,FALSE\r\n");
        assert!(msg.field::<bool>(0));
        assert!(!msg.field::<bool>(1));
    }
}
