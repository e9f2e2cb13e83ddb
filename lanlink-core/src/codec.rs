//! `tokio_util` codec over the text frame format.
//!
//! The component loops in [`session`](crate::session) and
//! [`server`](crate::server) drive their own polled reads through
//! [`Message::from_stream`]; this codec exposes the same wire format to
//! consumers that prefer `Framed` stream I/O over a socket they own.

use bytes::BytesMut;

use crate::error::LinkError;
use crate::message::Message;

#[derive(Debug, Default)]
pub struct MessageCodec {}

/// Locate the `\r\n` terminator of the first complete frame.
///
/// A `\r` not followed by `\n` is payload; a `\r` at the end of the
/// buffer is left for the next read.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while pos < buf.len() {
        let cr = pos + buf[pos..].iter().position(|&b| b == b'\r')?;
        if cr + 1 >= buf.len() {
            return None;
        }
        if buf[cr + 1] == b'\n' {
            return Some(cr);
        }
        pos = cr + 1;
    }
    None
}

impl tokio_util::codec::Decoder for MessageCodec {
    type Item = Message;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match find_terminator(src) {
            Some(cr) => {
                let frame = src.split_to(cr + 2);
                Ok(Some(Message::from_bytes(frame[..cr].to_vec())))
            }
            None => Ok(None),
        }
    }
}

impl tokio_util::codec::Encoder<Message> for MessageCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Frames from `Message::build` already carry the terminator.
        dst.extend_from_slice(item.data());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{Decoder, Encoder, Framed};

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::from(&b"Track:k,5"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b",3.5\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.message_type(), "Track");
        assert_eq!(msg.field::<f32>(2), 3.5);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_skips_lone_cr() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::from(&b"A:1\rx\r\n"[..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.data(), b"A:1\rx");
    }

    #[test]
    fn decode_leaves_trailing_cr_buffered() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::from(&b"A:1\r"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"A:1\r");
    }

    #[test]
    fn encode_writes_frame_verbatim() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Message::build("Status", &[&"dev", &42]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"Status:dev,42\r\n");
    }

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (a, b) = tokio::io::duplex(256);
        let mut writer = Framed::new(a, MessageCodec::default());
        let mut reader = Framed::new(b, MessageCodec::default());

        writer
            .send(Message::build("Track", &[&"k", &5, &3.5]))
            .await
            .unwrap();
        writer
            .send(Message::build("KeepAlive", &[]))
            .await
            .unwrap();

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.message_type(), "Track");
        assert_eq!(first.field::<String>(0), "k");

        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(second.message_type(), "KeepAlive");
    }
}
