//! Discovery datagram payloads.
//!
//! Request: the service identity as UTF-8 bytes, nothing else.
//! Response: `identity ++ u16 TCP port (network byte order) ++ payload`.

use crate::error::LinkError;

/// Encode a discovery request for `identity`.
pub fn encode_request(identity: &str) -> Vec<u8> {
    identity.as_bytes().to_vec()
}

/// Whether `data` starts with `prefix`. An empty prefix never matches;
/// an identity must be non-empty to mean anything.
pub fn has_prefix(data: &[u8], prefix: &[u8]) -> bool {
    !prefix.is_empty() && data.len() >= prefix.len() && &data[..prefix.len()] == prefix
}

/// Encode a discovery response advertising `port` with a descriptive
/// `payload`.
pub fn encode_response(identity: &str, port: u16, payload: &str) -> Vec<u8> {
    let identity = identity.as_bytes();
    let payload = payload.as_bytes();
    let mut out = Vec::with_capacity(identity.len() + 2 + payload.len());
    out.extend_from_slice(identity);
    out.extend_from_slice(&port.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decode a discovery response, validating the identity prefix.
///
/// Rejects responses from a different deployment (wrong prefix),
/// responses too short to carry a port, and payloads that are not
/// UTF-8. The probe treats every error as "ignore this datagram".
pub fn decode_response(identity: &str, data: &[u8]) -> Result<(u16, String), LinkError> {
    let prefix = identity.as_bytes();
    if !has_prefix(data, prefix) {
        return Err(LinkError::IdentityMismatch);
    }
    let rest = &data[prefix.len()..];
    if rest.len() < 2 {
        return Err(LinkError::ResponseTooShort { len: data.len() });
    }
    let port = u16::from_be_bytes([rest[0], rest[1]]);
    let payload = String::from_utf8(rest[2..].to_vec())?;
    Ok((port, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_roundtrip() {
        let data = encode_response("lanlink", 7713, "demo server");
        let (port, payload) = decode_response("lanlink", &data).unwrap();
        assert_eq!(port, 7713);
        assert_eq!(payload, "demo server");
    }

    #[test]
    fn port_is_network_byte_order() {
        let data = encode_response("x", 0x1234, "");
        assert_eq!(&data[1..3], &[0x12, 0x34]);
    }

    #[test]
    fn wrong_identity_rejected() {
        let data = encode_response("other-app", 7713, "srv");
        assert!(matches!(
            decode_response("lanlink", &data),
            Err(LinkError::IdentityMismatch)
        ));
    }

    #[test]
    fn short_response_rejected() {
        // Identity prefix present but only one port byte.
        let mut data = encode_request("lanlink");
        data.push(0x12);
        assert!(matches!(
            decode_response("lanlink", &data),
            Err(LinkError::ResponseTooShort { len: 8 })
        ));
    }

    #[test]
    fn non_utf8_payload_rejected() {
        let mut data = encode_response("lanlink", 7713, "");
        data.extend_from_slice(&[0xFF, 0xFE]);
        assert!(matches!(
            decode_response("lanlink", &data),
            Err(LinkError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn empty_payload_is_legal() {
        let data = encode_response("lanlink", 80, "");
        assert_eq!(
            decode_response("lanlink", &data).unwrap(),
            (80, String::new())
        );
    }

    #[test]
    fn empty_prefix_never_matches() {
        assert!(!has_prefix(b"anything", b""));
    }
}
