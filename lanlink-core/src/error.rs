//! Domain-specific error types for the lanlink protocol.
//!
//! All fallible operations return `Result<T, LinkError>`.
//! Transient network faults are handled inside the component loops and
//! never surface here; these variants cover setup failures and
//! rejected discovery datagrams.

use thiserror::Error;

/// The canonical error type for the lanlink crate.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Connection / socket errors ───────────────────────────────
    /// The UDP/TCP layer reported an error (bind, broadcast option, …).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Discovery errors ─────────────────────────────────────────
    /// A discovery datagram did not carry the expected service identity.
    #[error("discovery payload does not match service identity")]
    IdentityMismatch,

    /// A discovery response was too short to carry a port.
    #[error("discovery response too short: {len} bytes")]
    ResponseTooShort { len: usize },

    /// A discovery response payload was not valid UTF-8.
    #[error("invalid utf-8 in discovery payload: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = LinkError::ResponseTooShort { len: 3 };
        assert!(e.to_string().contains('3'));

        let e = LinkError::IdentityMismatch;
        assert!(e.to_string().contains("identity"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: LinkError = io_err.into();
        assert!(matches!(e, LinkError::Io(_)));
    }

    #[test]
    fn from_utf8() {
        let bad = String::from_utf8(vec![0xFF, 0xFE]).unwrap_err();
        let e: LinkError = bad.into();
        assert!(e.to_string().contains("utf-8"));
    }
}
