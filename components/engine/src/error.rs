//! Wire-visible error kinds for the engine.
//!
//! Each variant carries just enough dynamic text to render its wire line,
//! and knows whether it terminates the session.

use thiserror::Error;

use crate::adapter::AdapterError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("syntax")]
    ProtocolSyntax,

    #[error("command not valid in this state")]
    WrongState,

    #[error("authentication failed")]
    AuthFail,

    #[error("mailbox locked")]
    LockBusy,

    #[error("read-only session refused: {0}")]
    ReadOnlyRefusal(&'static str),

    #[error("no such message")]
    OutOfRange,

    #[error("backend unavailable: {0}")]
    AdapterTransient(String),

    #[error("backend error: {0}")]
    AdapterPermanent(String),

    #[error("tls failure: {0}")]
    TlsFailure(String),

    #[error("too many connections")]
    Overload,

    #[error("idle timeout")]
    IdleTimeout,

    #[error("internal error: {0}")]
    InternalBug(String),

    /// Not a §7 wire kind: the peer disconnected while a delay (e.g. the
    /// auth throttle) was being raced against the socket. There is no one to
    /// send a reply to.
    #[error("peer disconnected")]
    PeerClosed,
}

impl Error {
    /// Render the `-ERR [...] ...` (or bare `-ERR ...`) line for errors that
    /// do reply before closing or continuing. Panics for the two kinds that
    /// never produce a reply line (see [`Error::has_wire_line`]).
    pub fn wire_line(&self) -> String {
        match self {
            Error::ProtocolSyntax => "-ERR syntax".to_string(),
            Error::WrongState => "-ERR command not valid in this state".to_string(),
            Error::AuthFail => "-ERR [AUTH] authentication failed".to_string(),
            Error::LockBusy => "-ERR [IN-USE] mailbox locked".to_string(),
            Error::ReadOnlyRefusal(msg) => format!("-ERR [X-POP3SF-READ-ONLY] {}", msg),
            Error::OutOfRange => "-ERR no such message".to_string(),
            Error::AdapterTransient(_) => "-ERR [SYS/TEMP] backend unavailable".to_string(),
            Error::AdapterPermanent(_) => "-ERR [SYS/PERM] backend error".to_string(),
            Error::Overload => "-ERR [SYS/TEMP] too many connections".to_string(),
            Error::InternalBug(_) => "-ERR [SYS/TEMP] internal error".to_string(),
            Error::TlsFailure(_) | Error::IdleTimeout | Error::PeerClosed => {
                panic!("{:?} has no wire line, the connection is closed silently", self)
            }
        }
    }

    /// Whether this error produces a reply line at all (TLS failures, idle
    /// timeouts, and a peer that's already gone close the socket without one).
    pub fn has_wire_line(&self) -> bool {
        !matches!(self, Error::TlsFailure(_) | Error::IdleTimeout | Error::PeerClosed)
    }

    /// Whether the session must close after this error, instead of staying
    /// in its current state for the next command.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Error::TlsFailure(_)
                | Error::IdleTimeout
                | Error::Overload
                | Error::InternalBug(_)
                | Error::PeerClosed
        )
    }
}

impl From<AdapterError> for Error {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::AuthFail => Error::AuthFail,
            AdapterError::Transient(msg) => Error::AdapterTransient(msg),
            AdapterError::Permanent(msg) => Error::AdapterPermanent(msg),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_only_refusal_carries_extended_code() {
        let e = Error::ReadOnlyRefusal("session is read-only");
        assert_eq!(
            e.wire_line(),
            "-ERR [X-POP3SF-READ-ONLY] session is read-only"
        );
    }

    #[test]
    fn lock_busy_maps_to_in_use() {
        assert_eq!(Error::LockBusy.wire_line(), "-ERR [IN-USE] mailbox locked");
    }

    #[test]
    fn silent_kinds_close_without_reply() {
        assert!(!Error::IdleTimeout.has_wire_line());
        assert!(!Error::TlsFailure("handshake reset".into()).has_wire_line());
        assert!(!Error::PeerClosed.has_wire_line());
        assert!(Error::IdleTimeout.closes_connection());
        assert!(Error::PeerClosed.closes_connection());
    }

    #[test]
    fn adapter_errors_convert() {
        let e: Error = AdapterError::AuthFail.into();
        assert!(matches!(e, Error::AuthFail));
        let e: Error = AdapterError::Transient("timeout".into()).into();
        assert!(matches!(e, Error::AdapterTransient(_)));
    }
}
