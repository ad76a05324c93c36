//! Engine session state.

/// Observable state of the SMTP engine.
///
/// Exactly one state is active at any time; transitions are announced via
/// [`SmtpEvent::StateChanged`](crate::SmtpEvent::StateChanged), which fires
/// only when the value actually changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection to a server.
    #[default]
    Disconnected,
    /// TCP connection (and, for implicit TLS, the handshake) in progress.
    Connecting,
    /// Connected and between operations.
    Connected,
    /// STARTTLS issued, waiting for the server's go-ahead or the handshake.
    TlsRequested,
    /// AUTH exchange in progress.
    Authenticating,
    /// A mail, BURL, or raw command exchange in progress.
    Sending,
    /// QUIT issued, waiting for the transport to close.
    Disconnecting,
}

impl SessionState {
    /// Returns true if a transport is established.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_disconnected() {
        assert_eq!(SessionState::default(), SessionState::Disconnected);
    }

    #[test]
    fn is_connected() {
        assert!(!SessionState::Disconnected.is_connected());
        assert!(!SessionState::Connecting.is_connected());
        assert!(SessionState::Connected.is_connected());
        assert!(SessionState::TlsRequested.is_connected());
        assert!(SessionState::Authenticating.is_connected());
        assert!(SessionState::Sending.is_connected());
        assert!(SessionState::Disconnecting.is_connected());
    }
}
