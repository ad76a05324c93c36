//! Engine event notifications.

use std::io;

use crate::queue::CommandId;
use crate::types::SessionState;

/// Asynchronous notification emitted by the engine.
///
/// Events are delivered over the channel returned by
/// [`SmtpClient::spawn`](crate::SmtpClient::spawn), strictly in the order
/// the engine produced them. Delivery is fire-and-forget; event handling
/// can never re-enter the engine's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpEvent {
    /// The session state changed. Fires only on actual transitions.
    StateChanged(SessionState),
    /// The transport reported an established connection.
    Connected,
    /// The transport closed.
    Disconnected,
    /// A STARTTLS upgrade completed and the post-handshake EHLO succeeded.
    TlsStarted,
    /// An AUTH exchange succeeded.
    Authenticated,
    /// The operation with this id was dispatched.
    CommandStarted {
        /// Identifier returned when the operation was enqueued.
        id: CommandId,
    },
    /// The operation with this id completed.
    CommandFinished {
        /// Identifier returned when the operation was enqueued.
        id: CommandId,
        /// True when the operation failed; details in
        /// [`error_string`](crate::SmtpClient::error_string).
        error: bool,
    },
    /// The queue drained or the session ended.
    ///
    /// The flag is `true` when the transport closed cleanly (a requested
    /// disconnect, or the server closing an idle session); it is `false`
    /// when the engine went idle with the session still up, and on session
    /// failures (TLS, authentication, submission, teardown after a
    /// transport error).
    Done(bool),
    /// Reply to a [`raw_command`](crate::SmtpClient::raw_command).
    RawReply {
        /// Three-digit reply code.
        code: u16,
        /// Newline-joined reply text.
        text: String,
    },
    /// TLS-level failures during a handshake.
    TlsErrors(Vec<String>),
    /// The socket reported an error; a teardown follows.
    SocketError {
        /// Classification of the failure.
        kind: io::ErrorKind,
        /// Human-readable description.
        message: String,
    },
    /// Bytes (or a redacted placeholder) written to the wire.
    Sent(Vec<u8>),
    /// Raw bytes read from the wire.
    Received(Vec<u8>),
}
