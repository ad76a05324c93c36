//! Operation records and the command FIFO.
//!
//! Callers enqueue high-level operations; the dialog driver is the only
//! dequeuer. The head of the queue is the only operation the driver ever
//! interacts with, and an operation is dequeued exactly once, at the moment
//! it completes.

use std::collections::VecDeque;

use crate::types::AuthMode;

/// Identifier assigned to an enqueued operation.
///
/// Identifiers are monotonic within an engine instance and are echoed back
/// in [`CommandStarted`](crate::SmtpEvent::CommandStarted) and
/// [`CommandFinished`](crate::SmtpEvent::CommandFinished) events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    /// Creates an identifier from a raw counter value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A high-level operation request with its kind-specific payload.
#[derive(Debug, Clone)]
pub(crate) enum Command {
    /// Open a connection, optionally with TLS from the first byte.
    Connect {
        host: String,
        port: u16,
        implicit_tls: bool,
    },
    /// Send QUIT and close the transport.
    Disconnect,
    /// Upgrade the current plaintext connection with STARTTLS.
    StartTls,
    /// Authenticate with AUTH PLAIN or AUTH LOGIN.
    Authenticate {
        username: String,
        password: String,
        mode: AuthMode,
    },
    /// Submit a message inline through DATA.
    Mail {
        from: String,
        recipients: VecDeque<String>,
        body: Vec<u8>,
    },
    /// Submit a message by IMAP URL reference through BURL.
    MailBurl {
        from: String,
        recipients: VecDeque<String>,
        url: String,
    },
    /// Write a caller-supplied line verbatim.
    Raw { line: String },
}

/// Fieldless mirror of [`Command`], used as the first element of the
/// driver's `(kind, stage, code)` decision key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Connect,
    Disconnect,
    StartTls,
    Authenticate,
    Mail,
    MailBurl,
    Raw,
}

impl Command {
    pub(crate) fn kind(&self) -> CommandKind {
        match self {
            Self::Connect { .. } => CommandKind::Connect,
            Self::Disconnect => CommandKind::Disconnect,
            Self::StartTls => CommandKind::StartTls,
            Self::Authenticate { .. } => CommandKind::Authenticate,
            Self::Mail { .. } => CommandKind::Mail,
            Self::MailBurl { .. } => CommandKind::MailBurl,
            Self::Raw { .. } => CommandKind::Raw,
        }
    }
}

/// An enqueued operation.
///
/// `stage` tracks progress inside the operation's sub-state machine; it
/// disambiguates reply codes that mean different things at different points
/// (250 after EHLO vs 250 after MAIL FROM). Operations that are not at the
/// head of the queue always have `stage == 0`.
#[derive(Debug, Clone)]
pub(crate) struct Operation {
    pub id: CommandId,
    pub command: Command,
    pub stage: u8,
}

impl Operation {
    pub(crate) fn new(id: CommandId, command: Command) -> Self {
        Self {
            id,
            command,
            stage: 0,
        }
    }
}

/// FIFO of pending operations.
#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    items: VecDeque<Operation>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(&mut self, operation: Operation) {
        self.items.push_back(operation);
    }

    pub(crate) fn head(&self) -> Option<&Operation> {
        self.items.front()
    }

    pub(crate) fn head_mut(&mut self) -> Option<&mut Operation> {
        self.items.front_mut()
    }

    pub(crate) fn dequeue(&mut self) -> Option<Operation> {
        self.items.pop_front()
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: u64) -> Operation {
        Operation::new(CommandId::new(id), Command::Disconnect)
    }

    #[test]
    fn fifo_order() {
        let mut queue = CommandQueue::new();
        queue.enqueue(op(1));
        queue.enqueue(op(2));
        queue.enqueue(op(3));

        assert_eq!(queue.head().map(|o| o.id.get()), Some(1));
        assert_eq!(queue.dequeue().map(|o| o.id.get()), Some(1));
        assert_eq!(queue.dequeue().map(|o| o.id.get()), Some(2));
        assert_eq!(queue.dequeue().map(|o| o.id.get()), Some(3));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn head_mut_advances_stage() {
        let mut queue = CommandQueue::new();
        queue.enqueue(op(1));
        queue.head_mut().expect("head").stage = 2;
        assert_eq!(queue.head().expect("head").stage, 2);
    }

    #[test]
    fn clear_discards_everything() {
        let mut queue = CommandQueue::new();
        queue.enqueue(op(1));
        queue.enqueue(op(2));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn new_operations_start_at_stage_zero() {
        let operation = Operation::new(
            CommandId::new(7),
            Command::Raw {
                line: "NOOP".to_string(),
            },
        );
        assert_eq!(operation.stage, 0);
        assert_eq!(operation.command.kind(), CommandKind::Raw);
    }
}
