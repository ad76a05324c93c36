//! Caller-facing handle for the SMTP engine.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::driver::{Driver, Request, Shared};
use crate::events::SmtpEvent;
use crate::queue::{Command, CommandId, Operation};
use crate::types::{AuthMechanism, AuthMode, CapabilitySet, SessionState};

/// Handle to a running SMTP engine.
///
/// Every operation method enqueues a request and returns its
/// [`CommandId`] immediately; the engine works through the queue strictly
/// in order and reports progress through [`SmtpEvent`] notifications.
/// Enqueueing from inside an event-handling loop is fine; requests never
/// re-enter the engine synchronously.
///
/// Dropping the handle (and the event receiver) shuts the engine task
/// down.
#[derive(Debug)]
pub struct SmtpClient {
    requests: mpsc::UnboundedSender<Request>,
    shared: Arc<Mutex<Shared>>,
    last_id: AtomicU64,
}

impl SmtpClient {
    /// Starts an engine task on the current tokio runtime.
    ///
    /// Returns the handle and the stream of [`SmtpEvent`] notifications.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn spawn() -> (Self, mpsc::UnboundedReceiver<SmtpEvent>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));

        tokio::spawn(Driver::new(request_rx, event_tx, shared.clone()).run());

        (
            Self {
                requests: request_tx,
                shared,
                last_id: AtomicU64::new(0),
            },
            event_rx,
        )
    }

    // === operations ===

    /// Connects to `host` in the clear. A `port` of 0 selects 25.
    pub fn connect_to_host(&self, host: impl Into<String>, port: u16) -> CommandId {
        self.enqueue(Command::Connect {
            host: host.into(),
            port,
            implicit_tls: false,
        })
    }

    /// Connects to `host` with TLS from the first byte (SMTPS). A `port`
    /// of 0 selects 465.
    pub fn connect_to_host_encrypted(&self, host: impl Into<String>, port: u16) -> CommandId {
        self.enqueue(Command::Connect {
            host: host.into(),
            port,
            implicit_tls: true,
        })
    }

    /// Upgrades the current plaintext session with STARTTLS, then runs a
    /// fresh EHLO.
    pub fn start_tls(&self) -> CommandId {
        self.enqueue(Command::StartTls)
    }

    /// Authenticates with AUTH PLAIN or AUTH LOGIN.
    ///
    /// [`AuthMode::Any`] picks PLAIN when advertised, then LOGIN; the
    /// operation fails if neither is available.
    pub fn authenticate(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
        mode: AuthMode,
    ) -> CommandId {
        self.enqueue(Command::Authenticate {
            username: username.into(),
            password: password.into(),
            mode,
        })
    }

    /// Submits a message inline through DATA.
    ///
    /// The body is written as given, terminated with `CRLF.CRLF`; the
    /// caller is responsible for dot-stuffing.
    pub fn send_mail<I, R>(&self, from: impl Into<String>, recipients: I, body: impl Into<Vec<u8>>) -> CommandId
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.enqueue(Command::Mail {
            from: from.into(),
            recipients: collect_recipients(recipients),
            body: body.into(),
        })
    }

    /// Submits a message stored on an IMAP server through `BURL <url>
    /// LAST` (RFC 4468), skipping the DATA phase.
    ///
    /// The server must advertise the BURL capability; the engine does not
    /// pre-check.
    pub fn send_mail_burl<I, R>(&self, from: impl Into<String>, recipients: I, url: impl Into<String>) -> CommandId
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.enqueue(Command::MailBurl {
            from: from.into(),
            recipients: collect_recipients(recipients),
            url: url.into(),
        })
    }

    /// Writes a caller-supplied command line verbatim (CRLF appended when
    /// missing) and completes on the next reply group, whatever its code.
    ///
    /// The reply is delivered as [`SmtpEvent::RawReply`].
    pub fn raw_command(&self, line: impl Into<String>) -> CommandId {
        self.enqueue(Command::Raw { line: line.into() })
    }

    /// Sends QUIT and closes the transport.
    pub fn disconnect_from_host(&self) -> CommandId {
        self.enqueue(Command::Disconnect)
    }

    // === configuration ===

    /// Sets the hostname announced in EHLO/HELO. Defaults to
    /// `"localhost"`.
    pub fn set_local_name(&self, name: impl Into<String>) {
        self.request(Request::SetLocalName(name.into()));
    }

    /// Sets the hostname announced in EHLO/HELO on encrypted sessions.
    /// When empty, [`set_local_name`](Self::set_local_name) applies.
    pub fn set_local_name_encrypted(&self, name: impl Into<String>) {
        self.request(Request::SetLocalNameEncrypted(name.into()));
    }

    /// Accepts any server certificate on subsequent TLS handshakes.
    pub fn ignore_tls_errors(&self) {
        self.request(Request::IgnoreTlsErrors);
    }

    // === accessors ===

    /// Returns the current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock_shared().state
    }

    /// Returns the capabilities advertised by the last EHLO.
    #[must_use]
    pub fn options(&self) -> CapabilitySet {
        self.lock_shared().options.clone()
    }

    /// Returns the authentication mechanisms advertised by the last EHLO.
    #[must_use]
    pub fn supported_auth_modes(&self) -> HashSet<AuthMechanism> {
        self.lock_shared().auth_modes.clone()
    }

    /// Returns the text of the last failing reply, or an empty string.
    #[must_use]
    pub fn error_string(&self) -> String {
        self.lock_shared().error_string.clone()
    }

    // === plumbing ===

    fn enqueue(&self, command: Command) -> CommandId {
        let id = CommandId::new(self.last_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.request(Request::Enqueue(Operation::new(id, command)));
        id
    }

    fn request(&self, request: Request) {
        // a closed channel means the engine task is gone; the event stream
        // already reported the teardown
        let _ = self.requests.send(request);
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn collect_recipients<I, R>(recipients: I) -> VecDeque<String>
where
    I: IntoIterator<Item = R>,
    R: Into<String>,
{
    recipients.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_monotonic() {
        let (client, _events) = SmtpClient::spawn();
        let first = client.raw_command("NOOP");
        let second = client.raw_command("NOOP");
        let third = client.disconnect_from_host();
        assert!(first < second);
        assert!(second < third);
        assert_eq!(first.get(), 1);
    }

    #[tokio::test]
    async fn fresh_engine_is_disconnected_and_empty() {
        let (client, _events) = SmtpClient::spawn();
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(client.options().is_empty());
        assert!(client.supported_auth_modes().is_empty());
        assert_eq!(client.error_string(), "");
    }
}
