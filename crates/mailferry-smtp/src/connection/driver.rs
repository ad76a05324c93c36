//! The SMTP dialog driver.
//!
//! The driver owns the transport, the reply framer, and the operation
//! queue, and runs as a single task: callers talk to it through the
//! [`SmtpClient`](crate::SmtpClient) handle, and it talks back through
//! [`SmtpEvent`](crate::SmtpEvent) notifications. Being the only task that
//! touches the socket and the queue gives the cooperative, non-reentrant
//! scheduling the protocol needs: writing a command and consuming its reply
//! never interleave with another operation's transitions.
//!
//! Replies are dispatched on the composite key `(kind, stage, code)`, where
//! `stage` is the head operation's progress counter. A single network read
//! may carry replies for several pipelined commands; they are processed in
//! order against the head operation without reading in between.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::BytesMut;
use tokio::sync::mpsc;

use super::stream::{self, SmtpStream};
use crate::error::{Error, Result};
use crate::events::SmtpEvent;
use crate::parser::ReplyParser;
use crate::queue::{Command, CommandKind, CommandQueue, Operation};
use crate::types::{parse_ehlo, AuthMechanism, AuthMode, CapabilitySet, Reply, SessionState};

/// Default port for plaintext/STARTTLS submission.
pub(crate) const DEFAULT_PORT: u16 = 25;
/// Default port for implicit TLS (SMTPS).
pub(crate) const DEFAULT_TLS_PORT: u16 = 465;

/// Bounded wait for queued bytes to drain before QUIT closes the socket.
const QUIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// State the driver shares with the caller-facing handle.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub state: SessionState,
    pub options: CapabilitySet,
    pub auth_modes: HashSet<AuthMechanism>,
    pub error_string: String,
}

/// Messages from the handle to the driver.
#[derive(Debug)]
pub(crate) enum Request {
    Enqueue(Operation),
    SetLocalName(String),
    SetLocalNameEncrypted(String),
    IgnoreTlsErrors,
}

/// Outcome of dispatching the head operation.
enum Dispatch {
    /// A command went out; wait for the server's reply.
    AwaitReply,
    /// The operation failed before touching the wire; its completion
    /// events were already emitted.
    FailedSynchronously,
    /// A requested disconnect ran to completion.
    SessionClosed,
    /// The transport failed and the session was torn down.
    TornDown,
}

pub(crate) struct Driver {
    requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<SmtpEvent>,
    shared: Arc<Mutex<Shared>>,
    transport: SmtpStream,
    parser: ReplyParser,
    read_buf: BytesMut,
    queue: CommandQueue,
    in_progress: bool,
    local_name: String,
    local_name_encrypted: String,
    server_name: String,
    accept_invalid_certs: bool,
}

impl Driver {
    pub(crate) fn new(
        requests: mpsc::UnboundedReceiver<Request>,
        events: mpsc::UnboundedSender<SmtpEvent>,
        shared: Arc<Mutex<Shared>>,
    ) -> Self {
        Self {
            requests,
            events,
            shared,
            transport: SmtpStream::None,
            parser: ReplyParser::new(),
            read_buf: BytesMut::with_capacity(4096),
            queue: CommandQueue::new(),
            in_progress: false,
            local_name: "localhost".to_string(),
            local_name_encrypted: String::new(),
            server_name: String::new(),
            accept_invalid_certs: false,
        }
    }

    /// Runs the driver until every handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            if self.transport.is_open() {
                tokio::select! {
                    request = self.requests.recv() => match request {
                        Some(request) => self.handle_request(request).await,
                        None => break,
                    },
                    read = self.transport.read_some(&mut self.read_buf) => {
                        self.on_read(read).await;
                    }
                }
            } else {
                match self.requests.recv().await {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                }
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Enqueue(operation) => self.submit(operation).await,
            Request::SetLocalName(name) => self.local_name = name,
            Request::SetLocalNameEncrypted(name) => self.local_name_encrypted = name,
            Request::IgnoreTlsErrors => self.accept_invalid_certs = true,
        }
    }

    /// Appends an operation and, when the driver is idle, dispatches it.
    async fn submit(&mut self, operation: Operation) {
        self.queue.enqueue(operation);
        if !self.in_progress {
            self.dispatch_pending().await;
        }
    }

    // === transport input ===

    async fn on_read(&mut self, read: io::Result<usize>) {
        match read {
            Ok(0) => self.on_disconnected(),
            Ok(_) => {
                let batch = self.read_buf.split().to_vec();
                self.emit(SmtpEvent::Received(batch.clone()));
                for reply in self.parser.feed(&batch) {
                    if let Err(error) = self.handle_reply(reply).await {
                        self.socket_failure(&error);
                        return;
                    }
                    if !self.transport.is_open() {
                        // the session was torn down mid-batch
                        return;
                    }
                }
            }
            Err(error) => self.socket_failure(&Error::Io(error)),
        }
    }

    /// Advances the head operation's sub-state machine by one reply group.
    async fn handle_reply(&mut self, reply: Reply) -> Result<()> {
        let Some((kind, stage)) = self
            .queue
            .head()
            .filter(|_| self.in_progress)
            .map(|op| (op.command.kind(), op.stage))
        else {
            tracing::warn!(
                code = reply.code.as_u16(),
                "dropping reply with no operation in progress"
            );
            return Ok(());
        };

        let code = reply.code.as_u16();
        match kind {
            CommandKind::Connect => self.reply_connect(stage, code, &reply).await,
            CommandKind::StartTls => self.reply_start_tls(stage, code, &reply).await,
            CommandKind::Authenticate => self.reply_authenticate(stage, code, &reply).await,
            CommandKind::Mail | CommandKind::MailBurl => {
                self.reply_mail(kind, stage, code, &reply).await
            }
            CommandKind::Raw => self.reply_raw(code, &reply).await,
            // the 221 answering QUIT needs no action; the close is already
            // under way
            CommandKind::Disconnect => Ok(()),
        }
    }

    // === per-operation reply handling ===

    async fn reply_connect(&mut self, stage: u8, code: u16, reply: &Reply) -> Result<()> {
        match (stage, code) {
            // banner received, greet with EHLO
            (0, 220) => self.send_ehlo().await,
            // EHLO answered, capabilities follow
            (1, 250) => {
                self.apply_ehlo(reply);
                self.clear_error();
                self.set_state(SessionState::Connected);
                self.complete_ok().await;
                Ok(())
            }
            // EHLO rejected, fall back to HELO
            (1, 421 | 501 | 502 | 554) => {
                self.set_error(reply.message_text());
                self.send_helo().await?;
                self.set_stage(2);
                Ok(())
            }
            // HELO answered (no capabilities)
            (2, 250) => {
                self.clear_error();
                self.set_state(SessionState::Connected);
                self.complete_ok().await;
                Ok(())
            }
            (0, _) => {
                tracing::debug!(code, "unexpected reply while awaiting the banner");
                Ok(())
            }
            _ => {
                self.set_error(reply.message_text());
                self.complete_failed().await;
                Ok(())
            }
        }
    }

    async fn reply_start_tls(&mut self, stage: u8, code: u16, reply: &Reply) -> Result<()> {
        match (stage, code) {
            // the server invited us to negotiate; stop reading until the
            // handshake is done
            (0, 220) => {
                self.emit(SmtpEvent::Sent(b"*** startClientEncryption".to_vec()));
                let transport = std::mem::replace(&mut self.transport, SmtpStream::None);
                match transport
                    .upgrade_to_tls(&self.server_name, self.accept_invalid_certs)
                    .await
                {
                    Ok(upgraded) => {
                        self.transport = upgraded;
                        self.send_ehlo().await
                    }
                    Err(error) => {
                        self.emit(SmtpEvent::TlsErrors(vec![error.to_string()]));
                        self.set_error("TLS failed");
                        self.on_disconnected();
                        Ok(())
                    }
                }
            }
            // encrypted, and the fresh EHLO was answered
            (1, 250) => {
                self.set_state(SessionState::Connected);
                self.apply_ehlo(reply);
                self.clear_error();
                self.emit(SmtpEvent::TlsStarted);
                self.complete_ok().await;
                Ok(())
            }
            _ => {
                // the transport stays open; the caller decides whether to
                // carry on in the clear or disconnect
                self.set_error("TLS failed");
                self.complete_session_failed().await;
                Ok(())
            }
        }
    }

    async fn reply_authenticate(&mut self, stage: u8, code: u16, reply: &Reply) -> Result<()> {
        let (username, password, mode) = match self.queue.head().map(|op| &op.command) {
            Some(Command::Authenticate {
                username,
                password,
                mode,
            }) => (username.clone(), password.clone(), *mode),
            _ => return Ok(()),
        };

        match (stage, code) {
            (_, 235) => {
                self.clear_error();
                self.emit(SmtpEvent::Authenticated);
                self.set_state(SessionState::Connected);
                self.complete_ok().await;
                Ok(())
            }
            // first challenge
            (0, 334) => {
                self.clear_error();
                match mode {
                    AuthMode::Plain => self.send_auth_plain(&username, &password).await?,
                    AuthMode::Login => self.send_auth_login(&username, &password, 1).await?,
                    AuthMode::Any => {
                        // the mode is made concrete at dispatch
                        self.set_error(reply.message_text());
                        self.set_state(SessionState::Connected);
                        self.complete_failed().await;
                        return Ok(());
                    }
                }
                self.set_stage(1);
                Ok(())
            }
            // second challenge
            (1, 334) => {
                if mode == AuthMode::Login {
                    self.clear_error();
                    self.send_auth_login(&username, &password, 2).await?;
                    self.set_stage(2);
                } else {
                    // PLAIN answered everything already; a second challenge
                    // means this attempt is over
                    self.set_error(reply.message_text());
                    self.set_state(SessionState::Connected);
                    self.complete_failed().await;
                }
                Ok(())
            }
            (2, 334) => {
                self.set_error(reply.message_text());
                self.set_state(SessionState::Connected);
                self.complete_failed().await;
                Ok(())
            }
            // 535 and friends
            _ => {
                self.set_error(reply.message_text());
                self.set_state(SessionState::Connected);
                self.complete_session_failed().await;
                Ok(())
            }
        }
    }

    async fn reply_mail(
        &mut self,
        kind: CommandKind,
        stage: u8,
        code: u16,
        reply: &Reply,
    ) -> Result<()> {
        match (stage, code) {
            // sender (or a recipient) accepted, keep the RCPT loop going
            (0, 250) => {
                self.clear_error();
                self.send_next_rcpt().await
            }
            // temporary envelope failure (greylisting, most likely)
            (0, 421) => {
                self.set_error(reply.message_text());
                self.set_state(SessionState::Connected);
                self.complete_failed().await;
                Ok(())
            }
            // all recipients accepted
            (1, 250) => {
                self.clear_error();
                let data = match self.queue.head().map(|op| &op.command) {
                    Some(Command::MailBurl { url, .. }) => format!("BURL {url} LAST\r\n").into_bytes(),
                    _ => b"DATA\r\n".to_vec(),
                };
                self.send(&data).await?;
                self.set_stage(2);
                Ok(())
            }
            // BURL submission accepted
            (2, 250) if kind == CommandKind::MailBurl => {
                self.clear_error();
                self.set_state(SessionState::Connected);
                self.complete_ok().await;
                Ok(())
            }
            // DATA accepted, ship the body
            (2, 354) if kind == CommandKind::Mail => {
                self.clear_error();
                let mut payload = match self.queue.head_mut().map(|op| &mut op.command) {
                    Some(Command::Mail { body, .. }) => std::mem::take(body),
                    _ => Vec::new(),
                };
                // the caller supplies a dot-stuffed body
                payload.extend_from_slice(b"\r\n.\r\n");
                self.send(&payload).await?;
                self.set_stage(3);
                Ok(())
            }
            // message queued
            (3, 250) => {
                self.clear_error();
                self.set_state(SessionState::Connected);
                self.complete_ok().await;
                Ok(())
            }
            _ => {
                self.set_error(reply.message_text());
                self.set_state(SessionState::Connected);
                self.complete_session_failed().await;
                Ok(())
            }
        }
    }

    async fn reply_raw(&mut self, code: u16, reply: &Reply) -> Result<()> {
        self.emit(SmtpEvent::RawReply {
            code,
            text: reply.message_text(),
        });
        self.set_state(SessionState::Connected);
        self.complete_ok().await;
        Ok(())
    }

    // === dispatch ===

    /// Starts head operations until one is waiting on the server or the
    /// queue drains.
    async fn dispatch_pending(&mut self) {
        loop {
            let Some(head) = self.queue.head() else {
                self.in_progress = false;
                self.emit(SmtpEvent::Done(false));
                return;
            };
            let id = head.id;
            self.in_progress = true;
            self.emit(SmtpEvent::CommandStarted { id });

            match self.dispatch_head().await {
                Dispatch::AwaitReply | Dispatch::TornDown => return,
                Dispatch::FailedSynchronously => {
                    if self.queue.is_empty() {
                        self.in_progress = false;
                        return;
                    }
                }
                Dispatch::SessionClosed => {
                    if self.queue.is_empty() {
                        self.in_progress = false;
                        return;
                    }
                }
            }
        }
    }

    async fn dispatch_head(&mut self) -> Dispatch {
        let Some(kind) = self.queue.head().map(|op| op.command.kind()) else {
            return Dispatch::AwaitReply;
        };
        match kind {
            CommandKind::Connect => self.dispatch_connect().await,
            CommandKind::Disconnect => self.dispatch_disconnect().await,
            CommandKind::StartTls => self.dispatch_start_tls().await,
            CommandKind::Authenticate => self.dispatch_authenticate().await,
            CommandKind::Mail | CommandKind::MailBurl => self.dispatch_mail().await,
            CommandKind::Raw => self.dispatch_raw().await,
        }
    }

    async fn dispatch_connect(&mut self) -> Dispatch {
        let Some(Command::Connect {
            host,
            port,
            implicit_tls,
        }) = self.queue.head().map(|op| op.command.clone())
        else {
            return Dispatch::AwaitReply;
        };
        let port = match (port, implicit_tls) {
            (0, false) => DEFAULT_PORT,
            (0, true) => DEFAULT_TLS_PORT,
            (port, _) => port,
        };

        self.server_name.clone_from(&host);
        self.set_state(SessionState::Connecting);

        #[cfg(test)]
        if self.transport.is_open() {
            // a scripted stream is already installed
            self.on_connected();
            return Dispatch::AwaitReply;
        }

        let label = if implicit_tls {
            "*** connectToHostEncrypted: "
        } else {
            "*** connectToHost: "
        };
        self.emit(SmtpEvent::Sent(format!("{label}{host}:{port}").into_bytes()));

        let connected = if implicit_tls {
            stream::connect_tls(&host, port, self.accept_invalid_certs).await
        } else {
            stream::connect(&host, port).await
        };
        match connected {
            Ok(transport) => {
                self.transport = transport;
                self.parser.reset();
                self.read_buf.clear();
                self.on_connected();
                Dispatch::AwaitReply
            }
            Err(error) => {
                self.socket_failure(&error);
                Dispatch::TornDown
            }
        }
    }

    async fn dispatch_disconnect(&mut self) -> Dispatch {
        if let Err(error) = self.send(b"QUIT\r\n").await {
            tracing::debug!(%error, "QUIT write failed; closing anyway");
        }
        self.set_state(SessionState::Disconnecting);
        let _ = tokio::time::timeout(QUIT_FLUSH_TIMEOUT, self.transport.shutdown()).await;
        self.on_disconnected();
        Dispatch::SessionClosed
    }

    async fn dispatch_start_tls(&mut self) -> Dispatch {
        if let Err(error) = self.send(b"STARTTLS\r\n").await {
            self.socket_failure(&error);
            return Dispatch::TornDown;
        }
        self.set_state(SessionState::TlsRequested);
        Dispatch::AwaitReply
    }

    async fn dispatch_authenticate(&mut self) -> Dispatch {
        let requested = match self.queue.head().map(|op| &op.command) {
            Some(Command::Authenticate { mode, .. }) => *mode,
            _ => return Dispatch::AwaitReply,
        };
        let resolved = match requested {
            AuthMode::Plain => Some(AuthMechanism::Plain),
            AuthMode::Login => Some(AuthMechanism::Login),
            AuthMode::Any => {
                let shared = self.lock_shared();
                if shared.auth_modes.contains(&AuthMechanism::Plain) {
                    Some(AuthMechanism::Plain)
                } else if shared.auth_modes.contains(&AuthMechanism::Login) {
                    Some(AuthMechanism::Login)
                } else {
                    None
                }
            }
        };
        let Some(mechanism) = resolved else {
            self.set_error("Unsupported or unknown authentication scheme");
            self.fail_dispatch();
            return Dispatch::FailedSynchronously;
        };

        // pin the concrete choice so the challenge rounds know what to send
        if let Some(Command::Authenticate { mode, .. }) =
            self.queue.head_mut().map(|op| &mut op.command)
        {
            *mode = match mechanism {
                AuthMechanism::Plain => AuthMode::Plain,
                AuthMechanism::Login => AuthMode::Login,
            };
        }

        let verb: &[u8] = match mechanism {
            AuthMechanism::Plain => b"AUTH PLAIN\r\n",
            AuthMechanism::Login => b"AUTH LOGIN\r\n",
        };
        if let Err(error) = self.send(verb).await {
            self.socket_failure(&error);
            return Dispatch::TornDown;
        }
        self.set_state(SessionState::Authenticating);
        Dispatch::AwaitReply
    }

    async fn dispatch_mail(&mut self) -> Dispatch {
        let (from, has_recipients) = match self.queue.head().map(|op| &op.command) {
            Some(
                Command::Mail {
                    from, recipients, ..
                }
                | Command::MailBurl {
                    from, recipients, ..
                },
            ) => (from.clone(), !recipients.is_empty()),
            _ => return Dispatch::AwaitReply,
        };
        if !has_recipients {
            self.set_error("No recipients specified");
            self.fail_dispatch();
            return Dispatch::FailedSynchronously;
        }

        self.set_state(SessionState::Sending);
        let buf = format!("MAIL FROM:<{from}>\r\n");
        if let Err(error) = self.send(buf.as_bytes()).await {
            self.socket_failure(&error);
            return Dispatch::TornDown;
        }
        Dispatch::AwaitReply
    }

    async fn dispatch_raw(&mut self) -> Dispatch {
        let mut line = match self.queue.head().map(|op| &op.command) {
            Some(Command::Raw { line }) => line.clone(),
            _ => return Dispatch::AwaitReply,
        };
        if !line.ends_with("\r\n") {
            line.push_str("\r\n");
        }
        self.set_state(SessionState::Sending);
        if let Err(error) = self.send(line.as_bytes()).await {
            self.socket_failure(&error);
            return Dispatch::TornDown;
        }
        Dispatch::AwaitReply
    }

    /// Completes a head operation that failed at dispatch, before touching
    /// the wire.
    fn fail_dispatch(&mut self) {
        if let Some(operation) = self.queue.dequeue() {
            self.emit(SmtpEvent::CommandFinished {
                id: operation.id,
                error: true,
            });
        }
        self.emit(SmtpEvent::Done(false));
    }

    // === completion funnel ===

    /// Every operation completion goes through here: exactly one
    /// `CommandFinished` per operation, then the next operation starts.
    async fn finish_current(&mut self, error: bool, session_failed: bool) {
        if let Some(operation) = self.queue.dequeue() {
            self.emit(SmtpEvent::CommandFinished {
                id: operation.id,
                error,
            });
        }
        if session_failed {
            self.emit(SmtpEvent::Done(false));
            if self.queue.is_empty() {
                self.in_progress = false;
                return;
            }
        }
        self.dispatch_pending().await;
    }

    async fn complete_ok(&mut self) {
        self.finish_current(false, false).await;
    }

    async fn complete_failed(&mut self) {
        self.finish_current(true, false).await;
    }

    async fn complete_session_failed(&mut self) {
        self.finish_current(true, true).await;
    }

    // === transport lifecycle ===

    fn on_connected(&mut self) {
        {
            let mut shared = self.lock_shared();
            shared.options.clear();
            shared.auth_modes.clear();
        }
        self.set_state(SessionState::Connected);
        // stage stays 0: the banner has not arrived yet
    }

    /// Handles the transport going away, cleanly or not.
    fn on_disconnected(&mut self) {
        self.transport = SmtpStream::None;
        self.parser.reset();
        self.read_buf.clear();
        self.set_state(SessionState::Disconnected);

        if self.queue.is_empty() {
            self.in_progress = false;
            self.emit(SmtpEvent::Done(true));
            return;
        }

        let (id, kind) = match self.queue.head() {
            Some(op) => (op.id, op.command.kind()),
            None => return,
        };
        if kind == CommandKind::Disconnect {
            self.emit(SmtpEvent::CommandFinished { id, error: false });
            self.queue.dequeue();
            self.emit(SmtpEvent::Done(true));
            self.in_progress = false;
        } else {
            // pending operations are discarded with one aggregate failure
            self.emit(SmtpEvent::CommandFinished { id, error: true });
            self.queue.clear();
            self.in_progress = false;
            self.emit(SmtpEvent::Done(false));
        }
    }

    fn socket_failure(&mut self, error: &Error) {
        let kind = match error {
            Error::Io(io_error) => io_error.kind(),
            _ => io::ErrorKind::Other,
        };
        self.emit(SmtpEvent::SocketError {
            kind,
            message: error.to_string(),
        });
        self.on_disconnected();
    }

    // === command writers ===

    /// Logs and writes a command.
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.emit(SmtpEvent::Sent(bytes.to_vec()));
        self.transport.write_all(bytes).await
    }

    async fn send_ehlo(&mut self) -> Result<()> {
        {
            // each EHLO replaces the capability set wholesale
            let mut shared = self.lock_shared();
            shared.options.clear();
            shared.auth_modes.clear();
        }
        let domain = self.helo_domain();
        let buf = format!("EHLO {domain}\r\n");
        self.send(buf.as_bytes()).await?;
        self.set_stage(1);
        Ok(())
    }

    async fn send_helo(&mut self) -> Result<()> {
        let domain = self.helo_domain();
        let buf = format!("HELO {domain}\r\n");
        self.send(buf.as_bytes()).await
    }

    fn helo_domain(&self) -> String {
        if self.transport.is_encrypted() && !self.local_name_encrypted.is_empty() {
            self.local_name_encrypted.clone()
        } else {
            self.local_name.clone()
        }
    }

    async fn send_next_rcpt(&mut self) -> Result<()> {
        let (next, remaining) = match self.queue.head_mut().map(|op| &mut op.command) {
            Some(
                Command::Mail { recipients, .. } | Command::MailBurl { recipients, .. },
            ) => match recipients.pop_front() {
                Some(next) => (next, recipients.len()),
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
        let buf = format!("RCPT TO:<{next}>\r\n");
        self.send(buf.as_bytes()).await?;
        if remaining == 0 {
            self.set_stage(1);
        }
        Ok(())
    }

    async fn send_auth_plain(&mut self, username: &str, password: &str) -> Result<()> {
        let mut token = Vec::with_capacity(username.len() + password.len() + 2);
        token.push(0);
        token.extend_from_slice(username.as_bytes());
        token.push(0);
        token.extend_from_slice(password.as_bytes());
        let mut line = BASE64.encode(&token).into_bytes();
        line.extend_from_slice(b"\r\n");

        // never log the credentials themselves
        self.emit(SmtpEvent::Sent(
            format!("*** [sending authentication data: username '{username}']").into_bytes(),
        ));
        self.transport.write_all(&line).await
    }

    async fn send_auth_login(&mut self, username: &str, password: &str, round: u8) -> Result<()> {
        if round == 1 {
            let mut line = BASE64.encode(username.as_bytes()).into_bytes();
            line.extend_from_slice(b"\r\n");
            self.emit(SmtpEvent::Sent(line.clone()));
            self.transport.write_all(&line).await
        } else {
            let mut line = BASE64.encode(password.as_bytes()).into_bytes();
            line.extend_from_slice(b"\r\n");
            self.emit(SmtpEvent::Sent(b"*** [AUTH LOGIN password]".to_vec()));
            self.transport.write_all(&line).await
        }
    }

    // === bookkeeping ===

    fn apply_ehlo(&self, reply: &Reply) {
        let info = parse_ehlo(&reply.message);
        let mut shared = self.lock_shared();
        shared.options.extend(info.capabilities.iter());
        shared.auth_modes.extend(info.auth_mechanisms.iter().copied());
    }

    fn set_stage(&mut self, stage: u8) {
        if let Some(operation) = self.queue.head_mut() {
            operation.stage = stage;
        }
    }

    fn set_state(&self, new: SessionState) {
        let old = {
            let mut shared = self.lock_shared();
            let old = shared.state;
            shared.state = new;
            old
        };
        if old == new {
            return;
        }
        self.emit(SmtpEvent::StateChanged(new));
        if old == SessionState::Connecting && new == SessionState::Connected {
            self.emit(SmtpEvent::Connected);
        }
        if new == SessionState::Disconnected {
            self.emit(SmtpEvent::Disconnected);
        }
    }

    fn set_error(&self, text: impl Into<String>) {
        self.lock_shared().error_string = text.into();
    }

    fn clear_error(&self) {
        self.lock_shared().error_string.clear();
    }

    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SmtpEvent) {
        // the receiver may be gone during shutdown; nothing to do then
        let _ = self.events.send(event);
    }

    /// One read-and-process turn, used by the scripted-stream tests.
    #[cfg(test)]
    async fn pump(&mut self) {
        let read = self.transport.read_some(&mut self.read_buf).await;
        self.on_read(read).await;
    }
}
