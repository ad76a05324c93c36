//! # mailferry-smtp
//!
//! An asynchronous client-side SMTP submission engine implementing
//! RFC 5321 message submission with STARTTLS (RFC 3207), authentication
//! (RFC 4954, PLAIN and LOGIN), and BURL remote-content submission
//! (RFC 4468).
//!
//! ## Features
//!
//! - **Request-queue interface**: callers enqueue high-level operations
//!   (connect, STARTTLS, authenticate, send mail, send BURL, raw command,
//!   disconnect) and receive asynchronous [`SmtpEvent`] notifications about
//!   progress, completion, errors, and wire-level I/O
//! - **Transparent transport upgrade**: plaintext sessions switch to TLS in
//!   place after a STARTTLS go-ahead; implicit TLS (port 465) is supported
//!   from the first byte
//! - **Real-world dialog handling**: EHLO falling back to HELO, delayed TLS
//!   handshakes restarting capability discovery, one- and two-round AUTH
//!   exchanges, DATA's two-phase commit, and BURL's distinct success path
//! - **TLS via rustls**: no OpenSSL dependency
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailferry_smtp::{AuthMode, SmtpClient, SmtpEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (client, mut events) = SmtpClient::spawn();
//!
//!     client.connect_to_host("mail.example.com", 587);
//!     client.start_tls();
//!     client.authenticate("user@example.com", "password", AuthMode::Any);
//!     client.send_mail(
//!         "user@example.com",
//!         ["friend@example.net"],
//!         &b"Subject: Hi\r\n\r\nHello!\r\n"[..],
//!     );
//!     client.disconnect_from_host();
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SmtpEvent::CommandFinished { id, error } => {
//!                 println!("operation {id}: error={error}");
//!             }
//!             SmtpEvent::Done(clean) => {
//!                 println!("session over (clean={clean})");
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Disconnected ── connect_to_host[_encrypted]() ──→ Connecting
//!       ▲                                               │
//!       │                                               ▼
//!       │                                           Connected
//!       │                 ┌───────────────┬────────────┼──────────────┐
//!       │                 ▼               ▼            ▼              ▼
//!       │           TlsRequested    Authenticating   Sending    Disconnecting
//!       │                 │               │            │              │
//!       │                 └───────────────┴────────────┘              │
//!       │                        (back to Connected)                  │
//!       └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations run strictly in enqueue order; within an operation, the
//! engine advances a per-operation stage machine on every server reply
//! group. The framer accepts CR, LF, or CRLF line endings and aggregates
//! multi-line replies before the driver sees them.
//!
//! ## Modules
//!
//! - [`connection`]: transport handling and the engine itself
//! - [`parser`]: incremental reply framer
//! - [`types`]: core SMTP types (replies, capabilities, session state)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod connection;
mod error;
mod events;
pub mod parser;
mod queue;
pub mod types;

pub use connection::SmtpClient;
pub use error::{Error, Result};
pub use events::SmtpEvent;
pub use parser::ReplyParser;
pub use queue::CommandId;
pub use types::{
    parse_ehlo, AuthMechanism, AuthMode, Capability, CapabilitySet, EhloInfo, Reply, ReplyCode,
    SessionState,
};
