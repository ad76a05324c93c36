//! Error types for the SMTP engine.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the SMTP engine internals.
///
/// Most protocol-level failures are reported through
/// [`SmtpEvent`](crate::SmtpEvent) notifications rather than `Err` values;
/// this type covers transport setup and framing faults.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Hostname is not usable as a TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Protocol violation or an operation issued against the wrong
    /// transport state.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
