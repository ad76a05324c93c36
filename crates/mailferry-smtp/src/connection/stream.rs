//! Low-level SMTP stream handling.
//!
//! The transport starts out as plain TCP or already-encrypted TLS and can
//! upgrade in place after a STARTTLS go-ahead. Read buffering lives in the
//! dialog driver, not here, so no buffered byte can be lost across the
//! upgrade; the driver stops reading between issuing STARTTLS and the
//! handshake completing.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// SMTP transport (plain TCP or TLS).
#[derive(Debug)]
pub(crate) enum SmtpStream {
    /// Nothing connected.
    None,
    /// Plain TCP connection.
    Tcp(TcpStream),
    /// TLS-encrypted connection.
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    /// Scripted stream for driver tests; `encrypted` flips on upgrade.
    #[cfg(test)]
    Mock {
        io: tokio_test::io::Mock,
        encrypted: bool,
    },
}

impl SmtpStream {
    /// Returns true if a connection is established.
    pub(crate) fn is_open(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns true if the transport is encrypted.
    pub(crate) fn is_encrypted(&self) -> bool {
        match self {
            Self::Tls(_) => true,
            Self::None | Self::Tcp(_) => false,
            #[cfg(test)]
            Self::Mock { encrypted, .. } => *encrypted,
        }
    }

    /// Reads whatever is available into `buf`, returning the byte count.
    /// Zero means the peer closed the connection.
    pub(crate) async fn read_some(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            Self::None => Ok(0),
            Self::Tcp(stream) => stream.read_buf(buf).await,
            Self::Tls(stream) => stream.read_buf(buf).await,
            #[cfg(test)]
            Self::Mock { io, .. } => io.read_buf(buf).await,
        }
    }

    /// Writes all of `data` and flushes.
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::None => return Err(Error::Protocol("transport is not connected".into())),
            Self::Tcp(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            #[cfg(test)]
            Self::Mock { io, .. } => {
                io.write_all(data).await?;
                io.flush().await?;
            }
        }
        Ok(())
    }

    /// Shuts down the write side, letting queued bytes drain.
    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Tcp(stream) => stream.shutdown().await,
            Self::Tls(stream) => stream.shutdown().await,
            #[cfg(test)]
            Self::Mock { io, .. } => io.shutdown().await,
        }
    }

    /// Upgrades a plain TCP stream to TLS after a STARTTLS go-ahead.
    pub(crate) async fn upgrade_to_tls(
        self,
        hostname: &str,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        match self {
            Self::Tcp(tcp) => {
                let connector = tls_connector(accept_invalid_certs);
                let server_name = ServerName::try_from(hostname.to_string())?;
                let tls = connector.connect(server_name, tcp).await?;
                Ok(Self::Tls(Box::new(tls)))
            }
            Self::Tls(_) => Err(Error::Protocol("transport is already encrypted".into())),
            Self::None => Err(Error::Protocol("transport is not connected".into())),
            #[cfg(test)]
            Self::Mock { io, .. } => Ok(Self::Mock {
                io,
                encrypted: true,
            }),
        }
    }
}

/// Connects to an SMTP server over plain TCP.
pub(crate) async fn connect(hostname: &str, port: u16) -> Result<SmtpStream> {
    let stream = TcpStream::connect((hostname, port)).await?;
    Ok(SmtpStream::Tcp(stream))
}

/// Connects to an SMTP server with TLS from the first byte (SMTPS).
pub(crate) async fn connect_tls(
    hostname: &str,
    port: u16,
    accept_invalid_certs: bool,
) -> Result<SmtpStream> {
    let tcp = TcpStream::connect((hostname, port)).await?;
    let connector = tls_connector(accept_invalid_certs);
    let server_name = ServerName::try_from(hostname.to_string())?;
    let tls = connector.connect(server_name, tcp).await?;
    Ok(SmtpStream::Tls(Box::new(tls)))
}

/// Builds a TLS connector, either verifying against the bundled web PKI
/// roots or accepting any certificate when the caller opted in.
fn tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    let config = if accept_invalid_certs {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth()
    } else {
        let root_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

/// Certificate verifier that accepts anything. Installed only after the
/// caller has explicitly suppressed TLS errors.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
