//! TLS session driver.
//!
//! `TlsSession` owns the lifecycle of one encrypted mail connection:
//! handshake (implicit TLS or STARTTLS upgrade), interactive trust
//! establishment over the presented chain, encrypted reads and writes, and
//! orderly shutdown. A chain the user rejects tears the TLS session down
//! before any application byte is written.
//!
//! The session moves through `Closed → Handshaking → Verifying → Open →
//! Closed`. The two middle phases exist only inside [`TlsSession::connect`]
//! and [`TlsSession::upgrade`]: no session value is observable while they
//! run, and a failure in either returns the error with nothing retained, so
//! [`SessionState`] models just the two resting states.

use std::io;
use std::sync::Arc;

use mailvet_trust::{
    Certificate, ChainResolver, PromptUi, TrustStore, VerifyPolicy,
};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;
use crate::engine::{build_client_config, client_identity, suite_name, WebPkiEngine};
use crate::stream::MailStream;
use crate::{Error, Result};

/// Where the session currently is.
enum SessionState {
    /// No connection, or the connection was torn down.
    Closed,
    /// Negotiated, verified, and carrying application data.
    Open(MailStream),
}

/// One encrypted mail connection with interactive certificate trust.
pub struct TlsSession {
    hostname: String,
    state: SessionState,
    tls_version: Option<String>,
    cipher_suite: Option<String>,
    client_name: Option<String>,
}

impl TlsSession {
    /// Connects with implicit TLS and establishes trust in the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection, handshake, or trust
    /// resolution fails; on failure no session state is retained.
    pub async fn connect<U: PromptUi>(
        config: &TlsConfig,
        hostname: &str,
        port: u16,
        ui: &mut U,
    ) -> Result<Self> {
        let addr = format!("{hostname}:{port}");
        let tcp = TcpStream::connect(&addr).await?;
        tracing::debug!(hostname, port, "connected, negotiating TLS");
        Self::negotiate(tcp, config, hostname, ui).await
    }

    /// Upgrades an established plaintext stream to TLS (STARTTLS).
    ///
    /// The caller drives the protocol-level STARTTLS exchange first and
    /// hands over the stream once the server is ready to negotiate.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already TLS or negotiation fails.
    pub async fn upgrade<U: PromptUi>(
        stream: MailStream,
        config: &TlsConfig,
        hostname: &str,
        ui: &mut U,
    ) -> Result<Self> {
        match stream {
            MailStream::Plain(tcp) => {
                tracing::debug!(hostname, "upgrading plaintext stream to TLS");
                Self::negotiate(tcp, config, hostname, ui).await
            }
            MailStream::Tls(_) => {
                Err(Error::InvalidState("stream is already TLS".to_string()))
            }
        }
    }

    async fn negotiate<U: PromptUi>(
        tcp: TcpStream,
        config: &TlsConfig,
        hostname: &str,
        ui: &mut U,
    ) -> Result<Self> {
        let client_config = build_client_config(config)?;
        let connector = TlsConnector::from(Arc::new(client_config));
        let server_name = ServerName::try_from(hostname.to_string())?;
        tracing::debug!(hostname, "handshaking");
        let mut tls = connector.connect(server_name, tcp).await?;

        // The handshake verifier accepted unconditionally; trust is decided
        // here, before the first application byte.
        tracing::debug!(hostname, "verifying peer certificate chain");
        if let Err(e) = establish_trust(&tls, config, hostname, ui) {
            tracing::debug!(error = %e, "trust not established, closing TLS session");
            let _ = tls.shutdown().await;
            return Err(e);
        }

        let (_, conn) = tls.get_ref();
        let tls_version = conn.protocol_version().map(|v| format!("{v:?}"));
        let cipher_suite = conn.negotiated_cipher_suite().map(suite_name);
        tracing::info!(
            version = tls_version.as_deref().unwrap_or("unknown"),
            cipher = cipher_suite.as_deref().unwrap_or("unknown"),
            "TLS connection established"
        );

        let client_name = match &config.client_cert {
            Some(path) => match client_identity(path) {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!(error = %e, "unable to read client certificate identity");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            hostname: hostname.to_string(),
            state: SessionState::Open(MailStream::tls(tls)),
            tls_version,
            cipher_suite,
            client_name,
        })
    }

    /// Returns true while the session carries application data.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    /// The hostname this session was negotiated for.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The negotiated protocol version, e.g. `TLSv1_3`.
    #[must_use]
    pub fn tls_version(&self) -> Option<&str> {
        self.tls_version.as_deref()
    }

    /// The negotiated cipher suite name.
    #[must_use]
    pub fn cipher_suite(&self) -> Option<&str> {
        self.cipher_suite.as_deref()
    }

    /// Effective symmetric key strength in bits, 0 when unknown.
    ///
    /// Derived from the negotiated suite; usable as the SASL security
    /// strength factor.
    #[must_use]
    pub fn security_strength_bits(&self) -> u32 {
        match self.cipher_suite.as_deref() {
            Some(name) if name.contains("AES_256") || name.contains("CHACHA20") => 256,
            Some(name) if name.contains("AES_128") => 128,
            _ => 0,
        }
    }

    /// Subject common name of the configured client certificate, if any.
    #[must_use]
    pub fn client_identity(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    /// Reads into `buf`, retrying transient interruptions.
    ///
    /// # Errors
    ///
    /// Any error other than `Interrupted` closes the session and is
    /// returned.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let SessionState::Open(stream) = &mut self.state else {
            return Err(Error::InvalidState("session is closed".to_string()));
        };
        let result = loop {
            match stream.read(buf).await {
                Ok(n) => break Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e.into())
            }
        }
    }

    /// Writes from `buf`, retrying transient interruptions.
    ///
    /// # Errors
    ///
    /// Any error other than `Interrupted` closes the session and is
    /// returned.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let SessionState::Open(stream) = &mut self.state else {
            return Err(Error::InvalidState("session is closed".to_string()));
        };
        let result = loop {
            match stream.write(buf).await {
                Ok(n) => break Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e.into())
            }
        }
    }

    /// Flushes buffered writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the flush fails.
    pub async fn flush(&mut self) -> Result<()> {
        let SessionState::Open(stream) = &mut self.state else {
            return Err(Error::InvalidState("session is closed".to_string()));
        };
        match stream.flush().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e.into())
            }
        }
    }

    /// Closes the session, sending close_notify and shutting down the write
    /// half; the read side is torn down locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown write fails. Closing a closed
    /// session is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Open(mut stream) => {
                tracing::debug!(hostname = %self.hostname, "closing TLS session");
                stream.shutdown().await?;
                Ok(())
            }
            SessionState::Closed => Ok(()),
        }
    }

    /// Releases the open stream to the caller, consuming the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed.
    pub fn into_stream(self) -> Result<MailStream> {
        match self.state {
            SessionState::Open(stream) => Ok(stream),
            SessionState::Closed => {
                Err(Error::InvalidState("session is closed".to_string()))
            }
        }
    }
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("hostname", &self.hostname)
            .field("open", &self.is_open())
            .field("tls_version", &self.tls_version)
            .field("cipher_suite", &self.cipher_suite)
            .finish_non_exhaustive()
    }
}

/// Runs the trust policy over the peer's presented chain.
fn establish_trust<U: PromptUi>(
    tls: &TlsStream<TcpStream>,
    config: &TlsConfig,
    hostname: &str,
    ui: &mut U,
) -> Result<()> {
    let (_, conn) = tls.get_ref();
    let ders = conn
        .peer_certificates()
        .ok_or(mailvet_trust::Error::NoPeerCertificate)?;
    let mut chain = Vec::with_capacity(ders.len());
    for der in ders {
        chain.push(Certificate::from_der(der.as_ref().to_vec())?);
    }

    let mut engine = WebPkiEngine::new(config, hostname)?;
    let mut store = match &config.certificate_file {
        Some(path) => Some(TrustStore::load(path)?),
        None => None,
    };
    let policy = VerifyPolicy {
        verify_dates: config.verify_dates,
        verify_hostname: config.verify_hostname,
    };

    let verdict =
        ChainResolver::new(&mut engine, ui, store.as_mut(), policy, hostname).resolve(&chain)?;
    tracing::debug!(prompts = verdict.prompts, "certificate chain accepted");
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_security_strength_from_suite_name() {
        let mut session = TlsSession {
            hostname: "mail.example.com".to_string(),
            state: SessionState::Closed,
            tls_version: None,
            cipher_suite: Some("TLS13_AES_256_GCM_SHA384".to_string()),
            client_name: None,
        };
        assert_eq!(session.security_strength_bits(), 256);

        session.cipher_suite = Some("TLS13_AES_128_GCM_SHA256".to_string());
        assert_eq!(session.security_strength_bits(), 128);

        session.cipher_suite = Some("TLS13_CHACHA20_POLY1305_SHA256".to_string());
        assert_eq!(session.security_strength_bits(), 256);

        session.cipher_suite = None;
        assert_eq!(session.security_strength_bits(), 0);
    }

    #[tokio::test]
    async fn test_read_on_closed_session_is_invalid_state() {
        let mut session = TlsSession {
            hostname: "mail.example.com".to_string(),
            state: SessionState::Closed,
            tls_version: None,
            cipher_suite: None,
            client_name: None,
        };
        let mut buf = [0u8; 8];
        assert!(matches!(
            session.read(&mut buf).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(session.close().await, Ok(())));
    }
}
