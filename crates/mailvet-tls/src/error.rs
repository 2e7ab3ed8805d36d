//! Error types for the TLS session layer.

use thiserror::Error;

/// Errors that can occur while negotiating or using a TLS session.
#[derive(Debug, Error)]
pub enum Error {
    /// Network I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS protocol error from rustls.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The hostname is not a valid DNS name for SNI.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// The TLS configuration cannot be satisfied.
    #[error("TLS configuration error: {0}")]
    Config(String),

    /// Certificate trust could not be established.
    #[error(transparent)]
    Trust(#[from] mailvet_trust::Error),

    /// Operation is not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
