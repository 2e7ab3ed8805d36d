//! Error types for the trust policy layer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while establishing trust in a certificate chain.
#[derive(Debug, Error)]
pub enum Error {
    /// The certificate bytes could not be parsed as X.509 DER.
    #[error("Error processing certificate data: {0}")]
    CertificateParse(String),

    /// PEM encoding or decoding failed.
    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    /// The trust store file could not be read or appended to.
    #[error("Trust store error at {path}: {source}")]
    Store {
        /// Path of the trust store file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The user rejected a certificate in the chain.
    #[error("Certificate rejected")]
    CertificateRejected,

    /// The server presented no certificate chain.
    #[error("Unable to get certificate from peer")]
    NoPeerCertificate,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
