//! # mailvet-tls
//!
//! rustls-backed TLS session layer for mail connections, with interactive
//! certificate trust from [`mailvet_trust`].
//!
//! The handshake itself never fails on certificate grounds: the rustls
//! client config defers verification, and the trust policy inspects the
//! presented chain once the handshake completes. A chain the user (or the
//! trust store) does not accept tears the connection down before any
//! application byte is written.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailvet_tls::{TlsConfig, TlsSession};
//!
//! let config = TlsConfig::builder()
//!     .certificate_file("~/.mailvet/certificates")
//!     .build();
//!
//! // `ui` is any mailvet_trust::PromptUi implementation.
//! let mut session = TlsSession::connect(&config, "imap.example.com", 993, &mut ui).await?;
//! session.write(b"a1 CAPABILITY\r\n").await?;
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TLS policy and engine configuration
//! - [`engine`]: The rustls [`mailvet_trust::ChainVerifier`] and client config
//! - [`session`]: The session driver (connect, STARTTLS upgrade, I/O, close)
//! - [`stream`]: Plaintext/TLS stream enum

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
mod error;
pub mod session;
pub mod stream;

pub use config::{TlsConfig, TlsConfigBuilder};
pub use engine::{build_client_config, WebPkiEngine};
pub use error::{Error, Result};
pub use session::TlsSession;
pub use stream::{connect_plain, MailStream};
