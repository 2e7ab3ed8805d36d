//! TLS connection configuration.

use std::path::PathBuf;

/// TLS policy and engine configuration for one account or server.
///
/// Consumed as plain values; how they are loaded (command line, account
/// settings) is the caller's concern.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Check certificate validity windows during classification.
    pub verify_dates: bool,
    /// Check that the end-entity certificate matches the server hostname.
    pub verify_hostname: bool,
    /// Path of the trust store file. `None` disables persistence and the
    /// accept-always choice.
    pub certificate_file: Option<PathBuf>,
    /// Extra trusted CA certificates (PEM bundle).
    pub ca_bundle: Option<PathBuf>,
    /// Client certificate plus private key (PEM) for mutual TLS.
    pub client_cert: Option<PathBuf>,
    /// Offer TLS 1.2 during negotiation.
    pub enable_tls12: bool,
    /// Offer TLS 1.3 during negotiation.
    pub enable_tls13: bool,
    /// Restrict the cipher suite list by name (rustls suite identifiers,
    /// e.g. `TLS13_AES_256_GCM_SHA384`). `None` keeps the engine default.
    pub cipher_suites: Option<Vec<String>>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_dates: true,
            verify_hostname: true,
            certificate_file: None,
            ca_bundle: None,
            client_cert: None,
            enable_tls12: true,
            enable_tls13: true,
            cipher_suites: None,
        }
    }
}

impl TlsConfig {
    /// Creates a configuration with full verification and no trust store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }
}

/// Builder for [`TlsConfig`].
#[derive(Debug, Clone, Default)]
pub struct TlsConfigBuilder {
    config: TlsConfig,
}

impl TlsConfigBuilder {
    /// Enables or disables validity-window checks.
    #[must_use]
    pub const fn verify_dates(mut self, verify: bool) -> Self {
        self.config.verify_dates = verify;
        self
    }

    /// Enables or disables hostname checks on the end-entity certificate.
    #[must_use]
    pub const fn verify_hostname(mut self, verify: bool) -> Self {
        self.config.verify_hostname = verify;
        self
    }

    /// Sets the trust store file, enabling persistence.
    #[must_use]
    pub fn certificate_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.certificate_file = Some(path.into());
        self
    }

    /// Sets an extra CA bundle (PEM).
    #[must_use]
    pub fn ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_bundle = Some(path.into());
        self
    }

    /// Sets the client certificate file (PEM with certificate and key).
    #[must_use]
    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.client_cert = Some(path.into());
        self
    }

    /// Enables or disables TLS 1.2.
    #[must_use]
    pub const fn enable_tls12(mut self, enable: bool) -> Self {
        self.config.enable_tls12 = enable;
        self
    }

    /// Enables or disables TLS 1.3.
    #[must_use]
    pub const fn enable_tls13(mut self, enable: bool) -> Self {
        self.config.enable_tls13 = enable;
        self
    }

    /// Restricts the cipher suites by name.
    #[must_use]
    pub fn cipher_suites(mut self, names: Vec<String>) -> Self {
        self.config.cipher_suites = Some(names);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TlsConfig {
        self.config
    }
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
    fn test_defaults_verify_everything() {
        let config = TlsConfig::new();
        assert!(config.verify_dates);
        assert!(config.verify_hostname);
        assert!(config.enable_tls12);
        assert!(config.enable_tls13);
        assert!(config.certificate_file.is_none());
        assert!(config.cipher_suites.is_none());
    }

    #[test]
    fn test_builder() {
        let config = TlsConfig::builder()
            .verify_hostname(false)
            .certificate_file("/tmp/certs")
            .enable_tls12(false)
            .cipher_suites(vec!["TLS13_AES_256_GCM_SHA384".to_string()])
            .build();

        assert!(config.verify_dates);
        assert!(!config.verify_hostname);
        assert_eq!(
            config.certificate_file.as_deref(),
            Some(std::path::Path::new("/tmp/certs"))
        );
        assert!(!config.enable_tls12);
        assert!(config.enable_tls13);
        assert_eq!(
            config.cipher_suites,
            Some(vec!["TLS13_AES_256_GCM_SHA384".to_string()])
        );
    }
}
