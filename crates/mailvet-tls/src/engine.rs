//! rustls-backed chain verification engine.
//!
//! `WebPkiEngine` implements [`ChainVerifier`] over rustls's webpki
//! verifier. Handshake-time certificate verification is deferred: the
//! client config built by [`build_client_config`] installs a verifier that
//! accepts every handshake, and the trust policy inspects the presented
//! chain afterwards, tearing the connection down on rejection before any
//! application byte is written.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use mailvet_trust::{Certificate, ChainStatus, ChainStatusFlag, ChainVerifier, TrustStore};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_name, WebPkiServerVerifier};
use rustls::server::ParsedCertificate;
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
    ServerName, UnixTime,
};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    SupportedCipherSuite,
};

use crate::config::TlsConfig;
use crate::{Error, Result};

/// Production [`ChainVerifier`] backed by rustls and the webpki root set.
///
/// The working trust set starts from the `webpki-roots` baseline plus every
/// PEM certificate in the configured trust store and CA bundle; signers
/// accepted at runtime are added through [`ChainVerifier::add_trusted_signer`],
/// which rebuilds the underlying verifier.
#[derive(Debug)]
pub struct WebPkiEngine {
    server_name: ServerName<'static>,
    roots: RootCertStore,
    verifier: Arc<WebPkiServerVerifier>,
}

impl WebPkiEngine {
    /// Builds the engine for one connection to `hostname`.
    ///
    /// # Errors
    ///
    /// Returns an error if `hostname` is not a valid server name, if the
    /// trust store or CA bundle cannot be read, or if the verifier cannot
    /// be constructed.
    pub fn new(config: &TlsConfig, hostname: &str) -> Result<Self> {
        let server_name = ServerName::try_from(hostname.to_string())?;

        let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(path) = &config.certificate_file {
            let store = TrustStore::load(path)?;
            for der in store.certificates() {
                if let Err(e) = roots.add(CertificateDer::from(der.to_vec())) {
                    tracing::warn!(error = %e, "skipping unusable trust store certificate");
                }
            }
        }
        if let Some(path) = &config.ca_bundle {
            for der in read_pem_certificates(path)? {
                if let Err(e) = roots.add(der) {
                    tracing::warn!(error = %e, path = %path.display(), "skipping unusable CA certificate");
                }
            }
        }

        let verifier = build_verifier(&roots).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            server_name,
            roots,
            verifier,
        })
    }
}

impl ChainVerifier for WebPkiEngine {
    fn verify_chain(&self, chain: &[Certificate]) -> ChainStatus {
        let Some((end_entity, intermediates)) = chain.split_first() else {
            return ChainStatus::with_flags([ChainStatusFlag::Unknown]);
        };
        let end_entity = CertificateDer::from(end_entity.der().to_vec());
        let intermediates: Vec<CertificateDer<'_>> = intermediates
            .iter()
            .map(|cert| CertificateDer::from(cert.der().to_vec()))
            .collect();

        match self.verifier.verify_server_cert(
            &end_entity,
            &intermediates,
            &self.server_name,
            &[],
            UnixTime::now(),
        ) {
            Ok(_) => ChainStatus::clean(),
            Err(err) => match status_flag(&err) {
                Some(flag) => {
                    tracing::debug!(error = %err, ?flag, "chain verification finding");
                    ChainStatus::with_flags([flag])
                }
                // Date and hostname findings belong to the classifier.
                None => ChainStatus::clean(),
            },
        }
    }

    fn matches_hostname(&self, end_entity: &Certificate, hostname: &str) -> bool {
        let Ok(name) = ServerName::try_from(hostname.to_string()) else {
            return false;
        };
        let der = CertificateDer::from(end_entity.der().to_vec());
        let Ok(parsed) = ParsedCertificate::try_from(&der) else {
            return false;
        };
        verify_server_name(&parsed, &name).is_ok()
    }

    fn add_trusted_signer(&mut self, cert: &Certificate) -> mailvet_trust::Result<()> {
        self.roots
            .add(CertificateDer::from(cert.der().to_vec()))
            .map_err(|e| mailvet_trust::Error::CertificateParse(e.to_string()))?;
        self.verifier = build_verifier(&self.roots)
            .map_err(|e| mailvet_trust::Error::CertificateParse(e.to_string()))?;
        Ok(())
    }
}

fn build_verifier(
    roots: &RootCertStore,
) -> std::result::Result<Arc<WebPkiServerVerifier>, Box<dyn std::error::Error + Send + Sync>> {
    WebPkiServerVerifier::builder_with_provider(
        Arc::new(roots.clone()),
        Arc::new(aws_lc_rs::default_provider()),
    )
    .build()
    .map_err(Into::into)
}

/// Maps a rustls verification error onto a chain status flag.
///
/// `None` means the finding is owned by the classifier (validity window,
/// hostname) and must not surface as an engine status.
fn status_flag(err: &rustls::Error) -> Option<ChainStatusFlag> {
    let rustls::Error::InvalidCertificate(cert_err) = err else {
        return Some(ChainStatusFlag::Unknown);
    };
    match cert_err {
        CertificateError::Expired
        | CertificateError::ExpiredContext { .. }
        | CertificateError::NotValidYet
        | CertificateError::NotValidYetContext { .. }
        | CertificateError::NotValidForName
        | CertificateError::NotValidForNameContext { .. } => None,
        CertificateError::Revoked
        | CertificateError::UnknownRevocationStatus
        | CertificateError::ExpiredRevocationList
        | CertificateError::ExpiredRevocationListContext { .. } => {
            Some(ChainStatusFlag::Revoked)
        }
        CertificateError::UnknownIssuer
        | CertificateError::BadEncoding
        | CertificateError::BadSignature
        | CertificateError::UnhandledCriticalExtension => Some(ChainStatusFlag::NotTrusted),
        CertificateError::UnsupportedSignatureAlgorithmContext { .. }
        | CertificateError::UnsupportedSignatureAlgorithmForPublicKeyContext { .. } => {
            Some(ChainStatusFlag::InsecureAlgorithm)
        }
        CertificateError::InvalidPurpose => Some(ChainStatusFlag::SignerNotCa),
        _ => Some(ChainStatusFlag::Unknown),
    }
}

/// Builds the rustls client configuration for one connection.
///
/// The installed certificate verifier accepts every handshake; trust is
/// established afterwards by the policy layer.
///
/// # Errors
///
/// Returns an error if every TLS version is disabled, a requested cipher
/// suite is unknown, or the client certificate cannot be loaded.
pub fn build_client_config(config: &TlsConfig) -> Result<ClientConfig> {
    let mut provider = aws_lc_rs::default_provider();
    if let Some(names) = &config.cipher_suites {
        provider.cipher_suites = select_cipher_suites(&provider.cipher_suites, names)?;
    }

    let mut versions: Vec<&'static rustls::SupportedProtocolVersion> = Vec::new();
    if config.enable_tls12 {
        versions.push(&rustls::version::TLS12);
    }
    if config.enable_tls13 {
        versions.push(&rustls::version::TLS13);
    }
    if versions.is_empty() {
        return Err(Error::Config(
            "all available TLS versions are disabled".to_string(),
        ));
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&versions)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DeferredCertVerifier));

    let client_config = match &config.client_cert {
        Some(path) => {
            let (certs, key) = load_client_identity(path)?;
            builder.with_client_auth_cert(certs, key)?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(client_config)
}

/// The display name of a cipher suite, e.g. `TLS13_AES_256_GCM_SHA384`.
#[must_use]
pub fn suite_name(suite: SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

fn select_cipher_suites(
    available: &[SupportedCipherSuite],
    names: &[String],
) -> Result<Vec<SupportedCipherSuite>> {
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let suite = available
            .iter()
            .copied()
            .find(|suite| suite_name(*suite) == *name)
            .ok_or_else(|| Error::Config(format!("unknown cipher suite: {name}")))?;
        selected.push(suite);
    }
    Ok(selected)
}

/// Reads the subject common name of the configured client certificate.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no parseable
/// certificate.
pub fn client_identity(path: &Path) -> Result<Option<String>> {
    let text = fs::read_to_string(path)?;
    for block in pem::parse_many(&text).map_err(mailvet_trust::Error::Pem)? {
        if block.tag() == "CERTIFICATE" {
            let cert = Certificate::from_der(block.into_contents())?;
            return Ok(cert.subject().common_name.clone());
        }
    }
    Ok(None)
}

fn read_pem_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let text = fs::read_to_string(path)?;
    let blocks = pem::parse_many(&text).map_err(mailvet_trust::Error::Pem)?;
    Ok(blocks
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect())
}

fn load_client_identity(
    path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let text = fs::read_to_string(path)?;
    let mut certs = Vec::new();
    let mut key = None;
    for block in pem::parse_many(&text).map_err(mailvet_trust::Error::Pem)? {
        let tag = block.tag().to_string();
        match tag.as_str() {
            "CERTIFICATE" => certs.push(CertificateDer::from(block.into_contents())),
            "PRIVATE KEY" => {
                key = Some(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                    block.into_contents(),
                )));
            }
            "RSA PRIVATE KEY" => {
                key = Some(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(
                    block.into_contents(),
                )));
            }
            "EC PRIVATE KEY" => {
                key = Some(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(
                    block.into_contents(),
                )));
            }
            _ => {}
        }
    }
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificate in {}",
            path.display()
        )));
    }
    let key = key.ok_or_else(|| Error::Config(format!("no private key in {}", path.display())))?;
    Ok((certs, key))
}

/// Accepts every handshake so the policy layer can inspect the chain after
/// the handshake completes.
#[derive(Debug)]
struct DeferredCertVerifier;

impl ServerCertVerifier for DeferredCertVerifier {
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
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
        ]
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
    use std::io::Write;

    use rcgen::{
        BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    };

    use super::*;

    const HOST: &str = "mail.example.com";

    fn self_signed(hostname: &str) -> Certificate {
        let key = KeyPair::generate().unwrap();
        let params = CertificateParams::new(vec![hostname.to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        Certificate::from_der(cert.der().to_vec()).unwrap()
    }

    fn ca_and_leaf(hostname: &str) -> (Certificate, Certificate) {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::default();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Test Root");
        ca_params.distinguished_name = dn;
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();
        let ca = Certificate::from_der(ca_cert.der().to_vec()).unwrap();

        let issuer = Issuer::new(ca_params, ca_key);
        let leaf_key = KeyPair::generate().unwrap();
        let leaf_params = CertificateParams::new(vec![hostname.to_string()]).unwrap();
        let leaf_cert = leaf_params.signed_by(&leaf_key, &issuer).unwrap();
        let leaf = Certificate::from_der(leaf_cert.der().to_vec()).unwrap();

        (ca, leaf)
    }

    #[test]
    fn test_self_signed_chain_is_not_trusted() {
        let engine = WebPkiEngine::new(&TlsConfig::default(), HOST).unwrap();
        let status = engine.verify_chain(&[self_signed(HOST)]);
        assert!(status.contains(ChainStatusFlag::NotTrusted));
    }

    #[test]
    fn test_empty_chain_is_unknown() {
        let engine = WebPkiEngine::new(&TlsConfig::default(), HOST).unwrap();
        let status = engine.verify_chain(&[]);
        assert!(status.contains(ChainStatusFlag::Unknown));
    }

    #[test]
    fn test_trusted_signer_clears_chain() {
        let (ca, leaf) = ca_and_leaf(HOST);
        let mut engine = WebPkiEngine::new(&TlsConfig::default(), HOST).unwrap();
        let chain = [leaf, ca];

        assert!(engine.verify_chain(&chain).contains(ChainStatusFlag::NotTrusted));
        engine.add_trusted_signer(&chain[1]).unwrap();
        assert!(engine.verify_chain(&chain).is_clean());
    }

    #[test]
    fn test_roots_seeded_from_trust_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certificates");
        let (ca, leaf) = ca_and_leaf(HOST);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(ca.to_pem().as_bytes())
            .unwrap();

        let config = TlsConfig::builder().certificate_file(&path).build();
        let engine = WebPkiEngine::new(&config, HOST).unwrap();
        assert!(engine.verify_chain(&[leaf, ca]).is_clean());
    }

    #[test]
    fn test_status_flag_mapping() {
        let invalid = |e: CertificateError| rustls::Error::InvalidCertificate(e);

        // Weak or unsupported signature algorithms surface as their own
        // finding, not the catch-all.
        assert_eq!(
            status_flag(&invalid(
                CertificateError::UnsupportedSignatureAlgorithmContext {
                    signature_algorithm_id: Vec::new(),
                    supported_algorithms: Vec::new(),
                }
            )),
            Some(ChainStatusFlag::InsecureAlgorithm)
        );
        assert_eq!(
            status_flag(&invalid(CertificateError::UnknownIssuer)),
            Some(ChainStatusFlag::NotTrusted)
        );
        assert_eq!(
            status_flag(&invalid(CertificateError::Revoked)),
            Some(ChainStatusFlag::Revoked)
        );
        assert_eq!(
            status_flag(&invalid(CertificateError::InvalidPurpose)),
            Some(ChainStatusFlag::SignerNotCa)
        );
        // Date and hostname findings belong to the classifier.
        assert_eq!(status_flag(&invalid(CertificateError::Expired)), None);
        assert_eq!(
            status_flag(&invalid(CertificateError::NotValidForName)),
            None
        );
        assert_eq!(
            status_flag(&invalid(CertificateError::ApplicationVerificationFailure)),
            Some(ChainStatusFlag::Unknown)
        );
        assert_eq!(
            status_flag(&rustls::Error::DecryptError),
            Some(ChainStatusFlag::Unknown)
        );
    }

    #[test]
    fn test_matches_hostname() {
        let engine = WebPkiEngine::new(&TlsConfig::default(), HOST).unwrap();
        let cert = self_signed(HOST);
        assert!(engine.matches_hostname(&cert, HOST));
        assert!(!engine.matches_hostname(&cert, "other.example.com"));
    }

    #[test]
    fn test_all_versions_disabled_is_rejected() {
        let config = TlsConfig::builder()
            .enable_tls12(false)
            .enable_tls13(false)
            .build();
        assert!(matches!(
            build_client_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_cipher_suite_is_rejected() {
        let config = TlsConfig::builder()
            .cipher_suites(vec!["TLS_MYSTERY_SUITE".to_string()])
            .build();
        assert!(matches!(
            build_client_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_known_cipher_suite_is_accepted() {
        let config = TlsConfig::builder()
            .cipher_suites(vec!["TLS13_AES_256_GCM_SHA384".to_string()])
            .build();
        assert!(build_client_config(&config).is_ok());
    }

    #[test]
    fn test_client_identity_reads_common_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.pem");
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![]).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, "alice@example.com");
        let cert = params.self_signed(&key).unwrap();
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(cert.pem().as_bytes()).unwrap();
        file.write_all(key.serialize_pem().as_bytes()).unwrap();

        let name = client_identity(&path).unwrap();
        assert_eq!(name.as_deref(), Some("alice@example.com"));
    }
}
