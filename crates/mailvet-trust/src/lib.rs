//! # mailvet-trust
//!
//! Trust-establishment policy for mail-server TLS connections.
//!
//! Most mail users talk to one or two servers whose certificates never
//! change, and plenty of those servers present self-signed or otherwise
//! unverifiable certificates. This crate implements a trust-on-first-use
//! workflow on top of any X.509 verification engine: the first time a
//! chain fails verification the user is shown the certificate and asked to
//! reject it, accept it once, or accept it always; "always" persists the
//! certificate (or a hostname exception) to a plain-text trust store so
//! later connections succeed silently.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailvet_trust::{ChainResolver, TrustStore, VerifyPolicy};
//!
//! let mut store = TrustStore::load("~/.mailvet/certificates")?;
//! let mut resolver = ChainResolver::new(
//!     &mut engine,           // any ChainVerifier
//!     &mut ui,               // any PromptUi
//!     Some(&mut store),
//!     VerifyPolicy::default(),
//!     "imap.example.com",
//! );
//! resolver.resolve(&peer_chain)?;
//! ```
//!
//! ## Modules
//!
//! - [`cert`]: Parsed X.509 certificates and fingerprints
//! - [`classify`]: Per-certificate verdict and error classification
//! - [`prompt`]: Interactive decision prompt and trust persistence
//! - [`resolve`]: Two-pass chain trust resolution
//! - [`store`]: On-disk trust store of certificates and host exceptions
//! - [`verify`]: The [`ChainVerifier`] seam to the TLS engine

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cert;
pub mod classify;
mod error;
pub mod prompt;
pub mod resolve;
pub mod store;
pub mod verify;

pub use cert::{CertIdentity, Certificate};
pub use classify::{classify, CertErrors, Classification, ClassifyContext, VerifyPolicy};
pub use error::{Error, Result};
pub use prompt::{build_report, decide_certificate, CertificateReport, PromptUi, TrustDecision};
pub use resolve::{ChainResolver, ChainVerdict};
pub use store::TrustStore;
pub use verify::{ChainStatus, ChainStatusFlag, ChainVerifier};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::missing_panics_doc)]
pub(crate) mod test_support {
    use rcgen::{
        BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    };

    use crate::prompt::{CertificateReport, PromptUi, TrustDecision};
    use crate::verify::{ChainStatus, ChainVerifier};
    use crate::{Certificate, Error, Result};

    /// Generates a self-signed certificate for `hostname`, valid for the
    /// default rcgen window (which comfortably covers "now").
    pub(crate) fn self_signed(hostname: &str) -> Certificate {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![hostname.to_string()]).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, hostname);
        let cert = params.self_signed(&key).unwrap();
        Certificate::from_der(cert.der().to_vec()).unwrap()
    }

    /// Generates a self-signed certificate with an explicit validity window.
    pub(crate) fn self_signed_with_validity(
        hostname: &str,
        not_before: time::OffsetDateTime,
        not_after: time::OffsetDateTime,
    ) -> Certificate {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![hostname.to_string()]).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, hostname);
        params.not_before = not_before;
        params.not_after = not_after;
        let cert = params.self_signed(&key).unwrap();
        Certificate::from_der(cert.der().to_vec()).unwrap()
    }

    /// Generates a CA certificate plus a leaf for `hostname` signed by it.
    pub(crate) fn ca_and_leaf(ca_name: &str, hostname: &str) -> (Certificate, Certificate) {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::default();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, ca_name);
        dn.push(DnType::OrganizationName, "Mailvet Test CA");
        ca_params.distinguished_name = dn;
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();
        let ca = Certificate::from_der(ca_cert.der().to_vec()).unwrap();

        let issuer = Issuer::new(ca_params, ca_key);
        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec![hostname.to_string()]).unwrap();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, hostname);
        let leaf_cert = leaf_params.signed_by(&leaf_key, &issuer).unwrap();
        let leaf = Certificate::from_der(leaf_cert.der().to_vec()).unwrap();

        (ca, leaf)
    }

    /// Scriptable verification engine for policy tests.
    pub(crate) struct MockVerifier {
        status: ChainStatus,
        status_after_trust: ChainStatus,
        hostname_ok: bool,
        fail_trust: bool,
        /// DER of every signer passed to `add_trusted_signer`.
        pub(crate) added: Vec<Vec<u8>>,
    }

    impl MockVerifier {
        /// Clean status, hostname always matches.
        pub(crate) fn accepting_hostname() -> Self {
            Self::build(ChainStatus::clean(), ChainStatus::clean(), true, false)
        }

        /// Clean status, hostname never matches.
        pub(crate) fn rejecting_hostname() -> Self {
            Self::build(ChainStatus::clean(), ChainStatus::clean(), false, false)
        }

        /// Fixed status regardless of trusted signers; hostname matches.
        pub(crate) fn with_status(status: ChainStatus) -> Self {
            Self::build(status.clone(), status, true, false)
        }

        /// `status` until a signer is trusted, then `after`.
        pub(crate) fn resolving_after_trust(status: ChainStatus, after: ChainStatus) -> Self {
            Self::build(status, after, true, false)
        }

        /// Fixed status, and `add_trusted_signer` always errors.
        pub(crate) fn failing_trust(status: ChainStatus) -> Self {
            Self::build(status.clone(), status, true, true)
        }

        fn build(
            status: ChainStatus,
            status_after_trust: ChainStatus,
            hostname_ok: bool,
            fail_trust: bool,
        ) -> Self {
            Self {
                status,
                status_after_trust,
                hostname_ok,
                fail_trust,
                added: Vec::new(),
            }
        }
    }

    impl ChainVerifier for MockVerifier {
        fn verify_chain(&self, _chain: &[Certificate]) -> ChainStatus {
            if self.added.is_empty() {
                self.status.clone()
            } else {
                self.status_after_trust.clone()
            }
        }

        fn matches_hostname(&self, _cert: &Certificate, _hostname: &str) -> bool {
            self.hostname_ok
        }

        fn add_trusted_signer(&mut self, cert: &Certificate) -> Result<()> {
            if self.fail_trust {
                return Err(Error::CertificateParse("mock trust failure".to_string()));
            }
            self.added.push(cert.der().to_vec());
            Ok(())
        }
    }

    /// Prompt that replies from a fixed script and records what it was shown.
    pub(crate) struct ScriptedUi {
        replies: std::collections::VecDeque<TrustDecision>,
        offered: Vec<usize>,
    }

    impl ScriptedUi {
        pub(crate) fn new(replies: Vec<TrustDecision>) -> Self {
            Self {
                replies: replies.into(),
                offered: Vec::new(),
            }
        }

        /// How many times the prompt was shown.
        pub(crate) fn prompt_count(&self) -> usize {
            self.offered.len()
        }

        /// Number of choices offered at each prompt, in order.
        pub(crate) fn offered_counts(&self) -> Vec<usize> {
            self.offered.clone()
        }
    }

    impl PromptUi for ScriptedUi {
        fn choose(
            &mut self,
            _report: &CertificateReport,
            offered: &[TrustDecision],
        ) -> TrustDecision {
            self.offered.push(offered.len());
            self.replies.pop_front().unwrap_or(TrustDecision::Reject)
        }
    }
}
