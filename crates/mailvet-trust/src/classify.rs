//! Per-certificate error classification.
//!
//! [`classify`] turns one certificate plus the engine's chain-wide findings
//! into a [`CertErrors`] value for its chain position. The chain resolver
//! runs this once per position during the pre-authentication pass and again
//! during the interactive pass whenever the chain status changes.

use chrono::{DateTime, Utc};

use crate::store::TrustStore;
use crate::verify::{ChainStatus, ChainStatusFlag, ChainVerifier};
use crate::Certificate;

/// Which verification policies are active for this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyPolicy {
    /// Check the certificate's activation and expiration dates.
    pub verify_dates: bool,
    /// Check the end-entity certificate against the requested hostname.
    pub verify_hostname: bool,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            verify_dates: true,
            verify_hostname: true,
        }
    }
}

/// Error classification for one certificate at one chain position.
///
/// The value is VALID (all fields clear) iff the certificate requires no
/// user attention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct CertErrors {
    /// The certificate has expired.
    pub expired: bool,
    /// The certificate is not yet valid.
    pub not_yet_valid: bool,
    /// The certificate has been revoked.
    pub revoked: bool,
    /// The chain does not lead to a trusted signer.
    pub not_trusted: bool,
    /// The end-entity certificate does not match the requested hostname.
    pub hostname_mismatch: bool,
    /// The certificate's signer is not a CA.
    pub signer_not_ca: bool,
    /// The certificate was signed using an insecure algorithm.
    pub insecure_algorithm: bool,
    /// The engine reported a finding this layer does not recognize.
    pub other: bool,
}

impl CertErrors {
    /// True iff no error flag is set.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !(self.expired
            || self.not_yet_valid
            || self.revoked
            || self.not_trusted
            || self.hostname_mismatch
            || self.signer_not_ca
            || self.insecure_algorithm
            || self.other)
    }

    /// True for findings that must be confirmed interactively every time,
    /// even for a previously stored certificate.
    #[must_use]
    pub const fn requires_fresh_decision(self) -> bool {
        self.expired || self.not_yet_valid || self.revoked
    }

    /// True iff hostname mismatch is the only flag set.
    #[must_use]
    pub fn is_hostname_mismatch_only(self) -> bool {
        self.hostname_mismatch
            && Self {
                hostname_mismatch: false,
                ..self
            }
            .is_valid()
    }

    /// One human-readable warning line per set flag.
    #[must_use]
    pub fn warnings(self) -> Vec<&'static str> {
        let mut lines = Vec::new();
        if self.not_yet_valid {
            lines.push("WARNING: Server certificate is not yet valid");
        }
        if self.expired {
            lines.push("WARNING: Server certificate has expired");
        }
        if self.revoked {
            lines.push("WARNING: Server certificate has been revoked");
        }
        if self.not_trusted {
            lines.push("WARNING: Server certificate is not trusted");
        }
        if self.hostname_mismatch {
            lines.push("WARNING: Server hostname does not match certificate");
        }
        if self.signer_not_ca {
            lines.push("WARNING: Signer of server certificate is not a CA");
        }
        if self.insecure_algorithm {
            lines.push("WARNING: Server certificate was signed using an insecure algorithm");
        }
        if self.other {
            lines.push("WARNING: Server certificate failed verification for an unrecognized reason");
        }
        lines
    }
}

/// Inputs shared by every classification in one verification pass.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    /// The hostname the connection was made to.
    pub hostname: &'a str,
    /// Active verification policies.
    pub policy: VerifyPolicy,
    /// The loaded trust store, if one is configured.
    pub store: Option<&'a TrustStore>,
    /// The instant dates are evaluated against.
    pub now: DateTime<Utc>,
}

/// Result of classifying one chain position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// The per-position error flags.
    pub errors: CertErrors,
    /// True if the exact certificate bytes are in the trust store.
    pub saved: bool,
}

impl Classification {
    /// True when the certificate needs an interactive decision.
    #[must_use]
    pub const fn requires_user_decision(&self) -> bool {
        !self.errors.is_valid()
    }
}

/// Classifies the certificate at `position` in the chain.
///
/// The recognized engine findings are consumed out of a working copy of
/// `chain_status`; anything left unconsumed maps to the catch-all `other`
/// flag so an unrecognized failure mode is never silently approved.
///
/// A certificate whose exact bytes are stored in the trust store
/// short-circuits to VALID unless it is expired, not yet valid, or revoked;
/// those findings must be re-confirmed interactively every time.
pub fn classify<V>(
    cert: &Certificate,
    chain_status: &ChainStatus,
    position: usize,
    verifier: &V,
    ctx: &ClassifyContext<'_>,
) -> Classification
where
    V: ChainVerifier + ?Sized,
{
    let mut errors = CertErrors::default();
    let mut working = chain_status.clone();

    if ctx.policy.verify_dates {
        if cert.not_after() < ctx.now {
            errors.expired = true;
        }
        if cert.not_before() > ctx.now {
            errors.not_yet_valid = true;
        }
    }

    if position == 0
        && ctx.policy.verify_hostname
        && !verifier.matches_hostname(cert, ctx.hostname)
        && !ctx
            .store
            .is_some_and(|store| store.matches_hostname_override(ctx.hostname, cert))
    {
        errors.hostname_mismatch = true;
    }

    // Revocation is consumed before the stored-certificate check: a stored
    // certificate never covers a revoked one.
    if working.take(ChainStatusFlag::Revoked) {
        errors.revoked = true;
    }

    let saved = ctx
        .store
        .is_some_and(|store| store.contains_certificate(cert));
    if saved && !errors.requires_fresh_decision() {
        return Classification {
            errors: CertErrors::default(),
            saved,
        };
    }

    if working.take(ChainStatusFlag::NotTrusted) {
        errors.not_trusted = true;
    }
    if working.take(ChainStatusFlag::SignerNotCa) {
        errors.signer_not_ca = true;
    }
    if working.take(ChainStatusFlag::InsecureAlgorithm) {
        errors.insecure_algorithm = true;
    }

    // Anything the engine reported that we did not recognize above.
    if !working.is_clean() {
        errors.other = true;
    }

    Classification { errors, saved }
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
    use std::io::Write as _;

    use super::*;
    use crate::test_support::{
        self_signed, self_signed_with_validity, MockVerifier,
    };

    const HOST: &str = "mail.example.com";

    fn ctx<'a>(store: Option<&'a TrustStore>) -> ClassifyContext<'a> {
        ClassifyContext {
            hostname: HOST,
            policy: VerifyPolicy::default(),
            store,
            now: Utc::now(),
        }
    }

    fn store_with(content: &str) -> (tempfile::TempDir, TrustStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certificates");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let store = TrustStore::load(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn test_clean_certificate_is_valid() {
        let cert = self_signed(HOST);
        let verifier = MockVerifier::accepting_hostname();
        let c = classify(&cert, &ChainStatus::clean(), 0, &verifier, &ctx(None));
        assert!(c.errors.is_valid());
        assert!(!c.saved);
        assert!(!c.requires_user_decision());
    }

    #[test]
    fn test_expired_certificate() {
        let cert = self_signed_with_validity(
            HOST,
            rcgen::date_time_ymd(2000, 1, 1),
            rcgen::date_time_ymd(2001, 1, 1),
        );
        let verifier = MockVerifier::accepting_hostname();
        let c = classify(&cert, &ChainStatus::clean(), 0, &verifier, &ctx(None));
        assert!(c.errors.expired);
        assert!(!c.errors.not_yet_valid);
        assert!(c.requires_user_decision());
    }

    #[test]
    fn test_not_yet_valid_certificate() {
        let cert = self_signed_with_validity(
            HOST,
            rcgen::date_time_ymd(2090, 1, 1),
            rcgen::date_time_ymd(2095, 1, 1),
        );
        let verifier = MockVerifier::accepting_hostname();
        let c = classify(&cert, &ChainStatus::clean(), 0, &verifier, &ctx(None));
        assert!(c.errors.not_yet_valid);
    }

    #[test]
    fn test_date_checks_can_be_disabled() {
        let cert = self_signed_with_validity(
            HOST,
            rcgen::date_time_ymd(2000, 1, 1),
            rcgen::date_time_ymd(2001, 1, 1),
        );
        let verifier = MockVerifier::accepting_hostname();
        let mut context = ctx(None);
        context.policy.verify_dates = false;
        let c = classify(&cert, &ChainStatus::clean(), 0, &verifier, &context);
        assert!(c.errors.is_valid());
    }

    #[test]
    fn test_hostname_mismatch_only_at_position_zero() {
        let cert = self_signed(HOST);
        let verifier = MockVerifier::rejecting_hostname();

        let at_leaf = classify(&cert, &ChainStatus::clean(), 0, &verifier, &ctx(None));
        assert!(at_leaf.errors.hostname_mismatch);

        let at_signer = classify(&cert, &ChainStatus::clean(), 1, &verifier, &ctx(None));
        assert!(!at_signer.errors.hostname_mismatch);
    }

    #[test]
    fn test_hostname_check_can_be_disabled() {
        let cert = self_signed(HOST);
        let verifier = MockVerifier::rejecting_hostname();
        let mut context = ctx(None);
        context.policy.verify_hostname = false;
        let c = classify(&cert, &ChainStatus::clean(), 0, &verifier, &context);
        assert!(c.errors.is_valid());
    }

    #[test]
    fn test_stored_hostname_override_clears_mismatch() {
        let cert = self_signed("something-else.example.net");
        let line = format!("#H {HOST} {}\n", cert.fingerprint_md5());
        let (_dir, store) = store_with(&line);
        // The embedded subject does not match; only the stored override does.
        let verifier = MockVerifier::rejecting_hostname();
        let c = classify(&cert, &ChainStatus::clean(), 0, &verifier, &ctx(Some(&store)));
        assert!(!c.errors.hostname_mismatch);
        assert!(c.errors.is_valid());
    }

    #[test]
    fn test_status_flags_transfer() {
        let cert = self_signed(HOST);
        let verifier = MockVerifier::accepting_hostname();
        let status = ChainStatus::with_flags([
            ChainStatusFlag::Revoked,
            ChainStatusFlag::NotTrusted,
            ChainStatusFlag::SignerNotCa,
            ChainStatusFlag::InsecureAlgorithm,
        ]);
        let c = classify(&cert, &status, 0, &verifier, &ctx(None));
        assert!(c.errors.revoked);
        assert!(c.errors.not_trusted);
        assert!(c.errors.signer_not_ca);
        assert!(c.errors.insecure_algorithm);
        assert!(!c.errors.other);
    }

    #[test]
    fn test_unknown_flag_maps_to_other() {
        let cert = self_signed(HOST);
        let verifier = MockVerifier::accepting_hostname();
        let status = ChainStatus::with_flags([ChainStatusFlag::Unknown]);
        let c = classify(&cert, &status, 0, &verifier, &ctx(None));
        assert!(c.errors.other);
        assert!(c.requires_user_decision());
    }

    #[test]
    fn test_saved_certificate_short_circuits() {
        let cert = self_signed(HOST);
        let (_dir, store) = store_with(&cert.to_pem());
        let verifier = MockVerifier::rejecting_hostname();
        let status = ChainStatus::with_flags([ChainStatusFlag::NotTrusted]);
        let c = classify(&cert, &status, 0, &verifier, &ctx(Some(&store)));
        assert!(c.saved);
        assert!(c.errors.is_valid());
    }

    #[test]
    fn test_saved_certificate_never_covers_revocation() {
        let cert = self_signed(HOST);
        let (_dir, store) = store_with(&cert.to_pem());
        let verifier = MockVerifier::accepting_hostname();
        let status = ChainStatus::with_flags([ChainStatusFlag::Revoked]);
        let c = classify(&cert, &status, 0, &verifier, &ctx(Some(&store)));
        assert!(c.saved);
        assert!(c.errors.revoked);
        assert!(c.requires_user_decision());
    }

    #[test]
    fn test_saved_certificate_never_covers_expiry() {
        let cert = self_signed_with_validity(
            HOST,
            rcgen::date_time_ymd(2000, 1, 1),
            rcgen::date_time_ymd(2001, 1, 1),
        );
        let (_dir, store) = store_with(&cert.to_pem());
        let verifier = MockVerifier::accepting_hostname();
        let c = classify(&cert, &ChainStatus::clean(), 0, &verifier, &ctx(Some(&store)));
        assert!(c.saved);
        assert!(c.errors.expired);
    }

    #[test]
    fn test_is_hostname_mismatch_only() {
        let only = CertErrors {
            hostname_mismatch: true,
            ..CertErrors::default()
        };
        assert!(only.is_hostname_mismatch_only());

        let mixed = CertErrors {
            hostname_mismatch: true,
            not_trusted: true,
            ..CertErrors::default()
        };
        assert!(!mixed.is_hostname_mismatch_only());
        assert!(!CertErrors::default().is_hostname_mismatch_only());
    }
}
