//! The interactive trust decision.
//!
//! Rendering is delegated through [`PromptUi`]; everything that makes the
//! decision *mean* something stays here: which choices are offered, what the
//! user is shown, and what gets persisted when they choose "accept always".

use crate::classify::Classification;
use crate::store::TrustStore;
use crate::Certificate;

/// The user's decision about one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Reject the certificate; terminal for the whole chain verification.
    Reject,
    /// Accept for this connection only.
    AcceptOnce,
    /// Accept and persist to the trust store.
    AcceptAlways,
}

/// The delegated UI surface: a titled list of text rows plus a single-key
/// choice from the offered set.
pub trait PromptUi {
    /// Presents the report and returns one of the offered decisions.
    fn choose(&mut self, report: &CertificateReport, offered: &[TrustDecision]) -> TrustDecision;
}

/// What the user is shown for one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateReport {
    /// Dialog title, including the certificate's place in the chain.
    pub title: String,
    /// Identity, validity, fingerprint, and warning rows.
    pub rows: Vec<String>,
}

/// Builds the report for the certificate at `position` in a chain of
/// `chain_len`.
///
/// Certificates are numbered from the root, so the root the user is asked
/// about first reads as "certificate 1 of N".
#[must_use]
pub fn build_report(
    cert: &Certificate,
    classification: &Classification,
    position: usize,
    chain_len: usize,
) -> CertificateReport {
    let mut rows = Vec::new();

    rows.push("This certificate belongs to:".to_string());
    push_identity_rows(&mut rows, cert.subject());

    rows.push(String::new());
    rows.push("This certificate was issued by:".to_string());
    push_identity_rows(&mut rows, cert.issuer());

    rows.push(String::new());
    rows.push("This certificate is valid".to_string());
    rows.push(format!(
        "   from {}     to {}",
        cert.not_before().format("%b %e %H:%M:%S %Y UTC"),
        cert.not_after().format("%b %e %H:%M:%S %Y UTC"),
    ));

    rows.push(format!("SHA1 Fingerprint: {}", cert.fingerprint_sha1()));
    rows.push(format!("SHA256 Fingerprint: {}", cert.fingerprint_sha256()));

    let warnings = classification.errors.warnings();
    if !warnings.is_empty() {
        rows.push(String::new());
        rows.extend(warnings.into_iter().map(ToOwned::to_owned));
    }

    CertificateReport {
        title: format!(
            "TLS certificate check (certificate {} of {} in chain)",
            chain_len - position,
            chain_len
        ),
        rows,
    }
}

fn push_identity_rows(rows: &mut Vec<String>, identity: &crate::CertIdentity) {
    let field = |value: &Option<String>| value.clone().unwrap_or_default();
    rows.push(format!(
        "   {}  {}",
        field(&identity.common_name),
        field(&identity.email)
    ));
    rows.push(format!("   {}", field(&identity.organization)));
    rows.push(format!("   {}", field(&identity.organizational_unit)));
    rows.push(format!(
        "   {}  {}  {}",
        field(&identity.locality),
        field(&identity.province),
        field(&identity.country)
    ));
}

/// Runs one interactive decision and applies its side effects.
///
/// Accept-always is only offered when a trust store is configured, the
/// certificate is not already stored, and none of the date/revocation flags
/// are set — those must be re-accepted on every connection.
///
/// On accept-always, a hostname-mismatch-only certificate persists a
/// hostname override line; any other flag set persists a PEM copy instead.
/// If the append fails the decision is downgraded to accept-once with a
/// warning — trust is never silently widened.
pub fn decide_certificate<U: PromptUi>(
    cert: &Certificate,
    classification: &Classification,
    position: usize,
    chain_len: usize,
    hostname: &str,
    mut store: Option<&mut TrustStore>,
    ui: &mut U,
) -> TrustDecision {
    let report = build_report(cert, classification, position, chain_len);

    let offer_always = store.is_some()
        && !classification.saved
        && !classification.errors.requires_fresh_decision();
    let offered: &[TrustDecision] = if offer_always {
        &[
            TrustDecision::Reject,
            TrustDecision::AcceptOnce,
            TrustDecision::AcceptAlways,
        ]
    } else {
        &[TrustDecision::Reject, TrustDecision::AcceptOnce]
    };

    let choice = ui.choose(&report, offered);
    if !offered.contains(&choice) {
        // A reply outside the offered set is treated as a rejection.
        tracing::warn!(?choice, "prompt returned an unoffered decision");
        return TrustDecision::Reject;
    }

    if choice != TrustDecision::AcceptAlways {
        return choice;
    }

    let Some(store) = store.as_deref_mut() else {
        return TrustDecision::Reject;
    };

    let persisted = if classification.errors.is_hostname_mismatch_only() {
        store.append_hostname_override(hostname, cert)
    } else {
        store.append_certificate(cert)
    };

    match persisted {
        Ok(()) => {
            tracing::info!(hostname, "certificate saved to trust store");
            TrustDecision::AcceptAlways
        }
        Err(e) => {
            tracing::warn!(error = %e, "couldn't save certificate; accepting for this session only");
            TrustDecision::AcceptOnce
        }
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
    use crate::classify::CertErrors;
    use crate::test_support::{self_signed, ScriptedUi};

    const HOST: &str = "mail.example.com";

    fn classification(errors: CertErrors) -> Classification {
        Classification {
            errors,
            saved: false,
        }
    }

    fn empty_store(dir: &tempfile::TempDir) -> TrustStore {
        TrustStore::load(dir.path().join("certificates")).unwrap()
    }

    #[test]
    fn test_report_contents() {
        let cert = self_signed(HOST);
        let c = classification(CertErrors {
            not_trusted: true,
            ..CertErrors::default()
        });
        let report = build_report(&cert, &c, 1, 2);

        assert_eq!(report.title, "TLS certificate check (certificate 1 of 2 in chain)");
        assert!(report.rows.iter().any(|r| r.contains(HOST)));
        assert!(report
            .rows
            .iter()
            .any(|r| r.starts_with("SHA1 Fingerprint: ")));
        assert!(report
            .rows
            .iter()
            .any(|r| r == "WARNING: Server certificate is not trusted"));
    }

    #[test]
    fn test_accept_always_offered_for_recoverable_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let cert = self_signed(HOST);
        let c = classification(CertErrors {
            not_trusted: true,
            ..CertErrors::default()
        });
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptAlways]);

        let decision =
            decide_certificate(&cert, &c, 0, 1, HOST, Some(&mut store), &mut ui);
        assert_eq!(decision, TrustDecision::AcceptAlways);
        assert_eq!(ui.offered_counts(), vec![3]);
        assert!(store.contains_certificate(&cert));
    }

    #[test]
    fn test_date_errors_withhold_accept_always() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let cert = self_signed(HOST);
        let c = classification(CertErrors {
            expired: true,
            ..CertErrors::default()
        });
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptOnce]);

        let decision =
            decide_certificate(&cert, &c, 0, 1, HOST, Some(&mut store), &mut ui);
        assert_eq!(decision, TrustDecision::AcceptOnce);
        assert_eq!(ui.offered_counts(), vec![2]);
    }

    #[test]
    fn test_no_store_withholds_accept_always() {
        let cert = self_signed(HOST);
        let c = classification(CertErrors {
            not_trusted: true,
            ..CertErrors::default()
        });
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptOnce]);

        let decision = decide_certificate(&cert, &c, 0, 1, HOST, None, &mut ui);
        assert_eq!(decision, TrustDecision::AcceptOnce);
        assert_eq!(ui.offered_counts(), vec![2]);
    }

    #[test]
    fn test_unoffered_reply_is_rejected() {
        let cert = self_signed(HOST);
        let c = classification(CertErrors {
            revoked: true,
            ..CertErrors::default()
        });
        // AcceptAlways is not offered for revoked certificates.
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptAlways]);

        let decision = decide_certificate(&cert, &c, 0, 1, HOST, None, &mut ui);
        assert_eq!(decision, TrustDecision::Reject);
    }

    #[test]
    fn test_hostname_mismatch_only_persists_override_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let cert = self_signed("something-else.example.net");
        let c = classification(CertErrors {
            hostname_mismatch: true,
            ..CertErrors::default()
        });
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptAlways]);

        let decision =
            decide_certificate(&cert, &c, 0, 1, HOST, Some(&mut store), &mut ui);
        assert_eq!(decision, TrustDecision::AcceptAlways);
        assert!(store.matches_hostname_override(HOST, &cert));
        assert!(!store.contains_certificate(&cert));
    }

    #[test]
    fn test_mixed_errors_persist_certificate_not_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let cert = self_signed("something-else.example.net");
        let c = classification(CertErrors {
            hostname_mismatch: true,
            not_trusted: true,
            ..CertErrors::default()
        });
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptAlways]);

        let decision =
            decide_certificate(&cert, &c, 0, 1, HOST, Some(&mut store), &mut ui);
        assert_eq!(decision, TrustDecision::AcceptAlways);
        assert!(store.contains_certificate(&cert));
        assert!(!store.matches_hostname_override(HOST, &cert));
    }

    #[test]
    fn test_persistence_failure_downgrades_to_accept_once() {
        let mut store = TrustStore::load("/nonexistent-dir/certificates").unwrap();
        let cert = self_signed(HOST);
        let c = classification(CertErrors {
            not_trusted: true,
            ..CertErrors::default()
        });
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptAlways]);

        let decision =
            decide_certificate(&cert, &c, 0, 1, HOST, Some(&mut store), &mut ui);
        assert_eq!(decision, TrustDecision::AcceptOnce);
        assert!(!store.contains_certificate(&cert));
    }

    #[test]
    fn test_reject_passes_through() {
        let cert = self_signed(HOST);
        let c = classification(CertErrors {
            not_trusted: true,
            ..CertErrors::default()
        });
        let mut ui = ScriptedUi::new(vec![TrustDecision::Reject]);
        let decision = decide_certificate(&cert, &c, 0, 1, HOST, None, &mut ui);
        assert_eq!(decision, TrustDecision::Reject);
    }
}
