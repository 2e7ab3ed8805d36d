//! Chain trust resolution.
//!
//! The resolver walks a peer's certificate chain twice. A pre-authentication
//! pass (end-entity upward) classifies every position and accepts the chain
//! outright when nothing needs attention or a stored certificate settles it.
//! Otherwise an interactive pass (root downward) asks the user about each
//! failing position, re-verifying the chain after every newly trusted
//! signer so one accepted root can settle the rest of the walk.
//!
//! A pass always terminates in overall acceptance or overall rejection; no
//! partially-accepted chain state survives the call.

use chrono::{DateTime, Utc};

use crate::classify::{classify, Classification, ClassifyContext, VerifyPolicy};
use crate::prompt::{decide_certificate, PromptUi, TrustDecision};
use crate::store::TrustStore;
use crate::verify::{ChainStatus, ChainVerifier};
use crate::{Certificate, Error, Result};

/// Outcome of an accepted chain verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainVerdict {
    /// How many interactive decisions were needed.
    pub prompts: usize,
}

/// Resolves trust for one certificate chain.
///
/// Borrows everything it needs for exactly one verification pass; nothing is
/// carried across connections except what the trust store persists.
pub struct ChainResolver<'a, V, U>
where
    V: ChainVerifier,
    U: PromptUi,
{
    verifier: &'a mut V,
    ui: &'a mut U,
    store: Option<&'a mut TrustStore>,
    policy: VerifyPolicy,
    hostname: &'a str,
}

impl<'a, V, U> ChainResolver<'a, V, U>
where
    V: ChainVerifier,
    U: PromptUi,
{
    /// Creates a resolver for one verification pass.
    pub fn new(
        verifier: &'a mut V,
        ui: &'a mut U,
        store: Option<&'a mut TrustStore>,
        policy: VerifyPolicy,
        hostname: &'a str,
    ) -> Self {
        Self {
            verifier,
            ui,
            store,
            policy,
            hostname,
        }
    }

    /// Resolves trust for `chain` (end-entity first).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPeerCertificate`] for an empty chain and
    /// [`Error::CertificateRejected`] when the user rejects any position.
    pub fn resolve(&mut self, chain: &[Certificate]) -> Result<ChainVerdict> {
        if chain.is_empty() {
            return Err(Error::NoPeerCertificate);
        }

        let now = Utc::now();
        let mut status = self.verifier.verify_chain(chain);
        tracing::debug!(chain_len = chain.len(), ?status, "verifying certificate chain");

        // Pre-authentication pass, most specific first. A stored certificate
        // settles the whole chain if nothing has failed so far.
        let mut failures = 0usize;
        let mut peer_ok = false;
        let mut saved_with_failures = false;
        for (position, cert) in chain.iter().enumerate() {
            let c = self.classify_at(cert, &status, position, now);
            let failed = c.requires_user_decision();
            if failed {
                failures += 1;
            }
            if position == 0 {
                peer_ok = !failed;
            }
            if c.saved {
                if failures == 0 {
                    tracing::debug!(position, "stored certificate match, chain accepted");
                    return Ok(ChainVerdict { prompts: 0 });
                }
                saved_with_failures = true;
                break;
            }
        }
        if !saved_with_failures && failures == 0 {
            tracing::debug!("certificate chain verified");
            return Ok(ChainVerdict { prompts: 0 });
        }

        // Interactive pass, chain root first. Positions that classify VALID
        // under the current status are skipped silently.
        let mut prompts = 0usize;
        for position in (0..chain.len()).rev() {
            let cert = &chain[position];
            let c = self.classify_at(cert, &status, position, now);
            if !c.requires_user_decision() {
                continue;
            }

            prompts += 1;
            let decision = decide_certificate(
                cert,
                &c,
                position,
                chain.len(),
                self.hostname,
                self.store.as_deref_mut(),
                self.ui,
            );
            match decision {
                TrustDecision::Reject => {
                    tracing::debug!(position, "certificate rejected by user");
                    return Err(Error::CertificateRejected);
                }
                TrustDecision::AcceptOnce => {}
                TrustDecision::AcceptAlways if position > 0 => {
                    // The user chose to trust a signer; let the engine use it
                    // and re-verify the whole chain.
                    if let Err(e) = self.verifier.add_trusted_signer(cert) {
                        tracing::debug!(position, error = %e, "error trusting certificate");
                    }
                    status = self.verifier.verify_chain(chain);
                    if status.is_clean() && peer_ok {
                        tracing::debug!(position, "chain verifies after trusting signer");
                        return Ok(ChainVerdict { prompts });
                    }
                }
                TrustDecision::AcceptAlways => {}
            }
        }

        Ok(ChainVerdict { prompts })
    }

    fn classify_at(
        &self,
        cert: &Certificate,
        status: &ChainStatus,
        position: usize,
        now: DateTime<Utc>,
    ) -> Classification {
        let ctx = ClassifyContext {
            hostname: self.hostname,
            policy: self.policy,
            store: self.store.as_deref(),
            now,
        };
        classify(cert, status, position, &*self.verifier, &ctx)
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
    use crate::test_support::{
        ca_and_leaf, self_signed, self_signed_with_validity, MockVerifier, ScriptedUi,
    };
    use crate::verify::ChainStatusFlag;

    const HOST: &str = "mail.example.com";

    fn resolve_with(
        verifier: &mut MockVerifier,
        ui: &mut ScriptedUi,
        store: Option<&mut TrustStore>,
        chain: &[Certificate],
    ) -> Result<ChainVerdict> {
        ChainResolver::new(verifier, ui, store, VerifyPolicy::default(), HOST).resolve(chain)
    }

    fn empty_store(dir: &tempfile::TempDir) -> TrustStore {
        TrustStore::load(dir.path().join("certificates")).unwrap()
    }

    fn store_containing(dir: &tempfile::TempDir, cert: &Certificate) -> TrustStore {
        let mut store = empty_store(dir);
        store.append_certificate(cert).unwrap();
        store
    }

    #[test]
    fn test_empty_chain_is_an_error() {
        let mut verifier = MockVerifier::accepting_hostname();
        let mut ui = ScriptedUi::new(vec![]);
        let result = resolve_with(&mut verifier, &mut ui, None, &[]);
        assert!(matches!(result, Err(Error::NoPeerCertificate)));
    }

    #[test]
    fn test_clean_self_signed_chain_accepts_without_prompts() {
        // Chain length 1, all status bits clear, hostname matches, dates valid.
        let chain = [self_signed(HOST)];
        let mut verifier = MockVerifier::accepting_hostname();
        let mut ui = ScriptedUi::new(vec![]);

        let verdict = resolve_with(&mut verifier, &mut ui, None, &chain).unwrap();
        assert_eq!(verdict.prompts, 0);
        assert_eq!(ui.prompt_count(), 0);
    }

    #[test]
    fn test_clean_two_cert_chain_accepts_without_prompts() {
        let (ca, leaf) = ca_and_leaf("Example Root", HOST);
        let chain = [leaf, ca];
        let mut verifier = MockVerifier::accepting_hostname();
        let mut ui = ScriptedUi::new(vec![]);

        let verdict = resolve_with(&mut verifier, &mut ui, None, &chain).unwrap();
        assert_eq!(verdict.prompts, 0);
        assert_eq!(ui.prompt_count(), 0);
    }

    #[test]
    fn test_saved_leaf_short_circuits_untrusted_chain() {
        let dir = tempfile::tempdir().unwrap();
        let chain = [self_signed(HOST)];
        let mut store = store_containing(&dir, &chain[0]);
        let mut verifier =
            MockVerifier::with_status(ChainStatus::with_flags([ChainStatusFlag::NotTrusted]));
        let mut ui = ScriptedUi::new(vec![]);

        let verdict = resolve_with(&mut verifier, &mut ui, Some(&mut store), &chain).unwrap();
        assert_eq!(verdict.prompts, 0);
        assert_eq!(ui.prompt_count(), 0);
    }

    #[test]
    fn test_reject_fails_resolution() {
        let chain = [self_signed(HOST)];
        let mut verifier =
            MockVerifier::with_status(ChainStatus::with_flags([ChainStatusFlag::NotTrusted]));
        let mut ui = ScriptedUi::new(vec![TrustDecision::Reject]);

        let result = resolve_with(&mut verifier, &mut ui, None, &chain);
        assert!(matches!(result, Err(Error::CertificateRejected)));
    }

    #[test]
    fn test_reject_at_root_fails_whole_chain() {
        let (ca, leaf) = ca_and_leaf("Example Root", HOST);
        let chain = [leaf, ca];
        let mut verifier =
            MockVerifier::with_status(ChainStatus::with_flags([ChainStatusFlag::NotTrusted]));
        // The root is presented first; rejecting it must end everything.
        let mut ui = ScriptedUi::new(vec![TrustDecision::Reject]);

        let result = resolve_with(&mut verifier, &mut ui, None, &chain);
        assert!(matches!(result, Err(Error::CertificateRejected)));
        assert_eq!(ui.prompt_count(), 1);
    }

    #[test]
    fn test_accept_always_on_root_settles_leaf() {
        // Leaf signed by an untrusted root; trusting the root re-verifies
        // clean, so the leaf is never prompted for.
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let (ca, leaf) = ca_and_leaf("Example Root", HOST);
        let chain = [leaf, ca];
        let mut verifier = MockVerifier::resolving_after_trust(
            ChainStatus::with_flags([ChainStatusFlag::NotTrusted]),
            ChainStatus::clean(),
        );
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptAlways]);

        let verdict =
            resolve_with(&mut verifier, &mut ui, Some(&mut store), &chain).unwrap();
        assert_eq!(verdict.prompts, 1);
        assert_eq!(ui.prompt_count(), 1);
        assert_eq!(verifier.added, vec![chain[1].der().to_vec()]);
        assert!(store.contains_certificate(&chain[1]));
    }

    #[test]
    fn test_accept_once_does_not_trust_signer() {
        let (ca, leaf) = ca_and_leaf("Example Root", HOST);
        let chain = [leaf, ca];
        let mut verifier = MockVerifier::resolving_after_trust(
            ChainStatus::with_flags([ChainStatusFlag::NotTrusted]),
            ChainStatus::clean(),
        );
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptOnce, TrustDecision::AcceptOnce]);

        let verdict = resolve_with(&mut verifier, &mut ui, None, &chain).unwrap();
        assert_eq!(verdict.prompts, 2);
        assert!(verifier.added.is_empty());
    }

    #[test]
    fn test_trust_failure_falls_back_to_prompting_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let (ca, leaf) = ca_and_leaf("Example Root", HOST);
        let chain = [leaf, ca];
        let mut verifier = MockVerifier::failing_trust(ChainStatus::with_flags([
            ChainStatusFlag::NotTrusted,
        ]));
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptAlways, TrustDecision::AcceptOnce]);

        let verdict =
            resolve_with(&mut verifier, &mut ui, Some(&mut store), &chain).unwrap();
        // Trusting the root failed inside the engine, so the status never
        // cleared and the leaf still needed its own decision.
        assert_eq!(verdict.prompts, 2);
    }

    #[test]
    fn test_hostname_mismatch_resolved_interactively() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let chain = [self_signed("something-else.example.net")];
        let mut verifier = MockVerifier::rejecting_hostname();
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptAlways]);

        let verdict =
            resolve_with(&mut verifier, &mut ui, Some(&mut store), &chain).unwrap();
        assert_eq!(verdict.prompts, 1);
        assert!(store.matches_hostname_override(HOST, &chain[0]));
        // The next connection's pre-auth pass now passes silently.
        let mut ui = ScriptedUi::new(vec![]);
        let verdict =
            resolve_with(&mut verifier, &mut ui, Some(&mut store), &chain).unwrap();
        assert_eq!(verdict.prompts, 0);
    }

    #[test]
    fn test_expired_leaf_must_be_accepted_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let leaf = self_signed_with_validity(
            HOST,
            rcgen::date_time_ymd(2000, 1, 1),
            rcgen::date_time_ymd(2001, 1, 1),
        );
        let mut store = store_containing(&dir, &leaf);
        let chain = [leaf];
        let mut verifier = MockVerifier::accepting_hostname();
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptOnce]);

        let verdict =
            resolve_with(&mut verifier, &mut ui, Some(&mut store), &chain).unwrap();
        // Stored or not, an expired certificate is prompted for, and only
        // reject / accept-once are offered.
        assert_eq!(verdict.prompts, 1);
        assert_eq!(ui.offered_counts(), vec![2]);
    }
}
