//! Chain verification status and the engine seam.
//!
//! The TLS engine reports its findings for a whole chain as a set of
//! [`ChainStatusFlag`]s. The set is deliberately an enumerated collection
//! rather than a raw bitset: the classifier consumes the flags it recognizes
//! one by one, and anything left over is escalated instead of ignored.

use std::collections::BTreeSet;

use crate::{Certificate, Result};

/// One finding from the engine's chain verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChainStatusFlag {
    /// A certificate in the chain has been revoked.
    Revoked,
    /// The chain does not lead to a trusted signer.
    NotTrusted,
    /// A signer in the chain is not a CA.
    SignerNotCa,
    /// The chain uses an insecure signature algorithm.
    InsecureAlgorithm,
    /// A finding this policy layer does not recognize.
    Unknown,
}

/// The engine's verification result for a whole chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStatus {
    flags: BTreeSet<ChainStatusFlag>,
}

impl ChainStatus {
    /// A status with no findings.
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }

    /// A status containing the given findings.
    #[must_use]
    pub fn with_flags(flags: impl IntoIterator<Item = ChainStatusFlag>) -> Self {
        Self {
            flags: flags.into_iter().collect(),
        }
    }

    /// Adds a finding.
    pub fn insert(&mut self, flag: ChainStatusFlag) {
        self.flags.insert(flag);
    }

    /// Returns true when the engine reported no findings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }

    /// Returns true if the given finding is present.
    #[must_use]
    pub fn contains(&self, flag: ChainStatusFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Removes and reports the given finding, consuming it from the working
    /// set.
    pub fn take(&mut self, flag: ChainStatusFlag) -> bool {
        self.flags.remove(&flag)
    }

    /// Iterates over the remaining findings.
    pub fn iter(&self) -> impl Iterator<Item = ChainStatusFlag> + '_ {
        self.flags.iter().copied()
    }
}

/// The narrow seam to the external TLS engine's certificate capability.
///
/// Implementations own standard path validation (signatures, chain shape,
/// trust anchors); hostname and date policy stay with the classifier, so
/// `verify_chain` must not fail a chain for those reasons alone.
pub trait ChainVerifier {
    /// Verifies the whole chain (end-entity first) against the engine's
    /// current trust set.
    fn verify_chain(&self, chain: &[Certificate]) -> ChainStatus;

    /// Tests the end-entity certificate's embedded identity against the
    /// requested hostname.
    fn matches_hostname(&self, end_entity: &Certificate, hostname: &str) -> bool;

    /// Adds a certificate to the engine's working trust set so a subsequent
    /// [`ChainVerifier::verify_chain`] can succeed.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the certificate as a trust
    /// anchor.
    fn add_trusted_signer(&mut self, cert: &Certificate) -> Result<()>;
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
    fn test_clean_status() {
        let status = ChainStatus::clean();
        assert!(status.is_clean());
        assert!(!status.contains(ChainStatusFlag::Revoked));
    }

    #[test]
    fn test_take_consumes_flag() {
        let mut status =
            ChainStatus::with_flags([ChainStatusFlag::Revoked, ChainStatusFlag::NotTrusted]);
        assert!(status.take(ChainStatusFlag::Revoked));
        assert!(!status.take(ChainStatusFlag::Revoked));
        assert!(!status.is_clean());
        assert!(status.take(ChainStatusFlag::NotTrusted));
        assert!(status.is_clean());
    }

    #[test]
    fn test_duplicate_insert_is_one_flag() {
        let mut status = ChainStatus::clean();
        status.insert(ChainStatusFlag::Unknown);
        status.insert(ChainStatusFlag::Unknown);
        assert_eq!(status.iter().count(), 1);
    }
}
