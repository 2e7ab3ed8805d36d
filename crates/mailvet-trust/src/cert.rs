//! Certificate accessors for the trust policy layer.
//!
//! A [`Certificate`] owns the DER bytes presented by the peer and exposes the
//! handful of views the policy layer needs: subject and issuer identity,
//! validity window, PEM encoding, and fingerprints. Chain-path math stays
//! with the TLS engine; this type never verifies anything.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;
use x509_parser::prelude::*;

use crate::{Error, Result};

/// Identity fields extracted from a subject or issuer distinguished name.
///
/// Every field is optional; real-world certificates routinely omit most of
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertIdentity {
    /// Common name (CN).
    pub common_name: Option<String>,
    /// Email address (PKCS#9 emailAddress).
    pub email: Option<String>,
    /// Organization (O).
    pub organization: Option<String>,
    /// Organizational unit (OU).
    pub organizational_unit: Option<String>,
    /// Locality (L).
    pub locality: Option<String>,
    /// State or province (ST).
    pub province: Option<String>,
    /// Country (C).
    pub country: Option<String>,
}

impl CertIdentity {
    fn from_name(name: &X509Name<'_>) -> Self {
        Self {
            common_name: first_attr(name.iter_common_name()),
            email: first_attr(name.iter_email()),
            organization: first_attr(name.iter_organization()),
            organizational_unit: first_attr(name.iter_organizational_unit()),
            locality: first_attr(name.iter_locality()),
            province: first_attr(name.iter_state_or_province()),
            country: first_attr(name.iter_country()),
        }
    }
}

fn first_attr<'a, I>(mut iter: I) -> Option<String>
where
    I: Iterator<Item = &'a AttributeTypeAndValue<'a>>,
{
    iter.next()
        .and_then(|attr| attr.as_str().ok())
        .map(ToOwned::to_owned)
}

/// One certificate from a peer's chain.
///
/// Identity and validity fields are extracted eagerly at construction so the
/// rest of the policy layer never has to handle parse failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    subject: CertIdentity,
    issuer: CertIdentity,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl Certificate {
    /// Parses a certificate from DER bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CertificateParse`] if the bytes are not a valid
    /// X.509 certificate.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
        let der = der.into();
        let (_, parsed) = parse_x509_certificate(&der)
            .map_err(|e| Error::CertificateParse(e.to_string()))?;

        let subject = CertIdentity::from_name(parsed.subject());
        let issuer = CertIdentity::from_name(parsed.issuer());
        let not_before = timestamp_to_utc(parsed.validity().not_before.timestamp());
        let not_after = timestamp_to_utc(parsed.validity().not_after.timestamp());

        Ok(Self {
            der,
            subject,
            issuer,
            not_before,
            not_after,
        })
    }

    /// Parses a certificate from a PEM `CERTIFICATE` block.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid PEM or the contents are not
    /// a valid certificate.
    pub fn from_pem(text: &str) -> Result<Self> {
        let block = ::pem::parse(text)?;
        if block.tag() != "CERTIFICATE" {
            return Err(Error::CertificateParse(format!(
                "expected CERTIFICATE block, found {}",
                block.tag()
            )));
        }
        Self::from_der(block.into_contents())
    }

    /// The raw DER bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Encodes the certificate as a PEM `CERTIFICATE` block.
    #[must_use]
    pub fn to_pem(&self) -> String {
        ::pem::encode(&::pem::Pem::new("CERTIFICATE", self.der.clone()))
    }

    /// Subject identity fields.
    #[must_use]
    pub const fn subject(&self) -> &CertIdentity {
        &self.subject
    }

    /// Issuer identity fields.
    #[must_use]
    pub const fn issuer(&self) -> &CertIdentity {
        &self.issuer
    }

    /// Start of the validity window.
    #[must_use]
    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity window.
    #[must_use]
    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// MD5 fingerprint of the DER bytes in display grouping.
    ///
    /// MD5 survives here purely as the legacy identity key of the trust
    /// store's hostname-override lines; it carries no security claim.
    #[must_use]
    pub fn fingerprint_md5(&self) -> String {
        format_fingerprint(&Md5::digest(&self.der))
    }

    /// SHA-1 fingerprint of the DER bytes in display grouping.
    #[must_use]
    pub fn fingerprint_sha1(&self) -> String {
        format_fingerprint(&Sha1::digest(&self.der))
    }

    /// SHA-256 fingerprint of the DER bytes in display grouping.
    #[must_use]
    pub fn fingerprint_sha256(&self) -> String {
        format_fingerprint(&Sha256::digest(&self.der))
    }
}

fn timestamp_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Renders a digest as uppercase hex with a space after every two bytes and
/// no trailing space, e.g. `0123 4567 89AB CDEF`.
pub(crate) fn format_fingerprint(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2 + digest.len() / 2);
    for (i, byte) in digest.iter().enumerate() {
        if i > 0 && i % 2 == 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
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
    use proptest::prelude::*;

    use super::*;
    use crate::test_support::{self_signed, self_signed_with_validity};

    #[test]
    fn test_subject_fields() {
        let cert = self_signed("mail.example.com");
        assert_eq!(
            cert.subject().common_name.as_deref(),
            Some("mail.example.com")
        );
        assert_eq!(cert.issuer().common_name.as_deref(), Some("mail.example.com"));
    }

    #[test]
    fn test_validity_window() {
        let cert = self_signed_with_validity(
            "mail.example.com",
            rcgen::date_time_ymd(2020, 1, 1),
            rcgen::date_time_ymd(2030, 1, 1),
        );
        assert_eq!(cert.not_before().format("%Y-%m-%d").to_string(), "2020-01-01");
        assert_eq!(cert.not_after().format("%Y-%m-%d").to_string(), "2030-01-01");
    }

    #[test]
    fn test_pem_round_trip() {
        let cert = self_signed("mail.example.com");
        let pem = cert.to_pem();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
        let back = Certificate::from_pem(&pem).unwrap();
        assert_eq!(back.der(), cert.der());
    }

    #[test]
    fn test_from_pem_rejects_other_tags() {
        let block = ::pem::encode(&::pem::Pem::new("PRIVATE KEY", vec![1, 2, 3]));
        assert!(Certificate::from_pem(&block).is_err());
    }

    #[test]
    fn test_from_der_rejects_garbage() {
        assert!(Certificate::from_der(vec![0u8; 16]).is_err());
    }

    #[test]
    fn test_md5_fingerprint_shape() {
        let cert = self_signed("mail.example.com");
        let fp = cert.fingerprint_md5();
        let groups: Vec<&str> = fp.split(' ').collect();
        assert_eq!(groups.len(), 8);
        assert!(groups.iter().all(|g| g.len() == 4));
    }

    #[test]
    fn test_fingerprint_known_value() {
        // MD5("") = D41D8CD98F00B204E9800998ECF8427E
        assert_eq!(
            format_fingerprint(&Md5::digest(b"")),
            "D41D 8CD9 8F00 B204 E980 0998 ECF8 427E"
        );
    }

    proptest! {
        #[test]
        fn prop_fingerprint_grouping(bytes in proptest::collection::vec(any::<u8>(), 1..64)) {
            let rendered = format_fingerprint(&bytes);
            prop_assert!(!rendered.ends_with(' '));
            prop_assert!(rendered
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase() || c == ' '));
            let spaces = rendered.chars().filter(|c| *c == ' ').count();
            prop_assert_eq!(spaces, (bytes.len() - 1) / 2);
            prop_assert_eq!(rendered.len(), bytes.len() * 2 + spaces);
        }
    }
}
