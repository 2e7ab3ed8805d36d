//! The persisted trust store.
//!
//! A flat, append-only text file holding two shapes of entry:
//!
//! - `#H <hostname> <MD5 fingerprint>` lines — "always trust this hostname
//!   for any certificate with this exact fingerprint", used to override
//!   hostname-mismatch findings. The fingerprint is the legacy display
//!   grouping (uppercase hex, space after every two bytes).
//! - PEM `CERTIFICATE` blocks — "always trust this exact certificate",
//!   matched by DER byte equality.
//!
//! The file is read once at the start of a verification pass and appended to
//! at most once per accepted certificate. Entries are never mutated or
//! deleted by this subsystem.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::{Certificate, Error, Result};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// In-memory view of the trust store file.
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    certificates: Vec<Vec<u8>>,
    hostnames: Vec<(String, String)>,
}

impl TrustStore {
    /// Loads the trust store from `path`.
    ///
    /// A missing file loads as an empty store; it may simply not have been
    /// created yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the file exists but cannot be read.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(Error::Store { path, source }),
        };

        let mut store = Self {
            path,
            certificates: Vec::new(),
            hostnames: Vec::new(),
        };
        store.parse(&text);
        Ok(store)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the exact DER bytes of `cert` are stored.
    #[must_use]
    pub fn contains_certificate(&self, cert: &Certificate) -> bool {
        self.certificates.iter().any(|der| der == cert.der())
    }

    /// Returns true if a stored hostname override matches `hostname` and the
    /// MD5 fingerprint of `cert`.
    ///
    /// Both the hostname and the fingerprint must match exactly,
    /// case-sensitively.
    #[must_use]
    pub fn matches_hostname_override(&self, hostname: &str, cert: &Certificate) -> bool {
        let fingerprint = cert.fingerprint_md5();
        self.hostnames
            .iter()
            .any(|(host, fp)| host == hostname && *fp == fingerprint)
    }

    /// Appends a hostname override for `cert` and records it in memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the file cannot be appended to.
    pub fn append_hostname_override(&mut self, hostname: &str, cert: &Certificate) -> Result<()> {
        let fingerprint = cert.fingerprint_md5();
        self.append_line(&format!("#H {hostname} {fingerprint}\n"))?;
        self.hostnames.push((hostname.to_string(), fingerprint));
        Ok(())
    }

    /// Appends a PEM copy of `cert` and records it in memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the file cannot be appended to.
    pub fn append_certificate(&mut self, cert: &Certificate) -> Result<()> {
        self.append_line(&cert.to_pem())?;
        self.certificates.push(cert.der().to_vec());
        Ok(())
    }

    /// Iterates over the stored certificates' DER bytes.
    ///
    /// The TLS engine seeds its trust roots from these so that a stored CA
    /// certificate also satisfies standard path validation.
    pub fn certificates(&self) -> impl Iterator<Item = &[u8]> {
        self.certificates.iter().map(Vec::as_slice)
    }

    fn append_line(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| Error::Store {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(text.as_bytes()).map_err(|source| Error::Store {
            path: self.path.clone(),
            source,
        })
    }

    fn parse(&mut self, text: &str) {
        let mut pem_block: Option<String> = None;
        for line in text.lines() {
            if let Some(block) = pem_block.as_mut() {
                block.push_str(line);
                block.push('\n');
                if line.trim_end() == PEM_END {
                    if let Some(block) = pem_block.take() {
                        match Certificate::from_pem(&block) {
                            Ok(cert) => self.certificates.push(cert.der().to_vec()),
                            Err(e) => {
                                tracing::debug!(path = %self.path.display(), error = %e,
                                    "skipping unparsable certificate block in trust store");
                            }
                        }
                    }
                }
                continue;
            }

            if line.trim_end() == PEM_BEGIN {
                pem_block = Some(format!("{PEM_BEGIN}\n"));
            } else if let Some(entry) = parse_hostname_line(line) {
                self.hostnames.push(entry);
            }
        }
    }
}

/// Parses a `#H <hostname> <fingerprint>` line.
///
/// The hostname is restricted to `[A-Za-z0-9_.-]` and the fingerprint must
/// be eight space-separated groups of four hex digits. Lines that do not
/// match this shape are inert; the store file stays loadable when it holds
/// comments or entries written by other tools.
fn parse_hostname_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("#H ")?;
    let mut tokens = rest.split_whitespace();
    let host = tokens.next()?;
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return None;
    }

    let groups: Vec<&str> = tokens.collect();
    if groups.len() != 8
        || !groups
            .iter()
            .all(|g| g.len() == 4 && g.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return None;
    }

    Some((host.to_string(), groups.join(" ")))
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
    use crate::test_support::self_signed;

    fn store_with(content: &str) -> (tempfile::TempDir, TrustStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certificates");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let store = TrustStore::load(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::load(dir.path().join("nope")).unwrap();
        assert_eq!(store.certificates().count(), 0);
    }

    #[test]
    fn test_hostname_line_matching() {
        let cert = self_signed("mail.example.com");
        let line = format!("#H mail.example.com {}\n", cert.fingerprint_md5());
        let (_dir, store) = store_with(&line);

        assert!(store.matches_hostname_override("mail.example.com", &cert));
        assert!(!store.matches_hostname_override("mail.example.org", &cert));
        assert!(!store.matches_hostname_override("MAIL.example.com", &cert));
    }

    #[test]
    fn test_hostname_match_requires_exact_fingerprint() {
        let cert = self_signed("mail.example.com");
        let other = self_signed("mail.example.com");
        let line = format!("#H mail.example.com {}\n", other.fingerprint_md5());
        let (_dir, store) = store_with(&line);
        assert!(!store.matches_hostname_override("mail.example.com", &cert));
    }

    #[test]
    fn test_malformed_hostname_lines_are_skipped() {
        let (_dir, store) = store_with(concat!(
            "#H onlyhost\n",
            "#H host 0123 4567\n",
            "#H bad!host 0123 4567 89AB CDEF 0123 4567 89AB CDEF\n",
            "#H host 012G 4567 89AB CDEF 0123 4567 89AB CDEF\n",
            "# a commented line\n",
        ));
        let cert = self_signed("host");
        assert!(!store.matches_hostname_override("host", &cert));
    }

    #[test]
    fn test_certificate_membership() {
        let cert = self_signed("mail.example.com");
        let other = self_signed("mail.example.com");
        let (_dir, store) = store_with(&cert.to_pem());

        assert!(store.contains_certificate(&cert));
        assert!(!store.contains_certificate(&other));
    }

    #[test]
    fn test_mixed_entries_parse_together() {
        let cert = self_signed("mail.example.com");
        let content = format!(
            "#H mail.example.com {}\nsome stray text\n{}",
            cert.fingerprint_md5(),
            cert.to_pem()
        );
        let (_dir, store) = store_with(&content);
        assert!(store.contains_certificate(&cert));
        assert!(store.matches_hostname_override("mail.example.com", &cert));
    }

    #[test]
    fn test_append_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certificates");
        let cert = self_signed("mail.example.com");

        let mut store = TrustStore::load(&path).unwrap();
        store.append_hostname_override("mail.example.com", &cert).unwrap();
        store.append_certificate(&cert).unwrap();
        assert!(store.contains_certificate(&cert));
        assert!(store.matches_hostname_override("mail.example.com", &cert));

        let reloaded = TrustStore::load(&path).unwrap();
        assert!(reloaded.contains_certificate(&cert));
        assert!(reloaded.matches_hostname_override("mail.example.com", &cert));
    }

    #[test]
    fn test_append_to_unwritable_path_fails() {
        let mut store = TrustStore::load("/nonexistent-dir/certificates").unwrap();
        let cert = self_signed("mail.example.com");
        assert!(store.append_certificate(&cert).is_err());
    }
}
