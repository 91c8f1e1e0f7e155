//! Composable package authenticators.
//!
//! An [`Authenticator`] is a capability, not a policy object: it is handed
//! the path to a *local* archive or directory and produces a
//! [`PackageAuthenticationResult`] describing which hashes it just proved
//! trustworthy, and why. [`Authenticator::All`] composes children
//! sequentially and short-circuits on the first error, preserving caller
//! order exactly as required by the concurrency model's ordering
//! guarantees.

pub mod signature;

use std::path::Path;

use crate::hash::{hashes_matching_package, preferred_hashes, Hash, HashDisposition, HashDispositions};
use crate::location::PackageLocation;
use crate::provider::Platform;

pub use signature::{SigningPolicy, SignatureAuthenticator};

/// Errors an [`Authenticator`] can raise. Every variant carries the exact
/// user-facing phrasing required of it; composition (`All`) never rewrites
/// a child's error, it only decides whether to keep evaluating.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("no supported checksum formats")]
    NoSupportedChecksum,

    #[error("checksum list has unexpected SHA-256 hash {actual} for file {filename} (expected {expected})")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("archive does not match any of the checksums previously recorded in the dependency lock file")]
    NoMatchingHash,

    #[error("checksum list has no entry for file {filename}")]
    MissingSumsLine { filename: String },

    #[error("provider is not signed with a valid signing key; please contact the provider author")]
    UnknownSigningKey,

    #[error("signing key has expired")]
    ExpiredSigningKey,

    #[error("this authenticator only applies to LocalArchive locations")]
    WrongLocationKind,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Summary category of a [`PackageAuthenticationResult`], ordered by trust:
/// `Signed > SigningSkipped > VerifiedChecksum > Unauthenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthenticationSummary {
    Unauthenticated,
    VerifiedChecksum,
    SigningSkipped,
    Signed,
}

impl std::fmt::Display for AuthenticationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthenticationSummary::Unauthenticated => "unauthenticated",
            AuthenticationSummary::VerifiedChecksum => "verified_checksum",
            AuthenticationSummary::SigningSkipped => "signing_skipped",
            AuthenticationSummary::Signed => "signed",
        };
        f.write_str(s)
    }
}

/// The output of running an [`Authenticator`]: every hash it was able to
/// establish trust for, plus whether signature enforcement was explicitly
/// (and knowingly) skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageAuthenticationResult {
    pub hashes: HashDispositions,
    pub signing_skipped: bool,
}

impl PackageAuthenticationResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(hash: Hash, disposition: HashDisposition) -> Self {
        PackageAuthenticationResult {
            hashes: HashDispositions::single(hash, disposition),
            signing_skipped: false,
        }
    }

    pub fn signing_skipped() -> Self {
        PackageAuthenticationResult {
            hashes: HashDispositions::new(),
            signing_skipped: true,
        }
    }

    pub fn merge(&self, other: &PackageAuthenticationResult) -> PackageAuthenticationResult {
        PackageAuthenticationResult {
            hashes: self.hashes.merge(&other.hashes),
            signing_skipped: self.signing_skipped || other.signing_skipped,
        }
    }

    /// Priority: `signed > signing_skipped > verified_checksum > unauthenticated`.
    pub fn summary(&self) -> AuthenticationSummary {
        let signed = self
            .hashes
            .iter()
            .any(|(_, d)| !d.signed_by_gpg_key_ids.is_empty());
        if signed {
            return AuthenticationSummary::Signed;
        }
        if self.signing_skipped {
            return AuthenticationSummary::SigningSkipped;
        }
        let verified = self.hashes.iter().any(|(_, d)| d.verified_locally);
        if verified {
            return AuthenticationSummary::VerifiedChecksum;
        }
        AuthenticationSummary::Unauthenticated
    }
}

/// A composable verification capability.
#[derive(Debug, Clone)]
pub enum Authenticator {
    /// Sequential composition; aborts on the first child error.
    All(Vec<Authenticator>),
    /// Computes the package's content hash and requires a match among
    /// `required` (the scheme-recognized subset of `all`).
    PackageHash {
        platform: Option<Platform>,
        all: Vec<Hash>,
        required: Vec<Hash>,
    },
    /// Only valid against `LocalArchive`; recomputes the archive's SHA-256.
    ArchiveChecksum { want_sha256: String },
    /// Scans a SHA256SUMS-shaped document for `filename`'s line and
    /// compares it to `want_sha256`. Deliberately contributes no
    /// standalone disposition on success -- compose with `Signature`.
    MatchingChecksum {
        document: String,
        filename: String,
        want_sha256: String,
    },
    /// Verifies a detached OpenPGP signature over `document`, then
    /// extracts every SHA256SUMS-shaped line from it as a
    /// registry-reported, signed hash.
    Signature(SignatureAuthenticator),
}

impl Authenticator {
    pub fn package_hash(platform: Option<Platform>, candidates: Vec<Hash>) -> Self {
        let required = preferred_hashes(candidates.clone());
        Authenticator::PackageHash {
            platform,
            all: candidates,
            required,
        }
    }

    /// Run this authenticator against a local path (archive file or
    /// directory, matching the location kind the authenticator expects).
    pub fn authenticate(
        &self,
        local_path: &Path,
    ) -> Result<Option<PackageAuthenticationResult>, AuthenticationError> {
        match self {
            Authenticator::All(children) => {
                let mut acc: Option<PackageAuthenticationResult> = None;
                for child in children {
                    if let Some(result) = child.authenticate(local_path)? {
                        acc = Some(match acc {
                            Some(existing) => existing.merge(&result),
                            None => result,
                        });
                    }
                }
                Ok(acc)
            }
            Authenticator::PackageHash {
                required, ..
            } => {
                if required.is_empty() {
                    return Err(AuthenticationError::NoSupportedChecksum);
                }
                let loc = location_for_path(local_path);
                let found = hashes_matching_package(&loc, required.clone()).next();
                match found {
                    Some(hash) => Ok(Some(PackageAuthenticationResult::single(
                        hash,
                        HashDisposition::verified_locally(),
                    ))),
                    None => Err(AuthenticationError::NoMatchingHash),
                }
            }
            Authenticator::ArchiveChecksum { want_sha256 } => {
                let loc = PackageLocation::local_archive(local_path);
                let actual = crate::hash::package_hash_legacy_zip(&loc)
                    .map_err(|e| AuthenticationError::Other(anyhow::anyhow!(e)))?;
                let want_hash = Hash::parse(&format!("zh:{}", want_sha256.to_lowercase()))
                    .map_err(|e| AuthenticationError::Other(anyhow::anyhow!(e)))?;
                if actual != want_hash {
                    return Err(AuthenticationError::ChecksumMismatch {
                        filename: local_path.display().to_string(),
                        expected: want_sha256.clone(),
                        actual: actual.value().to_string(),
                    });
                }
                Ok(Some(PackageAuthenticationResult::single(
                    actual,
                    HashDisposition::verified_locally(),
                )))
            }
            Authenticator::MatchingChecksum {
                document,
                filename,
                want_sha256,
            } => {
                matching_checksum(document, filename, want_sha256)?;
                Ok(None)
            }
            Authenticator::Signature(sig) => sig.authenticate().map(Some),
        }
    }
}

fn location_for_path(path: &Path) -> PackageLocation {
    if path.is_dir() {
        PackageLocation::local_dir(path)
    } else {
        PackageLocation::local_archive(path)
    }
}

/// Scan a newline-separated SHA256SUMS-shaped document: each valid line is
/// `"<64-lowercase-hex>  <filename>"`. Find the line for `filename`,
/// compare its hex digest to `want_sha256`. Fails on mismatch or a missing
/// line; any line that doesn't match the shape is simply skipped.
pub fn matching_checksum(
    document: &str,
    filename: &str,
    want_sha256: &str,
) -> Result<(), AuthenticationError> {
    let want = want_sha256.to_lowercase();
    for line in document.lines() {
        if let Some((hex_digest, name)) = parse_sums_line(line) {
            if name == filename {
                if hex_digest == want {
                    return Ok(());
                }
                return Err(AuthenticationError::ChecksumMismatch {
                    filename: filename.to_string(),
                    expected: want,
                    actual: hex_digest,
                });
            }
        }
    }
    Err(AuthenticationError::MissingSumsLine {
        filename: filename.to_string(),
    })
}

/// Parse one `SHA256SUMS` line, returning `(lowercase hex digest, filename)`
/// only when the first field is exactly 64 lowercase hex characters.
pub fn parse_sums_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let digest = parts.next()?;
    let rest = parts.next()?.trim_start();
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return None;
    }
    if rest.is_empty() {
        return None;
    }
    Some((digest.to_string(), rest.to_string()))
}

/// Every `zh:<hex>` hash declared by a SHA256SUMS-shaped document, keyed to
/// filename. Returns an empty vec (not an error) if no line matches the
/// shape -- the document is then treated as "not a sums file".
pub fn hashes_in_sums_document(document: &str) -> Vec<(String, Hash)> {
    document
        .lines()
        .filter_map(|line| {
            parse_sums_line(line).and_then(|(digest, filename)| {
                Hash::parse(&format!("zh:{digest}")).ok().map(|h| (filename, h))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMS_DOC: &str = "decade00000000000000000000000000000000000000000000000000000000  my-package.zip\nc0ffee0000000000000000000000000000000000000000000000000000000a  README.txt\n";

    #[test]
    fn matching_checksum_succeeds_silently() {
        let result = matching_checksum(
            SUMS_DOC,
            "my-package.zip",
            "decade00000000000000000000000000000000000000000000000000000000",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn matching_checksum_fails_on_mismatch() {
        let err = matching_checksum(
            SUMS_DOC,
            "my-package.zip",
            "beef000000000000000000000000000000000000000000000000000000000",
        )
        .unwrap_err();
        assert!(matches!(err, AuthenticationError::ChecksumMismatch { .. }));
        assert!(err.to_string().contains("unexpected SHA-256 hash"));
    }

    #[test]
    fn matching_checksum_fails_when_filename_absent() {
        let err = matching_checksum(SUMS_DOC, "missing.zip", "decade").unwrap_err();
        assert!(matches!(err, AuthenticationError::MissingSumsLine { .. }));
    }

    #[test]
    fn hashes_in_sums_document_ignores_malformed_lines() {
        let doc = "not-a-hash-line\n\nc0ffee00000000000000000000000000000000000000000000000000000000  file.zip\n";
        let hashes = hashes_in_sums_document(doc);
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].0, "file.zip");
        assert!(hashes[0].1.to_string().starts_with("zh:c0ffee"));
    }

    #[test]
    fn summary_priority_signed_beats_everything() {
        let mut hashes = HashDispositions::new();
        hashes.insert(
            Hash::parse("zh:aaa").unwrap(),
            HashDisposition::reported_by_registry(["key1".to_string()]),
        );
        let result = PackageAuthenticationResult {
            hashes,
            signing_skipped: false,
        };
        assert_eq!(result.summary(), AuthenticationSummary::Signed);
    }

    #[test]
    fn summary_priority_signing_skipped_beats_verified_checksum() {
        let mut hashes = HashDispositions::new();
        hashes.insert(Hash::parse("zh:aaa").unwrap(), HashDisposition::verified_locally());
        let result = PackageAuthenticationResult {
            hashes,
            signing_skipped: true,
        };
        assert_eq!(result.summary(), AuthenticationSummary::SigningSkipped);
    }

    #[test]
    fn summary_priority_verified_checksum_beats_unauthenticated() {
        let mut hashes = HashDispositions::new();
        hashes.insert(Hash::parse("zh:aaa").unwrap(), HashDisposition::verified_locally());
        let result = PackageAuthenticationResult {
            hashes,
            signing_skipped: false,
        };
        assert_eq!(result.summary(), AuthenticationSummary::VerifiedChecksum);
    }

    #[test]
    fn summary_unauthenticated_when_empty() {
        assert_eq!(
            PackageAuthenticationResult::empty().summary(),
            AuthenticationSummary::Unauthenticated
        );
    }

    #[test]
    fn package_hash_authenticator_fails_when_required_is_empty() {
        let auth = Authenticator::package_hash(None, vec![Hash::parse("h0:unsupported").unwrap()]);
        let tmp = tempfile::TempDir::new().unwrap();
        let err = auth.authenticate(tmp.path()).unwrap_err();
        assert!(matches!(err, AuthenticationError::NoSupportedChecksum));
    }

    #[test]
    fn all_short_circuits_on_first_error() {
        let auth = Authenticator::All(vec![
            Authenticator::package_hash(None, vec![Hash::parse("h0:unsupported").unwrap()]),
            Authenticator::ArchiveChecksum {
                want_sha256: "deadbeef".to_string(),
            },
        ]);
        let tmp = tempfile::TempDir::new().unwrap();
        let err = auth.authenticate(tmp.path()).unwrap_err();
        assert!(matches!(err, AuthenticationError::NoSupportedChecksum));
    }
}
