//! OpenPGP detached-signature verification.
//!
//! Verifies `document` against `signature` using the first of `keys` that
//! actually validates. Enforcement policy (whether an unsigned/unverifiable
//! package is tolerated) and expired-key tolerance are both environment-
//! driven in the original tool; here they're captured in [`SigningPolicy`]
//! so tests can construct a policy without touching real process
//! environment variables.

use pgp::types::{KeyTrait, PublicKeyTrait};
use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};
use tracing::warn;

use super::{hashes_in_sums_document, AuthenticationError, PackageAuthenticationResult};
use crate::hash::HashDisposition;

/// Environment-variable names recognized for signature/expiration policy
/// (spec §6).
pub mod env {
    pub const ENFORCE_GPG_VALIDATION: &str = "PROVIDER_ENFORCE_GPG_VALIDATION";
    pub const ENFORCE_GPG_EXPIRATION: &str = "PROVIDER_ENFORCE_GPG_EXPIRATION";
}

/// The default registry host for which signature enforcement is skipped
/// when no signing keys are supplied.
pub const DEFAULT_REGISTRY_HOSTNAME: &str = "registry.opentofu.org";

/// Signing enforcement policy, read once from the environment (or
/// constructed directly in tests) rather than consulted ad hoc.
#[derive(Debug, Clone, Copy)]
pub struct SigningPolicy {
    pub enforce_on_default_registry: bool,
    pub enforce_key_expiration: bool,
}

impl SigningPolicy {
    pub fn from_env() -> Self {
        SigningPolicy {
            enforce_on_default_registry: env_flag(env::ENFORCE_GPG_VALIDATION),
            enforce_key_expiration: env_flag(env::ENFORCE_GPG_EXPIRATION),
        }
    }

    pub fn permissive() -> Self {
        SigningPolicy {
            enforce_on_default_registry: false,
            enforce_key_expiration: false,
        }
    }

    pub fn strict() -> Self {
        SigningPolicy {
            enforce_on_default_registry: true,
            enforce_key_expiration: true,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true")
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct SignatureAuthenticator {
    /// The signed document (typically a SHA256SUMS file's bytes).
    pub document: Vec<u8>,
    /// The ASCII-armored detached signature over `document`.
    pub signature: String,
    /// ASCII-armored OpenPGP public keys to try, in order.
    pub keys: Vec<String>,
    /// Hostname the package was resolved from, for the default-registry
    /// enforcement carve-out.
    pub provider_hostname: String,
    pub policy: SigningPolicy,
}

impl SignatureAuthenticator {
    pub fn authenticate(&self) -> Result<PackageAuthenticationResult, AuthenticationError> {
        let enforced = !self.keys.is_empty()
            || self.provider_hostname != DEFAULT_REGISTRY_HOSTNAME
            || self.policy.enforce_on_default_registry;

        if self.keys.is_empty() {
            return if enforced {
                Err(AuthenticationError::UnknownSigningKey)
            } else {
                Ok(PackageAuthenticationResult::signing_skipped())
            };
        }

        match self.verify_with_any_key() {
            Ok(key_id) => {
                let mut result = PackageAuthenticationResult::default();
                for (filename, hash) in hashes_in_sums_document(
                    &String::from_utf8_lossy(&self.document),
                ) {
                    let _ = filename;
                    result.hashes.insert(
                        hash,
                        HashDisposition::reported_by_registry([key_id.clone()]),
                    );
                }
                Ok(result)
            }
            Err(VerifyFailure::Expired(key_id)) if !self.policy.enforce_key_expiration => {
                warn!(key_id = %key_id, "accepting expired OpenPGP signing key because expiration enforcement is disabled");
                let mut result = PackageAuthenticationResult::default();
                for (_, hash) in hashes_in_sums_document(&String::from_utf8_lossy(&self.document)) {
                    result
                        .hashes
                        .insert(hash, HashDisposition::reported_by_registry([key_id.clone()]));
                }
                Ok(result)
            }
            Err(VerifyFailure::Expired(_)) => Err(AuthenticationError::ExpiredSigningKey),
            Err(VerifyFailure::NoValidKey) => Err(AuthenticationError::UnknownSigningKey),
        }
    }

    fn verify_with_any_key(&self) -> Result<String, VerifyFailure> {
        let parsed_signature = StandaloneSignature::from_string(&self.signature)
            .map_err(|_| VerifyFailure::NoValidKey)?
            .0;

        // Only a key whose signature actually verifies is a candidate at
        // all; expiration is then a policy question about *that* key, not
        // a reason to skip checking it against the signature in the first
        // place. A non-expired key that simply doesn't match the signature
        // must not be shadowed by an unrelated expired key.
        let mut last_expired_match: Option<String> = None;

        for armored in &self.keys {
            let Ok((key, _headers)) = SignedPublicKey::from_string(armored) else {
                continue;
            };
            if parsed_signature.verify(&key, &self.document).is_err() {
                continue;
            }
            let key_id = hex::encode(key.key_id().as_ref());

            if key_is_expired(&key) {
                last_expired_match = Some(key_id);
                continue;
            }

            return Ok(key_id);
        }

        if let Some(key_id) = last_expired_match {
            // Every key whose signature verified was expired; surface that
            // distinctly so the caller can apply expiration policy instead
            // of a generic "unknown key" failure.
            return Err(VerifyFailure::Expired(key_id));
        }

        Err(VerifyFailure::NoValidKey)
    }
}

enum VerifyFailure {
    Expired(String),
    NoValidKey,
}

fn key_is_expired(key: &SignedPublicKey) -> bool {
    match key.expires_at() {
        Some(expiry) => expiry < chrono::Utc::now(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_default_registry_package_is_not_enforced() {
        let auth = SignatureAuthenticator {
            document: b"irrelevant".to_vec(),
            signature: String::new(),
            keys: vec![],
            provider_hostname: DEFAULT_REGISTRY_HOSTNAME.to_string(),
            policy: SigningPolicy::permissive(),
        };
        let result = auth.authenticate().unwrap();
        assert!(result.signing_skipped);
    }

    #[test]
    fn unsigned_default_registry_package_enforced_when_policy_says_so() {
        let auth = SignatureAuthenticator {
            document: b"irrelevant".to_vec(),
            signature: String::new(),
            keys: vec![],
            provider_hostname: DEFAULT_REGISTRY_HOSTNAME.to_string(),
            policy: SigningPolicy::strict(),
        };
        let err = auth.authenticate().unwrap_err();
        assert!(matches!(err, AuthenticationError::UnknownSigningKey));
    }

    #[test]
    fn non_default_registry_without_keys_is_always_enforced() {
        let auth = SignatureAuthenticator {
            document: b"irrelevant".to_vec(),
            signature: String::new(),
            keys: vec![],
            provider_hostname: "mirror.example.com".to_string(),
            policy: SigningPolicy::permissive(),
        };
        let err = auth.authenticate().unwrap_err();
        assert!(matches!(err, AuthenticationError::UnknownSigningKey));
    }
}
