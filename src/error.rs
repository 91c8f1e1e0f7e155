//! Error taxonomy shared by every source and authenticator in this crate.
//!
//! `ProviderNotFound` is load-bearing for [`crate::source::multi::MultiSource`]:
//! it must never be wrapped inside another error variant. Every source
//! implementation is expected to return it directly (not via
//! `anyhow::Error::context`), and [`Error::is_provider_not_found`] gives
//! callers a wrapping-proof way to test for it.

use std::fmt;

use crate::provider::{Platform, Provider};

/// Errors surfaced by provider sources, locations, and authenticators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No source in the chain knows about this provider at all.
    #[error("provider registry {provider} does not have a provider named {provider}")]
    ProviderNotFound { provider: Provider },

    /// The configured host could not be reached.
    #[error("could not connect to provider registry host {hostname}")]
    HostUnreachable {
        hostname: String,
        #[source]
        wrapped: anyhow::Error,
    },

    /// The host was reachable but does not offer the providers protocol,
    /// optionally noting that a different protocol version exists.
    #[error("host {hostname} does not offer a providers.v1 API{}", has_other_version.as_ref().map(|v| format!(" (it does support providers.{v})")).unwrap_or_default())]
    HostNoProviders {
        hostname: String,
        has_other_version: Option<String>,
    },

    /// Credentials were required and either missing or rejected.
    #[error("unauthorized: host {hostname} rejected the configured credentials")]
    Unauthorized { hostname: String },

    /// A query to a mirror/registry failed outright (non-auth, non-404).
    #[error("failed to query {provider} at {mirror_url}")]
    QueryFailed {
        provider: Provider,
        mirror_url: String,
        #[source]
        wrapped: anyhow::Error,
    },

    /// The provider exists but not for the requested platform/version.
    #[error("provider {provider} {version} is not available for {platform}")]
    PlatformNotSupported {
        provider: Provider,
        version: semver::Version,
        platform: Platform,
        mirror_url: Option<String>,
    },

    /// Authentication failed; see [`crate::auth::AuthenticationError`].
    #[error(transparent)]
    Authentication(#[from] crate::auth::AuthenticationError),

    /// Installing a package into the target directory failed.
    #[error("failed to install {provider} {version}: {reason}")]
    InstallFailed {
        provider: Provider,
        version: semver::Version,
        reason: String,
    },

    /// A download was aborted by the caller's cancellation token.
    #[error("provider download was interrupted")]
    DownloadInterrupted,

    /// A hash string did not parse (missing scheme separator).
    #[error("{0:?} is not a valid provider source address or package hash")]
    InvalidHash(String),

    /// An OCI provider address could not be translated to a valid OCI
    /// repository name.
    #[error("invalid OCI repository address for {provider}: {reason}{}", hint.as_ref().map(|h| format!(" ({h})")).unwrap_or_default())]
    InvalidOciAddress {
        provider: Provider,
        reason: String,
        hint: Option<String>,
    },

    /// Catch-all for wrapped I/O, parse, and other glue errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True for [`Error::ProviderNotFound`], without ever downcasting
    /// through an `anyhow::Error` wrapper -- callers that build their own
    /// wrapping on top of this type must preserve this property.
    pub fn is_provider_not_found(&self) -> bool {
        matches!(self, Error::ProviderNotFound { .. })
    }

    pub fn provider_not_found(provider: Provider) -> Self {
        Error::ProviderNotFound { provider }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Other(anyhow::Error::new(err))
    }
}

/// Helper implementing the "giving up after N attempt(s)" terminal suffix
/// required of retryable HTTP operations (spec S6).
pub fn giving_up_after(attempts: u32, last: impl fmt::Display) -> anyhow::Error {
    anyhow::anyhow!("{last}; giving up after {attempts} attempt(s)")
}
