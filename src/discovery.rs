//! Service discovery: resolving a provider's declared hostname to the
//! concrete `providers.v1` API base URL it advertises (an external
//! collaborator, not specified by this crate's wire format beyond its
//! result).

use std::fmt;

use crate::error::Error;

/// Resolves a hostname to its `providers.v1` API base path.
pub trait Discovery: std::fmt::Debug + Send + Sync {
    /// Returns the base URL for the `providers.v1` service, or
    /// [`Error::HostNoProviders`]/[`Error::HostUnreachable`] as appropriate.
    fn discover_providers_v1(&self, hostname: &str) -> Result<String, Error>;
}

/// A discovery implementation that assumes every host serves
/// `providers.v1` at a fixed, conventional path -- useful for tests and for
/// mirrors that skip real `.well-known/terraform.json` discovery.
#[derive(Debug, Clone, Default)]
pub struct FixedPathDiscovery;

impl Discovery for FixedPathDiscovery {
    fn discover_providers_v1(&self, hostname: &str) -> Result<String, Error> {
        Ok(format!("https://{hostname}/v1/providers"))
    }
}

/// The services a host's discovery document can advertise, as consumed by
/// [`crate::source::direct::DirectSource`]. Mirrors the real
/// `.well-known/terraform.json` document's shape: each entry is optional,
/// and none present at all is [`Error::HostNoProviders`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredServices {
    /// Base URL for the native `providers.v1` protocol.
    pub providers_v1: Option<String>,
    /// RFC 6570 Level-1 URI template for the OCI mirror protocol, e.g.
    /// `"https://mirror.example.com/v1/{namespace}/{type}"`.
    pub oci_providers_v1: Option<String>,
}

impl DiscoveredServices {
    pub fn none() -> Self {
        DiscoveredServices::default()
    }
}

/// Broader service discovery than [`Discovery`]: returns every protocol a
/// host's discovery document advertises in one shot, so
/// [`crate::source::direct::DirectSource`] can choose among them without a
/// separate round trip per candidate protocol.
pub trait ServiceDiscovery: fmt::Debug + Send + Sync {
    fn discover(&self, hostname: &str) -> Result<DiscoveredServices, Error>;
}

/// A [`Discovery`] adapter over an already-resolved `providers.v1` base
/// URL, used internally so [`crate::source::direct::DirectSource`] can hand
/// [`crate::source::registry::RegistrySource`] the base URL it already
/// obtained through [`ServiceDiscovery`], without a second discovery round
/// trip.
#[derive(Debug, Clone)]
pub struct FixedBaseUrlDiscovery {
    base_url: String,
}

impl FixedBaseUrlDiscovery {
    pub fn new(base_url: impl Into<String>) -> Self {
        FixedBaseUrlDiscovery {
            base_url: base_url.into(),
        }
    }
}

impl Discovery for FixedBaseUrlDiscovery {
    fn discover_providers_v1(&self, _hostname: &str) -> Result<String, Error> {
        Ok(self.base_url.clone())
    }
}
