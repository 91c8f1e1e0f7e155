//! Package metadata returned by a [`crate::source::Source`].

use crate::auth::Authenticator;
use crate::location::PackageLocation;
use crate::provider::{Platform, Provider};

/// Everything needed to install one resolved provider package. Immutable
/// once returned by a source.
#[derive(Debug, Clone)]
pub struct PackageMeta {
    pub provider: Provider,
    pub version: semver::Version,
    pub protocol_versions: Option<Vec<String>>,
    pub target_platform: Platform,
    pub filename: String,
    pub location: PackageLocation,
    pub authentication: Option<Authenticator>,
}

impl PackageMeta {
    pub fn new(
        provider: Provider,
        version: semver::Version,
        target_platform: Platform,
        filename: impl Into<String>,
        location: PackageLocation,
    ) -> Self {
        PackageMeta {
            provider,
            version,
            protocol_versions: None,
            target_platform,
            filename: filename.into(),
            location,
            authentication: None,
        }
    }

    pub fn with_authentication(mut self, authentication: Authenticator) -> Self {
        self.authentication = Some(authentication);
        self
    }

    pub fn with_protocol_versions(mut self, versions: Vec<String>) -> Self {
        self.protocol_versions = Some(versions);
        self
    }
}
