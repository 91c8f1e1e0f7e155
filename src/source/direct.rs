//! Direct source (component H): performs service discovery against a
//! provider's own hostname and chooses among the protocols it advertises.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::discovery::{DiscoveredServices, FixedBaseUrlDiscovery, ServiceDiscovery};
use crate::error::Error;
use crate::meta::PackageMeta;
use crate::oci::{HttpOciStore, OciStoreHandle};
use crate::provider::{Platform, Provider, VersionList};
use crate::source::oci::{OciRegistrySource, OciRepositoryMapper};
use crate::source::registry::RegistrySource;
use crate::source::Source;
use crate::uritemplate;

/// A hostname ending in this suffix bypasses discovery entirely: the part
/// before the suffix is treated directly as an OCI registry domain. Exists
/// for local experimentation against a registry with no discovery document.
pub const MAGIC_OCI_HOSTNAME_SUFFIX: &str = ".oci-direct.invalid";

/// Expands a discovered `oci-providers.v1` URI template (`{namespace}`,
/// `{type}`) per request, deriving the OCI registry domain once from the
/// template with placeholder values and the repository path per provider.
#[derive(Debug, Clone)]
struct TemplateOciRepositoryMapper {
    registry_base: String,
    template: String,
}

impl TemplateOciRepositoryMapper {
    fn new(template: String) -> Result<Self, Error> {
        let probe_vars = HashMap::from([
            ("namespace".to_string(), String::new()),
            ("type".to_string(), String::new()),
        ]);
        let probe = uritemplate::expand(&template, &probe_vars)
            .map_err(|e| Error::Other(anyhow::anyhow!("invalid OCI mirror URI template {template:?}: {e}")))?;
        let url = url::Url::parse(&probe)
            .map_err(|e| Error::Other(anyhow::anyhow!("OCI mirror URI template {template:?} did not expand to a valid URL: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Other(anyhow::anyhow!("OCI mirror URI template {template:?} has no host")))?;
        let registry_base = match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        };
        Ok(TemplateOciRepositoryMapper { registry_base, template })
    }
}

impl OciRepositoryMapper for TemplateOciRepositoryMapper {
    fn map(&self, provider: &Provider) -> Result<(String, String), Error> {
        let vars = HashMap::from([
            ("namespace".to_string(), provider.namespace().to_string()),
            ("type".to_string(), provider.type_().to_string()),
        ]);
        let expanded = uritemplate::expand(&self.template, &vars)
            .map_err(|e| Error::Other(anyhow::anyhow!("failed to expand OCI mirror URI template for {provider}: {e}")))?;
        let url = url::Url::parse(&expanded)
            .map_err(|e| Error::Other(anyhow::anyhow!("OCI mirror URI template expansion for {provider} is not a valid URL: {e}")))?;
        let repo = url.path().trim_start_matches('/').to_string();
        Ok((self.registry_base.clone(), repo))
    }
}

/// Picks, per provider hostname, between the native `providers.v1` protocol,
/// a discovered OCI mirror protocol, and the magic-hostname-suffix OCI
/// bypass -- in that priority order. Neither protocol advertised (and no
/// magic suffix) is [`Error::HostNoProviders`], the one other error variant
/// besides [`Error::ProviderNotFound`] this crate ever uses for control flow
/// rather than a terminal failure.
#[derive(Debug)]
pub struct DirectSource {
    discovery: Box<dyn ServiceDiscovery>,
}

impl DirectSource {
    pub fn new(discovery: Box<dyn ServiceDiscovery>) -> Self {
        DirectSource { discovery }
    }

    fn resolve(&self, provider: &Provider) -> Result<Box<dyn Source>, Error> {
        let hostname = provider.hostname();

        if let Some(registry_host) = hostname.strip_suffix(MAGIC_OCI_HOSTNAME_SUFFIX) {
            let store = OciStoreHandle(Arc::new(HttpOciStore::new(registry_host)));
            return Ok(Box::new(OciRegistrySource::new(store)));
        }

        let services = self.discovery.discover(hostname)?;
        match services {
            DiscoveredServices {
                providers_v1: Some(base),
                ..
            } => Ok(Box::new(RegistrySource::new(Box::new(FixedBaseUrlDiscovery::new(base))))),
            DiscoveredServices {
                oci_providers_v1: Some(template),
                ..
            } => {
                let mapper = TemplateOciRepositoryMapper::new(template)?;
                let store = OciStoreHandle(Arc::new(HttpOciStore::with_base_url(mapper.registry_base.clone())));
                Ok(Box::new(OciRegistrySource::new(store).with_mapper(Box::new(mapper))))
            }
            DiscoveredServices { .. } => Err(Error::HostNoProviders {
                hostname: hostname.to_string(),
                has_other_version: None,
            }),
        }
    }
}

impl Source for DirectSource {
    fn available_versions(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
    ) -> Result<(VersionList, Vec<String>), Error> {
        self.resolve(provider)?.available_versions(ctx, provider)
    }

    fn package_meta(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
        version: &semver::Version,
        platform: &Platform,
    ) -> Result<PackageMeta, Error> {
        self.resolve(provider)?.package_meta(ctx, provider, version, platform)
    }

    fn for_display(&self, provider: &Provider) -> String {
        match self.resolve(provider) {
            Ok(source) => source.for_display(provider),
            Err(_) => format!("{provider} via direct source"),
        }
    }
}
