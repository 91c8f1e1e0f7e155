//! `MultiSource`: ordered fan-out over pattern-matched sources.

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::meta::PackageMeta;
use crate::provider::{Platform, Provider, VersionList};
use crate::source::Source;

/// A provider-address glob: each component is either an exact string or a
/// `*` wildcard. `"registry.opentofu.org/*/*"` matches every provider
/// hosted at that registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePattern {
    hostname: Option<String>,
    namespace: Option<String>,
    type_: Option<String>,
}

impl SourcePattern {
    pub fn any() -> Self {
        SourcePattern {
            hostname: None,
            namespace: None,
            type_: None,
        }
    }

    /// Parse `hostname/namespace/type`, where any component may be `*`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let mut parts = s.splitn(3, '/');
        let hostname = parts.next().filter(|s| !s.is_empty());
        let namespace = parts.next().filter(|s| !s.is_empty());
        let type_ = parts.next().filter(|s| !s.is_empty());
        match (hostname, namespace, type_) {
            (Some(h), Some(n), Some(t)) => Ok(SourcePattern {
                hostname: wildcard(h),
                namespace: wildcard(n),
                type_: wildcard(t),
            }),
            _ => Err(Error::Other(anyhow::anyhow!(
                "invalid source pattern: {s:?}"
            ))),
        }
    }

    pub fn matches(&self, provider: &Provider) -> bool {
        component_matches(&self.hostname, provider.hostname())
            && component_matches(&self.namespace, provider.namespace())
            && component_matches(&self.type_, provider.type_())
    }

    /// Number of exactly-matched (non-wildcard) components; used by
    /// mapping-config rule resolution to break ties within one file.
    pub fn specificity(&self) -> u8 {
        [&self.hostname, &self.namespace, &self.type_]
            .iter()
            .filter(|c| c.is_some())
            .count() as u8
    }
}

fn wildcard(s: &str) -> Option<String> {
    if s == "*" {
        None
    } else {
        Some(s.to_lowercase())
    }
}

fn component_matches(pattern: &Option<String>, actual: &str) -> bool {
    match pattern {
        Some(p) => p == actual,
        None => true,
    }
}

/// Ordered fan-out: each entry is tried in order, restricted to providers
/// its pattern matches.
#[derive(Debug)]
pub struct MultiSource {
    sources: Vec<(SourcePattern, Box<dyn Source>)>,
}

impl MultiSource {
    pub fn new() -> Self {
        MultiSource { sources: Vec::new() }
    }

    pub fn with_source(mut self, pattern: SourcePattern, source: Box<dyn Source>) -> Self {
        self.sources.push((pattern, source));
        self
    }

    fn matching<'a>(&'a self, provider: &Provider) -> impl Iterator<Item = &'a Box<dyn Source>> + 'a {
        self.sources
            .iter()
            .filter(move |(pattern, _)| pattern.matches(provider))
            .map(|(_, source)| source)
    }
}

impl Default for MultiSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for MultiSource {
    /// Unions every matching source's successful result; a source reporting
    /// `ProviderNotFound` is treated as "doesn't know about this provider"
    /// and skipped, not as a fatal error. Any other error aborts the fan-out
    /// immediately. If every matching source (or none at all) returns
    /// `ProviderNotFound`, so does this.
    fn available_versions(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
    ) -> Result<(VersionList, Vec<String>), Error> {
        let mut union = VersionList::new(vec![]);
        let mut warnings = Vec::new();
        let mut any_found = false;

        for source in self.matching(provider) {
            match source.available_versions(ctx, provider) {
                Ok((versions, mut w)) => {
                    any_found = true;
                    union = union.union(versions);
                    warnings.append(&mut w);
                }
                Err(e) if e.is_provider_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        if !any_found {
            return Err(Error::provider_not_found(provider.clone()));
        }

        Ok((union, warnings))
    }

    /// Queries matching sources in order; the first to resolve the exact
    /// version wins. `ProviderNotFound` (from a source that doesn't carry
    /// this version) continues to the next candidate; anything else is
    /// fatal.
    fn package_meta(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
        version: &semver::Version,
        platform: &Platform,
    ) -> Result<PackageMeta, Error> {
        for source in self.matching(provider) {
            match source.package_meta(ctx, provider, version, platform) {
                Ok(meta) => return Ok(meta),
                Err(e) if e.is_provider_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::provider_not_found(provider.clone()))
    }

    fn for_display(&self, provider: &Provider) -> String {
        self.matching(provider)
            .next()
            .map(|s| s.for_display(provider))
            .unwrap_or_else(|| provider.to_string())
    }
}
