//! Provider addresses and target platforms.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A provider source address: `hostname/namespace/type`.
///
/// All three components are lowercased. `hostname` is expected to be a
/// valid (possibly IDN) host; `namespace` and `type` admit a wider Unicode
/// identifier repertoire than ASCII, matching the original registry
/// protocol's permissive addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Provider {
    hostname: String,
    namespace: String,
    type_: String,
}

impl Provider {
    /// Construct a provider address, lowercasing each component.
    pub fn new(hostname: impl Into<String>, namespace: impl Into<String>, type_: impl Into<String>) -> Self {
        Provider {
            hostname: hostname.into().to_lowercase(),
            namespace: namespace.into().to_lowercase(),
            type_: type_.into().to_lowercase(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    /// Parse `hostname/namespace/type`.
    pub fn parse(s: &str) -> Result<Self, crate::error::Error> {
        let mut parts = s.splitn(3, '/');
        let hostname = parts.next().filter(|s| !s.is_empty());
        let namespace = parts.next().filter(|s| !s.is_empty());
        let type_ = parts.next().filter(|s| !s.is_empty());

        match (hostname, namespace, type_) {
            (Some(h), Some(n), Some(t)) => Ok(Provider::new(h, n, t)),
            _ => Err(crate::error::Error::Other(anyhow::anyhow!(
                "invalid provider source address: {s:?}"
            ))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.type_)
    }
}

/// A target platform: an (os, arch) pair of lowercase codename tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Platform {
            os: os.into().to_lowercase(),
            arch: arch.into().to_lowercase(),
        }
    }

    /// The `<os>_<arch>` key used by the HTTP mirror's per-version JSON and
    /// registry download URLs.
    pub fn key(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// A sorted, deduplicated list of available versions, lowest-precedence
/// first -- the ordering [`crate::source::Source::available_versions`] and
/// [`crate::source::multi::MultiSource`] are required to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionList(Vec<semver::Version>);

impl VersionList {
    pub fn new(mut versions: Vec<semver::Version>) -> Self {
        versions.sort();
        versions.dedup();
        VersionList(versions)
    }

    pub fn iter(&self) -> impl Iterator<Item = &semver::Version> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_vec(self) -> Vec<semver::Version> {
        self.0
    }

    pub fn as_slice(&self) -> &[semver::Version] {
        &self.0
    }

    /// Union of two version lists, sorted and deduplicated.
    pub fn union(self, other: VersionList) -> VersionList {
        let mut all = self.0;
        all.extend(other.0);
        VersionList::new(all)
    }
}

impl FromIterator<semver::Version> for VersionList {
    fn from_iter<T: IntoIterator<Item = semver::Version>>(iter: T) -> Self {
        VersionList::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_lowercases_components() {
        let p = Provider::new("Registry.Example.COM", "HashiCorp", "AWS");
        assert_eq!(p.hostname(), "registry.example.com");
        assert_eq!(p.namespace(), "hashicorp");
        assert_eq!(p.type_(), "aws");
        assert_eq!(p.to_string(), "registry.example.com/hashicorp/aws");
    }

    #[test]
    fn provider_parse_roundtrip() {
        let p = Provider::parse("registry.opentofu.org/hashicorp/aws").unwrap();
        assert_eq!(p.to_string(), "registry.opentofu.org/hashicorp/aws");
    }

    #[test]
    fn provider_parse_rejects_missing_parts() {
        assert!(Provider::parse("registry.opentofu.org/hashicorp").is_err());
    }

    #[test]
    fn platform_key_is_os_underscore_arch() {
        let p = Platform::new("Linux", "AMD64");
        assert_eq!(p.key(), "linux_amd64");
        assert_eq!(p.to_string(), "linux_amd64");
    }

    #[test]
    fn version_list_sorts_and_dedupes() {
        let list = VersionList::new(vec![
            semver::Version::parse("1.0.1").unwrap(),
            semver::Version::parse("1.0.0").unwrap(),
            semver::Version::parse("1.0.1").unwrap(),
        ]);
        let versions: Vec<_> = list.iter().map(|v| v.to_string()).collect();
        assert_eq!(versions, vec!["1.0.0", "1.0.1"]);
    }

    #[test]
    fn version_list_union_is_sorted() {
        let a = VersionList::new(vec![semver::Version::parse("1.0.0").unwrap()]);
        let b = VersionList::new(vec![semver::Version::parse("0.9.0").unwrap()]);
        let union = a.union(b);
        let versions: Vec<_> = union.iter().map(|v| v.to_string()).collect();
        assert_eq!(versions, vec!["0.9.0", "1.0.0"]);
    }
}
