//! Mapping-config source (component H): routes a provider address to a
//! named target source using ordered, file-priority `provider-pattern →
//! target` rules.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::meta::PackageMeta;
use crate::provider::{Platform, Provider, VersionList};
use crate::source::multi::SourcePattern;
use crate::source::Source;

#[derive(Debug, Deserialize)]
struct MappingFileDocument {
    #[serde(rename = "rule", default)]
    rules: Vec<MappingRuleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
struct MappingRuleConfig {
    pattern: String,
    target: String,
}

/// One parsed `provider-pattern → target-source-name` rule.
#[derive(Debug, Clone)]
struct MappingRule {
    pattern: SourcePattern,
    target: String,
}

/// Routes requests to a named [`Source`] chosen by the highest-specificity
/// rule matching the provider *within the first file that matches at all*
/// -- earlier files win outright, even over a more specific rule in a
/// later file (spec §4.D's deliberate override semantics).
pub struct MappingSource {
    files: Vec<Vec<MappingRule>>,
    targets: HashMap<String, Box<dyn Source>>,
}

impl fmt::Debug for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingSource")
            .field("files", &self.files.len())
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MappingSource {
    /// Build directly from already-parsed rule files, in priority order.
    pub fn new(files: Vec<Vec<(SourcePattern, String)>>, targets: HashMap<String, Box<dyn Source>>) -> Self {
        MappingSource {
            files: files
                .into_iter()
                .map(|rules| {
                    rules
                        .into_iter()
                        .map(|(pattern, target)| MappingRule { pattern, target })
                        .collect()
                })
                .collect(),
            targets,
        }
    }

    /// Parse each TOML file in `paths` (earliest first = highest priority)
    /// into an ordered rule set, each file holding `[[rule]]` tables of
    /// `pattern`/`target`.
    pub fn from_files(paths: &[impl AsRef<Path>], targets: HashMap<String, Box<dyn Source>>) -> Result<Self, Error> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let contents = std::fs::read_to_string(path).map_err(|e| {
                Error::Other(anyhow::anyhow!("failed to read mapping file {}: {e}", path.display()))
            })?;
            let doc: MappingFileDocument = toml::from_str(&contents).map_err(|e| {
                Error::Other(anyhow::anyhow!("failed to parse mapping file {}: {e}", path.display()))
            })?;
            let mut rules = Vec::with_capacity(doc.rules.len());
            for rule in doc.rules {
                let pattern = SourcePattern::parse(&rule.pattern)?;
                rules.push(MappingRule {
                    pattern,
                    target: rule.target,
                });
            }
            files.push(rules);
        }
        Ok(MappingSource { files, targets })
    }

    fn resolve_target(&self, provider: &Provider) -> Option<&(dyn Source)> {
        for file in &self.files {
            let best = file
                .iter()
                .filter(|rule| rule.pattern.matches(provider))
                .max_by_key(|rule| rule.pattern.specificity());
            if let Some(rule) = best {
                return self.targets.get(&rule.target).map(|b| b.as_ref());
            }
        }
        None
    }
}

impl Source for MappingSource {
    fn available_versions(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
    ) -> Result<(VersionList, Vec<String>), Error> {
        match self.resolve_target(provider) {
            Some(source) => source.available_versions(ctx, provider),
            None => Err(Error::provider_not_found(provider.clone())),
        }
    }

    fn package_meta(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
        version: &semver::Version,
        platform: &Platform,
    ) -> Result<PackageMeta, Error> {
        match self.resolve_target(provider) {
            Some(source) => source.package_meta(ctx, provider, version, platform),
            None => Err(Error::provider_not_found(provider.clone())),
        }
    }

    fn for_display(&self, provider: &Provider) -> String {
        self.resolve_target(provider)
            .map(|s| s.for_display(provider))
            .unwrap_or_else(|| provider.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::PackageLocation;

    #[derive(Debug)]
    struct NamedSource(&'static str);

    impl Source for NamedSource {
        fn available_versions(
            &self,
            _ctx: &CancellationToken,
            _provider: &Provider,
        ) -> Result<(VersionList, Vec<String>), Error> {
            Ok((VersionList::new(vec![semver::Version::new(1, 0, 0)]), vec![]))
        }

        fn package_meta(
            &self,
            _ctx: &CancellationToken,
            provider: &Provider,
            version: &semver::Version,
            platform: &Platform,
        ) -> Result<PackageMeta, Error> {
            Ok(PackageMeta::new(
                provider.clone(),
                version.clone(),
                platform.clone(),
                "terraform-provider-foo",
                PackageLocation::local_dir("/tmp/irrelevant"),
            ))
        }

        fn for_display(&self, _provider: &Provider) -> String {
            self.0.to_string()
        }
    }

    fn targets() -> HashMap<String, Box<dyn Source>> {
        let mut m: HashMap<String, Box<dyn Source>> = HashMap::new();
        m.insert("general".to_string(), Box::new(NamedSource("general")));
        m.insert("specific".to_string(), Box::new(NamedSource("specific")));
        m.insert("fallback".to_string(), Box::new(NamedSource("fallback")));
        m
    }

    #[test]
    fn highest_specificity_wins_within_one_file() {
        let file = vec![
            (SourcePattern::parse("*/hashicorp/*").unwrap(), "general".to_string()),
            (
                SourcePattern::parse("registry.example.com/hashicorp/foo").unwrap(),
                "specific".to_string(),
            ),
        ];
        let mapping = MappingSource::new(vec![file], targets());
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        assert_eq!(mapping.for_display(&provider), "specific");
    }

    #[test]
    fn earlier_file_wins_even_with_lower_specificity() {
        let first_file = vec![(SourcePattern::any(), "fallback".to_string())];
        let second_file = vec![(
            SourcePattern::parse("registry.example.com/hashicorp/foo").unwrap(),
            "specific".to_string(),
        )];
        let mapping = MappingSource::new(vec![first_file, second_file], targets());
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        assert_eq!(mapping.for_display(&provider), "fallback");
    }

    #[test]
    fn no_matching_rule_in_any_file_is_provider_not_found() {
        let mapping = MappingSource::new(
            vec![vec![(
                SourcePattern::parse("other.example.com/*/*").unwrap(),
                "general".to_string(),
            )]],
            targets(),
        );
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        let err = mapping
            .available_versions(&CancellationToken::new(), &provider)
            .unwrap_err();
        assert!(err.is_provider_not_found());
    }
}
