//! OCI registry mirror source (component G): resolves providers against an
//! OCI Distribution repository instead of the `providers.v1` protocol.

use std::fmt;
use std::sync::Mutex;

use sha2::Digest;

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::location::{OciBlobArchive, PackageLocation};
use crate::meta::PackageMeta;
use crate::oci::{BlobDescriptor, ImageManifest, IndexManifest, ManifestDescriptor, OciStoreHandle, ARCHIVE_MEDIA_TYPE};
use crate::provider::{Platform, Provider, VersionList};
use crate::source::Source;

const PROVIDER_ARTIFACT_TYPE: &str = "application/vnd.opentofu.provider";
const PROVIDER_TARGET_ARTIFACT_TYPE: &str = "application/vnd.opentofu.provider-target";
const MODULE_PACKAGE_ARTIFACT_TYPE: &str = "application/vnd.opentofu.modulepkg";
const PROVIDER_PACKAGE_ARTIFACT_TYPE: &str = "application/vnd.opentofu.providerpkg";
const IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
const IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Translates a provider source address to an OCI repository address,
/// injected so tests and alternate naming conventions don't require
/// rebuilding the whole source.
pub trait OciRepositoryMapper: fmt::Debug + Send + Sync {
    /// Returns `(registry_domain, repository_name)`.
    fn map(&self, provider: &Provider) -> Result<(String, String), Error>;
}

/// `hostname` becomes the registry domain; `namespace/type` becomes the
/// repository name, validated against the OCI Distribution name grammar
/// (lowercase alphanumeric path components separated by `/`, `.`, `_`, or
/// `-`). Provider addresses admit a wider Unicode repertoire than OCI names
/// do, so non-ASCII components are rejected with a hint pointing at that.
#[derive(Debug, Clone, Default)]
pub struct DefaultOciRepositoryMapper;

impl OciRepositoryMapper for DefaultOciRepositoryMapper {
    fn map(&self, provider: &Provider) -> Result<(String, String), Error> {
        let repo = format!("{}/{}", provider.namespace(), provider.type_());
        if !repo.is_ascii() {
            return Err(Error::InvalidOciAddress {
                provider: provider.clone(),
                reason: format!("{repo:?} is not a valid OCI repository name"),
                hint: Some("the provider's namespace or type contains non-ASCII characters, which OCI repository names cannot represent".to_string()),
            });
        }
        if !is_valid_oci_repository_name(&repo) {
            return Err(Error::InvalidOciAddress {
                provider: provider.clone(),
                reason: format!("{repo:?} is not a valid OCI repository name"),
                hint: None,
            });
        }
        Ok((provider.hostname().to_string(), repo))
    }
}

fn is_valid_oci_repository_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|component| {
            !component.is_empty()
                && component
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_alphanumeric())
                    .unwrap_or(false)
                && component
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c))
        })
}

/// `+` is disallowed in OCI tags; `_` is accepted on input as a substitute
/// and rendered back as `_` when mapping a resolved version to a tag.
fn tag_to_version(tag: &str) -> Option<semver::Version> {
    semver::Version::parse(&tag.replace('_', "+")).ok()
}

fn version_to_tag(version: &semver::Version) -> String {
    version.to_string().replace('+', "_")
}

fn verify_digest(bytes: &[u8], expected_digest: &str) -> Result<(), Error> {
    let hex = expected_digest
        .strip_prefix("sha256:")
        .ok_or_else(|| Error::Other(anyhow::anyhow!("OCI digest {expected_digest:?} is not sha256-addressed")))?;
    let actual = hex::encode(sha2::Sha256::digest(bytes));
    if actual != hex {
        return Err(Error::Other(anyhow::anyhow!(
            "OCI manifest content does not match its digest {expected_digest}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    provider: Provider,
    registry_domain: String,
    repo: String,
}

/// Resolves providers against an OCI Distribution repository: tags are
/// parsed as versions, a version tag resolves to an index manifest, whose
/// per-platform entries point at image manifests carrying the archive as a
/// content layer.
pub struct OciRegistrySource {
    store: OciStoreHandle,
    mapper: Box<dyn OciRepositoryMapper>,
    last_used: Mutex<Option<CacheEntry>>,
}

impl fmt::Debug for OciRegistrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OciRegistrySource").field("store", &self.store).finish()
    }
}

impl OciRegistrySource {
    pub fn new(store: OciStoreHandle) -> Self {
        OciRegistrySource {
            store,
            mapper: Box::new(DefaultOciRepositoryMapper),
            last_used: Mutex::new(None),
        }
    }

    pub fn with_mapper(mut self, mapper: Box<dyn OciRepositoryMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    fn resolve_repo(&self, provider: &Provider) -> Result<(String, String), Error> {
        if let Some(cached) = self.last_used.lock().unwrap().as_ref() {
            if &cached.provider == provider {
                return Ok((cached.registry_domain.clone(), cached.repo.clone()));
            }
        }
        self.mapper.map(provider)
    }

    fn remember(&self, provider: Provider, registry_domain: String, repo: String) {
        *self.last_used.lock().unwrap() = Some(CacheEntry {
            provider,
            registry_domain,
            repo,
        });
    }

    fn store_error(&self, provider: &Provider, e: anyhow::Error) -> Error {
        if e.downcast_ref::<crate::oci::OciRepositoryNotFound>().is_some() {
            return Error::provider_not_found(provider.clone());
        }
        match e.downcast::<Error>() {
            Ok(err) => err,
            Err(e) => Error::Other(e),
        }
    }

    fn select_platform_entry<'a>(
        &self,
        index: &'a IndexManifest,
        provider: &Provider,
        version: &semver::Version,
        platform: &Platform,
    ) -> Result<&'a ManifestDescriptor, Error> {
        let eligible: Vec<&ManifestDescriptor> = index
            .manifests
            .iter()
            .filter(|m| {
                m.artifact_type.as_deref() == Some(PROVIDER_TARGET_ARTIFACT_TYPE)
                    && m.media_type == IMAGE_MANIFEST_MEDIA_TYPE
                    && m.platform.as_ref().map(|p| p.is_unversioned()).unwrap_or(false)
            })
            .collect();

        if eligible.is_empty() {
            return Err(Error::Other(anyhow::anyhow!(
                "index manifest for {provider} {version} contains no application/vnd.opentofu.provider-target entries"
            )));
        }

        let matching: Vec<&ManifestDescriptor> = eligible
            .iter()
            .filter(|m| m.platform.as_ref().map(|p| p.matches(platform)).unwrap_or(false))
            .copied()
            .collect();

        match matching.len() {
            0 => Err(Error::PlatformNotSupported {
                provider: provider.clone(),
                version: version.clone(),
                platform: platform.clone(),
                mirror_url: None,
            }),
            1 => Ok(matching[0]),
            _ => Err(Error::Other(anyhow::anyhow!(
                "index manifest for {provider} {version} has more than one entry matching platform {platform}"
            ))),
        }
    }
}

impl Source for OciRegistrySource {
    fn available_versions(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
    ) -> Result<(VersionList, Vec<String>), Error> {
        if ctx.is_cancelled() {
            return Err(Error::DownloadInterrupted);
        }
        let (registry_domain, repo) = self.resolve_repo(provider)?;
        let tags = self
            .store
            .0
            .list_tags(ctx, &repo)
            .map_err(|e| self.store_error(provider, e))?;

        let versions = tags.iter().filter_map(|t| tag_to_version(t)).collect();
        self.remember(provider.clone(), registry_domain, repo);
        Ok((versions, vec![]))
    }

    fn package_meta(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
        version: &semver::Version,
        platform: &Platform,
    ) -> Result<PackageMeta, Error> {
        if ctx.is_cancelled() {
            return Err(Error::DownloadInterrupted);
        }
        let (registry_domain, repo) = self.resolve_repo(provider)?;
        let tag = version_to_tag(version);

        let (digest, bytes) = self
            .store
            .0
            .get_manifest_by_tag(ctx, &repo, &tag)
            .map_err(|e| self.store_error(provider, e))?;
        verify_digest(&bytes, &digest)?;

        let index: IndexManifest = serde_json::from_slice(&bytes).map_err(|e| Error::Other(anyhow::Error::new(e)))?;

        match index.artifact_type.as_deref().unwrap_or("") {
            PROVIDER_ARTIFACT_TYPE => {}
            PROVIDER_TARGET_ARTIFACT_TYPE => {
                return Err(Error::Other(anyhow::anyhow!(
                    "tag refers directly to image manifest, but OpenTofu providers require an index manifest for multi-platform support"
                )))
            }
            MODULE_PACKAGE_ARTIFACT_TYPE => {
                return Err(Error::Other(anyhow::anyhow!(
                    "selected OCI artifact is an OpenTofu module package, not a provider package"
                )))
            }
            "" => {
                return Err(Error::Other(anyhow::anyhow!(
                    "unsupported OCI artifact type; is this a container image, rather than an OpenTofu provider?"
                )))
            }
            other => {
                return Err(Error::Other(anyhow::anyhow!(
                    "unsupported OCI artifact type {other:?}"
                )))
            }
        }
        if index.media_type.as_deref() != Some(IMAGE_INDEX_MEDIA_TYPE) {
            return Err(Error::Other(anyhow::anyhow!(
                "expected an OCI image index for {provider} {version}, got media type {:?}",
                index.media_type
            )));
        }

        let entry = self.select_platform_entry(&index, provider, version, platform)?;

        let (image_digest, image_bytes) = self
            .store
            .0
            .get_manifest_by_digest(ctx, &repo, &entry.digest)
            .map_err(|e| self.store_error(provider, e))?;
        verify_digest(&image_bytes, &image_digest)?;

        let image: ImageManifest = serde_json::from_slice(&image_bytes).map_err(|e| Error::Other(anyhow::Error::new(e)))?;

        let providerpkg_layers: Vec<&BlobDescriptor> = image
            .layers
            .iter()
            .filter(|l| l.artifact_type.as_deref() == Some(PROVIDER_PACKAGE_ARTIFACT_TYPE))
            .collect();

        let zip_layer = providerpkg_layers.iter().find(|l| l.media_type == ARCHIVE_MEDIA_TYPE);

        let blob_descriptor = match zip_layer {
            Some(layer) => (*layer).clone(),
            None if !providerpkg_layers.is_empty() => {
                return Err(Error::Other(anyhow::anyhow!(
                    "image manifest contains no 'application/vnd.opentofu.providerpkg' layers of type 'archive/zip', but has other unsupported formats; this OCI artifact might be intended for a different version of OpenTofu"
                )));
            }
            None => {
                return Err(Error::Other(anyhow::anyhow!(
                    "image manifest for {provider} {version} contains no application/vnd.opentofu.providerpkg layers"
                )));
            }
        };

        self.remember(provider.clone(), registry_domain.clone(), repo.clone());

        let filename = format!("{}_{version}_{}.zip", provider.type_(), platform.key());

        Ok(PackageMeta::new(
            provider.clone(),
            version.clone(),
            platform.clone(),
            filename,
            PackageLocation::OciBlobArchive(OciBlobArchive::new(
                self.store.clone(),
                registry_domain,
                repo,
                blob_descriptor,
            )),
        ))
    }

    fn for_display(&self, provider: &Provider) -> String {
        format!("{provider} via OCI registry mirror")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct FixtureStore {
        tags: Vec<String>,
        manifests: HashMap<String, Vec<u8>>,
    }

    impl crate::oci::OciStore for FixtureStore {
        fn list_tags(&self, _ctx: &CancellationToken, _repo: &str) -> Result<Vec<String>, anyhow::Error> {
            Ok(self.tags.clone())
        }

        fn get_manifest_by_tag(
            &self,
            _ctx: &CancellationToken,
            _repo: &str,
            tag: &str,
        ) -> Result<(String, Vec<u8>), anyhow::Error> {
            let bytes = self
                .manifests
                .get(tag)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no manifest for tag {tag}"))?;
            let digest = format!("sha256:{}", hex::encode(sha2::Sha256::digest(&bytes)));
            Ok((digest, bytes))
        }

        fn get_manifest_by_digest(
            &self,
            _ctx: &CancellationToken,
            _repo: &str,
            digest: &str,
        ) -> Result<(String, Vec<u8>), anyhow::Error> {
            let bytes = self
                .manifests
                .get(digest)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no manifest for digest {digest}"))?;
            Ok((digest.to_string(), bytes))
        }

        fn get_blob(&self, _ctx: &CancellationToken, _repo: &str, _digest: &str) -> Result<Vec<u8>, anyhow::Error> {
            anyhow::bail!("not used in this fixture")
        }
    }

    #[test]
    fn available_versions_parses_tags_and_drops_latest() {
        let store = FixtureStore {
            tags: vec![
                "1.0.0".to_string(),
                "1.0.1".to_string(),
                "1.0.2_foo.1".to_string(),
                "latest".to_string(),
            ],
            manifests: HashMap::new(),
        };
        let source = OciRegistrySource::new(OciStoreHandle(Arc::new(store)));
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        let (versions, _) = source
            .available_versions(&CancellationToken::new(), &provider)
            .unwrap();
        let rendered: Vec<_> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(rendered, vec!["1.0.0", "1.0.1", "1.0.2+foo.1"]);
    }

    #[test]
    fn empty_artifact_type_reports_container_image_hint() {
        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": IMAGE_INDEX_MEDIA_TYPE,
            "manifests": [],
        });
        let bytes = serde_json::to_vec(&index).unwrap();
        let digest = format!("sha256:{}", hex::encode(sha2::Sha256::digest(&bytes)));

        let mut manifests = HashMap::new();
        manifests.insert("0.0.2".to_string(), bytes.clone());
        manifests.insert(digest, bytes);

        let store = FixtureStore {
            tags: vec!["0.0.2".to_string()],
            manifests,
        };
        let source = OciRegistrySource::new(OciStoreHandle(Arc::new(store)));
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        let err = source
            .package_meta(
                &CancellationToken::new(),
                &provider,
                &semver::Version::new(0, 0, 2),
                &Platform::new("linux", "amd64"),
            )
            .unwrap_err();
        assert!(err.to_string().contains("unsupported OCI artifact type; is this a container image"));
    }

    #[test]
    fn default_mapper_rejects_non_ascii_namespace() {
        let mapper = DefaultOciRepositoryMapper;
        let provider = Provider::new("registry.example.com", "hashicörp", "foo");
        let err = mapper.map(&provider).unwrap_err();
        assert!(matches!(err, Error::InvalidOciAddress { .. }));
    }
}
