//! Shared OCI Distribution types (component G), used by both the
//! [`crate::location::OciBlobArchive`] location and the OCI registry mirror
//! source.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::cancel::CancellationToken;
use crate::client::{HttpClientConfig, RetryPolicy};
use crate::credentials::{CredentialStore, NoCredentials};
use crate::provider::Platform;

/// The only archive media type an `OciBlobArchive` location will accept.
pub const ARCHIVE_MEDIA_TYPE: &str = "archive/zip";

/// OCI index manifest: a multi-platform descriptor list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default)]
    pub media_type: Option<String>,
    #[serde(rename = "artifactType", default)]
    pub artifact_type: Option<String>,
    pub manifests: Vec<ManifestDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDescriptor {
    pub digest: String,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    #[serde(rename = "artifactType", default)]
    pub artifact_type: Option<String>,
    pub platform: Option<OciPlatform>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciPlatform {
    pub os: String,
    pub architecture: String,
    #[serde(rename = "os.version", default)]
    pub os_version: Option<String>,
}

impl OciPlatform {
    pub fn matches(&self, platform: &Platform) -> bool {
        self.os == platform.os && self.architecture == platform.arch
    }

    /// True for the unqualified platforms this crate's target-selection
    /// supports -- `os.version`-pinned entries are never eligible, since
    /// there is no concept of an OS version in [`Platform`].
    pub fn is_unversioned(&self) -> bool {
        match self.os_version.as_deref() {
            None => true,
            Some(v) => v.is_empty(),
        }
    }
}

/// OCI image manifest: points at exactly one config blob and a list of
/// content layers, of which the provider archive is the first (and only
/// expected) entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default)]
    pub media_type: Option<String>,
    #[serde(rename = "artifactType", default)]
    pub artifact_type: Option<String>,
    pub layers: Vec<BlobDescriptor>,
}

/// A single content-addressed blob reference within a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    #[serde(rename = "artifactType", default)]
    pub artifact_type: Option<String>,
    pub digest: String,
    pub size: u64,
    #[serde(skip)]
    pub platform: Option<Platform>,
}

impl BlobDescriptor {
    /// The `sha256:<hex>` digest as a `zh:<hex>` package hash.
    pub fn as_zh_hash(&self) -> Result<crate::hash::Hash, anyhow::Error> {
        let hex = self
            .digest
            .strip_prefix("sha256:")
            .ok_or_else(|| anyhow::anyhow!("OCI blob digest {} is not sha256-addressed", self.digest))?;
        crate::hash::Hash::parse(&format!("zh:{hex}")).map_err(anyhow::Error::from)
    }
}

/// Sentinel error an [`OciStore`] returns when the repository itself (not
/// just a tag or digest within it) doesn't exist. Callers downcast for this
/// specifically so it can be translated into [`crate::error::Error::ProviderNotFound`]
/// at the source level, where a `Provider` is in scope (spec §4.G: "treat
/// 'not found' as `ProviderNotFound` at the source level").
#[derive(Debug)]
pub struct OciRepositoryNotFound;

impl fmt::Display for OciRepositoryNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OCI repository not found")
    }
}

impl std::error::Error for OciRepositoryNotFound {}

/// The read surface an OCI registry mirror needs: tag listing, manifest
/// fetch, and blob fetch. Implemented over `reqwest::blocking` in
/// production and with an in-memory fixture in tests.
pub trait OciStore: fmt::Debug + Send + Sync {
    fn list_tags(&self, ctx: &CancellationToken, repo: &str) -> Result<Vec<String>, anyhow::Error>;
    fn get_manifest_by_tag(
        &self,
        ctx: &CancellationToken,
        repo: &str,
        tag: &str,
    ) -> Result<(String, Vec<u8>), anyhow::Error>;
    fn get_manifest_by_digest(
        &self,
        ctx: &CancellationToken,
        repo: &str,
        digest: &str,
    ) -> Result<(String, Vec<u8>), anyhow::Error>;
    fn get_blob(
        &self,
        ctx: &CancellationToken,
        repo: &str,
        digest: &str,
    ) -> Result<Vec<u8>, anyhow::Error>;
}

/// A cheaply clonable handle to a store, compared by pointer identity (two
/// handles wrapping the same `Arc` are equal; two stores with identical
/// contents but distinct allocations are not -- location equality is about
/// "the same registry session", not deep content equality).
#[derive(Clone)]
pub struct OciStoreHandle(pub Arc<dyn OciStore>);

impl fmt::Debug for OciStoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OciStoreHandle({:?})", self.0)
    }
}

impl PartialEq for OciStoreHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for OciStoreHandle {}

#[derive(Deserialize)]
struct TagsList {
    tags: Vec<String>,
}

/// [`OciStore`] over the real OCI Distribution HTTP API: tag listing,
/// manifest GET with an `Accept` header covering both index and image
/// manifests, and blob GET.
pub struct HttpOciStore {
    registry_base: String,
    client_config: HttpClientConfig,
    retry: RetryPolicy,
    credentials: Box<dyn CredentialStore>,
}

impl fmt::Debug for HttpOciStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOciStore")
            .field("registry_base", &self.registry_base)
            .finish()
    }
}

impl HttpOciStore {
    /// `registry_domain` is the bare host (and optional port) advertised by
    /// the provider address or OCI mirror discovery document, e.g.
    /// `"registry.example.com"` or `"localhost:5000"`.
    pub fn new(registry_domain: impl Into<String>) -> Self {
        HttpOciStore {
            registry_base: format!("https://{}", registry_domain.into()),
            client_config: HttpClientConfig::default(),
            retry: RetryPolicy::new(3),
            credentials: Box::new(NoCredentials),
        }
    }

    /// Build against an already-complete base URL (scheme included),
    /// primarily for pointing tests at a `mockito` server over plain HTTP.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        HttpOciStore {
            registry_base: base_url.into(),
            client_config: HttpClientConfig::default(),
            retry: RetryPolicy::new(3),
            credentials: Box::new(NoCredentials),
        }
    }

    pub fn with_credentials(mut self, credentials: Box<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, client: &reqwest::blocking::Client, url: &str) -> reqwest::blocking::RequestBuilder {
        let hostname = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let mut req = client.get(url);
        if let Some(token) = self.credentials.token_for(&hostname) {
            req = req.bearer_auth(token);
        }
        req
    }

    fn get_manifest(
        &self,
        ctx: &CancellationToken,
        repo: &str,
        reference: &str,
    ) -> Result<(String, Vec<u8>), anyhow::Error> {
        if ctx.is_cancelled() {
            return Err(anyhow::Error::new(crate::error::Error::DownloadInterrupted));
        }
        let client = self.client_config.build()?;
        let url = format!("{}/v2/{repo}/manifests/{reference}", self.registry_base);
        let response = self.retry.retry(ctx, move || -> Result<reqwest::blocking::Response, anyhow::Error> {
            Ok(self
                .request(&client, &url)
                .header(
                    reqwest::header::ACCEPT,
                    "application/vnd.oci.image.index.v1+json, application/vnd.oci.image.manifest.v1+json",
                )
                .send()?
                .error_for_status()?)
        })?;
        let digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes()?.to_vec();
        let digest = digest.unwrap_or_else(|| format!("sha256:{}", hex::encode(sha2::Sha256::digest(&bytes))));
        Ok((digest, bytes))
    }
}

impl OciStore for HttpOciStore {
    fn list_tags(&self, ctx: &CancellationToken, repo: &str) -> Result<Vec<String>, anyhow::Error> {
        if ctx.is_cancelled() {
            return Err(anyhow::Error::new(crate::error::Error::DownloadInterrupted));
        }
        let client = self.client_config.build()?;
        let url = format!("{}/v2/{repo}/tags/list", self.registry_base);
        let response = self.retry.retry(ctx, move || -> Result<reqwest::blocking::Response, anyhow::Error> {
            let response = self.request(&client, &url).send()?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(anyhow::Error::new(crate::oci::OciRepositoryNotFound));
            }
            Ok(response.error_for_status()?)
        })?;
        let doc: TagsList = response.json()?;
        Ok(doc.tags)
    }

    fn get_manifest_by_tag(
        &self,
        ctx: &CancellationToken,
        repo: &str,
        tag: &str,
    ) -> Result<(String, Vec<u8>), anyhow::Error> {
        self.get_manifest(ctx, repo, tag)
    }

    fn get_manifest_by_digest(
        &self,
        ctx: &CancellationToken,
        repo: &str,
        digest: &str,
    ) -> Result<(String, Vec<u8>), anyhow::Error> {
        self.get_manifest(ctx, repo, digest)
    }

    fn get_blob(&self, ctx: &CancellationToken, repo: &str, digest: &str) -> Result<Vec<u8>, anyhow::Error> {
        if ctx.is_cancelled() {
            return Err(anyhow::Error::new(crate::error::Error::DownloadInterrupted));
        }
        let client = self.client_config.build()?;
        let url = format!("{}/v2/{repo}/blobs/{digest}", self.registry_base);
        let response = self.retry.retry(ctx, move || -> Result<reqwest::blocking::Response, anyhow::Error> {
            Ok(self.request(&client, &url).send()?.error_for_status()?)
        })?;
        Ok(response.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod http_store_tests {
    use super::*;

    #[test]
    fn list_tags_parses_tags_array() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/v2/hashicorp/foo/tags/list")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "hashicorp/foo", "tags": ["1.0.0", "1.0.1"]}"#)
            .create();

        let store = HttpOciStore::with_base_url(server.url());
        let tags = store.list_tags(&CancellationToken::new(), "hashicorp/foo").unwrap();
        assert_eq!(tags, vec!["1.0.0".to_string(), "1.0.1".to_string()]);
    }

    #[test]
    fn get_manifest_falls_back_to_computed_digest_without_header() {
        let mut server = mockito::Server::new();
        let body = r#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[]}"#;
        let _mock = server
            .mock("GET", "/v2/hashicorp/foo/manifests/1.0.0")
            .with_status(200)
            .with_body(body)
            .create();

        let store = HttpOciStore::with_base_url(server.url());
        let (digest, bytes) = store
            .get_manifest_by_tag(&CancellationToken::new(), "hashicorp/foo", "1.0.0")
            .unwrap();
        assert_eq!(bytes, body.as_bytes());
        assert_eq!(digest, format!("sha256:{}", hex::encode(sha2::Sha256::digest(body.as_bytes()))));
    }
}
