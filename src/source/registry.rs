//! Origin registry source (component F): the native `providers.v1` protocol,
//! discovered per-hostname rather than pointed at a fixed mirror base URL.

use serde::Deserialize;

use crate::auth::{Authenticator, SignatureAuthenticator, SigningPolicy};
use crate::cancel::CancellationToken;
use crate::client::{HttpClientConfig, RetryPolicy};
use crate::discovery::Discovery;
use crate::error::Error;
use crate::location::{HttpUrl, PackageLocation};
use crate::meta::PackageMeta;
use crate::provider::{Platform, Provider, VersionList};
use crate::source::Source;

#[derive(Debug, Deserialize)]
struct VersionsDocument {
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
}

#[derive(Debug, Deserialize)]
struct DownloadDocument {
    filename: String,
    download_url: String,
    shasum: String,
    shasums_url: String,
    shasums_signature_url: String,
    signing_keys: SigningKeys,
}

#[derive(Debug, Deserialize)]
struct SigningKeys {
    gpg_public_keys: Vec<GpgPublicKey>,
}

#[derive(Debug, Deserialize)]
struct GpgPublicKey {
    ascii_armor: String,
}

/// Speaks a provider's own `providers.v1` protocol, found through
/// [`Discovery`] rather than a caller-supplied base URL.
#[derive(Debug)]
pub struct RegistrySource {
    discovery: Box<dyn Discovery>,
    client_config: HttpClientConfig,
    retry: RetryPolicy,
    signing_policy: SigningPolicy,
}

impl RegistrySource {
    pub fn new(discovery: Box<dyn Discovery>) -> Self {
        RegistrySource {
            discovery,
            client_config: HttpClientConfig::default(),
            retry: RetryPolicy::new(3),
            signing_policy: SigningPolicy::permissive(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_signing_policy(mut self, policy: SigningPolicy) -> Self {
        self.signing_policy = policy;
        self
    }

    fn base_url(&self, provider: &Provider) -> Result<String, Error> {
        self.discovery.discover_providers_v1(provider.hostname())
    }

    fn fetch_json<T: for<'de> Deserialize<'de>>(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
        url: &str,
    ) -> Result<T, Error> {
        let client = self.client_config.build().map_err(Error::Other)?;
        let url_owned = url.to_string();
        let provider_owned = provider.clone();
        let response = self
            .retry
            .retry(ctx, move || -> Result<reqwest::blocking::Response, anyhow::Error> {
                let response = client.get(&url_owned).send()?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(anyhow::Error::new(Error::provider_not_found(provider_owned.clone())));
                }
                Ok(response.error_for_status()?)
            })
            .map_err(|e| match e.downcast::<Error>() {
                Ok(err) => err,
                Err(e) => Error::Other(e),
            })?;

        response.json::<T>().map_err(|e| Error::QueryFailed {
            provider: provider.clone(),
            mirror_url: url.to_string(),
            wrapped: anyhow::Error::new(e),
        })
    }

    fn fetch_text(&self, ctx: &CancellationToken, provider: &Provider, url: &str) -> Result<String, Error> {
        let client = self.client_config.build().map_err(Error::Other)?;
        let url_owned = url.to_string();
        let provider_owned = provider.clone();
        let response = self
            .retry
            .retry(ctx, move || -> Result<reqwest::blocking::Response, anyhow::Error> {
                Ok(client.get(&url_owned).send()?.error_for_status()?)
            })
            .map_err(|e| match e.downcast::<Error>() {
                Ok(err) => err,
                Err(e) => Error::Other(e),
            })?;
        response.text().map_err(|e| Error::QueryFailed {
            provider: provider.clone(),
            mirror_url: url.to_string(),
            wrapped: anyhow::Error::new(e),
        })
    }
}

impl Source for RegistrySource {
    fn available_versions(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
    ) -> Result<(VersionList, Vec<String>), Error> {
        if ctx.is_cancelled() {
            return Err(Error::DownloadInterrupted);
        }
        let base = self.base_url(provider)?;
        let url = format!(
            "{}/{}/{}/versions",
            base.trim_end_matches('/'),
            provider.namespace(),
            provider.type_()
        );
        let doc: VersionsDocument = self.fetch_json(ctx, provider, &url)?;
        let versions = doc
            .versions
            .iter()
            .filter_map(|v| semver::Version::parse(&v.version).ok())
            .collect();
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
        let base = self.base_url(provider)?;
        let url = format!(
            "{}/{}/{}/{}/download/{}/{}",
            base.trim_end_matches('/'),
            provider.namespace(),
            provider.type_(),
            version,
            platform.os,
            platform.arch
        );
        let download: DownloadDocument = self.fetch_json(ctx, provider, &url)?;

        let sums_doc = self.fetch_text(ctx, provider, &download.shasums_url)?;
        let signature_armor = self.fetch_text(ctx, provider, &download.shasums_signature_url)?;

        let keys: Vec<String> = download
            .signing_keys
            .gpg_public_keys
            .iter()
            .map(|k| k.ascii_armor.clone())
            .collect();

        let signature = SignatureAuthenticator {
            document: sums_doc.clone().into_bytes(),
            signature: signature_armor,
            keys,
            provider_hostname: provider.hostname().to_string(),
            policy: self.signing_policy,
        };

        let authentication = Authenticator::All(vec![
            Authenticator::MatchingChecksum {
                document: sums_doc,
                filename: download.filename.clone(),
                want_sha256: download.shasum.clone(),
            },
            Authenticator::Signature(signature),
        ]);

        let archive_url = url::Url::parse(&download.download_url).map_err(|e| Error::Other(anyhow::Error::new(e)))?;

        Ok(PackageMeta::new(
            provider.clone(),
            version.clone(),
            platform.clone(),
            download.filename,
            PackageLocation::HttpUrl(HttpUrl::new(archive_url)),
        )
        .with_authentication(authentication))
    }

    fn for_display(&self, provider: &Provider) -> String {
        format!("{provider} via origin registry")
    }
}
