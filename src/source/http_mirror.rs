//! HTTP mirror source (component E): a static `index.json`/`<version>.json`
//! protocol served by a "network mirror" as opposed to a provider's own
//! origin registry.

use std::collections::HashMap;

use serde::Deserialize;
use url::Url;

use crate::auth::Authenticator;
use crate::cancel::CancellationToken;
use crate::client::HttpClientConfig;
use crate::credentials::{CredentialStore, NoCredentials};
use crate::error::Error;
use crate::hash::Hash;
use crate::location::PackageLocation;
use crate::meta::PackageMeta;
use crate::provider::{Platform, Provider, VersionList};
use crate::source::Source;

#[derive(Debug, Deserialize)]
struct IndexDocument {
    versions: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ArchiveDocument {
    archives: HashMap<String, ArchiveEntry>,
}

#[derive(Debug, Deserialize)]
struct ArchiveEntry {
    url: String,
    hashes: Vec<String>,
}

/// Speaks the network-mirror protocol: `GET {base}/{h}/{ns}/{type}/index.json`
/// and `GET {base}/{h}/{ns}/{type}/<ver>.json`, relative to `base_url`.
#[derive(Debug)]
pub struct HttpMirrorSource {
    base_url: Url,
    config: HttpClientConfig,
    credentials: Box<dyn CredentialStore>,
}

impl HttpMirrorSource {
    pub fn new(base_url: Url) -> Self {
        HttpMirrorSource {
            base_url,
            config: HttpClientConfig::default(),
            credentials: Box::new(NoCredentials),
        }
    }

    pub fn with_config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_credentials(mut self, credentials: Box<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match self.base_url.host_str().and_then(|h| self.credentials.token_for(h)) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn path_for(&self, provider: &Provider, suffix: &str) -> Result<Url, Error> {
        self.base_url
            .join(&format!(
                "{}/{}/{}/{}",
                provider.hostname(),
                provider.namespace(),
                provider.type_(),
                suffix
            ))
            .map_err(|e| Error::Other(anyhow::Error::new(e)))
    }

    fn get(
        &self,
        client: &reqwest::blocking::Client,
        provider: &Provider,
        url: &Url,
    ) -> Result<reqwest::blocking::Response, Error> {
        let response = self
            .authorize(client.get(url.clone()))
            .send()
            .map_err(|e| Error::QueryFailed {
                provider: provider.clone(),
                mirror_url: url.to_string(),
                wrapped: anyhow::Error::new(e),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::provider_not_found(provider.clone()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized {
                hostname: self.base_url.host_str().unwrap_or_default().to_string(),
            });
        }
        if status.is_server_error() {
            return Err(Error::QueryFailed {
                provider: provider.clone(),
                mirror_url: url.to_string(),
                wrapped: anyhow::anyhow!("server returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(Error::QueryFailed {
                provider: provider.clone(),
                mirror_url: url.to_string(),
                wrapped: anyhow::anyhow!("unexpected status {status}"),
            });
        }
        Ok(response)
    }
}

impl Source for HttpMirrorSource {
    fn available_versions(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
    ) -> Result<(VersionList, Vec<String>), Error> {
        if ctx.is_cancelled() {
            return Err(Error::DownloadInterrupted);
        }
        let client = self.config.build().map_err(Error::Other)?;
        let url = self.path_for(provider, "index.json")?;
        let response = self.get(&client, provider, &url)?;
        let doc: IndexDocument = response.json().map_err(|e| Error::QueryFailed {
            provider: provider.clone(),
            mirror_url: url.to_string(),
            wrapped: anyhow::Error::new(e),
        })?;

        let versions = doc
            .versions
            .keys()
            .filter_map(|v| semver::Version::parse(v).ok())
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
        let client = self.config.build().map_err(Error::Other)?;
        let url = self.path_for(provider, &format!("{version}.json"))?;
        let response = self.get(&client, provider, &url)?;
        let final_url = response.url().clone();
        let doc: ArchiveDocument = response.json().map_err(|e| Error::QueryFailed {
            provider: provider.clone(),
            mirror_url: url.to_string(),
            wrapped: anyhow::Error::new(e),
        })?;

        let entry = doc.archives.get(&platform.key()).ok_or_else(|| Error::PlatformNotSupported {
            provider: provider.clone(),
            version: version.clone(),
            platform: platform.clone(),
            mirror_url: Some(url.to_string()),
        })?;

        let archive_url = final_url.join(&entry.url).map_err(|e| Error::Other(anyhow::Error::new(e)))?;
        let hashes: Vec<Hash> = entry.hashes.iter().filter_map(|h| Hash::parse(h).ok()).collect();

        let filename = archive_url
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or("provider.zip")
            .to_string();

        Ok(PackageMeta::new(
            provider.clone(),
            version.clone(),
            platform.clone(),
            filename,
            PackageLocation::HttpUrl(crate::location::HttpUrl::new(archive_url)),
        )
        .with_authentication(Authenticator::package_hash(Some(platform.clone()), hashes)))
    }

    fn for_display(&self, provider: &Provider) -> String {
        format!("{} via mirror {}", provider, self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_versions_parses_index_document() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/registry.example.com/hashicorp/foo/index.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"versions": {"1.0.0": {}, "1.0.1": {}, "1.0.2-beta.1": {}}}"#)
            .create();

        let source = HttpMirrorSource::new(Url::parse(&(server.url() + "/")).unwrap());
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        let (versions, _) = source
            .available_versions(&CancellationToken::new(), &provider)
            .unwrap();

        let rendered: Vec<_> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(rendered, vec!["1.0.0", "1.0.1", "1.0.2-beta.1"]);
    }

    #[test]
    fn missing_index_is_provider_not_found() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/registry.example.com/hashicorp/foo/index.json")
            .with_status(404)
            .create();

        let source = HttpMirrorSource::new(Url::parse(&(server.url() + "/")).unwrap());
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        let err = source
            .available_versions(&CancellationToken::new(), &provider)
            .unwrap_err();
        assert!(err.is_provider_not_found());
    }

    #[test]
    fn package_meta_reports_required_hash_from_recognized_scheme() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/registry.example.com/hashicorp/foo/1.0.0.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"archives": {"tos_m68k": {"url": "./foo_1.0.0_tos_m68k.zip", "hashes": ["h1:placeholder-hash", "h0:unacceptable-hash"]}}}"#,
            )
            .create();

        let source = HttpMirrorSource::new(Url::parse(&(server.url() + "/")).unwrap());
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        let platform = Platform::new("tos", "m68k");
        let meta = source
            .package_meta(
                &CancellationToken::new(),
                &provider,
                &semver::Version::new(1, 0, 0),
                &platform,
            )
            .unwrap();

        match meta.authentication.unwrap() {
            crate::auth::Authenticator::PackageHash { all, required, .. } => {
                assert_eq!(all.len(), 2);
                assert_eq!(required.len(), 1);
                assert_eq!(required[0].to_string(), "h1:placeholder-hash");
            }
            other => panic!("unexpected authenticator: {other:?}"),
        }
    }

    #[test]
    fn missing_platform_entry_is_platform_not_supported() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/registry.example.com/hashicorp/foo/1.0.0.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"archives": {"linux_amd64": {"url": "./x.zip", "hashes": []}}}"#)
            .create();

        let source = HttpMirrorSource::new(Url::parse(&(server.url() + "/")).unwrap());
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        let platform = Platform::new("tos", "m68k");
        let err = source
            .package_meta(
                &CancellationToken::new(),
                &provider,
                &semver::Version::new(1, 0, 0),
                &platform,
            )
            .unwrap_err();
        assert!(matches!(err, Error::PlatformNotSupported { .. }));
    }
}
