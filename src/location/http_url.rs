//! `HttpUrl` -- a package archive fetched over HTTP before being extracted.

use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::auth::PackageAuthenticationResult;
use crate::cancel::CancellationToken;
use crate::client::HttpClientConfig;
use crate::error::Error;
use crate::hash::Hash;
use crate::location::LocalArchive;
use crate::meta::PackageMeta;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpUrl {
    pub url: url::Url,
    /// Builder configuration for the `reqwest::blocking::Client` used to
    /// fetch this archive -- built lazily, per install, rather than shared,
    /// so any credentials folded into `url`/headers by the caller stay
    /// scoped to this one fetch (spec §9's "capability closures" note).
    pub config: HttpClientConfig,
    /// Known archive size, when the source already told us -- compared
    /// against the response's `Content-Length` as a cheap integrity check.
    pub expected_content_length: Option<u64>,
}

impl HttpUrl {
    pub fn new(url: url::Url) -> Self {
        HttpUrl {
            url,
            config: HttpClientConfig::default(),
            expected_content_length: None,
        }
    }

    pub fn with_expected_content_length(mut self, len: u64) -> Self {
        self.expected_content_length = Some(len);
        self
    }

    pub fn install(
        &self,
        ctx: &CancellationToken,
        meta: &PackageMeta,
        target_dir: &Path,
        allowed_hashes: &[Hash],
    ) -> Result<PackageAuthenticationResult, Error> {
        if ctx.is_cancelled() {
            return Err(Error::DownloadInterrupted);
        }

        let client = self.config.build().map_err(Error::Other)?;
        let retry = self.config.retry;

        let mut tmp = tempfile::NamedTempFile::new()?;
        let bytes_written = match retry.retry(ctx, || -> Result<u64, anyhow::Error> {
            tmp.as_file_mut().set_len(0)?;
            use std::io::Seek;
            tmp.as_file_mut().seek(std::io::SeekFrom::Start(0))?;
            self.fetch_into(ctx, &client, tmp.as_file_mut())
        }) {
            Ok(v) => v,
            Err(e) => {
                return Err(match e.downcast::<Error>() {
                    Ok(Error::DownloadInterrupted) => Error::DownloadInterrupted,
                    Ok(other) => Error::Other(anyhow::Error::new(other)),
                    Err(e) => Error::Other(e),
                });
            }
        };

        if let Some(expected) = self.expected_content_length {
            if expected != bytes_written {
                return Err(Error::Other(anyhow::anyhow!(
                    "downloaded {bytes_written} bytes for {}, expected {expected}",
                    self.url
                )));
            }
        }

        tmp.flush()?;
        debug!(url = %self.url, bytes = bytes_written, "fetched provider archive");

        let archive = LocalArchive::new(tmp.path());
        archive.install(ctx, meta, target_dir, allowed_hashes)
    }

    fn fetch_into(
        &self,
        ctx: &CancellationToken,
        client: &reqwest::blocking::Client,
        out: &mut std::fs::File,
    ) -> Result<u64, anyhow::Error> {
        let mut response = client.get(self.url.clone()).send()?.error_for_status()?;

        let mut total = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            if ctx.is_cancelled() {
                return Err(anyhow::Error::new(Error::DownloadInterrupted));
            }
            let n = std::io::Read::read(&mut response, &mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Platform, Provider};

    #[test]
    fn fetch_reports_interrupted_download_on_cancellation() {
        let mut server = mockito::Server::new();
        let body = vec![0u8; 1024 * 64];
        let _m = server
            .mock("GET", "/archive.zip")
            .with_status(200)
            .with_body(body)
            .create();

        let url = url::Url::parse(&format!("{}/archive.zip", server.url())).unwrap();
        let location = HttpUrl::new(url.clone());
        let meta = PackageMeta::new(
            Provider::new("registry.example.com", "hashicorp", "foo"),
            semver::Version::new(1, 0, 0),
            Platform::new("linux", "amd64"),
            "archive.zip",
            crate::location::PackageLocation::HttpUrl(location.clone()),
        );

        let ctx = CancellationToken::new();
        ctx.cancel();
        let tmp = tempfile::TempDir::new().unwrap();
        let err = location
            .install(&ctx, &meta, &tmp.path().join("out"), &[])
            .unwrap_err();
        assert!(matches!(err, Error::DownloadInterrupted));
    }

    #[test]
    fn mismatched_content_length_is_rejected() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/archive.zip")
            .with_status(200)
            .with_body(b"short".to_vec())
            .create();

        let url = url::Url::parse(&format!("{}/archive.zip", server.url())).unwrap();
        let location = HttpUrl::new(url).with_expected_content_length(9999);
        let meta = PackageMeta::new(
            Provider::new("registry.example.com", "hashicorp", "foo"),
            semver::Version::new(1, 0, 0),
            Platform::new("linux", "amd64"),
            "archive.zip",
            crate::location::PackageLocation::HttpUrl(location.clone()),
        );

        let tmp = tempfile::TempDir::new().unwrap();
        let err = location
            .install(&CancellationToken::new(), &meta, &tmp.path().join("out"), &[])
            .unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }
}
