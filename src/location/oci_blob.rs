//! `OciBlobArchive` -- a package archive stored as an OCI content blob.

use std::io::Write;
use std::path::Path;

use sha2::Digest;
use tracing::debug;

use crate::auth::PackageAuthenticationResult;
use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::hash::Hash;
use crate::location::LocalArchive;
use crate::meta::PackageMeta;
use crate::oci::{BlobDescriptor, OciStoreHandle, ARCHIVE_MEDIA_TYPE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciBlobArchive {
    pub store: OciStoreHandle,
    pub registry: String,
    pub repo: String,
    pub blob_descriptor: BlobDescriptor,
}

impl OciBlobArchive {
    pub fn new(
        store: OciStoreHandle,
        registry: impl Into<String>,
        repo: impl Into<String>,
        blob_descriptor: BlobDescriptor,
    ) -> Self {
        OciBlobArchive {
            store,
            registry: registry.into(),
            repo: repo.into(),
            blob_descriptor,
        }
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

        if self.blob_descriptor.media_type != ARCHIVE_MEDIA_TYPE {
            return Err(Error::Other(anyhow::anyhow!(
                "OCI blob for {} has media type {}, expected {ARCHIVE_MEDIA_TYPE}",
                meta.provider,
                self.blob_descriptor.media_type
            )));
        }

        if let Some(platform) = &self.blob_descriptor.platform {
            if platform != &meta.target_platform {
                return Err(Error::PlatformNotSupported {
                    provider: meta.provider.clone(),
                    version: meta.version.clone(),
                    platform: meta.target_platform.clone(),
                    mirror_url: Some(self.registry.clone()),
                });
            }
        }

        let expected_hash = self.blob_descriptor.as_zh_hash().map_err(Error::Other)?;

        if !allowed_hashes.is_empty() && !allowed_hashes.contains(&expected_hash) {
            return Err(Error::Authentication(
                crate::auth::AuthenticationError::NoMatchingHash,
            ));
        }

        let bytes = self
            .store
            .0
            .get_blob(ctx, &self.repo, &self.blob_descriptor.digest)
            .map_err(Error::Other)?;

        let actual_hash = Hash::parse(&format!(
            "zh:{}",
            hex::encode(sha2::Sha256::digest(&bytes))
        ))?;
        if actual_hash != expected_hash {
            return Err(Error::Authentication(
                crate::auth::AuthenticationError::ChecksumMismatch {
                    filename: self.blob_descriptor.digest.clone(),
                    expected: expected_hash.value().to_string(),
                    actual: actual_hash.value().to_string(),
                },
            ));
        }

        let mut tmp = tempfile::NamedTempFile::new()?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        debug!(digest = %self.blob_descriptor.digest, "fetched OCI blob");

        let archive = LocalArchive::new(tmp.path());
        let result = archive.install(ctx, meta, target_dir, allowed_hashes)?;
        Ok(result.merge(&PackageAuthenticationResult::single(
            actual_hash,
            crate::hash::HashDisposition::verified_locally(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Platform, Provider};

    #[derive(Debug)]
    struct FixtureStore {
        blobs: std::collections::HashMap<String, Vec<u8>>,
    }

    impl crate::oci::OciStore for FixtureStore {
        fn list_tags(
            &self,
            _ctx: &CancellationToken,
            _repo: &str,
        ) -> Result<Vec<String>, anyhow::Error> {
            Ok(vec![])
        }
        fn get_manifest_by_tag(
            &self,
            _ctx: &CancellationToken,
            _repo: &str,
            _tag: &str,
        ) -> Result<(String, Vec<u8>), anyhow::Error> {
            anyhow::bail!("not used in this fixture")
        }
        fn get_manifest_by_digest(
            &self,
            _ctx: &CancellationToken,
            _repo: &str,
            _digest: &str,
        ) -> Result<(String, Vec<u8>), anyhow::Error> {
            anyhow::bail!("not used in this fixture")
        }
        fn get_blob(
            &self,
            _ctx: &CancellationToken,
            _repo: &str,
            digest: &str,
        ) -> Result<Vec<u8>, anyhow::Error> {
            self.blobs
                .get(digest)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such blob {digest}"))
        }
    }

    fn zip_with_one_file(name: &str, contents: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            zip.start_file(name, opts).unwrap();
            zip.write_all(contents).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn installs_matching_blob_and_reports_verified_checksum() {
        let archive_bytes = zip_with_one_file(
            "terraform-provider-foo",
            b"placeholder executable for v1.0.1 on amigaos_m86k",
        );
        let digest = format!("sha256:{}", hex::encode(sha2::Sha256::digest(&archive_bytes)));

        let mut blobs = std::collections::HashMap::new();
        blobs.insert(digest.clone(), archive_bytes.clone());
        let store = crate::oci::OciStoreHandle(std::sync::Arc::new(FixtureStore { blobs }));

        let descriptor = BlobDescriptor {
            media_type: ARCHIVE_MEDIA_TYPE.to_string(),
            artifact_type: Some("application/vnd.opentofu.providerpkg".to_string()),
            digest,
            size: archive_bytes.len() as u64,
            platform: Some(Platform::new("amigaos", "m86k")),
        };
        let loc = OciBlobArchive::new(store, "registry.example.com", "hashicorp/foo", descriptor);

        let meta = PackageMeta::new(
            Provider::new("registry.example.com", "hashicorp", "foo"),
            semver::Version::new(1, 0, 1),
            Platform::new("amigaos", "m86k"),
            "terraform-provider-foo",
            crate::location::PackageLocation::OciBlobArchive(loc.clone()),
        );

        let tmp = tempfile::TempDir::new().unwrap();
        let target = tmp.path().join("out");
        let result = loc
            .install(&CancellationToken::new(), &meta, &target, &[])
            .unwrap();

        assert_eq!(result.summary(), crate::auth::AuthenticationSummary::VerifiedChecksum);
        assert!(target.join("terraform-provider-foo").exists());
    }

    #[test]
    fn platform_mismatch_is_rejected_before_fetch() {
        let store = crate::oci::OciStoreHandle(std::sync::Arc::new(FixtureStore {
            blobs: std::collections::HashMap::new(),
        }));
        let descriptor = BlobDescriptor {
            media_type: ARCHIVE_MEDIA_TYPE.to_string(),
            artifact_type: Some("application/vnd.opentofu.providerpkg".to_string()),
            digest: "sha256:deadbeef".repeat(1),
            size: 0,
            platform: Some(Platform::new("tos", "m86k")),
        };
        let loc = OciBlobArchive::new(store, "registry.example.com", "hashicorp/foo", descriptor);
        let meta = PackageMeta::new(
            Provider::new("registry.example.com", "hashicorp", "foo"),
            semver::Version::new(1, 0, 1),
            Platform::new("amigaos", "m86k"),
            "terraform-provider-foo",
            crate::location::PackageLocation::OciBlobArchive(loc.clone()),
        );
        let tmp = tempfile::TempDir::new().unwrap();
        let err = loc
            .install(&CancellationToken::new(), &meta, &tmp.path().join("out"), &[])
            .unwrap_err();
        assert!(matches!(err, Error::PlatformNotSupported { .. }));
    }
}
