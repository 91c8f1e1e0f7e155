//! `LocalDir` -- a package that already lives on local disk as a directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::auth::PackageAuthenticationResult;
use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::hash::Hash;
use crate::meta::PackageMeta;
use crate::util::copy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDir {
    path: PathBuf,
}

impl LocalDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalDir { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Install by symlinking (preferred) or recursively copying into
    /// `target_dir`. `allowed_hashes` made up entirely of `zh:` entries
    /// degrades to "accept any" -- local-disk packages are treated as more
    /// trusted, and no `zh:` hash can be recomputed without archive bytes
    /// (spec §3, §9 open question).
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

        if copy::same_file(&self.path, target_dir)? {
            return Err(Error::InstallFailed {
                provider: meta.provider.clone(),
                version: meta.version.clone(),
                reason: "source and target directories are the same physical directory"
                    .to_string(),
            });
        }

        if !allowed_hashes.is_empty() && !only_zh_hashes(allowed_hashes) {
            let loc = crate::location::PackageLocation::LocalDir(self.clone());
            let matched = crate::hash::hashes_matching_package(&loc, allowed_hashes.to_vec())
                .next()
                .is_some();
            if !matched {
                return Err(Error::Authentication(
                    crate::auth::AuthenticationError::NoMatchingHash,
                ));
            }
        }

        copy::symlink_or_copy(&self.path, target_dir).map_err(Error::Other)?;
        debug!(from = %self.path.display(), to = %target_dir.display(), "installed via symlink or copy");

        Ok(PackageAuthenticationResult::empty())
    }
}

/// `allowed_hashes` containing only `zh:` entries against a `LocalDir`
/// degrades to "accept any" (documented exception, spec §3).
fn only_zh_hashes(allowed_hashes: &[Hash]) -> bool {
    allowed_hashes
        .iter()
        .all(|h| h.has_scheme(crate::hash::SCHEME_ZH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Platform, Provider};
    use tempfile::TempDir;

    fn test_meta(location: crate::location::PackageLocation) -> PackageMeta {
        PackageMeta::new(
            Provider::new("registry.example.com", "hashicorp", "foo"),
            semver::Version::new(1, 0, 0),
            Platform::new("linux", "amd64"),
            "terraform-provider-foo",
            location,
        )
    }

    #[test]
    fn refuses_to_install_into_itself() {
        let tmp = TempDir::new().unwrap();
        let dir = LocalDir::new(tmp.path());
        let meta = test_meta(crate::location::PackageLocation::local_dir(tmp.path()));
        let err = dir
            .install(&CancellationToken::new(), &meta, tmp.path(), &[])
            .unwrap_err();
        assert!(matches!(err, Error::InstallFailed { .. }));
    }

    #[test]
    fn zh_only_allowed_hashes_degrade_to_accept_any() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("file.txt"), b"hi").unwrap();
        let target = TempDir::new().unwrap();
        let target_dir = target.path().join("out");

        let dir = LocalDir::new(src.path());
        let meta = test_meta(crate::location::PackageLocation::local_dir(src.path()));
        let zh_only = vec![Hash::parse("zh:deadbeef").unwrap()];
        let result = dir.install(&CancellationToken::new(), &meta, &target_dir, &zh_only);
        assert!(result.is_ok());
    }

    #[test]
    fn cancelled_token_is_checked_before_any_io() {
        let src = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let dir = LocalDir::new(src.path());
        let meta = test_meta(crate::location::PackageLocation::local_dir(src.path()));
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = dir
            .install(&ctx, &meta, &target.path().join("out"), &[])
            .unwrap_err();
        assert!(matches!(err, Error::DownloadInterrupted));
    }
}
