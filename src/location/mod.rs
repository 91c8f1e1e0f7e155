//! Package locations (component B): the five places a resolved provider
//! package can be installed from, and their shared `install` contract.

mod http_url;
mod local_archive;
mod local_dir;
mod oci_blob;

pub use http_url::HttpUrl;
pub use local_archive::LocalArchive;
pub use local_dir::LocalDir;
pub use oci_blob::OciBlobArchive;

use std::path::Path;

use crate::auth::PackageAuthenticationResult;
use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::hash::Hash;
use crate::meta::PackageMeta;

/// Where a provider package's bytes currently live, and how to install it.
///
/// Dispatch is an open-coded match rather than a trait object: there are
/// exactly five variants, each location kind needs a different subset of
/// `install`'s parameters, and a `dyn Location` would hide exactly the
/// distinctions (archive vs. directory, networked vs. not) that callers
/// like [`crate::hash::package_hash_v1`] need to see through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageLocation {
    LocalDir(LocalDir),
    LocalArchive(LocalArchive),
    HttpUrl(HttpUrl),
    OciBlobArchive(OciBlobArchive),
}

impl PackageLocation {
    pub fn local_dir(path: impl Into<std::path::PathBuf>) -> Self {
        PackageLocation::LocalDir(LocalDir::new(path))
    }

    pub fn local_archive(path: impl Into<std::path::PathBuf>) -> Self {
        PackageLocation::LocalArchive(LocalArchive::new(path))
    }

    /// Install this package into `target_dir`, verifying `meta.authentication`
    /// (where applicable) and rejecting anything that fails to match a
    /// non-empty `allowed_hashes` list. `ctx` is polled cooperatively; a
    /// cancelled token always yields [`Error::DownloadInterrupted`].
    pub fn install(
        &self,
        ctx: &CancellationToken,
        meta: &PackageMeta,
        target_dir: &Path,
        allowed_hashes: &[Hash],
    ) -> Result<PackageAuthenticationResult, Error> {
        match self {
            PackageLocation::LocalDir(dir) => dir.install(ctx, meta, target_dir, allowed_hashes),
            PackageLocation::LocalArchive(archive) => {
                archive.install(ctx, meta, target_dir, allowed_hashes)
            }
            PackageLocation::HttpUrl(http) => http.install(ctx, meta, target_dir, allowed_hashes),
            PackageLocation::OciBlobArchive(oci) => {
                oci.install(ctx, meta, target_dir, allowed_hashes)
            }
        }
    }
}
