//! `LocalArchive` -- a zip archive already on local disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::auth::{AuthenticationError, PackageAuthenticationResult};
use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::hash::{hashes_matching_package, Hash};
use crate::meta::PackageMeta;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArchive {
    path: PathBuf,
}

impl LocalArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalArchive { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
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

        let auth_result = match &meta.authentication {
            Some(authenticator) => authenticator
                .authenticate(&self.path)?
                .unwrap_or_default(),
            None => PackageAuthenticationResult::empty(),
        };

        if !allowed_hashes.is_empty() {
            let loc = crate::location::PackageLocation::LocalArchive(self.clone());
            if hashes_matching_package(&loc, allowed_hashes.to_vec())
                .next()
                .is_none()
            {
                return Err(Error::Authentication(AuthenticationError::NoMatchingHash));
            }
        }

        extract_zip(&self.path, target_dir, ctx)?;
        debug!(archive = %self.path.display(), target = %target_dir.display(), "extracted archive");

        Ok(auth_result)
    }
}

/// Extract every entry into `target_dir`, overwriting existing files,
/// preserving only the executable bit (never the full archived mode) and
/// recreating symlink entries verbatim.
fn extract_zip(archive: &Path, target_dir: &Path, ctx: &CancellationToken) -> Result<(), Error> {
    fs::create_dir_all(target_dir)?;
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| anyhow::anyhow!(e))?;

    for i in 0..zip.len() {
        if ctx.is_cancelled() {
            return Err(Error::DownloadInterrupted);
        }
        let mut entry = zip.by_index(i).map_err(|e| anyhow::anyhow!(e))?;
        let out_path = match entry.enclosed_name() {
            Some(p) => target_dir.join(p),
            None => continue,
        };

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if is_symlink_entry(&entry) {
            let mut target = String::new();
            std::io::Read::read_to_string(&mut entry, &mut target)?;
            if !symlink_target_is_contained(target_dir, &out_path, &target) {
                return Err(Error::Other(anyhow::anyhow!(
                    "archive entry {:?} is a symlink pointing outside the install directory",
                    out_path.strip_prefix(target_dir).unwrap_or(&out_path)
                )));
            }
            recreate_symlink(&target, &out_path)?;
            continue;
        }

        let mut out_file = fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;

        apply_executable_bit(&entry, &out_path)?;
    }

    Ok(())
}

/// Reject a symlink target that would resolve outside `target_dir`: an
/// absolute path, or a relative path whose `..` components walk back past
/// `target_dir`. Resolution is purely lexical since the link target need
/// not exist yet. A later archive entry writing through such a symlink
/// (zip-slip) would otherwise escape the install directory entirely.
fn symlink_target_is_contained(target_dir: &Path, out_path: &Path, link_target: &str) -> bool {
    if Path::new(link_target).is_absolute() {
        return false;
    }
    let Some(parent) = out_path.parent() else {
        return false;
    };

    let mut resolved = PathBuf::new();
    for component in parent.join(link_target).components() {
        use std::path::Component;
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return false;
                }
            }
            other => resolved.push(other.as_os_str()),
        }
    }

    resolved.starts_with(target_dir)
}

/// A zip entry is a symlink when its stored Unix mode has `S_IFLNK` set in
/// the file-type bits; the link target is then the entry's raw content
/// rather than real file bytes (standard Info-ZIP Unix extra-field
/// convention, the same one `LocalDir`'s copy side mirrors).
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn is_symlink_entry(entry: &zip::read::ZipFile) -> bool {
    matches!(entry.unix_mode(), Some(mode) if mode & S_IFMT == S_IFLNK)
}

#[cfg(unix)]
fn recreate_symlink(target: &str, out_path: &Path) -> std::io::Result<()> {
    if out_path.exists() || out_path.symlink_metadata().is_ok() {
        let _ = fs::remove_file(out_path);
    }
    std::os::unix::fs::symlink(target, out_path)
}

#[cfg(not(unix))]
fn recreate_symlink(target: &str, out_path: &Path) -> std::io::Result<()> {
    fs::write(out_path, target)
}

#[cfg(unix)]
fn apply_executable_bit(entry: &zip::read::ZipFile, out_path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = entry.unix_mode() {
        let mut perms = fs::metadata(out_path)?.permissions();
        let executable_bits = mode & 0o111;
        let mut new_mode = perms.mode() & !0o111;
        new_mode |= executable_bits;
        perms.set_mode(new_mode);
        fs::set_permissions(out_path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_executable_bit(_entry: &zip::read::ZipFile, _out_path: &Path) -> std::io::Result<()> {
    Ok(())
}
