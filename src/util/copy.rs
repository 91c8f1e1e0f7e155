//! Filesystem helpers shared by every `PackageLocation::install` (component K).

use std::fs;
use std::io;
use std::path::Path;

/// True if `a` and `b` are the same file or directory on disk (same device
/// and inode on Unix; canonicalized path equality elsewhere).
#[cfg(unix)]
pub fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let meta_a = match fs::metadata(a) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let meta_b = match fs::metadata(b) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    Ok(meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino())
}

#[cfg(not(unix))]
pub fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    let canon_a = match a.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let canon_b = match b.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    Ok(canon_a == canon_b)
}

/// Install `src` at `dst`: try a symlink first, and if the platform or
/// filesystem refuses it, fall back to a recursive copy. Dotfiles are
/// skipped, the executable bit is preserved on regular files, and existing
/// symlinks inside `src` are recreated verbatim rather than followed.
pub fn symlink_or_copy(src: &Path, dst: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if dst.exists() || dst.symlink_metadata().is_ok() {
        if dst.is_dir() && dst.symlink_metadata()?.file_type().is_dir() {
            fs::remove_dir_all(dst)?;
        } else {
            fs::remove_file(dst)?;
        }
    }

    match make_symlink(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => copy_tree(src, dst),
    }
}

#[cfg(unix)]
fn make_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn make_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            recreate_symlink(&target, &dst_path)?;
        } else if file_type.is_dir() {
            copy_tree(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
            preserve_executable_bit(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn recreate_symlink(target: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(windows)]
fn recreate_symlink(target: &Path, dst: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, dst)
    } else {
        std::os::windows::fs::symlink_file(target, dst)
    }
}

#[cfg(unix)]
fn preserve_executable_bit(src: &Path, dst: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let src_mode = fs::metadata(src)?.permissions().mode();
    let mut dst_perms = fs::metadata(dst)?.permissions();
    let mut mode = dst_perms.mode() & !0o111;
    mode |= src_mode & 0o111;
    dst_perms.set_mode(mode);
    fs::set_permissions(dst, dst_perms)
}

#[cfg(not(unix))]
fn preserve_executable_bit(_src: &Path, _dst: &Path) -> io::Result<()> {
    Ok(())
}
