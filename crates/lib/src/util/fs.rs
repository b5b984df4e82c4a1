//! Filesystem helpers for stage trees.
//!
//! Paths inside an image are written as absolute paths (`/usr/bin/tool`) and
//! are always mapped under a stage rootfs before touching the host filesystem.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

/// Symlinks followed while mapping one path before giving up.
const MAX_LINK_HOPS: usize = 40;

/// Map an in-image path onto a rootfs directory.
///
/// Symlinks met on the way are resolved inside `root`, as if `root` were `/`:
/// absolute link targets restart at `root` and `..` in a target stops at it.
/// The last component is not resolved, so callers replace or remove a link
/// there instead of writing through it.
///
/// Returns `None` when the path contains `..` or its links loop.
pub fn join_rooted(root: &Path, image_path: impl AsRef<Path>) -> Option<PathBuf> {
  map_rooted(root, image_path.as_ref(), false)
}

/// Like [`join_rooted`], but a link in the last component is resolved too.
///
/// Use this to read, or to create directories at, a path that may itself be
/// a link.
pub fn resolve_rooted(root: &Path, image_path: impl AsRef<Path>) -> Option<PathBuf> {
  map_rooted(root, image_path.as_ref(), true)
}

fn map_rooted(root: &Path, image_path: &Path, follow_last: bool) -> Option<PathBuf> {
  if image_path.components().any(|c| matches!(c, Component::ParentDir)) {
    return None;
  }

  // Components still to visit, next one on top.
  let mut pending = path_parts(image_path);
  pending.reverse();
  let mut resolved: Vec<OsString> = Vec::new();
  let mut hops = 0;

  while let Some(part) = pending.pop() {
    if part == ".." {
      resolved.pop();
      continue;
    }
    let is_last = pending.is_empty();
    resolved.push(part);
    if is_last && !follow_last {
      break;
    }

    let current = rooted_path(root, &resolved);
    if fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
      hops += 1;
      if hops > MAX_LINK_HOPS {
        return None;
      }
      let target = fs::read_link(&current).ok()?;
      resolved.pop();
      if target.has_root() {
        resolved.clear();
      }
      let mut parts = path_parts(&target);
      parts.reverse();
      pending.extend(parts);
    }
  }

  Some(rooted_path(root, &resolved))
}

/// Normal components of `path`, with `..` kept as a literal part.
fn path_parts(path: &Path) -> Vec<OsString> {
  path
    .components()
    .filter_map(|c| match c {
      Component::Normal(part) => Some(part.to_os_string()),
      Component::ParentDir => Some(OsString::from("..")),
      Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
    })
    .collect()
}

fn rooted_path(root: &Path, parts: &[OsString]) -> PathBuf {
  let mut path = root.to_path_buf();
  path.extend(parts);
  path
}

/// Whether `path` is an absolute in-image path without `..` components.
pub fn is_clean_image_path(path: &str) -> bool {
  path.starts_with('/') && !Path::new(path).components().any(|c| matches!(c, Component::ParentDir))
}

/// Normalize an in-image path for comparisons (`/a//b/` and `/a/b` are equal).
pub fn normalize_image_path(path: &str) -> String {
  let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
  format!("/{}", parts.join("/"))
}

/// Copy a file, symlink or directory tree from `src` to `dst`.
///
/// Directories are merged into an existing destination; files replace it.
/// Returns the number of filesystem entries written.
pub fn copy_path(src: &Path, dst: &Path) -> io::Result<u64> {
  let meta = fs::symlink_metadata(src)?;
  if meta.is_dir() {
    return copy_tree(src, dst);
  }

  if let Some(parent) = dst.parent() {
    fs::create_dir_all(parent)?;
  }
  copy_entry(src, dst, &meta)?;
  Ok(1)
}

/// Copy the contents of directory `src` into `dst`, creating it if needed.
///
/// Links already present under `dst` are resolved with `dst` as the root, so
/// nothing is written outside it.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
  let mut written = 0;
  fs::create_dir_all(dst)?;

  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }

    let meta = fs::symlink_metadata(entry.path())?;
    if meta.is_dir() {
      fs::create_dir_all(contained(resolve_rooted(dst, rel), rel)?)?;
    } else {
      let target = contained(join_rooted(dst, rel), rel)?;
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
      }
      copy_entry(entry.path(), &target, &meta)?;
    }
    written += 1;
  }

  Ok(written)
}

fn contained(target: Option<PathBuf>, rel: &Path) -> io::Result<PathBuf> {
  target.ok_or_else(|| {
    io::Error::new(
      io::ErrorKind::InvalidInput,
      format!("{} resolves outside the destination", rel.display()),
    )
  })
}

/// Remove `path` if it is a symlink, so a following write creates a file in
/// its place instead of writing to the link target.
pub fn unlink_symlink(path: &Path) -> io::Result<()> {
  if fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()) {
    fs::remove_file(path)?;
  }
  Ok(())
}

fn copy_entry(src: &Path, dst: &Path, meta: &fs::Metadata) -> io::Result<()> {
  unlink_symlink(dst)?;
  if fs::symlink_metadata(dst).is_ok_and(|m| m.is_dir() && !meta.is_dir()) {
    fs::remove_dir_all(dst)?;
  }

  if meta.file_type().is_symlink() {
    let target = fs::read_link(src)?;
    if fs::symlink_metadata(dst).is_ok() {
      fs::remove_file(dst)?;
    }
    return symlink(&target, dst);
  }

  fs::copy(src, dst)?;
  Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(target, link)
}

/// Remove a file, symlink or directory. Absent paths are not an error.
pub fn remove_path(path: &Path) -> io::Result<bool> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map(|_| true),
    Ok(_) => fs::remove_file(path).map(|_| true),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(e),
  }
}

/// Set a file's permission bits.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
  Ok(())
}

/// Whether a path is a regular file with at least one execute bit set.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;
  fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
  path.is_file()
}
