//! Fetch action implementation.
//!
//! Downloads a file from a pinned URL, optionally verifying its SHA256, and
//! installs it into a stage rootfs.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::execute::types::ExecuteError;
use crate::util::fs::{is_executable, join_rooted, set_mode, unlink_symlink};
use crate::util::hash::{hash_bytes, hash_file};

/// Download `url` into `downloads_dir`.
///
/// When `expected_sha256` is given the download is verified against it and a
/// previously downloaded file with the same hash is reused. Without a checksum
/// the content is trusted as served.
pub async fn execute_fetch(
  url: &str,
  expected_sha256: Option<&str>,
  downloads_dir: &Path,
) -> Result<PathBuf, ExecuteError> {
  info!(url = %url, "fetching URL");

  fs::create_dir_all(downloads_dir).await?;
  let dest_path = downloads_dir.join(download_name(url, expected_sha256));

  if let Some(expected) = expected_sha256
    && dest_path.exists()
  {
    debug!(path = ?dest_path, "checking cached file");
    if let Ok(actual) = hash_file(&dest_path)
      && actual.0.eq_ignore_ascii_case(expected)
    {
      info!(path = ?dest_path, "using cached file");
      return Ok(dest_path);
    }
  }

  if expected_sha256.is_none() {
    warn!(url = %url, "no sha256 pinned for download, integrity is not verified");
  }

  let response = reqwest::get(url).await.map_err(|e| ExecuteError::Network {
    url: url.to_string(),
    message: e.to_string(),
  })?;

  if !response.status().is_success() {
    return Err(ExecuteError::Network {
      url: url.to_string(),
      message: format!("HTTP {}", response.status()),
    });
  }

  let bytes = response.bytes().await.map_err(|e| ExecuteError::Network {
    url: url.to_string(),
    message: e.to_string(),
  })?;

  if let Some(expected) = expected_sha256 {
    let actual = hash_bytes(&bytes);
    if !actual.0.eq_ignore_ascii_case(expected) {
      return Err(ExecuteError::ChecksumMismatch {
        url: url.to_string(),
        expected: expected.to_string(),
        actual: actual.0,
      });
    }
  }

  let mut file = fs::File::create(&dest_path).await?;
  file.write_all(&bytes).await?;
  file.flush().await?;

  info!(path = ?dest_path, size = bytes.len(), "download complete");

  Ok(dest_path)
}

/// Download `url` and place it at the in-image path `dest` under `rootfs`.
///
/// With `executable`, the file is made executable and checked afterwards.
pub async fn install_fetched(
  url: &str,
  expected_sha256: Option<&str>,
  downloads_dir: &Path,
  rootfs: &Path,
  dest: &str,
  executable: bool,
) -> Result<PathBuf, ExecuteError> {
  let target = join_rooted(rootfs, dest).ok_or_else(|| ExecuteError::PathEscape { path: dest.to_string() })?;
  let downloaded = execute_fetch(url, expected_sha256, downloads_dir).await?;

  if let Some(parent) = target.parent() {
    fs::create_dir_all(parent).await?;
  }
  unlink_symlink(&target)?;
  fs::copy(&downloaded, &target).await?;

  if executable {
    set_mode(&target, 0o755)?;
    if !is_executable(&target) {
      return Err(ExecuteError::NotExecutable { path: target });
    }
  }

  debug!(path = ?target, executable, "installed download");
  Ok(target)
}

/// Name a download after the last URL path component, prefixed with the
/// pinned checksum (or a hash of the URL) so distinct artifacts never collide.
fn download_name(url: &str, sha256: Option<&str>) -> String {
  let prefix = match sha256 {
    Some(sha) => sha.to_ascii_lowercase(),
    None => hash_bytes(url.as_bytes()).0,
  };
  format!("{}-{}", &prefix[..16.min(prefix.len())], url_to_filename(url))
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to `download`
/// if no suitable filename can be extracted.
fn url_to_filename(url: &str) -> String {
  let path = url.split(['?', '#']).next().unwrap_or(url);
  if let Some(filename) = path.rsplit('/').next() {
    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  "download".to_string()
}
