use std::path::PathBuf;

use crate::consts::{APP_NAME, IMAGES_DIR_ENV, WORK_DIR_ENV};

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Artifact store holding pre-exported images as `<name>/<tag>/`.
///
/// `STAGEHAND_IMAGES_DIR` takes precedence over the data directory.
pub fn images_dir() -> PathBuf {
  std::env::var(IMAGES_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|_| data_dir().join("images"))
}

/// Scratch space for stage trees while a build runs.
///
/// `STAGEHAND_WORK_DIR` takes precedence over the cache directory.
pub fn work_dir() -> PathBuf {
  std::env::var(WORK_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|_| cache_dir().join("work"))
}
