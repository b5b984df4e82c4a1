//! Shared constants.

pub const APP_NAME: &str = "stagehand";

/// Length of the truncated hashes used for recipe and plan identifiers.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Search path every image starts from before recipe entries are prepended.
pub const DEFAULT_SYSTEM_PATH: &[&str] = &[
  "/usr/local/sbin",
  "/usr/local/bin",
  "/usr/sbin",
  "/usr/bin",
  "/sbin",
  "/bin",
];

/// Location of the package database inside a stage rootfs.
pub const PACKAGE_DB_PATH: &str = "var/lib/stagehand/packages.json";

/// Name of the image configuration written next to the published rootfs.
pub const IMAGE_CONFIG_FILE: &str = "image.json";

/// Directory holding the published image filesystem.
pub const ROOTFS_DIR: &str = "rootfs";

/// 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

/// Environment variable overriding the artifact store directory.
pub const IMAGES_DIR_ENV: &str = "STAGEHAND_IMAGES_DIR";

/// Environment variable overriding the build work directory.
pub const WORK_DIR_ENV: &str = "STAGEHAND_WORK_DIR";
