//! Hashing utilities for recipe identity and rootfs digests.
//!
//! - `ObjectHash`: a truncated 20-character hash identifying a recipe or plan
//! - `ContentHash`: a full 64-character hash of file or tree contents
//! - `digest_tree()`: deterministic directory hashing used for image digests

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::consts::OBJ_HASH_PREFIX_LEN;
use crate::util::fs::is_executable;

pub type HashError = serde_json::Error;

/// A content-addressed hash identifying a recipe or build plan.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let full = hash_bytes(serialized.as_bytes());
    Ok(ObjectHash(full.0[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// A full 64-character SHA256 hash (lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while digesting a directory tree.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read {path}: {message}")]
  Read { path: String, message: String },
}

/// Compute a deterministic digest of a directory tree.
///
/// Covers relative paths, file contents, the executable bit and symlink
/// targets. Timestamps and ownership are ignored so two builds of the same
/// recipe from the same inputs produce the same digest.
pub fn digest_tree(path: &Path) -> Result<ContentHash, DigestError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry.map_err(|e| DigestError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .to_string();

    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let line = if file_type.is_file() {
      let content = hash_file(entry_path).map_err(|e| DigestError::Read {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let mode = if is_executable(entry_path) { "x" } else { "-" };
      format!("F:{}:{}:{}", rel_path, mode, content.0)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| DigestError::Read {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      format!("L:{}:{}", rel_path, target.to_string_lossy())
    } else {
      continue;
    };

    entries.push((rel_path, line));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, line) in entries {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[derive(Serialize)]
  struct Named {
    name: String,
  }

  impl Hashable for Named {}

  #[test]
  fn object_hash_is_truncated_and_deterministic() {
    let a = Named { name: "final".to_string() };
    let h1 = a.compute_hash().unwrap();
    let h2 = a.compute_hash().unwrap();
    assert_eq!(h1, h2);
    assert_eq!(h1.0.len(), OBJ_HASH_PREFIX_LEN);

    let b = Named { name: "base".to_string() };
    assert_ne!(h1, b.compute_hash().unwrap());
  }

  #[test]
  fn hash_bytes_known_value() {
    assert_eq!(
      hash_bytes(b"hello").0,
      "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
  }

  #[test]
  fn digest_empty_directory() {
    let temp = tempdir().unwrap();
    let hash = digest_tree(temp.path()).unwrap();
    assert_eq!(hash.0.len(), 64);
  }

  #[test]
  fn digest_is_deterministic_across_trees() {
    let t1 = tempdir().unwrap();
    let t2 = tempdir().unwrap();
    for t in [&t1, &t2] {
      fs::create_dir_all(t.path().join("usr/bin")).unwrap();
      fs::write(t.path().join("usr/bin/tool"), "#!/bin/sh\n").unwrap();
      fs::write(t.path().join("README"), "hi").unwrap();
    }

    assert_eq!(digest_tree(t1.path()).unwrap(), digest_tree(t2.path()).unwrap());
  }

  #[test]
  fn digest_changes_with_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "original").unwrap();
    let hash1 = digest_tree(temp.path()).unwrap();

    fs::write(temp.path().join("file.txt"), "modified").unwrap();
    let hash2 = digest_tree(temp.path()).unwrap();

    assert_ne!(hash1, hash2);
  }

  #[test]
  #[cfg(unix)]
  fn digest_tracks_executable_bit() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempdir().unwrap();
    let file = temp.path().join("tool");
    fs::write(&file, "binary").unwrap();
    let before = digest_tree(temp.path()).unwrap();

    fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();
    let after = digest_tree(temp.path()).unwrap();

    assert_ne!(before, after);
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let file_path = temp.path().join("test.txt");
    fs::write(&file_path, "hello").unwrap();

    assert_eq!(hash_file(&file_path).unwrap(), hash_bytes(b"hello"));
  }
}
