//! Pinned external artifact sources.
//!
//! A source is either a pre-exported image tree in the artifact store,
//! addressed by name and exact tag, or a single file at a fixed URL. Both must
//! be pinned: floating tags, version ranges and `latest` URLs are rejected
//! before anything runs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::execute::actions::fetch::install_fetched;
use crate::execute::types::ExecuteError;
use crate::util::fs::copy_tree;

/// An external, independently produced input consumed by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactSource {
  /// A pre-exported filesystem tree at `<images_dir>/<image>/<tag>/`.
  Image { image: String, tag: String },

  /// A single file downloaded from a fixed URL and placed at `dest`.
  Url {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    dest: String,
  },
}

/// Why a source reference is not pinned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PinError {
  #[error("image name '{0}' is invalid")]
  InvalidName(String),

  #[error("tag is empty")]
  EmptyTag,

  #[error("tag '{0}' is invalid")]
  InvalidTag(String),

  #[error("'{0}' is a floating tag")]
  FloatingTag(String),

  #[error("'{0}' is a version range, not an exact version")]
  Range(String),

  #[error("'{0}' is not an http(s) URL")]
  UnsupportedScheme(String),

  #[error("'{0}' points at a moving 'latest' location")]
  FloatingUrl(String),

  #[error("'{0}' is not a sha256 hex digest")]
  InvalidChecksum(String),
}

impl ArtifactSource {
  /// Human-readable reference, e.g. `python:3.12.4-slim` or the URL.
  pub fn reference(&self) -> String {
    match self {
      ArtifactSource::Image { image, tag } => format!("{}:{}", image, tag),
      ArtifactSource::Url { url, .. } => url.clone(),
    }
  }

  /// Check that the reference is pinned to one exact upstream artifact.
  pub fn validate(&self) -> Result<(), PinError> {
    match self {
      ArtifactSource::Image { image, tag } => {
        validate_image_name(image)?;
        validate_tag(tag)
      }
      ArtifactSource::Url { url, sha256, .. } => {
        validate_url(url)?;
        if let Some(sha256) = sha256 {
          validate_sha256(sha256)?;
        }
        Ok(())
      }
    }
  }
}

/// Image names are relative paths inside the artifact store.
pub fn validate_image_name(name: &str) -> Result<(), PinError> {
  let valid = !name.is_empty()
    && !name.starts_with('/')
    && name.split('/').all(|part| {
      !part.is_empty()
        && part != "."
        && part != ".."
        && part
          .chars()
          .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    });
  if valid {
    Ok(())
  } else {
    Err(PinError::InvalidName(name.to_string()))
  }
}

/// Accept exact tags only.
///
/// Rejected: empty tags, `latest`, range operators, wildcard components such
/// as `1.x` or `3.*`, and anything that is not a single store directory name.
pub fn validate_tag(tag: &str) -> Result<(), PinError> {
  if tag.is_empty() {
    return Err(PinError::EmptyTag);
  }
  if tag.eq_ignore_ascii_case("latest") {
    return Err(PinError::FloatingTag(tag.to_string()));
  }

  let has_range_syntax = tag
    .chars()
    .any(|c| matches!(c, '*' | '^' | '~' | '>' | '<' | '=' | ',' | '|') || c.is_whitespace());
  let has_wildcard_component = tag
    .split(['.', '-'])
    .any(|part| part.eq_ignore_ascii_case("x"));
  if has_range_syntax || has_wildcard_component {
    return Err(PinError::Range(tag.to_string()));
  }

  let is_dir_name = tag != "."
    && tag != ".."
    && tag
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
  if !is_dir_name {
    return Err(PinError::InvalidTag(tag.to_string()));
  }

  Ok(())
}

/// Accept fixed http(s) URLs that do not route through a `latest` alias.
pub fn validate_url(url: &str) -> Result<(), PinError> {
  let rest = url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .ok_or_else(|| PinError::UnsupportedScheme(url.to_string()))?;

  let path = rest.split(['?', '#']).next().unwrap_or_default();
  if path.split('/').skip(1).any(|segment| segment.eq_ignore_ascii_case("latest")) {
    return Err(PinError::FloatingUrl(url.to_string()));
  }

  Ok(())
}

pub fn validate_sha256(sha256: &str) -> Result<(), PinError> {
  if sha256.len() == 64 && sha256.chars().all(|c| c.is_ascii_hexdigit()) {
    Ok(())
  } else {
    Err(PinError::InvalidChecksum(sha256.to_string()))
  }
}

/// Populate `rootfs` with the contents of a pinned source.
pub async fn materialize(
  source: &ArtifactSource,
  images_dir: &Path,
  rootfs: &Path,
  downloads_dir: &Path,
) -> Result<(), ExecuteError> {
  tokio::fs::create_dir_all(rootfs).await?;

  match source {
    ArtifactSource::Image { image, tag } => {
      let tree = images_dir.join(image).join(tag);
      if !tree.is_dir() {
        return Err(ExecuteError::SourceNotFound {
          reference: source.reference(),
          path: tree,
        });
      }

      debug!(path = ?tree, "copying pinned image tree");
      let entries = copy_tree(&tree, rootfs)?;
      info!(reference = %source.reference(), entries, "materialized image");
    }

    ArtifactSource::Url { url, sha256, dest } => {
      install_fetched(url, sha256.as_deref(), downloads_dir, rootfs, dest, false).await?;
      info!(reference = %url, dest = %dest, "materialized download");
    }
  }

  Ok(())
}
