use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::pipeline::naming::{BACKGROUND_REMOVED_SUFFIX, FINAL_COMPOSITE_SUFFIX};

/// URL prefix the store directory is mounted under.
pub const UPLOADS_MOUNT: &str = "uploads";

const MAX_TOKEN_BUMPS: u32 = 1_000;

#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("invalid artifact name: {0:?}")]
    InvalidName(String),
    #[error("path is outside the artifact store: {0}")]
    OutsideStore(String),
    #[error("public base url cannot be a base for artifact paths: {0}")]
    InvalidBaseUrl(String),
    #[error("no free artifact name after {0} attempts")]
    Exhausted(u32),
    #[error("artifact store io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat directory holding uploads and the artifacts derived from them.
///
/// Names are the only index: an upload is `<unix_ms>_<stem>.<ext>` and every
/// derived artifact is computed from that name, so the directory never needs
/// a side table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(root.as_path()).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn ensure_root(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.root.as_path())
    }

    /// Stores `bytes` under a fresh timestamped name and returns its path.
    pub async fn put(
        &self,
        bytes: &[u8],
        original_name: &str,
    ) -> Result<PathBuf, ArtifactStoreError> {
        self.put_with_token(bytes, original_name, now_unix_ms())
            .await
    }

    pub async fn put_with_token(
        &self,
        bytes: &[u8],
        original_name: &str,
        token: u128,
    ) -> Result<PathBuf, ArtifactStoreError> {
        tokio::fs::create_dir_all(self.root.as_path()).await?;

        let mut token = token;
        for _ in 0..MAX_TOKEN_BUMPS {
            let path = self
                .root
                .join(stored_file_name(token, original_name));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path.as_path())
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    debug!(path = %path.display(), size = bytes.len(), "stored upload");
                    return Ok(path);
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    warn!(
                        path = %path.display(),
                        "upload name collided within the same millisecond; bumping token"
                    );
                    token += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(ArtifactStoreError::Exhausted(MAX_TOKEN_BUMPS))
    }

    /// Maps a client-supplied name to a path inside the store. Only the last
    /// path component is honoured.
    pub fn resolve(&self, relative_name: &str) -> Result<PathBuf, ArtifactStoreError> {
        let file_name = artifact_file_name(relative_name)?;
        let path = self.root.join(file_name);
        if !path.is_file() {
            return Err(ArtifactStoreError::NotFound(file_name.to_string()));
        }
        Ok(path)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    pub fn url_for(&self, path: &Path, base_url: &Url) -> Result<Url, ArtifactStoreError> {
        let file_name = path
            .file_name()
            .and_then(|v| v.to_str())
            .ok_or_else(|| ArtifactStoreError::InvalidName(path.display().to_string()))?;
        if path.parent() != Some(self.root.as_path()) {
            return Err(ArtifactStoreError::OutsideStore(path.display().to_string()));
        }

        let mut url = base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| ArtifactStoreError::InvalidBaseUrl(base_url.to_string()))?
            .pop_if_empty()
            .push(UPLOADS_MOUNT)
            .push(file_name);
        Ok(url)
    }
}

/// Name an upload is stored under: `<token>_<sanitized stem>[.<ext>]`.
pub fn stored_file_name(token: u128, original_name: &str) -> String {
    let original = Path::new(original_name);
    let stem = original
        .file_stem()
        .and_then(|v| v.to_str())
        .map(sanitize_id)
        .map(|v| strip_reserved_suffixes(v.as_str()).to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| String::from("image"));
    let extension = original
        .extension()
        .and_then(|v| v.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|v| !v.is_empty() && v.len() <= 8 && v.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|v| format!(".{v}"))
        .unwrap_or_default();
    format!("{token}_{stem}{extension}")
}

/// Uploads must never carry a derived-artifact suffix, or a raw upload
/// could pass for a processed one.
fn strip_reserved_suffixes(stem: &str) -> &str {
    let mut stem = stem;
    loop {
        let before = stem.len();
        for suffix in [BACKGROUND_REMOVED_SUFFIX, FINAL_COMPOSITE_SUFFIX] {
            let bare = suffix.trim_start_matches('_');
            if stem == bare {
                stem = "";
            } else if let Some(rest) = stem.strip_suffix(suffix) {
                stem = rest.trim_end_matches('_');
            }
        }
        if stem.len() == before {
            return stem;
        }
    }
}

fn artifact_file_name(value: &str) -> Result<&str, ArtifactStoreError> {
    let name = value
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        return Err(ArtifactStoreError::InvalidName(value.to_string()));
    }
    Ok(name)
}

fn sanitize_id(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_sep = false;
    for ch in value.chars().flat_map(char::to_lowercase) {
        let keep = ch.is_ascii_alphanumeric() || ch == '-' || ch == '_';
        if keep {
            out.push(ch);
            last_was_sep = false;
            continue;
        }
        if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

pub(crate) fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
