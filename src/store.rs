//! Persistent record of which items each feed has already processed.
//!
//! One JSON file per feed under the data folder, named after the feed URL
//! plus a hash of it, so distinct URLs never share a file.
//! The file is rewritten with temp-file-and-rename so a crash mid-write leaves
//! the previous version intact.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Item identifiers a feed has already seen, mapped to a presence marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenSet {
    ids: BTreeMap<String, bool>,
}

impl SeenSet {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Returns false if the id was already present.
    pub fn mark(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into(), true).is_none()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Loads and saves [`SeenSet`]s.
#[derive(Debug, Clone)]
pub struct ItemStore {
    folder: PathBuf,
    persist: bool,
}

impl ItemStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            persist: true,
        }
    }

    /// A store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            folder: PathBuf::new(),
            persist: false,
        }
    }

    /// Path of the seen file for `url`.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.folder.join(format!("{}.json", file_stem(url)))
    }

    /// Load the seen set for `url`. A missing file is an empty set; anything
    /// else that goes wrong is returned.
    pub async fn load(&self, url: &str) -> Result<SeenSet> {
        if !self.persist {
            return Ok(SeenSet::default());
        }

        let path = self.path_for(url);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let seen: SeenSet = serde_json::from_slice(&bytes)?;
                debug!(path = %path.display(), items = seen.len(), "loaded seen items");
                Ok(seen)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SeenSet::default()),
            Err(e) => Err(Error::io("Failed to read seen file", &path, e)),
        }
    }

    pub async fn save(&self, url: &str, seen: &SeenSet) -> Result<()> {
        if !self.persist {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.folder)
            .await
            .map_err(|e| Error::io("Failed to create data folder", &self.folder, e))?;
        let bytes = serde_json::to_vec(seen)?;
        write_atomically(&self.path_for(url), &bytes).await
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| Error::io("Failed to write temp file", &tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::io("Failed to rename temp file", path, e))?;
    Ok(())
}

/// Longest readable prefix kept in a seen file name.
const MAX_STEM_PREFIX: usize = 96;

/// Hex SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// File name stem for `url`: a readable, length-capped prefix followed by a
/// short hash of the full URL.
fn file_stem(url: &str) -> String {
    let mut stem: String = sanitize(url).chars().take(MAX_STEM_PREFIX).collect();
    stem.push('-');
    stem.push_str(&fingerprint(url.as_bytes())[..16]);
    stem
}

/// Anything outside `[A-Za-z0-9._-]` becomes `_`.
fn sanitize(url: &str) -> String {
    url.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
