//! Cache storage persisted as one JSON file per cache.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{CacheEntry, CacheStorage, RequestKey};
use crate::error::{SwError, SwResult};

const EXTENSION: &str = "json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    name: String,
    entries: Vec<CacheEntry>,
}

/// Cache storage rooted at a directory.
///
/// Writes go to a temp file that is renamed over the cache file, so a reader
/// sees either the old or the new contents.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENSION}", urlencoding::encode(name)))
    }

    async fn read(&self, name: &str) -> SwResult<Option<CacheFile>> {
        match fs::read(self.path_for(name)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, file: &CacheFile) -> SwResult<()> {
        fs::create_dir_all(&self.root).await?;
        let path = self.path_for(&file.name);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        fs::write(&tmp, serde_json::to_vec(file)?).await?;
        fs::rename(&tmp, &path).await?;
        trace!(cache = %file.name, entries = file.entries.len(), "Cache file written");
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> SwResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.read(name).await?.is_none() {
            debug!(cache = %name, root = %self.root.display(), "Creating cache file");
            self.write(&CacheFile {
                name: name.to_string(),
                entries: Vec::new(),
            })
            .await?;
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> SwResult<bool> {
        Ok(fs::try_exists(self.path_for(name)).await?)
    }

    async fn delete(&self, name: &str) -> SwResult<bool> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> SwResult<Vec<String>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = urlencoding::decode(stem)
                .map_err(|e| SwError::cache(format!("bad cache file name {stem:?}: {e}")))?;
            names.push(name.into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn match_request(&self, name: &str, key: &RequestKey) -> SwResult<Option<CacheEntry>> {
        Ok(self
            .read(name)
            .await?
            .and_then(|file| file.entries.into_iter().find(|e| &e.key == key)))
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> SwResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read(name).await?.unwrap_or_else(|| CacheFile {
            name: name.to_string(),
            entries: Vec::new(),
        });
        file.entries.retain(|e| e.key != entry.key);
        file.entries.push(entry);
        self.write(&file).await
    }

    async fn entry_keys(&self, name: &str) -> SwResult<Vec<RequestKey>> {
        let mut keys: Vec<_> = self
            .read(name)
            .await?
            .map(|file| file.entries.into_iter().map(|e| e.key).collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}
