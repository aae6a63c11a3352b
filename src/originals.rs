//! Content-addressed storage for uploaded originals.
//!
//! The digest is the only dedup boundary. All writes for one digest happen
//! under that digest's lock, and the metadata insert is create-if-absent, so
//! at most one file per digest ever stays on disk.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dedupe::Fingerprint;
use crate::error::{Error, Result};
use crate::io::{self, Staged};
use crate::locks::KeyedLocks;
use crate::models::{NewAsset, OriginalAsset, RemovedAsset};
use crate::paths::PathResolver;
use crate::store::MetadataStore;

pub const STAGING_DIR: &str = ".staging";

/// Caller-declared attributes of an upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub original_name: String,
    pub content_type: Option<String>,
    pub category_id: i64,
}

/// Stored (or already present) asset. `created` is false for a duplicate.
#[derive(Debug, Clone)]
pub struct Stored {
    pub asset: OriginalAsset,
    pub created: bool,
}

pub struct OriginalStore {
    resolver: Arc<PathResolver>,
    meta: Arc<dyn MetadataStore>,
    locks: Arc<KeyedLocks>,
}

/// Lock key held while an asset's rows are written or removed. Shared with
/// the thumbnail cache so a delete and a thumbnail write never interleave.
pub fn asset_lock_key(asset_id: i64) -> String { format!("asset:{asset_id}") }

impl OriginalStore {
    pub fn new(resolver: Arc<PathResolver>, meta: Arc<dyn MetadataStore>, locks: Arc<KeyedLocks>) -> Self {
        Self { resolver, meta, locks }
    }

    pub fn staging_dir(&self) -> PathBuf { self.resolver.root().join(STAGING_DIR) }

    /// Publish a staged upload, or discard it when the digest is already known.
    pub async fn put(&self, staged: Staged, phash: Option<Fingerprint>, upload: Upload) -> Result<Stored> {
        let _guard = self.locks.lock(staged.digest.clone()).await;

        let known = match self.meta.asset_by_digest(&staged.digest).await {
            Ok(known) => known,
            Err(e) => {
                let _ = io::remove_if_exists(&staged.path).await;
                return Err(e);
            }
        };
        if let Some(existing) = known {
            io::remove_if_exists(&staged.path).await?;
            info!(asset_id = existing.id, digest = %staged.digest, "duplicate upload, keeping existing asset");
            return Ok(Stored { asset: existing, created: false });
        }

        let rel = layout_path(&upload.original_name);
        let dest = self.resolver.resolve(&rel)?;
        if let Err(e) = io::publish(&staged.path, &dest).await {
            let _ = io::remove_if_exists(&staged.path).await;
            return Err(e);
        }

        let row = NewAsset {
            original_name: upload.original_name,
            storage_path: rel,
            content_type: upload.content_type,
            byte_size: staged.size as i64,
            category_id: upload.category_id,
            digest: staged.digest,
            phash,
        };
        self.register(row, Some(&dest)).await
    }

    /// Register a file that already sits under the storage root.
    pub async fn adopt(&self, path: &Path, digest: String, size: u64, phash: Option<Fingerprint>, upload: Upload) -> Result<Stored> {
        let _guard = self.locks.lock(digest.clone()).await;
        if let Some(existing) = self.meta.asset_by_digest(&digest).await? {
            return Ok(Stored { asset: existing, created: false });
        }
        let row = NewAsset {
            original_name: upload.original_name,
            storage_path: self.resolver.relative(path)?,
            content_type: upload.content_type,
            byte_size: size as i64,
            category_id: upload.category_id,
            digest,
            phash,
        };
        self.register(row, None).await
    }

    /// Insert the row. `published` is removed again when the insert fails or
    /// another process won the digest.
    async fn register(&self, row: NewAsset, published: Option<&Path>) -> Result<Stored> {
        let inserted = self.meta.insert_asset(row).await;
        match (inserted, published) {
            (Ok((asset, true)), _) => {
                info!(asset_id = asset.id, digest = %asset.digest, path = %asset.storage_path, "original stored");
                Ok(Stored { asset, created: true })
            }
            (Ok((asset, false)), dest) => {
                if let Some(dest) = dest {
                    io::remove_if_exists(dest).await?;
                }
                Ok(Stored { asset, created: false })
            }
            (Err(e), dest) => {
                if let Some(dest) = dest {
                    let _ = io::remove_if_exists(dest).await;
                }
                Err(e)
            }
        }
    }

    /// Delete the asset row and its thumbnail rows, then their files. A
    /// thumbnail file another asset still has a row for is left in place.
    pub async fn remove(&self, id: i64) -> Result<RemovedAsset> {
        let asset = self.meta.asset(id).await?.ok_or_else(|| Error::not_found("asset", id))?;
        let _digest = self.locks.lock(asset.digest.clone()).await;
        let _asset = self.locks.lock(asset_lock_key(id)).await;

        let removed = self.meta.remove_asset(id).await?.ok_or_else(|| Error::not_found("asset", id))?;
        for thumb in &removed.thumbnails {
            match self.meta.thumbnail_path_in_use(&thumb.storage_path).await {
                Ok(false) => self.remove_file(&thumb.storage_path).await,
                Ok(true) => debug!(asset_id = id, path = %thumb.storage_path, "thumbnail file shared, kept"),
                Err(e) => warn!(asset_id = id, path = %thumb.storage_path, error = %e, "thumbnail file kept"),
            }
        }
        self.remove_file(&removed.asset.storage_path).await;
        info!(asset_id = id, thumbnails = removed.thumbnails.len(), "asset deleted");
        Ok(removed)
    }

    /// Rows are already gone at this point; a leftover file is only logged.
    async fn remove_file(&self, rel: &str) {
        let result = match self.resolver.resolve(rel) {
            Ok(abs) => io::remove_if_exists(&abs).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(path = rel, error = %e, "failed to remove file");
        }
    }
}

/// `original/YYYY/MM/DD/<uuid>[.<ext>]`, UTC date, extension lowercased.
pub fn layout_path(original_name: &str) -> String {
    let date = Utc::now().format("%Y/%m/%d");
    let id = Uuid::new_v4();
    match extension_of(original_name) {
        Some(ext) => format!("original/{date}/{id}.{ext}"),
        None => format!("original/{date}/{id}"),
    }
}

fn extension_of(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    let ok = !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    ok.then(|| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn upload(name: &str, category_id: i64) -> Upload {
        Upload { original_name: name.into(), content_type: None, category_id }
    }

    async fn stage(store: &OriginalStore, bytes: &[u8]) -> Staged {
        io::stage_stream(&store.staging_dir(), std::io::Cursor::new(bytes.to_vec())).await.unwrap()
    }

    #[test]
    fn layout_keeps_lowercase_extension() {
        let p = layout_path("Holiday.JPG");
        assert!(p.starts_with("original/"));
        assert!(p.ends_with(".jpg"));
        assert_eq!(p.split('/').count(), 5);
        assert!(!layout_path("README").contains('.'));
        assert!(!layout_path("weird.ex/t").ends_with("ex/t"));
    }

    #[tokio::test]
    async fn duplicate_discards_staged_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(PathResolver::new(dir.path()).unwrap());
        let store = OriginalStore::new(resolver.clone(), Arc::new(MemoryStore::new()), Arc::default());

        let first = store.put(stage(&store, b"same").await, None, upload("a.png", 1)).await.unwrap();
        assert!(first.created);
        let on_disk = resolver.resolve(&first.asset.storage_path).unwrap();
        assert_eq!(std::fs::read(&on_disk).unwrap(), b"same");

        let second = store.put(stage(&store, b"same").await, None, upload("b.png", 1)).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.asset, first.asset);
        assert_eq!(std::fs::read_dir(store.staging_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn remove_deletes_row_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(PathResolver::new(dir.path()).unwrap());
        let meta = Arc::new(MemoryStore::new());
        let store = OriginalStore::new(resolver.clone(), meta.clone(), Arc::default());

        let stored = store.put(stage(&store, b"bytes").await, None, upload("a.gif", 1)).await.unwrap();
        let path = resolver.resolve(&stored.asset.storage_path).unwrap();
        store.remove(stored.asset.id).await.unwrap();
        assert!(!path.exists());
        assert!(meta.asset(stored.asset.id).await.unwrap().is_none());
        assert!(store.remove(stored.asset.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn adopt_registers_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(PathResolver::new(dir.path()).unwrap());
        let store = OriginalStore::new(resolver.clone(), Arc::new(MemoryStore::new()), Arc::default());

        let path = resolver.resolve("original/legacy/cat.png").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"cat").unwrap();

        let stored = store.adopt(&path, "d1".into(), 3, None, upload("cat.png", 1)).await.unwrap();
        assert!(stored.created);
        assert_eq!(stored.asset.storage_path, "original/legacy/cat.png");
        let again = store.adopt(&path, "d1".into(), 3, None, upload("cat.png", 1)).await.unwrap();
        assert!(!again.created);
        assert!(path.exists());
    }
}
