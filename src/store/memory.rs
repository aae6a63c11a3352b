use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeMap;

use super::MetadataStore;
use crate::error::Result;
use crate::models::{
    Category, DerivedThumbnail, LibraryStats, NewAsset, NewThumbnail, OriginalAsset, RemovedAsset,
};

pub const ROOT_CATEGORY_ID: i64 = 1;

/// In-process store. Every operation takes one lock, so each call is atomic
/// the same way a single-row write is in Postgres.
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

struct Tables {
    next_id: i64,
    assets: BTreeMap<i64, OriginalAsset>,
    thumbnails: BTreeMap<i64, DerivedThumbnail>,
    categories: BTreeMap<i64, Category>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

impl MemoryStore {
    /// Starts with a single root category, id 1.
    pub fn new() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(ROOT_CATEGORY_ID, Category { id: ROOT_CATEGORY_ID, name: "root".into(), parent_id: None });
        Self {
            inner: Mutex::new(Tables {
                next_id: ROOT_CATEGORY_ID,
                assets: BTreeMap::new(),
                thumbnails: BTreeMap::new(),
                categories,
            }),
        }
    }

    fn newest_first(mut rows: Vec<OriginalAsset>) -> Vec<OriginalAsset> {
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn insert_asset(&self, asset: NewAsset) -> Result<(OriginalAsset, bool)> {
        let mut t = self.inner.lock();
        if let Some(existing) = t.assets.values().find(|a| a.digest == asset.digest) {
            return Ok((existing.clone(), false));
        }
        let id = t.next_id();
        let row = OriginalAsset {
            id,
            original_name: asset.original_name,
            storage_path: asset.storage_path,
            content_type: asset.content_type,
            byte_size: asset.byte_size,
            category_id: asset.category_id,
            digest: asset.digest,
            phash: asset.phash.map(|f| f.to_string()),
            created_at: Utc::now(),
        };
        t.assets.insert(id, row.clone());
        Ok((row, true))
    }

    async fn asset(&self, id: i64) -> Result<Option<OriginalAsset>> {
        Ok(self.inner.lock().assets.get(&id).cloned())
    }

    async fn asset_by_digest(&self, digest: &str) -> Result<Option<OriginalAsset>> {
        Ok(self.inner.lock().assets.values().find(|a| a.digest == digest).cloned())
    }

    async fn assets(&self) -> Result<Vec<OriginalAsset>> {
        Ok(self.inner.lock().assets.values().cloned().collect())
    }

    async fn fingerprinted_assets(&self) -> Result<Vec<OriginalAsset>> {
        Ok(self.inner.lock().assets.values().filter(|a| a.phash.is_some()).cloned().collect())
    }

    async fn assets_in_category(&self, category_id: i64, offset: i64, limit: i64) -> Result<(Vec<OriginalAsset>, i64)> {
        let rows: Vec<_> = self.inner.lock().assets.values().filter(|a| a.category_id == category_id).cloned().collect();
        let total = rows.len() as i64;
        let page = Self::newest_first(rows)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn recent_assets(&self, limit: i64) -> Result<Vec<OriginalAsset>> {
        let rows = self.inner.lock().assets.values().cloned().collect();
        Ok(Self::newest_first(rows).into_iter().take(limit.max(0) as usize).collect())
    }

    async fn random_asset(&self, category_id: Option<i64>) -> Result<Option<OriginalAsset>> {
        let t = self.inner.lock();
        let pool: Vec<_> = t.assets.values().filter(|a| category_id.map_or(true, |c| a.category_id == c)).collect();
        if pool.is_empty() {
            return Ok(None);
        }
        let pick = rand::rng().random_range(0..pool.len());
        Ok(Some(pool[pick].clone()))
    }

    async fn move_assets(&self, ids: &[i64], category_id: i64) -> Result<u64> {
        let mut t = self.inner.lock();
        let mut moved = 0;
        for id in ids {
            if let Some(a) = t.assets.get_mut(id) {
                a.category_id = category_id;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn remove_asset(&self, id: i64) -> Result<Option<RemovedAsset>> {
        let mut t = self.inner.lock();
        let Some(asset) = t.assets.remove(&id) else { return Ok(None) };
        let owned: Vec<i64> = t.thumbnails.values().filter(|th| th.asset_id == id).map(|th| th.id).collect();
        let thumbnails = owned.iter().filter_map(|tid| t.thumbnails.remove(tid)).collect();
        Ok(Some(RemovedAsset { asset, thumbnails }))
    }

    async fn upsert_thumbnail(&self, thumb: NewThumbnail) -> Result<DerivedThumbnail> {
        let mut t = self.inner.lock();
        let existing = t
            .thumbnails
            .values()
            .find(|th| th.asset_id == thumb.asset_id && th.rule == thumb.rule)
            .map(|th| th.id);
        let id = match existing {
            Some(id) => id,
            None => t.next_id(),
        };
        let row = DerivedThumbnail {
            id,
            rule: thumb.rule,
            storage_path: thumb.storage_path,
            byte_size: thumb.byte_size,
            asset_id: thumb.asset_id,
            created_at: Utc::now(),
        };
        t.thumbnails.insert(id, row.clone());
        Ok(row)
    }

    async fn thumbnail_path_in_use(&self, storage_path: &str) -> Result<bool> {
        Ok(self.inner.lock().thumbnails.values().any(|th| th.storage_path == storage_path))
    }

    async fn thumbnails_of(&self, asset_id: i64) -> Result<Vec<DerivedThumbnail>> {
        Ok(self.inner.lock().thumbnails.values().filter(|th| th.asset_id == asset_id).cloned().collect())
    }

    async fn category_exists(&self, id: i64) -> Result<bool> {
        Ok(self.inner.lock().categories.contains_key(&id))
    }

    async fn find_or_create_category(&self, name: &str, parent_id: i64) -> Result<Category> {
        let mut t = self.inner.lock();
        if let Some(c) = t.categories.values().find(|c| c.name == name && c.parent_id == Some(parent_id)) {
            return Ok(c.clone());
        }
        let id = t.next_id();
        let c = Category { id, name: name.to_string(), parent_id: Some(parent_id) };
        t.categories.insert(id, c.clone());
        Ok(c)
    }

    async fn child_category_count(&self, id: i64) -> Result<i64> {
        Ok(self.inner.lock().categories.values().filter(|c| c.parent_id == Some(id)).count() as i64)
    }

    async fn delete_category(&self, id: i64) -> Result<bool> {
        Ok(self.inner.lock().categories.remove(&id).is_some())
    }

    async fn stats(&self) -> Result<LibraryStats> {
        let t = self.inner.lock();
        Ok(LibraryStats {
            total_images: t.assets.len() as i64,
            total_image_bytes: t.assets.values().map(|a| a.byte_size).sum(),
            total_thumbnails: t.thumbnails.len() as i64,
            total_thumbnail_bytes: t.thumbnails.values().map(|th| th.byte_size).sum(),
            disk: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_asset(digest: &str, category_id: i64) -> NewAsset {
        NewAsset {
            original_name: format!("{digest}.png"),
            storage_path: format!("original/2024/01/01/{digest}.png"),
            content_type: Some("image/png".into()),
            byte_size: 10,
            category_id,
            digest: digest.into(),
            phash: None,
        }
    }

    #[tokio::test]
    async fn insert_is_create_if_absent_by_digest() {
        let store = MemoryStore::new();
        let (a, inserted) = store.insert_asset(new_asset("d1", 1)).await.unwrap();
        assert!(inserted);
        let (b, inserted) = store.insert_asset(new_asset("d1", 7)).await.unwrap();
        assert!(!inserted);
        assert_eq!(a, b);
        assert_eq!(b.category_id, 1);
        assert_eq!(store.assets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_cascades_to_thumbnails() {
        let store = MemoryStore::new();
        let (a, _) = store.insert_asset(new_asset("d1", 1)).await.unwrap();
        let (b, _) = store.insert_asset(new_asset("d2", 1)).await.unwrap();
        for (asset, rule) in [(a.id, "small"), (a.id, "medium"), (b.id, "small")] {
            store
                .upsert_thumbnail(NewThumbnail { rule: rule.into(), storage_path: format!("thumbnails/{rule}/{asset}"), byte_size: 1, asset_id: asset })
                .await
                .unwrap();
        }
        let removed = store.remove_asset(a.id).await.unwrap().unwrap();
        assert_eq!(removed.thumbnails.len(), 2);
        assert!(store.asset(a.id).await.unwrap().is_none());
        assert_eq!(store.thumbnails_of(b.id).await.unwrap().len(), 1);
        assert!(!store.thumbnail_path_in_use(&format!("thumbnails/small/{}", a.id)).await.unwrap());
        assert!(store.thumbnail_path_in_use(&format!("thumbnails/small/{}", b.id)).await.unwrap());
        assert!(store.remove_asset(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_rule() {
        let store = MemoryStore::new();
        let (a, _) = store.insert_asset(new_asset("d1", 1)).await.unwrap();
        let t = |size| NewThumbnail { rule: "small".into(), storage_path: "thumbnails/small/x".into(), byte_size: size, asset_id: a.id };
        let first = store.upsert_thumbnail(t(5)).await.unwrap();
        let second = store.upsert_thumbnail(t(9)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.thumbnails_of(a.id).await.unwrap().len(), 1);
        assert_eq!(store.stats().await.unwrap().total_thumbnail_bytes, 9);
    }

    #[tokio::test]
    async fn categories_find_or_create() {
        let store = MemoryStore::new();
        let c = store.find_or_create_category("Uncategorized", ROOT_CATEGORY_ID).await.unwrap();
        let again = store.find_or_create_category("Uncategorized", ROOT_CATEGORY_ID).await.unwrap();
        assert_eq!(c, again);
        assert_eq!(store.child_category_count(ROOT_CATEGORY_ID).await.unwrap(), 1);
        assert!(store.category_exists(c.id).await.unwrap());
    }
}
