//! Metadata store contract. The query engine itself lives elsewhere; the
//! library relies only on these reads and writes.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Category, DerivedThumbnail, LibraryStats, NewAsset, NewThumbnail, OriginalAsset, RemovedAsset,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create-if-absent keyed by digest. Returns the stored row and whether
    /// this call inserted it; on conflict the existing row comes back untouched.
    async fn insert_asset(&self, asset: NewAsset) -> Result<(OriginalAsset, bool)>;
    async fn asset(&self, id: i64) -> Result<Option<OriginalAsset>>;
    async fn asset_by_digest(&self, digest: &str) -> Result<Option<OriginalAsset>>;
    async fn assets(&self) -> Result<Vec<OriginalAsset>>;
    async fn fingerprinted_assets(&self) -> Result<Vec<OriginalAsset>>;
    /// Newest first; returns the page and the category's total.
    async fn assets_in_category(&self, category_id: i64, offset: i64, limit: i64) -> Result<(Vec<OriginalAsset>, i64)>;
    async fn recent_assets(&self, limit: i64) -> Result<Vec<OriginalAsset>>;
    async fn random_asset(&self, category_id: Option<i64>) -> Result<Option<OriginalAsset>>;
    async fn move_assets(&self, ids: &[i64], category_id: i64) -> Result<u64>;
    /// Deletes the asset row and every owned thumbnail row.
    async fn remove_asset(&self, id: i64) -> Result<Option<RemovedAsset>>;

    /// One live row per (asset, rule): a second write replaces the first.
    async fn upsert_thumbnail(&self, thumb: NewThumbnail) -> Result<DerivedThumbnail>;
    /// Whether any thumbnail row still points at `storage_path`.
    async fn thumbnail_path_in_use(&self, storage_path: &str) -> Result<bool>;
    async fn thumbnails_of(&self, asset_id: i64) -> Result<Vec<DerivedThumbnail>>;

    async fn category_exists(&self, id: i64) -> Result<bool>;
    async fn find_or_create_category(&self, name: &str, parent_id: i64) -> Result<Category>;
    async fn child_category_count(&self, id: i64) -> Result<i64>;
    async fn delete_category(&self, id: i64) -> Result<bool>;

    async fn stats(&self) -> Result<LibraryStats>;
}
