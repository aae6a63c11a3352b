use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::MetadataStore;
use crate::error::Result;
use crate::models::{
    Category, DerivedThumbnail, LibraryStats, NewAsset, NewThumbnail, OriginalAsset, RemovedAsset,
};

const ASSET_COLS: &str =
    "id, original_name, storage_path, content_type, byte_size, category_id, digest, phash, created_at";
const THUMB_COLS: &str = "id, rule, storage_path, byte_size, asset_id, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("database connected and migrations applied");
        Ok(Self { pool })
    }
}

#[async_trait]
impl MetadataStore for PgStore {
    async fn insert_asset(&self, asset: NewAsset) -> Result<(OriginalAsset, bool)> {
        let sql = format!(
            "INSERT INTO images (original_name, storage_path, content_type, byte_size, category_id, digest, phash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (digest) DO NOTHING RETURNING {ASSET_COLS}"
        );
        let inserted = sqlx::query_as::<_, OriginalAsset>(&sql)
            .bind(&asset.original_name)
            .bind(&asset.storage_path)
            .bind(&asset.content_type)
            .bind(asset.byte_size)
            .bind(asset.category_id)
            .bind(&asset.digest)
            .bind(asset.phash.map(|f| f.to_string()))
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(row) => Ok((row, true)),
            None => {
                let existing = self
                    .asset_by_digest(&asset.digest)
                    .await?
                    .ok_or_else(|| crate::Error::not_found("asset with digest", &asset.digest))?;
                Ok((existing, false))
            }
        }
    }

    async fn asset(&self, id: i64) -> Result<Option<OriginalAsset>> {
        let sql = format!("SELECT {ASSET_COLS} FROM images WHERE id = $1");
        Ok(sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?)
    }

    async fn asset_by_digest(&self, digest: &str) -> Result<Option<OriginalAsset>> {
        let sql = format!("SELECT {ASSET_COLS} FROM images WHERE digest = $1");
        Ok(sqlx::query_as(&sql).bind(digest).fetch_optional(&self.pool).await?)
    }

    async fn assets(&self) -> Result<Vec<OriginalAsset>> {
        let sql = format!("SELECT {ASSET_COLS} FROM images");
        Ok(sqlx::query_as(&sql).fetch_all(&self.pool).await?)
    }

    async fn fingerprinted_assets(&self) -> Result<Vec<OriginalAsset>> {
        let sql = format!("SELECT {ASSET_COLS} FROM images WHERE phash IS NOT NULL");
        Ok(sqlx::query_as(&sql).fetch_all(&self.pool).await?)
    }

    async fn assets_in_category(&self, category_id: i64, offset: i64, limit: i64) -> Result<(Vec<OriginalAsset>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE category_id = $1")
            .bind(category_id)
            .fetch_one(&self.pool)
            .await?;
        let sql = format!(
            "SELECT {ASSET_COLS} FROM images WHERE category_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as(&sql)
            .bind(category_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok((rows, total))
    }

    async fn recent_assets(&self, limit: i64) -> Result<Vec<OriginalAsset>> {
        let sql = format!("SELECT {ASSET_COLS} FROM images ORDER BY created_at DESC, id DESC LIMIT $1");
        Ok(sqlx::query_as(&sql).bind(limit).fetch_all(&self.pool).await?)
    }

    async fn random_asset(&self, category_id: Option<i64>) -> Result<Option<OriginalAsset>> {
        let sql = format!(
            "SELECT {ASSET_COLS} FROM images WHERE ($1::BIGINT IS NULL OR category_id = $1) \
             ORDER BY random() LIMIT 1"
        );
        Ok(sqlx::query_as(&sql).bind(category_id).fetch_optional(&self.pool).await?)
    }

    async fn move_assets(&self, ids: &[i64], category_id: i64) -> Result<u64> {
        let res = sqlx::query("UPDATE images SET category_id = $1 WHERE id = ANY($2)")
            .bind(category_id)
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn remove_asset(&self, id: i64) -> Result<Option<RemovedAsset>> {
        let mut tx = self.pool.begin().await?;
        let thumbnails = sqlx::query_as::<_, DerivedThumbnail>(&format!(
            "DELETE FROM thumbnails WHERE asset_id = $1 RETURNING {THUMB_COLS}"
        ))
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        let asset = sqlx::query_as::<_, OriginalAsset>(&format!(
            "DELETE FROM images WHERE id = $1 RETURNING {ASSET_COLS}"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(asset.map(|asset| RemovedAsset { asset, thumbnails }))
    }

    async fn upsert_thumbnail(&self, thumb: NewThumbnail) -> Result<DerivedThumbnail> {
        let sql = format!(
            "INSERT INTO thumbnails (rule, storage_path, byte_size, asset_id) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (asset_id, rule) DO UPDATE \
             SET storage_path = EXCLUDED.storage_path, byte_size = EXCLUDED.byte_size \
             RETURNING {THUMB_COLS}"
        );
        Ok(sqlx::query_as(&sql)
            .bind(&thumb.rule)
            .bind(&thumb.storage_path)
            .bind(thumb.byte_size)
            .bind(thumb.asset_id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn thumbnail_path_in_use(&self, storage_path: &str) -> Result<bool> {
        Ok(sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM thumbnails WHERE storage_path = $1)")
            .bind(storage_path)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn thumbnails_of(&self, asset_id: i64) -> Result<Vec<DerivedThumbnail>> {
        let sql = format!("SELECT {THUMB_COLS} FROM thumbnails WHERE asset_id = $1");
        Ok(sqlx::query_as(&sql).bind(asset_id).fetch_all(&self.pool).await?)
    }

    async fn category_exists(&self, id: i64) -> Result<bool> {
        Ok(sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn find_or_create_category(&self, name: &str, parent_id: i64) -> Result<Category> {
        let found = sqlx::query_as::<_, Category>(
            "SELECT id, name, parent_id FROM categories WHERE name = $1 AND parent_id = $2 ORDER BY id LIMIT 1",
        )
        .bind(name)
        .bind(parent_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(c) = found {
            return Ok(c);
        }
        Ok(sqlx::query_as(
            "INSERT INTO categories (name, parent_id) VALUES ($1, $2) RETURNING id, name, parent_id",
        )
        .bind(name)
        .bind(parent_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn child_category_count(&self, id: i64) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE parent_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn delete_category(&self, id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM categories WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(res.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<LibraryStats> {
        let (total_images, total_image_bytes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(byte_size), 0)::BIGINT FROM images")
                .fetch_one(&self.pool)
                .await?;
        let (total_thumbnails, total_thumbnail_bytes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(byte_size), 0)::BIGINT FROM thumbnails")
                .fetch_one(&self.pool)
                .await?;
        Ok(LibraryStats { total_images, total_image_bytes, total_thumbnails, total_thumbnail_bytes, disk: None })
    }
}
