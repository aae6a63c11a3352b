use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dedupe::Fingerprint;
use crate::disk::DiskUsage;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct OriginalAsset {
    pub id: i64,
    pub original_name: String,
    /// Storage-relative, forward slashes.
    pub storage_path: String,
    pub content_type: Option<String>,
    pub byte_size: i64,
    pub category_id: i64,
    /// SHA-256 hex; unique across assets.
    pub digest: String,
    pub phash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OriginalAsset {
    /// Parsed fingerprint; malformed stored values count as absent.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.phash.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DerivedThumbnail {
    pub id: i64,
    pub rule: String,
    pub storage_path: String,
    pub byte_size: i64,
    pub asset_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub original_name: String,
    pub storage_path: String,
    pub content_type: Option<String>,
    pub byte_size: i64,
    pub category_id: i64,
    pub digest: String,
    pub phash: Option<Fingerprint>,
}

#[derive(Debug, Clone)]
pub struct NewThumbnail {
    pub rule: String,
    pub storage_path: String,
    pub byte_size: i64,
    pub asset_id: i64,
}

/// Rows removed by a cascading asset delete.
#[derive(Debug, Clone)]
pub struct RemovedAsset {
    pub asset: OriginalAsset,
    pub thumbnails: Vec<DerivedThumbnail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibraryStats {
    pub total_images: i64,
    pub total_image_bytes: i64,
    pub total_thumbnails: i64,
    pub total_thumbnail_bytes: i64,
    /// Filled in by the catalog from the filesystem under the storage root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskUsage>,
}

impl LibraryStats {
    pub fn image_mb(&self) -> f64 { to_mb(self.total_image_bytes as f64) }
    pub fn thumbnail_mb(&self) -> f64 { to_mb(self.total_thumbnail_bytes as f64) }
    pub fn used_mb(&self) -> f64 { to_mb((self.total_image_bytes + self.total_thumbnail_bytes) as f64) }

    pub fn disk_total_mb(&self) -> Option<f64> { self.disk.map(|d| to_mb(d.total_bytes as f64)) }
    pub fn disk_available_mb(&self) -> Option<f64> { self.disk.map(|d| to_mb(d.available_bytes as f64)) }

    /// Space still usable on the disk, less what the library itself occupies.
    pub fn other_usable_mb(&self) -> Option<f64> {
        let library = (self.total_image_bytes + self.total_thumbnail_bytes) as f64;
        self.disk.map(|d| to_mb(d.available_bytes as f64 - library))
    }
}

fn to_mb(bytes: f64) -> f64 {
    (bytes / 1_048_576.0 * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megabytes_round_to_two_decimals() {
        let s = LibraryStats { total_image_bytes: 1_572_864, total_thumbnail_bytes: 10_000, ..Default::default() };
        assert_eq!(s.image_mb(), 1.5);
        assert_eq!(s.thumbnail_mb(), 0.01);
        assert_eq!(s.used_mb(), 1.51);
        assert_eq!(s.disk_total_mb(), None);
        assert_eq!(s.other_usable_mb(), None);
    }

    #[test]
    fn other_usable_excludes_library_usage() {
        let s = LibraryStats {
            total_image_bytes: 1_048_576,
            total_thumbnail_bytes: 1_048_576,
            disk: Some(DiskUsage { total_bytes: 100 * 1_048_576, available_bytes: 10 * 1_048_576 }),
            ..Default::default()
        };
        assert_eq!(s.disk_total_mb(), Some(100.0));
        assert_eq!(s.disk_available_mb(), Some(10.0));
        assert_eq!(s.other_usable_mb(), Some(8.0));
    }
}
