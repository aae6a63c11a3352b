//! The library's public surface: every operation a request layer or the CLI
//! calls goes through [`Catalog`].

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{LibraryCfg, RuleSet, SyncCfg};
use crate::dedupe::{Fingerprint, PerceptualHasher};
use crate::digest::digest_file;
use crate::disk;
use crate::error::{Error, Result};
use crate::io;
use crate::locks::KeyedLocks;
use crate::media::{content_type_for, Disposition};
use crate::models::{Category, LibraryStats, OriginalAsset, Page};
use crate::originals::{OriginalStore, Stored, Upload};
use crate::paths::PathResolver;
use crate::similarity::{Similar, SimilarityIndex};
use crate::store::MetadataStore;
use crate::thumbnails::{Derived, ThumbnailCache};

/// A file ready to be served.
#[derive(Debug, Clone, Serialize)]
pub struct Viewable {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub deleted: usize,
    pub failed: Vec<BatchFailure>,
}

pub struct Catalog {
    resolver: Arc<PathResolver>,
    meta: Arc<dyn MetadataStore>,
    originals: OriginalStore,
    thumbnails: ThumbnailCache,
    similarity: SimilarityIndex,
    sync: SyncCfg,
    threshold: u32,
}

impl Catalog {
    pub fn new(cfg: &LibraryCfg, meta: Arc<dyn MetadataStore>) -> Result<Self> {
        let resolver = Arc::new(PathResolver::new(&cfg.storage_root)?);
        let locks = Arc::new(KeyedLocks::new());
        Ok(Self {
            originals: OriginalStore::new(resolver.clone(), meta.clone(), locks.clone()),
            thumbnails: ThumbnailCache::new(resolver.clone(), meta.clone(), cfg.rules(), locks),
            similarity: SimilarityIndex::new(meta.clone()),
            resolver,
            meta,
            sync: cfg.sync.clone(),
            threshold: cfg.similarity_threshold,
        })
    }

    pub fn resolver(&self) -> &PathResolver { &self.resolver }
    pub fn rules(&self) -> &RuleSet { self.thumbnails.rules() }
    pub fn similarity_threshold(&self) -> u32 { self.threshold }

    /// Stream an upload into storage. Byte-identical content returns the
    /// existing asset untouched, including its category.
    pub async fn upload<R: AsyncRead + Unpin>(
        &self,
        reader: R,
        original_name: &str,
        content_type: Option<&str>,
        category_id: i64,
    ) -> Result<Stored> {
        if !self.meta.category_exists(category_id).await? {
            return Err(Error::not_found("category", category_id));
        }
        let staged = io::stage_stream(&self.originals.staging_dir(), reader).await?;

        let phash = match self.meta.asset_by_digest(&staged.digest).await {
            Ok(Some(_)) => None,
            Ok(None) => fingerprint(&staged.path).await,
            Err(e) => {
                let _ = io::remove_if_exists(&staged.path).await;
                return Err(e);
            }
        };
        let upload = Upload {
            original_name: original_name.to_string(),
            content_type: Some(content_type.unwrap_or_else(|| content_type_for(original_name)).to_string()),
            category_id,
        };
        self.originals.put(staged, phash, upload).await
    }

    /// Resolve `requested` for serving, optionally swapping in the thumbnail
    /// for `rule`. `requested` must name the asset's own original file.
    pub async fn resolve_viewable_path(
        &self,
        asset_id: i64,
        requested: &str,
        rule: Option<&str>,
        download_name: Option<&str>,
    ) -> Result<Viewable> {
        let asset = self.asset(asset_id).await?;
        let original = self.resolver.resolve(requested)?;
        if original != self.resolver.resolve(&asset.storage_path)? {
            return Err(Error::not_found("file for asset", format!("{asset_id}: {requested}")));
        }
        if !io::is_file(&original).await? {
            return Err(Error::not_found("file", requested));
        }

        let served = match rule {
            Some(rule) => match self.thumbnails.get_or_create(&original, rule, asset_id).await? {
                Derived::Thumbnail(rel) => self.resolver.resolve(&rel)?,
                Derived::Original => original,
            },
            None => original,
        };
        let name = served.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        Ok(Viewable {
            content_type: content_type_for(name),
            disposition: Disposition::for_download(download_name),
            path: served,
        })
    }

    pub async fn get_or_create_derived(&self, asset_id: i64, rule: &str) -> Result<Derived> {
        let asset = self.asset(asset_id).await?;
        let source = self.resolver.resolve(&asset.storage_path)?;
        self.thumbnails.get_or_create(&source, rule, asset_id).await
    }

    pub async fn find_similar(&self, asset_id: i64, threshold: u32) -> Result<Vec<Similar>> {
        self.similarity.find_similar(asset_id, threshold).await
    }

    /// Cascading delete: the asset's own thumbnail rows and files go with it.
    pub async fn delete_asset(&self, asset_id: i64) -> Result<()> {
        self.originals.remove(asset_id).await.map(|_| ())
    }

    /// Best effort: a failed item is logged and the rest still run.
    pub async fn delete_assets(&self, ids: &[i64]) -> BatchReport {
        let mut report = BatchReport { attempted: ids.len(), ..Default::default() };
        for &id in ids {
            match self.delete_asset(id).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    error!(asset_id = id, error = %e, "batch delete item failed");
                    report.failed.push(BatchFailure { id, reason: e.to_string() });
                }
            }
        }
        report
    }

    /// Register every new image under the storage-relative `dir`. Returns the
    /// number of assets created.
    pub async fn sync_from_directory(&self, dir: &str) -> Result<usize> {
        let base = self.resolver.resolve(dir)?;
        if !io::exists(&base).await? {
            tokio::fs::create_dir_all(&base).await?;
            info!(path = dir, "sync directory created, nothing to register");
            return Ok(0);
        }

        let extensions: Vec<String> = self.sync.extensions.iter().map(|e| e.to_ascii_lowercase()).collect();
        let files = tokio::task::spawn_blocking(move || candidate_files(&base, &extensions)).await?;

        let known = self.meta.assets().await?;
        let known_paths: HashSet<String> = known.iter().map(|a| a.storage_path.clone()).collect();
        let mut seen: HashSet<String> = known.into_iter().map(|a| a.digest).collect();

        let mut category: Option<Category> = None;
        let mut created = 0;
        for path in files {
            let rel = match self.resolver.relative(&path) {
                Ok(rel) => rel,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file outside storage root");
                    continue;
                }
            };
            if known_paths.contains(&rel) {
                continue;
            }
            match self.sync_one(&path, &rel, &mut seen, &mut category).await {
                Ok(true) => created += 1,
                Ok(false) => debug!(path = %rel, "already registered"),
                Err(e) => warn!(path = %rel, error = %e, "sync skipped file"),
            }
        }
        info!(path = dir, created, "sync finished");
        Ok(created)
    }

    async fn sync_one(
        &self,
        path: &Path,
        rel: &str,
        seen: &mut HashSet<String>,
        category: &mut Option<Category>,
    ) -> Result<bool> {
        let (digest, size) = digest_file(path).await?;
        if !seen.insert(digest.clone()) {
            return Ok(false);
        }
        let category_id = match category {
            Some(c) => c.id,
            None => {
                let c = self
                    .meta
                    .find_or_create_category(&self.sync.default_category, self.sync.parent_category_id)
                    .await?;
                let id = c.id;
                *category = Some(c);
                id
            }
        };
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or(rel).to_string();
        let upload = Upload {
            content_type: Some(content_type_for(&name).to_string()),
            original_name: name,
            category_id,
        };
        let phash = fingerprint(path).await;
        Ok(self.originals.adopt(path, digest, size, phash, upload).await?.created)
    }

    pub async fn move_asset(&self, asset_id: i64, category_id: i64) -> Result<()> {
        self.asset(asset_id).await?;
        self.move_assets(&[asset_id], category_id).await.map(|_| ())
    }

    pub async fn move_assets(&self, ids: &[i64], category_id: i64) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        if !self.meta.category_exists(category_id).await? {
            return Err(Error::not_found("category", category_id));
        }
        let moved = self.meta.move_assets(ids, category_id).await?;
        info!(category_id, moved, "assets moved");
        Ok(moved)
    }

    /// `page` is 1-based; newest first.
    pub async fn list_by_category(&self, category_id: i64, page: i64, size: i64) -> Result<Page<OriginalAsset>> {
        let (page, size) = (page.max(1), size.max(1));
        // past any real offset: empty page, total still reported
        let offset = (page - 1).checked_mul(size).unwrap_or(i64::MAX);
        let (items, total) = self.meta.assets_in_category(category_id, offset, size).await?;
        Ok(Page { items, total, page, size })
    }

    pub async fn recent_uploads(&self, limit: i64) -> Result<Vec<OriginalAsset>> {
        self.meta.recent_assets(limit.max(0)).await
    }

    pub async fn random_asset(&self, category_id: Option<i64>) -> Result<Option<OriginalAsset>> {
        self.meta.random_asset(category_id).await
    }

    /// Library totals plus capacity of the disk holding the storage root.
    pub async fn stats(&self) -> Result<LibraryStats> {
        let mut stats = self.meta.stats().await?;
        let root = self.resolver.root().to_path_buf();
        stats.disk = tokio::task::spawn_blocking(move || disk::usage_for(&root)).await?;
        if stats.disk.is_none() {
            warn!(path = %self.resolver.root().display(), "no mount found for storage root");
        }
        Ok(stats)
    }

    pub async fn delete_category(&self, category_id: i64) -> Result<()> {
        if !self.meta.category_exists(category_id).await? {
            return Err(Error::not_found("category", category_id));
        }
        if self.meta.child_category_count(category_id).await? > 0 {
            return Err(Error::DependentState(format!("category {category_id} has child categories")));
        }
        let (_, images) = self.meta.assets_in_category(category_id, 0, 1).await?;
        if images > 0 {
            return Err(Error::DependentState(format!("category {category_id} still owns {images} images")));
        }
        self.meta.delete_category(category_id).await?;
        info!(category_id, "category deleted");
        Ok(())
    }

    pub async fn asset(&self, asset_id: i64) -> Result<OriginalAsset> {
        self.meta.asset(asset_id).await?.ok_or_else(|| Error::not_found("asset", asset_id))
    }
}

/// Decode failures leave the fingerprint unset.
async fn fingerprint(path: &Path) -> Option<Fingerprint> {
    match PerceptualHasher::hash_file(path).await {
        Ok(fp) => Some(fp),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "no perceptual fingerprint");
            None
        }
    }
}

fn candidate_files(base: &Path, extensions: &[String]) -> Vec<PathBuf> {
    WalkDir::new(base)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(error = %e, "unreadable entry during sync walk");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| extensions.iter().any(|want| want.eq_ignore_ascii_case(x)))
        })
        .map(|e| e.into_path())
        .collect()
}
