//! Lazily generated, cached thumbnail derivatives.
//!
//! A derived file lives at `thumbnails/<rule>/<prefix><source basename>`.
//! That path is the natural key for `(asset, rule)`: existence on disk is
//! the cache-hit test, and generation for a given path is single-flight.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{RuleSet, ThumbnailRule};
use crate::error::{Error, Result};
use crate::io;
use crate::locks::KeyedLocks;
use crate::models::NewThumbnail;
use crate::originals::asset_lock_key;
use crate::paths::PathResolver;
use crate::post;
use crate::store::MetadataStore;

/// Outcome of a thumbnail request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Derived {
    /// Storage-relative path of the derived file.
    Thumbnail(String),
    /// No derived file applies; serve the original.
    Original,
}

pub struct ThumbnailCache {
    resolver: Arc<PathResolver>,
    meta: Arc<dyn MetadataStore>,
    rules: RuleSet,
    locks: Arc<KeyedLocks>,
}

pub fn derived_path(rule: &ThumbnailRule, source: &Path) -> Option<String> {
    let base = source.file_name()?.to_str()?;
    Some(format!("thumbnails/{}/{}{}", rule.name, rule.prefix(), base))
}

impl ThumbnailCache {
    /// `locks` must be the table the original store uses, so deletes and
    /// thumbnail writes for one asset serialize.
    pub fn new(resolver: Arc<PathResolver>, meta: Arc<dyn MetadataStore>, rules: RuleSet, locks: Arc<KeyedLocks>) -> Self {
        Self { resolver, meta, rules, locks }
    }

    pub fn rules(&self) -> &RuleSet { &self.rules }

    /// Derived path for `source` under `rule_name`, generating it on first request.
    ///
    /// `source` must already be a resolved path under the storage root.
    pub async fn get_or_create(&self, source: &Path, rule_name: &str, asset_id: i64) -> Result<Derived> {
        let Some(rule) = self.rules.get(rule_name) else {
            return Ok(Derived::Original);
        };
        let rel = derived_path(rule, source)
            .ok_or_else(|| Error::not_found("source file name", source.display()))?;
        let dest = self.resolver.resolve(&rel)?;

        if io::exists(&dest).await? {
            debug!(asset_id, rule = rule_name, path = %rel, "thumbnail cache hit");
            return Ok(Derived::Thumbnail(rel));
        }

        let _guard = self.locks.lock(rel.clone()).await;
        // another task may have produced it while we waited
        if io::exists(&dest).await? {
            return Ok(Derived::Thumbnail(rel));
        }
        if !io::exists(source).await? {
            return Err(Error::not_found("original file", source.display()));
        }

        let (src, r) = (source.to_path_buf(), rule.clone());
        let Some(rendered) = tokio::task::spawn_blocking(move || post::render(&src, &r)).await?? else {
            debug!(asset_id, rule = rule_name, "source narrower than rule, serving original");
            return Ok(Derived::Original);
        };

        let _asset = self.locks.lock(asset_lock_key(asset_id)).await;
        // the asset may have been deleted while rendering
        if self.meta.asset(asset_id).await?.is_none() {
            return Err(Error::not_found("asset", asset_id));
        }
        io::write_atomic(&dest, &rendered.bytes).await?;
        self.meta
            .upsert_thumbnail(NewThumbnail {
                rule: rule.name.clone(),
                storage_path: rel.clone(),
                byte_size: rendered.bytes.len() as i64,
                asset_id,
            })
            .await?;
        info!(asset_id, rule = rule_name, width = rendered.width, height = rendered.height, path = %rel, "thumbnail created");
        Ok(Derived::Thumbnail(rel))
    }
}
