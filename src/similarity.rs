use serde::Serialize;
use std::sync::Arc;

use crate::dedupe::Fingerprint;
use crate::error::{Error, Result};
use crate::models::OriginalAsset;
use crate::store::MetadataStore;

#[derive(Debug, Clone, Serialize)]
pub struct Similar {
    pub asset: OriginalAsset,
    pub distance: u32,
}

/// Linear scan over stored fingerprints. Fine for a personal archive; there
/// is no index structure behind it.
pub struct SimilarityIndex {
    meta: Arc<dyn MetadataStore>,
}

impl SimilarityIndex {
    pub fn new(meta: Arc<dyn MetadataStore>) -> Self { Self { meta } }

    /// Assets within `threshold` bits of `asset_id`, excluding the asset
    /// itself. Empty when the target has no fingerprint.
    pub async fn find_similar(&self, asset_id: i64, threshold: u32) -> Result<Vec<Similar>> {
        let target = self.meta.asset(asset_id).await?.ok_or_else(|| Error::not_found("asset", asset_id))?;
        let Some(fp) = target.fingerprint() else {
            return Ok(Vec::new());
        };
        let candidates = self.meta.fingerprinted_assets().await?;
        Ok(within(asset_id, &fp, candidates, threshold))
    }
}

pub fn within(target_id: i64, target: &Fingerprint, candidates: Vec<OriginalAsset>, threshold: u32) -> Vec<Similar> {
    candidates
        .into_iter()
        .filter(|a| a.id != target_id)
        .filter_map(|a| {
            let distance = a.fingerprint()?.distance(target);
            (distance <= threshold).then_some(Similar { asset: a, distance })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn asset(id: i64, phash: Option<Fingerprint>) -> OriginalAsset {
        OriginalAsset {
            id,
            original_name: format!("{id}.png"),
            storage_path: format!("original/{id}.png"),
            content_type: None,
            byte_size: 1,
            category_id: 1,
            digest: format!("d{id}"),
            phash: phash.map(|f| f.to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn filters_self_missing_and_distant() {
        let target = Fingerprint::from_bits(0);
        let candidates = vec![
            asset(1, Some(target)),
            asset(2, Some(Fingerprint::from_bits(0b111))),
            asset(3, Some(Fingerprint::from_bits(u64::MAX))),
            asset(4, None),
            asset(5, Some(Fingerprint::from_bits(0b1))),
        ];
        let mut hits: Vec<_> = within(1, &target, candidates, 3).into_iter().map(|s| (s.asset.id, s.distance)).collect();
        hits.sort();
        assert_eq!(hits, vec![(2, 3), (5, 1)]);
    }

    #[test]
    fn malformed_stored_fingerprint_is_skipped() {
        let mut bad = asset(2, None);
        bad.phash = Some("01".into());
        assert!(within(1, &Fingerprint::from_bits(0), vec![bad], 63).is_empty());
    }
}
