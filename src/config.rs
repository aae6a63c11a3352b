use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

/// Named thumbnail preset. Resizing is by width; `height` is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailRule {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Re-encode quality in (0, 1].
    pub quality: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl ThumbnailRule {
    pub fn new(name: &str, width: u32, height: u32, quality: f32) -> Self {
        Self { name: name.into(), width, height, quality, prefix: None }
    }

    pub fn prefix(&self) -> String {
        self.prefix.clone().unwrap_or_else(|| format!("{}_", self.name))
    }

    pub fn jpeg_quality(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

/// Immutable rule table, built once at startup and shared.
#[derive(Debug, Clone)]
pub struct RuleSet(Arc<HashMap<String, ThumbnailRule>>);

impl RuleSet {
    pub fn new(rules: impl IntoIterator<Item = ThumbnailRule>) -> Self {
        Self(Arc::new(rules.into_iter().map(|r| (r.name.clone(), r)).collect()))
    }

    pub fn get(&self, name: &str) -> Option<&ThumbnailRule> { self.0.get(name) }

    pub fn names(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }

    pub fn iter(&self) -> impl Iterator<Item = &ThumbnailRule> { self.0.values() }
}

impl Default for RuleSet {
    fn default() -> Self { Self::new(default_rules()) }
}

pub fn default_rules() -> Vec<ThumbnailRule> {
    vec![
        ThumbnailRule::new("small", 150, 112, 0.8),
        ThumbnailRule::new("medium", 800, 600, 0.85),
        ThumbnailRule::new("large", 1600, 1200, 0.9),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCfg {
    #[serde(default = "default_url_env")]
    pub url_env: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseCfg {
    fn default() -> Self { Self { url_env: default_url_env(), max_connections: default_max_connections() } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCfg {
    #[serde(default = "default_sync_dir")]
    pub directory: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_category")]
    pub default_category: String,
    #[serde(default = "default_parent")]
    pub parent_category_id: i64,
}

impl Default for SyncCfg {
    fn default() -> Self {
        Self {
            directory: default_sync_dir(),
            extensions: default_extensions(),
            default_category: default_category(),
            parent_category_id: default_parent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryCfg {
    pub storage_root: PathBuf,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: u32,
    #[serde(default)]
    pub database: DatabaseCfg,
    #[serde(default)]
    pub sync: SyncCfg,
    #[serde(default = "default_rules")]
    pub thumbnails: Vec<ThumbnailRule>,
}

fn default_url_env() -> String { "DATABASE_URL".into() }
fn default_max_connections() -> u32 { 5 }
fn default_sync_dir() -> String { "original".into() }
fn default_extensions() -> Vec<String> { ["jpg", "jpeg", "png", "gif"].map(String::from).to_vec() }
fn default_category() -> String { "Uncategorized".into() }
fn default_parent() -> i64 { 1 }
fn default_threshold() -> u32 { 10 }

impl LibraryCfg {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            similarity_threshold: default_threshold(),
            database: DatabaseCfg::default(),
            sync: SyncCfg::default(),
            thumbnails: default_rules(),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let txt = tokio::fs::read_to_string(path)
            .await
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&txt)
    }

    pub fn from_yaml(txt: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(txt).context("Failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `IMGBED_STORAGE_ROOT` wins over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("IMGBED_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(root);
        }
        self
    }

    pub fn database_url(&self) -> Result<String> {
        std::env::var(&self.database.url_env)
            .with_context(|| format!("{} not set", self.database.url_env))
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for rule in &self.thumbnails {
            if !is_plain_component(&rule.name) {
                bail!("thumbnail rule name {:?} must be a single path component", rule.name);
            }
            if !is_plain_component(&rule.prefix()) {
                bail!("thumbnail rule {:?} has an invalid prefix", rule.name);
            }
            if !seen.insert(rule.name.as_str()) {
                bail!("duplicate thumbnail rule {:?}", rule.name);
            }
            if rule.width == 0 {
                bail!("thumbnail rule {:?} has zero width", rule.name);
            }
            if !(rule.quality > 0.0 && rule.quality <= 1.0) {
                bail!("thumbnail rule {:?} quality must be in (0, 1]", rule.name);
            }
        }
        Ok(())
    }

    pub fn rules(&self) -> RuleSet { RuleSet::new(self.thumbnails.iter().cloned()) }
}

fn is_plain_component(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\']) {
        return false;
    }
    let mut comps = Path::new(name).components();
    matches!((comps.next(), comps.next()), (Some(Component::Normal(_)), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_gets_defaults() {
        let cfg = LibraryCfg::from_yaml("storage_root: /srv/imgbed\n").unwrap();
        assert_eq!(cfg.similarity_threshold, 10);
        assert_eq!(cfg.sync.directory, "original");
        assert_eq!(cfg.database.url_env, "DATABASE_URL");
        let rules = cfg.rules();
        let small = rules.get("small").unwrap();
        assert_eq!((small.width, small.height, small.jpeg_quality()), (150, 112, 80));
        assert_eq!(small.prefix(), "small_");
        assert!(rules.get("huge").is_none());
    }

    #[test]
    fn custom_rules_replace_defaults() {
        let yaml = "storage_root: /tmp/x\nthumbnails:\n  - { name: tiny, width: 64, height: 48, quality: 0.5, prefix: t_ }\n";
        let cfg = LibraryCfg::from_yaml(yaml).unwrap();
        let rules = cfg.rules();
        assert_eq!(rules.names().collect::<Vec<_>>(), vec!["tiny"]);
        assert_eq!(rules.get("tiny").unwrap().prefix(), "t_");
    }

    #[test]
    fn rejects_unsafe_or_invalid_rules() {
        for yaml in [
            "storage_root: /x\nthumbnails:\n  - { name: ../up, width: 10, height: 10, quality: 0.5 }\n",
            "storage_root: /x\nthumbnails:\n  - { name: a, width: 0, height: 10, quality: 0.5 }\n",
            "storage_root: /x\nthumbnails:\n  - { name: a, width: 10, height: 10, quality: 1.5 }\n",
            "storage_root: /x\nthumbnails:\n  - { name: a, width: 10, height: 10, quality: 0.5 }\n  - { name: a, width: 20, height: 10, quality: 0.5 }\n",
        ] {
            assert!(LibraryCfg::from_yaml(yaml).is_err(), "{yaml}");
        }
    }
}
