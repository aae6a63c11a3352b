use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use imgbed::store::PgStore;
use imgbed::{Catalog, Derived, LibraryCfg};

#[derive(Parser, Debug)]
#[command(name = "imgbed", version, about = "Self-hosted image library")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "imgbed.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file; identical bytes return the existing asset
    Upload {
        file: PathBuf,
        #[arg(short, long, default_value_t = 1)]
        category: i64,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Resolve a storage-relative path for serving
    View {
        id: i64,
        path: String,
        #[arg(long)]
        rule: Option<String>,
        #[arg(long)]
        download: Option<String>,
    },
    /// Get or create a thumbnail for an asset
    Thumb { id: i64, rule: String },
    /// Near-duplicates by perceptual fingerprint
    Similar {
        id: i64,
        #[arg(short, long)]
        threshold: Option<u32>,
    },
    /// Delete one or more assets with their thumbnails
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Register images already present under the storage root
    Sync { dir: Option<String> },
    /// Reassign assets to a category
    Move {
        category: i64,
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Page through a category, newest first
    List {
        category: i64,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        size: i64,
    },
    Recent {
        #[arg(default_value_t = 10)]
        limit: i64,
    },
    Random {
        #[arg(short, long)]
        category: Option<i64>,
    },
    Stats,
    DeleteCategory { id: i64 },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imgbed=info")))
        .init();

    let cli = Cli::parse();
    let cfg = LibraryCfg::load(&cli.config).await?.with_env_overrides();
    let store = PgStore::connect(&cfg.database_url()?, cfg.database.max_connections)
        .await
        .context("Failed to connect to metadata store")?;
    let catalog = Catalog::new(&cfg, Arc::new(store))?;

    match cli.command {
        Command::Upload { file, category, content_type } => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("upload path has no usable file name")?
                .to_string();
            let f = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let stored = catalog.upload(f, &name, content_type.as_deref(), category).await?;
            print_json(&serde_json::json!({ "created": stored.created, "asset": stored.asset }))?;
        }
        Command::View { id, path, rule, download } => {
            let v = catalog.resolve_viewable_path(id, &path, rule.as_deref(), download.as_deref()).await?;
            print_json(&serde_json::json!({
                "path": v.path,
                "content_type": v.content_type,
                "content_disposition": v.disposition.to_string(),
            }))?;
        }
        Command::Thumb { id, rule } => match catalog.get_or_create_derived(id, &rule).await? {
            Derived::Thumbnail(path) => print_json(&serde_json::json!({ "thumbnail": path }))?,
            Derived::Original => print_json(&serde_json::json!({ "thumbnail": null, "serve": "original" }))?,
        },
        Command::Similar { id, threshold } => {
            let hits = catalog.find_similar(id, threshold.unwrap_or(catalog.similarity_threshold())).await?;
            print_json(&hits)?;
        }
        Command::Delete { ids } => {
            let report = catalog.delete_assets(&ids).await;
            print_json(&report)?;
        }
        Command::Sync { dir } => {
            let dir = dir.unwrap_or_else(|| cfg.sync.directory.clone());
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")?);
            spinner.set_message(format!("scanning {dir}"));
            spinner.enable_steady_tick(Duration::from_millis(120));
            let created = catalog.sync_from_directory(&dir).await;
            spinner.finish_and_clear();
            print_json(&serde_json::json!({ "registered": created? }))?;
        }
        Command::Move { category, ids } => {
            let moved = catalog.move_assets(&ids, category).await?;
            print_json(&serde_json::json!({ "moved": moved }))?;
        }
        Command::List { category, page, size } => print_json(&catalog.list_by_category(category, page, size).await?)?,
        Command::Recent { limit } => print_json(&catalog.recent_uploads(limit).await?)?,
        Command::Random { category } => print_json(&catalog.random_asset(category).await?)?,
        Command::Stats => {
            let s = catalog.stats().await?;
            print_json(&serde_json::json!({
                "total_images": s.total_images,
                "total_thumbnails": s.total_thumbnails,
                "image_mb": s.image_mb(),
                "thumbnail_mb": s.thumbnail_mb(),
                "used_mb": s.used_mb(),
                "disk_total_mb": s.disk_total_mb(),
                "disk_available_mb": s.disk_available_mb(),
                "other_usable_mb": s.other_usable_mb(),
            }))?;
        }
        Command::DeleteCategory { id } => {
            catalog.delete_category(id).await?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        }
    }
    Ok(())
}
