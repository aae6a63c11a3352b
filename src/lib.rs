//! Self-hosted image library: content-addressed originals, perceptual
//! near-duplicate search, and lazily cached thumbnails.

pub mod catalog;
pub mod config;
pub mod dedupe;
pub mod digest;
pub mod disk;
pub mod error;
pub mod io;
pub mod locks;
pub mod media;
pub mod models;
pub mod originals;
pub mod paths;
pub mod post;
pub mod similarity;
pub mod store;
pub mod thumbnails;

pub use catalog::{BatchFailure, BatchReport, Catalog, Viewable};
pub use config::{LibraryCfg, RuleSet, ThumbnailRule};
pub use dedupe::{Fingerprint, PerceptualHasher};
pub use error::{Error, Result};
pub use thumbnails::Derived;
