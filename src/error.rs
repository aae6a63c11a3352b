use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bytes could not be decoded as an image, or decoded to zero pixels.
    #[error("cannot decode image: {0}")]
    Decode(String),

    /// A caller-supplied path resolved outside the storage root.
    #[error("path escapes storage root: {0}")]
    PathTraversal(String),

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// Referential-integrity violation, e.g. removing a category that still owns images.
    #[error("{0}")]
    DependentState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("metadata store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn not_found(what: &'static str, key: impl ToString) -> Self {
        Self::NotFound { what, key: key.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
