//! Resolution of caller-supplied relative paths against the storage root.
//!
//! Every filesystem access driven by a caller string goes through
//! [`PathResolver::resolve`] first. The lexical check runs before the
//! filesystem is touched; the canonical check catches symlinks that point
//! outside the root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Creates the root if missing and pins its canonical form.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Self { root: root.canonicalize()? })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Absolute path for `requested`, guaranteed to stay under the root.
    ///
    /// Leading slashes are treated as root-relative, and backslashes as
    /// separators so that Windows-style input cannot smuggle `..` through.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let normalized = requested.replace('\\', "/");
        let trimmed = normalized.trim_start_matches('/');

        let mut clean = PathBuf::new();
        for comp in Path::new(trimmed).components() {
            match comp {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !clean.pop() {
                        return Err(Error::PathTraversal(requested.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::PathTraversal(requested.to_string()));
                }
            }
        }

        let joined = self.root.join(&clean);
        let real = canonicalize_existing(&joined)?;
        if !real.starts_with(&self.root) {
            return Err(Error::PathTraversal(requested.to_string()));
        }
        Ok(joined)
    }

    /// Storage-relative form of an absolute path under the root, always
    /// using forward slashes.
    pub fn relative(&self, absolute: &Path) -> Result<String> {
        let rel = absolute
            .strip_prefix(&self.root)
            .map_err(|_| Error::PathTraversal(absolute.display().to_string()))?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }
}

/// Canonical form of the deepest existing ancestor, with the missing tail
/// re-appended.
fn canonicalize_existing(path: &Path) -> Result<PathBuf> {
    let mut missing = Vec::new();
    let mut cursor = path;
    loop {
        match cursor.canonicalize() {
            Ok(real) => {
                let mut out = real;
                for part in missing.iter().rev() {
                    out.push(part);
                }
                return Ok(out);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match (cursor.file_name(), cursor.parent()) {
                    (Some(name), Some(parent)) => {
                        missing.push(name.to_os_string());
                        cursor = parent;
                    }
                    _ => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}
