use std::path::{Path, PathBuf};
use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
};
use uuid::Uuid;

use crate::digest::{ContentHasher, CHUNK_SIZE};
use crate::error::Result;

/// An upload spooled to disk, with its digest computed on the way in.
#[derive(Debug)]
pub struct Staged {
    pub path: PathBuf,
    pub digest: String,
    pub size: u64,
}

/// Stream `reader` into a fresh `.part` file under `staging_dir`, hashing as it goes.
pub async fn stage_stream<R: AsyncRead + Unpin>(staging_dir: &Path, mut reader: R) -> Result<Staged> {
    fs::create_dir_all(staging_dir).await?;
    let path = staging_dir.join(format!("{}.part", Uuid::new_v4()));

    let copied = async {
        let mut f = fs::File::create(&path).await?;
        let mut hasher = ContentHasher::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 { break; }
            hasher.update(&buf[..n]);
            f.write_all(&buf[..n]).await?;
        }
        f.flush().await?;
        let _ = f.sync_all().await; // best-effort
        Ok::<_, std::io::Error>(hasher.finish())
    }
    .await;

    match copied {
        Ok((digest, size)) => Ok(Staged { path, digest, size }),
        Err(e) => {
            let _ = fs::remove_file(&path).await;
            Err(e.into())
        }
    }
}

/// Move a staged file into place, creating parent directories.
pub async fn publish(staged: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() { fs::create_dir_all(parent).await?; }
    fs::rename(staged, dest).await?;
    Ok(())
}

/// Write via a sibling temp file and rename, so readers never see a partial file.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() { fs::create_dir_all(parent).await?; }
    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()));
    {
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(bytes).await?;
        let _ = f.sync_all().await;
    }
    if let Err(e) = fs::rename(&tmp, dest).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Returns whether a file was actually removed.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub async fn exists(path: &Path) -> Result<bool> {
    Ok(fs::try_exists(path).await?)
}

/// Regular file, following symlinks. Missing is `false`, not an error.
pub async fn is_file(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(m) => Ok(m.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_bytes;

    #[tokio::test]
    async fn stage_then_publish() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![7u8; CHUNK_SIZE + 5];
        let staged = stage_stream(&dir.path().join(".staging"), std::io::Cursor::new(data.clone())).await.unwrap();
        assert_eq!(staged.digest, digest_bytes(&data));
        assert_eq!(staged.size, data.len() as u64);

        let dest = dir.path().join("a/b/c.bin");
        publish(&staged.path, &dest).await.unwrap();
        assert!(!staged.path.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x/y.jpg");
        write_atomic(&dest, b"one").await.unwrap();
        write_atomic(&dest, b"two").await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"two");
        assert_eq!(std::fs::read_dir(dir.path().join("x")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn remove_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("gone");
        assert!(!remove_if_exists(&p).await.unwrap());
        std::fs::write(&p, b"x").unwrap();
        assert!(remove_if_exists(&p).await.unwrap());
    }

    #[tokio::test]
    async fn is_file_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_file(dir.path()).await.unwrap());
        assert!(!is_file(&dir.path().join("missing")).await.unwrap());
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        assert!(is_file(&dir.path().join("f")).await.unwrap());
    }
}
