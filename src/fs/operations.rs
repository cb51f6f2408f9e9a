//! Small file helpers for the durable pieces of the client and server. Both
//! the retry cache and the server snapshot are single json documents that get
//! replaced wholesale, so everything funnels through an atomic overwrite.

use std::path::{Path, PathBuf};

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replaces the contents of `path` in one step: the data is written to a
/// sibling temp file, synced, and renamed over the destination. A crash
/// mid-write leaves the previous version intact.
pub async fn atomic_overwrite(path: &Path, data: &[u8]) -> Result<()> {
    let temp = temp_sibling(path);
    debug!("Overwriting {path:?} through {temp:?}");

    let mut file = File::create(&temp).await?;
    file.lock_exclusive()?;
    let write_result = async {
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;
    file.unlock_async().await?;
    write_result?;
    drop(file);

    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

/// Reads the whole file under a shared lock. Returns `None` when the file
/// doesn't exist.
pub async fn read_locked(path: &Path) -> Result<Option<Vec<u8>>> {
    let file = match File::open(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    file.lock_shared()?;
    let mut file = file;
    let mut buffer = Vec::new();
    let read_result = file.read_to_end(&mut buffer).await;
    file.unlock_async().await?;
    read_result?;
    Ok(Some(buffer))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{atomic_overwrite, read_locked};

    #[tokio::test]
    async fn overwrite_then_read() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state.json");

        atomic_overwrite(&path, b"first").await?;
        assert_eq!(read_locked(&path).await?.as_deref(), Some(&b"first"[..]));

        atomic_overwrite(&path, b"second").await?;
        assert_eq!(read_locked(&path).await?.as_deref(), Some(&b"second"[..]));

        // No temp file should survive a completed overwrite.
        let leftovers = std::fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() -> Result<()> {
        let dir = tempdir()?;
        assert!(read_locked(&dir.path().join("absent.json")).await?.is_none());
        Ok(())
    }
}
