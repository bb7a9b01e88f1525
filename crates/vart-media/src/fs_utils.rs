//! Filesystem utilities for chunk and output files.
//!
//! Chunk directories may live on a different filesystem than the final
//! output, so moves fall back to copy-and-delete on EXDEV.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Rename `src` to `dst`, copying across filesystems when rename cannot.
///
/// The copy path writes a temporary file beside `dst` and renames it so the
/// destination never holds a half-written file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    ensure_parent(dst).await?;

    let err = match fs::rename(src, dst).await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    if !crosses_devices(&err) {
        return Err(err.into());
    }

    tracing::debug!(src = %src.display(), dst = %dst.display(), "Rename crosses filesystems, copying");
    copy_atomic(src, dst).await?;
    if let Err(err) = fs::remove_file(src).await {
        tracing::warn!(src = %src.display(), error = %err, "Moved file left its source behind");
    }
    Ok(())
}

/// Copy `src` to `dst` through a temporary file in the destination directory.
pub async fn copy_atomic(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<u64> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    ensure_parent(dst).await?;

    let tmp_dst = dst.with_extension("tmp");
    let bytes = fs::copy(src, &tmp_dst).await?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(MediaError::from(e));
    }

    Ok(bytes)
}

/// Size of a file in bytes, or 0 if it cannot be read.
pub async fn file_size(path: impl AsRef<Path>) -> u64 {
    fs::metadata(path.as_ref())
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Remove files, ignoring ones that are already gone.
pub async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

/// Replace the extension of `path`, keeping its stem and directory.
pub fn with_extension(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension.trim_start_matches('.'))
}

async fn ensure_parent(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

const EXDEV: i32 = 18;

fn crosses_devices(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(EXDEV)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_chunk_into_new_directory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("chunk_000.y4m");
        let dst = dir.path().join("out").join("final.y4m");

        fs::write(&src, b"frames").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_copy_atomic_keeps_source() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("b.bin");
        fs::write(&src, b"12345").await.unwrap();

        let bytes = copy_atomic(&src, &dst).await.unwrap();
        assert_eq!(bytes, 5);
        assert!(src.exists());
        assert!(!dst.with_extension("tmp").exists());
        assert_eq!(file_size(&dst).await, 5);
    }

    #[tokio::test]
    async fn test_remove_files_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("present");
        fs::write(&present, b"x").await.unwrap();

        remove_files(&[present.clone(), dir.path().join("missing")]).await;
        assert!(!present.exists());
    }

    #[test]
    fn test_with_extension() {
        assert_eq!(
            with_extension(Path::new("/out/video.mp4"), ".y4m"),
            PathBuf::from("/out/video.y4m")
        );
    }

    #[test]
    fn test_crosses_devices() {
        assert!(crosses_devices(&std::io::Error::from_raw_os_error(EXDEV)));
        assert!(!crosses_devices(&std::io::Error::from_raw_os_error(2)));
    }
}
