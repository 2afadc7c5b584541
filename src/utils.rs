use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder};
use async_compression::Level;
use std::io::{self, Write};
use std::path::Path;
use tokio::io::AsyncReadExt;

pub async fn gzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzipEncoder::with_quality(bytes, Level::Best);
    let mut compressed = Vec::with_capacity(bytes.len() / 8);
    encoder.read_to_end(&mut compressed).await?;
    Ok(compressed)
}

pub async fn gunzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzipDecoder::new(bytes);
    let mut decompressed = Vec::with_capacity(bytes.len() * 8);
    decoder.read_to_end(&mut decompressed).await?;
    Ok(decompressed)
}

/// Replaces `path` with `bytes` so that readers see either the old or the new
/// content, never a torn file. The data is fsynced before the rename.
pub async fn write_atomic(path: &Path, bytes: Vec<u8>) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| e.error)?;
        Ok::<(), io::Error>(())
    })
    .await
    .map_err(io::Error::other)?
}
