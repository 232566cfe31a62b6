//! File transport for exports run from the command line

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::{FragmentSink, ResponseMetadata};

/// Writes fragments to a local file
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    written: u64,
}

impl FileSink {
    /// Create the output file
    ///
    /// # Arguments
    /// * `path` - Output file path; its parent directory must exist
    pub async fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("Directory does not exist: {}", parent.display()),
                ));
            }
        }

        let file = File::create(path).await?;
        debug!("Created export file: {}", path.display());

        Ok(Self {
            writer: BufWriter::with_capacity(8 * 1024 * 1024, file),
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl FragmentSink for FileSink {
    async fn begin(&mut self, meta: &ResponseMetadata) -> io::Result<()> {
        debug!(
            "Writing {} export to {}",
            meta.content_type,
            self.path.display()
        );
        Ok(())
    }

    async fn send(&mut self, fragment: Bytes) -> io::Result<()> {
        self.writer.write_all(&fragment).await?;
        self.written += fragment.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.writer.flush().await?;
        debug!(
            "Finalized export file: {} ({} bytes)",
            self.path.display(),
            self.written
        );
        Ok(())
    }

    async fn abort(&mut self) {
        if let Err(e) = self.writer.flush().await {
            warn!("Failed to flush partial export {}: {}", self.path.display(), e);
        }
        warn!(
            "Export to {} is incomplete ({} bytes written)",
            self.path.display(),
            self.written
        );
    }
}
