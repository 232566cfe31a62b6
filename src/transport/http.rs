//! HTTP/1.1 response writer for streamed exports
//!
//! The response head is written before the first fragment; each fragment
//! becomes one chunk of a `Transfer-Encoding: chunked` body. Only a
//! completed export gets the terminating zero-length chunk, so a client
//! can tell a truncated download from a finished one.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::ErrorResponse;

use super::{FragmentSink, ResponseMetadata};

/// Capacity of the buffer in front of the connection
const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Chunked HTTP response over any async writer
pub struct HttpResponseSink<W: AsyncWrite + Unpin + Send> {
    writer: BufWriter<W>,
    head_written: bool,
    chunks: u64,
}

impl<W: AsyncWrite + Unpin + Send> HttpResponseSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(WRITE_BUFFER_BYTES, writer),
            head_written: false,
            chunks: 0,
        }
    }

    /// Number of body chunks written so far
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

fn response_head(meta: &ResponseMetadata) -> String {
    let mut head = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {}\r\n\
         Content-Disposition: {}\r\n\
         Transfer-Encoding: chunked\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n",
        meta.content_type,
        meta.disposition()
    );
    if let Some(rows) = meta.expected_rows {
        head.push_str(&format!("X-Expected-Rows: {rows}\r\n"));
    }
    head.push_str("\r\n");
    head
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FragmentSink for HttpResponseSink<W> {
    async fn begin(&mut self, meta: &ResponseMetadata) -> io::Result<()> {
        if self.head_written {
            return Ok(());
        }
        self.writer.write_all(response_head(meta).as_bytes()).await?;
        self.writer.flush().await?;
        self.head_written = true;
        debug!("Sent response head for {}", meta.filename);
        Ok(())
    }

    async fn send(&mut self, fragment: Bytes) -> io::Result<()> {
        // A zero-size chunk would end the body early
        if fragment.is_empty() {
            return Ok(());
        }
        self.writer
            .write_all(format!("{:X}\r\n", fragment.len()).as_bytes())
            .await?;
        self.writer.write_all(&fragment).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.chunks += 1;
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.writer.write_all(b"0\r\n\r\n").await?;
        self.writer.flush().await?;
        self.writer.shutdown().await
    }

    async fn abort(&mut self) {
        // Closing without the final chunk leaves the body visibly truncated
        if let Err(e) = self.writer.shutdown().await {
            debug!("Error shutting down aborted response: {}", e);
        }
    }
}

/// Write a complete JSON error response
///
/// Used only before streaming starts, while the status line can still be
/// chosen.
pub async fn write_error_response<W>(
    writer: &mut W,
    status: u16,
    reason: &str,
    body: &ErrorResponse,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let json = body
        .to_json_compact()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {json}",
        json.len()
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    writer.shutdown().await
}
