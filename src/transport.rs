//! Chunk transport
//!
//! Reads an export file in fixed-size byte chunks and hands them, strictly
//! in offset order, to the parsing task over a bounded channel. A full
//! channel makes the reader wait, which keeps at most a few chunks in
//! memory regardless of file size.

use crate::error::{Error, Result};
use crate::progress::{percent_of, ProgressEvent};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Message from the transport to the parsing task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChunkMessage {
    /// One chunk of the input, `size` being the total input size
    Progress { data: Vec<u8>, offset: u64, size: u64 },
    /// No more chunks follow
    Complete,
}

/// Number of chunks needed for `size` bytes.
pub fn total_chunks(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size as u64)
}

/// Byte range `[start, end)` of chunk `index`.
pub fn chunk_range(index: u64, size: u64, chunk_size: usize) -> (u64, u64) {
    let start = index * chunk_size as u64;
    let end = size.min(start + chunk_size as u64);
    (start, end)
}

pub struct ChunkTransport<R> {
    reader: R,
    size: u64,
    chunk_size: usize,
}

impl ChunkTransport<tokio::fs::File> {
    /// Open an export file for chunked reading
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::InvalidPath(format!("{}: {}", path.display(), e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| Error::Transport(format!("{}: {}", path.display(), e)))?
            .len();

        debug!(path = %path.display(), size, chunk_size, "Opened export file");
        Ok(Self::new(file, size, chunk_size))
    }
}

impl<R: AsyncRead + Unpin> ChunkTransport<R> {
    pub fn new(reader: R, size: u64, chunk_size: usize) -> Self {
        Self {
            reader,
            size,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn total_chunks(&self) -> u64 {
        total_chunks(self.size, self.chunk_size)
    }

    /// Stream every chunk, then the `Complete` sentinel.
    ///
    /// A read failure aborts before the sentinel, so the parser never
    /// flushes state for a truncated input. Returns the number of chunks sent.
    pub async fn run(
        mut self,
        chunks: mpsc::Sender<ChunkMessage>,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<u64> {
        let total = self.total_chunks();
        info!(size = self.size, chunks = total, "Streaming export");

        if total == 0 {
            let _ = progress.send(ProgressEvent::Transfer {
                percent: percent_of(0, total),
            });
        }

        for index in 0..total {
            let (start, end) = chunk_range(index, self.size, self.chunk_size);
            let mut data = vec![0u8; (end - start) as usize];
            self.reader.read_exact(&mut data).await.map_err(|e| {
                Error::Transport(format!("reading chunk {} at offset {}: {}", index, start, e))
            })?;

            chunks
                .send(ChunkMessage::Progress {
                    data,
                    offset: start,
                    size: self.size,
                })
                .await
                .map_err(|_| Error::Pipeline("parser stopped accepting chunks".to_string()))?;

            let _ = progress.send(ProgressEvent::Transfer {
                percent: percent_of(index + 1, total),
            });
            debug!(chunk = index, offset = start, "Chunk sent");
        }

        chunks
            .send(ChunkMessage::Complete)
            .await
            .map_err(|_| Error::Pipeline("parser stopped accepting chunks".to_string()))?;

        Ok(total)
    }
}
