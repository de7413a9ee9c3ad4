use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Chunk, DEFAULT_CHUNK_SIZE, Source, StreamInfo};
use crate::error::{Error, Result};
use crate::io::ReadAt;

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

/// Emits an in-memory buffer in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Vec<u8>,
    pos: usize,
    chunk_size: usize,
}

impl BytesSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

#[async_trait]
impl Source for BytesSource {
    async fn produce(&mut self) -> Result<Option<Chunk>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(Chunk::new(
            chunk,
            percent(self.pos as u64, self.data.len() as u64),
        )))
    }

    fn describe(&self, info: &mut StreamInfo) {
        info.uncompressed_size = Some(self.data.len() as u64);
    }

    fn abort(&mut self, _reason: &Error) {
        self.data = Vec::new();
        self.pos = 0;
    }
}

/// Reads any [`AsyncRead`] to its end.
pub struct ReaderSource<R> {
    reader: Option<R>,
    chunk_size: usize,
    read: u64,
    expected: Option<u64>,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            chunk_size: DEFAULT_CHUNK_SIZE,
            read: 0,
            expected: None,
        }
    }

    /// Total length, if known; only used for progress reporting.
    pub fn expected_len(mut self, len: u64) -> Self {
        self.expected = Some(len);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Source for ReaderSource<R> {
    async fn produce(&mut self) -> Result<Option<Chunk>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.chunk_size];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            self.reader = None;
            return Ok(None);
        }
        buf.truncate(n);
        self.read += n as u64;
        let pct = match self.expected {
            Some(total) => percent(self.read, total).min(100.0),
            None => 0.0,
        };
        Ok(Some(Chunk::new(buf, pct)))
    }

    fn describe(&self, info: &mut StreamInfo) {
        if self.reader.is_none() {
            info.uncompressed_size = Some(self.read);
        }
    }

    fn abort(&mut self, _reason: &Error) {
        self.reader = None;
    }
}

/// Emits the byte range `offset..offset + len` of a positional reader.
pub struct RangeSource {
    reader: Arc<dyn ReadAt>,
    offset: u64,
    len: u64,
    pos: u64,
    chunk_size: usize,
}

impl RangeSource {
    pub fn new(reader: Arc<dyn ReadAt>, offset: u64, len: u64) -> Self {
        Self {
            reader,
            offset,
            len,
            pos: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

#[async_trait]
impl Source for RangeSource {
    async fn produce(&mut self) -> Result<Option<Chunk>> {
        if self.pos >= self.len {
            return Ok(None);
        }
        let n = (self.len - self.pos).min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; n];
        self.reader
            .read_exact_at(self.offset + self.pos, &mut buf)
            .await?;
        self.pos += n as u64;
        Ok(Some(Chunk::new(buf, percent(self.pos, self.len))))
    }

    fn describe(&self, info: &mut StreamInfo) {
        info.compressed_size = Some(self.len);
    }

    fn abort(&mut self, _reason: &Error) {
        self.pos = self.len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::pipeline::Pipeline;

    #[tokio::test]
    async fn range_source_reads_only_its_window() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let reader: Arc<dyn ReadAt> = Arc::new(MemoryReader::new(data.clone()));
        let (out, info) = Pipeline::new(RangeSource::new(reader, 100, 5000).chunk_size(333))
            .collect()
            .await
            .unwrap();
        assert_eq!(out, &data[100..5100]);
        assert_eq!(info.compressed_size, Some(5000));
    }

    #[tokio::test]
    async fn range_past_the_end_is_a_data_error() {
        let reader: Arc<dyn ReadAt> = Arc::new(MemoryReader::new(vec![0u8; 10]));
        let err = Pipeline::new(RangeSource::new(reader, 5, 20))
            .collect()
            .await
            .unwrap_err();
        assert!(err.is_data_error(), "{err}");
    }

    #[tokio::test]
    async fn reader_source_counts_bytes() {
        let data = vec![3u8; 40_000];
        let source = ReaderSource::new(std::io::Cursor::new(data.clone()))
            .expected_len(40_000)
            .chunk_size(4096);
        let (out, info) = Pipeline::new(source).collect().await.unwrap();
        assert_eq!(out, data);
        assert_eq!(info.uncompressed_size, Some(40_000));
    }

    #[tokio::test]
    async fn empty_bytes_source_ends_immediately() {
        let mut pipeline = Pipeline::new(BytesSource::new(Vec::new()));
        assert!(pipeline.next().await.unwrap().is_none());
    }
}
