//! Random-access byte sources and little-endian byte primitives.
//!
//! Archives are read through the [`ReadAt`] trait so the same parser works on
//! an in-memory buffer, a local file or a remote object fetched with HTTP Range
//! requests. The backend is chosen once, when the reader is constructed.

mod bytes;
mod http;
mod local;
mod memory;

pub use bytes::{ByteReader, ByteWriter};
pub use http::HttpRangeReader;
pub use local::LocalFileReader;
pub use memory::MemoryReader;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer, returning the
    /// number of bytes read. Short reads only happen at the end of the source.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely from `offset`.
    ///
    /// Running past the end of the source is reported as a data error, since
    /// for an archive it means a structure points outside the file.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::data(format!(
                    "unexpected end of data: wanted {} bytes at offset {}, source has {}",
                    buf.len(),
                    offset,
                    self.size()
                )));
            }
            filled += n;
        }
        Ok(())
    }
}

#[async_trait]
impl<T: ReadAt + ?Sized> ReadAt for std::sync::Arc<T> {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}
