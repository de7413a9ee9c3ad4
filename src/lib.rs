//! # zipstream
//!
//! Streaming ZIP archives with a built-in DEFLATE codec.
//!
//! This library reads and writes ZIP archives chunk by chunk. Archives can be
//! read from memory, from the local filesystem, or from remote HTTP servers;
//! for remote files it uses HTTP Range requests to download only the parts of
//! the archive that are needed.
//!
//! ## Features
//!
//! - DEFLATE compression and decompression (levels 0-9, several strategies)
//!   with raw, zlib and gzip framing, in [`deflate`]
//! - CRC32 and Adler-32 checksums, in [`checksum`]
//! - A pull-based streaming [`pipeline`] with pause, resume and cancel
//! - ZIP reading and writing with ZIP64, data descriptors, UTF-8 names and
//!   DOS/UNIX attributes, in [`zip`]
//! - Archives from memory, local files or HTTP/HTTPS URLs, through [`io`]
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use zipstream::{EntryOptions, MemoryReader, ZipExtractor, ZipWriter};
//!
//! # #[tokio::main]
//! # async fn main() -> zipstream::Result<()> {
//! let mut writer = ZipWriter::default();
//! writer.add("hello.txt", "hello, world", EntryOptions::default())?;
//! let bytes = writer.finish()?.into_bytes().await?;
//!
//! let zip = ZipExtractor::open(Arc::new(MemoryReader::new(bytes))).await?;
//! for entry in zip.entries() {
//!     println!("{} ({} bytes)", entry.file_name, entry.uncompressed_size);
//! }
//! assert_eq!(zip.read_by_name("hello.txt").await?, b"hello, world");
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod cli;
pub mod deflate;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{HttpRangeReader, LocalFileReader, MemoryReader, ReadAt};
pub use zip::{
    ArchiveOptions, EntryOptions, ReadOptions, ZipExtractor, ZipFileEntry, ZipWriter,
};
