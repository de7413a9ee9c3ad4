//! ZIP archive reading and writing.
//!
//! This module provides functionality for reading, extracting and creating
//! ZIP archives, supporting both the standard ZIP format and the ZIP64
//! extensions for large archives.
//!
//! ## Architecture
//!
//! The module is organized into four main components:
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`extractor`]: High-level extraction API for end users
//! - [`writer`]: Archive creation, buffered or streamed
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! This implementation reads the EOCD first (from the end of the file),
//! then the Central Directory, which allows listing files without reading
//! the entire archive. Entry data is only fetched on extraction, which
//! keeps HTTP Range requests small.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED (no compression) and DEFLATE methods
//! - Archives with data prepended (self-extracting stubs)
//! - UTF-8 names and Info-ZIP Unicode path/comment extra fields
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod extractor;
mod parser;
mod structures;
mod writer;

pub use extractor::{ReadOptions, ZipExtractor};
pub use parser::{CentralDirectory, ZipParser};
pub use structures::*;
pub use writer::{ArchiveOptions, ArchiveStream, EntryData, EntryOptions, ZipWriter};
