//! DEFLATE compression and decompression (RFC 1951), with optional zlib
//! (RFC 1950) and gzip (RFC 1952) framing.
//!
//! ## Architecture
//!
//! - [`Deflater`]: LZ77 match search over a sliding window plus Huffman
//!   block encoding (stored, fixed or dynamic per block)
//! - [`Inflater`]: resumable decoder that accepts input in arbitrary pieces
//! - `huffman`: canonical code construction and two-level decode tables
//! - `tables`: the fixed length/distance alphabets and per-level tuning
//!
//! Both codecs are explicit state machines driven by repeated calls; neither
//! holds more than its 32 KiB window plus one block of pending symbols.
//!
//! ## Example
//!
//! ```rust
//! use zipstream::deflate::{compress, decompress, Wrapper};
//!
//! let data = "datatables".repeat(1000);
//! let packed = compress(data.as_bytes(), 6, Wrapper::Gzip).unwrap();
//! assert!(packed.len() < data.len() / 10);
//! assert_eq!(decompress(&packed, Wrapper::Auto).unwrap(), data.as_bytes());
//! ```

mod deflater;
mod huffman;
mod inflater;
pub(crate) mod tables;
mod wrapper;

pub use deflater::Deflater;
pub use inflater::Inflater;
pub use wrapper::{GzipHeader, OS_UNIX, OS_UNKNOWN, Wrapper};

use crate::error::{Error, Result};

/// Default compression level, as in zlib.
pub const DEFAULT_LEVEL: u32 = 6;

/// How much of the pending state a compression call must push out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Flush {
    /// Buffer input freely; output only whole blocks.
    None,
    /// Emit everything so far and end on a byte boundary with an empty stored
    /// block, so a decoder can consume all output without waiting for more.
    Sync,
    /// Like `Sync`, and forget match history so decoding can restart here.
    Full,
    /// Emit the final block and the wrapper trailer.
    Finish,
}

/// Match-search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Strategy {
    #[default]
    Default,
    /// Favour Huffman coding over short, distant matches (filtered data).
    Filtered,
    /// No string matching at all.
    HuffmanOnly,
    /// Matches with distance one only.
    Rle,
    /// Never build dynamic trees.
    Fixed,
}

/// Outcome of a codec call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// All input was consumed; more calls may follow.
    Ok,
    /// The stream is complete.
    StreamEnd,
}

/// Compressor parameters, validated when a [`Deflater`] is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressOptions {
    /// 0 (store only) through 9 (best compression).
    pub level: u32,
    pub wrapper: Wrapper,
    /// Base-two logarithm of the window size, 9..=15.
    pub window_bits: u32,
    /// Memory for the match index, 1..=9; the hash has `mem_level + 7` bits.
    pub mem_level: u32,
    pub strategy: Strategy,
    /// Header used when `wrapper` is [`Wrapper::Gzip`].
    pub gzip_header: Option<GzipHeader>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            wrapper: Wrapper::Raw,
            window_bits: 15,
            mem_level: 8,
            strategy: Strategy::Default,
            gzip_header: None,
        }
    }
}

impl CompressOptions {
    pub fn with_level(level: u32) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn wrapper(mut self, wrapper: Wrapper) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn window_bits(mut self, bits: u32) -> Self {
        self.window_bits = bits;
        self
    }

    pub fn mem_level(mut self, mem_level: u32) -> Self {
        self.mem_level = mem_level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.level > 9 {
            return Err(Error::config(format!(
                "compression level {} out of range 0..=9",
                self.level
            )));
        }
        if !(9..=15).contains(&self.window_bits) {
            return Err(Error::config(format!(
                "window bits {} out of range 9..=15",
                self.window_bits
            )));
        }
        if !(1..=9).contains(&self.mem_level) {
            return Err(Error::config(format!(
                "memory level {} out of range 1..=9",
                self.mem_level
            )));
        }
        if self.wrapper == Wrapper::Auto {
            return Err(Error::config("automatic wrapper detection is decode-only"));
        }
        Ok(())
    }
}

/// Compresses `bytes` in one call.
pub fn compress(bytes: &[u8], level: u32, wrapper: Wrapper) -> Result<Vec<u8>> {
    compress_with(bytes, CompressOptions::with_level(level).wrapper(wrapper))
}

/// Compresses `bytes` in one call with full control over the parameters.
pub fn compress_with(bytes: &[u8], options: CompressOptions) -> Result<Vec<u8>> {
    let mut deflater = Deflater::new(options)?;
    let mut out = Vec::with_capacity(bytes.len() / 2 + 64);
    deflater.compress(bytes, Flush::Finish, &mut out)?;
    Ok(out)
}

/// Decompresses a complete stream in one call.
///
/// A stream that stops before its final block yields [`Error::NeedInput`].
pub fn decompress(bytes: &[u8], wrapper: Wrapper) -> Result<Vec<u8>> {
    let mut inflater = Inflater::new(wrapper);
    let mut out = Vec::with_capacity(bytes.len().saturating_mul(3));
    inflater.inflate(bytes, &mut out)?;
    Ok(out)
}
