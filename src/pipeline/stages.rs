use super::{Chunk, Stage, StreamInfo};
use crate::checksum::Crc32;
use crate::deflate::{CompressOptions, Deflater, Flush, Inflater, Status, Wrapper};
use crate::error::{Error, Result};
use crate::zip::CompressionMethod;

/// Passes chunks through while computing their CRC32.
#[derive(Debug, Default)]
pub struct Crc32Probe {
    crc: Crc32,
}

impl Crc32Probe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for Crc32Probe {
    fn name(&self) -> &'static str {
        "crc32"
    }

    fn process(&mut self, chunk: Chunk, out: &mut Vec<Chunk>) -> Result<()> {
        self.crc.update(&chunk.data);
        out.push(chunk);
        Ok(())
    }

    fn describe(&self, info: &mut StreamInfo) {
        info.crc32 = Some(self.crc.finalize());
    }
}

/// Which [`StreamInfo`] size a [`LengthProbe`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    Uncompressed,
    Compressed,
}

/// Passes chunks through while counting their bytes.
#[derive(Debug)]
pub struct LengthProbe {
    field: LengthField,
    count: u64,
}

impl LengthProbe {
    pub fn new(field: LengthField) -> Self {
        Self { field, count: 0 }
    }
}

impl Stage for LengthProbe {
    fn name(&self) -> &'static str {
        match self.field {
            LengthField::Uncompressed => "uncompressed-length",
            LengthField::Compressed => "compressed-length",
        }
    }

    fn process(&mut self, chunk: Chunk, out: &mut Vec<Chunk>) -> Result<()> {
        self.count += chunk.data.len() as u64;
        out.push(chunk);
        Ok(())
    }

    fn describe(&self, info: &mut StreamInfo) {
        match self.field {
            LengthField::Uncompressed => info.uncompressed_size = Some(self.count),
            LengthField::Compressed => info.compressed_size = Some(self.count),
        }
    }
}

/// DEFLATE-compresses the stream.
#[derive(Debug)]
pub struct CompressStage {
    deflater: Deflater,
}

impl CompressStage {
    pub fn new(level: u32, wrapper: Wrapper) -> Result<Self> {
        Self::with_options(CompressOptions::with_level(level).wrapper(wrapper))
    }

    pub fn with_options(options: CompressOptions) -> Result<Self> {
        Ok(Self {
            deflater: Deflater::new(options)?,
        })
    }
}

impl Stage for CompressStage {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn process(&mut self, chunk: Chunk, out: &mut Vec<Chunk>) -> Result<()> {
        let mut packed = Vec::new();
        self.deflater.compress(&chunk.data, Flush::None, &mut packed)?;
        if !packed.is_empty() {
            out.push(Chunk {
                data: packed,
                meta: chunk.meta,
            });
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<Chunk>) -> Result<()> {
        let mut packed = Vec::new();
        self.deflater.compress(&[], Flush::Finish, &mut packed)?;
        out.push(Chunk::new(packed, 100.0));
        Ok(())
    }

    fn describe(&self, info: &mut StreamInfo) {
        info.compression = Some(CompressionMethod::Deflate);
    }
}

/// Inflates the stream. Bytes after the end of the compressed stream are
/// ignored; a stream that stops early fails when the upstream ends.
#[derive(Debug)]
pub struct DecompressStage {
    inflater: Inflater,
}

impl DecompressStage {
    pub fn new(wrapper: Wrapper) -> Self {
        Self {
            inflater: Inflater::new(wrapper),
        }
    }
}

impl Stage for DecompressStage {
    fn name(&self) -> &'static str {
        "inflate"
    }

    fn process(&mut self, chunk: Chunk, out: &mut Vec<Chunk>) -> Result<()> {
        let mut plain = Vec::new();
        match self.inflater.inflate(&chunk.data, &mut plain) {
            Ok(Status::Ok | Status::StreamEnd) | Err(Error::NeedInput) => {}
            Err(e) => return Err(e),
        }
        if !plain.is_empty() {
            out.push(Chunk {
                data: plain,
                meta: chunk.meta,
            });
        }
        Ok(())
    }

    fn finish(&mut self, _out: &mut Vec<Chunk>) -> Result<()> {
        if !self.inflater.is_finished() {
            return Err(Error::data("unexpected end of compressed data"));
        }
        Ok(())
    }
}
