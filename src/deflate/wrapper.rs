//! zlib (RFC 1950) and gzip (RFC 1952) framing around a raw DEFLATE stream.

use crate::checksum::crc32;
use crate::error::{Error, Result};
use crate::io::{ByteReader, ByteWriter};

use super::{CompressOptions, Strategy};

pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
pub(crate) const METHOD_DEFLATE: u8 = 8;

const FTEXT: u8 = 0x01;
const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xE0;

/// Operating system byte: unknown.
pub const OS_UNKNOWN: u8 = 255;
/// Operating system byte: Unix.
pub const OS_UNIX: u8 = 3;

/// Framing around the DEFLATE bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrapper {
    /// Bare RFC 1951 stream, as stored in ZIP entries.
    #[default]
    Raw,
    /// RFC 1950: two-byte header, Adler-32 trailer.
    Zlib,
    /// RFC 1952: gzip member header, CRC-32 + length trailer.
    Gzip,
    /// Decoding only: detect gzip or zlib from the first two bytes, else raw.
    Auto,
}

/// Optional fields of a gzip member header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzipHeader {
    pub text: bool,
    pub mtime: u32,
    pub os: u8,
    pub extra: Option<Vec<u8>>,
    pub name: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
    /// Emit (or, when parsed, the stream carried) a header CRC16.
    pub header_crc: bool,
}

impl Default for GzipHeader {
    fn default() -> Self {
        Self {
            text: false,
            mtime: 0,
            os: OS_UNKNOWN,
            extra: None,
            name: None,
            comment: None,
            header_crc: false,
        }
    }
}

impl GzipHeader {
    pub(crate) fn encode(&self, options: &CompressOptions) -> Vec<u8> {
        let mut flags = 0u8;
        if self.text {
            flags |= FTEXT;
        }
        if self.header_crc {
            flags |= FHCRC;
        }
        if self.extra.is_some() {
            flags |= FEXTRA;
        }
        if self.name.is_some() {
            flags |= FNAME;
        }
        if self.comment.is_some() {
            flags |= FCOMMENT;
        }
        let xfl = if options.level == 9 {
            2
        } else if options.level < 2 || options.strategy >= Strategy::HuffmanOnly {
            4
        } else {
            0
        };

        let mut w = ByteWriter::with_capacity(10);
        w.bytes(&GZIP_MAGIC)
            .u8(METHOD_DEFLATE)
            .u8(flags)
            .u32(self.mtime)
            .u8(xfl)
            .u8(self.os);
        if let Some(extra) = &self.extra {
            w.u16(extra.len().min(u16::MAX as usize) as u16)
                .bytes(&extra[..extra.len().min(u16::MAX as usize)]);
        }
        for field in [&self.name, &self.comment].into_iter().flatten() {
            let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
            w.bytes(&field[..end]).u8(0);
        }
        if self.header_crc {
            let crc = crc32(0, w.as_slice());
            w.u16(crc as u16);
        }
        w.into_inner()
    }

    /// Parses a gzip header from the start of `data`.
    ///
    /// Returns `Ok(None)` when `data` ends before the header does.
    pub(crate) fn parse(data: &[u8]) -> Result<Option<(GzipHeader, usize)>> {
        let mut r = ByteReader::new(data);
        match Self::parse_fields(data, &mut r) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(Error::NeedInput) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn parse_fields(data: &[u8], r: &mut ByteReader<'_>) -> Result<(GzipHeader, usize)> {
        fn need<T>(v: Result<T>) -> Result<T> {
            v.map_err(|_| Error::NeedInput)
        }

        if r.remaining() < 10 {
            return Err(Error::NeedInput);
        }
        if !r.match_signature(&GZIP_MAGIC) {
            return Err(Error::data("incorrect header check"));
        }
        if need(r.read_u8("gzip method"))? != METHOD_DEFLATE {
            return Err(Error::data("unknown compression method"));
        }
        let flags = need(r.read_u8("gzip flags"))?;
        if flags & FRESERVED != 0 {
            return Err(Error::data("unknown header flags set"));
        }
        let mut header = GzipHeader {
            text: flags & FTEXT != 0,
            mtime: need(r.read_u32("gzip mtime"))?,
            header_crc: flags & FHCRC != 0,
            ..GzipHeader::default()
        };
        need(r.read_u8("gzip xfl"))?;
        header.os = need(r.read_u8("gzip os"))?;

        if flags & FEXTRA != 0 {
            let len = need(r.read_u16("gzip extra length"))? as usize;
            header.extra = Some(need(r.read_bytes(len, "gzip extra"))?.to_vec());
        }
        if flags & FNAME != 0 {
            header.name = Some(read_zero_terminated(r)?);
        }
        if flags & FCOMMENT != 0 {
            header.comment = Some(read_zero_terminated(r)?);
        }
        if header.header_crc {
            let end = r.position();
            let stored = need(r.read_u16("gzip header crc"))?;
            if stored != crc32(0, &data[..end]) as u16 {
                return Err(Error::data("header crc mismatch"));
            }
        }
        Ok((header, r.position()))
    }
}

fn read_zero_terminated(r: &mut ByteReader<'_>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = r.read_u8("gzip string").map_err(|_| Error::NeedInput)?;
        if b == 0 {
            return Ok(out);
        }
        out.push(b);
    }
}

/// Two-byte zlib header for the given options.
pub(crate) fn zlib_header(options: &CompressOptions) -> [u8; 2] {
    let cmf = (METHOD_DEFLATE as u16) | (((options.window_bits as u16) - 8) << 4);
    let level_flags: u16 = if options.strategy >= Strategy::HuffmanOnly || options.level < 2 {
        0
    } else if options.level < 6 {
        1
    } else if options.level == 6 {
        2
    } else {
        3
    };
    let mut header = (cmf << 8) | (level_flags << 6);
    header += 31 - (header % 31);
    header.to_be_bytes()
}

/// Validates a zlib header, returning the window size it announces.
pub(crate) fn check_zlib_header(b0: u8, b1: u8) -> Result<u32> {
    if ((b0 as u16) << 8 | b1 as u16) % 31 != 0 {
        return Err(Error::data("incorrect header check"));
    }
    if b0 & 0x0F != METHOD_DEFLATE {
        return Err(Error::data("unknown compression method"));
    }
    let bits = (b0 >> 4) as u32 + 8;
    if bits > 15 {
        return Err(Error::data("invalid window size"));
    }
    if b1 & 0x20 != 0 {
        return Err(Error::Unsupported("preset dictionary".into()));
    }
    Ok(bits)
}

/// Guesses the framing from the first two bytes of a stream.
pub(crate) fn detect(b0: u8, b1: u8) -> Wrapper {
    if [b0, b1] == GZIP_MAGIC {
        Wrapper::Gzip
    } else if b0 & 0x0F == METHOD_DEFLATE
        && (b0 >> 4) <= 7
        && ((b0 as u16) << 8 | b1 as u16) % 31 == 0
    {
        Wrapper::Zlib
    } else {
        Wrapper::Raw
    }
}
