//! Resumable DEFLATE decoder.
//!
//! Input may arrive in pieces of any size. Every decoding unit (a block
//! header, one code length, one literal or a whole length/distance pair) is
//! decoded from the bit accumulator atomically: if the accumulator cannot
//! supply all of its bits, nothing is consumed and the call returns
//! [`Error::NeedInput`] with all input so far absorbed.

use crate::checksum::{Adler32, Crc32};
use crate::error::{Error, Result};

use super::huffman::{DecodeTable, Decoded, TableKind, fixed_decode_tables};
use super::tables::{BL_ORDER, DIST_BASE, DIST_EXTRA, LENGTH_BASE, LENGTH_EXTRA};
use super::wrapper::{GzipHeader, check_zlib_header, detect};
use super::{Status, Wrapper};

const WSIZE: usize = 1 << 15;
const WMASK: usize = WSIZE - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Header,
    Block,
    StoredLen,
    Copy,
    Table,
    LenLens,
    CodeLens,
    Len,
    Check,
    Done,
}

/// LSB-first bit accumulator. Bits above `count` are always zero.
#[derive(Debug, Default)]
struct BitReader {
    hold: u64,
    count: u32,
}

impl BitReader {
    #[inline]
    fn refill(&mut self, data: &[u8], pos: &mut usize) {
        while self.count <= 56 && *pos < data.len() {
            self.hold |= (data[*pos] as u64) << self.count;
            self.count += 8;
            *pos += 1;
        }
    }

    #[inline]
    fn consume(&mut self, n: u32) {
        debug_assert!(n <= self.count);
        self.hold = if n >= 64 { 0 } else { self.hold >> n };
        self.count -= n;
    }

    fn align(&mut self) {
        self.consume(self.count % 8);
    }
}

#[inline]
fn low_bits(v: u64, n: u32) -> usize {
    (v & ((1u64 << n) - 1)) as usize
}

/// The last 32 KiB of output, for back-references that reach into data
/// already handed to the caller.
#[derive(Debug)]
struct Window {
    buf: Vec<u8>,
    next: usize,
    have: usize,
}

impl Window {
    fn new() -> Self {
        Self {
            buf: vec![0; WSIZE],
            next: 0,
            have: 0,
        }
    }

    #[inline]
    fn push(&mut self, b: u8, out: &mut Vec<u8>) {
        out.push(b);
        self.buf[self.next] = b;
        self.next = (self.next + 1) & WMASK;
        if self.have < WSIZE {
            self.have += 1;
        }
    }

    fn extend(&mut self, bytes: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(bytes);
        let tail = &bytes[bytes.len().saturating_sub(WSIZE)..];
        let first = tail.len().min(WSIZE - self.next);
        self.buf[self.next..self.next + first].copy_from_slice(&tail[..first]);
        self.buf[..tail.len() - first].copy_from_slice(&tail[first..]);
        self.next = (self.next + tail.len()) & WMASK;
        self.have = (self.have + bytes.len()).min(WSIZE);
    }

    fn copy_match(&mut self, dist: usize, len: usize, out: &mut Vec<u8>) {
        out.reserve(len);
        let mut from = (self.next + WSIZE - dist) & WMASK;
        for _ in 0..len {
            let b = self.buf[from];
            self.push(b, out);
            from = (from + 1) & WMASK;
        }
    }
}

enum Tables {
    Fixed,
    Dynamic(DecodeTable, DecodeTable),
}

/// Stream decompressor.
///
/// ```rust
/// use zipstream::deflate::{compress, Inflater, Status, Wrapper};
///
/// let packed = compress(b"hello hello hello", 6, Wrapper::Zlib).unwrap();
/// let mut inflater = Inflater::new(Wrapper::Zlib);
/// let mut out = Vec::new();
/// let (head, tail) = packed.split_at(5);
/// assert!(inflater.inflate(head, &mut out).unwrap_err().is_recoverable());
/// assert_eq!(inflater.inflate(tail, &mut out).unwrap(), Status::StreamEnd);
/// assert_eq!(out, b"hello hello hello");
/// ```
pub struct Inflater {
    wrapper: Wrapper,
    active: Wrapper,
    mode: Mode,
    failed: Option<String>,
    /// Header bytes buffered until the wrapper header is complete.
    pending: Vec<u8>,
    bits: BitReader,
    last: bool,
    window: Window,

    stored_left: usize,

    nlen: usize,
    ndist: usize,
    ncode: usize,
    have: usize,
    code_lens: [u8; 19],
    lens: [u8; 320],
    code_table: Option<DecodeTable>,
    tables: Tables,

    crc: Crc32,
    adler: Adler32,
    total_in: u64,
    total_out: u64,
    gzip_header: Option<GzipHeader>,
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("wrapper", &self.wrapper)
            .field("mode", &self.mode)
            .field("total_in", &self.total_in)
            .field("total_out", &self.total_out)
            .finish_non_exhaustive()
    }
}

impl Inflater {
    pub fn new(wrapper: Wrapper) -> Self {
        Self {
            wrapper,
            active: wrapper,
            mode: Mode::Header,
            failed: None,
            pending: Vec::new(),
            bits: BitReader::default(),
            last: false,
            window: Window::new(),
            stored_left: 0,
            nlen: 0,
            ndist: 0,
            ncode: 0,
            have: 0,
            code_lens: [0; 19],
            lens: [0; 320],
            code_table: None,
            tables: Tables::Fixed,
            crc: Crc32::new(),
            adler: Adler32::new(),
            total_in: 0,
            total_out: 0,
            gzip_header: None,
        }
    }

    /// Framing in effect; for [`Wrapper::Auto`] this is the detected one once
    /// the header has been read.
    pub fn wrapper(&self) -> Wrapper {
        self.active
    }

    /// Header of the gzip member being decoded, once it has been read.
    pub fn gzip_header(&self) -> Option<&GzipHeader> {
        self.gzip_header.as_ref()
    }

    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    pub fn is_finished(&self) -> bool {
        self.mode == Mode::Done
    }

    /// Consumes all of `input`, appending decoded bytes to `out`.
    ///
    /// Returns [`Status::StreamEnd`] once the final block (and trailer, if
    /// any) has been decoded, and [`Error::NeedInput`] when the stream is
    /// not finished yet; everything decodable so far is in `out` either way.
    /// After a data error every further call fails with the same error.
    pub fn inflate(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<Status> {
        if let Some(msg) = &self.failed {
            return Err(Error::Data(msg.clone()));
        }
        if self.mode == Mode::Done {
            return Ok(Status::StreamEnd);
        }
        self.total_in += input.len() as u64;

        let owned;
        let mut data = input;
        if self.mode == Mode::Header {
            self.pending.extend_from_slice(input);
            match self.read_header() {
                Ok(Some(used)) => {
                    owned = std::mem::take(&mut self.pending);
                    data = &owned[used..];
                }
                Ok(None) => return Err(Error::NeedInput),
                Err(e) => return Err(self.fail(e)),
            }
        }

        let start = out.len();
        let mut checked = start;
        let result = self.run(data, out, &mut checked);
        self.absorb(&out[checked..]);
        self.total_out += (out.len() - start) as u64;
        result.map_err(|e| self.fail(e))
    }

    fn fail(&mut self, e: Error) -> Error {
        if let Error::Data(msg) = &e {
            log::debug!("inflate failed: {msg}");
            self.failed = Some(msg.clone());
        }
        e
    }

    fn absorb(&mut self, produced: &[u8]) {
        match self.active {
            Wrapper::Zlib => self.adler.update(produced),
            Wrapper::Gzip => self.crc.update(produced),
            _ => {}
        }
    }

    /// Returns the header length once the buffered bytes contain all of it.
    fn read_header(&mut self) -> Result<Option<usize>> {
        let buf = &self.pending;
        let wrapper = match self.wrapper {
            Wrapper::Auto if buf.len() < 2 => return Ok(None),
            Wrapper::Auto => detect(buf[0], buf[1]),
            w => w,
        };
        let used = match wrapper {
            Wrapper::Zlib => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                check_zlib_header(buf[0], buf[1])?;
                2
            }
            Wrapper::Gzip => match GzipHeader::parse(buf)? {
                Some((header, used)) => {
                    self.gzip_header = Some(header);
                    used
                }
                None => return Ok(None),
            },
            Wrapper::Raw | Wrapper::Auto => 0,
        };
        log::trace!("inflate: {wrapper:?} header, {used} bytes");
        self.active = wrapper;
        self.mode = Mode::Block;
        Ok(Some(used))
    }

    fn run(&mut self, data: &[u8], out: &mut Vec<u8>, checked: &mut usize) -> Result<Status> {
        let mut pos = 0;
        loop {
            match self.mode {
                Mode::Header => return Err(Error::InvalidState("inflater header not read")),
                Mode::Block => {
                    if self.last {
                        self.mode = Mode::Check;
                        continue;
                    }
                    self.bits.refill(data, &mut pos);
                    if self.bits.count < 3 {
                        return Err(Error::NeedInput);
                    }
                    let hold = self.bits.hold;
                    self.bits.consume(3);
                    self.last = hold & 1 == 1;
                    self.mode = match (hold >> 1) & 3 {
                        0 => Mode::StoredLen,
                        1 => {
                            self.tables = Tables::Fixed;
                            Mode::Len
                        }
                        2 => Mode::Table,
                        _ => return Err(Error::data("invalid block type")),
                    };
                }
                Mode::StoredLen => {
                    self.bits.align();
                    self.bits.refill(data, &mut pos);
                    if self.bits.count < 32 {
                        return Err(Error::NeedInput);
                    }
                    let len = low_bits(self.bits.hold, 16);
                    let nlen = low_bits(self.bits.hold >> 16, 16);
                    if len != !nlen & 0xFFFF {
                        return Err(Error::data("invalid stored block lengths"));
                    }
                    self.bits.consume(32);
                    self.stored_left = len;
                    self.mode = Mode::Copy;
                }
                Mode::Copy => {
                    // whole bytes already pulled into the accumulator come first
                    while self.stored_left > 0 && self.bits.count >= 8 {
                        self.window.push(self.bits.hold as u8, out);
                        self.bits.consume(8);
                        self.stored_left -= 1;
                    }
                    let n = self.stored_left.min(data.len() - pos);
                    self.window.extend(&data[pos..pos + n], out);
                    pos += n;
                    self.stored_left -= n;
                    if self.stored_left > 0 {
                        return Err(Error::NeedInput);
                    }
                    self.mode = Mode::Block;
                }
                Mode::Table => {
                    self.bits.refill(data, &mut pos);
                    if self.bits.count < 14 {
                        return Err(Error::NeedInput);
                    }
                    let hold = self.bits.hold;
                    self.nlen = low_bits(hold, 5) + 257;
                    self.ndist = low_bits(hold >> 5, 5) + 1;
                    self.ncode = low_bits(hold >> 10, 4) + 4;
                    self.bits.consume(14);
                    if self.nlen > 286 || self.ndist > 30 {
                        return Err(Error::data("too many length or distance symbols"));
                    }
                    self.have = 0;
                    self.code_lens = [0; 19];
                    self.mode = Mode::LenLens;
                }
                Mode::LenLens => {
                    while self.have < self.ncode {
                        self.bits.refill(data, &mut pos);
                        if self.bits.count < 3 {
                            return Err(Error::NeedInput);
                        }
                        self.code_lens[BL_ORDER[self.have]] = low_bits(self.bits.hold, 3) as u8;
                        self.bits.consume(3);
                        self.have += 1;
                    }
                    let table = DecodeTable::build(&self.code_lens, TableKind::Codes)
                        .map_err(|_| Error::data("invalid code lengths set"))?;
                    self.code_table = Some(table);
                    self.have = 0;
                    self.lens = [0; 320];
                    self.mode = Mode::CodeLens;
                }
                Mode::CodeLens => {
                    self.read_code_lengths(data, &mut pos)?;
                    let (nlen, ndist) = (self.nlen, self.ndist);
                    if self.lens[256] == 0 {
                        return Err(Error::data("invalid code -- missing end-of-block"));
                    }
                    let lit = DecodeTable::build(&self.lens[..nlen], TableKind::Lens)
                        .map_err(|_| Error::data("invalid literal/lengths set"))?;
                    let dist = DecodeTable::build(&self.lens[nlen..nlen + ndist], TableKind::Dists)
                        .map_err(|_| Error::data("invalid distances set"))?;
                    self.tables = Tables::Dynamic(lit, dist);
                    self.code_table = None;
                    self.mode = Mode::Len;
                }
                Mode::Len => {
                    self.decode_symbols(data, &mut pos, out)?;
                }
                Mode::Check => {
                    self.absorb(&out[*checked..]);
                    *checked = out.len();
                    self.bits.align();
                    self.bits.refill(data, &mut pos);
                    self.check_trailer()?;
                    self.mode = Mode::Done;
                    log::trace!("inflate finished: {} bytes out", self.total_out);
                }
                Mode::Done => return Ok(Status::StreamEnd),
            }
        }
    }

    fn read_code_lengths(&mut self, data: &[u8], pos: &mut usize) -> Result<()> {
        let Some(table) = self.code_table.as_ref() else {
            return Err(Error::InvalidState("code length table missing"));
        };
        let total = self.nlen + self.ndist;
        while self.have < total {
            self.bits.refill(data, pos);
            let (sym, len) = match table.decode(self.bits.hold, self.bits.count) {
                Decoded::Symbol { sym, len } => (sym, len),
                Decoded::NeedBits => return Err(Error::NeedInput),
                Decoded::Invalid => return Err(Error::data("invalid code lengths set")),
            };
            if sym < 16 {
                self.bits.consume(len);
                self.lens[self.have] = sym as u8;
                self.have += 1;
                continue;
            }

            let (extra, base) = match sym {
                16 => (2, 3),
                17 => (3, 3),
                _ => (7, 11),
            };
            if self.bits.count < len + extra {
                return Err(Error::NeedInput);
            }
            let repeat = base + low_bits(self.bits.hold >> len, extra);
            let value = if sym == 16 {
                if self.have == 0 {
                    return Err(Error::data("invalid bit length repeat"));
                }
                self.lens[self.have - 1]
            } else {
                0
            };
            if self.have + repeat > total {
                return Err(Error::data("invalid bit length repeat"));
            }
            self.bits.consume(len + extra);
            self.lens[self.have..self.have + repeat].fill(value);
            self.have += repeat;
        }
        Ok(())
    }

    /// Decodes literals and matches until the end-of-block code.
    fn decode_symbols(&mut self, data: &[u8], pos: &mut usize, out: &mut Vec<u8>) -> Result<()> {
        let (lit, dist) = match &self.tables {
            Tables::Fixed => {
                let (lit, dist) = fixed_decode_tables();
                (lit, dist)
            }
            Tables::Dynamic(lit, dist) => (lit, dist),
        };

        loop {
            self.bits.refill(data, pos);
            let hold = self.bits.hold;
            let avail = self.bits.count;

            let (sym, len) = match lit.decode(hold, avail) {
                Decoded::Symbol { sym, len } => (sym as usize, len),
                Decoded::NeedBits => return Err(Error::NeedInput),
                Decoded::Invalid => return Err(Error::data("invalid literal/length code")),
            };
            if sym < 256 {
                self.bits.consume(len);
                self.window.push(sym as u8, out);
                continue;
            }
            if sym == 256 {
                self.bits.consume(len);
                self.mode = Mode::Block;
                return Ok(());
            }

            let code = sym - 257;
            if code >= LENGTH_BASE.len() {
                return Err(Error::data("invalid literal/length code"));
            }
            let extra = LENGTH_EXTRA[code] as u32;
            if avail < len + extra {
                return Err(Error::NeedInput);
            }
            let length = LENGTH_BASE[code] as usize + low_bits(hold >> len, extra);
            let used = len + extra;

            let dhold = hold >> used;
            let davail = avail - used;
            let (dsym, dlen) = match dist.decode(dhold, davail) {
                Decoded::Symbol { sym, len } => (sym as usize, len),
                Decoded::NeedBits => return Err(Error::NeedInput),
                Decoded::Invalid => return Err(Error::data("invalid distance code")),
            };
            if dsym >= DIST_BASE.len() {
                return Err(Error::data("invalid distance code"));
            }
            let dextra = DIST_EXTRA[dsym] as u32;
            if davail < dlen + dextra {
                return Err(Error::NeedInput);
            }
            let distance = DIST_BASE[dsym] as usize + low_bits(dhold >> dlen, dextra);
            if distance > self.window.have {
                return Err(Error::data("invalid distance too far back"));
            }
            self.bits.consume(used + dlen + dextra);
            self.window.copy_match(distance, length, out);
        }
    }

    fn check_trailer(&mut self) -> Result<()> {
        match self.active {
            Wrapper::Zlib => {
                if self.bits.count < 32 {
                    return Err(Error::NeedInput);
                }
                let stored = u32::from_be_bytes((self.bits.hold as u32).to_le_bytes());
                self.bits.consume(32);
                if stored != self.adler.finalize() {
                    return Err(Error::data("incorrect data check"));
                }
            }
            Wrapper::Gzip => {
                if self.bits.count < 64 {
                    return Err(Error::NeedInput);
                }
                let crc = self.bits.hold as u32;
                let isize = (self.bits.hold >> 32) as u32;
                self.bits.consume(64);
                if crc != self.crc.finalize() {
                    return Err(Error::data("incorrect data check"));
                }
                if isize != self.crc.amount() as u32 {
                    return Err(Error::data("incorrect length check"));
                }
            }
            Wrapper::Raw | Wrapper::Auto => {}
        }
        Ok(())
    }
}
