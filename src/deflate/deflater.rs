//! LZ77 + Huffman compressor.
//!
//! The compressor owns a window of twice the LZ77 distance limit. New input is
//! appended behind `strstart`; when `strstart` nears the end, the upper half
//! slides down and every hash-chain entry is rebased. Candidate matches are
//! found through hash chains keyed on the next three bytes.
//!
//! Parsed symbols accumulate until the symbol buffer fills or a flush is
//! requested, then the block is emitted with whichever of stored, fixed or
//! dynamic coding is cheapest.

use crate::checksum::{Adler32, Crc32};
use crate::error::{Error, Result};

use super::huffman::{Code, assign_codes, build_lengths, static_trees};
use super::tables::{
    BL_CODES, BL_EXTRA, BL_ORDER, BlockFn, D_CODES, DIST_BASE, DIST_EXTRA, DYN_TREES, END_BLOCK,
    L_CODES, LENGTH_BASE, LENGTH_EXTRA, LEVEL_CONFIG, LITERALS, LevelConfig, MAX_BITS,
    MAX_BL_BITS, MAX_MATCH, MIN_MATCH, REP_3_6, REPZ_3_10, REPZ_11_138, STATIC_TREES,
    STORED_BLOCK, dist_code, length_code,
};
use super::wrapper::{self, GzipHeader};
use super::{CompressOptions, Flush, Status, Strategy, Wrapper};

const MIN_LOOKAHEAD: usize = MAX_MATCH + MIN_MATCH + 1;
/// Matches of length 3 are discarded if their distance exceeds this.
const TOO_FAR: usize = 4096;
const MAX_STORED: usize = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Busy,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    /// Input exhausted without a flush request.
    NeedMore,
    /// A flush point was reached; the stream continues.
    BlockDone,
    /// The final block has been emitted.
    FinishDone,
}

/// LSB-first bit accumulator.
#[derive(Debug, Default)]
struct BitWriter {
    out: Vec<u8>,
    buf: u64,
    count: u32,
}

impl BitWriter {
    #[inline]
    fn send(&mut self, value: u32, len: u32) {
        debug_assert!(len <= 16);
        self.buf |= (value as u64) << self.count;
        self.count += len;
        while self.count >= 8 {
            self.out.push(self.buf as u8);
            self.buf >>= 8;
            self.count -= 8;
        }
    }

    #[inline]
    fn send_code(&mut self, code: Code) {
        self.send(code.code as u32, code.len as u32);
    }

    /// Pads to a byte boundary with zero bits.
    fn align(&mut self) {
        if self.count > 0 {
            self.out.push(self.buf as u8);
        }
        self.buf = 0;
        self.count = 0;
    }
}

/// Stream compressor. See the [module docs](super) for an overview.
pub struct Deflater {
    options: CompressOptions,
    config: LevelConfig,
    state: State,

    w_size: usize,
    w_mask: usize,
    window: Vec<u8>,
    head: Vec<u16>,
    prev: Vec<u16>,
    hash_mask: usize,
    hash_shift: u32,

    strstart: usize,
    /// Window position where the current block began; negative once the
    /// block's start has slid out of the window.
    block_start: isize,
    lookahead: usize,

    match_start: usize,
    match_length: usize,
    prev_length: usize,
    prev_match: usize,
    match_available: bool,

    /// `(distance, literal or length - MIN_MATCH)`; distance 0 marks a literal.
    syms: Vec<(u16, u16)>,
    sym_limit: usize,
    lfreq: [u32; L_CODES],
    dfreq: [u32; D_CODES],

    bits: BitWriter,
    crc: Crc32,
    adler: Adler32,
    total_in: u64,
    total_out: u64,
}

impl std::fmt::Debug for Deflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deflater")
            .field("options", &self.options)
            .field("state", &self.state)
            .field("total_in", &self.total_in)
            .field("total_out", &self.total_out)
            .finish_non_exhaustive()
    }
}

impl Deflater {
    /// Creates a compressor, rejecting invalid parameter combinations.
    pub fn new(options: CompressOptions) -> Result<Self> {
        options.validate()?;
        let w_size = 1usize << options.window_bits;
        let hash_bits = options.mem_level + 7;
        let hash_size = 1usize << hash_bits;
        let lit_bufsize = 1usize << (options.mem_level + 6);

        Ok(Self {
            config: LEVEL_CONFIG[options.level as usize],
            state: State::Init,
            w_size,
            w_mask: w_size - 1,
            window: vec![0; 2 * w_size],
            head: vec![0; hash_size],
            prev: vec![0; w_size],
            hash_mask: hash_size - 1,
            hash_shift: hash_bits.div_ceil(MIN_MATCH as u32),
            strstart: 0,
            block_start: 0,
            lookahead: 0,
            match_start: 0,
            match_length: MIN_MATCH - 1,
            prev_length: MIN_MATCH - 1,
            prev_match: 0,
            match_available: false,
            syms: Vec::with_capacity(lit_bufsize),
            sym_limit: lit_bufsize - 1,
            lfreq: [0; L_CODES],
            dfreq: [0; D_CODES],
            bits: BitWriter::default(),
            crc: Crc32::new(),
            adler: Adler32::new(),
            total_in: 0,
            total_out: 0,
            options,
        })
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    /// Uncompressed bytes consumed so far.
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Compressed bytes produced so far, wrapper included.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Done
    }

    /// Returns the compressor to its initial state, keeping the parameters
    /// and allocations.
    pub fn reset(&mut self) {
        self.state = State::Init;
        self.window.fill(0);
        self.head.fill(0);
        self.prev.fill(0);
        self.strstart = 0;
        self.block_start = 0;
        self.lookahead = 0;
        self.match_start = 0;
        self.match_length = MIN_MATCH - 1;
        self.prev_length = MIN_MATCH - 1;
        self.prev_match = 0;
        self.match_available = false;
        self.syms.clear();
        self.lfreq = [0; L_CODES];
        self.dfreq = [0; D_CODES];
        self.bits = BitWriter::default();
        self.crc.reset();
        self.adler = Adler32::new();
        self.total_in = 0;
        self.total_out = 0;
    }

    /// Consumes all of `input` and appends whatever output is ready to `out`.
    ///
    /// With [`Flush::None`] output may lag behind input; the other modes force
    /// everything out. After [`Flush::Finish`] the stream is closed and only
    /// empty calls are accepted.
    pub fn compress(&mut self, input: &[u8], flush: Flush, out: &mut Vec<u8>) -> Result<Status> {
        if self.state == State::Done {
            if !input.is_empty() {
                return Err(Error::InvalidState("compress called after the stream finished"));
            }
            return Ok(Status::StreamEnd);
        }

        if self.state == State::Init {
            self.write_header();
            self.state = State::Busy;
        }

        let mut input = input;
        let bstate = if self.options.level == 0 {
            self.deflate_stored(&mut input, flush)
        } else {
            match self.options.strategy {
                Strategy::HuffmanOnly => self.deflate_huff(&mut input, flush),
                Strategy::Rle => self.deflate_rle(&mut input, flush),
                _ => match self.config.func {
                    BlockFn::Stored => self.deflate_stored(&mut input, flush),
                    BlockFn::Fast => self.deflate_fast(&mut input, flush),
                    BlockFn::Slow => self.deflate_slow(&mut input, flush),
                },
            }
        };
        debug_assert!(input.is_empty());

        match bstate {
            BlockState::NeedMore => {}
            BlockState::BlockDone => {
                if matches!(flush, Flush::Sync | Flush::Full) {
                    // empty stored block: a byte-aligned resynchronisation point
                    self.bits.send(STORED_BLOCK << 1, 3);
                    self.bits.align();
                    self.bits.out.extend_from_slice(&[0x00, 0x00, 0xFF, 0xFF]);
                    if flush == Flush::Full {
                        self.head.fill(0);
                        if self.lookahead == 0 {
                            self.strstart = 0;
                            self.block_start = 0;
                        }
                    }
                }
            }
            BlockState::FinishDone => {
                self.write_trailer();
                self.state = State::Done;
                log::trace!(
                    "deflate finished: {} -> {} bytes",
                    self.total_in,
                    self.total_out + self.bits.out.len() as u64
                );
            }
        }

        self.total_out += self.bits.out.len() as u64;
        out.append(&mut self.bits.out);

        Ok(if self.state == State::Done {
            Status::StreamEnd
        } else {
            Status::Ok
        })
    }

    fn write_header(&mut self) {
        match self.options.wrapper {
            Wrapper::Zlib => {
                let header = wrapper::zlib_header(&self.options);
                self.bits.out.extend_from_slice(&header);
            }
            Wrapper::Gzip => {
                let header = self
                    .options
                    .gzip_header
                    .clone()
                    .unwrap_or_else(GzipHeader::default)
                    .encode(&self.options);
                self.bits.out.extend_from_slice(&header);
            }
            Wrapper::Raw | Wrapper::Auto => {}
        }
    }

    fn write_trailer(&mut self) {
        match self.options.wrapper {
            Wrapper::Zlib => {
                let adler = self.adler.finalize();
                self.bits.out.extend_from_slice(&adler.to_be_bytes());
            }
            Wrapper::Gzip => {
                let crc = self.crc.finalize();
                self.bits.out.extend_from_slice(&crc.to_le_bytes());
                self.bits
                    .out
                    .extend_from_slice(&(self.total_in as u32).to_le_bytes());
            }
            Wrapper::Raw | Wrapper::Auto => {}
        }
    }

    #[inline]
    fn max_dist(&self) -> usize {
        self.w_size - MIN_LOOKAHEAD
    }

    /// Moves input into the window, sliding it first when `strstart` is close
    /// to the end. Stops once `MIN_LOOKAHEAD` bytes are buffered or the input
    /// is exhausted.
    fn fill_window(&mut self, input: &mut &[u8]) {
        let w_size = self.w_size;
        loop {
            let mut more = self.window.len() - self.lookahead - self.strstart;

            if self.strstart >= w_size + self.max_dist() {
                self.window.copy_within(w_size..2 * w_size, 0);
                self.match_start = self.match_start.saturating_sub(w_size);
                self.strstart -= w_size;
                self.block_start -= w_size as isize;
                self.slide_hash();
                more += w_size;
            }

            if input.is_empty() {
                break;
            }

            let n = more.min(input.len());
            let dst = self.strstart + self.lookahead;
            self.window[dst..dst + n].copy_from_slice(&input[..n]);
            match self.options.wrapper {
                Wrapper::Zlib => self.adler.update(&input[..n]),
                Wrapper::Gzip => self.crc.update(&input[..n]),
                _ => {}
            }
            self.total_in += n as u64;
            *input = &input[n..];
            self.lookahead += n;

            if self.lookahead >= MIN_LOOKAHEAD || input.is_empty() {
                break;
            }
        }
    }

    fn slide_hash(&mut self) {
        let w = self.w_size as u16;
        for h in self.head.iter_mut().chain(self.prev.iter_mut()) {
            *h = h.saturating_sub(w);
        }
    }

    #[inline]
    fn hash(&self, pos: usize) -> usize {
        let w = &self.window;
        (((w[pos] as usize) << (2 * self.hash_shift))
            ^ ((w[pos + 1] as usize) << self.hash_shift)
            ^ w[pos + 2] as usize)
            & self.hash_mask
    }

    /// Links `pos` into its hash chain and returns the previous chain head.
    #[inline]
    fn insert_string(&mut self, pos: usize) -> usize {
        let h = self.hash(pos);
        let prev_head = self.head[h];
        self.prev[pos & self.w_mask] = prev_head;
        self.head[h] = pos as u16;
        prev_head as usize
    }

    /// Walks the hash chain from `cur_match` looking for a match longer than
    /// `best_len`. Sets `match_start` and returns the best length found.
    fn longest_match(&mut self, mut cur_match: usize, mut best_len: usize) -> usize {
        let mut chain = self.config.max_chain as usize;
        if best_len >= self.config.good_length as usize {
            chain >>= 2;
        }
        let scan = self.strstart;
        let max_len = MAX_MATCH.min(self.lookahead);
        let nice = (self.config.nice_length as usize).min(self.lookahead);
        let limit = self.strstart.saturating_sub(self.max_dist());
        if best_len >= max_len {
            return best_len.min(self.lookahead);
        }

        let w = &self.window;
        loop {
            let m = cur_match;
            if w[m + best_len] == w[scan + best_len] && w[m] == w[scan] && w[m + 1] == w[scan + 1]
            {
                let len = w[m..m + max_len]
                    .iter()
                    .zip(&w[scan..scan + max_len])
                    .take_while(|(a, b)| a == b)
                    .count();
                if len > best_len {
                    self.match_start = m;
                    best_len = len;
                    if len >= nice || len >= max_len {
                        break;
                    }
                }
            }
            cur_match = self.prev[cur_match & self.w_mask] as usize;
            chain -= 1;
            if cur_match <= limit || chain == 0 {
                break;
            }
        }
        best_len.min(self.lookahead)
    }

    #[inline]
    fn tally_lit(&mut self, c: u8) -> bool {
        self.syms.push((0, c as u16));
        self.lfreq[c as usize] += 1;
        self.syms.len() >= self.sym_limit
    }

    #[inline]
    fn tally_dist(&mut self, dist: usize, lc: usize) -> bool {
        self.syms.push((dist as u16, lc as u16));
        self.lfreq[LITERALS + 1 + length_code(lc)] += 1;
        self.dfreq[dist_code(dist - 1)] += 1;
        self.syms.len() >= self.sym_limit
    }

    fn deflate_stored(&mut self, input: &mut &[u8], flush: Flush) -> BlockState {
        loop {
            if self.lookahead <= 1 {
                self.fill_window(input);
                if self.lookahead == 0 {
                    if flush == Flush::None {
                        return BlockState::NeedMore;
                    }
                    break;
                }
            }

            self.strstart += self.lookahead;
            self.lookahead = 0;

            let max_start = self.block_start + MAX_STORED as isize;
            if self.strstart as isize >= max_start {
                self.lookahead = (self.strstart as isize - max_start) as usize;
                self.strstart = max_start as usize;
                self.flush_block(false);
            }
            if self.strstart as isize - self.block_start >= self.max_dist() as isize {
                self.flush_block(false);
            }
        }

        if flush == Flush::Finish {
            self.flush_block(true);
            return BlockState::FinishDone;
        }
        if self.strstart as isize > self.block_start {
            self.flush_block(false);
        }
        BlockState::BlockDone
    }

    /// Greedy parsing: take the longest match at each position.
    fn deflate_fast(&mut self, input: &mut &[u8], flush: Flush) -> BlockState {
        loop {
            if self.lookahead < MIN_LOOKAHEAD {
                self.fill_window(input);
                if self.lookahead < MIN_LOOKAHEAD && flush == Flush::None {
                    return BlockState::NeedMore;
                }
                if self.lookahead == 0 {
                    break;
                }
            }

            let mut hash_head = 0;
            if self.lookahead >= MIN_MATCH {
                hash_head = self.insert_string(self.strstart);
            }

            let mut match_length = 0;
            if hash_head != 0 && self.strstart - hash_head <= self.max_dist() {
                match_length = self.longest_match(hash_head, MIN_MATCH - 1);
            }

            let bflush;
            if match_length >= MIN_MATCH {
                bflush = self.tally_dist(self.strstart - self.match_start, match_length - MIN_MATCH);
                self.lookahead -= match_length;

                if match_length <= self.config.max_lazy as usize && self.lookahead >= MIN_MATCH {
                    // index every position covered by a short match
                    for _ in 1..match_length {
                        self.strstart += 1;
                        self.insert_string(self.strstart);
                    }
                    self.strstart += 1;
                } else {
                    self.strstart += match_length;
                }
            } else {
                bflush = self.tally_lit(self.window[self.strstart]);
                self.lookahead -= 1;
                self.strstart += 1;
            }
            if bflush {
                self.flush_block(false);
            }
        }

        if flush == Flush::Finish {
            self.flush_block(true);
            return BlockState::FinishDone;
        }
        if !self.syms.is_empty() {
            self.flush_block(false);
        }
        BlockState::BlockDone
    }

    /// Lazy parsing: a match is only emitted if the next position does not
    /// start a strictly longer one.
    fn deflate_slow(&mut self, input: &mut &[u8], flush: Flush) -> BlockState {
        loop {
            if self.lookahead < MIN_LOOKAHEAD {
                self.fill_window(input);
                if self.lookahead < MIN_LOOKAHEAD && flush == Flush::None {
                    return BlockState::NeedMore;
                }
                if self.lookahead == 0 {
                    break;
                }
            }

            let mut hash_head = 0;
            if self.lookahead >= MIN_MATCH {
                hash_head = self.insert_string(self.strstart);
            }

            self.prev_length = self.match_length;
            self.prev_match = self.match_start;
            self.match_length = MIN_MATCH - 1;

            if hash_head != 0
                && self.prev_length < self.config.max_lazy as usize
                && self.strstart - hash_head <= self.max_dist()
            {
                self.match_length = self.longest_match(hash_head, self.prev_length);
                if self.match_length <= 5
                    && (self.options.strategy == Strategy::Filtered
                        || (self.match_length == MIN_MATCH
                            && self.strstart - self.match_start > TOO_FAR))
                {
                    self.match_length = MIN_MATCH - 1;
                }
            }

            if self.prev_length >= MIN_MATCH && self.match_length <= self.prev_length {
                let max_insert = self.strstart + self.lookahead - MIN_MATCH;
                let bflush = self.tally_dist(
                    self.strstart - 1 - self.prev_match,
                    self.prev_length - MIN_MATCH,
                );
                self.lookahead -= self.prev_length - 1;
                for _ in 0..self.prev_length - 2 {
                    self.strstart += 1;
                    if self.strstart <= max_insert {
                        self.insert_string(self.strstart);
                    }
                }
                self.match_available = false;
                self.match_length = MIN_MATCH - 1;
                self.strstart += 1;
                if bflush {
                    self.flush_block(false);
                }
            } else if self.match_available {
                let bflush = self.tally_lit(self.window[self.strstart - 1]);
                if bflush {
                    self.flush_block(false);
                }
                self.strstart += 1;
                self.lookahead -= 1;
            } else {
                self.match_available = true;
                self.strstart += 1;
                self.lookahead -= 1;
            }
        }

        if self.match_available {
            self.tally_lit(self.window[self.strstart - 1]);
            self.match_available = false;
        }
        if flush == Flush::Finish {
            self.flush_block(true);
            return BlockState::FinishDone;
        }
        if !self.syms.is_empty() {
            self.flush_block(false);
        }
        BlockState::BlockDone
    }

    fn deflate_huff(&mut self, input: &mut &[u8], flush: Flush) -> BlockState {
        loop {
            if self.lookahead == 0 {
                self.fill_window(input);
                if self.lookahead == 0 {
                    if flush == Flush::None {
                        return BlockState::NeedMore;
                    }
                    break;
                }
            }
            let bflush = self.tally_lit(self.window[self.strstart]);
            self.lookahead -= 1;
            self.strstart += 1;
            if bflush {
                self.flush_block(false);
            }
        }

        if flush == Flush::Finish {
            self.flush_block(true);
            return BlockState::FinishDone;
        }
        if !self.syms.is_empty() {
            self.flush_block(false);
        }
        BlockState::BlockDone
    }

    /// Run-length matching only: distance one, as long as the previous byte
    /// keeps repeating.
    fn deflate_rle(&mut self, input: &mut &[u8], flush: Flush) -> BlockState {
        loop {
            if self.lookahead <= MAX_MATCH {
                self.fill_window(input);
                if self.lookahead <= MAX_MATCH && flush == Flush::None {
                    return BlockState::NeedMore;
                }
                if self.lookahead == 0 {
                    break;
                }
            }

            let mut match_length = 0;
            if self.lookahead >= MIN_MATCH && self.strstart > 0 {
                let w = &self.window;
                let prev = w[self.strstart - 1];
                let max = MAX_MATCH.min(self.lookahead);
                match_length = w[self.strstart..self.strstart + max]
                    .iter()
                    .take_while(|&&b| b == prev)
                    .count();
            }

            let bflush;
            if match_length >= MIN_MATCH {
                bflush = self.tally_dist(1, match_length - MIN_MATCH);
                self.lookahead -= match_length;
                self.strstart += match_length;
            } else {
                bflush = self.tally_lit(self.window[self.strstart]);
                self.lookahead -= 1;
                self.strstart += 1;
            }
            if bflush {
                self.flush_block(false);
            }
        }

        if flush == Flush::Finish {
            self.flush_block(true);
            return BlockState::FinishDone;
        }
        if !self.syms.is_empty() {
            self.flush_block(false);
        }
        BlockState::BlockDone
    }

    /// Emits the block covering `block_start..strstart` using the cheapest
    /// encoding, then starts a new block.
    fn flush_block(&mut self, last: bool) {
        let stored_len = (self.strstart as isize - self.block_start) as usize;
        let stored_available = self.block_start >= 0;
        self.lfreq[END_BLOCK] = 1;

        let plan = if self.options.level > 0 {
            Some(DynamicPlan::new(&self.lfreq, &self.dfreq))
        } else {
            None
        };

        let (opt_lenb, static_lenb) = match &plan {
            Some(plan) => {
                let static_lenb = (self.static_cost() + 3 + 7) >> 3;
                let dyn_lenb = (plan.cost + 3 + 7) >> 3;
                if static_lenb <= dyn_lenb || self.options.strategy == Strategy::Fixed {
                    (static_lenb, static_lenb)
                } else {
                    (dyn_lenb, static_lenb)
                }
            }
            None => (stored_len + 5, stored_len + 5),
        };

        let last_bit = last as u32;
        if stored_len + 4 <= opt_lenb && stored_available {
            log::trace!("stored block, {stored_len} bytes");
            self.stored_block(self.block_start as usize, stored_len, last);
        } else if static_lenb == opt_lenb || plan.is_none() {
            log::trace!("fixed block, {} symbols", self.syms.len());
            self.bits.send((STATIC_TREES << 1) | last_bit, 3);
            let trees = static_trees();
            self.compress_block(&trees.ltree, &trees.dtree);
        } else if let Some(plan) = plan {
            log::trace!("dynamic block, {} symbols", self.syms.len());
            self.bits.send((DYN_TREES << 1) | last_bit, 3);
            plan.send_trees(&mut self.bits);
            self.compress_block(&plan.lcodes, &plan.dcodes);
        }

        self.syms.clear();
        self.lfreq = [0; L_CODES];
        self.dfreq = [0; D_CODES];
        if last {
            self.bits.align();
        }
        self.block_start = self.strstart as isize;
    }

    fn stored_block(&mut self, start: usize, len: usize, last: bool) {
        let data = &self.window[start..start + len];
        let mut pieces = data.chunks(MAX_STORED).peekable();
        if pieces.peek().is_none() {
            self.bits.send((STORED_BLOCK << 1) | last as u32, 3);
            self.bits.align();
            self.bits.out.extend_from_slice(&[0x00, 0x00, 0xFF, 0xFF]);
            return;
        }
        while let Some(piece) = pieces.next() {
            let is_last = last && pieces.peek().is_none();
            self.bits.send((STORED_BLOCK << 1) | is_last as u32, 3);
            self.bits.align();
            let n = piece.len() as u16;
            self.bits.out.extend_from_slice(&n.to_le_bytes());
            self.bits.out.extend_from_slice(&(!n).to_le_bytes());
            self.bits.out.extend_from_slice(piece);
        }
    }

    fn static_cost(&self) -> usize {
        let trees = static_trees();
        let lit: usize = self
            .lfreq
            .iter()
            .zip(&trees.ltree)
            .map(|(&f, c)| f as usize * c.len as usize)
            .sum();
        let dist: usize = self.dfreq.iter().map(|&f| f as usize * 5).sum();
        lit + dist + extra_bits_cost(&self.lfreq, &self.dfreq)
    }

    fn compress_block(&mut self, ltree: &[Code], dtree: &[Code]) {
        let syms = std::mem::take(&mut self.syms);
        for &(dist, lc) in &syms {
            if dist == 0 {
                self.bits.send_code(ltree[lc as usize]);
                continue;
            }
            let lc = lc as usize;
            let code = length_code(lc);
            self.bits.send_code(ltree[LITERALS + 1 + code]);
            let extra = LENGTH_EXTRA[code] as u32;
            if extra > 0 {
                self.bits
                    .send((lc + MIN_MATCH - LENGTH_BASE[code] as usize) as u32, extra);
            }

            let dist = dist as usize;
            let code = dist_code(dist - 1);
            self.bits.send_code(dtree[code]);
            let extra = DIST_EXTRA[code] as u32;
            if extra > 0 {
                self.bits.send((dist - DIST_BASE[code] as usize) as u32, extra);
            }
        }
        self.bits.send_code(ltree[END_BLOCK]);
        self.syms = syms;
    }
}

fn extra_bits_cost(lfreq: &[u32], dfreq: &[u32]) -> usize {
    let lens: usize = LENGTH_EXTRA
        .iter()
        .enumerate()
        .map(|(code, &e)| lfreq[LITERALS + 1 + code] as usize * e as usize)
        .sum();
    let dists: usize = DIST_EXTRA
        .iter()
        .zip(dfreq)
        .map(|(&e, &f)| f as usize * e as usize)
        .sum();
    lens + dists
}

/// Dynamic trees for one block, with their transmitted form and total cost.
struct DynamicPlan {
    lcodes: Vec<Code>,
    dcodes: Vec<Code>,
    hlit: usize,
    hdist: usize,
    hclen: usize,
    bl_lens: Vec<u8>,
    bl_codes: Vec<Code>,
    /// Code-length symbols `(symbol, repeat value)` for both trees.
    rle: Vec<(u8, u8)>,
    cost: usize,
}

impl DynamicPlan {
    fn new(lfreq: &[u32], dfreq: &[u32]) -> Self {
        let llens = build_lengths(lfreq, MAX_BITS);
        let dlens = build_lengths(dfreq, MAX_BITS);
        let hlit = llens.iter().rposition(|&l| l != 0).map_or(0, |p| p + 1).max(257);
        let hdist = dlens.iter().rposition(|&l| l != 0).map_or(0, |p| p + 1).max(1);

        let mut rle = Vec::with_capacity(hlit + hdist);
        run_lengths(&llens[..hlit], &mut rle);
        run_lengths(&dlens[..hdist], &mut rle);

        let mut blfreq = [0u32; BL_CODES];
        for &(sym, _) in &rle {
            blfreq[sym as usize] += 1;
        }
        let bl_lens = build_lengths(&blfreq, MAX_BL_BITS);
        let hclen = BL_ORDER
            .iter()
            .rposition(|&s| bl_lens[s] != 0)
            .map_or(0, |p| p + 1)
            .max(4);

        let lcodes = assign_codes(&llens);
        let dcodes = assign_codes(&dlens);
        let bl_codes = assign_codes(&bl_lens);

        let tree_cost: usize = 5
            + 5
            + 4
            + 3 * hclen
            + rle
                .iter()
                .map(|&(sym, _)| bl_lens[sym as usize] as usize + BL_EXTRA[sym as usize] as usize)
                .sum::<usize>();
        let data_cost: usize = lfreq
            .iter()
            .zip(&llens)
            .map(|(&f, &l)| f as usize * l as usize)
            .sum::<usize>()
            + dfreq
                .iter()
                .zip(&dlens)
                .map(|(&f, &l)| f as usize * l as usize)
                .sum::<usize>()
            + extra_bits_cost(lfreq, dfreq);

        Self {
            lcodes,
            dcodes,
            hlit,
            hdist,
            hclen,
            bl_lens,
            bl_codes,
            rle,
            cost: tree_cost + data_cost,
        }
    }

    fn send_trees(&self, bits: &mut BitWriter) {
        bits.send((self.hlit - 257) as u32, 5);
        bits.send((self.hdist - 1) as u32, 5);
        bits.send((self.hclen - 4) as u32, 4);
        for &sym in &BL_ORDER[..self.hclen] {
            bits.send(self.bl_lens[sym] as u32, 3);
        }
        for &(sym, extra) in &self.rle {
            bits.send_code(self.bl_codes[sym as usize]);
            let n = BL_EXTRA[sym as usize] as u32;
            if n > 0 {
                bits.send(extra as u32, n);
            }
        }
    }
}

/// Encodes a run of code lengths with the repeat codes 16, 17 and 18.
fn run_lengths(lens: &[u8], out: &mut Vec<(u8, u8)>) {
    let mut i = 0;
    while i < lens.len() {
        let cur = lens[i];
        let run = lens[i..].iter().take_while(|&&l| l == cur).count();
        i += run;

        let mut rest = run;
        if cur == 0 {
            while rest >= 11 {
                let n = rest.min(138);
                out.push((REPZ_11_138 as u8, (n - 11) as u8));
                rest -= n;
            }
            if rest >= 3 {
                out.push((REPZ_3_10 as u8, (rest - 3) as u8));
                rest = 0;
            }
        } else {
            out.push((cur, 0));
            rest -= 1;
            while rest >= 3 {
                let n = rest.min(6);
                out.push((REP_3_6 as u8, (n - 3) as u8));
                rest -= n;
            }
        }
        out.extend(std::iter::repeat_n((cur, 0), rest));
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Inflater, decompress};
    use super::*;
    use std::io::Read;

    fn sample(len: usize) -> Vec<u8> {
        // text-like data with both short and long repeats
        let words = [
            "alpha ", "beta ", "gamma ", "delta ", "epsilon ", "zeta ", "eta ", "theta ",
        ];
        let mut out = Vec::with_capacity(len);
        let mut x = 12345u32;
        while out.len() < len {
            x = x.wrapping_mul(1103515245).wrapping_add(12345);
            out.extend_from_slice(words[(x >> 16) as usize % words.len()].as_bytes());
            if x % 7 == 0 {
                out.push((x >> 8) as u8);
            }
        }
        out.truncate(len);
        out
    }

    fn flate2_inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::DeflateDecoder::new(data)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn every_level_round_trips_and_interoperates() {
        let data = sample(200_000);
        for level in 0..=9 {
            let mut d = Deflater::new(CompressOptions::with_level(level)).unwrap();
            let mut packed = Vec::new();
            d.compress(&data, Flush::Finish, &mut packed).unwrap();
            assert_eq!(flate2_inflate(&packed), data, "level {level}");
            assert_eq!(decompress(&packed, Wrapper::Raw).unwrap(), data, "level {level}");
            if level > 0 {
                assert!(packed.len() < data.len() / 2, "level {level}: {}", packed.len());
            }
        }
    }

    #[test]
    fn strategies_round_trip() {
        let mut data = sample(50_000);
        data.extend(std::iter::repeat_n(b'x', 5000));
        for strategy in [
            Strategy::Filtered,
            Strategy::HuffmanOnly,
            Strategy::Rle,
            Strategy::Fixed,
        ] {
            let options = CompressOptions::default().strategy(strategy);
            let packed = super::super::compress_with(&data, options).unwrap();
            assert_eq!(flate2_inflate(&packed), data, "{strategy:?}");
        }
    }

    #[test]
    fn small_windows_round_trip() {
        let data = sample(70_000);
        for bits in [9, 10, 12] {
            let options = CompressOptions::with_level(9).window_bits(bits).mem_level(1);
            let packed = super::super::compress_with(&data, options).unwrap();
            assert_eq!(decompress(&packed, Wrapper::Raw).unwrap(), data, "bits {bits}");
        }
    }

    #[test]
    fn incompressible_data_falls_back_to_stored() {
        let mut x = 0x2545F491u32;
        let data: Vec<u8> = (0..100_000)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x as u8
            })
            .collect();
        let packed = super::super::compress(&data, 6, Wrapper::Raw).unwrap();
        // a few bytes of stored-block framing per block
        assert!(packed.len() <= data.len() + 64, "{}", packed.len());
        assert_eq!(flate2_inflate(&packed), data);
    }

    #[test]
    fn sync_flush_makes_prefix_decodable() {
        let data = sample(30_000);
        let mut d = Deflater::new(CompressOptions::default()).unwrap();
        let mut packed = Vec::new();
        d.compress(&data[..10_000], Flush::Sync, &mut packed).unwrap();
        assert_eq!(&packed[packed.len() - 4..], &[0x00, 0x00, 0xFF, 0xFF]);

        let mut inflater = Inflater::new(Wrapper::Raw);
        let mut out = Vec::new();
        let err = inflater.inflate(&packed, &mut out).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(out, &data[..10_000]);

        let mut rest = Vec::new();
        d.compress(&data[10_000..], Flush::Full, &mut rest).unwrap();
        d.compress(&[], Flush::Finish, &mut rest).unwrap();
        assert!(d.is_finished());
        inflater.inflate(&rest, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn piecewise_input_matches_one_shot_output() {
        let data = sample(100_000);
        let one_shot = super::super::compress(&data, 6, Wrapper::Zlib).unwrap();

        let mut d = Deflater::new(CompressOptions::default().wrapper(Wrapper::Zlib)).unwrap();
        let mut packed = Vec::new();
        for piece in data.chunks(777) {
            d.compress(piece, Flush::None, &mut packed).unwrap();
        }
        d.compress(&[], Flush::Finish, &mut packed).unwrap();
        assert_eq!(d.total_in(), data.len() as u64);
        assert_eq!(d.total_out(), packed.len() as u64);

        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(&packed[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
        assert_eq!(decompress(&one_shot, Wrapper::Zlib).unwrap(), data);
    }

    #[test]
    fn gzip_output_is_readable_by_flate2() {
        let data = sample(10_000);
        let options = CompressOptions::with_level(9).wrapper(Wrapper::Gzip);
        let mut options = options;
        options.gzip_header = Some(GzipHeader {
            name: Some(b"sample.txt".to_vec()),
            comment: Some(b"made in a test".to_vec()),
            extra: Some(vec![1, 2, 3, 4]),
            header_crc: true,
            mtime: 1_700_000_000,
            ..GzipHeader::default()
        });
        let packed = super::super::compress_with(&data, options).unwrap();

        let mut decoder = flate2::read::GzDecoder::new(&packed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        let header = decoder.header().unwrap();
        assert_eq!(header.filename(), Some(&b"sample.txt"[..]));
        assert_eq!(header.mtime(), 1_700_000_000);
    }

    #[test]
    fn input_after_finish_is_rejected() {
        let mut d = Deflater::new(CompressOptions::default()).unwrap();
        let mut out = Vec::new();
        assert_eq!(d.compress(b"abc", Flush::Finish, &mut out).unwrap(), Status::StreamEnd);
        assert!(matches!(
            d.compress(b"more", Flush::None, &mut out),
            Err(Error::InvalidState(_))
        ));
        d.reset();
        let mut again = Vec::new();
        d.compress(b"abc", Flush::Finish, &mut again).unwrap();
        assert_eq!(again, out);
    }

    #[test]
    fn run_lengths_use_repeat_codes() {
        let mut out = Vec::new();
        run_lengths(&[8, 8, 8, 8, 8, 8, 8, 8, 0, 0, 0, 0, 5], &mut out);
        assert_eq!(out, vec![(8, 0), (16, 3), (8, 0), (17, 1), (5, 0)]);

        let mut zeros = Vec::new();
        run_lengths(&[0; 150], &mut zeros);
        assert_eq!(zeros, vec![(18, 127), (18, 1)]);
    }
}
