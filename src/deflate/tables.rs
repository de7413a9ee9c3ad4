//! Fixed alphabets and per-level tuning shared by the compressor and the
//! decompressor (RFC 1951 §3.2.5).

pub(crate) const MIN_MATCH: usize = 3;
pub(crate) const MAX_MATCH: usize = 258;
pub(crate) const MAX_BITS: usize = 15;
pub(crate) const MAX_BL_BITS: usize = 7;

pub(crate) const LITERALS: usize = 256;
pub(crate) const END_BLOCK: usize = 256;
pub(crate) const LENGTH_CODES: usize = 29;
/// Literal/length alphabet actually used: literals, end of block, lengths.
pub(crate) const L_CODES: usize = LITERALS + 1 + LENGTH_CODES;
pub(crate) const D_CODES: usize = 30;
pub(crate) const BL_CODES: usize = 19;

pub(crate) const REP_3_6: usize = 16;
pub(crate) const REPZ_3_10: usize = 17;
pub(crate) const REPZ_11_138: usize = 18;

pub(crate) const STORED_BLOCK: u32 = 0;
pub(crate) const STATIC_TREES: u32 = 1;
pub(crate) const DYN_TREES: u32 = 2;

pub(crate) const LENGTH_BASE: [u16; LENGTH_CODES] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
pub(crate) const LENGTH_EXTRA: [u8; LENGTH_CODES] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

pub(crate) const DIST_BASE: [u16; D_CODES] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
pub(crate) const DIST_EXTRA: [u8; D_CODES] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

pub(crate) const BL_EXTRA: [u8; BL_CODES] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 3, 7];

/// Order in which code-length code lengths are transmitted.
pub(crate) const BL_ORDER: [usize; BL_CODES] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Length code (0..29) for a match length minus `MIN_MATCH`.
#[inline]
pub(crate) fn length_code(lc: usize) -> usize {
    debug_assert!(lc <= MAX_MATCH - MIN_MATCH);
    if lc < 8 {
        lc
    } else if lc == MAX_MATCH - MIN_MATCH {
        LENGTH_CODES - 1
    } else {
        let log2 = (usize::BITS - 1 - lc.leading_zeros()) as usize;
        (log2 - 1) * 4 + ((lc >> (log2 - 2)) & 3)
    }
}

/// Distance code (0..30) for a match distance minus one.
#[inline]
pub(crate) fn dist_code(dist: usize) -> usize {
    debug_assert!(dist < 32768);
    if dist < 4 {
        dist
    } else {
        let log2 = (usize::BITS - 1 - dist.leading_zeros()) as usize;
        log2 * 2 + ((dist >> (log2 - 1)) & 1)
    }
}

/// Which block routine a compression level runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockFn {
    Stored,
    Fast,
    Slow,
}

/// Match-search tuning for one compression level.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LevelConfig {
    /// Reduce the chain search once a match this long has been found.
    pub good_length: u16,
    /// Lazy mode: do not look further than this. Fast mode: insert every
    /// position of matches up to this length into the hash chains.
    pub max_lazy: u16,
    /// Stop searching once a match this long has been found.
    pub nice_length: u16,
    pub max_chain: u16,
    pub func: BlockFn,
}

const fn cfg(good: u16, lazy: u16, nice: u16, chain: u16, func: BlockFn) -> LevelConfig {
    LevelConfig {
        good_length: good,
        max_lazy: lazy,
        nice_length: nice,
        max_chain: chain,
        func,
    }
}

pub(crate) const LEVEL_CONFIG: [LevelConfig; 10] = [
    cfg(0, 0, 0, 0, BlockFn::Stored),
    cfg(4, 4, 8, 4, BlockFn::Fast),
    cfg(4, 5, 16, 8, BlockFn::Fast),
    cfg(4, 6, 32, 32, BlockFn::Fast),
    cfg(4, 4, 16, 16, BlockFn::Slow),
    cfg(8, 16, 32, 32, BlockFn::Slow),
    cfg(8, 16, 128, 128, BlockFn::Slow),
    cfg(8, 32, 128, 256, BlockFn::Slow),
    cfg(32, 128, 258, 1024, BlockFn::Slow),
    cfg(32, 258, 258, 4096, BlockFn::Slow),
];
