//! Canonical Huffman codes: construction from symbol frequencies for the
//! encoder, and prefix lookup tables for the decoder.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::OnceLock;

use super::tables::{D_CODES, MAX_BITS};

/// One encoder code, stored bit-reversed so it can be emitted LSB first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Code {
    pub code: u16,
    pub len: u8,
}

#[inline]
pub(crate) fn reverse_bits(mut code: u32, len: u32) -> u32 {
    let mut res = 0;
    for _ in 0..len {
        res = (res << 1) | (code & 1);
        code >>= 1;
    }
    res
}

/// Computes length-limited Huffman code lengths for `freqs`.
///
/// The result always describes a complete code: when fewer than two symbols
/// occur, the lowest unused symbols are given a one-bit code as well.
pub(crate) fn build_lengths(freqs: &[u32], max_bits: usize) -> Vec<u8> {
    let n = freqs.len();
    let mut lengths = vec![0u8; n];
    let mut used: Vec<usize> = (0..n).filter(|&s| freqs[s] != 0).collect();

    if used.len() < 2 {
        let mut filler = 0;
        while used.len() < 2 && filler < n {
            if !used.contains(&filler) {
                used.push(filler);
            }
            filler += 1;
        }
        for &s in &used {
            lengths[s] = 1;
        }
        return lengths;
    }

    // Plain Huffman over the used symbols. Ties prefer the shallower subtree.
    let leaves = used.len();
    let mut parent = vec![0usize; 2 * leaves - 1];
    let mut heap = BinaryHeap::with_capacity(leaves);
    for (node, &sym) in used.iter().enumerate() {
        heap.push(Reverse((freqs[sym] as u64, 0u32, node)));
    }
    let mut next = leaves;
    while heap.len() > 1 {
        let Some(Reverse((fa, da, a))) = heap.pop() else {
            break;
        };
        let Some(Reverse((fb, db, b))) = heap.pop() else {
            break;
        };
        parent[a] = next;
        parent[b] = next;
        heap.push(Reverse((fa + fb, da.max(db) + 1, next)));
        next += 1;
    }

    let root = next - 1;
    let mut depth = vec![0usize; next];
    for node in (0..root).rev() {
        depth[node] = depth[parent[node]] + 1;
    }

    // Clamp to max_bits, then repair the Kraft sum by splitting shorter codes.
    let mut bl_count = vec![0u32; max_bits + 1];
    for node in 0..leaves {
        bl_count[depth[node].min(max_bits)] += 1;
    }
    let target = 1u64 << max_bits;
    let mut total: u64 = (1..=max_bits)
        .map(|len| (bl_count[len] as u64) << (max_bits - len))
        .sum();
    while total > target {
        bl_count[max_bits] -= 1;
        for len in (1..max_bits).rev() {
            if bl_count[len] != 0 {
                bl_count[len] -= 1;
                bl_count[len + 1] += 2;
                break;
            }
        }
        total -= 1;
    }

    // Least frequent symbols take the longest codes.
    used.sort_by_key(|&s| (freqs[s], Reverse(s)));
    let mut it = used.iter();
    for len in (1..=max_bits).rev() {
        for _ in 0..bl_count[len] {
            if let Some(&s) = it.next() {
                lengths[s] = len as u8;
            }
        }
    }
    lengths
}

/// Assigns canonical codes to a set of code lengths.
pub(crate) fn assign_codes(lengths: &[u8]) -> Vec<Code> {
    let mut bl_count = [0u32; MAX_BITS + 1];
    for &len in lengths {
        bl_count[len as usize] += 1;
    }
    bl_count[0] = 0;

    let mut next_code = [0u32; MAX_BITS + 1];
    let mut code = 0u32;
    for bits in 1..=MAX_BITS {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }

    lengths
        .iter()
        .map(|&len| {
            if len == 0 {
                return Code::default();
            }
            let c = next_code[len as usize];
            next_code[len as usize] += 1;
            Code {
                code: reverse_bits(c, len as u32) as u16,
                len,
            }
        })
        .collect()
}

/// Code lengths of the fixed literal/length code (RFC 1951 §3.2.6).
pub(crate) fn fixed_litlen_lengths() -> [u8; 288] {
    let mut lengths = [0u8; 288];
    for (sym, len) in lengths.iter_mut().enumerate() {
        *len = match sym {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    lengths
}

/// Encoder trees for fixed-Huffman blocks.
pub(crate) struct StaticTrees {
    pub ltree: Vec<Code>,
    pub dtree: Vec<Code>,
}

pub(crate) fn static_trees() -> &'static StaticTrees {
    static TREES: OnceLock<StaticTrees> = OnceLock::new();
    TREES.get_or_init(|| StaticTrees {
        ltree: assign_codes(&fixed_litlen_lengths()),
        dtree: assign_codes(&[5u8; D_CODES]),
    })
}

/// Decoder tables for fixed-Huffman blocks: literal/length, distance.
pub(crate) fn fixed_decode_tables() -> &'static (DecodeTable, DecodeTable) {
    static TABLES: OnceLock<(DecodeTable, DecodeTable)> = OnceLock::new();
    TABLES.get_or_init(|| {
        // Both fixed codes are complete, so the builder cannot fail here.
        let lit = DecodeTable::build(&fixed_litlen_lengths(), TableKind::Lens)
            .unwrap_or_else(|_| DecodeTable::empty());
        // 32 distance codes keep the set complete; 30 and 31 decode as invalid.
        let dist = DecodeTable::build(&[5u8; 32], TableKind::Dists)
            .unwrap_or_else(|_| DecodeTable::empty());
        (lit, dist)
    })
}

/// What a decode table describes; governs root size and which incomplete
/// code sets are tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableKind {
    Codes,
    Lens,
    Dists,
}

impl TableKind {
    fn root_bits(self) -> u32 {
        match self {
            TableKind::Codes => 7,
            TableKind::Lens => 9,
            TableKind::Dists => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Invalid,
    /// `len` counts bits consumed within this (root or sub) table.
    Symbol { sym: u16, len: u8 },
    Link { offset: u32, bits: u8 },
}

/// Result of looking up the next code in the bit accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decoded {
    Symbol { sym: u16, len: u32 },
    NeedBits,
    Invalid,
}

/// Two-level prefix lookup: a root table indexed by the next `root_bits`
/// input bits, with links to subtables for longer codes.
#[derive(Debug, Clone)]
pub(crate) struct DecodeTable {
    root_bits: u32,
    entries: Vec<Entry>,
}

impl DecodeTable {
    fn empty() -> Self {
        Self {
            root_bits: 1,
            entries: vec![Entry::Invalid; 2],
        }
    }

    pub(crate) fn build(lengths: &[u8], kind: TableKind) -> Result<Self, &'static str> {
        let mut count = [0u32; MAX_BITS + 1];
        for &len in lengths {
            if len as usize > MAX_BITS {
                return Err("code length too long");
            }
            count[len as usize] += 1;
        }
        let max = (1..=MAX_BITS).rev().find(|&l| count[l] != 0).unwrap_or(0);
        if max == 0 {
            if kind == TableKind::Codes {
                return Err("no codes");
            }
            return Ok(Self::empty());
        }

        let mut left: i64 = 1;
        for &c in &count[1..] {
            left <<= 1;
            left -= c as i64;
            if left < 0 {
                return Err("over-subscribed");
            }
        }
        if left > 0 && (kind == TableKind::Codes || max != 1) {
            return Err("incomplete");
        }

        let root = kind.root_bits().min(max as u32);
        let root_size = 1usize << root;
        let root_mask = (root_size - 1) as u32;
        let codes = assign_codes(lengths);

        let mut sub_bits = vec![0u8; root_size];
        for c in codes.iter().filter(|c| c.len as u32 > root) {
            let low = (c.code as u32 & root_mask) as usize;
            sub_bits[low] = sub_bits[low].max(c.len - root as u8);
        }

        let mut entries = vec![Entry::Invalid; root_size];
        for (low, &bits) in sub_bits.iter().enumerate() {
            if bits > 0 {
                entries[low] = Entry::Link {
                    offset: entries.len() as u32,
                    bits,
                };
                entries.extend(std::iter::repeat_n(Entry::Invalid, 1 << bits));
            }
        }

        for (sym, c) in codes.iter().enumerate() {
            if c.len == 0 {
                continue;
            }
            let code = c.code as usize;
            let len = c.len as u32;
            if len <= root {
                for idx in (code..root_size).step_by(1 << len) {
                    entries[idx] = Entry::Symbol {
                        sym: sym as u16,
                        len: c.len,
                    };
                }
            } else {
                let Entry::Link { offset, bits } = entries[code & root_mask as usize] else {
                    return Err("inconsistent code");
                };
                let sub_len = len - root;
                for idx in ((code >> root)..(1usize << bits)).step_by(1 << sub_len) {
                    entries[offset as usize + idx] = Entry::Symbol {
                        sym: sym as u16,
                        len: sub_len as u8,
                    };
                }
            }
        }

        Ok(Self {
            root_bits: root,
            entries,
        })
    }

    /// Looks up the code at the bottom of `hold`, of which `bits` are valid.
    /// Bits above `bits` must be zero.
    #[inline]
    pub(crate) fn decode(&self, hold: u64, bits: u32) -> Decoded {
        let root_mask = (1u64 << self.root_bits) - 1;
        match self.entries[(hold & root_mask) as usize] {
            Entry::Symbol { sym, len } => {
                if len as u32 <= bits {
                    Decoded::Symbol {
                        sym,
                        len: len as u32,
                    }
                } else {
                    Decoded::NeedBits
                }
            }
            Entry::Link { offset, bits: sub } => {
                let idx = ((hold >> self.root_bits) & ((1u64 << sub) - 1)) as usize;
                match self.entries[offset as usize + idx] {
                    Entry::Symbol { sym, len } => {
                        let total = self.root_bits + len as u32;
                        if total <= bits {
                            Decoded::Symbol { sym, len: total }
                        } else {
                            Decoded::NeedBits
                        }
                    }
                    _ if bits < self.root_bits + sub as u32 => Decoded::NeedBits,
                    _ => Decoded::Invalid,
                }
            }
            Entry::Invalid if bits < self.root_bits => Decoded::NeedBits,
            Entry::Invalid => Decoded::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kraft(lengths: &[u8]) -> f64 {
        lengths
            .iter()
            .filter(|&&l| l > 0)
            .map(|&l| 2f64.powi(-(l as i32)))
            .sum()
    }

    #[test]
    fn rfc1951_example_codes() {
        // RFC 1951 §3.2.2: lengths (3, 3, 3, 3, 3, 2, 4, 4) for A..H
        let codes = assign_codes(&[3, 3, 3, 3, 3, 2, 4, 4]);
        let plain: Vec<u32> = codes
            .iter()
            .map(|c| reverse_bits(c.code as u32, c.len as u32))
            .collect();
        assert_eq!(plain, vec![0b010, 0b011, 0b100, 0b101, 0b110, 0b00, 0b1110, 0b1111]);
    }

    #[test]
    fn lengths_are_limited_and_complete() {
        // Fibonacci frequencies produce a maximally deep unconstrained tree.
        let mut freqs = vec![0u32; 30];
        let (mut a, mut b) = (1u32, 1u32);
        for f in freqs.iter_mut() {
            *f = a;
            let c = a.saturating_add(b);
            a = b;
            b = c;
        }
        let lengths = build_lengths(&freqs, 15);
        assert!(lengths.iter().all(|&l| (1..=15).contains(&l)));
        assert!((kraft(&lengths) - 1.0).abs() < 1e-12);

        let short = build_lengths(&freqs[..19], 7);
        assert!(short.iter().all(|&l| l <= 7));
        assert!((kraft(&short) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_alphabets_get_two_codes() {
        assert_eq!(build_lengths(&[0, 0, 0, 0], 15), vec![1, 1, 0, 0]);
        assert_eq!(build_lengths(&[0, 0, 9, 0], 15), vec![1, 0, 1, 0]);
    }

    #[test]
    fn table_decodes_every_symbol() {
        let freqs: Vec<u32> = (0..286u32).map(|i| (i * 37) % 101 + 1).collect();
        let lengths = build_lengths(&freqs, 15);
        let codes = assign_codes(&lengths);
        let table = DecodeTable::build(&lengths, TableKind::Lens).unwrap();
        for (sym, c) in codes.iter().enumerate() {
            // followed by garbage bits that must be ignored
            let hold = c.code as u64 | (0x5A5A << c.len);
            assert_eq!(
                table.decode(hold, c.len as u32 + 16),
                Decoded::Symbol {
                    sym: sym as u16,
                    len: c.len as u32
                }
            );
            if c.len > 1 {
                let partial = c.code as u64 & ((1 << (c.len - 1)) - 1);
                assert_eq!(table.decode(partial, c.len as u32 - 1), Decoded::NeedBits);
            }
        }
    }

    #[test]
    fn rejects_bad_code_sets() {
        assert_eq!(
            DecodeTable::build(&[1, 1, 1], TableKind::Lens).unwrap_err(),
            "over-subscribed"
        );
        assert_eq!(
            DecodeTable::build(&[2, 2, 2], TableKind::Lens).unwrap_err(),
            "incomplete"
        );
        assert_eq!(
            DecodeTable::build(&[1, 0, 0], TableKind::Codes).unwrap_err(),
            "incomplete"
        );
        // a single one-bit distance code is tolerated
        let single = DecodeTable::build(&[0, 1], TableKind::Dists).unwrap();
        assert_eq!(single.decode(0, 1), Decoded::Symbol { sym: 1, len: 1 });
        assert_eq!(single.decode(1, 1), Decoded::Invalid);
    }

    #[test]
    fn fixed_tables_match_static_trees() {
        let (lit, dist) = fixed_decode_tables();
        let trees = static_trees();
        for sym in [0usize, 143, 144, 255, 256, 279, 280, 285] {
            let c = trees.ltree[sym];
            assert_eq!(
                lit.decode(c.code as u64, 15),
                Decoded::Symbol {
                    sym: sym as u16,
                    len: c.len as u32
                }
            );
        }
        let c = trees.dtree[29];
        assert_eq!(dist.decode(c.code as u64, 5), Decoded::Symbol { sym: 29, len: 5 });
    }
}
