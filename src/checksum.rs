//! Checksum computation.
//!
//! # CRC-32
//!
//! The IEEE 802.3 CRC used by ZIP and gzip (reflected polynomial
//! `0xEDB88320`). The 256-entry lookup table is evaluated at compile time, so
//! it is immutable and shared by every thread without any initialisation race.
//! Results compose: feeding the CRC of a prefix back in as the seed continues
//! the computation over the suffix.
//!
//! ```rust
//! use zipstream::checksum::crc32;
//!
//! let whole = crc32(0, b"Hello, World!");
//! let split = crc32(crc32(0, b"Hello, "), b"World!");
//! assert_eq!(whole, split);
//! assert_eq!(whole, 0xEC4AC3D0);
//! ```
//!
//! # Adler-32
//!
//! The RFC 1950 checksum carried in the zlib trailer.

const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;

static CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 {
                CRC32_POLYNOMIAL ^ (c >> 1)
            } else {
                c >> 1
            };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// Computes the CRC-32 of `bytes`, continuing from `seed`.
///
/// Pass `0` to start a new checksum.
pub fn crc32(seed: u32, bytes: &[u8]) -> u32 {
    let mut crc = !seed;
    for &b in bytes {
        crc = CRC32_TABLE[((crc ^ b as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    !crc
}

/// Incremental CRC-32 calculator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc32 {
    value: u32,
    amount: u64,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.value = crc32(self.value, bytes);
        self.amount += bytes.len() as u64;
    }

    /// Current checksum value.
    pub fn finalize(&self) -> u32 {
        self.value
    }

    /// Number of bytes hashed so far.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

const ADLER_MOD: u32 = 65521;
// Largest n such that 255n(n+1)/2 + (n+1)(ADLER_MOD-1) fits in u32.
const ADLER_NMAX: usize = 5552;

/// Incremental Adler-32 calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self { a: 1, b: 0 }
    }
}

impl Adler32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for block in bytes.chunks(ADLER_NMAX) {
            for &byte in block {
                self.a += byte as u32;
                self.b += self.a;
            }
            self.a %= ADLER_MOD;
            self.b %= ADLER_MOD;
        }
    }

    pub fn finalize(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// One-shot Adler-32.
pub fn adler32(bytes: &[u8]) -> u32 {
    let mut hasher = Adler32::new();
    hasher.update(bytes);
    hasher.finalize()
}
