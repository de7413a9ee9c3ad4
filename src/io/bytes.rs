use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};

/// Bounds-checked little-endian cursor over a byte slice.
///
/// Every read names what it was reading so a truncated record produces a
/// useful data error instead of a bare end-of-file.
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position())
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.len() {
            return Err(Error::data(format!(
                "seek to {} past end of {}-byte record",
                pos,
                self.len()
            )));
        }
        self.cursor.set_position(pos as u64);
        Ok(())
    }

    pub fn skip(&mut self, n: usize, what: &str) -> Result<()> {
        self.ensure(n, what)?;
        self.cursor.set_position((self.position() + n) as u64);
        Ok(())
    }

    fn ensure(&self, n: usize, what: &str) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::data(format!(
                "truncated {}: need {} bytes, {} left",
                what,
                n,
                self.remaining()
            )));
        }
        Ok(())
    }

    /// Returns `true` and advances if the next bytes equal `sig`.
    pub fn match_signature(&mut self, sig: &[u8]) -> bool {
        if self.peek(sig.len()) == Some(sig) {
            self.cursor.set_position((self.position() + sig.len()) as u64);
            true
        } else {
            false
        }
    }

    pub fn peek(&self, n: usize) -> Option<&'a [u8]> {
        let data: &'a [u8] = self.cursor.get_ref();
        data.get(self.position()..self.position().checked_add(n)?)
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        self.ensure(1, what)?;
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_u16(&mut self, what: &str) -> Result<u16> {
        self.ensure(2, what)?;
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        self.ensure(4, what)?;
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub fn read_u64(&mut self, what: &str) -> Result<u64> {
        self.ensure(8, what)?;
        Ok(self.cursor.read_u64::<LittleEndian>()?)
    }

    pub fn read_bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        self.ensure(n, what)?;
        let start = self.position();
        let data: &'a [u8] = self.cursor.get_ref();
        self.cursor.set_position((start + n) as u64);
        Ok(&data[start..start + n])
    }
}

/// Chainable little-endian emitter.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, v);
        self.buf.extend_from_slice(&b);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        self.buf.extend_from_slice(&b);
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        let mut b = [0u8; 8];
        LittleEndian::write_u64(&mut b, v);
        self.buf.extend_from_slice(&b);
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_round_values() {
        let mut w = ByteWriter::new();
        w.bytes(b"PK\x05\x06").u16(0x0102).u32(0xAABBCCDD).u64(7).u8(9);
        let bytes = w.into_inner();
        assert_eq!(&bytes[4..6], &[0x02, 0x01]);

        let mut r = ByteReader::new(&bytes);
        assert!(!r.match_signature(b"PK\x01\x02"));
        assert!(r.match_signature(b"PK\x05\x06"));
        assert_eq!(r.read_u16("a").unwrap(), 0x0102);
        assert_eq!(r.read_u32("b").unwrap(), 0xAABBCCDD);
        assert_eq!(r.read_u64("c").unwrap(), 7);
        assert_eq!(r.read_u8("d").unwrap(), 9);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_read_names_the_field() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        let err = r.read_u32("central directory size").unwrap_err();
        assert!(err.to_string().contains("central directory size"));
        // a failed read does not move the cursor
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_bytes(3, "rest").unwrap(), &[1, 2, 3]);
    }
}
