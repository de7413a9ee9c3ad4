//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) near the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Reconcile where the central directory should be with where the
//!    EOCD actually is (data prepended to the archive shifts everything)
//! 4. Read the Central Directory to get metadata for all files
//! 5. For extraction, read each file's Local File Header and data
//!
//! This approach is efficient for HTTP Range requests, as we only
//! need to fetch the file's tail to list contents.

use std::sync::Arc;

use crate::checksum::crc32;
use crate::error::{Error, Result};
use crate::io::{ByteReader, ReadAt};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Everything read from the archive's central directory.
#[derive(Debug, Clone, Default)]
pub struct CentralDirectory {
    pub entries: Vec<ZipFileEntry>,
    pub comment: String,
    /// Bytes found in front of the archive proper (self-extractor stubs and
    /// the like). All stored offsets have been shifted by this amount.
    pub prepended_bytes: u64,
    pub zip64: bool,
}

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing ZIP structures from
/// a data source. It's generic over the reader type to support
/// in-memory, local and HTTP sources.
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor)
/// rather than directly.
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file unless a comment (or
    /// trailing junk) follows it, so the tail is searched backwards for the
    /// signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// Returns a data error if no EOCD can be found. The message tells a
    /// damaged archive (a local header at offset 0) apart from a file that is
    /// not a ZIP archive at all.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        // Common case first: no comment, EOCD is the last 22 bytes.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.reader.read_exact_at(offset, &mut buf).await?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        // The last signature whose declared comment fits in the file wins.
        let last = buf.len().saturating_sub(EndOfCentralDirectory::SIZE);
        for i in (0..=last).rev() {
            if buf.len() < i + EndOfCentralDirectory::SIZE {
                continue;
            }
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
                if i + EndOfCentralDirectory::SIZE + comment_len <= buf.len() {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    log::debug!("end of central directory at offset {}", search_start + i as u64);
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        let mut head = [0u8; 4];
        if self.size >= 4 {
            self.reader.read_exact_at(0, &mut head).await?;
        }
        if head == LFH_SIGNATURE {
            Err(Error::data(
                "corrupted zip: can't find end of central directory",
            ))
        } else {
            Err(Error::data(
                "can't find end of central directory: is this a zip file?",
            ))
        }
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    ///
    /// # Arguments
    ///
    /// * `eocd_offset` - Offset of the regular EOCD in the file
    ///
    /// # Returns
    ///
    /// The parsed ZIP64 EOCD and the offset it was found at.
    ///
    /// # Errors
    ///
    /// Returns an error if the ZIP64 structures are missing or invalid.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<(Zip64EOCD, u64)> {
        if eocd_offset < Zip64EOCDLocator::SIZE as u64 {
            return Err(Error::data("corrupted zip: ZIP64 locator not found"));
        }
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset - Zip64EOCDLocator::SIZE as u64;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)
            .map_err(|_| Error::data("corrupted zip: ZIP64 locator not found"))?;

        // The locator's offset is wrong when data was prepended; the record
        // then usually sits right in front of the locator.
        let mut candidates = vec![locator.eocd64_offset];
        if let Some(adjacent) = locator_offset.checked_sub(Zip64EOCD::MIN_SIZE as u64) {
            if adjacent != locator.eocd64_offset {
                candidates.push(adjacent);
            }
        }

        for offset in candidates {
            if offset + Zip64EOCD::MIN_SIZE as u64 > self.size {
                continue;
            }
            let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
            self.reader.read_exact_at(offset, &mut eocd64_buf).await?;
            if let Ok(eocd64) = Zip64EOCD::from_bytes(&eocd64_buf) {
                log::debug!("ZIP64 end of central directory at offset {offset}");
                return Ok((eocd64, offset));
            }
        }
        Err(Error::data(
            "corrupted zip: can't find the ZIP64 end of central directory",
        ))
    }

    /// Read the whole Central Directory.
    ///
    /// # Errors
    ///
    /// Returns a data error when the directory lies (partly) outside the
    /// file, or when none of the records it announces can be found. A
    /// partial shortfall is only logged.
    pub async fn read_central_directory(&self) -> Result<CentralDirectory> {
        let (eocd, eocd_offset) = self.find_eocd().await?;
        let comment = self.read_comment(&eocd, eocd_offset).await?;

        let zip64 = eocd.is_zip64();
        let (cd_offset, cd_size, total_entries, actual_end) = if zip64 {
            let (eocd64, eocd64_offset) = self.read_zip64_eocd(eocd_offset).await?;
            (
                eocd64.cd_offset,
                eocd64.cd_size,
                eocd64.total_entries,
                eocd64_offset,
            )
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                eocd_offset,
            )
        };

        let expected_end = cd_offset
            .checked_add(cd_size)
            .ok_or_else(|| Error::data("corrupted zip: central directory size overflows"))?;
        if actual_end < expected_end {
            return Err(Error::data(format!(
                "corrupted zip: missing {} bytes",
                expected_end - actual_end
            )));
        }
        let prepended_bytes = actual_end - expected_end;
        if prepended_bytes > 0 {
            log::warn!("{prepended_bytes} extra bytes at beginning or within zipfile");
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader
            .read_exact_at(cd_offset + prepended_bytes, &mut cd_data)
            .await?;

        let mut entries = Vec::with_capacity(total_entries.min(1 << 16) as usize);
        let mut r = ByteReader::new(&cd_data);
        while r.match_signature(CDFH_SIGNATURE) {
            let mut entry = parse_cdfh(&mut r)?;
            entry.lfh_offset += prepended_bytes;
            entries.push(entry);
        }

        if entries.len() as u64 != total_entries {
            if entries.is_empty() {
                return Err(Error::data(format!(
                    "corrupted zip: expected {total_entries} records in central directory, found none"
                )));
            }
            log::warn!(
                "expected {} records in central directory, found {}",
                total_entries,
                entries.len()
            );
        }

        Ok(CentralDirectory {
            entries,
            comment,
            prepended_bytes,
            zip64,
        })
    }

    /// List all files in the ZIP archive.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        Ok(self.read_central_directory().await?.entries)
    }

    async fn read_comment(&self, eocd: &EndOfCentralDirectory, eocd_offset: u64) -> Result<String> {
        let start = eocd_offset + EndOfCentralDirectory::SIZE as u64;
        let len = (eocd.comment_len as u64).min(self.size.saturating_sub(start));
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact_at(start, &mut buf).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins. Everything else in the LFH is ignored: the central
    /// directory is authoritative.
    ///
    /// # Errors
    ///
    /// Returns a data error if there is no local header at the recorded
    /// offset.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader
            .read_exact_at(entry.lfh_offset, &mut lfh_buf)
            .await?;

        let mut r = ByteReader::new(&lfh_buf);
        if !r.match_signature(LFH_SIGNATURE) {
            return Err(Error::data(format!(
                "corrupted zip: bad local file header signature for {} at offset {}",
                entry.file_name, entry.lfh_offset
            )));
        }
        r.set_position(26)?;
        let file_name_length = r.read_u16("local file name length")? as u64;
        let extra_field_length = r.read_u16("local extra field length")? as u64;

        Ok(entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// Parse one Central Directory File Header; the signature has already been
/// consumed.
pub(crate) fn parse_cdfh(r: &mut ByteReader<'_>) -> Result<ZipFileEntry> {
    let version_made_by = r.read_u16("version made by")?;
    let _version_needed = r.read_u16("version needed")?;
    let flags = r.read_u16("general purpose flags")?;
    let compression_method = r.read_u16("compression method")?;
    let last_mod_time = r.read_u16("modification time")?;
    let last_mod_date = r.read_u16("modification date")?;
    let crc32_value = r.read_u32("crc32")?;
    let compressed_size = r.read_u32("compressed size")?;
    let uncompressed_size = r.read_u32("uncompressed size")?;
    let file_name_length = r.read_u16("file name length")? as usize;
    let extra_field_length = r.read_u16("extra field length")? as usize;
    let file_comment_length = r.read_u16("file comment length")? as usize;
    let _disk_number_start = r.read_u16("disk number start")?;
    let _internal_attrs = r.read_u16("internal attributes")?;
    let external_attributes = r.read_u32("external attributes")?;
    let lfh_offset = r.read_u32("local header offset")?;

    let raw_name = r.read_bytes(file_name_length, "file name")?.to_vec();
    let extra = r.read_bytes(extra_field_length, "extra field")?;
    let raw_comment = r.read_bytes(file_comment_length, "file comment")?;

    let mut wide_uncompressed = None;
    let mut wide_compressed = None;
    let mut wide_offset = None;
    let mut unicode_name = None;
    let mut unicode_comment = None;

    let mut fields = ByteReader::new(extra);
    while fields.remaining() >= 4 {
        let header_id = fields.read_u16("extra field id")?;
        let field_size = fields.read_u16("extra field size")? as usize;
        let Ok(body) = fields.read_bytes(field_size, "extra field body") else {
            log::warn!("truncated extra field {header_id:#06x} ignored");
            break;
        };
        let mut body = ByteReader::new(body);
        match header_id {
            EXTRA_ZIP64 => {
                // Present only for the header fields that hold the sentinel,
                // always in this order.
                if uncompressed_size == ZIP64_SENTINEL_32 {
                    wide_uncompressed = body.read_u64("ZIP64 uncompressed size").ok();
                }
                if compressed_size == ZIP64_SENTINEL_32 {
                    wide_compressed = body.read_u64("ZIP64 compressed size").ok();
                }
                if lfh_offset == ZIP64_SENTINEL_32 {
                    wide_offset = body.read_u64("ZIP64 local header offset").ok();
                }
            }
            EXTRA_UNICODE_PATH => unicode_name = unicode_extra(&mut body, &raw_name, "path"),
            EXTRA_UNICODE_COMMENT => {
                unicode_comment = unicode_extra(&mut body, raw_comment, "comment")
            }
            _ => {}
        }
    }

    let widen = |value: u32, wide: Option<u64>, what: &str| -> Result<u64> {
        if value != ZIP64_SENTINEL_32 {
            return Ok(value as u64);
        }
        wide.ok_or_else(|| {
            Error::data(format!(
                "corrupted zip: {what} of {} needs a ZIP64 extra field",
                String::from_utf8_lossy(&raw_name)
            ))
        })
    };
    let uncompressed_size = widen(uncompressed_size, wide_uncompressed, "uncompressed size")?;
    let compressed_size = widen(compressed_size, wide_compressed, "compressed size")?;
    let lfh_offset = widen(lfh_offset, wide_offset, "local header offset")?;

    let utf8 = flags & FLAG_UTF8 != 0;
    let file_name = match unicode_name {
        Some(name) if !utf8 => name,
        _ => String::from_utf8_lossy(&raw_name).into_owned(),
    };
    let comment = match unicode_comment {
        Some(comment) if !utf8 => comment,
        _ => String::from_utf8_lossy(raw_comment).into_owned(),
    };

    let is_directory =
        file_name.ends_with('/') || external_attributes & DOS_DIRECTORY as u32 != 0;

    Ok(ZipFileEntry {
        file_name,
        raw_name,
        comment,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32: crc32_value,
        lfh_offset,
        modified: DosDateTime::from_raw(last_mod_date, last_mod_time),
        flags,
        version_made_by,
        external_attributes,
        is_directory,
    })
}

/// Decodes a Unicode path/comment extra field, provided it still matches
/// the plain field it shadows.
fn unicode_extra(body: &mut ByteReader<'_>, plain: &[u8], what: &str) -> Option<String> {
    let version = body.read_u8("unicode extra version").ok()?;
    let expected = body.read_u32("unicode extra crc32").ok()?;
    if version != 1 {
        return None;
    }
    if expected != crc32(0, plain) {
        log::warn!("ignoring stale unicode {what} extra field");
        return None;
    }
    let text = body.read_bytes(body.remaining(), "unicode extra text").ok()?;
    Some(String::from_utf8_lossy(text).into_owned())
}
