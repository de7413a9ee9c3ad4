//! Archive creation.
//!
//! Entries are collected by a [`ZipWriter`] and written out by the
//! [`ArchiveStream`] returned from [`ZipWriter::finish`]. The stream is itself
//! a pipeline [`Source`], so an archive can be compressed, forwarded or
//! written to disk chunk by chunk.
//!
//! Each entry is written in one of two ways:
//!
//! - buffered: the entry is compressed completely, then emitted with a fully
//!   populated local file header in front of it;
//! - streamed: the local header goes out first with zeroed sizes and CRC, the
//!   content follows as it is produced, and a data descriptor closes it.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::checksum::crc32;
use crate::deflate::{Wrapper, DEFAULT_LEVEL};
use crate::error::{Error, Result};
use crate::io::ByteWriter;
use crate::pipeline::{
    BytesSource, Chunk, CompressStage, Crc32Probe, LengthField, LengthProbe, Pipeline, Source,
    StreamInfo, DEFAULT_CHUNK_SIZE,
};

use super::structures::*;

const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;
const MAX_FIELD_LEN: usize = u16::MAX as usize;

const DEFAULT_UNIX_FILE: u32 = 0o100644;
const DEFAULT_UNIX_DIR: u32 = 0o040755;
const UNIX_TYPE_MASK: u32 = 0o170000;

/// Archive-wide settings.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub comment: String,
    /// Host recorded in "version made by"; decides how attributes are stored.
    pub platform: Platform,
    /// Default write mode for entries that don't choose one.
    pub stream_files: bool,
    pub compression: CompressionMethod,
    pub level: u32,
    /// Write ZIP64 records even when nothing overflows.
    pub force_zip64: bool,
    /// Store non-ASCII names in Unicode extra fields (with an ASCII
    /// fallback name) instead of setting the UTF-8 flag.
    pub unicode_extra_fields: bool,
    pub chunk_size: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            comment: String::new(),
            platform: Platform::Dos,
            stream_files: false,
            compression: CompressionMethod::Deflate,
            level: DEFAULT_LEVEL,
            force_zip64: false,
            unicode_extra_fields: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Per-entry settings. Unset fields fall back to the [`ArchiveOptions`].
#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub compression: Option<CompressionMethod>,
    pub level: Option<u32>,
    /// Defaults to the time the entry was added.
    pub modified: Option<DosDateTime>,
    pub comment: String,
    pub unix_permissions: Option<u32>,
    pub dos_permissions: Option<u8>,
    pub dir: bool,
    /// Add entries for missing parent folders.
    pub create_folders: bool,
    pub streamed: Option<bool>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            compression: None,
            level: None,
            modified: None,
            comment: String::new(),
            unix_permissions: None,
            dos_permissions: None,
            dir: false,
            create_folders: true,
            streamed: None,
        }
    }
}

/// Content of an entry.
pub enum EntryData {
    Bytes(Vec<u8>),
    Stream(Box<dyn Source>),
}

impl EntryData {
    pub fn stream(source: impl Source + 'static) -> Self {
        Self::Stream(Box::new(source))
    }

    fn abort(self, reason: &Error) {
        if let Self::Stream(mut source) = self {
            source.abort(reason);
        }
    }
}

impl std::fmt::Debug for EntryData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Vec<u8>> for EntryData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for EntryData {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<&str> for EntryData {
    fn from(text: &str) -> Self {
        Self::Bytes(text.as_bytes().to_vec())
    }
}

impl From<String> for EntryData {
    fn from(text: String) -> Self {
        Self::Bytes(text.into_bytes())
    }
}

#[derive(Debug)]
struct PendingEntry {
    name: String,
    /// `None` for directories.
    data: Option<EntryData>,
    method: CompressionMethod,
    level: u32,
    modified: DosDateTime,
    comment: String,
    external_attributes: u32,
    streamed: bool,
}

/// Collects entries for a new archive.
#[derive(Debug)]
pub struct ZipWriter {
    options: ArchiveOptions,
    entries: Vec<PendingEntry>,
}

impl Default for ZipWriter {
    fn default() -> Self {
        Self::new(ArchiveOptions::default())
    }
}

impl ZipWriter {
    pub fn new(options: ArchiveOptions) -> Self {
        Self {
            options,
            entries: Vec::new(),
        }
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Names in archive order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Adds an entry. A name ending in `/` (or `options.dir`) makes a
    /// directory, whose data is ignored. Adding an existing name replaces
    /// that entry in place.
    pub fn add(
        &mut self,
        name: &str,
        data: impl Into<EntryData>,
        options: EntryOptions,
    ) -> Result<()> {
        let data = data.into();
        let dir = options.dir || name.ends_with('/');
        let mut name = name.trim_start_matches('/').to_string();
        if dir && !name.ends_with('/') {
            name.push('/');
        }
        if name.is_empty() || name == "/" {
            return Err(Error::config("entry name is empty"));
        }
        if name.len() > MAX_FIELD_LEN || options.comment.len() > MAX_FIELD_LEN {
            return Err(Error::config(format!("name or comment of {name} is too long")));
        }

        let method = if dir {
            CompressionMethod::Stored
        } else {
            options.compression.unwrap_or(self.options.compression)
        };
        if let CompressionMethod::Unknown(m) = method {
            return Err(Error::Unsupported(format!("compression method {m}")));
        }
        let level = options.level.unwrap_or(self.options.level);
        if level > 9 {
            return Err(Error::config(format!("compression level {level} is not in 0..=9")));
        }
        let modified = options.modified.unwrap_or_else(DosDateTime::now);

        if options.create_folders {
            for folder in parent_folders(&name) {
                if !self.contains(folder) {
                    let entry = self.folder_entry(folder.to_string(), modified);
                    self.entries.push(entry);
                }
            }
        }

        let data = if dir {
            data.abort(&Error::Aborted(format!("{name} is a directory")));
            None
        } else {
            Some(data)
        };
        let entry = PendingEntry {
            external_attributes: external_attributes(
                self.options.platform,
                dir,
                options.unix_permissions,
                options.dos_permissions,
            ),
            name,
            data,
            method,
            level,
            modified,
            comment: options.comment,
            streamed: options.streamed.unwrap_or(self.options.stream_files),
        };
        self.insert(entry);
        Ok(())
    }

    /// Adds a directory entry.
    pub fn add_folder(&mut self, name: &str) -> Result<()> {
        let options = EntryOptions {
            dir: true,
            ..Default::default()
        };
        self.add(name, Vec::new(), options)
    }

    /// Removes an entry, or a folder together with everything below it.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let folder = format!("{}/", name.trim_end_matches('/'));
        let before = self.entries.len();
        let reason = Error::Aborted(format!("{name} was removed"));
        let entries = std::mem::take(&mut self.entries);
        for entry in entries {
            if entry.name == name || entry.name.starts_with(&folder) {
                if let Some(data) = entry.data {
                    data.abort(&reason);
                }
            } else {
                self.entries.push(entry);
            }
        }
        self.entries.len() != before
    }

    /// Stops collecting entries and returns the archive as a stream.
    pub fn finish(self) -> Result<ArchiveStream> {
        if self.options.comment.len() > MAX_FIELD_LEN {
            return Err(Error::config("archive comment is too long"));
        }
        log::debug!("writing archive with {} entries", self.entries.len());
        Ok(ArchiveStream {
            total: self.entries.len(),
            queue: self.entries.into(),
            options: self.options,
            active: None,
            records: Vec::new(),
            offset: 0,
            state: WriteState::Entries,
        })
    }

    fn insert(&mut self, entry: PendingEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(slot) => {
                let old = std::mem::replace(slot, entry);
                if let Some(data) = old.data {
                    data.abort(&Error::Aborted(format!("{} was replaced", old.name)));
                }
            }
            None => self.entries.push(entry),
        }
    }

    fn folder_entry(&self, name: String, modified: DosDateTime) -> PendingEntry {
        PendingEntry {
            name,
            data: None,
            method: CompressionMethod::Stored,
            level: 0,
            modified,
            comment: String::new(),
            external_attributes: external_attributes(self.options.platform, true, None, None),
            streamed: false,
        }
    }
}

/// `"a/b/c.txt"` gives `"a/"` then `"a/b/"`.
fn parent_folders(name: &str) -> impl Iterator<Item = &str> {
    let trimmed = name.strip_suffix('/').unwrap_or(name);
    trimmed
        .match_indices('/')
        .map(move |(i, _)| &name[..=i])
}

fn external_attributes(
    platform: Platform,
    dir: bool,
    unix: Option<u32>,
    dos: Option<u8>,
) -> u32 {
    let mut dos_bits = dos.unwrap_or(0) as u32;
    if dir {
        dos_bits |= DOS_DIRECTORY as u32;
    }
    match platform {
        Platform::Dos => dos_bits,
        Platform::Unix => {
            let mut mode = unix.unwrap_or(if dir { DEFAULT_UNIX_DIR } else { DEFAULT_UNIX_FILE });
            if mode & UNIX_TYPE_MASK == 0 {
                mode |= if dir { 0o040000 } else { 0o100000 };
            }
            (mode << 16) | dos_bits
        }
    }
}

/// Encodes a name or comment. Returns the raw field, whether it needs the
/// UTF-8 flag, and the Unicode extra field to go with it (if any).
fn encode_text(text: &str, id: u16, unicode_extra: bool) -> (Vec<u8>, bool, Vec<u8>) {
    if text.is_ascii() {
        return (text.as_bytes().to_vec(), false, Vec::new());
    }
    if !unicode_extra {
        return (text.as_bytes().to_vec(), true, Vec::new());
    }
    let fallback: Vec<u8> = text
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'_' })
        .collect();
    let utf8 = text.as_bytes();
    let mut extra = ByteWriter::with_capacity(9 + utf8.len());
    extra
        .u16(id)
        .u16(5 + utf8.len() as u16)
        .u8(1)
        .u32(crc32(0, &fallback))
        .bytes(utf8);
    (fallback, false, extra.into_inner())
}

/// What the central directory needs to know about a written entry.
#[derive(Debug)]
struct Record {
    name: Vec<u8>,
    path_extra: Vec<u8>,
    comment: Vec<u8>,
    comment_extra: Vec<u8>,
    flags: u16,
    method: CompressionMethod,
    modified: DosDateTime,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    offset: u64,
    external_attributes: u32,
}

impl Record {
    fn new(entry: &PendingEntry, options: &ArchiveOptions, offset: u64) -> Self {
        let (name, name_utf8, path_extra) =
            encode_text(&entry.name, EXTRA_UNICODE_PATH, options.unicode_extra_fields);
        let (comment, comment_utf8, comment_extra) =
            encode_text(&entry.comment, EXTRA_UNICODE_COMMENT, options.unicode_extra_fields);
        let mut flags = 0;
        if name_utf8 || comment_utf8 {
            flags |= FLAG_UTF8;
        }
        if entry.streamed && entry.data.is_some() {
            flags |= FLAG_DATA_DESCRIPTOR;
        }
        Self {
            name,
            path_extra,
            comment,
            comment_extra,
            flags,
            method: entry.method,
            modified: entry.modified,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            offset,
            external_attributes: entry.external_attributes,
        }
    }

    fn fill(&mut self, info: &StreamInfo) {
        self.crc32 = info.crc32.unwrap_or(0);
        self.uncompressed_size = info.uncompressed_size.unwrap_or(0);
        self.compressed_size = match self.method {
            CompressionMethod::Stored => self.uncompressed_size,
            _ => info.compressed_size.unwrap_or(0),
        };
    }

    fn sizes_overflow(&self) -> bool {
        self.compressed_size >= ZIP64_SENTINEL_32 as u64
            || self.uncompressed_size >= ZIP64_SENTINEL_32 as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Entries,
    Directory,
    Done,
}

#[derive(Debug)]
struct ActiveEntry {
    record: Record,
    pipeline: Pipeline,
}

/// A finished archive, produced chunk by chunk.
///
/// Chunk progress is the share of entries written so far.
#[derive(Debug)]
pub struct ArchiveStream {
    options: ArchiveOptions,
    queue: VecDeque<PendingEntry>,
    active: Option<ActiveEntry>,
    records: Vec<Record>,
    offset: u64,
    total: usize,
    state: WriteState,
}

impl ArchiveStream {
    /// Wraps the stream in a [`Pipeline`], to add stages or a handle.
    pub fn into_pipeline(self) -> Pipeline {
        Pipeline::new(self)
    }

    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        let (bytes, _) = self.into_pipeline().collect().await?;
        Ok(bytes)
    }

    /// Writes the archive to `out`, returning its size.
    pub async fn write_to<W>(self, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut pipeline = self.into_pipeline();
        let mut written = 0u64;
        while let Some(chunk) = pipeline.next().await? {
            out.write_all(&chunk.data).await?;
            written += chunk.data.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }

    fn progress(&self, current: f64) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let done = self.records.len() as f64 + current / 100.0;
        (done * 100.0 / self.total as f64).min(100.0)
    }

    fn entry_pipeline(
        &self,
        data: EntryData,
        method: CompressionMethod,
        level: u32,
    ) -> Result<Pipeline> {
        let pipeline = match data {
            EntryData::Bytes(bytes) => {
                Pipeline::new(BytesSource::new(bytes).chunk_size(self.options.chunk_size))
            }
            EntryData::Stream(source) => Pipeline::from_boxed(source),
        };
        let pipeline = pipeline
            .pipe(Crc32Probe::new())
            .pipe(LengthProbe::new(LengthField::Uncompressed));
        Ok(match method {
            CompressionMethod::Deflate => pipeline
                .pipe(CompressStage::new(level, Wrapper::Raw)?)
                .pipe(LengthProbe::new(LengthField::Compressed)),
            _ => pipeline,
        })
    }

    fn local_header(&self, r: &Record) -> Vec<u8> {
        let zip64 = self.options.force_zip64 || r.sizes_overflow();
        let mut extra = ByteWriter::new();
        if zip64 {
            extra
                .u16(EXTRA_ZIP64)
                .u16(16)
                .u64(r.uncompressed_size)
                .u64(r.compressed_size);
        }
        extra.bytes(&r.path_extra);

        let (compressed, uncompressed) = if zip64 {
            (ZIP64_SENTINEL_32, ZIP64_SENTINEL_32)
        } else {
            (r.compressed_size as u32, r.uncompressed_size as u32)
        };
        let mut w = ByteWriter::with_capacity(LFH_SIZE + r.name.len() + extra.len());
        w.bytes(LFH_SIGNATURE)
            .u16(if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT })
            .u16(r.flags)
            .u16(r.method.as_u16())
            .u16(r.modified.time)
            .u16(r.modified.date)
            .u32(r.crc32)
            .u32(compressed)
            .u32(uncompressed)
            .u16(r.name.len() as u16)
            .u16(extra.len() as u16)
            .bytes(&r.name)
            .bytes(extra.as_slice());
        w.into_inner()
    }

    fn data_descriptor(&self, r: &Record) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(24);
        w.bytes(DATA_DESCRIPTOR_SIGNATURE).u32(r.crc32);
        if self.options.force_zip64 || r.sizes_overflow() {
            w.u64(r.compressed_size).u64(r.uncompressed_size);
        } else {
            w.u32(r.compressed_size as u32).u32(r.uncompressed_size as u32);
        }
        w.into_inner()
    }

    fn central_header(&self, r: &Record, w: &mut ByteWriter) {
        let force = self.options.force_zip64;
        let mut wide = ByteWriter::new();
        let mut narrow = |value: u64| -> u32 {
            if force || value >= ZIP64_SENTINEL_32 as u64 {
                wide.u64(value);
                ZIP64_SENTINEL_32
            } else {
                value as u32
            }
        };
        // field order inside the ZIP64 extra is fixed
        let uncompressed = narrow(r.uncompressed_size);
        let compressed = narrow(r.compressed_size);
        let offset = narrow(r.offset);

        let mut extra = ByteWriter::new();
        if !wide.is_empty() {
            extra
                .u16(EXTRA_ZIP64)
                .u16(wide.len() as u16)
                .bytes(wide.as_slice());
        }
        extra.bytes(&r.path_extra).bytes(&r.comment_extra);

        w.bytes(CDFH_SIGNATURE)
            .u16(self.options.platform.version_made_by())
            .u16(if wide.is_empty() { VERSION_DEFAULT } else { VERSION_ZIP64 })
            .u16(r.flags)
            .u16(r.method.as_u16())
            .u16(r.modified.time)
            .u16(r.modified.date)
            .u32(r.crc32)
            .u32(compressed)
            .u32(uncompressed)
            .u16(r.name.len() as u16)
            .u16(extra.len() as u16)
            .u16(r.comment.len() as u16)
            .u16(0)
            .u16(0)
            .u32(r.external_attributes)
            .u32(offset)
            .bytes(&r.name)
            .bytes(extra.as_slice())
            .bytes(&r.comment);
    }

    fn central_directory(&self) -> Vec<u8> {
        let cd_offset = self.offset;
        let mut w = ByteWriter::new();
        for record in &self.records {
            self.central_header(record, &mut w);
        }
        let cd_size = w.len() as u64;
        let count = self.records.len() as u64;

        let force = self.options.force_zip64;
        let sentinel = ZIP64_SENTINEL_32 as u64;
        let many = force || count >= ZIP64_SENTINEL_16 as u64;
        if many || cd_size >= sentinel || cd_offset >= sentinel {
            let eocd64_offset = cd_offset + cd_size;
            Zip64EOCD {
                eocd64_size: Zip64EOCD::MIN_SIZE as u64 - 12,
                version_made_by: self.options.platform.version_made_by(),
                version_needed: VERSION_ZIP64,
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: count,
                total_entries: count,
                cd_size,
                cd_offset,
            }
            .write(&mut w);
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset,
                total_disks: 1,
            }
            .write(&mut w);
        }

        let entries = if many { ZIP64_SENTINEL_16 } else { count as u16 };
        let narrow = |value: u64| {
            if force || value >= sentinel {
                ZIP64_SENTINEL_32
            } else {
                value as u32
            }
        };
        let comment = self.options.comment.as_bytes();
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size: narrow(cd_size),
            cd_offset: narrow(cd_offset),
            comment_len: comment.len() as u16,
        }
        .write(&mut w, comment);
        w.into_inner()
    }

    /// Ends the archive after a failure, passing the error on to every
    /// entry source that has not run yet.
    fn fail(&mut self, err: Error) -> Error {
        log::warn!("archive generation failed: {err}");
        self.abort_all(&err);
        err
    }

    fn abort_all(&mut self, reason: &Error) {
        if let Some(mut active) = self.active.take() {
            active.pipeline.abort(reason);
        }
        for entry in self.queue.drain(..) {
            if let Some(data) = entry.data {
                data.abort(reason);
            }
        }
        self.state = WriteState::Done;
    }

    fn emit(&mut self, bytes: Vec<u8>, current: f64) -> Chunk {
        self.offset += bytes.len() as u64;
        Chunk::new(bytes, self.progress(current))
    }
}

#[async_trait]
impl Source for ArchiveStream {
    async fn produce(&mut self) -> Result<Option<Chunk>> {
        loop {
            match self.state {
                WriteState::Done => return Ok(None),
                WriteState::Directory => {
                    let bytes = self.central_directory();
                    self.state = WriteState::Done;
                    log::debug!(
                        "central directory with {} records at offset {}",
                        self.records.len(),
                        self.offset
                    );
                    return Ok(Some(self.emit(bytes, 0.0)));
                }
                WriteState::Entries => {}
            }

            if let Some(active) = self.active.as_mut() {
                match active.pipeline.next().await {
                    Ok(Some(mut chunk)) => {
                        self.offset += chunk.data.len() as u64;
                        chunk.meta.percent = self.progress(chunk.meta.percent);
                        return Ok(Some(chunk));
                    }
                    Ok(None) => {
                        if let Some(ActiveEntry { mut record, pipeline }) = self.active.take() {
                            record.fill(&pipeline.info());
                            let descriptor = self.data_descriptor(&record);
                            self.records.push(record);
                            return Ok(Some(self.emit(descriptor, 0.0)));
                        }
                        continue;
                    }
                    Err(e) => return Err(self.fail(e)),
                }
            }

            let Some(entry) = self.queue.pop_front() else {
                self.state = WriteState::Directory;
                continue;
            };
            let mut record = Record::new(&entry, &self.options, self.offset);
            log::trace!("writing {} at offset {}", entry.name, self.offset);

            let Some(data) = entry.data else {
                let header = self.local_header(&record);
                self.records.push(record);
                return Ok(Some(self.emit(header, 0.0)));
            };
            let pipeline = match self.entry_pipeline(data, entry.method, entry.level) {
                Ok(pipeline) => pipeline,
                Err(e) => return Err(self.fail(e)),
            };

            if entry.streamed {
                let header = self.local_header(&record);
                self.active = Some(ActiveEntry { record, pipeline });
                return Ok(Some(self.emit(header, 0.0)));
            }

            let (content, info) = match pipeline.collect().await {
                Ok(done) => done,
                Err(e) => return Err(self.fail(e)),
            };
            record.fill(&info);
            let mut bytes = self.local_header(&record);
            bytes.extend_from_slice(&content);
            self.records.push(record);
            return Ok(Some(self.emit(bytes, 0.0)));
        }
    }

    fn abort(&mut self, reason: &Error) {
        self.abort_all(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_folders_of_nested_names() {
        assert_eq!(
            parent_folders("a/b/c.txt").collect::<Vec<_>>(),
            ["a/", "a/b/"]
        );
        assert_eq!(parent_folders("a/b/").collect::<Vec<_>>(), ["a/"]);
        assert!(parent_folders("top.txt").next().is_none());
    }

    #[test]
    fn attributes_per_platform() {
        assert_eq!(external_attributes(Platform::Dos, true, None, None), 0x10);
        assert_eq!(external_attributes(Platform::Dos, false, None, Some(0x01)), 0x01);
        assert_eq!(
            external_attributes(Platform::Unix, false, Some(0o755), None),
            0o100755 << 16
        );
        assert_eq!(
            external_attributes(Platform::Unix, true, None, None),
            (0o040755 << 16) | 0x10
        );
    }

    #[test]
    fn non_ascii_names() {
        let (raw, utf8, extra) = encode_text("naïve.txt", EXTRA_UNICODE_PATH, false);
        assert!(utf8);
        assert_eq!(raw, "naïve.txt".as_bytes());
        assert!(extra.is_empty());

        let (raw, utf8, extra) = encode_text("naïve.txt", EXTRA_UNICODE_PATH, true);
        assert!(!utf8);
        assert_eq!(raw, b"na_ve.txt");
        assert_eq!(&extra[..2], &EXTRA_UNICODE_PATH.to_le_bytes());
        assert_eq!(extra[4], 1);
    }

    #[test]
    fn replacing_and_removing_entries() {
        let mut writer = ZipWriter::default();
        writer.add("a/b.txt", "one", EntryOptions::default()).unwrap();
        writer.add("a/b.txt", "two", EntryOptions::default()).unwrap();
        writer.add("c.txt", "three", EntryOptions::default()).unwrap();
        assert_eq!(writer.names().collect::<Vec<_>>(), ["a/", "a/b.txt", "c.txt"]);

        assert!(writer.remove("a"));
        assert_eq!(writer.names().collect::<Vec<_>>(), ["c.txt"]);
        assert!(!writer.remove("a"));
    }

    #[test]
    fn bad_entry_options_are_rejected() {
        let mut writer = ZipWriter::default();
        let err = writer
            .add(
                "x",
                "data",
                EntryOptions {
                    level: Some(12),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = writer
            .add(
                "x",
                "data",
                EntryOptions {
                    compression: Some(CompressionMethod::Unknown(12)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(writer.add("", "data", EntryOptions::default()).is_err());
        assert!(writer.is_empty());
    }

    #[tokio::test]
    async fn empty_archive_is_just_the_end_record() {
        let bytes = ZipWriter::default().finish().unwrap().into_bytes().await.unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(&bytes[..4], EndOfCentralDirectory::SIGNATURE);
    }

    #[tokio::test]
    async fn streamed_entry_has_descriptor() {
        let mut writer = ZipWriter::default();
        let options = EntryOptions {
            streamed: Some(true),
            compression: Some(CompressionMethod::Stored),
            ..Default::default()
        };
        writer.add("s.txt", "streamed!", options).unwrap();
        let bytes = writer.finish().unwrap().into_bytes().await.unwrap();

        // local header: flag bit 3, zero CRC and sizes
        assert_eq!(&bytes[..4], LFH_SIGNATURE);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), FLAG_DATA_DESCRIPTOR);
        assert_eq!(&bytes[14..26], &[0u8; 12]);

        let start = LFH_SIZE + "s.txt".len();
        assert_eq!(&bytes[start..start + 9], b"streamed!");
        let descriptor = &bytes[start + 9..start + 25];
        assert_eq!(&descriptor[..4], DATA_DESCRIPTOR_SIGNATURE);
        assert_eq!(&descriptor[4..8], &crc32(0, b"streamed!").to_le_bytes());
        assert_eq!(&descriptor[8..12], &9u32.to_le_bytes());
    }

    #[test]
    fn oversized_streamed_entry_gets_wide_descriptor() {
        let stream = ZipWriter::default().finish().unwrap();
        let mut record = Record {
            name: b"big.bin".to_vec(),
            path_extra: Vec::new(),
            comment: Vec::new(),
            comment_extra: Vec::new(),
            flags: FLAG_DATA_DESCRIPTOR,
            method: CompressionMethod::Deflate,
            modified: DosDateTime::default(),
            crc32: 0xDEAD_BEEF,
            compressed_size: 1234,
            uncompressed_size: 5678,
            offset: 0,
            external_attributes: 0,
        };
        assert_eq!(stream.data_descriptor(&record).len(), 16);

        record.uncompressed_size = 5 << 30;
        let descriptor = stream.data_descriptor(&record);
        assert_eq!(descriptor.len(), 24);
        assert_eq!(&descriptor[4..8], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(&descriptor[8..16], &1234u64.to_le_bytes());
        assert_eq!(&descriptor[16..24], &(5u64 << 30).to_le_bytes());
    }

    #[tokio::test]
    async fn progress_reaches_one_hundred() {
        let mut writer = ZipWriter::default();
        for i in 0..4 {
            writer
                .add(&format!("f{i}"), vec![i as u8; 1000], EntryOptions::default())
                .unwrap();
        }
        let mut pipeline = writer.finish().unwrap().into_pipeline();
        let mut last = 0.0;
        while let Some(chunk) = pipeline.next().await.unwrap() {
            assert!(chunk.meta.percent >= last);
            last = chunk.meta.percent;
        }
        assert_eq!(last, 100.0);
    }
}
