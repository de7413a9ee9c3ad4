use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::deflate::Wrapper;
use crate::error::{Error, Result};
use crate::io::ReadAt;
use crate::pipeline::{
    Crc32Probe, DecompressStage, LengthField, LengthProbe, Pipeline, RangeSource, StreamInfo,
    DEFAULT_CHUNK_SIZE,
};

use super::parser::{CentralDirectory, ZipParser};
use super::structures::{CompressionMethod, ZipFileEntry};

/// How entries are read back.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Compare the CRC32 of every extracted entry with the central
    /// directory.
    ///
    /// Turning this off means a corrupted entry can come back as if it were
    /// intact. It is meant for salvaging damaged archives; the decoded
    /// length is still checked either way.
    pub verify_crc: bool,
    /// Size of the reads issued against the archive.
    pub chunk_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_crc: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// ZIP file extractor
///
/// The central directory is read once, on [`open`](Self::open); entry data
/// is only fetched when an entry is extracted.
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
    directory: CentralDirectory,
    options: ReadOptions,
}

impl<R: ReadAt + 'static> ZipExtractor<R> {
    pub async fn open(reader: Arc<R>) -> Result<Self> {
        Self::open_with(reader, ReadOptions::default()).await
    }

    pub async fn open_with(reader: Arc<R>, options: ReadOptions) -> Result<Self> {
        let parser = ZipParser::new(reader);
        let directory = parser.read_central_directory().await?;
        log::debug!(
            "central directory: {} entries, zip64: {}",
            directory.entries.len(),
            directory.zip64
        );
        Ok(Self {
            parser,
            directory,
            options,
        })
    }

    /// Entries in central directory order.
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.directory.entries
    }

    /// List all files in the archive
    pub fn list_files(&self) -> Vec<ZipFileEntry> {
        self.directory.entries.clone()
    }

    /// Looks an entry up by name. Directories also match without their
    /// trailing slash.
    pub fn entry(&self, name: &str) -> Option<&ZipFileEntry> {
        let entries = &self.directory.entries;
        entries.iter().find(|e| e.file_name == name).or_else(|| {
            entries.iter().find(|e| {
                e.is_directory && e.file_name.strip_suffix('/') == Some(name)
            })
        })
    }

    pub fn comment(&self) -> &str {
        &self.directory.comment
    }

    /// Number of bytes found in front of the archive.
    pub fn prepended_bytes(&self) -> u64 {
        self.directory.prepended_bytes
    }

    pub fn is_zip64(&self) -> bool {
        self.directory.zip64
    }

    fn check_readable(entry: &ZipFileEntry) -> Result<()> {
        if entry.is_encrypted() {
            return Err(Error::Unsupported(format!(
                "{} is encrypted",
                entry.file_name
            )));
        }
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Err(Error::Unsupported(format!(
                "compression method {} used by {}",
                method, entry.file_name
            )));
        }
        Ok(())
    }

    /// Streams the uncompressed content of `entry`.
    ///
    /// The returned pipeline does not check the result against the central
    /// directory; pass its final [`StreamInfo`] to [`verify`](Self::verify).
    pub async fn stream(&self, entry: &ZipFileEntry) -> Result<Pipeline> {
        Self::check_readable(entry)?;
        let data_offset = self.parser.get_data_offset(entry).await?;
        let reader: Arc<dyn ReadAt> = self.parser.reader().clone();

        let mut pipeline = Pipeline::new(
            RangeSource::new(reader, data_offset, entry.compressed_size)
                .chunk_size(self.options.chunk_size),
        );
        if entry.compression_method == CompressionMethod::Deflate {
            pipeline = pipeline.pipe(DecompressStage::new(Wrapper::Raw));
        }
        Ok(pipeline
            .pipe(Crc32Probe::new())
            .pipe(LengthProbe::new(LengthField::Uncompressed)))
    }

    /// Checks what a finished stream produced against the central directory.
    /// The CRC comparison is skipped when [`ReadOptions::verify_crc`] is off.
    pub fn verify(&self, entry: &ZipFileEntry, info: &StreamInfo) -> Result<()> {
        let length = info.uncompressed_size.unwrap_or_default();
        if length != entry.uncompressed_size {
            return Err(Error::data(format!(
                "bad uncompressed size for {}: expected {}, got {}",
                entry.file_name, entry.uncompressed_size, length
            )));
        }
        if !self.options.verify_crc {
            log::debug!("skipping CRC check for {}", entry.file_name);
            return Ok(());
        }
        let actual = info.crc32.unwrap_or_default();
        if actual != entry.crc32 {
            return Err(Error::CrcMismatch {
                expected: entry.crc32,
                actual,
            });
        }
        Ok(())
    }

    /// Extract file data to memory
    pub async fn read(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        if entry.is_directory {
            return Ok(Vec::new());
        }
        let (data, info) = self.stream(entry).await?.collect().await?;
        self.verify(entry, &info)?;
        Ok(data)
    }

    /// Reads the entry called `name`.
    pub async fn read_by_name(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .entry(name)
            .ok_or_else(|| Error::data(format!("{name} not found in archive")))?;
        self.read(entry).await
    }

    /// Streams the entry into `out`, returning the number of bytes written.
    pub async fn extract_to_writer<W>(&self, entry: &ZipFileEntry, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if entry.is_directory {
            return Ok(0);
        }
        let mut pipeline = self.stream(entry).await?;
        let mut written = 0u64;
        while let Some(chunk) = pipeline.next().await? {
            out.write_all(&chunk.data).await?;
            written += chunk.data.len() as u64;
        }
        out.flush().await?;
        self.verify(entry, &pipeline.info())?;
        Ok(written)
    }

    /// Extract file to disk
    pub async fn extract_to_file(&self, entry: &ZipFileEntry, output_path: &Path) -> Result<()> {
        if entry.is_directory {
            fs::create_dir_all(output_path).await?;
            return Ok(());
        }

        // Create parent directories if needed
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = fs::File::create(output_path).await?;
        self.extract_to_writer(entry, &mut file).await?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_permissions() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(mode & 0o777);
            fs::set_permissions(output_path, perms).await?;
        }

        Ok(())
    }

    /// Extract file to stdout
    pub async fn extract_to_stdout(&self, entry: &ZipFileEntry) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        self.extract_to_writer(entry, &mut stdout).await?;
        Ok(())
    }

    /// Decompresses `entry` without keeping the data, checking its CRC32.
    pub async fn test_entry(&self, entry: &ZipFileEntry) -> Result<()> {
        if entry.is_directory {
            return Ok(());
        }
        let mut pipeline = self.stream(entry).await?;
        while pipeline.next().await?.is_some() {}
        let info = pipeline.info();
        // Testing always checks, whatever the read options say.
        if info.crc32 != Some(entry.crc32) {
            return Err(Error::CrcMismatch {
                expected: entry.crc32,
                actual: info.crc32.unwrap_or_default(),
            });
        }
        if info.uncompressed_size != Some(entry.uncompressed_size) {
            return Err(Error::data(format!(
                "bad uncompressed size for {}",
                entry.file_name
            )));
        }
        Ok(())
    }

    /// Tests every entry, in central directory order.
    pub async fn test(&self) -> Vec<(&ZipFileEntry, Result<()>)> {
        let mut results = Vec::with_capacity(self.directory.entries.len());
        for entry in &self.directory.entries {
            let outcome = self.test_entry(entry).await;
            if let Err(e) = &outcome {
                log::warn!("{}: {e}", entry.file_name);
            }
            results.push((entry, outcome));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::{EntryOptions, ZipWriter, CDFH_SIGNATURE};

    async fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::default();
        for (name, data) in entries {
            writer
                .add(name, data.to_vec(), EntryOptions::default())
                .unwrap();
        }
        writer.finish().unwrap().into_bytes().await.unwrap()
    }

    #[tokio::test]
    async fn lookup_finds_directories_without_slash() {
        let bytes = archive(&[("a.txt", &b"hello"[..]), ("dir/b.txt", &b""[..])]).await;
        let zip = ZipExtractor::open(Arc::new(MemoryReader::new(bytes)))
            .await
            .unwrap();
        assert!(zip.entry("dir").unwrap().is_directory);
        assert!(zip.entry("dir/").unwrap().is_directory);
        assert!(zip.entry("nope").is_none());
        assert_eq!(zip.read_by_name("a.txt").await.unwrap(), b"hello");
        assert!(zip.read_by_name("dir/b.txt").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn crc_check_can_be_disabled() {
        let mut bytes = archive(&[("a.txt", &b"hello hello hello hello"[..])]).await;
        let zip = ZipExtractor::open(Arc::new(MemoryReader::new(bytes.clone())))
            .await
            .unwrap();
        let crc = zip.entry("a.txt").unwrap().crc32.to_le_bytes();
        // corrupt the stored CRC in both headers
        for i in 0..bytes.len() - 3 {
            if bytes[i..i + 4] == crc {
                bytes[i] ^= 0xFF;
            }
        }

        let zip = ZipExtractor::open(Arc::new(MemoryReader::new(bytes.clone())))
            .await
            .unwrap();
        let err = zip.read_by_name("a.txt").await.unwrap_err();
        assert!(matches!(err, Error::CrcMismatch { .. }), "{err}");
        assert!(zip.test_entry(zip.entry("a.txt").unwrap()).await.is_err());

        let relaxed = ReadOptions {
            verify_crc: false,
            ..Default::default()
        };
        let zip = ZipExtractor::open_with(Arc::new(MemoryReader::new(bytes)), relaxed)
            .await
            .unwrap();
        assert_eq!(
            zip.read_by_name("a.txt").await.unwrap(),
            b"hello hello hello hello"
        );
    }

    #[tokio::test]
    async fn length_is_checked_without_crc_verification() {
        let mut bytes = archive(&[("a.txt", &b"hello hello hello hello"[..])]).await;
        let cd = bytes
            .windows(4)
            .position(|w| w == CDFH_SIGNATURE)
            .unwrap();
        // uncompressed size field of the central record
        bytes[cd + 24] += 1;

        let relaxed = ReadOptions {
            verify_crc: false,
            ..Default::default()
        };
        let zip = ZipExtractor::open_with(Arc::new(MemoryReader::new(bytes)), relaxed)
            .await
            .unwrap();
        let err = zip.read_by_name("a.txt").await.unwrap_err();
        assert!(err.is_data_error(), "{err}");
        assert!(!matches!(err, Error::CrcMismatch { .. }));
    }

    #[tokio::test]
    async fn extract_to_writer_streams_everything() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let bytes = archive(&[("big.bin", data.as_slice())]).await;
        let zip = ZipExtractor::open_with(
            Arc::new(MemoryReader::new(bytes)),
            ReadOptions {
                chunk_size: 1000,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let mut out = Vec::new();
        let n = zip
            .extract_to_writer(zip.entry("big.bin").unwrap(), &mut out)
            .await
            .unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(out, data);
    }
}
