use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use zipstream::io::ReadAt;
use zipstream::pipeline::{BytesSource, Chunk, Source, StreamInfo};
use zipstream::zip::{
    ArchiveOptions, CompressionMethod, DosDateTime, EntryData, EntryOptions, Platform,
};
use zipstream::{Error, LocalFileReader, MemoryReader, ZipExtractor, ZipWriter};

async fn build(options: ArchiveOptions, entries: Vec<(&str, EntryData, EntryOptions)>) -> Vec<u8> {
    let mut writer = ZipWriter::new(options);
    for (name, data, opts) in entries {
        writer.add(name, data, opts).unwrap();
    }
    writer.finish().unwrap().into_bytes().await.unwrap()
}

async fn open(bytes: Vec<u8>) -> ZipExtractor<MemoryReader> {
    ZipExtractor::open(Arc::new(MemoryReader::new(bytes)))
        .await
        .unwrap()
}

fn pseudo_random(len: usize) -> Vec<u8> {
    let mut state = 0x1234_5678u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

#[tokio::test]
async fn archive_round_trip_with_folder_marker() {
    let dir = EntryOptions {
        dir: true,
        ..Default::default()
    };
    let bytes = build(
        ArchiveOptions::default(),
        vec![
            ("a.txt", "hello".into(), EntryOptions::default()),
            ("dir/b.txt", "".into(), dir),
        ],
    )
    .await;

    let zip = open(bytes).await;
    assert_eq!(zip.read_by_name("a.txt").await.unwrap(), b"hello");
    let marker = zip.entry("dir/b.txt").unwrap();
    assert!(marker.is_directory);
    assert_eq!(marker.file_name, "dir/b.txt/");
    assert!(zip.entry("dir").unwrap().is_directory);
    assert_eq!(zip.entries().len(), 3);
}

#[tokio::test]
async fn large_entry_buffered_and_streamed() {
    let data = pseudo_random(48 * 1024)
        .into_iter()
        .chain(std::iter::repeat_n(b'z', 48 * 1024))
        .collect::<Vec<u8>>();
    for stream_files in [false, true] {
        let options = ArchiveOptions {
            stream_files,
            ..Default::default()
        };
        let bytes = build(
            options,
            vec![("big.bin", data.clone().into(), EntryOptions::default())],
        )
        .await;
        let zip = open(bytes).await;
        let entry = zip.entry("big.bin").unwrap();
        assert_eq!(entry.has_data_descriptor(), stream_files);
        assert_eq!(entry.uncompressed_size, data.len() as u64);
        assert!(entry.compressed_size < entry.uncompressed_size);
        assert_eq!(zip.read(entry).await.unwrap(), data);
    }
}

#[tokio::test]
async fn streamed_source_entry() {
    let data = pseudo_random(70_000);
    let source = BytesSource::new(data.clone()).chunk_size(4096);
    let bytes = build(
        ArchiveOptions::default(),
        vec![(
            "from-source.bin",
            EntryData::stream(source),
            EntryOptions {
                streamed: Some(true),
                compression: Some(CompressionMethod::Stored),
                ..Default::default()
            },
        )],
    )
    .await;
    let zip = open(bytes).await;
    let entry = zip.entry("from-source.bin").unwrap();
    assert_eq!(entry.compression_method, CompressionMethod::Stored);
    assert_eq!(entry.compressed_size, 70_000);
    assert_eq!(zip.read(entry).await.unwrap(), data);
}

#[tokio::test]
async fn forced_zip64_round_trip() {
    let options = ArchiveOptions {
        force_zip64: true,
        comment: "zip64 archive".into(),
        ..Default::default()
    };
    for stream_files in [false, true] {
        let bytes = build(
            ArchiveOptions {
                stream_files,
                ..options.clone()
            },
            vec![
                ("one.txt", "first".into(), EntryOptions::default()),
                ("two.txt", "second".repeat(500).into(), EntryOptions::default()),
            ],
        )
        .await;
        let zip = open(bytes).await;
        assert!(zip.is_zip64());
        assert_eq!(zip.comment(), "zip64 archive");
        assert_eq!(zip.read_by_name("one.txt").await.unwrap(), b"first");
        assert_eq!(
            zip.read_by_name("two.txt").await.unwrap(),
            "second".repeat(500).as_bytes()
        );
    }
}

/// An archive preceded by `gap` zero bytes that are never stored anywhere.
struct Offset {
    gap: u64,
    archive: Vec<u8>,
}

#[async_trait]
impl ReadAt for Offset {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> zipstream::Result<usize> {
        let mut n = 0;
        for (i, byte) in buf.iter_mut().enumerate() {
            let pos = offset + i as u64;
            if pos < self.gap {
                *byte = 0;
            } else if let Some(b) = self.archive.get((pos - self.gap) as usize) {
                *byte = *b;
            } else {
                break;
            }
            n += 1;
        }
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.gap + self.archive.len() as u64
    }
}

#[tokio::test]
async fn zip64_archive_beyond_four_gigabytes() {
    let archive = build(
        ArchiveOptions {
            force_zip64: true,
            ..Default::default()
        },
        vec![("far.txt", "far away".into(), EntryOptions::default())],
    )
    .await;
    let gap = 5u64 << 30;
    let zip = ZipExtractor::open(Arc::new(Offset { gap, archive }))
        .await
        .unwrap();
    assert_eq!(zip.prepended_bytes(), gap);
    let entry = zip.entry("far.txt").unwrap();
    assert_eq!(entry.lfh_offset, gap);
    assert_eq!(zip.read(entry).await.unwrap(), b"far away");
}

/// A stored entry whose content is generated on the fly, so its size can
/// exceed 4 GiB. Every size field in the headers holds the ZIP64 sentinel.
struct Generated {
    head: Vec<u8>,
    len: u64,
    tail: Vec<u8>,
}

fn generated_byte(i: u64) -> u8 {
    (i % 251) as u8
}

impl Generated {
    fn new(len: u64, crc: u32) -> Self {
        let name = b"huge.bin";
        let sentinel = u32::MAX.to_le_bytes();
        let mut sizes = Vec::new();
        sizes.extend_from_slice(&1u16.to_le_bytes());
        sizes.extend_from_slice(&16u16.to_le_bytes());
        sizes.extend_from_slice(&len.to_le_bytes());
        sizes.extend_from_slice(&len.to_le_bytes());

        let mut head = Vec::new();
        head.extend_from_slice(b"PK\x03\x04");
        head.extend_from_slice(&[45, 0, 0, 0, 0, 0, 0, 0, 0x21, 0]);
        head.extend_from_slice(&crc.to_le_bytes());
        head.extend_from_slice(&sentinel);
        head.extend_from_slice(&sentinel);
        head.extend_from_slice(&(name.len() as u16).to_le_bytes());
        head.extend_from_slice(&(sizes.len() as u16).to_le_bytes());
        head.extend_from_slice(name);
        head.extend_from_slice(&sizes);

        let cd_offset = head.len() as u64 + len;
        let mut tail = Vec::new();
        tail.extend_from_slice(b"PK\x01\x02");
        tail.extend_from_slice(&[45, 0, 45, 0, 0, 0, 0, 0, 0, 0, 0x21, 0]);
        tail.extend_from_slice(&crc.to_le_bytes());
        tail.extend_from_slice(&sentinel);
        tail.extend_from_slice(&sentinel);
        tail.extend_from_slice(&(name.len() as u16).to_le_bytes());
        tail.extend_from_slice(&(sizes.len() as u16).to_le_bytes());
        tail.extend_from_slice(&[0; 10]);
        tail.extend_from_slice(&0u32.to_le_bytes());
        tail.extend_from_slice(name);
        tail.extend_from_slice(&sizes);
        let cd_size = tail.len() as u64;

        let eocd64_offset = cd_offset + cd_size;
        tail.extend_from_slice(b"PK\x06\x06");
        tail.extend_from_slice(&44u64.to_le_bytes());
        tail.extend_from_slice(&[45, 0, 45, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        tail.extend_from_slice(&1u64.to_le_bytes());
        tail.extend_from_slice(&1u64.to_le_bytes());
        tail.extend_from_slice(&cd_size.to_le_bytes());
        tail.extend_from_slice(&cd_offset.to_le_bytes());
        tail.extend_from_slice(b"PK\x06\x07");
        tail.extend_from_slice(&0u32.to_le_bytes());
        tail.extend_from_slice(&eocd64_offset.to_le_bytes());
        tail.extend_from_slice(&1u32.to_le_bytes());
        tail.extend_from_slice(b"PK\x05\x06");
        tail.extend_from_slice(&[0, 0, 0, 0, 1, 0, 1, 0]);
        tail.extend_from_slice(&(cd_size as u32).to_le_bytes());
        tail.extend_from_slice(&sentinel);
        tail.extend_from_slice(&0u16.to_le_bytes());

        Self { head, len, tail }
    }
}

#[async_trait]
impl ReadAt for Generated {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> zipstream::Result<usize> {
        let head = self.head.len() as u64;
        let mut n = 0;
        for (i, byte) in buf.iter_mut().enumerate() {
            let pos = offset + i as u64;
            *byte = if pos < head {
                self.head[pos as usize]
            } else if pos < head + self.len {
                generated_byte(pos - head)
            } else if let Some(b) = self.tail.get((pos - head - self.len) as usize) {
                *b
            } else {
                break;
            };
            n += 1;
        }
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.head.len() as u64 + self.len + self.tail.len() as u64
    }
}

#[tokio::test]
async fn zip64_sizes_are_read_from_the_extra_field() {
    let len = 70_000;
    let content: Vec<u8> = (0..len).map(generated_byte).collect();
    let zip = ZipExtractor::open(Arc::new(Generated::new(len, crc32fast::hash(&content))))
        .await
        .unwrap();
    assert!(zip.is_zip64());
    let entry = zip.entry("huge.bin").unwrap();
    assert_eq!(entry.compressed_size, len);
    assert_eq!(entry.uncompressed_size, len);
    assert_eq!(zip.read(entry).await.unwrap(), content);
    zip.test_entry(entry).await.unwrap();

    let zip = ZipExtractor::open(Arc::new(Generated::new(len, 0x0BAD_0BAD)))
        .await
        .unwrap();
    let err = zip.read_by_name("huge.bin").await.unwrap_err();
    assert!(matches!(err, Error::CrcMismatch { .. }), "{err}");
}

#[tokio::test]
async fn entry_larger_than_four_gigabytes() {
    let len = (1u64 << 32) + 4321;
    let zip = ZipExtractor::open(Arc::new(Generated::new(len, 0)))
        .await
        .unwrap();
    let entry = zip.entry("huge.bin").unwrap();
    assert_eq!(entry.uncompressed_size, len);
    assert_eq!(entry.compressed_size, len);
    assert_eq!(entry.lfh_offset, 0);

    // only the head is read back
    let mut pipeline = zip.stream(entry).await.unwrap();
    let mut got = 0u64;
    while got < 100_000 {
        let chunk = pipeline.next().await.unwrap().unwrap();
        for (i, byte) in chunk.data.iter().enumerate() {
            assert_eq!(*byte, generated_byte(got + i as u64));
        }
        got += chunk.data.len() as u64;
    }
    let info = pipeline.info();
    assert_eq!(info.compressed_size, Some(len));
    assert_eq!(info.uncompressed_size, Some(got));
}

#[tokio::test]
async fn prepended_bytes_are_tolerated() {
    let archive = build(
        ArchiveOptions::default(),
        vec![("a.txt", "payload".into(), EntryOptions::default())],
    )
    .await;
    let mut bytes = b"#!/bin/sh\nexec unzip \"$0\"\n".to_vec();
    let stub = bytes.len() as u64;
    bytes.extend_from_slice(&archive);

    let zip = open(bytes).await;
    assert_eq!(zip.prepended_bytes(), stub);
    assert_eq!(zip.read_by_name("a.txt").await.unwrap(), b"payload");
}

#[tokio::test]
async fn missing_bytes_are_fatal() {
    let archive = build(
        ArchiveOptions::default(),
        vec![("a.txt", "payload".into(), EntryOptions::default())],
    )
    .await;
    let truncated = archive[10..].to_vec();
    let err = ZipExtractor::open(Arc::new(MemoryReader::new(truncated)))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("missing 10 bytes"), "{err}");
}

#[tokio::test]
async fn not_a_zip() {
    let err = ZipExtractor::open(Arc::new(MemoryReader::new(vec![7u8; 4096])))
        .await
        .err()
        .unwrap();
    assert!(err.is_data_error());
    assert!(err.to_string().contains("is this a zip file"), "{err}");
}

#[tokio::test]
async fn encrypted_entries_are_rejected() {
    let mut bytes = build(
        ArchiveOptions::default(),
        vec![("secret.txt", "hunter2".into(), EntryOptions::default())],
    )
    .await;
    // set bit 0 of the flags in the central directory record
    let cd = bytes
        .windows(4)
        .position(|w| w == b"PK\x01\x02")
        .unwrap();
    bytes[cd + 8] |= 1;

    let zip = open(bytes).await;
    let entry = zip.entry("secret.txt").unwrap();
    assert!(entry.is_encrypted());
    let err = zip.read(entry).await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err}");
}

#[tokio::test]
async fn corrupted_data_is_a_crc_mismatch() {
    let mut bytes = build(
        ArchiveOptions::default(),
        vec![(
            "plain.txt",
            "0123456789".into(),
            EntryOptions {
                compression: Some(CompressionMethod::Stored),
                ..Default::default()
            },
        )],
    )
    .await;
    let at = bytes.windows(10).position(|w| w == b"0123456789").unwrap();
    bytes[at + 3] = b'x';

    let zip = open(bytes).await;
    let err = zip.read_by_name("plain.txt").await.unwrap_err();
    assert!(matches!(err, Error::CrcMismatch { .. }), "{err}");
}

#[tokio::test]
async fn metadata_survives_the_round_trip() {
    let modified = DosDateTime::from_parts(2021, 7, 14, 9, 30, 12);
    let bytes = build(
        ArchiveOptions {
            platform: Platform::Unix,
            comment: "archive comment".into(),
            ..Default::default()
        },
        vec![
            (
                "bin/tool.sh",
                "#!/bin/sh\n".into(),
                EntryOptions {
                    modified: Some(modified),
                    unix_permissions: Some(0o755),
                    comment: "entry comment".into(),
                    ..Default::default()
                },
            ),
            ("ünïcode/名前.txt", "utf8".into(), EntryOptions::default()),
        ],
    )
    .await;

    let zip = open(bytes).await;
    assert_eq!(zip.comment(), "archive comment");
    let tool = zip.entry("bin/tool.sh").unwrap();
    assert_eq!(tool.platform(), Platform::Unix);
    assert_eq!(tool.unix_permissions(), Some(0o100755));
    assert_eq!(tool.mod_date(), (2021, 7, 14));
    assert_eq!(tool.mod_time(), (9, 30, 12));
    assert_eq!(tool.comment, "entry comment");

    let folder = zip.entry("bin/").unwrap();
    assert!(folder.is_directory);
    assert_eq!(folder.unix_permissions(), Some(0o040755));

    let named = zip.entry("ünïcode/名前.txt").unwrap();
    assert_eq!(named.flags & zipstream::zip::FLAG_UTF8, zipstream::zip::FLAG_UTF8);
    assert_eq!(zip.read(named).await.unwrap(), b"utf8");
}

#[tokio::test]
async fn unicode_extra_fields_carry_the_real_name() {
    let bytes = build(
        ArchiveOptions {
            unicode_extra_fields: true,
            ..Default::default()
        },
        vec![("café.txt", "coffee".into(), EntryOptions::default())],
    )
    .await;
    let zip = open(bytes).await;
    let entry = zip.entry("café.txt").unwrap();
    assert_eq!(entry.raw_name, b"caf_.txt");
    assert_eq!(entry.flags & zipstream::zip::FLAG_UTF8, 0);
    assert_eq!(zip.read(entry).await.unwrap(), b"coffee");
}

#[tokio::test]
async fn archives_are_readable_by_other_tools() {
    // a STORED entry written by hand, as a minimal third-party archive
    let content = b"written elsewhere";
    let crc = crc32fast::hash(content);
    let mut bytes = Vec::new();
    let name = b"other.txt";
    bytes.extend_from_slice(b"PK\x03\x04");
    bytes.extend_from_slice(&[10, 0, 0, 0, 0, 0, 0, 0, 0x21, 0]);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&(content.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(content.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(name);
    bytes.extend_from_slice(content);
    let cd_offset = bytes.len() as u32;
    bytes.extend_from_slice(b"PK\x01\x02");
    bytes.extend_from_slice(&[20, 0, 10, 0, 0, 0, 0, 0, 0, 0, 0x21, 0]);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&(content.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(content.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&[0; 12]);
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(name);
    let cd_size = bytes.len() as u32 - cd_offset;
    bytes.extend_from_slice(b"PK\x05\x06");
    bytes.extend_from_slice(&[0, 0, 0, 0, 1, 0, 1, 0]);
    bytes.extend_from_slice(&cd_size.to_le_bytes());
    bytes.extend_from_slice(&cd_offset.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());

    let zip = open(bytes).await;
    assert_eq!(zip.read_by_name("other.txt").await.unwrap(), content);

    // and our deflate output is plain DEFLATE for everyone else
    let archive = build(
        ArchiveOptions::default(),
        vec![("x.txt", "abc".repeat(1000).into(), EntryOptions::default())],
    )
    .await;
    let zip = open(archive.clone()).await;
    let entry = zip.entry("x.txt").unwrap();
    let start = entry.lfh_offset as usize + 30 + entry.raw_name.len();
    let raw = &archive[start..start + entry.compressed_size as usize];
    let mut out = String::new();
    flate2::read::DeflateDecoder::new(raw)
        .read_to_string(&mut out)
        .unwrap();
    assert_eq!(out, "abc".repeat(1000));
}

#[tokio::test]
async fn local_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.zip");
    let mut writer = ZipWriter::default();
    writer
        .add("docs/readme.md", "# readme\n", EntryOptions::default())
        .unwrap();
    let mut file = tokio::fs::File::create(&path).await.unwrap();
    let written = writer.finish().unwrap().write_to(&mut file).await.unwrap();
    drop(file);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), written);

    let zip = ZipExtractor::open(Arc::new(LocalFileReader::new(&path).unwrap()))
        .await
        .unwrap();
    let target = dir.path().join("extract");
    for entry in zip.entries() {
        zip.extract_to_file(entry, &target.join(&entry.file_name))
            .await
            .unwrap();
    }
    assert_eq!(
        std::fs::read_to_string(target.join("docs/readme.md")).unwrap(),
        "# readme\n"
    );
    assert!(zip.test().await.iter().all(|(_, r)| r.is_ok()));
}

/// Fails after a couple of chunks; records whether it was aborted.
struct Failing {
    left: u32,
    aborted: Arc<std::sync::atomic::AtomicBool>,
}

#[async_trait]
impl Source for Failing {
    async fn produce(&mut self) -> zipstream::Result<Option<Chunk>> {
        if self.left == 0 {
            return Err(Error::Remote("connection reset".into()));
        }
        self.left -= 1;
        Ok(Some(Chunk::new(vec![1u8; 100], 0.0)))
    }

    fn abort(&mut self, _reason: &Error) {
        self.aborted.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Never fails; records whether it was aborted.
struct Watched {
    aborted: Arc<std::sync::atomic::AtomicBool>,
}

#[async_trait]
impl Source for Watched {
    async fn produce(&mut self) -> zipstream::Result<Option<Chunk>> {
        Ok(None)
    }

    fn describe(&self, info: &mut StreamInfo) {
        info.uncompressed_size = Some(0);
    }

    fn abort(&mut self, _reason: &Error) {
        self.aborted.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test]
async fn failing_source_aborts_the_rest() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let first = Arc::new(AtomicBool::new(false));
    let second = Arc::new(AtomicBool::new(false));
    let mut writer = ZipWriter::default();
    writer
        .add("ok.txt", "fine", EntryOptions::default())
        .unwrap();
    writer
        .add(
            "broken.bin",
            EntryData::stream(Failing {
                left: 2,
                aborted: first.clone(),
            }),
            EntryOptions {
                streamed: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
    writer
        .add(
            "later.bin",
            EntryData::stream(Watched {
                aborted: second.clone(),
            }),
            EntryOptions::default(),
        )
        .unwrap();

    let err = writer.finish().unwrap().into_bytes().await.unwrap_err();
    assert!(matches!(err, Error::Remote(_)), "{err}");
    assert!(first.load(Ordering::SeqCst));
    assert!(second.load(Ordering::SeqCst));
}

#[tokio::test]
async fn archive_pipeline_can_be_paused_and_cancelled() {
    let mut writer = ZipWriter::default();
    for i in 0..10 {
        writer
            .add(&format!("f{i}.bin"), pseudo_random(20_000), EntryOptions::default())
            .unwrap();
    }
    let mut task = writer.finish().unwrap().into_pipeline().spawn(1);
    let handle = task.handle();

    let first = task.recv().await.unwrap().unwrap();
    assert!(first.meta.percent > 0.0);
    handle.pause();
    handle.cancel("user gave up");
    handle.resume();

    let mut saw_abort = false;
    while let Some(item) = task.recv().await {
        if let Err(e) = item {
            assert!(matches!(e, Error::Aborted(_)), "{e}");
            saw_abort = true;
        }
    }
    assert!(saw_abort);
}
