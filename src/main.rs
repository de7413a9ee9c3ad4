//! Main entry point for the zipstream CLI application.
//!
//! This binary provides a command-line interface for listing, testing and
//! extracting ZIP files from both local filesystem and remote HTTP URLs, and
//! for creating new archives.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use zipstream::pipeline::ReaderSource;
use zipstream::zip::{
    ArchiveOptions, CompressionMethod, DosDateTime, EntryData, EntryOptions, Platform,
};
use zipstream::{
    Cli, HttpRangeReader, LocalFileReader, ReadAt, ZipExtractor, ZipFileEntry, ZipWriter,
};

/// Application entry point.
///
/// Parses command-line arguments and dispatches to the appropriate handler
/// based on the mode and on whether the input is a local file or HTTP URL.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .format_timestamp(None)
        .init();

    if cli.create {
        return create_archive(&cli).await;
    }

    if cli.is_http_url() {
        // Handle remote ZIP file via HTTP Range requests
        let reader = HttpRangeReader::new(cli.file.clone())
            .await
            .with_context(|| format!("cannot open {}", cli.file))?;
        let transferred_before = reader.transferred_bytes();
        let reader = Arc::new(reader);

        process_zip(reader.clone(), &cli).await?;

        // Display network transfer statistics for HTTP sources
        if !cli.is_quiet() {
            let transferred = reader.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        // Handle local ZIP file
        let reader = LocalFileReader::new(Path::new(&cli.file))
            .with_context(|| format!("cannot open {}", cli.file))?;
        process_zip(Arc::new(reader), &cli).await?;
    }

    Ok(())
}

/// Process a ZIP archive based on CLI options.
///
/// This function handles listing, testing and extraction modes:
/// - List mode (`-l` or `-v`): Display archive contents
/// - Test mode (`-t`): Decompress every entry and check its CRC32
/// - Extract mode: Extract files matching the specified filters
///
/// # Arguments
///
/// * `reader` - A reader implementing the `ReadAt` trait for random access
/// * `cli` - Parsed command-line arguments
///
/// # Returns
///
/// Returns `Ok(())` on success, or an error if processing fails.
async fn process_zip<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let extractor = ZipExtractor::open(reader)
        .await
        .with_context(|| format!("cannot read {}", cli.file))?;

    if cli.test {
        return test_archive(&extractor, cli).await;
    }

    // List mode: display archive contents and exit
    if cli.list || cli.verbose {
        list_files(&extractor, cli.verbose);
        return Ok(());
    }

    // Apply filters to determine which files to extract:
    // 1. Skip directories (they are created automatically during extraction)
    // 2. If specific files are requested, only include matching entries
    // 3. Exclude files matching the exclusion patterns
    let files_to_extract: Vec<_> = extractor
        .entries()
        .iter()
        .filter(|e| !e.is_directory && selected(e, cli))
        .collect();

    // Extract each matching file
    let multiple_files = cli.pipe && files_to_extract.len() > 1;
    for entry in files_to_extract {
        extract_file(&extractor, entry, cli, multiple_files)
            .await
            .with_context(|| format!("cannot extract {}", entry.file_name))?;
    }

    Ok(())
}

/// Whether an entry passes the positional and `-x` filters.
fn selected(entry: &ZipFileEntry, cli: &Cli) -> bool {
    // If specific files are requested via positional arguments,
    // only include entries that match
    if !cli.files.is_empty() {
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                // Pattern contains wildcards: use glob matching
                glob_match(f, &entry.file_name)
            } else {
                // No wildcards: exact match on filename or full path
                let basename = Path::new(&entry.file_name)
                    .file_name()
                    .map(|s| s.to_string_lossy())
                    .unwrap_or_default();
                entry.file_name == *f || basename == *f
            }
        });
        if !matches {
            return false;
        }
    }

    // Exclude files matching the -x patterns
    !cli
        .exclude
        .iter()
        .any(|x| entry.file_name.contains(x) || glob_match(x, &entry.file_name))
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
///
/// # Arguments
///
/// * `extractor` - The ZIP extractor instance
/// * `verbose` - If true, display detailed information in table format
fn list_files<R: ReadAt + 'static>(extractor: &ZipExtractor<R>, verbose: bool) {
    let entries = extractor.entries();

    if verbose {
        if !extractor.comment().is_empty() {
            println!("{}", extractor.comment());
        }
        // Print table header for verbose output
        println!(
            "{:>10}  {:>6}  {:>10}  {:>5}  {:>10}  {:>5}  {:>8}  Name",
            "Length", "Method", "Size", "Cmpr", "Date", "Time", "CRC-32"
        );
        println!("{}", "-".repeat(86));
    }

    // Track totals for summary line
    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        if verbose {
            // Calculate compression ratio as percentage saved
            let ratio = if entry.uncompressed_size > 0 {
                format!(
                    "{:>4}%",
                    100i64 - (entry.compressed_size * 100 / entry.uncompressed_size) as i64
                )
            } else {
                "  0%".to_string()
            };

            // Print detailed entry information
            println!(
                "{:>10}  {:>6}  {:>10}  {}  {}  {:08x}  {}",
                entry.uncompressed_size,
                entry.compression_method.name(),
                entry.compressed_size,
                ratio,
                entry.modified,
                entry.crc32,
                entry.file_name
            );

            // Accumulate totals (excluding directories)
            if !entry.is_directory {
                total_uncompressed += entry.uncompressed_size;
                total_compressed += entry.compressed_size;
                file_count += 1;
            }
        } else {
            // Simple format: just the file name
            println!("{}", entry.file_name);
        }
    }

    // Print summary line in verbose mode
    if verbose {
        println!("{}", "-".repeat(86));
        let total_ratio = if total_uncompressed > 0 {
            format!(
                "{:>4}%",
                100i64 - (total_compressed * 100 / total_uncompressed) as i64
            )
        } else {
            "  0%".to_string()
        };
        println!(
            "{:>10}  {:>6}  {:>10}  {}  {:>29}  {} files",
            total_uncompressed, "", total_compressed, total_ratio, "", file_count
        );
    }
}

/// Test every entry of the archive, reporting each one.
///
/// # Errors
///
/// Fails if at least one entry is damaged.
async fn test_archive<R: ReadAt + 'static>(extractor: &ZipExtractor<R>, cli: &Cli) -> Result<()> {
    let mut failures = 0usize;
    for (entry, outcome) in extractor.test().await {
        if !selected(entry, cli) {
            continue;
        }
        match outcome {
            Ok(()) => {
                if !cli.is_quiet() {
                    println!("    testing: {:<40}  OK", entry.file_name);
                }
            }
            Err(e) => {
                failures += 1;
                if !cli.is_very_quiet() {
                    println!("    testing: {:<40}  {}", entry.file_name, e);
                }
            }
        }
    }

    if failures > 0 {
        bail!("{} error(s) detected in {}", failures, cli.file);
    }
    if !cli.is_quiet() {
        println!("No errors detected in compressed data of {}.", cli.file);
    }
    Ok(())
}

/// Extract a single file from the archive.
///
/// Handles various extraction options:
/// - Pipe mode (`-p`): Write to stdout instead of file
/// - Custom output directory (`-d`): Extract to specified directory
/// - Junk paths (`-j`): Ignore directory structure in archive
/// - Overwrite control (`-n`, `-o`): Handle existing files
///
/// # Arguments
///
/// * `extractor` - The ZIP extractor instance
/// * `entry` - The ZIP file entry to extract
/// * `cli` - Parsed command-line arguments
/// * `show_filename` - If true, print filename marker before content (for pipe mode with multiple files)
///
/// # Returns
///
/// Returns `Ok(())` on success, or an error if extraction fails.
async fn extract_file<R: ReadAt + 'static>(
    extractor: &ZipExtractor<R>,
    entry: &ZipFileEntry,
    cli: &Cli,
    show_filename: bool,
) -> Result<()> {
    // Pipe mode: write file contents directly to stdout
    if cli.pipe {
        if show_filename {
            use tokio::io::AsyncWriteExt;
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(format!("--- {} ---\n", entry.file_name).as_bytes())
                .await?;
        }
        extractor.extract_to_stdout(entry).await?;
        return Ok(());
    }

    // Junk paths: use only the base filename, ignore directory structure
    let file_name = if cli.junk_paths {
        Path::new(&entry.file_name)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| entry.file_name.clone())
    } else {
        entry.file_name.clone()
    };
    if Path::new(&file_name)
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        bail!("refusing to extract {} outside the target directory", entry.file_name);
    }

    let output_path = match cli.extract_dir {
        Some(ref dir) => PathBuf::from(dir).join(&file_name),
        None => PathBuf::from(&file_name),
    };

    // Handle existing files based on overwrite options
    if output_path.exists() {
        if cli.never_overwrite {
            // -n flag: never overwrite, skip silently (unless quiet)
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.file_name);
            }
            return Ok(());
        }

        if !cli.overwrite {
            // Default behavior: skip with suggestion to use -o
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.file_name);
            }
            return Ok(());
        }
        // -o flag: overwrite without prompting (fall through to extraction)
    }

    // Display extraction progress
    if !cli.is_quiet() {
        println!("  extracting: {}", entry.file_name);
    }

    extractor.extract_to_file(entry, &output_path).await?;

    Ok(())
}

/// Create a new archive from the positional inputs.
///
/// Directories are walked recursively; every file is streamed from disk
/// rather than read into memory first.
async fn create_archive(cli: &Cli) -> Result<()> {
    if cli.files.is_empty() {
        bail!("nothing to add to {}", cli.file);
    }

    let options = ArchiveOptions {
        platform: if cfg!(unix) { Platform::Unix } else { Platform::Dos },
        stream_files: cli.stream,
        compression: if cli.level == 0 {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflate
        },
        level: cli.level,
        force_zip64: cli.zip64,
        ..Default::default()
    };
    let mut writer = ZipWriter::new(options);

    for input in &cli.files {
        for item in WalkDir::new(input).sort_by_file_name() {
            let item = item.with_context(|| format!("cannot walk {input}"))?;
            let Some(name) = archive_name(item.path()) else {
                continue;
            };
            let metadata = item
                .metadata()
                .with_context(|| format!("cannot stat {}", item.path().display()))?;

            let mut entry_options = EntryOptions {
                modified: metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| DosDateTime::from_unix(d.as_secs())),
                dir: metadata.is_dir(),
                ..Default::default()
            };
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                entry_options.unix_permissions = Some(metadata.permissions().mode());
            }

            let data = if metadata.is_dir() {
                EntryData::Bytes(Vec::new())
            } else {
                let file = tokio::fs::File::open(item.path())
                    .await
                    .with_context(|| format!("cannot open {}", item.path().display()))?;
                EntryData::stream(ReaderSource::new(file).expected_len(metadata.len()))
            };

            if !cli.is_quiet() {
                println!("  adding: {name}");
            }
            writer.add(&name, data, entry_options)?;
        }
    }

    let mut out = tokio::fs::File::create(&cli.file)
        .await
        .with_context(|| format!("cannot create {}", cli.file))?;
    let written = writer.finish()?.write_to(&mut out).await?;
    if !cli.is_quiet() {
        eprintln!("{}: {}", cli.file, format_size(written));
    }
    Ok(())
}

/// Name of a filesystem path inside the archive: relative, `/`-separated.
fn archive_name(path: &Path) -> Option<String> {
    let parts: Vec<_> = path
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Check if a pattern contains glob wildcard characters.
///
/// # Arguments
///
/// * `pattern` - The pattern to check
///
/// # Returns
///
/// Returns `true` if the pattern contains `*` or `?` wildcards.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// This is a basic implementation for file matching:
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
///
/// # Arguments
///
/// * `pattern` - The glob pattern to match against
/// * `text` - The text to check for a match
///
/// # Returns
///
/// Returns `true` if the text matches the pattern, `false` otherwise.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star: skip it, or consume one character and keep it
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
