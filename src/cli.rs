use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zipstream")]
#[command(version)]
#[command(about = "A streaming zip/unzip utility with HTTP URL support", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipstream data1.zip -x joe        extract all files except joe from data1.zip\n  \
  zipstream -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  zipstream -t foo.zip              test every entry of foo.zip\n  \
  zipstream -c out.zip src docs     create out.zip from the src and docs trees\n  \
  zipstream -l https://example.com/archive.zip   list files from remote ZIP")]
pub struct Cli {
    /// ZIP file path or HTTP URL (the archive to write with -c)
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all), or inputs with -c
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Test archive integrity
    #[arg(short = 't', conflicts_with_all = ["list", "pipe", "create"])]
    pub test: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Create archive FILE from FILES (directories are added recursively)
    #[arg(short = 'c', conflicts_with_all = ["list", "pipe"])]
    pub create: bool,

    /// Compression level for -c, 0 (store) to 9 (best)
    #[arg(short = 'L', long = "level", value_name = "N", default_value_t = 6,
          value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: u32,

    /// With -c, stream entries behind data descriptors
    #[arg(long = "stream", requires = "create")]
    pub stream: bool,

    /// With -c, always write ZIP64 records
    #[arg(long = "zip64", requires = "create")]
    pub zip64: bool,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default `env_logger` filter; `RUST_LOG` takes precedence.
    pub fn log_filter(&self) -> &'static str {
        if self.is_very_quiet() {
            "off"
        } else if self.is_quiet() {
            "error"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_flags() {
        let cli = Cli::parse_from(["zipstream", "-c", "-L", "9", "--zip64", "out.zip", "a", "b"]);
        assert!(cli.create && cli.zip64 && !cli.stream);
        assert_eq!(cli.level, 9);
        assert_eq!(cli.files, ["a", "b"]);
    }

    #[test]
    fn level_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["zipstream", "-c", "-L", "12", "out.zip"]).is_err());
        assert!(Cli::try_parse_from(["zipstream", "--stream", "in.zip"]).is_err());
    }

    #[test]
    fn quiet_levels() {
        assert_eq!(Cli::parse_from(["zipstream", "a.zip"]).log_filter(), "warn");
        assert_eq!(Cli::parse_from(["zipstream", "-q", "a.zip"]).log_filter(), "error");
        assert_eq!(Cli::parse_from(["zipstream", "-qq", "a.zip"]).log_filter(), "off");
        assert_eq!(Cli::parse_from(["zipstream", "-p", "a.zip"]).log_filter(), "error");
    }
}
