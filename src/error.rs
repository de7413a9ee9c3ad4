//! Error types shared by the codec, pipeline and archive layers.
//!
//! Every fallible operation in the library returns [`Result<T>`]. The variants
//! fall into four families:
//!
//! | Family | Variants |
//! |--------|----------|
//! | Configuration | [`Config`][Error::Config] |
//! | Data | [`Data`][Error::Data], [`CrcMismatch`][Error::CrcMismatch], [`Unsupported`][Error::Unsupported] |
//! | Buffer | [`NeedInput`][Error::NeedInput] |
//! | I/O | [`Io`][Error::Io], [`Http`][Error::Http], [`Remote`][Error::Remote] |
//!
//! `NeedInput` is the only recoverable variant: the decoder keeps its state and
//! the same call can be retried once more bytes are available.

use std::io;

/// The error type for compression, pipeline and archive operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid compression parameters, reported when a codec is created.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed compressed data or archive structure.
    #[error("{0}")]
    Data(String),

    /// Checksum of the decoded bytes does not match the recorded value.
    #[error("CRC32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// The compressed stream ended before its final block.
    #[error("need more input")]
    NeedInput,

    /// The archive uses a feature this crate does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The API was used out of order.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The stream was cancelled, or torn down because a sibling stream failed.
    #[error("aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A remote source answered, but not in a usable way.
    #[error("remote source: {0}")]
    Remote(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Returns `true` for malformed or corrupted input.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Error::Data(_) | Error::CrcMismatch { .. } | Error::Unsupported(_)
        )
    }

    /// Returns `true` if the operation can be resumed by supplying more input.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NeedInput)
    }

    /// Returns `true` for failures of the underlying byte source or sink.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Http(_) | Error::Remote(_))
    }

    /// Produces an owned copy suitable for fanning one failure out to several
    /// listeners. I/O errors keep their kind; everything else keeps its text.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Error::Config(m) => Error::Config(m.clone()),
            Error::Data(m) => Error::Data(m.clone()),
            Error::CrcMismatch { expected, actual } => Error::CrcMismatch {
                expected: *expected,
                actual: *actual,
            },
            Error::NeedInput => Error::NeedInput,
            Error::Unsupported(m) => Error::Unsupported(m.clone()),
            Error::InvalidState(m) => Error::InvalidState(m),
            Error::Aborted(m) => Error::Aborted(m.clone()),
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Http(e) => Error::Remote(e.to_string()),
            Error::Remote(m) => Error::Remote(m.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Error::data("bad").is_data_error());
        assert!(Error::CrcMismatch { expected: 1, actual: 2 }.is_data_error());
        assert!(Error::NeedInput.is_recoverable());
        assert!(!Error::NeedInput.is_data_error());
        assert!(Error::Io(io::Error::other("x")).is_io_error());
    }

    #[test]
    fn crc_message_is_hex() {
        let e = Error::CrcMismatch {
            expected: 0xdeadbeef,
            actual: 0x1,
        };
        assert_eq!(
            e.to_string(),
            "CRC32 mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }

    #[test]
    fn duplicate_keeps_io_kind() {
        let e = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        match e.duplicate() {
            Error::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {other:?}"),
        }
    }
}
