//! Error types for the webradio client core

use std::fmt;

/// Result type alias for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Classification reported to the caller's error callback.
///
/// The numeric codes match the ones historically exposed by webradio client
/// libraries, so they can be forwarded as-is through FFI or logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Can't connect to the stream, or the connection dropped
    Unavailable,
    /// Neither MP3 nor Ogg/Vorbis, or the first container header is unreadable
    UnsupportedFormat,
    /// A mandatory header or essential structure is garbage
    CorruptStream,
    /// The caller rejected the requested sample rate / channel count
    InitAudioFailed,
    /// Anything else
    Generic,
}

impl ErrorKind {
    pub fn code(self) -> u8 {
        match self {
            ErrorKind::Unavailable => 1,
            ErrorKind::UnsupportedFormat => 2,
            ErrorKind::CorruptStream => 3,
            ErrorKind::InitAudioFailed => 4,
            ErrorKind::Generic => 255,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::UnsupportedFormat => "unsupported format",
            ErrorKind::CorruptStream => "corrupt stream",
            ErrorKind::InitAudioFailed => "audio init failed",
            ErrorKind::Generic => "generic error",
        };
        f.write_str(name)
    }
}

/// Unrecoverable errors that abort a stream.
///
/// Transient decode anomalies never surface as a `StreamError`: they are
/// logged and skipped by the decoder that saw them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Transport failure before or during streaming
    #[error("stream unavailable: {0}")]
    Unavailable(String),

    /// Content type or container not recognized
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A required header or structure failed to parse
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    /// The audio format callback refused the configuration
    #[error(
        "audio init failed for {sample_rate} Hz / {channels} channel(s) - samplerate/numchannels not supported?"
    )]
    InitAudioFailed { sample_rate: u32, channels: u8 },

    /// The stream URL can't be used
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl StreamError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Unavailable(_) => ErrorKind::Unavailable,
            StreamError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            StreamError::CorruptStream(_) => ErrorKind::CorruptStream,
            StreamError::InitAudioFailed { .. } => ErrorKind::InitAudioFailed,
            StreamError::InvalidUrl(_) | StreamError::Generic(_) => ErrorKind::Generic,
        }
    }

    /// Numeric code of [`kind`](Self::kind)
    pub fn code(&self) -> u8 {
        self.kind().code()
    }
}
