//! Tunables of a [`Stream`](crate::Stream).
//!
//! Every field has a default matching what webradio servers expect in
//! practice, so `StreamSettings::default()` is a working configuration.
//! The settings can also be read from the `webradio` section of the
//! `pmoconfig` YAML file (see [`WebRadioConfigExt`](crate::WebRadioConfigExt)).

use serde::Deserialize;

/// Capacity of the in-body ICY header buffer (one byte is kept for a terminator)
pub const DEFAULT_HEADER_BUFFER_SIZE: usize = 8192;

/// Maximum number of samples (all channels) handed to the caller at once
pub const DEFAULT_DECODE_BUFFER_SAMPLES: usize = 4096;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u8 = 2;

/// Maximum number of garbage bytes skipped before the first Ogg page.
pub const DEFAULT_MAX_SYNC_SEARCH: usize = 64 * 1024;

pub const DEFAULT_USER_AGENT: &str = concat!("pmowebradio/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Size of the chunks read from the HTTP body (16 KB).
pub const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub header_buffer_size: usize,
    pub decode_buffer_samples: usize,
    pub default_sample_rate: u32,
    pub default_channels: u8,
    pub max_sync_search: usize,
    pub http: HttpSettings,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            header_buffer_size: DEFAULT_HEADER_BUFFER_SIZE,
            decode_buffer_samples: DEFAULT_DECODE_BUFFER_SAMPLES,
            default_sample_rate: DEFAULT_SAMPLE_RATE,
            default_channels: DEFAULT_CHANNELS,
            max_sync_search: DEFAULT_MAX_SYNC_SEARCH,
            http: HttpSettings::default(),
        }
    }
}

impl StreamSettings {
    /// Checks the values a stream can't work without.
    pub fn validate(&self) -> Result<(), String> {
        if self.header_buffer_size < 2 {
            return Err("header buffer must hold at least 2 bytes".into());
        }
        if self.decode_buffer_samples < 2 {
            return Err("decode buffer must hold at least 2 samples".into());
        }
        if self.default_sample_rate == 0 {
            return Err("default sample rate must be greater than 0".into());
        }
        if self.default_channels == 0 {
            return Err("default channel count must be greater than 0".into());
        }
        if self.http.read_chunk_size == 0 {
            return Err("HTTP read chunk size must be greater than 0".into());
        }
        Ok(())
    }
}

/// Settings used by the blocking HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub max_redirects: u32,
    /// Send `Icy-MetaData: 1` so the server interleaves title updates
    pub request_icy_metadata: bool,
    pub read_chunk_size: usize,
    pub connect_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            request_icy_metadata: true,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}
