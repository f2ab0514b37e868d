//! # pmowebradio - push-driven webradio client core
//!
//! `pmowebradio` turns the raw body of an internet radio HTTP response into
//! ready-to-play PCM and metadata events:
//!
//! - recognition of SHOUTcast's in-body `ICY 200 OK` header block,
//! - `icy-*` header parsing (station name, genre, URL, description),
//! - removal of the interleaved ICY metadata and `StreamTitle` extraction,
//! - MP3 decoding (`minimp3`) and Ogg/Vorbis demuxing (`lewton`), including
//!   chained Ogg streams,
//! - a one-shot error contract: the first unrecoverable error is reported
//!   once and the stream stops.
//!
//! The core is transport-agnostic: any HTTP client can push header lines and
//! body chunks of any size into a [`Stream`]. With the default `http` feature,
//! [`Stream::run`] does it with a blocking `ureq` client.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pmowebradio::{Callbacks, Stream};
//!
//! let handler = Callbacks::with_playback(
//!     |samples| {
//!         // hand the interleaved i16 samples to the audio device
//!         let _ = samples.len();
//!     },
//!     |format| {
//!         println!("{} Hz, {} channel(s)", format.sample_rate, format.channels);
//!         true
//!     },
//! )
//! .on_station_info(|info| println!("Station: {:?}", info.name))
//! .on_title(|title| println!("Now playing: {title}"))
//! .on_error(|err| eprintln!("Stream error {}: {err}", err.code()));
//!
//! let mut stream = Stream::new("http://radio.example/stream", handler)?;
//! let stop = stream.stop_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(30));
//!     stop.stop();
//! });
//! stream.run()?;
//! # Ok::<(), pmowebradio::StreamError>(())
//! ```
//!
//! ## Feeding a stream yourself
//!
//! ```
//! use pmowebradio::{Callbacks, Flow, Stream};
//!
//! let mut stream = Stream::new("http://radio.example/stream", Callbacks::new())?;
//! stream.handle_header_line(200, b"icy-name: Test Radio");
//! // No playback callbacks: the stream stops right after the station info
//! assert_eq!(stream.ingest(b"\xff\xfb\x90\x00"), Flow::Stop);
//! assert_eq!(stream.station_info().name.as_deref(), Some("Test Radio"));
//! # Ok::<(), pmowebradio::StreamError>(())
//! ```

pub mod config_ext;
pub mod decoder;
pub mod error;
pub mod handler;
pub mod headers;
pub mod icy;
pub mod pcm;
pub mod response;
pub mod settings;
pub mod stream;
#[cfg(feature = "http")]
pub mod transport;

pub use config_ext::WebRadioConfigExt;
pub use decoder::{
    mp3::{Mp3Backend, Mp3Error, Mp3Frame},
    vorbis::{CodecError, VorbisCodec, VorbisComment, VorbisInfo},
    Backends, Decoder,
};
pub use error::{ErrorKind, Result, StreamError};
pub use handler::{Callbacks, StationInfo, StreamHandler};
pub use headers::ContentType;
pub use pcm::AudioFormat;
pub use settings::{HttpSettings, StreamSettings};
pub use stream::{Flow, StopHandle, Stream, StreamCounters, StreamState};
