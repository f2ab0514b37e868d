//! Caller-side callback surface.
//!
//! Everything a [`Stream`](crate::Stream) produces reaches the caller through a
//! [`StreamHandler`]. All methods are invoked synchronously from inside
//! [`Stream::ingest`](crate::Stream::ingest) and must not feed the stream
//! again.

use crate::{error::StreamError, pcm::AudioFormat};

/// Station information decoded from the HTTP or in-body ICY headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationInfo {
    pub name: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl StationInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.genre.is_none()
            && self.description.is_none()
            && self.url.is_none()
    }
}

/// Receives decoded audio and metadata from a stream.
pub trait StreamHandler {
    /// Interleaved signed 16-bit samples in the last announced format.
    ///
    /// `samples.len()` counts samples over all channels.
    fn samples(&mut self, samples: &[i16]);

    /// Called before the first samples and whenever the sample rate or the
    /// channel count changes. Return `false` to abort the stream.
    fn audio_format(&mut self, format: AudioFormat) -> bool;

    /// Called once per connection, when playback starts.
    fn station_info(&mut self, _info: &StationInfo) {}

    /// Called for every title update sent by the server.
    fn current_title(&mut self, _title: &str) {}

    /// Called at most once per connection, right before the stream is torn down.
    fn error(&mut self, _error: &StreamError) {}

    /// `false` puts the stream in metadata-only mode: it stops right after
    /// reporting the station info.
    fn wants_audio(&self) -> bool {
        true
    }
}

impl<H: StreamHandler + ?Sized> StreamHandler for Box<H> {
    fn samples(&mut self, samples: &[i16]) {
        (**self).samples(samples)
    }

    fn audio_format(&mut self, format: AudioFormat) -> bool {
        (**self).audio_format(format)
    }

    fn station_info(&mut self, info: &StationInfo) {
        (**self).station_info(info)
    }

    fn current_title(&mut self, title: &str) {
        (**self).current_title(title)
    }

    fn error(&mut self, error: &StreamError) {
        (**self).error(error)
    }

    fn wants_audio(&self) -> bool {
        (**self).wants_audio()
    }
}

type SamplesFn = Box<dyn FnMut(&[i16]) + Send>;
type FormatFn = Box<dyn FnMut(AudioFormat) -> bool + Send>;
type StationFn = Box<dyn FnMut(&StationInfo) + Send>;
type TitleFn = Box<dyn FnMut(&str) + Send>;
type ErrorFn = Box<dyn FnMut(&StreamError) + Send>;

/// Closure-based [`StreamHandler`].
///
/// Every callback is optional. Playback is only enabled when both the sample
/// and the audio-format callbacks are set; otherwise the stream runs in
/// metadata-only mode.
///
/// ```
/// use pmowebradio::Callbacks;
///
/// let handler = Callbacks::new()
///     .on_station_info(|info| println!("Station: {:?}", info.name))
///     .on_title(|title| println!("Now playing: {title}"));
/// ```
#[derive(Default)]
pub struct Callbacks {
    samples: Option<SamplesFn>,
    audio_format: Option<FormatFn>,
    station_info: Option<StationFn>,
    title: Option<TitleFn>,
    error: Option<ErrorFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets both playback callbacks at once.
    pub fn with_playback<S, F>(samples: S, audio_format: F) -> Self
    where
        S: FnMut(&[i16]) + Send + 'static,
        F: FnMut(AudioFormat) -> bool + Send + 'static,
    {
        Self::new().on_samples(samples).on_audio_format(audio_format)
    }

    pub fn on_samples(mut self, f: impl FnMut(&[i16]) + Send + 'static) -> Self {
        self.samples = Some(Box::new(f));
        self
    }

    pub fn on_audio_format(mut self, f: impl FnMut(AudioFormat) -> bool + Send + 'static) -> Self {
        self.audio_format = Some(Box::new(f));
        self
    }

    pub fn on_station_info(mut self, f: impl FnMut(&StationInfo) + Send + 'static) -> Self {
        self.station_info = Some(Box::new(f));
        self
    }

    pub fn on_title(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.title = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&StreamError) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}

impl StreamHandler for Callbacks {
    fn samples(&mut self, samples: &[i16]) {
        if let Some(f) = self.samples.as_mut() {
            f(samples);
        }
    }

    fn audio_format(&mut self, format: AudioFormat) -> bool {
        match self.audio_format.as_mut() {
            Some(f) => f(format),
            None => false,
        }
    }

    fn station_info(&mut self, info: &StationInfo) {
        if let Some(f) = self.station_info.as_mut() {
            f(info);
        }
    }

    fn current_title(&mut self, title: &str) {
        if let Some(f) = self.title.as_mut() {
            f(title);
        }
    }

    fn error(&mut self, error: &StreamError) {
        if let Some(f) = self.error.as_mut() {
            f(error);
        }
    }

    fn wants_audio(&self) -> bool {
        self.samples.is_some() && self.audio_format.is_some()
    }
}
