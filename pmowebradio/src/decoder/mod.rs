//! Content dispatcher and format decoders.
//!
//! The dispatcher is a plain enum: the content type recorded from the headers
//! picks the variant when the first audio bytes arrive, and every later
//! delivery is routed with a `match`.

pub mod mp3;
pub mod ogg;
pub mod vorbis;

use tracing::debug;

use crate::{
    error::{Result, StreamError},
    handler::StreamHandler,
    headers::ContentType,
    pcm::AudioFormat,
    settings::StreamSettings,
    stream::StreamCounters,
};

use self::{
    mp3::{MiniMp3Backend, Mp3Backend, Mp3Decoder},
    vorbis::{LewtonCodec, OggVorbisDecoder, VorbisCodec},
};

/// Factories for the external codecs.
///
/// Tests swap them for scripted fakes; the defaults are `minimp3` and `lewton`.
#[derive(Clone, Copy)]
pub struct Backends {
    pub mp3: fn() -> Box<dyn Mp3Backend + Send>,
    pub vorbis: fn() -> Box<dyn VorbisCodec + Send>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            mp3: || Box::new(MiniMp3Backend::new()),
            vorbis: || Box::new(LewtonCodec::new()),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Active decoder of a stream.
#[derive(Default)]
pub enum Decoder {
    /// No audio seen yet
    #[default]
    Idle,
    Mp3(Mp3Decoder),
    OggVorbis(OggVorbisDecoder),
    /// Always fails; carries the offending content type
    Unsupported(String),
}

impl Decoder {
    /// Picks the decoder for `content_type`.
    pub fn select(
        content_type: Option<&ContentType>,
        backends: &Backends,
        settings: &StreamSettings,
    ) -> Self {
        let decoder = match content_type {
            Some(ContentType::Mp3) => Decoder::Mp3(Mp3Decoder::new(
                (backends.mp3)(),
                AudioFormat::new(settings.default_sample_rate, settings.default_channels),
            )),
            Some(ContentType::OggVorbis) => Decoder::OggVorbis(OggVorbisDecoder::new(
                (backends.vorbis)(),
                settings.max_sync_search,
            )),
            Some(ContentType::Unsupported(value)) => Decoder::Unsupported(value.clone()),
            None => Decoder::Unsupported("no content type".into()),
        };
        debug!(decoder = decoder.name(), "Selected decoder");
        decoder
    }

    pub fn name(&self) -> &'static str {
        match self {
            Decoder::Idle => "idle",
            Decoder::Mp3(_) => "mp3",
            Decoder::OggVorbis(_) => "ogg/vorbis",
            Decoder::Unsupported(_) => "unsupported",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Decoder::Idle)
    }

    pub(crate) fn decode(&mut self, data: &[u8], out: &mut Output<'_>) -> Result<()> {
        match self {
            Decoder::Idle => Ok(()),
            Decoder::Mp3(decoder) => decoder.decode(data, out),
            Decoder::OggVorbis(decoder) => decoder.decode(data, out),
            Decoder::Unsupported(value) => Err(StreamError::UnsupportedFormat(format!(
                "unknown content type: {value}"
            ))),
        }
    }

    /// Releases format resources and goes back to [`Decoder::Idle`].
    pub fn shutdown(&mut self) {
        if let Decoder::OggVorbis(decoder) = self {
            decoder.shutdown();
        }
        *self = Decoder::Idle;
    }
}

/// Where decoders send their output.
pub(crate) struct Output<'a> {
    handler: &'a mut dyn StreamHandler,
    format: &'a mut Option<AudioFormat>,
    counters: &'a mut StreamCounters,
    block_samples: usize,
}

impl<'a> Output<'a> {
    pub(crate) fn new(
        handler: &'a mut dyn StreamHandler,
        format: &'a mut Option<AudioFormat>,
        counters: &'a mut StreamCounters,
        block_samples: usize,
    ) -> Self {
        Self {
            handler,
            format,
            counters,
            block_samples,
        }
    }

    /// Largest sample block (all channels) a decoder may emit.
    pub(crate) fn block_samples(&self) -> usize {
        self.block_samples
    }

    /// Announces `format` unless it is already active.
    pub(crate) fn ensure_format(&mut self, format: AudioFormat) -> Result<()> {
        if *self.format == Some(format) {
            return Ok(());
        }
        debug!(
            rate = format.sample_rate,
            channels = format.channels,
            "Audio format change"
        );
        if !self.handler.audio_format(format) {
            return Err(StreamError::InitAudioFailed {
                sample_rate: format.sample_rate,
                channels: format.channels,
            });
        }
        *self.format = Some(format);
        Ok(())
    }

    pub(crate) fn play(&mut self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        self.counters.sample_blocks += 1;
        self.counters.samples += samples.len() as u64;
        self.handler.samples(samples);
    }

    pub(crate) fn title(&mut self, title: &str) {
        self.handler.current_title(title);
    }
}
