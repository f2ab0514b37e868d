//! Ogg/Vorbis decode state machine.
//!
//! A logical Vorbis stream starts with three header packets (identification,
//! comment, setup) followed by audio packets. Radio servers chain logical
//! streams back to back, typically one per song, so after an end-of-stream
//! page the decoder goes back to [`Stage::Uninit`] and bootstraps again from
//! the next beginning-of-stream page.

use lewton::{
    audio::{read_audio_packet_generic, AudioReadError, PreviousWindowRight},
    header::{
        read_header_comment, read_header_ident, read_header_setup, HeaderReadError, IdentHeader,
        SetupHeader,
    },
};
use tracing::{debug, trace, warn};

use crate::{
    decoder::{
        ogg::{LogicalStream, OggError, OggPage, OggSync, PacketOut, PageOut},
        Output,
    },
    error::{Result, StreamError},
    pcm::{interleave_f32, AudioFormat},
};

/// Errors reported by a [`VorbisCodec`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid Vorbis header: {0}")]
    Header(String),
    #[error("Vorbis header out of order: {0}")]
    OutOfOrder(&'static str),
    #[error("Vorbis synthesis failed: {0}")]
    Synthesis(String),
}

impl From<HeaderReadError> for CodecError {
    fn from(err: HeaderReadError) -> Self {
        CodecError::Header(err.to_string())
    }
}

impl From<AudioReadError> for CodecError {
    fn from(err: AudioReadError) -> Self {
        CodecError::Synthesis(err.to_string())
    }
}

/// Parameters from the identification header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VorbisInfo {
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate_nominal: i32,
}

/// Content of the comment header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VorbisComment {
    pub vendor: String,
    pub comments: Vec<(String, String)>,
}

impl VorbisComment {
    /// First value of `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.comments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// `"artist - title"`, or whichever of the two is present.
    pub fn title(&self) -> Option<String> {
        match (self.get("ARTIST"), self.get("TITLE")) {
            (Some(artist), Some(title)) => Some(format!("{artist} - {title}")),
            (Some(artist), None) => Some(artist.to_string()),
            (None, Some(title)) => Some(title.to_string()),
            (None, None) => None,
        }
    }
}

/// Vorbis packet decoder used by [`OggVorbisDecoder`].
///
/// Headers are submitted in order; [`reset`](Self::reset) forgets them so a
/// chained logical stream can start over.
pub trait VorbisCodec {
    fn info_header(&mut self, packet: &[u8]) -> std::result::Result<VorbisInfo, CodecError>;

    fn comment_header(&mut self, packet: &[u8]) -> std::result::Result<VorbisComment, CodecError>;

    fn setup_header(&mut self, packet: &[u8]) -> std::result::Result<(), CodecError>;

    /// Decodes one audio packet into planar float samples (one `Vec` per channel).
    fn synthesize(&mut self, packet: &[u8]) -> std::result::Result<Vec<Vec<f32>>, CodecError>;

    fn reset(&mut self);
}

/// [`VorbisCodec`] backed by `lewton`.
pub struct LewtonCodec {
    ident: Option<IdentHeader>,
    setup: Option<SetupHeader>,
    pwr: PreviousWindowRight,
}

impl LewtonCodec {
    pub fn new() -> Self {
        Self {
            ident: None,
            setup: None,
            pwr: PreviousWindowRight::new(),
        }
    }
}

impl Default for LewtonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl VorbisCodec for LewtonCodec {
    fn info_header(&mut self, packet: &[u8]) -> std::result::Result<VorbisInfo, CodecError> {
        let ident = read_header_ident(packet)?;
        let info = VorbisInfo {
            sample_rate: ident.audio_sample_rate,
            channels: ident.audio_channels,
            bitrate_nominal: ident.bitrate_nominal,
        };
        self.ident = Some(ident);
        Ok(info)
    }

    fn comment_header(&mut self, packet: &[u8]) -> std::result::Result<VorbisComment, CodecError> {
        let header = read_header_comment(packet)?;
        Ok(VorbisComment {
            vendor: header.vendor,
            comments: header.comment_list,
        })
    }

    fn setup_header(&mut self, packet: &[u8]) -> std::result::Result<(), CodecError> {
        let ident = self
            .ident
            .as_ref()
            .ok_or(CodecError::OutOfOrder("setup before identification"))?;
        let setup = read_header_setup(
            packet,
            ident.audio_channels,
            (ident.blocksize_0, ident.blocksize_1),
        )?;
        self.setup = Some(setup);
        self.pwr = PreviousWindowRight::new();
        Ok(())
    }

    fn synthesize(&mut self, packet: &[u8]) -> std::result::Result<Vec<Vec<f32>>, CodecError> {
        let (Some(ident), Some(setup)) = (self.ident.as_ref(), self.setup.as_ref()) else {
            return Err(CodecError::OutOfOrder("audio before setup"));
        };
        let planes: Vec<Vec<f32>> =
            read_audio_packet_generic(ident, setup, packet, &mut self.pwr)?;
        Ok(planes)
    }

    fn reset(&mut self) {
        self.ident = None;
        self.setup = None;
        self.pwr = PreviousWindowRight::new();
    }
}

/// Bootstrap progress of the current logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the first page of a logical stream
    Uninit,
    /// Identification header parsed
    InfoHeader,
    /// Comment header parsed
    CommentHeader,
    /// Setup header parsed, output format not yet negotiated
    SetupHeader,
    Streaming,
}

enum Step {
    Continue,
    NeedData,
}

enum Pull {
    Packet(Vec<u8>),
    Gap,
    NeedData,
    EndOfStream,
}

pub struct OggVorbisDecoder {
    stage: Stage,
    sync: OggSync,
    stream: Option<LogicalStream>,
    codec: Box<dyn VorbisCodec + Send>,
    info: Option<VorbisInfo>,
    comment: Option<VorbisComment>,
    pcm: Vec<i16>,
    logical_streams: u64,
}

impl OggVorbisDecoder {
    pub fn new(codec: Box<dyn VorbisCodec + Send>, max_sync_search: usize) -> Self {
        Self {
            stage: Stage::Uninit,
            sync: OggSync::new(max_sync_search),
            stream: None,
            codec,
            info: None,
            comment: None,
            pcm: Vec::new(),
            logical_streams: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Number of logical streams whose headers were fully read.
    pub fn logical_streams(&self) -> u64 {
        self.logical_streams
    }

    /// Feeds container bytes, emitting every sample block they complete.
    ///
    /// Returns `Ok` when more data is needed; the partial page, packet and
    /// stage are kept for the next call.
    pub(crate) fn decode(&mut self, data: &[u8], out: &mut Output<'_>) -> Result<()> {
        self.sync.write(data);
        loop {
            let step = match self.stage {
                Stage::Uninit => self.read_info_header()?,
                Stage::InfoHeader => self.read_comment_header()?,
                Stage::CommentHeader => self.read_setup_header()?,
                Stage::SetupHeader => self.start_streaming(out)?,
                Stage::Streaming => self.decode_packet(out)?,
            };
            if let Step::NeedData = step {
                return Ok(());
            }
        }
    }

    /// Releases the codec and logical stream; buffered bytes are dropped too.
    pub fn shutdown(&mut self) {
        self.end_logical_stream();
        self.sync.reset();
        self.pcm = Vec::new();
    }

    fn read_info_header(&mut self) -> Result<Step> {
        if self.stream.is_none() {
            let page = match next_page(&mut self.sync) {
                Ok(Some(page)) => page,
                Ok(None) => return Ok(Step::NeedData),
                Err(err) => return Err(StreamError::UnsupportedFormat(err.to_string())),
            };
            if !page.is_bos() {
                trace!(serial = page.serial, "First Ogg page lacks the BOS flag");
            }
            let mut stream = LogicalStream::new(page.serial);
            stream
                .page_in(&page)
                .map_err(|err| StreamError::UnsupportedFormat(err.to_string()))?;
            self.stream = Some(stream);
        }

        let packet = match self.pull().map_err(unsupported)? {
            Pull::Packet(packet) => packet,
            Pull::NeedData => return Ok(Step::NeedData),
            Pull::Gap | Pull::EndOfStream => {
                return Err(StreamError::UnsupportedFormat(
                    "Error while reading first Ogg packet (probably not Ogg/Vorbis)".into(),
                ))
            }
        };
        let info = self.codec.info_header(&packet).map_err(|err| {
            StreamError::UnsupportedFormat(format!(
                "Error while reading Vorbis identification header (probably not Ogg/Vorbis): {err}"
            ))
        })?;
        debug!(
            rate = info.sample_rate,
            channels = info.channels,
            bitrate = info.bitrate_nominal,
            "Vorbis identification header"
        );
        self.info = Some(info);
        self.stage = Stage::InfoHeader;
        Ok(Step::Continue)
    }

    fn read_comment_header(&mut self) -> Result<Step> {
        let Some(packet) = self.pull_header("comment")? else {
            return Ok(Step::NeedData);
        };
        let comment = self
            .codec
            .comment_header(&packet)
            .map_err(|err| corrupt(&err))?;
        trace!(vendor = %comment.vendor, count = comment.comments.len(), "Vorbis comment header");
        self.comment = Some(comment);
        self.stage = Stage::CommentHeader;
        Ok(Step::Continue)
    }

    fn read_setup_header(&mut self) -> Result<Step> {
        let Some(packet) = self.pull_header("setup")? else {
            return Ok(Step::NeedData);
        };
        self.codec
            .setup_header(&packet)
            .map_err(|err| corrupt(&err))?;
        self.stage = Stage::SetupHeader;
        Ok(Step::Continue)
    }

    fn start_streaming(&mut self, out: &mut Output<'_>) -> Result<Step> {
        let info = self
            .info
            .ok_or_else(|| StreamError::CorruptStream("Vorbis setup without identification".into()))?;

        if let Some(title) = self.comment.as_ref().and_then(VorbisComment::title) {
            out.title(&title);
        }
        out.ensure_format(AudioFormat::new(info.sample_rate, info.channels))?;

        self.pcm = Vec::with_capacity(out.block_samples());
        self.logical_streams += 1;
        self.stage = Stage::Streaming;
        Ok(Step::Continue)
    }

    fn decode_packet(&mut self, out: &mut Output<'_>) -> Result<Step> {
        match self.pull().map_err(corrupt_ogg)? {
            Pull::Packet(packet) => {
                match self.codec.synthesize(&packet) {
                    Ok(planes) => self.emit(&planes, out),
                    Err(err) => warn!("Skipping Vorbis packet: {}", err),
                }
                Ok(Step::Continue)
            }
            Pull::Gap => {
                debug!("Ogg page loss, continuing with next packet");
                Ok(Step::Continue)
            }
            Pull::NeedData => Ok(Step::NeedData),
            Pull::EndOfStream => {
                self.end_logical_stream();
                Ok(Step::Continue)
            }
        }
    }

    fn emit(&mut self, planes: &[Vec<f32>], out: &mut Output<'_>) {
        let channels = planes.len();
        let Some(frames) = planes.iter().map(Vec::len).min() else {
            return;
        };
        let per_block = (out.block_samples() / channels).max(1);

        let mut offset = 0;
        while offset < frames {
            let count = per_block.min(frames - offset);
            interleave_f32(planes, offset, count, &mut self.pcm);
            out.play(&self.pcm);
            offset += count;
        }
    }

    /// Next header packet; loss or early end of stream is fatal here.
    fn pull_header(&mut self, which: &str) -> Result<Option<Vec<u8>>> {
        match self.pull().map_err(corrupt_ogg)? {
            Pull::Packet(packet) => Ok(Some(packet)),
            Pull::NeedData => Ok(None),
            Pull::Gap => Err(StreamError::CorruptStream(format!(
                "Ogg page lost before Vorbis {which} header"
            ))),
            Pull::EndOfStream => Err(StreamError::CorruptStream(format!(
                "logical stream ended before Vorbis {which} header"
            ))),
        }
    }

    fn pull(&mut self) -> std::result::Result<Pull, OggError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Pull::EndOfStream);
        };
        loop {
            match stream.packet_out() {
                PacketOut::Packet(packet) => return Ok(Pull::Packet(packet)),
                PacketOut::Gap => return Ok(Pull::Gap),
                PacketOut::NeedMore if stream.is_eos() => return Ok(Pull::EndOfStream),
                PacketOut::NeedMore => {}
            }
            let Some(page) = next_page(&mut self.sync)? else {
                return Ok(Pull::NeedData);
            };
            if let Err(err) = stream.page_in(&page) {
                trace!("Ignoring page: {}", err);
            }
        }
    }

    fn end_logical_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!(serial = stream.serial(), "Ogg logical stream ended");
        }
        self.codec.reset();
        self.info = None;
        self.comment = None;
        self.stage = Stage::Uninit;
    }
}

fn next_page(sync: &mut OggSync) -> std::result::Result<Option<OggPage>, OggError> {
    loop {
        match sync.page_out()? {
            PageOut::Page(page) => return Ok(Some(page)),
            PageOut::NeedMore => return Ok(None),
            PageOut::Skipped(n) => trace!(bytes = n, "Skipped bytes while looking for Ogg page"),
        }
    }
}

fn unsupported(err: OggError) -> StreamError {
    StreamError::UnsupportedFormat(err.to_string())
}

fn corrupt_ogg(err: OggError) -> StreamError {
    StreamError::CorruptStream(err.to_string())
}

fn corrupt(err: &CodecError) -> StreamError {
    StreamError::CorruptStream(err.to_string())
}
