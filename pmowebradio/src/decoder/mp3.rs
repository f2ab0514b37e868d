//! MP3 decode adapter.
//!
//! MP3 radio streams are plain elementary streams: the bytes after the ICY
//! framing go straight into an MP3 frame decoder through the feed/drain
//! [`Mp3Backend`] contract, and every decoded frame is normalized to the
//! output channel count before it reaches the caller.

use std::{collections::VecDeque, io::Read};

use minimp3::{Decoder as MiniMp3Decoder, Error as MiniMp3Error};
use tracing::{debug, warn};

use crate::{
    decoder::Output,
    error::Result,
    pcm::{mono_to_stereo, AudioFormat},
};

/// Errors reported by an [`Mp3Backend`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Mp3Error {
    #[error("MP3 decode error: {0}")]
    Decode(String),
}

/// One decoded MP3 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp3Frame {
    /// Interleaved samples, `channels` per frame
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Feed/drain MP3 frame decoder.
pub trait Mp3Backend {
    /// Appends compressed bytes to the decoder input.
    fn feed(&mut self, data: &[u8]);

    /// Next decoded frame, or `Ok(None)` when the input holds no complete frame.
    ///
    /// An error consumes the input it was raised for.
    fn drain(&mut self) -> std::result::Result<Option<Mp3Frame>, Mp3Error>;
}

const HEADER_LEN: usize = 4;

/// `[MPEG-1, MPEG-2/2.5][layer III, II, I][bitrate index]`, in units of 2 kbit/s.
const HALF_BITRATES: [[[u8; 15]; 3]; 2] = [
    [
        [0, 4, 8, 12, 16, 20, 24, 28, 32, 40, 48, 56, 64, 72, 80],
        [0, 4, 8, 12, 16, 20, 24, 28, 32, 40, 48, 56, 64, 72, 80],
        [0, 16, 24, 28, 32, 40, 48, 56, 64, 72, 80, 88, 96, 112, 128],
    ],
    [
        [0, 16, 20, 24, 28, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160],
        [0, 16, 24, 28, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192],
        [0, 16, 32, 48, 64, 80, 96, 112, 128, 144, 160, 176, 192, 208, 224],
    ],
];

const SAMPLE_RATES: [u32; 3] = [44_100, 48_000, 32_000];

/// MPEG audio frame header, read only as far as framing needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader([u8; HEADER_LEN]);

impl FrameHeader {
    fn parse(bytes: [u8; HEADER_LEN]) -> Option<Self> {
        let [b0, b1, b2, _] = bytes;
        let sync = b0 == 0xff && (b1 & 0xf0 == 0xf0 || b1 & 0xfe == 0xe2);
        let valid = sync && (b1 >> 1) & 3 != 0 && b2 >> 4 != 15 && (b2 >> 2) & 3 != 3;
        valid.then_some(Self(bytes))
    }

    fn is_mpeg1(self) -> bool {
        self.0[1] & 0x08 != 0
    }

    fn is_mpeg25(self) -> bool {
        self.0[1] & 0x10 == 0
    }

    /// 3 for layer I, 2 for layer II, 1 for layer III
    fn layer_code(self) -> usize {
        ((self.0[1] >> 1) & 3) as usize
    }

    fn is_free_format(self) -> bool {
        self.0[2] & 0xf0 == 0
    }

    fn bitrate_kbps(self) -> u32 {
        let table = &HALF_BITRATES[self.is_mpeg1() as usize][self.layer_code() - 1];
        2 * table[(self.0[2] >> 4) as usize] as u32
    }

    fn sample_rate(self) -> u32 {
        SAMPLE_RATES[((self.0[2] >> 2) & 3) as usize]
            >> (!self.is_mpeg1() as u32)
            >> (self.is_mpeg25() as u32)
    }

    fn samples_per_frame(self) -> u32 {
        match self.layer_code() {
            3 => 384,
            1 if !self.is_mpeg1() => 576,
            _ => 1152,
        }
    }

    /// Frame size including padding, `None` for free-format frames.
    fn frame_len(self) -> Option<usize> {
        let mut len = self.samples_per_frame() * self.bitrate_kbps() * 125 / self.sample_rate();
        let layer_one = self.layer_code() == 3;
        if layer_one {
            len &= !3;
        }
        if len == 0 {
            return None;
        }
        if self.0[2] & 0x02 != 0 {
            len += if layer_one { 4 } else { 1 };
        }
        Some(len as usize)
    }

    /// Same version, layer and sample rate, the way the decoder chains frames.
    fn matches(self, other: Self) -> bool {
        (self.0[1] ^ other.0[1]) & 0xfe == 0
            && (self.0[2] ^ other.0[2]) & 0x0c == 0
            && self.is_free_format() == other.is_free_format()
    }
}

/// Frame-aligned input queue handed to minimp3 as its reader.
///
/// minimp3 discards a frame it can't see the end of, so the queue only ever
/// hands out whole frames, one per `read`. Bytes that don't belong to a
/// frame are dropped here. Until a frame is found the stream is not locked
/// and a header is only trusted once the next matching header is queued.
/// Reading returns 0 when no whole frame is queued, which minimp3 reports as
/// `Eof`; the rest waits for the next feed.
#[derive(Debug, Default)]
pub struct FeedBuffer {
    queue: VecDeque<u8>,
    locked: Option<FrameHeader>,
    /// Bytes of the current frame not handed out yet
    pending: usize,
    skipped: u64,
}

impl FeedBuffer {
    pub fn push(&mut self, data: &[u8]) {
        self.queue.extend(data);
    }

    /// Bytes not handed to the decoder yet.
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    /// Bytes dropped because they didn't belong to a frame.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn header_at(&self, at: usize) -> Option<FrameHeader> {
        if self.queue.len() < at + HEADER_LEN {
            return None;
        }
        FrameHeader::parse([
            self.queue[at],
            self.queue[at + 1],
            self.queue[at + 2],
            self.queue[at + 3],
        ])
    }

    /// Length of the whole frame at the front of the queue, dropping any
    /// bytes in front of it.
    fn next_frame_len(&mut self) -> Option<usize> {
        let mut dropped = 0usize;
        let found = loop {
            if self.queue.len() < HEADER_LEN {
                break None;
            }
            let candidate = self
                .header_at(0)
                .and_then(|header| header.frame_len().map(|len| (header, len)));
            let Some((header, len)) = candidate else {
                self.drop_byte();
                dropped += 1;
                continue;
            };

            if self.locked.is_some_and(|locked| locked.matches(header)) {
                break (self.queue.len() >= len).then_some((header, len));
            }
            if self.queue.len() < len + HEADER_LEN {
                break None;
            }
            match self.header_at(len) {
                Some(next) if header.matches(next) => break Some((header, len)),
                _ => {
                    self.drop_byte();
                    dropped += 1;
                }
            }
        };

        if dropped > 0 {
            debug!(dropped, "Skipped bytes outside MP3 frames");
        }
        let (header, len) = found?;
        self.locked = Some(header);
        Some(len)
    }

    fn drop_byte(&mut self) {
        self.queue.pop_front();
        self.locked = None;
        self.skipped += 1;
    }
}

impl Read for FeedBuffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending == 0 {
            self.pending = self.next_frame_len().unwrap_or(0);
        }
        let n = self.pending.min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.queue.drain(..n)) {
            *slot = byte;
        }
        self.pending -= n;
        Ok(n)
    }
}

/// [`Mp3Backend`] backed by `minimp3`.
pub struct MiniMp3Backend {
    decoder: MiniMp3Decoder<FeedBuffer>,
}

impl MiniMp3Backend {
    pub fn new() -> Self {
        Self {
            decoder: MiniMp3Decoder::new(FeedBuffer::default()),
        }
    }
}

impl Default for MiniMp3Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Mp3Backend for MiniMp3Backend {
    fn feed(&mut self, data: &[u8]) {
        self.decoder.reader_mut().push(data);
    }

    fn drain(&mut self) -> std::result::Result<Option<Mp3Frame>, Mp3Error> {
        loop {
            match self.decoder.next_frame() {
                Ok(frame) => {
                    if frame.channels == 0 || frame.sample_rate <= 0 {
                        return Err(Mp3Error::Decode(format!(
                            "invalid frame: {} Hz, {} channel(s)",
                            frame.sample_rate, frame.channels
                        )));
                    }
                    return Ok(Some(Mp3Frame {
                        samples: frame.data,
                        sample_rate: frame.sample_rate as u32,
                        channels: frame.channels.min(u8::MAX as usize) as u8,
                    }));
                }
                Err(MiniMp3Error::Eof) => return Ok(None),
                Err(MiniMp3Error::InsufficientData) | Err(MiniMp3Error::SkippedData) => continue,
                Err(MiniMp3Error::Io(err)) => return Err(Mp3Error::Decode(err.to_string())),
            }
        }
    }
}

/// Drives an [`Mp3Backend`] and forwards its frames.
pub struct Mp3Decoder {
    backend: Box<dyn Mp3Backend + Send>,
    initial_format: AudioFormat,
    initialized: bool,
    scratch: Vec<i16>,
}

impl Mp3Decoder {
    pub fn new(backend: Box<dyn Mp3Backend + Send>, initial_format: AudioFormat) -> Self {
        Self {
            backend,
            initial_format,
            initialized: false,
            scratch: Vec::new(),
        }
    }

    pub(crate) fn decode(&mut self, data: &[u8], out: &mut Output<'_>) -> Result<()> {
        if !self.initialized {
            debug!(
                rate = self.initial_format.sample_rate,
                channels = self.initial_format.channels,
                "Initializing MP3 output"
            );
            out.ensure_format(self.initial_format)?;
            self.initialized = true;
        }

        self.backend.feed(data);
        loop {
            match self.backend.drain() {
                Ok(Some(frame)) => self.forward(frame, out)?,
                Ok(None) => return Ok(()),
                Err(err) => warn!("MP3 decoder error, skipping frame: {}", err),
            }
        }
    }

    fn forward(&mut self, frame: Mp3Frame, out: &mut Output<'_>) -> Result<()> {
        if frame.samples.is_empty() {
            return Ok(());
        }

        let channels = self.initial_format.channels;
        let samples: &[i16] = match (frame.channels, channels) {
            (from, to) if from == to => &frame.samples,
            (1, 2) => {
                mono_to_stereo(&frame.samples, &mut self.scratch);
                &self.scratch
            }
            (2, 1) => {
                downmix_to_mono(&frame.samples, &mut self.scratch);
                &self.scratch
            }
            (from, to) => {
                warn!(from, to, "Can't map MP3 channel layout, dropping frame");
                return Ok(());
            }
        };

        out.ensure_format(AudioFormat::new(frame.sample_rate, channels))?;

        let per_block = (out.block_samples() / channels as usize).max(1) * channels as usize;
        for block in samples.chunks(per_block) {
            out.play(block);
        }
        Ok(())
    }
}

fn downmix_to_mono(samples: &[i16], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        samples
            .chunks_exact(2)
            .map(|lr| ((lr[0] as i32 + lr[1] as i32) / 2) as i16),
    );
}
