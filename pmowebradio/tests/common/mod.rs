#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use pmowebradio::{
    decoder::ogg::{crc, CAPTURE_PATTERN, FLAG_BOS, FLAG_EOS},
    AudioFormat, Backends, CodecError, Mp3Backend, Mp3Error, Mp3Frame, StationInfo, StreamError,
    StreamHandler, VorbisCodec, VorbisComment, VorbisInfo,
};

/// Everything a stream reported, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Station(StationInfo),
    Format(AudioFormat),
    Samples(Vec<i16>),
    Title(String),
    Error(StreamError),
}

/// Handler recording every callback; clones share the same log.
#[derive(Clone)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    accept_format: bool,
    wants_audio: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            accept_format: true,
            wants_audio: true,
        }
    }

    pub fn rejecting_format() -> Self {
        Self {
            accept_format: false,
            ..Self::new()
        }
    }

    pub fn metadata_only() -> Self {
        Self {
            wants_audio: false,
            ..Self::new()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.filter(|e| match e {
            Event::Title(t) => Some(t.clone()),
            _ => None,
        })
    }

    pub fn formats(&self) -> Vec<AudioFormat> {
        self.filter(|e| match e {
            Event::Format(f) => Some(*f),
            _ => None,
        })
    }

    pub fn blocks(&self) -> Vec<Vec<i16>> {
        self.filter(|e| match e {
            Event::Samples(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn samples(&self) -> Vec<i16> {
        self.blocks().concat()
    }

    pub fn stations(&self) -> Vec<StationInfo> {
        self.filter(|e| match e {
            Event::Station(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn errors(&self) -> Vec<StreamError> {
        self.filter(|e| match e {
            Event::Error(err) => Some(err.clone()),
            _ => None,
        })
    }

    fn filter<T>(&self, f: impl Fn(&Event) -> Option<T>) -> Vec<T> {
        self.events.lock().unwrap().iter().filter_map(f).collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl StreamHandler for Recorder {
    fn samples(&mut self, samples: &[i16]) {
        self.push(Event::Samples(samples.to_vec()));
    }

    fn audio_format(&mut self, format: AudioFormat) -> bool {
        if self.accept_format {
            self.push(Event::Format(format));
        }
        self.accept_format
    }

    fn station_info(&mut self, info: &StationInfo) {
        self.push(Event::Station(info.clone()));
    }

    fn current_title(&mut self, title: &str) {
        self.push(Event::Title(title.to_string()));
    }

    fn error(&mut self, error: &StreamError) {
        self.push(Event::Error(error.clone()));
    }

    fn wants_audio(&self) -> bool {
        self.wants_audio
    }
}

/// Scripted codecs that understand the packets built by the helpers below.
pub fn fake_backends() -> Backends {
    Backends {
        mp3: || Box::new(FakeMp3::default()),
        vorbis: || Box::new(FakeVorbis::default()),
    }
}

// ---------------------------------------------------------------------------
// MP3

const MP3_SYNC: u8 = 0xF0;
const MP3_FRAME_HEADER: usize = 8;

/// Fake MP3 frame: sync byte, channels, rate (LE u32), sample count (LE u16),
/// then the interleaved samples.
pub fn mp3_frame(sample_rate: u32, channels: u8, samples: &[i16]) -> Vec<u8> {
    let mut out = vec![MP3_SYNC, channels];
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(samples.len() as u16).to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Frame the fake decoder fails on: it announces zero channels.
pub fn mp3_corrupt_frame() -> Vec<u8> {
    mp3_frame(44_100, 0, &[7, 7])
}

/// Real MPEG-1 layer III frames holding silence, 32 kbit/s at 44.1 kHz
/// stereo, 104 bytes each.
pub fn silent_mp3_frames(count: usize) -> Vec<u8> {
    let mut frame = vec![0u8; 104];
    frame[..4].copy_from_slice(&[0xff, 0xfb, 0x10, 0x04]);
    frame.repeat(count)
}

#[derive(Default)]
pub struct FakeMp3 {
    input: Vec<u8>,
}

impl Mp3Backend for FakeMp3 {
    fn feed(&mut self, data: &[u8]) {
        self.input.extend_from_slice(data);
    }

    fn drain(&mut self) -> Result<Option<Mp3Frame>, Mp3Error> {
        // Like a real decoder, bytes before a sync byte are skipped
        match self.input.iter().position(|&b| b == MP3_SYNC) {
            Some(pos) => {
                self.input.drain(..pos);
            }
            None => {
                self.input.clear();
                return Ok(None);
            }
        }
        if self.input.len() < MP3_FRAME_HEADER {
            return Ok(None);
        }
        let channels = self.input[1];
        let sample_rate = u32::from_le_bytes([
            self.input[2],
            self.input[3],
            self.input[4],
            self.input[5],
        ]);
        let count = u16::from_le_bytes([self.input[6], self.input[7]]) as usize;
        let len = MP3_FRAME_HEADER + count * 2;
        if self.input.len() < len {
            return Ok(None);
        }
        let samples = self.input[MP3_FRAME_HEADER..len]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        self.input.drain(..len);
        if channels == 0 {
            return Err(Mp3Error::Decode("zero channels".into()));
        }
        Ok(Some(Mp3Frame {
            samples,
            sample_rate,
            channels,
        }))
    }
}

// ---------------------------------------------------------------------------
// Vorbis

pub fn vorbis_ident(sample_rate: u32, channels: u8) -> Vec<u8> {
    let mut out = vec![0x01];
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.push(channels);
    out
}

/// Comment packet holding `KEY=value` lines.
pub fn vorbis_comments(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = vec![0x03];
    for (k, v) in pairs {
        out.extend_from_slice(format!("{k}={v}\n").as_bytes());
    }
    out
}

pub const VORBIS_SETUP: &[u8] = &[0x05];

/// Audio packet: frame count (LE u16), then each plane as LE f32.
pub fn vorbis_audio(planes: &[&[f32]]) -> Vec<u8> {
    let frames = planes.first().map_or(0, |p| p.len());
    let mut out = vec![0x00];
    out.extend_from_slice(&(frames as u16).to_le_bytes());
    for plane in planes {
        for s in plane.iter() {
            out.extend_from_slice(&s.to_le_bytes());
        }
    }
    out
}

#[derive(Default)]
pub struct FakeVorbis {
    channels: Option<u8>,
    ready: bool,
}

impl VorbisCodec for FakeVorbis {
    fn info_header(&mut self, packet: &[u8]) -> Result<VorbisInfo, CodecError> {
        if packet.len() != 6 || packet[0] != 0x01 {
            return Err(CodecError::Header("not an identification header".into()));
        }
        let sample_rate = u32::from_le_bytes([packet[1], packet[2], packet[3], packet[4]]);
        self.channels = Some(packet[5]);
        Ok(VorbisInfo {
            sample_rate,
            channels: packet[5],
            bitrate_nominal: 128_000,
        })
    }

    fn comment_header(&mut self, packet: &[u8]) -> Result<VorbisComment, CodecError> {
        if packet.first() != Some(&0x03) {
            return Err(CodecError::Header("not a comment header".into()));
        }
        let text = String::from_utf8_lossy(&packet[1..]);
        let comments = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Ok(VorbisComment {
            vendor: "fake".into(),
            comments,
        })
    }

    fn setup_header(&mut self, packet: &[u8]) -> Result<(), CodecError> {
        if self.channels.is_none() {
            return Err(CodecError::OutOfOrder("setup before identification"));
        }
        if packet != VORBIS_SETUP {
            return Err(CodecError::Header("not a setup header".into()));
        }
        self.ready = true;
        Ok(())
    }

    fn synthesize(&mut self, packet: &[u8]) -> Result<Vec<Vec<f32>>, CodecError> {
        let Some(channels) = self.channels.filter(|_| self.ready) else {
            return Err(CodecError::OutOfOrder("audio before setup"));
        };
        if packet.len() < 3 || packet[0] != 0x00 {
            return Err(CodecError::Synthesis("not an audio packet".into()));
        }
        let frames = u16::from_le_bytes([packet[1], packet[2]]) as usize;
        let values: Vec<f32> = packet[3..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if values.len() != frames * channels as usize {
            return Err(CodecError::Synthesis("short audio packet".into()));
        }
        Ok(values.chunks(frames.max(1)).map(<[f32]>::to_vec).collect())
    }

    fn reset(&mut self) {
        self.channels = None;
        self.ready = false;
    }
}

// ---------------------------------------------------------------------------
// Ogg

/// Page holding `packets`, each one ending on this page.
pub fn ogg_page(serial: u32, sequence: u32, flags: u8, packets: &[&[u8]]) -> Vec<u8> {
    let mut lacing = Vec::new();
    let mut body = Vec::new();
    for packet in packets {
        let mut left = packet.len();
        while left >= 255 {
            lacing.push(255);
            left -= 255;
        }
        lacing.push(left as u8);
        body.extend_from_slice(packet);
    }
    raw_page(serial, sequence, flags, &lacing, &body)
}

/// Page with an explicit segment table.
pub fn raw_page(serial: u32, sequence: u32, flags: u8, lacing: &[u8], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(CAPTURE_PATTERN);
    out.push(0);
    out.push(flags);
    out.extend_from_slice(&0i64.to_le_bytes());
    out.extend_from_slice(&serial.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.push(lacing.len() as u8);
    out.extend_from_slice(lacing);
    out.extend_from_slice(body);
    let crc = crc::page_checksum(&out);
    out[22..26].copy_from_slice(&crc.to_le_bytes());
    out
}

/// Complete logical stream: identification page, comment + setup page, then
/// one page per audio packet, the last one flagged end-of-stream.
pub fn vorbis_logical_stream(
    serial: u32,
    format: AudioFormat,
    comments: &[(&str, &str)],
    audio: &[Vec<u8>],
) -> Vec<u8> {
    let ident = vorbis_ident(format.sample_rate, format.channels);
    let comment = vorbis_comments(comments);

    let mut out = ogg_page(serial, 0, FLAG_BOS, &[&ident]);
    let header_flags = if audio.is_empty() { FLAG_EOS } else { 0 };
    out.extend(ogg_page(serial, 1, header_flags, &[&comment, VORBIS_SETUP]));
    for (idx, packet) in audio.iter().enumerate() {
        let flags = if idx + 1 == audio.len() { FLAG_EOS } else { 0 };
        out.extend(ogg_page(serial, idx as u32 + 2, flags, &[packet]));
    }
    out
}

// ---------------------------------------------------------------------------
// ICY

/// Interleaves metadata into `audio` every `metaint` bytes.
///
/// `titles[i]` goes after the i-th full audio block; `None` or a missing
/// entry gives an empty (zero length byte) chunk.
pub fn icy_interleave(audio: &[u8], metaint: usize, titles: &[Option<&str>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (idx, block) in audio.chunks(metaint).enumerate() {
        out.extend_from_slice(block);
        if block.len() < metaint {
            break;
        }
        match titles.get(idx).copied().flatten() {
            Some(title) => out.extend(icy_metadata(&format!("StreamTitle='{title}';"))),
            None => out.push(0),
        }
    }
    out
}

/// Length byte plus NUL-padded payload.
pub fn icy_metadata(payload: &str) -> Vec<u8> {
    let blocks = payload.len().div_ceil(16);
    let mut out = vec![blocks as u8];
    out.extend_from_slice(payload.as_bytes());
    out.resize(1 + blocks * 16, 0);
    out
}
