//! Stream lifecycle controller.
//!
//! A [`Stream`] is fed by a transport: header lines through
//! [`Stream::handle_header_line`] and body bytes through [`Stream::ingest`],
//! in chunks of any size. It recognizes the response kind, strips the ICY
//! metadata, dispatches the audio to the right decoder and reports
//! everything to its [`StreamHandler`].
//!
//! ```text
//!          ┌───────────────► HeaderInBody ──┐
//!  Fresh ──┤                                ├──► Playing ──► AbortGraceful
//!          └────────────────────────────────┘       │
//!                                                   └──────► AbortError
//! ```
//!
//! The first unrecoverable error is reported once through
//! [`StreamHandler::error`], the decoder is torn down and every later
//! delivery is refused until [`Stream::reset`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{debug, error, trace, warn};

use crate::{
    decoder::{Backends, Decoder, Output},
    error::{Result, StreamError},
    handler::{StationInfo, StreamHandler},
    headers::{header_block_lines, ContentType, HeaderField, ResponseHeaders},
    icy::{IcyDemuxer, IcyEvent},
    pcm::AudioFormat,
    response::{probe_icy_marker, HeaderBuffer, Probe},
    settings::StreamSettings,
};

/// Longest accepted stream URL, in bytes.
pub const MAX_URL_LEN: usize = 2047;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing received yet
    Fresh,
    /// Accumulating an in-body `ICY 200 OK` header block
    HeaderInBody,
    Playing,
    /// Stopped on request or because the caller wants no audio
    AbortGraceful,
    /// Stopped by an unrecoverable error
    AbortError,
}

impl StreamState {
    pub fn is_aborted(self) -> bool {
        matches!(self, StreamState::AbortGraceful | StreamState::AbortError)
    }
}

/// Tells the transport whether to keep the transfer going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Cooperative stop signal, usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Running totals for the current connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCounters {
    /// Body bytes received, framing and metadata included
    pub body_bytes: u64,
    /// Bytes handed to the decoder
    pub audio_bytes: u64,
    /// Non-empty ICY metadata chunks completed
    pub metadata_chunks: u64,
    /// Sample blocks handed to the caller
    pub sample_blocks: u64,
    /// Samples handed to the caller, all channels
    pub samples: u64,
}

/// One webradio stream.
pub struct Stream<H: StreamHandler> {
    url: String,
    settings: StreamSettings,
    backends: Backends,
    handler: H,
    stop: StopHandle,

    state: StreamState,
    headers: ResponseHeaders,
    /// First body bytes, kept while they could still be the ICY marker
    probe: Vec<u8>,
    header_buf: HeaderBuffer,
    icy: IcyDemuxer,
    decoder: Decoder,
    format: Option<AudioFormat>,
    counters: StreamCounters,
    station_sent: bool,
    last_error: Option<StreamError>,
}

impl<H: StreamHandler> Stream<H> {
    pub fn new(url: impl Into<String>, handler: H) -> Result<Self> {
        Self::with_settings(url, handler, StreamSettings::default())
    }

    pub fn with_settings(
        url: impl Into<String>,
        handler: H,
        settings: StreamSettings,
    ) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(StreamError::InvalidUrl("empty URL".into()));
        }
        if url.len() > MAX_URL_LEN {
            return Err(StreamError::InvalidUrl(format!(
                "URL is {} bytes long, at most {} are supported",
                url.len(),
                MAX_URL_LEN
            )));
        }
        settings.validate().map_err(StreamError::other)?;

        debug!(url = %url, "Creating stream");
        Ok(Self {
            header_buf: HeaderBuffer::new(settings.header_buffer_size),
            url,
            settings,
            backends: Backends::default(),
            handler,
            stop: StopHandle::default(),
            state: StreamState::Fresh,
            headers: ResponseHeaders::default(),
            probe: Vec::new(),
            icy: IcyDemuxer::default(),
            decoder: Decoder::Idle,
            format: None,
            counters: StreamCounters::default(),
            station_sent: false,
            last_error: None,
        })
    }

    /// Replaces the codec factories used by the next decoder.
    pub fn set_backends(&mut self, backends: Backends) {
        self.backends = backends;
    }

    /// Handle that stops the stream from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Requests a graceful stop; the next delivery is refused.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Handles one HTTP response header line.
    ///
    /// Lines of non-2xx responses (redirects, error pages) are ignored.
    pub fn handle_header_line(&mut self, status: u16, line: &[u8]) -> Flow {
        self.check_stop();
        if self.state.is_aborted() {
            return Flow::Stop;
        }
        if !(200..300).contains(&status) {
            trace!(status, "Ignoring header of non-2xx response");
            return Flow::Continue;
        }

        if let Some(HeaderField::ContentType(ContentType::Unsupported(value))) =
            self.headers.apply_line(line)
        {
            self.fail(unknown_content_type(&value));
        }
        self.flow()
    }

    /// Feeds a chunk of the response body.
    ///
    /// Returns [`Flow::Stop`] once the stream is aborted, gracefully or not;
    /// the transport should then close the connection.
    pub fn ingest(&mut self, data: &[u8]) -> Flow {
        self.check_stop();
        if self.state.is_aborted() {
            return Flow::Stop;
        }

        self.counters.body_bytes += data.len() as u64;
        if let Err(err) = self.process(data) {
            self.fail(err);
        }
        self.flow()
    }

    /// Reports a transport failure (connection refused, dropped, ...).
    ///
    /// Ignored once the stream is already aborted.
    pub fn transport_failed(&mut self, message: impl Into<String>) {
        if !self.state.is_aborted() {
            self.fail(StreamError::Unavailable(message.into()));
        }
    }

    /// Clears all per-connection state; URL, handler and settings are kept.
    pub fn reset(&mut self) {
        debug!(url = %self.url, "Resetting stream");
        self.state = StreamState::Fresh;
        self.headers = ResponseHeaders::default();
        self.probe.clear();
        self.header_buf.clear();
        self.icy.reset();
        self.decoder.shutdown();
        self.format = None;
        self.counters = StreamCounters::default();
        self.station_sent = false;
        self.stop.clear();
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn station_info(&self) -> &StationInfo {
        &self.headers.station
    }

    pub fn content_type(&self) -> Option<&ContentType> {
        self.headers.content_type.as_ref()
    }

    pub fn metaint(&self) -> usize {
        self.headers.metaint
    }

    /// Format of the samples currently sent to the handler.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub fn counters(&self) -> StreamCounters {
        self.counters
    }

    /// Error that aborted the stream, kept until the next one.
    pub fn last_error(&self) -> Option<&StreamError> {
        self.last_error.as_ref()
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    fn check_stop(&mut self) {
        if self.stop.is_stopped() && !self.state.is_aborted() {
            debug!(url = %self.url, "Stop requested");
            self.state = StreamState::AbortGraceful;
        }
    }

    fn flow(&self) -> Flow {
        if self.state.is_aborted() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn process(&mut self, data: &[u8]) -> Result<()> {
        let held;
        let mut data = data;

        if self.state == StreamState::Fresh {
            if !self.probe.is_empty() {
                self.probe.extend_from_slice(data);
                held = std::mem::take(&mut self.probe);
                data = &held;
            }
            match probe_icy_marker(data) {
                Probe::NeedMore => {
                    self.probe.extend_from_slice(data);
                    return Ok(());
                }
                Probe::HeaderInBody => {
                    debug!(url = %self.url, "ICY header block in body");
                    self.state = StreamState::HeaderInBody;
                }
                Probe::Audio => {
                    debug!(url = %self.url, "Headers received over HTTP, playing");
                    self.enter_playing();
                }
            }
        }

        if self.state == StreamState::HeaderInBody {
            let Some(end) = self.header_buf.push(data) else {
                return Ok(());
            };
            if self.header_buf.is_truncated() {
                warn!(
                    capacity = self.settings.header_buffer_size,
                    "ICY header block truncated"
                );
            }

            let mut unsupported = None;
            for line in header_block_lines(self.header_buf.contents()) {
                if let Some(HeaderField::ContentType(ContentType::Unsupported(value))) =
                    self.headers.apply_line(line)
                {
                    unsupported = Some(value);
                }
            }
            self.header_buf.clear();
            if let Some(value) = unsupported {
                return Err(unknown_content_type(&value));
            }

            data = &data[end..];
            self.enter_playing();
        }

        if self.state != StreamState::Playing {
            return Ok(());
        }
        self.demux(data)
    }

    fn enter_playing(&mut self) {
        self.state = StreamState::Playing;
        if !self.station_sent {
            self.station_sent = true;
            self.handler.station_info(&self.headers.station);
        }
        if !self.handler.wants_audio() {
            debug!(url = %self.url, "No playback callback, stopping after station info");
            self.state = StreamState::AbortGraceful;
            return;
        }
        self.icy.set_metaint(self.headers.metaint);
    }

    fn demux(&mut self, data: &[u8]) -> Result<()> {
        let Self {
            icy,
            decoder,
            handler,
            format,
            counters,
            headers,
            backends,
            settings,
            ..
        } = self;

        for event in icy.split(data) {
            match event {
                IcyEvent::Audio(audio) => {
                    counters.audio_bytes += audio.len() as u64;
                    if decoder.is_idle() {
                        *decoder =
                            Decoder::select(headers.content_type.as_ref(), backends, settings);
                    }
                    let mut out = Output::new(
                        &mut *handler,
                        &mut *format,
                        &mut *counters,
                        settings.decode_buffer_samples,
                    );
                    decoder.decode(audio, &mut out)?;
                }
                IcyEvent::Title(title) => {
                    counters.metadata_chunks += 1;
                    handler.current_title(&title);
                }
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: StreamError) {
        if self.state.is_aborted() {
            return;
        }
        error!(url = %self.url, code = err.code(), "Stream aborted: {}", err);
        self.handler.error(&err);
        self.decoder.shutdown();
        self.state = StreamState::AbortError;
        self.last_error = Some(err);
    }
}

fn unknown_content_type(value: &str) -> StreamError {
    StreamError::UnsupportedFormat(format!("unknown content type: {value}"))
}
