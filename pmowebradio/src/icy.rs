//! ICY metadata interleave demultiplexer.
//!
//! When the server honours `Icy-MetaData: 1` and announces `icy-metaint: I`,
//! the body is framed as:
//!
//! ```text
//! ┌──────────────┬───┬──────────────────────┬──────────────┬───┬─────
//! │ I audio bytes│ L │ L×16 metadata bytes  │ I audio bytes│ L │ ...
//! └──────────────┴───┴──────────────────────┴──────────────┴───┴─────
//! ```
//!
//! The metadata payload looks like
//! `StreamTitle='Norma Jean - Opposite Of Left And Wrong';StreamUrl='';`
//! padded with NUL bytes up to a multiple of 16.
//!
//! [`IcyDemuxer`] keeps its position in that framing across calls, so the
//! transport may cut the body anywhere.

use tracing::trace;

/// Largest possible metadata payload (length byte 255).
pub const MAX_METADATA_LEN: usize = 255 * 16;

const STREAM_TITLE: &[u8] = b"StreamTitle='";
const TITLE_END: &[u8] = b"';";

/// Piece of a delivery, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcyEvent<'a> {
    /// Audio bytes for the content decoder
    Audio(&'a [u8]),
    /// A metadata chunk completed; carries its stream title
    Title(String),
}

/// Two metadata buffers used alternately.
///
/// One slot is written while the other keeps the last complete payload, so a
/// reader never sees a half-written chunk.
#[derive(Debug)]
pub struct MetadataSlots {
    slots: [Vec<u8>; 2],
    read: usize,
}

impl Default for MetadataSlots {
    fn default() -> Self {
        Self {
            slots: [
                Vec::with_capacity(MAX_METADATA_LEN),
                Vec::with_capacity(MAX_METADATA_LEN),
            ],
            read: 0,
        }
    }
}

impl MetadataSlots {
    fn write_slot(&mut self) -> &mut Vec<u8> {
        &mut self.slots[1 - self.read]
    }

    fn begin(&mut self) {
        self.write_slot().clear();
    }

    fn write(&mut self, data: &[u8]) {
        let slot = self.write_slot();
        let room = MAX_METADATA_LEN - slot.len();
        slot.extend_from_slice(&data[..data.len().min(room)]);
    }

    /// Publishes the write slot and returns it.
    fn swap(&mut self) -> &[u8] {
        self.read = 1 - self.read;
        &self.slots[self.read]
    }

    /// Last complete metadata payload, padding included.
    pub fn last_complete(&self) -> &[u8] {
        &self.slots[self.read]
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.read = 0;
    }
}

/// Strips interleaved metadata from the audio byte stream.
#[derive(Debug, Default)]
pub struct IcyDemuxer {
    metaint: usize,
    /// Audio bytes since the last metadata boundary
    since_boundary: usize,
    /// Metadata bytes still expected for the chunk being read
    missing: usize,
    /// Metadata bytes already stored for that chunk
    written: usize,
    slots: MetadataSlots,
    chunks: u64,
}

impl IcyDemuxer {
    /// `metaint == 0` disables demultiplexing: everything is audio.
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            ..Self::default()
        }
    }

    pub fn metaint(&self) -> usize {
        self.metaint
    }

    pub fn set_metaint(&mut self, metaint: usize) {
        self.metaint = metaint;
    }

    /// Number of metadata chunks completed so far (empty ones excluded).
    pub fn completed_chunks(&self) -> u64 {
        self.chunks
    }

    /// `true` while in the middle of a metadata chunk.
    pub fn in_metadata(&self) -> bool {
        self.missing > 0
    }

    pub fn last_metadata(&self) -> &[u8] {
        self.slots.last_complete()
    }

    /// Splits one delivery into audio runs and title updates.
    pub fn split<'d, 'a>(&'d mut self, data: &'a [u8]) -> IcySplit<'d, 'a> {
        IcySplit {
            demuxer: self,
            rest: data,
        }
    }

    pub fn reset(&mut self) {
        self.metaint = 0;
        self.since_boundary = 0;
        self.missing = 0;
        self.written = 0;
        self.slots.clear();
        self.chunks = 0;
    }

    fn begin_chunk(&mut self, len: usize) {
        self.slots.begin();
        self.missing = len;
        self.written = 0;
    }

    fn complete_chunk(&mut self) -> String {
        self.written = 0;
        self.chunks += 1;
        let payload = self.slots.swap();
        let title = extract_stream_title(payload);
        trace!(len = payload.len(), title = %title, "ICY metadata chunk complete");
        title
    }
}

/// Iterator returned by [`IcyDemuxer::split`].
pub struct IcySplit<'d, 'a> {
    demuxer: &'d mut IcyDemuxer,
    rest: &'a [u8],
}

impl<'a> Iterator for IcySplit<'_, 'a> {
    type Item = IcyEvent<'a>;

    fn next(&mut self) -> Option<IcyEvent<'a>> {
        let d = &mut *self.demuxer;
        loop {
            if self.rest.is_empty() {
                return None;
            }

            if d.metaint == 0 {
                return Some(IcyEvent::Audio(std::mem::take(&mut self.rest)));
            }

            if d.missing > 0 {
                let n = self.rest.len().min(d.missing);
                d.slots.write(&self.rest[..n]);
                self.rest = &self.rest[n..];
                d.missing -= n;
                d.written += n;
                if d.missing == 0 {
                    return Some(IcyEvent::Title(d.complete_chunk()));
                }
                continue;
            }

            let to_boundary = d.metaint - d.since_boundary;
            if to_boundary == 0 {
                let len = self.rest[0] as usize * 16;
                self.rest = &self.rest[1..];
                d.since_boundary = 0;
                if len > 0 {
                    d.begin_chunk(len);
                }
                continue;
            }

            let n = to_boundary.min(self.rest.len());
            let (audio, rest) = self.rest.split_at(n);
            self.rest = rest;
            d.since_boundary += n;
            return Some(IcyEvent::Audio(audio));
        }
    }
}

/// Extracts the `StreamTitle` value of a metadata payload.
///
/// Without a `StreamTitle='` marker the whole payload (up to the NUL padding)
/// is the title. Without a closing `';` the title runs to the end.
pub fn extract_stream_title(payload: &[u8]) -> String {
    let text = match payload.iter().position(|&b| b == 0) {
        Some(nul) => &payload[..nul],
        None => payload,
    };

    let start = find(text, STREAM_TITLE)
        .map(|pos| pos + STREAM_TITLE.len())
        .unwrap_or(0);
    let title = &text[start..];
    let end = find(title, TITLE_END).unwrap_or(title.len());

    String::from_utf8_lossy(&title[..end]).into_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(text: &[u8], blocks: usize) -> Vec<u8> {
        let mut out = text.to_vec();
        out.resize(blocks * 16, 0);
        out
    }

    fn collect(demuxer: &mut IcyDemuxer, data: &[u8]) -> (Vec<u8>, Vec<String>) {
        let mut audio = Vec::new();
        let mut titles = Vec::new();
        for event in demuxer.split(data) {
            match event {
                IcyEvent::Audio(a) => audio.extend_from_slice(a),
                IcyEvent::Title(t) => titles.push(t),
            }
        }
        (audio, titles)
    }

    #[test]
    fn single_chunk_example() {
        let mut body = b"0123456789".to_vec();
        body.push(0x01);
        body.extend_from_slice(&padded(b"StreamTitle='A';", 1));

        let mut demuxer = IcyDemuxer::new(10);
        let (audio, titles) = collect(&mut demuxer, &body);
        assert_eq!(audio, b"0123456789");
        assert_eq!(titles, vec!["A".to_string()]);
        assert_eq!(demuxer.completed_chunks(), 1);
        assert_eq!(demuxer.last_metadata(), padded(b"StreamTitle='A';", 1).as_slice());
    }

    #[test]
    fn zero_length_metadata_restarts_counter() {
        let mut body = b"abcd".to_vec();
        body.push(0x00);
        body.extend_from_slice(b"efgh");
        body.push(0x00);
        body.extend_from_slice(b"ij");

        let mut demuxer = IcyDemuxer::new(4);
        let (audio, titles) = collect(&mut demuxer, &body);
        assert_eq!(audio, b"abcdefghij");
        assert!(titles.is_empty());
        assert_eq!(demuxer.completed_chunks(), 0);
    }

    #[test]
    fn byte_by_byte_matches_single_delivery() {
        let mut body = Vec::new();
        for (i, title) in ["One", "Two", "Two"].iter().enumerate() {
            body.extend(std::iter::repeat_n(b'a' + i as u8, 7));
            let meta = format!("StreamTitle='{title}';StreamUrl='';");
            let blocks = meta.len().div_ceil(16);
            body.push(blocks as u8);
            body.extend_from_slice(&padded(meta.as_bytes(), blocks));
        }
        body.extend_from_slice(b"tail");

        let whole = collect(&mut IcyDemuxer::new(7), &body);

        let mut demuxer = IcyDemuxer::new(7);
        let mut audio = Vec::new();
        let mut titles = Vec::new();
        for byte in body.chunks(1) {
            let (a, t) = collect(&mut demuxer, byte);
            audio.extend(a);
            titles.extend(t);
        }

        assert_eq!(whole, (audio, titles));
        assert_eq!(whole.1, vec!["One", "Two", "Two"]);
        assert_eq!(whole.0.len(), 7 * 3 + 4);
    }

    #[test]
    fn length_byte_alone_in_delivery() {
        let mut demuxer = IcyDemuxer::new(3);
        assert_eq!(collect(&mut demuxer, b"xyz").0, b"xyz");
        assert_eq!(collect(&mut demuxer, &[0x01]), (Vec::new(), Vec::new()));
        assert!(demuxer.in_metadata());
        let (audio, titles) = collect(&mut demuxer, &padded(b"StreamTitle='B';", 1));
        assert!(audio.is_empty());
        assert_eq!(titles, vec!["B"]);
        assert!(!demuxer.in_metadata());
    }

    #[test]
    fn disabled_demuxer_passes_everything() {
        let mut demuxer = IcyDemuxer::new(0);
        let (audio, titles) = collect(&mut demuxer, b"\x01StreamTitle='x';");
        assert_eq!(audio, b"\x01StreamTitle='x';");
        assert!(titles.is_empty());
    }

    #[test]
    fn title_extraction_rules() {
        assert_eq!(
            extract_stream_title(b"StreamTitle='Norma Jean - Opposite';StreamUrl='';\0\0"),
            "Norma Jean - Opposite"
        );
        assert_eq!(extract_stream_title(b"Just some text\0\0\0"), "Just some text");
        assert_eq!(extract_stream_title(b"StreamTitle='No end\0\0"), "No end");
        assert_eq!(
            extract_stream_title(b"StreamUrl='u';StreamTitle='Late';"),
            "Late"
        );
        assert_eq!(extract_stream_title(b"StreamTitle='';\0"), "");
        assert_eq!(extract_stream_title(b""), "");
    }
}
