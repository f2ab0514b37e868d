//! Recognition of the legacy in-body ICY response.
//!
//! Old SHOUTcast servers answer with `ICY 200 OK` instead of an HTTP status
//! line, so most HTTP clients hand the whole header block over as body bytes.
//! [`probe_icy_marker`] tells both cases apart from the first body bytes and
//! [`HeaderBuffer`] collects the block up to the blank line ending it.

/// Status line sent by SHOUTcast v1 servers.
pub const ICY_MARKER: &[u8] = b"ICY 200 OK";

const HEADER_END: &[u8; 4] = b"\r\n\r\n";

/// Outcome of looking at the first body bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Too few bytes to decide, and they still match the marker
    NeedMore,
    /// The body starts with the in-body header block
    HeaderInBody,
    /// The body is audio right away
    Audio,
}

pub fn probe_icy_marker(head: &[u8]) -> Probe {
    if head.len() < ICY_MARKER.len() {
        if ICY_MARKER.starts_with(head) {
            Probe::NeedMore
        } else {
            Probe::Audio
        }
    } else if head.starts_with(ICY_MARKER) {
        Probe::HeaderInBody
    } else {
        Probe::Audio
    }
}

/// Bounded accumulator for the in-body header block.
///
/// Stores at most `capacity - 1` bytes (the last byte is reserved for a
/// terminator); anything beyond is dropped, but the `\r\n\r\n` terminator is
/// still detected since matching runs on every byte, not on the stored ones.
#[derive(Debug)]
pub struct HeaderBuffer {
    buf: Vec<u8>,
    capacity: usize,
    matched: usize,
    truncated: bool,
}

impl HeaderBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
            matched: 0,
            truncated: false,
        }
    }

    /// Appends `data` up to and including the header terminator.
    ///
    /// Returns the number of bytes of `data` that belong to the header block
    /// once the terminator has been seen, `None` while it is still missing
    /// (in which case all of `data` was consumed).
    pub fn push(&mut self, data: &[u8]) -> Option<usize> {
        let mut end = None;
        for (idx, &byte) in data.iter().enumerate() {
            self.matched = if byte == HEADER_END[self.matched] {
                self.matched + 1
            } else if byte == b'\r' {
                1
            } else {
                0
            };
            if self.matched == HEADER_END.len() {
                end = Some(idx + 1);
                break;
            }
        }

        let consumed = end.unwrap_or(data.len());
        let room = self.capacity.saturating_sub(1).saturating_sub(self.buf.len());
        let stored = consumed.min(room);
        self.buf.extend_from_slice(&data[..stored]);
        if stored < consumed {
            self.truncated = true;
        }
        end
    }

    /// Header bytes stored so far.
    pub fn contents(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.matched = 0;
        self.truncated = false;
    }
}
