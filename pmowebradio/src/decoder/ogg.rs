//! Push-based Ogg framing.
//!
//! [`OggSync`] turns an arbitrarily cut byte stream into pages and
//! [`LogicalStream`] turns the pages of one serial number into packets.
//! Neither ever blocks: when a page or packet is incomplete they report
//! "need more" and keep what they have until the next [`OggSync::write`].
//!
//! Page layout (RFC 3533):
//!
//! ```text
//!  0      4   5      6         14       18         22    26      27
//!  | OggS | 0 | type | granule | serial | sequence | crc | nsegs | lacing... | body...
//! ```

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
pub const PAGE_HEADER_LEN: usize = 27;

pub const FLAG_CONTINUED: u8 = 0x01;
pub const FLAG_BOS: u8 = 0x02;
pub const FLAG_EOS: u8 = 0x04;

/// Errors raised by the Ogg framing layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OggError {
    #[error("no Ogg sync pattern found in first {0} bytes")]
    NoSync(usize),
    #[error("page of logical stream {found:#010x} fed to stream {expected:#010x}")]
    SerialMismatch { expected: u32, found: u32 },
}

/// One verified Ogg page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OggPage {
    pub header_type: u8,
    pub granule_position: i64,
    pub serial: u32,
    pub sequence: u32,
    /// Lacing values
    pub segments: Vec<u8>,
    pub body: Vec<u8>,
}

impl OggPage {
    pub fn is_continued(&self) -> bool {
        self.header_type & FLAG_CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.header_type & FLAG_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.header_type & FLAG_EOS != 0
    }
}

/// Result of [`OggSync::page_out`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOut {
    Page(OggPage),
    /// The buffered bytes don't hold a complete page yet
    NeedMore,
    /// That many bytes were discarded while looking for a valid page
    Skipped(usize),
}

/// Page synchronizer.
#[derive(Debug)]
pub struct OggSync {
    buf: Vec<u8>,
    /// Start of the unframed bytes in `buf`
    pos: usize,
    max_sync_search: usize,
    /// Garbage dropped before the first valid page
    leading_garbage: usize,
    synced: bool,
}

impl OggSync {
    pub fn new(max_sync_search: usize) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            max_sync_search,
            leading_garbage: 0,
            synced: false,
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Bytes waiting to be framed.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// `true` once a valid page has been found.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.leading_garbage = 0;
        self.synced = false;
    }

    /// Extracts the next page from the buffered bytes.
    ///
    /// Pages with a bad version or checksum are dropped one byte at a time
    /// until the next capture pattern. Before the first valid page, at most
    /// `max_sync_search` bytes are skipped; past that the stream is not Ogg.
    pub fn page_out(&mut self) -> Result<PageOut, OggError> {
        let data = &self.buf[self.pos..];
        let Some(at) = find_capture(data) else {
            // "OggS" may straddle the next write
            let drop = data.len().saturating_sub(CAPTURE_PATTERN.len() - 1);
            if drop == 0 {
                return Ok(PageOut::NeedMore);
            }
            return self.skip(drop);
        };
        if at > 0 {
            return self.skip(at);
        }

        if data.len() < PAGE_HEADER_LEN {
            return Ok(PageOut::NeedMore);
        }
        if data[4] != 0 {
            warn!(version = data[4], "Unsupported Ogg page version, resyncing");
            return self.skip(1);
        }

        let nsegs = data[26] as usize;
        let header_len = PAGE_HEADER_LEN + nsegs;
        if data.len() < header_len {
            return Ok(PageOut::NeedMore);
        }
        let body_len: usize = data[PAGE_HEADER_LEN..header_len]
            .iter()
            .map(|&v| v as usize)
            .sum();
        let page_len = header_len + body_len;
        if data.len() < page_len {
            return Ok(PageOut::NeedMore);
        }

        let expected = read_u32(&data[22..26]);
        let actual = crc::page_checksum(&data[..page_len]);
        if expected != actual {
            warn!(
                "Ogg CRC32 mismatch: expected 0x{:08x}, got 0x{:08x}, resyncing",
                expected, actual
            );
            return self.skip(1);
        }

        let mut granule = [0u8; 8];
        granule.copy_from_slice(&data[6..14]);
        let page = OggPage {
            header_type: data[5],
            granule_position: i64::from_le_bytes(granule),
            serial: read_u32(&data[14..18]),
            sequence: read_u32(&data[18..22]),
            segments: data[PAGE_HEADER_LEN..header_len].to_vec(),
            body: data[header_len..page_len].to_vec(),
        };
        self.pos += page_len;
        self.synced = true;
        trace!(
            serial = page.serial,
            sequence = page.sequence,
            len = page_len,
            "Ogg page"
        );
        Ok(PageOut::Page(page))
    }

    fn skip(&mut self, n: usize) -> Result<PageOut, OggError> {
        self.pos += n;
        if !self.synced {
            self.leading_garbage += n;
            if self.leading_garbage > self.max_sync_search {
                return Err(OggError::NoSync(self.max_sync_search));
            }
        }
        Ok(PageOut::Skipped(n))
    }
}

/// Result of [`LogicalStream::packet_out`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOut {
    Packet(Vec<u8>),
    /// Pages were lost; reported once per hole
    Gap,
    NeedMore,
}

/// Packet assembler for one logical bitstream.
#[derive(Debug)]
pub struct LogicalStream {
    serial: u32,
    next_sequence: Option<u32>,
    partial: Vec<u8>,
    queue: VecDeque<PacketOut>,
    eos: bool,
}

impl LogicalStream {
    pub fn new(serial: u32) -> Self {
        debug!(serial, "Opening Ogg logical stream");
        Self {
            serial,
            next_sequence: None,
            partial: Vec::new(),
            queue: VecDeque::new(),
            eos: false,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// `true` once the end-of-stream page has been submitted.
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// Submits a page. Pages of another serial number are refused.
    pub fn page_in(&mut self, page: &OggPage) -> Result<(), OggError> {
        if page.serial != self.serial {
            return Err(OggError::SerialMismatch {
                expected: self.serial,
                found: page.serial,
            });
        }

        let mut skip_continuation = false;
        if let Some(expected) = self.next_sequence {
            if page.sequence != expected {
                debug!(
                    serial = self.serial,
                    expected,
                    found = page.sequence,
                    "Ogg page sequence gap"
                );
                self.partial.clear();
                self.queue.push_back(PacketOut::Gap);
            }
        }
        self.next_sequence = Some(page.sequence.wrapping_add(1));

        let laced: usize = page.segments.iter().map(|&v| v as usize).sum();
        if laced != page.body.len() {
            warn!(
                serial = self.serial,
                laced,
                body = page.body.len(),
                "Ogg segment table doesn't match page body, dropping page"
            );
            self.partial.clear();
            self.eos |= page.is_eos();
            return Ok(());
        }

        if page.is_continued() && self.partial.is_empty() {
            skip_continuation = true;
        } else if !page.is_continued() && !self.partial.is_empty() {
            trace!(serial = self.serial, "Dropping dangling Ogg packet");
            self.partial.clear();
        }

        let mut offset = 0;
        for &lacing in &page.segments {
            let end = offset + lacing as usize;
            if !skip_continuation {
                self.partial.extend_from_slice(&page.body[offset..end]);
            }
            offset = end;
            if lacing < 255 {
                if skip_continuation {
                    skip_continuation = false;
                } else {
                    self.queue
                        .push_back(PacketOut::Packet(std::mem::take(&mut self.partial)));
                }
            }
        }

        if page.is_eos() {
            self.eos = true;
            self.partial.clear();
        }
        Ok(())
    }

    pub fn packet_out(&mut self) -> PacketOut {
        self.queue.pop_front().unwrap_or(PacketOut::NeedMore)
    }
}

fn find_capture(buf: &[u8]) -> Option<usize> {
    buf.windows(CAPTURE_PATTERN.len())
        .position(|window| window == CAPTURE_PATTERN)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// CRC32 used by Ogg pages: polynomial 0x04c11db7, initial value 0,
/// no reflection, no final XOR.
pub mod crc {
    const POLYNOMIAL: u32 = 0x04c1_1db7;

    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut n = 0;
        while n < table.len() {
            let mut value = (n as u32) << 24;
            let mut bit = 0;
            while bit < 8 {
                value = if value & 0x8000_0000 != 0 {
                    (value << 1) ^ POLYNOMIAL
                } else {
                    value << 1
                };
                bit += 1;
            }
            table[n] = value;
            n += 1;
        }
        table
    };

    pub fn crc32_update(crc: u32, data: &[u8]) -> u32 {
        data.iter().fold(crc, |crc, &byte| {
            (crc << 8) ^ TABLE[((crc >> 24) ^ byte as u32) as usize]
        })
    }

    /// Checksum of a complete page, computed with its CRC field zeroed.
    pub fn page_checksum(page: &[u8]) -> u32 {
        let crc = crc32_update(0, &page[..22]);
        let crc = crc32_update(crc, &[0; 4]);
        crc32_update(crc, &page[26..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a page holding `packets`, each one terminated on this page.
    fn page(serial: u32, sequence: u32, flags: u8, packets: &[&[u8]]) -> Vec<u8> {
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

    fn raw_page(serial: u32, sequence: u32, flags: u8, lacing: &[u8], body: &[u8]) -> Vec<u8> {
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

    fn next_page(sync: &mut OggSync) -> Option<OggPage> {
        loop {
            match sync.page_out().unwrap() {
                PageOut::Page(page) => return Some(page),
                PageOut::NeedMore => return None,
                PageOut::Skipped(_) => continue,
            }
        }
    }

    #[test]
    fn pages_survive_byte_by_byte_delivery() {
        let mut stream = page(7, 0, FLAG_BOS, &[b"first"]);
        stream.extend(page(7, 1, 0, &[b"second", b"third"]));

        let mut sync = OggSync::new(1024);
        let mut pages = Vec::new();
        for byte in &stream {
            sync.write(std::slice::from_ref(byte));
            while let Some(page) = next_page(&mut sync) {
                pages.push(page);
            }
        }
        assert_eq!(pages.len(), 2);
        assert!(pages[0].is_bos());
        assert_eq!(pages[1].sequence, 1);
        assert_eq!(sync.buffered(), 0);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut sync = OggSync::new(1024);
        sync.write(b"ID3 garbage Ogg");
        sync.write(&page(1, 0, FLAG_BOS, &[b"x"]));
        let page = next_page(&mut sync).unwrap();
        assert_eq!(page.body, b"x");
    }

    #[test]
    fn too_much_garbage_is_not_ogg() {
        let mut sync = OggSync::new(16);
        sync.write(&[0xff; 64]);
        assert_eq!(sync.page_out(), Err(OggError::NoSync(16)));
    }

    #[test]
    fn corrupt_page_is_dropped() {
        let mut bad = page(1, 0, FLAG_BOS, &[b"broken"]);
        let last = bad.len() - 1;
        bad[last] ^= 0xff;

        let mut sync = OggSync::new(1024);
        sync.write(&bad);
        sync.write(&page(1, 1, 0, &[b"good"]));
        let page = next_page(&mut sync).unwrap();
        assert_eq!(page.sequence, 1);
        assert_eq!(page.body, b"good");
    }

    #[test]
    fn packets_span_pages() {
        let big = vec![9u8; 300];
        let first = raw_page(3, 0, FLAG_BOS, &[255], &big[..255]);
        let second = raw_page(
            3,
            1,
            FLAG_CONTINUED | FLAG_EOS,
            &[45, 2],
            &[&big[255..], &b"ok"[..]].concat(),
        );

        let mut sync = OggSync::new(1024);
        sync.write(&first);
        sync.write(&second);

        let mut stream = LogicalStream::new(3);
        stream.page_in(&next_page(&mut sync).unwrap()).unwrap();
        assert_eq!(stream.packet_out(), PacketOut::NeedMore);
        stream.page_in(&next_page(&mut sync).unwrap()).unwrap();
        assert_eq!(stream.packet_out(), PacketOut::Packet(big));
        assert_eq!(stream.packet_out(), PacketOut::Packet(b"ok".to_vec()));
        assert_eq!(stream.packet_out(), PacketOut::NeedMore);
        assert!(stream.is_eos());
    }

    #[test]
    fn sequence_gap_is_reported_once() {
        let mut sync = OggSync::new(1024);
        sync.write(&page(5, 0, FLAG_BOS, &[b"a"]));
        sync.write(&page(5, 3, 0, &[b"b"]));

        let mut stream = LogicalStream::new(5);
        while let Some(page) = next_page(&mut sync) {
            stream.page_in(&page).unwrap();
        }
        assert_eq!(stream.packet_out(), PacketOut::Packet(b"a".to_vec()));
        assert_eq!(stream.packet_out(), PacketOut::Gap);
        assert_eq!(stream.packet_out(), PacketOut::Packet(b"b".to_vec()));
        assert_eq!(stream.packet_out(), PacketOut::NeedMore);
    }

    #[test]
    fn foreign_serial_is_refused() {
        let mut sync = OggSync::new(1024);
        sync.write(&page(9, 0, FLAG_BOS, &[b"z"]));
        let mut stream = LogicalStream::new(1);
        assert_eq!(
            stream.page_in(&next_page(&mut sync).unwrap()),
            Err(OggError::SerialMismatch {
                expected: 1,
                found: 9
            })
        );
    }

    #[test]
    fn orphan_continuation_is_dropped() {
        let mut stream = LogicalStream::new(2);
        let page = OggPage {
            header_type: FLAG_CONTINUED,
            granule_position: 0,
            serial: 2,
            sequence: 4,
            segments: vec![4, 1],
            body: b"tailX".to_vec(),
        };
        stream.page_in(&page).unwrap();
        assert_eq!(stream.packet_out(), PacketOut::Packet(b"X".to_vec()));
        assert_eq!(stream.packet_out(), PacketOut::NeedMore);
    }

    #[test]
    fn page_with_inconsistent_lacing_is_dropped() {
        let mut stream = LogicalStream::new(2);
        let broken = OggPage {
            header_type: FLAG_BOS,
            granule_position: 0,
            serial: 2,
            sequence: 0,
            segments: vec![3, 1],
            body: b"tailX".to_vec(),
        };
        stream.page_in(&broken).unwrap();
        assert_eq!(stream.packet_out(), PacketOut::NeedMore);

        let next = OggPage {
            sequence: 1,
            header_type: 0,
            segments: vec![2],
            body: b"ok".to_vec(),
            ..broken
        };
        stream.page_in(&next).unwrap();
        assert_eq!(stream.packet_out(), PacketOut::Packet(b"ok".to_vec()));
        assert_eq!(stream.packet_out(), PacketOut::NeedMore);
    }

    #[test]
    fn crc_matches_check_value() {
        // CRC-32/CKSUM check value, before its final inversion
        assert_eq!(crc::crc32_update(0, b"123456789"), !0x765e_7680);
    }

    #[test]
    fn long_corrupt_run_is_skipped_without_losing_the_next_page() {
        let mut junk = Vec::new();
        for _ in 0..2000 {
            junk.extend_from_slice(b"OggS\x01");
        }
        let mut sync = OggSync::new(1 << 20);
        sync.write(&junk);
        sync.write(&page(4, 0, FLAG_BOS, &[b"after"]));

        let page = next_page(&mut sync).unwrap();
        assert_eq!(page.body, b"after");
        assert_eq!(sync.buffered(), 0);
    }
}
