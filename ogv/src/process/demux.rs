use std::collections::{HashMap, HashSet, VecDeque};

use log::warn;

use crate::log_or_err;
use crate::structs::packet::Packet;
use crate::structs::page::{CAPTURE_PATTERN, GRANULE_NONE, MIN_HEADER_LEN, PageHeader};
use crate::utils::buffer_pool::BufferPool;
use crate::utils::crc::{CRC_PAGE_ALG, Crc32};
use crate::utils::errors::DemuxError;

/// Splits a raw byte stream into pages and reassembles per-stream packets.
///
/// Pages are parsed lazily, one at a time, as the iterator is pulled;
/// the demultiplexer never drains its input eagerly. Framing errors are
/// yielded to the caller and followed by resynchronization on the next
/// capture pattern, so a single corrupt page does not end the stream.
///
/// # Example
///
/// ```rust,no_run
/// use ogv::process::demux::Demuxer;
///
/// let mut demuxer = Demuxer::default();
/// let data = std::fs::read("video.ogv")?;
/// demuxer.push_bytes(&data);
///
/// for packet in demuxer {
///     match packet {
///         Ok(packet) => println!(
///             "stream {:#010X}: {} byte packet",
///             packet.serial,
///             packet.as_ref().len()
///         ),
///         Err(e) => eprintln!("demux error: {e}"),
///     }
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Demuxer {
    buffer: VecDeque<u8>,
    io_counter: usize,
    crc: Crc32,
    buffer_pool: BufferPool,

    /// Partially reassembled packet per logical stream.
    pending: HashMap<u32, Vec<u8>>,
    /// Streams whose current packet lost its head; continued segments are
    /// discarded until the packet terminates.
    discarding: HashSet<u32>,
    last_sequence: HashMap<u32, u32>,
    last_granule: HashMap<u32, i64>,

    ready: VecDeque<Packet>,
    errors: VecDeque<DemuxError>,

    pages_processed: usize,
    packets_produced: u64,
    error_count: usize,
    fail_level: log::Level,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self {
            buffer: VecDeque::with_capacity(128 * 1024),
            io_counter: 0,
            crc: Crc32::new(&CRC_PAGE_ALG),
            buffer_pool: BufferPool::default(),
            pending: HashMap::new(),
            discarding: HashSet::new(),
            last_sequence: HashMap::new(),
            last_granule: HashMap::new(),
            ready: VecDeque::new(),
            errors: VecDeque::new(),
            pages_processed: 0,
            packets_produced: 0,
            error_count: 0,
            fail_level: log::Level::Error,
        }
    }
}

impl Demuxer {
    /// Adds raw container data to the internal buffer.
    ///
    /// The demultiplexer consumes this data page by page as the iterator
    /// is pulled; pushing never triggers parsing on its own.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend(data);
        self.io_counter += 1;
    }

    /// Sets the failure level for validation warnings.
    ///
    /// - `log::Level::Error`: only fail on hard framing errors (default)
    /// - `log::Level::Warn`: fail on warnings such as granule regressions
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    pub fn pages_processed(&self) -> usize {
        self.pages_processed
    }

    pub fn packets_produced(&self) -> u64 {
        self.packets_produced
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Signals that no further input will arrive.
    ///
    /// Returns a [`DemuxError::TruncatedPage`] if the buffer ends inside
    /// a page whose declared length exceeds the bytes available; logs any
    /// packets left unfinished by the final page.
    pub fn finish(&mut self) -> Option<DemuxError> {
        for serial in self.pending.keys() {
            warn!("Stream {serial:#010X}: packet left unfinished at end of input");
        }

        if self.buffer.len() < 4 || !self.buffer.iter().take(4).eq(CAPTURE_PATTERN.iter()) {
            return None;
        }

        let available = self.buffer.len();
        let needed = if available < MIN_HEADER_LEN {
            MIN_HEADER_LEN
        } else {
            let segments = self.buffer[26] as usize;
            let header_len = MIN_HEADER_LEN + segments;
            if available < header_len {
                header_len
            } else {
                header_len
                    + self
                        .buffer
                        .range(MIN_HEADER_LEN..header_len)
                        .map(|&v| v as usize)
                        .sum::<usize>()
            }
        };

        self.error_count += 1;
        Some(DemuxError::TruncatedPage { needed, available })
    }

    fn consume_front(&mut self, cnt: usize) {
        self.buffer.drain(..cnt);
    }

    /// Scans the buffer for the next capture pattern.
    fn scan_capture(&self) -> Option<usize> {
        let mut offset = 0;
        let mut state = 0;
        for (i, &byte) in self.buffer.iter().enumerate() {
            match (state, byte) {
                (_, b'O') => {
                    state = 1;
                    offset = i;
                }
                (1, b'g') => state = 2,
                (2, b'g') => state = 3,
                (3, b'S') => return Some(offset),
                _ => state = 0,
            }
        }

        None
    }

    /// Parses one page off the front of the buffer, pushing completed
    /// packets and reportable errors onto the output queues.
    fn parse_page(&mut self) -> Result<(), DemuxError> {
        if self.buffer.len() < MIN_HEADER_LEN {
            return Err(DemuxError::InsufficientData);
        }

        if !self.buffer.iter().take(4).eq(CAPTURE_PATTERN.iter()) {
            return match self.scan_capture() {
                Some(offset) => {
                    self.consume_front(offset);
                    self.error_count += 1;
                    Err(DemuxError::InvalidCapturePattern { skipped: offset })
                }
                None => {
                    // Keep a potential pattern prefix for the next push.
                    self.consume_front(self.buffer.len().saturating_sub(3));
                    Err(DemuxError::InsufficientData)
                }
            };
        }

        let version = self.buffer[4];
        if version != 0 {
            self.consume_front(4);
            self.error_count += 1;
            return Err(DemuxError::UnsupportedVersion(version));
        }

        let segments = self.buffer[26] as usize;
        let header_len = MIN_HEADER_LEN + segments;
        if self.buffer.len() < header_len {
            return Err(DemuxError::InsufficientData);
        }

        let body_len: usize = self
            .buffer
            .range(MIN_HEADER_LEN..header_len)
            .map(|&v| v as usize)
            .sum();
        let total_len = header_len + body_len;
        if self.buffer.len() < total_len {
            return Err(DemuxError::InsufficientData);
        }

        let page = self.buffer.range(..total_len).copied().collect::<Vec<_>>();
        let header = PageHeader::read(&page)?;

        // Checksum covers the whole page with the checksum field zeroed.
        let mut calculated = self.crc.update(self.crc.init, &page[..22]);
        calculated = self.crc.update(calculated, &[0u8; 4]);
        calculated = self.crc.update(calculated, &page[26..]);

        self.consume_front(total_len);

        if calculated != header.checksum {
            self.error_count += 1;
            return Err(DemuxError::ChecksumMismatch {
                serial: header.serial,
                sequence: header.sequence,
                calculated,
                read: header.checksum,
            });
        }

        self.pages_processed += 1;
        let serial = header.serial;

        let mut gap = false;
        if let Some(prev) = self.last_sequence.insert(serial, header.sequence) {
            let expected = prev.wrapping_add(1);
            if header.sequence != expected {
                gap = true;
                self.error_count += 1;
                self.errors.push_back(DemuxError::SequenceGap {
                    serial,
                    expected,
                    read: header.sequence,
                });
                if let Some(partial) = self.pending.remove(&serial) {
                    self.buffer_pool.release(partial);
                }
            }
        }

        if header.granule_position != GRANULE_NONE {
            if let Some(&prev) = self.last_granule.get(&serial) {
                if header.granule_position < prev {
                    log_or_err!(
                        self,
                        log::Level::Warn,
                        DemuxError::GranuleRegression {
                            serial,
                            prev,
                            read: header.granule_position,
                        }
                    );
                }
            }
            self.last_granule.insert(serial, header.granule_position);
        }

        // Reassembly: resume the stream's partial packet, or start fresh.
        // A continued page whose packet head is missing (gap, or joined
        // mid-packet) has its leading segments discarded up to the first
        // packet boundary.
        let mut discard_head = false;
        let mut assembly = if header.is_continued() {
            if self.discarding.remove(&serial) {
                discard_head = true;
                self.buffer_pool.acquire()
            } else {
                match self.pending.remove(&serial) {
                    Some(partial) => partial,
                    None => {
                        // A gap already explains the missing head.
                        if !gap {
                            self.error_count += 1;
                            self.errors
                                .push_back(DemuxError::ContinuationWithoutStart { serial });
                        }
                        discard_head = true;
                        self.buffer_pool.acquire()
                    }
                }
            }
        } else {
            self.discarding.remove(&serial);
            if let Some(partial) = self.pending.remove(&serial) {
                self.error_count += 1;
                self.errors.push_back(DemuxError::UnfinishedPacket { serial });
                self.buffer_pool.release(partial);
            }
            self.buffer_pool.acquire()
        };

        let body = &page[header_len..];
        let mut offset = 0;
        let mut completed: Vec<Vec<u8>> = Vec::new();
        let mut open = !discard_head && header.is_continued();

        for &lace in &header.lacing {
            let len = lace as usize;
            let segment = &body[offset..offset + len];
            offset += len;

            if discard_head {
                if lace < 255 {
                    discard_head = false;
                }
                continue;
            }

            assembly.extend_from_slice(segment);
            open = lace == 255;
            if !open {
                completed.push(std::mem::replace(&mut assembly, self.buffer_pool.acquire()));
            }
        }

        if discard_head {
            // The broken packet spans past this page; keep discarding.
            self.discarding.insert(serial);
            self.buffer_pool.release(assembly);
        } else if open {
            self.pending.insert(serial, assembly);
        } else {
            self.buffer_pool.release(assembly);
        }

        let last = completed.len().saturating_sub(1);
        let page_granule = (header.granule_position != GRANULE_NONE)
            .then_some(header.granule_position);
        for (i, data) in completed.into_iter().enumerate() {
            self.packets_produced += 1;
            self.ready.push_back(Packet {
                serial,
                granule_position: if i == last { page_granule } else { None },
                bos: header.is_bos(),
                eos: header.is_eos() && i == last,
                data: data.into(),
            });
        }

        Ok(())
    }
}

impl Iterator for Demuxer {
    type Item = Result<Packet, DemuxError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(error) = self.errors.pop_front() {
                return Some(Err(error));
            }
            if let Some(packet) = self.ready.pop_front() {
                return Some(Ok(packet));
            }
            if self.io_counter == 0 {
                return None;
            }

            match self.parse_page() {
                Ok(()) => continue,
                Err(DemuxError::InsufficientData) => {
                    self.io_counter -= 1;
                    return Some(Err(DemuxError::InsufficientData));
                }
                Err(error) => return Some(Err(error)),
            }
        }
    }
}

#[cfg(test)]
use crate::structs::page::{FLAG_BOS, FLAG_CONTINUED, build_page};

#[cfg(test)]
fn collect_packets(demuxer: &mut Demuxer) -> (Vec<Packet>, Vec<DemuxError>) {
    let mut packets = Vec::new();
    let mut errors = Vec::new();
    for item in demuxer.by_ref() {
        match item {
            Ok(packet) => packets.push(packet),
            Err(DemuxError::InsufficientData) => break,
            Err(error) => errors.push(error),
        }
    }

    (packets, errors)
}

#[test]
fn single_page_packets() {
    let mut demuxer = Demuxer::default();
    let page = build_page(7, 0, 64, FLAG_BOS, &[(b"alpha", false), (b"bravo!", false)]);
    demuxer.push_bytes(&page);

    let (packets, errors) = collect_packets(&mut demuxer);
    assert!(errors.is_empty());
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].as_ref(), b"alpha");
    assert_eq!(packets[0].granule_position, None);
    assert!(packets[0].bos);
    assert_eq!(packets[1].as_ref(), b"bravo!");
    assert_eq!(packets[1].granule_position, Some(64));
}

#[test]
fn packet_spanning_pages_is_byte_identical() {
    // The same 600-byte packet, whole and split across two pages, must
    // reassemble identically.
    let payload: Vec<u8> = (0..600u32).map(|i| (i * 31 + 7) as u8).collect();

    let mut whole = Demuxer::default();
    whole.push_bytes(&build_page(1, 0, 0, FLAG_BOS, &[(&payload, false)]));
    let (reference, _) = collect_packets(&mut whole);

    let mut split = Demuxer::default();
    split.push_bytes(&build_page(1, 0, GRANULE_NONE, FLAG_BOS, &[(&payload[..510], true)]));
    split.push_bytes(&build_page(1, 1, 0, FLAG_CONTINUED, &[(&payload[510..], false)]));
    let (packets, errors) = collect_packets(&mut split);

    assert!(errors.is_empty());
    assert_eq!(packets.len(), 1);
    assert_eq!(reference.len(), 1);
    assert_eq!(packets[0].as_ref(), reference[0].as_ref());
    assert_eq!(packets[0].as_ref(), payload.as_slice());
}

#[test]
fn sequence_gap_reported_not_skipped() {
    let mut demuxer = Demuxer::default();
    demuxer.push_bytes(&build_page(5, 0, 1, FLAG_BOS, &[(b"one", false)]));
    demuxer.push_bytes(&build_page(5, 1, 2, 0, &[(b"two", false)]));
    // Page 2 lost in transit.
    demuxer.push_bytes(&build_page(5, 3, 4, 0, &[(b"four", false)]));

    let (packets, errors) = collect_packets(&mut demuxer);
    assert_eq!(packets.len(), 3);
    assert_eq!(packets[2].as_ref(), b"four");
    assert!(matches!(
        errors.as_slice(),
        [DemuxError::SequenceGap {
            serial: 5,
            expected: 2,
            read: 3,
        }]
    ));
}

#[test]
fn gap_drops_partial_packet() {
    let head: Vec<u8> = vec![0xAA; 255];
    let mut demuxer = Demuxer::default();
    demuxer.push_bytes(&build_page(5, 0, GRANULE_NONE, FLAG_BOS, &[(&head, true)]));
    // The page carrying the packet tail is lost; the next page starts a
    // fresh packet.
    demuxer.push_bytes(&build_page(5, 2, 9, 0, &[(b"fresh", false)]));

    let (packets, errors) = collect_packets(&mut demuxer);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].as_ref(), b"fresh");
    assert!(matches!(errors.as_slice(), [DemuxError::SequenceGap { .. }]));
}

#[test]
fn corrupt_checksum_page_skipped_stream_continues() {
    let mut good_before = build_page(9, 0, 1, FLAG_BOS, &[(b"before", false)]);
    let mut corrupt = build_page(9, 1, 2, 0, &[(b"mangled", false)]);
    let good_after = build_page(9, 2, 3, 0, &[(b"after", false)]);
    *corrupt.last_mut().unwrap() ^= 0xFF;

    let mut demuxer = Demuxer::default();
    good_before.extend_from_slice(&corrupt);
    good_before.extend_from_slice(&good_after);
    demuxer.push_bytes(&good_before);

    let (packets, errors) = collect_packets(&mut demuxer);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].as_ref(), b"before");
    assert_eq!(packets[1].as_ref(), b"after");
    // The corrupt page is reported, and so is the sequence gap it leaves.
    assert!(matches!(errors[0], DemuxError::ChecksumMismatch { sequence: 1, .. }));
    assert!(matches!(errors[1], DemuxError::SequenceGap { .. }));
}

#[test]
fn resync_after_garbage() {
    let mut demuxer = Demuxer::default();
    let mut data = b"not a container at all".to_vec();
    data.extend_from_slice(&build_page(3, 0, 7, FLAG_BOS, &[(b"payload", false)]));
    demuxer.push_bytes(&data);

    let (packets, errors) = collect_packets(&mut demuxer);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].as_ref(), b"payload");
    assert!(matches!(
        errors.as_slice(),
        [DemuxError::InvalidCapturePattern { skipped: 22 }]
    ));
}

#[test]
fn insufficient_until_more_data() {
    let page = build_page(2, 0, 0, FLAG_BOS, &[(b"deferred", false)]);
    let mut demuxer = Demuxer::default();
    demuxer.push_bytes(&page[..10]);

    assert!(matches!(
        demuxer.next(),
        Some(Err(DemuxError::InsufficientData))
    ));
    assert!(demuxer.next().is_none());

    demuxer.push_bytes(&page[10..]);
    let packet = demuxer.next().unwrap().unwrap();
    assert_eq!(packet.as_ref(), b"deferred");
}

#[test]
fn zero_length_packet_yielded() {
    let mut demuxer = Demuxer::default();
    demuxer.push_bytes(&build_page(4, 0, 10, FLAG_BOS, &[(b"", false)]));

    let (packets, errors) = collect_packets(&mut demuxer);
    assert!(errors.is_empty());
    assert_eq!(packets.len(), 1);
    assert!(packets[0].as_ref().is_empty());
    assert_eq!(packets[0].granule_position, Some(10));
}

#[test]
fn truncated_final_page_reported() {
    let page = build_page(6, 0, 0, FLAG_BOS, &[(b"short", false)]);
    let mut demuxer = Demuxer::default();
    demuxer.push_bytes(&page[..page.len() - 2]);

    assert!(matches!(
        demuxer.next(),
        Some(Err(DemuxError::InsufficientData))
    ));
    let needed = page.len();
    assert!(matches!(
        demuxer.finish(),
        Some(DemuxError::TruncatedPage { needed: n, available }) if n == needed && available == needed - 2
    ));
}
