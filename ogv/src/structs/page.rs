//! Container page framing.
//!
//! A page is the container's transport frame: a fixed header carrying the
//! logical stream serial number, a per-stream sequence number and a
//! granule position, followed by a lacing table and a body. Packets are
//! reassembled from body segments; a lacing value of 255 continues the
//! packet into the next segment, possibly onto the next page.

use crate::utils::errors::DemuxError;

/// Capture pattern marking every page boundary.
pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

/// Fixed header length up to and including the segment count byte.
pub const MIN_HEADER_LEN: usize = 27;

/// Largest possible page: fixed header, full lacing table, 255 segments
/// of 255 bytes.
pub const MAX_PAGE_LEN: usize = MIN_HEADER_LEN + 255 + 255 * 255;

/// First segment continues a packet begun on the previous page.
pub const FLAG_CONTINUED: u8 = 0x01;

/// First page of a logical stream.
pub const FLAG_BOS: u8 = 0x02;

/// Last page of a logical stream.
pub const FLAG_EOS: u8 = 0x04;

/// Granule position of a page on which no packet completes.
pub const GRANULE_NONE: i64 = -1;

/// Parsed page header, including the lacing table.
#[derive(Debug, Clone)]
pub struct PageHeader {
    pub version: u8,
    pub flags: u8,
    pub granule_position: i64,
    pub serial: u32,
    pub sequence: u32,
    pub checksum: u32,
    pub lacing: Vec<u8>,
}

impl PageHeader {
    /// Parses a header from bytes positioned at a page boundary.
    ///
    /// `buf` must hold at least [`MIN_HEADER_LEN`] bytes plus the lacing
    /// table; the caller sizes it from the segment count byte.
    pub fn read(buf: &[u8]) -> Result<Self, DemuxError> {
        if buf[..4] != CAPTURE_PATTERN {
            return Err(DemuxError::InvalidCapturePattern { skipped: 0 });
        }

        let version = buf[4];
        if version != 0 {
            return Err(DemuxError::UnsupportedVersion(version));
        }

        let segments = buf[26] as usize;
        let lacing = buf[MIN_HEADER_LEN..MIN_HEADER_LEN + segments].to_vec();

        Ok(Self {
            version,
            flags: buf[5],
            granule_position: i64::from_le_bytes(buf[6..14].try_into().unwrap()),
            serial: u32::from_le_bytes(buf[14..18].try_into().unwrap()),
            sequence: u32::from_le_bytes(buf[18..22].try_into().unwrap()),
            checksum: u32::from_le_bytes(buf[22..26].try_into().unwrap()),
            lacing,
        })
    }

    pub fn header_len(&self) -> usize {
        MIN_HEADER_LEN + self.lacing.len()
    }

    pub fn body_len(&self) -> usize {
        self.lacing.iter().map(|&v| v as usize).sum()
    }

    pub fn total_len(&self) -> usize {
        self.header_len() + self.body_len()
    }

    pub fn is_continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.flags & FLAG_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.flags & FLAG_EOS != 0
    }
}

/// Builds a complete page with a valid checksum from packet segments.
///
/// Each entry in `segments` becomes one run of lacing values: a packet
/// payload produces `len / 255` lacing values of 255 and a final value of
/// `len % 255`. A payload passed with `open = true` omits the terminating
/// lacing value so the packet continues on the following page.
#[cfg(test)]
pub(crate) fn build_page(
    serial: u32,
    sequence: u32,
    granule_position: i64,
    flags: u8,
    segments: &[(&[u8], bool)],
) -> Vec<u8> {
    use crate::utils::crc::{CRC_PAGE_ALG, Crc32};

    let mut lacing = Vec::new();
    let mut body = Vec::new();

    for &(payload, open) in segments {
        assert!(
            !open || (payload.len() % 255 == 0 && !payload.is_empty()),
            "open segments must be a positive multiple of 255 bytes"
        );
        let mut remaining = payload.len();
        loop {
            if remaining >= 255 {
                lacing.push(255u8);
                remaining -= 255;
                if remaining == 0 && open {
                    break;
                }
            } else {
                if !open {
                    lacing.push(remaining as u8);
                }
                break;
            }
        }
        body.extend_from_slice(payload);
    }
    assert!(lacing.len() <= 255, "test page overflows the lacing table");

    let mut page = Vec::with_capacity(MIN_HEADER_LEN + lacing.len() + body.len());
    page.extend_from_slice(&CAPTURE_PATTERN);
    page.push(0);
    page.push(flags);
    page.extend_from_slice(&granule_position.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0u8; 4]);
    page.push(lacing.len() as u8);
    page.extend_from_slice(&lacing);
    page.extend_from_slice(&body);

    let crc = Crc32::new(&CRC_PAGE_ALG);
    let checksum = crc.update(crc.init, &page);
    page[22..26].copy_from_slice(&checksum.to_le_bytes());

    page
}

#[test]
fn header_round_trip() {
    let raw = build_page(0x1234_5678, 7, 160, FLAG_EOS, &[(&[9u8; 300], false)]);

    let header = PageHeader::read(&raw).unwrap();
    assert_eq!(header.serial, 0x1234_5678);
    assert_eq!(header.sequence, 7);
    assert_eq!(header.granule_position, 160);
    assert!(header.is_eos());
    assert!(!header.is_bos());
    assert_eq!(header.lacing, vec![255, 45]);
    assert_eq!(header.body_len(), 300);
    assert_eq!(raw.len(), header.total_len());
}

#[test]
fn open_segment_omits_terminator() {
    // 255-byte payload marked open: lacing 255 with no closing value.
    let raw = build_page(1, 0, GRANULE_NONE, 0, &[(&[0u8; 255], true)]);

    let header = PageHeader::read(&raw).unwrap();
    assert_eq!(header.lacing, vec![255]);
}

#[test]
fn version_must_be_zero() {
    let mut raw = build_page(1, 0, 0, 0, &[(b"x", false)]);
    raw[4] = 1;

    assert!(matches!(
        PageHeader::read(&raw),
        Err(DemuxError::UnsupportedVersion(1))
    ));
}
