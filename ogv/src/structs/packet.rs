use std::sync::Arc;

/// A codec packet reassembled from one or more page segments.
///
/// Packets within a logical stream are strictly ordered; this order is
/// the decode order. A packet may have been carried across several pages
/// via the continuation mechanism; by the time it exists as a value the
/// page structure is gone and only the payload remains.
///
/// # Data Access
///
/// Packet payloads can be accessed through the [`AsRef<[u8]>`]
/// implementation. Zero-length payloads are legal and mean "repeat the
/// previous frame" for the video codec.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Serial number of the logical stream this packet belongs to.
    pub serial: u32,

    /// Granule position of the page this packet completed on, if it was
    /// the last packet completed there.
    pub granule_position: Option<i64>,

    /// Packet came from a beginning-of-stream page.
    pub bos: bool,

    /// Packet is the last of its logical stream.
    pub eos: bool,

    pub data: Arc<[u8]>,
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Packet {
    /// Checks whether this packet is a codec header packet.
    ///
    /// Header packets carry a type byte with the top bit set; frame data
    /// packets always start with a clear top bit, and the empty packet is
    /// a frame packet (repeat marker).
    pub fn is_header(&self) -> bool {
        self.data.first().is_some_and(|&b| b & 0x80 != 0)
    }
}

/// Classification of a logical stream, decided from its first packet.
///
/// A closed set: recognized video streams are decoded, everything else is
/// retained for accounting but never routed to the decode driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// The target video codec.
    Video,
    /// Any other payload (audio, text, unknown).
    Unrecognized,
}

/// Per-stream bookkeeping: classification and the queue of packets not
/// yet consumed by the decode driver.
#[derive(Debug)]
pub struct LogicalStream {
    pub serial: u32,
    pub kind: StreamKind,
    pub queue: std::collections::VecDeque<Packet>,
    pub packets_seen: u64,
    pub last_granule: Option<i64>,
}

impl LogicalStream {
    pub fn new(serial: u32, kind: StreamKind) -> Self {
        Self {
            serial,
            kind,
            queue: std::collections::VecDeque::new(),
            packets_seen: 0,
            last_granule: None,
        }
    }

    /// Records a packet. Only video streams keep the payload; other
    /// streams are tallied and the payload is dropped.
    pub fn push(&mut self, packet: Packet) {
        self.packets_seen += 1;
        if let Some(granule) = packet.granule_position {
            self.last_granule = Some(granule);
        }

        if self.kind == StreamKind::Video {
            self.queue.push_back(packet);
        }
    }
}

#[test]
fn header_detection() {
    let header = Packet {
        serial: 1,
        granule_position: None,
        bos: true,
        eos: false,
        data: vec![0x80, b't'].into(),
    };
    let frame = Packet {
        serial: 1,
        granule_position: Some(0),
        bos: false,
        eos: false,
        data: vec![0x00, 0xFF].into(),
    };
    let repeat = Packet {
        serial: 1,
        granule_position: None,
        bos: false,
        eos: false,
        data: Vec::new().into(),
    };

    assert!(header.is_header());
    assert!(!frame.is_header());
    assert!(!repeat.is_header());
}

#[test]
fn unrecognized_streams_drop_payloads() {
    let mut stream = LogicalStream::new(9, StreamKind::Unrecognized);
    stream.push(Packet {
        serial: 9,
        granule_position: Some(44100),
        bos: false,
        eos: false,
        data: vec![1, 2, 3].into(),
    });

    assert_eq!(stream.packets_seen, 1);
    assert_eq!(stream.last_granule, Some(44100));
    assert!(stream.queue.is_empty());
}
