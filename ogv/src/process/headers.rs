use anyhow::{Result, bail};

use crate::structs::headers::{
    CODEC_SIGNATURE, CommentHeader, DecodeContext, HEADER_TYPE_COMMENT, HEADER_TYPE_IDENT,
    HEADER_TYPE_SETUP, IdentificationHeader, SetupHeader,
};
use crate::structs::packet::{Packet, StreamKind};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::HeaderError;

/// Identifies the codec of a newly discovered logical stream from its
/// first packet.
///
/// Classification is a closed set: either the packet opens with the
/// identification type byte and the codec signature, or the stream is
/// retained as [`StreamKind::Unrecognized`] and never decoded.
pub fn classify(packet: &Packet) -> StreamKind {
    let data = packet.as_ref();
    if data.len() >= 7 && data[0] == HEADER_TYPE_IDENT && data[1..7] == CODEC_SIGNATURE[..] {
        StreamKind::Video
    } else {
        StreamKind::Unrecognized
    }
}

/// Parses the fixed header packet sequence of a video stream.
///
/// The three headers must arrive in identification, comment, setup order;
/// anything else is a protocol error and fatal to the stream. Completion
/// yields the immutable [`DecodeContext`]; any further header packet is
/// an attempt to redefine it and is rejected.
#[derive(Default)]
pub struct HeaderParser {
    state: HeaderParserState,
}

impl HeaderParser {
    /// Feeds one header packet. Returns the decode context once the
    /// final header has been parsed.
    pub fn parse(&mut self, packet: &Packet) -> Result<Option<DecodeContext>> {
        let data = packet.as_ref();
        let Some(&type_byte) = data.first() else {
            bail!(HeaderError::NotAHeader(0x00));
        };
        if type_byte & 0x80 == 0 {
            bail!(HeaderError::NotAHeader(type_byte));
        }
        if self.state.expect == Expect::Done {
            bail!(HeaderError::ContextRedefined);
        }
        if data.len() < 7 || data[1..7] != CODEC_SIGNATURE[..] {
            bail!(HeaderError::UnknownSignature {
                serial: packet.serial,
            });
        }
        if type_byte != self.state.expect.type_byte() {
            bail!(HeaderError::UnexpectedHeaderOrder {
                expected: self.state.expect.name(),
                read: type_byte,
            });
        }

        let body = &data[7..];
        let mut reader = BsIoSliceReader::from_slice(body);

        match self.state.expect {
            Expect::Ident => {
                let ident = IdentificationHeader::read(&self.state, &mut reader)?;
                self.state.ident = Some(ident);
                self.state.expect = Expect::Comment;
                Ok(None)
            }
            Expect::Comment => {
                self.state.comment = Some(CommentHeader::read(&mut reader)?);
                self.state.expect = Expect::Setup;
                Ok(None)
            }
            Expect::Setup => {
                let setup = SetupHeader::read(&mut reader, body)?;
                self.state.expect = Expect::Done;

                // The identification header is present by construction.
                let ident = self.state.ident.clone().unwrap();
                Ok(Some(DecodeContext { ident, setup }))
            }
            Expect::Done => unreachable!(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.expect == Expect::Done
    }

    /// Headers parsed so far, for diagnostics on truncated streams.
    pub fn headers_parsed(&self) -> usize {
        match self.state.expect {
            Expect::Ident => 0,
            Expect::Comment => 1,
            Expect::Setup => 2,
            Expect::Done => 3,
        }
    }

    /// The comment header, once parsed.
    pub fn comment(&self) -> Option<&CommentHeader> {
        self.state.comment.as_ref()
    }

    /// Sets the failure level for validation warnings.
    ///
    /// - `log::Level::Error`: only fail on hard violations (default)
    /// - `log::Level::Warn`: fail on warnings too (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.state.fail_level = level;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Expect {
    #[default]
    Ident,
    Comment,
    Setup,
    Done,
}

impl Expect {
    fn type_byte(self) -> u8 {
        match self {
            Self::Ident => HEADER_TYPE_IDENT,
            Self::Comment => HEADER_TYPE_COMMENT,
            Self::Setup => HEADER_TYPE_SETUP,
            Self::Done => 0,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Ident => "identification header",
            Self::Comment => "comment header",
            Self::Setup => "setup header",
            Self::Done => "no further header",
        }
    }
}

#[derive(Debug)]
pub struct HeaderParserState {
    pub fail_level: log::Level,
    expect: Expect,
    ident: Option<IdentificationHeader>,
    comment: Option<CommentHeader>,
}

impl Default for HeaderParserState {
    fn default() -> Self {
        Self {
            fail_level: log::Level::Error,
            expect: Expect::Ident,
            ident: None,
            comment: None,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_packet(serial: u32, bos: bool, data: Vec<u8>) -> Packet {
    Packet {
        serial,
        granule_position: None,
        bos,
        eos: false,
        data: data.into(),
    }
}

#[cfg(test)]
use crate::structs::headers::test_packets;

#[test]
fn full_header_sequence() -> Result<()> {
    let mut parser = HeaderParser::default();

    let ident = test_packet(1, true, test_packets::ident_packet(45, 31, 704, 480, 0, 0, 6, 0));
    let comment = test_packet(1, false, test_packets::comment_packet("v", &["A=1"]));
    let setup = test_packet(1, false, test_packets::setup_packet(&[0x55; 16]));

    assert_eq!(classify(&ident), StreamKind::Video);
    assert!(parser.parse(&ident)?.is_none());
    assert!(parser.parse(&comment)?.is_none());

    let context = parser.parse(&setup)?.expect("context after third header");
    assert!(parser.is_complete());
    assert_eq!(context.coded_width(), 720);
    assert_eq!(context.coded_height(), 496);
    assert_eq!(context.ident.pic_width, 704);
    assert_eq!(parser.comment().unwrap().comments, vec!["A=1"]);
    Ok(())
}

#[test]
fn out_of_order_headers_rejected() {
    let mut parser = HeaderParser::default();
    let comment = test_packet(1, false, test_packets::comment_packet("v", &[]));

    let err = parser.parse(&comment).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HeaderError>(),
        Some(HeaderError::UnexpectedHeaderOrder {
            expected: "identification header",
            read: 0x81,
        })
    ));
}

#[test]
fn context_redefinition_rejected() -> Result<()> {
    let mut parser = HeaderParser::default();
    parser.parse(&test_packet(
        1,
        true,
        test_packets::ident_packet(4, 4, 64, 64, 0, 0, 3, 0),
    ))?;
    parser.parse(&test_packet(1, false, test_packets::comment_packet("v", &[])))?;
    parser.parse(&test_packet(1, false, test_packets::setup_packet(&[])))?;

    let again = test_packet(1, false, test_packets::ident_packet(4, 4, 64, 64, 0, 0, 3, 0));
    let err = parser.parse(&again).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HeaderError>(),
        Some(HeaderError::ContextRedefined)
    ));
    Ok(())
}

#[test]
fn data_packet_is_not_a_header() {
    let mut parser = HeaderParser::default();
    let frame = test_packet(1, false, vec![0x00, 0xAB, 0xCD]);

    let err = parser.parse(&frame).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HeaderError>(),
        Some(HeaderError::NotAHeader(0x00))
    ));
}

#[test]
fn foreign_stream_unrecognized() {
    // A Vorbis-style first packet: header type byte, different signature.
    let mut data = vec![0x01];
    data.extend_from_slice(b"vorbis");
    data.extend_from_slice(&[0u8; 20]);

    assert_eq!(
        classify(&test_packet(2, true, data)),
        StreamKind::Unrecognized
    );
}

#[test]
fn malformed_picture_region_rejected() {
    let mut parser = HeaderParser::default();
    // Picture region wider than the coded frame.
    let ident = test_packet(1, true, test_packets::ident_packet(2, 2, 100, 32, 0, 0, 3, 0));

    let err = parser.parse(&ident).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HeaderError>(),
        Some(HeaderError::PictureRegionOutOfBounds { .. })
    ));
}
