//! Video stream header packets and the decode context built from them.
//!
//! ## Header Sequence
//!
//! A video stream opens with exactly three header packets, in order:
//! identification (geometry, frame rate, subsampling), comment (vendor
//! string and user metadata) and setup (quantization and filter tables).
//! Each starts with a type byte and a 6-byte codec signature.
//!
//! The identification and setup headers are MSB-first bitpacked; the
//! comment header is byte-aligned with little-endian length fields.

use anyhow::{Result, bail};
use log::Level::Warn;

use crate::log_or_err;
use crate::process::headers::HeaderParserState;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::HeaderError;

/// Codec signature following the type byte of every header packet.
pub const CODEC_SIGNATURE: &[u8; 6] = b"theora";

/// Type byte of the identification header packet.
pub const HEADER_TYPE_IDENT: u8 = 0x80;

/// Type byte of the comment header packet.
pub const HEADER_TYPE_COMMENT: u8 = 0x81;

/// Type byte of the setup header packet.
pub const HEADER_TYPE_SETUP: u8 = 0x82;

/// Supported bitstream version.
pub const VERSION_MAJOR: u8 = 3;
pub const VERSION_MINOR: u8 = 2;

/// Upper bound on base quantization matrices in the setup header.
pub const MAX_BASE_MATRICES: usize = 384;

/// Chroma subsampling layout of the coded planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Chroma at half resolution in both directions.
    Yuv420,
    /// Chroma at half horizontal, full vertical resolution.
    Yuv422,
    /// Chroma at full resolution.
    Yuv444,
}

impl PixelFormat {
    pub fn from_code(code: u8) -> Result<Self, HeaderError> {
        match code {
            0 => Ok(Self::Yuv420),
            2 => Ok(Self::Yuv422),
            3 => Ok(Self::Yuv444),
            _ => Err(HeaderError::ReservedPixelFormat),
        }
    }

    /// Right-shifts applied to luma dimensions to obtain chroma plane
    /// dimensions, as `(horizontal, vertical)`.
    pub fn chroma_shift(self) -> (u32, u32) {
        match self {
            Self::Yuv420 => (1, 1),
            Self::Yuv422 => (1, 0),
            Self::Yuv444 => (0, 0),
        }
    }
}

/// Colorspace declared by the identification header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Unspecified,
    /// ITU-R BT.470 System M (NTSC).
    Rec470M,
    /// ITU-R BT.470 System B/G (PAL).
    Rec470Bg,
    Reserved(u8),
}

impl Colorspace {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Unspecified,
            1 => Self::Rec470M,
            2 => Self::Rec470Bg,
            other => Self::Reserved(other),
        }
    }
}

/// Identification header: frame geometry, timing and subsampling.
///
/// Coded dimensions are macroblock multiples (16 pixels) and commonly
/// exceed the visible picture region; the region must fit inside the
/// coded frame, anchored from the top-left corner.
#[derive(Debug, Clone)]
pub struct IdentificationHeader {
    pub version: (u8, u8, u8),

    /// Coded frame size in macroblocks.
    pub mb_width: u16,
    pub mb_height: u16,

    /// Coded frame size in pixels (macroblocks times 16).
    pub coded_width: u32,
    pub coded_height: u32,

    /// Visible picture region and its offset inside the coded frame.
    pub pic_width: u32,
    pub pic_height: u32,
    pub pic_x: u8,
    pub pic_y: u8,

    pub frame_rate_numerator: u32,
    pub frame_rate_denominator: u32,

    pub aspect_numerator: u32,
    pub aspect_denominator: u32,

    pub colorspace: Colorspace,
    pub nominal_bitrate: u32,
    pub quality: u8,

    /// Granule positions split into a keyframe count and an offset; this
    /// is the split point in bits.
    pub kf_granule_shift: u8,

    pub pixel_format: PixelFormat,
}

impl IdentificationHeader {
    /// Reads the header body, positioned after the codec signature.
    pub fn read(state: &HeaderParserState, reader: &mut BsIoSliceReader) -> Result<Self> {
        let major: u8 = reader.get_n(8)?;
        let minor: u8 = reader.get_n(8)?;
        let revision: u8 = reader.get_n(8)?;

        if major != VERSION_MAJOR || minor != VERSION_MINOR {
            bail!(HeaderError::UnsupportedBitstreamVersion {
                major,
                minor,
                revision,
            });
        }

        let mb_width: u16 = reader.get_n(16)?;
        let mb_height: u16 = reader.get_n(16)?;
        if mb_width == 0 || mb_height == 0 {
            bail!(HeaderError::ZeroFrameSize {
                mb_width,
                mb_height,
            });
        }

        let coded_width = mb_width as u32 * 16;
        let coded_height = mb_height as u32 * 16;

        let pic_width: u32 = reader.get_n(24)?;
        let pic_height: u32 = reader.get_n(24)?;
        let pic_x: u8 = reader.get_n(8)?;
        let pic_y: u8 = reader.get_n(8)?;

        if pic_width + pic_x as u32 > coded_width || pic_height + pic_y as u32 > coded_height {
            bail!(HeaderError::PictureRegionOutOfBounds {
                pic_width,
                pic_height,
                pic_x: pic_x as u32,
                pic_y: pic_y as u32,
                coded_width,
                coded_height,
            });
        }

        let frame_rate_numerator: u32 = reader.get_n(32)?;
        let frame_rate_denominator: u32 = reader.get_n(32)?;
        if frame_rate_numerator == 0 || frame_rate_denominator == 0 {
            bail!(HeaderError::ZeroFrameRate {
                numerator: frame_rate_numerator,
                denominator: frame_rate_denominator,
            });
        }

        let aspect_numerator: u32 = reader.get_n(24)?;
        let aspect_denominator: u32 = reader.get_n(24)?;

        let colorspace = Colorspace::from_code(reader.get_n(8)?);
        let nominal_bitrate: u32 = reader.get_n(24)?;

        let quality: u8 = reader.get_n(6)?;
        let kf_granule_shift: u8 = reader.get_n(5)?;
        let pixel_format = PixelFormat::from_code(reader.get_n(2)?)?;

        let reserved: u8 = reader.get_n(3)?;
        if reserved != 0 {
            log_or_err!(
                state,
                Warn,
                anyhow::anyhow!(HeaderError::ReservedBitsNonZero(reserved))
            );
        }

        Ok(Self {
            version: (major, minor, revision),
            mb_width,
            mb_height,
            coded_width,
            coded_height,
            pic_width,
            pic_height,
            pic_x,
            pic_y,
            frame_rate_numerator,
            frame_rate_denominator,
            aspect_numerator,
            aspect_denominator,
            colorspace,
            nominal_bitrate,
            quality,
            kf_granule_shift,
            pixel_format,
        })
    }

    /// Number of frames a granule position accounts for.
    pub fn granule_to_frame_count(&self, granule: i64) -> u64 {
        let granule = granule as u64;
        let offset_mask = (1u64 << self.kf_granule_shift) - 1;

        (granule >> self.kf_granule_shift) + (granule & offset_mask)
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate_numerator as f64 / self.frame_rate_denominator as f64
    }
}

/// Comment header: vendor string and user metadata.
///
/// Length fields are byte-aligned little-endian. Invalid UTF-8 is
/// replaced rather than rejected; metadata must never kill a decode.
#[derive(Debug, Clone, Default)]
pub struct CommentHeader {
    pub vendor: String,
    pub comments: Vec<String>,
}

impl CommentHeader {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let vendor = Self::read_string(reader)?;

        let count = reader.get_le32()? as usize;
        let remaining = (reader.available()? / 8) as usize;
        if count * 4 > remaining {
            bail!(HeaderError::CommentTooLong {
                declared: count * 4,
                remaining,
            });
        }

        let mut comments = Vec::with_capacity(count);
        for _ in 0..count {
            comments.push(Self::read_string(reader)?);
        }

        Ok(Self { vendor, comments })
    }

    fn read_string(reader: &mut BsIoSliceReader) -> Result<String> {
        let len = reader.get_le32()? as usize;
        let remaining = (reader.available()? / 8) as usize;
        if len > remaining {
            bail!(HeaderError::CommentTooLong {
                declared: len,
                remaining,
            });
        }

        let mut buf = vec![0u8; len];
        reader.get_bytes(&mut buf)?;

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Setup header: loop filter limits, quantizer scale tables and base
/// quantization matrices.
///
/// The remainder of the packet (quantizer range interpolation and the
/// codebooks) is transform-domain configuration; it is retained verbatim
/// for the decode-stage collaborator rather than interpreted here.
#[derive(Debug, Clone)]
pub struct SetupHeader {
    pub loop_filter_limits: [u8; 64],
    pub ac_scale: [u16; 64],
    pub dc_scale: [u16; 64],
    pub base_matrices: Vec<[u8; 64]>,

    /// Unparsed remainder of the setup packet, for the decode stage.
    pub tail: std::sync::Arc<[u8]>,
    /// Bit offset into the first byte of `tail` where the remainder starts.
    pub tail_bit_offset: u8,
}

impl SetupHeader {
    /// Reads the header body, positioned after the codec signature.
    /// `body` is the slice the reader was built from, used to retain the
    /// unparsed tail.
    pub fn read(reader: &mut BsIoSliceReader, body: &[u8]) -> Result<Self> {
        let mut loop_filter_limits = [0u8; 64];
        let nbits: u32 = reader.get_n(3)?;
        if nbits > 0 {
            for limit in loop_filter_limits.iter_mut() {
                *limit = reader.get_n(nbits)?;
            }
        }

        let mut ac_scale = [0u16; 64];
        let nbits: u32 = reader.get_n::<u32>(4)? + 1;
        for scale in ac_scale.iter_mut() {
            *scale = reader.get_n(nbits)?;
        }

        let mut dc_scale = [0u16; 64];
        let nbits: u32 = reader.get_n::<u32>(4)? + 1;
        for scale in dc_scale.iter_mut() {
            *scale = reader.get_n(nbits)?;
        }

        let matrix_count = reader.get_n::<u32>(9)? as usize + 1;
        if matrix_count > MAX_BASE_MATRICES {
            bail!(HeaderError::TooManyBaseMatrices(matrix_count));
        }

        let mut base_matrices = Vec::with_capacity(matrix_count);
        for _ in 0..matrix_count {
            let mut matrix = [0u8; 64];
            for value in matrix.iter_mut() {
                *value = reader.get_n(8)?;
            }
            base_matrices.push(matrix);
        }

        let position = reader.position()?;
        let tail_start = (position / 8) as usize;
        let tail_bit_offset = (position % 8) as u8;

        Ok(Self {
            loop_filter_limits,
            ac_scale,
            dc_scale,
            base_matrices,
            tail: body[tail_start.min(body.len())..].into(),
            tail_bit_offset,
        })
    }
}

/// Immutable per-stream decode configuration, established once from the
/// header packets. Any later packet attempting to change it is an error.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub ident: IdentificationHeader,
    pub setup: SetupHeader,
}

impl DecodeContext {
    pub fn coded_width(&self) -> u32 {
        self.ident.coded_width
    }

    pub fn coded_height(&self) -> u32 {
        self.ident.coded_height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.ident.pixel_format
    }
}

#[test]
fn granule_split() {
    let state = HeaderParserState::default();
    let packet = crate::structs::headers::test_packets::ident_packet(45, 30, 704, 480, 0, 0, 6, 0);
    let mut reader = BsIoSliceReader::from_slice(&packet[7..]);

    let ident = IdentificationHeader::read(&state, &mut reader).unwrap();
    assert_eq!(ident.kf_granule_shift, 6);

    // 3 keyframes, 5 delta frames since the last one.
    let granule = (3i64 << 6) | 5;
    assert_eq!(ident.granule_to_frame_count(granule), 8);
}

#[cfg(test)]
pub(crate) mod test_packets {
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    use super::{CODEC_SIGNATURE, HEADER_TYPE_COMMENT, HEADER_TYPE_IDENT, HEADER_TYPE_SETUP};

    /// Builds an identification header packet, 30000/1001 fps, square
    /// pixels, 4:2:0 unless `pf` says otherwise.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn ident_packet(
        mb_width: u16,
        mb_height: u16,
        pic_width: u32,
        pic_height: u32,
        pic_x: u8,
        pic_y: u8,
        kf_granule_shift: u8,
        pf: u8,
    ) -> Vec<u8> {
        let mut packet = vec![HEADER_TYPE_IDENT];
        packet.extend_from_slice(CODEC_SIGNATURE);
        packet.extend_from_slice(&[3, 2, 1]);
        packet.extend_from_slice(&mb_width.to_be_bytes());
        packet.extend_from_slice(&mb_height.to_be_bytes());
        packet.extend_from_slice(&pic_width.to_be_bytes()[1..]);
        packet.extend_from_slice(&pic_height.to_be_bytes()[1..]);
        packet.push(pic_x);
        packet.push(pic_y);
        packet.extend_from_slice(&30000u32.to_be_bytes());
        packet.extend_from_slice(&1001u32.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 1]);
        packet.extend_from_slice(&[0, 0, 1]);
        packet.push(0);
        packet.extend_from_slice(&[0, 0, 0]);

        // quality(6) | kf_granule_shift(5) | pixel_format(2) | reserved(3)
        let packed: u16 = (48u16 << 10)
            | ((kf_granule_shift as u16 & 0x1F) << 5)
            | ((pf as u16 & 0x3) << 3);
        packet.extend_from_slice(&packed.to_be_bytes());

        packet
    }

    pub(crate) fn comment_packet(vendor: &str, comments: &[&str]) -> Vec<u8> {
        let mut packet = vec![HEADER_TYPE_COMMENT];
        packet.extend_from_slice(CODEC_SIGNATURE);
        packet.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        packet.extend_from_slice(vendor.as_bytes());
        packet.extend_from_slice(&(comments.len() as u32).to_le_bytes());
        for comment in comments {
            packet.extend_from_slice(&(comment.len() as u32).to_le_bytes());
            packet.extend_from_slice(comment.as_bytes());
        }

        packet
    }

    /// Builds a minimal setup packet: 1-bit tables, one base matrix and
    /// an arbitrary tail for the decode stage.
    pub(crate) fn setup_packet(tail: &[u8]) -> Vec<u8> {
        let mut packet = vec![HEADER_TYPE_SETUP];
        packet.extend_from_slice(CODEC_SIGNATURE);

        let mut body = Vec::new();
        {
            let mut writer = BitWriter::endian(&mut body, BigEndian);
            writer.write_var(3, 1u8).unwrap();
            for i in 0..64u32 {
                writer.write_var(1, (i & 1) as u8).unwrap();
            }
            writer.write_var(4, 0u8).unwrap();
            for _ in 0..64 {
                writer.write_var(1, 1u8).unwrap();
            }
            writer.write_var(4, 0u8).unwrap();
            for _ in 0..64 {
                writer.write_var(1, 0u8).unwrap();
            }
            writer.write_var(9, 0u16).unwrap();
            for i in 0..64u32 {
                writer.write_var(8, i as u8).unwrap();
            }
            writer.byte_align().unwrap();
        }
        packet.extend_from_slice(&body);
        packet.extend_from_slice(tail);

        packet
    }
}

#[test]
fn setup_tables_parsed() {
    let packet = test_packets::setup_packet(b"tail-bytes");
    let mut reader = BsIoSliceReader::from_slice(&packet[7..]);

    let setup = SetupHeader::read(&mut reader, &packet[7..]).unwrap();
    assert_eq!(setup.loop_filter_limits[0], 0);
    assert_eq!(setup.loop_filter_limits[1], 1);
    assert_eq!(setup.ac_scale, [1u16; 64]);
    assert_eq!(setup.dc_scale, [0u16; 64]);
    assert_eq!(setup.base_matrices.len(), 1);
    assert_eq!(setup.base_matrices[0][63], 63);
    assert!(setup.tail.ends_with(b"tail-bytes"));
}

#[test]
fn comment_strings_parsed() {
    let packet = test_packets::comment_packet("ogv test", &["TITLE=probe", "ENCODER=none"]);
    let mut reader = BsIoSliceReader::from_slice(&packet[7..]);

    let comment = CommentHeader::read(&mut reader).unwrap();
    assert_eq!(comment.vendor, "ogv test");
    assert_eq!(comment.comments, vec!["TITLE=probe", "ENCODER=none"]);
}

#[test]
fn comment_length_overflow_rejected() {
    let mut packet = test_packets::comment_packet("v", &[]);
    // Vendor length field claims far more bytes than the packet holds.
    packet[7..11].copy_from_slice(&u32::MAX.to_le_bytes());
    let mut reader = BsIoSliceReader::from_slice(&packet[7..]);

    assert!(CommentHeader::read(&mut reader).is_err());
}
