/// Page demultiplexing and packet reassembly.
///
/// Provides the [`Demuxer`](demux::Demuxer) for splitting a container
/// byte stream into [`Packet`](crate::structs::packet::Packet) objects,
/// with checksum validation and resynchronization after corruption.
pub mod demux;

/// Stream classification and header parsing.
///
/// Provides [`classify`](headers::classify) for identifying logical
/// streams and the [`HeaderParser`](headers::HeaderParser) for turning
/// the fixed header packet sequence into an immutable
/// [`DecodeContext`](crate::structs::headers::DecodeContext).
pub mod headers;

/// Frame decoding and reconstructed picture state.
///
/// Provides the [`Driver`](decode::Driver) state machine and the
/// [`DecodeStage`](decode::DecodeStage) collaborator seam behind which
/// the transform-domain decoder lives.
pub mod decode;

/// Pixel buffer extraction.
///
/// Provides [`extract_image`](image::extract_image) for cropping and
/// packing the visible picture region.
pub mod image;

/// The single-stream decode session tying the stages together.
pub mod session;
