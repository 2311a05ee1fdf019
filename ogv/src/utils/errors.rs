#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

/// Container framing errors. Recoverable: the demultiplexer reports them
/// and resynchronizes on the next capture pattern.
#[derive(thiserror::Error, Debug)]
pub enum DemuxError {
    #[error("No capture pattern at page boundary, skipped {skipped} bytes")]
    InvalidCapturePattern { skipped: usize },

    #[error("Unsupported stream structure version: {0}")]
    UnsupportedVersion(u8),

    #[error(
        "Page checksum failed for stream {serial:#010X} page {sequence}. Calculated {calculated:#010X}, Read {read:#010X}"
    )]
    ChecksumMismatch {
        serial: u32,
        sequence: u32,
        calculated: u32,
        read: u32,
    },

    #[error("Page truncated at end of input: {available} of {needed} bytes")]
    TruncatedPage { needed: usize, available: usize },

    #[error("Page sequence gap in stream {serial:#010X}: expected {expected}, read {read}")]
    SequenceGap { serial: u32, expected: u32, read: u32 },

    #[error(
        "Granule position went backwards in stream {serial:#010X}: {prev} -> {read}"
    )]
    GranuleRegression { serial: u32, prev: i64, read: i64 },

    #[error("Page for stream {serial:#010X} continues a packet that was never started")]
    ContinuationWithoutStart { serial: u32 },

    #[error("Packet left unfinished in stream {serial:#010X} by a non-continued page")]
    UnfinishedPacket { serial: u32 },

    #[error("Insufficient buffer data for page demultiplexing")]
    InsufficientData,
}

/// Header protocol errors. Fatal to the logical stream they occur on.
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("First packet of stream {serial:#010X} carries no recognized codec signature")]
    UnknownSignature { serial: u32 },

    #[error("Header packets out of order: expected {expected}, read type {read:#04X}")]
    UnexpectedHeaderOrder { expected: &'static str, read: u8 },

    #[error("Packet type {0:#04X} is not a header packet")]
    NotAHeader(u8),

    #[error("All headers already parsed; a packet attempted to redefine the decode context")]
    ContextRedefined,

    #[error("Unsupported bitstream version {major}.{minor}.{revision}")]
    UnsupportedBitstreamVersion { major: u8, minor: u8, revision: u8 },

    #[error("Coded frame size must be non-zero, read {mb_width}x{mb_height} macroblocks")]
    ZeroFrameSize { mb_width: u16, mb_height: u16 },

    #[error(
        "Picture region {pic_width}x{pic_height}+{pic_x}+{pic_y} exceeds coded frame {coded_width}x{coded_height}"
    )]
    PictureRegionOutOfBounds {
        pic_width: u32,
        pic_height: u32,
        pic_x: u32,
        pic_y: u32,
        coded_width: u32,
        coded_height: u32,
    },

    #[error("Frame rate must be non-zero, read {numerator}/{denominator}")]
    ZeroFrameRate { numerator: u32, denominator: u32 },

    #[error("Reserved chroma subsampling format")]
    ReservedPixelFormat,

    #[error("Reserved bits in identification header should be 0, read {0:#X}")]
    ReservedBitsNonZero(u8),

    #[error("Comment header declares {declared} bytes but only {remaining} remain")]
    CommentTooLong { declared: usize, remaining: usize },

    #[error("Base quantization matrix count must be 1-384, read {0}")]
    TooManyBaseMatrices(usize),

    #[error("End of container reached after {parsed} of 3 header packets")]
    MissingHeaders { parsed: usize },

    #[error("No video stream found among {streams} logical streams")]
    NoVideoStream { streams: usize },
}

/// Decode driver errors. State violations are programmer errors and are
/// surfaced immediately; exhaustion is a normal termination signal.
#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("Decode requested in state {0}, headers not parsed")]
    NotReady(&'static str),

    #[error("Decode context already attached")]
    AlreadyConfigured,

    #[error(
        "Decode stage returned {got_width}x{got_height}, context says {expected_width}x{expected_height}"
    )]
    StageOutputMismatch {
        expected_width: usize,
        expected_height: usize,
        got_width: usize,
        got_height: usize,
    },

    #[error("Stream is faulted after a fatal error; no further decoding is possible")]
    Faulted,

    #[error("No packet available; supply more container data")]
    NoPacketAvailable,

    #[error("Frame {frame_index} requires a reference picture and none is available")]
    MissingReferenceFrame { frame_index: u64 },

    #[error("Header packet {0:#04X} encountered in the data packet sequence")]
    HeaderInDataStream(u8),

    #[error("No frame has been decoded yet")]
    NoFrameDecoded,

    #[error("End of stream")]
    EndOfStream,
}

/// Pixel buffer extraction errors.
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error(
        "Crop region {width}x{height}+{x}+{y} exceeds coded dimensions {coded_width}x{coded_height}"
    )]
    CropOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        coded_width: u32,
        coded_height: u32,
    },

    #[error("Reconstructed picture has {got} planes, expected {expected}")]
    PlaneCountMismatch { expected: usize, got: usize },
}
