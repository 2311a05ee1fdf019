/// Container page framing and lacing.
pub mod page;

/// Reassembled codec packets and logical stream bookkeeping.
pub mod packet;

/// Header packets and the immutable decode context.
pub mod headers;

/// Reconstructed pictures and packed pixel buffers.
pub mod picture;
