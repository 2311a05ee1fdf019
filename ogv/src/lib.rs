#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Demultiplexer and decode pipeline for Ogg-contained video streams.
//!
//! ### Container Organization
//!
//! **External structure**: pages carrying a serial number, sequence
//! number, granule position and a lacing table of packet segments.
//! **Internal structure**: per-stream packet sequences; the video
//! stream opens with identification, comment and setup headers, then
//! frame packets (key, inter, or zero-length repeat markers).
//!
//! ### Pipeline
//!
//! Bytes flow demand-driven through one [`process::session::Session`]:
//!
//! 1. Pages are framed and checksummed by [`process::demux::Demuxer`]
//! 2. Packets are classified and headers parsed by
//!    [`process::headers::HeaderParser`]
//! 3. Frames are decoded in strict packet order by
//!    [`process::decode::Driver`] through a pluggable
//!    [`process::decode::DecodeStage`]
//! 4. Pixel buffers are cropped and packed by
//!    [`process::image::extract_image`]
//!
//! Framing corruption is reported and survived by resynchronization;
//! header violations are fatal to the stream; exhaustion of the input is
//! a normal termination signal.

/// Processing stages for container byte streams.
///
/// 1. **Demultiplexing** ([`process::demux`]): splits the byte stream
///    into pages and reassembles per-stream packets.
///
/// 2. **Header parsing** ([`process::headers`]): classifies streams and
///    builds the immutable decode context.
///
/// 3. **Decoding** ([`process::decode`]): maintains reconstructed
///    picture state across frame packets.
///
/// 4. **Extraction** ([`process::image`]): packs the visible region
///    into caller-owned pixel buffers.
pub mod process;

/// Data structures for container and codec syntax elements.
///
/// - **Pages** ([`structs::page`]): container framing
/// - **Packets** ([`structs::packet`]): reassembled codec data
/// - **Headers** ([`structs::headers`]): decode configuration
/// - **Pictures** ([`structs::picture`]): reconstructed planes and
///   packed pixel buffers
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): bit-level reading
/// - **CRC validation** ([`utils::crc`]): page checksums
/// - **Error handling** ([`utils::errors`]): error types
/// - **Buffer management** ([`utils::buffer_pool`]): allocation reuse
pub mod utils;
