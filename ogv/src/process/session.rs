use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Result, bail};
use log::{debug, info};

use crate::log_or_err;
use crate::process::decode::{DecodeStage, Driver, FlatStage};
use crate::process::demux::Demuxer;
use crate::process::headers::{HeaderParser, classify};
use crate::process::image::extract_image;
use crate::structs::headers::{CommentHeader, DecodeContext};
use crate::structs::packet::{LogicalStream, Packet, StreamKind};
use crate::structs::picture::{ImageFormat, PixelBuffer};
use crate::utils::errors::{DemuxError, DriverError, HeaderError};

const CHUNK_SIZE: usize = 64 * 1024;

/// A single decode session over one container byte stream.
///
/// The session is the sole holder of mutable decode state: demultiplexer,
/// per-stream queues, decode context and reconstructed picture all live
/// here, never in process-wide tables. It is strictly single-threaded
/// and demand-driven; container bytes are read only when the packet
/// queue runs dry. For concurrent decoding, run one session per stream:
/// sessions share nothing.
///
/// The call sequence mirrors what any consumer wanting one decoded image
/// needs: [`Session::read_headers`], then [`Session::read_frame`] as
/// desired, then [`Session::get_frame_image`].
///
/// # Example
///
/// ```rust,no_run
/// use std::fs::File;
/// use ogv::process::session::Session;
///
/// let mut session = Session::open(File::open("video.ogv")?);
/// session.read_headers()?;
/// session.read_frame()?;
/// let image = session.get_frame_image()?;
/// println!("{}x{}", image.width, image.height);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Session<R: Read> {
    input: R,
    input_done: bool,
    chunk: Vec<u8>,

    demuxer: Demuxer,
    streams: HashMap<u32, LogicalStream>,
    video_serial: Option<u32>,

    header_parser: HeaderParser,
    context: Option<Arc<DecodeContext>>,
    driver: Driver,
    stage: Box<dyn DecodeStage>,

    image_format: ImageFormat,
    fail_level: log::Level,
}

impl<R: Read> Session<R> {
    /// Opens a session with the built-in development decode stage.
    pub fn open(input: R) -> Self {
        Self::with_stage(input, Box::new(FlatStage))
    }

    /// Opens a session with a caller-supplied decode stage.
    pub fn with_stage(input: R, stage: Box<dyn DecodeStage>) -> Self {
        Self {
            input,
            input_done: false,
            chunk: vec![0u8; CHUNK_SIZE],
            demuxer: Demuxer::default(),
            streams: HashMap::new(),
            video_serial: None,
            header_parser: HeaderParser::default(),
            context: None,
            driver: Driver::default(),
            stage,
            image_format: ImageFormat::default(),
            fail_level: log::Level::Error,
        }
    }

    /// Output layout used by [`Session::get_frame_image`].
    pub fn set_image_format(&mut self, format: ImageFormat) {
        self.image_format = format;
    }

    /// Sets the failure level across all pipeline stages.
    ///
    /// - `log::Level::Error`: framing corruption is reported and survived
    ///   (default)
    /// - `log::Level::Warn`: any reported corruption fails the call
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
        self.demuxer.set_fail_level(level);
        self.header_parser.set_fail_level(level);
        self.driver.set_fail_level(level);
    }

    /// Reads container data until the video stream's headers are parsed,
    /// and returns the immutable decode context.
    ///
    /// Idempotent: once the context exists it is returned directly.
    pub fn read_headers(&mut self) -> Result<Arc<DecodeContext>> {
        loop {
            if let Some(context) = &self.context {
                return Ok(context.clone());
            }

            if !self.pump()? {
                if self.video_serial.is_none() {
                    bail!(HeaderError::NoVideoStream {
                        streams: self.streams.len(),
                    });
                }
                bail!(HeaderError::MissingHeaders {
                    parsed: self.header_parser.headers_parsed(),
                });
            }
        }
    }

    /// Decodes the next frame of the video stream, advancing the
    /// reconstructed picture state. Does not return pixels.
    ///
    /// Returns [`DriverError::EndOfStream`] once the container is
    /// exhausted; a normal termination signal, not a failure of state.
    pub fn read_frame(&mut self) -> Result<()> {
        if self.context.is_none() {
            bail!(DriverError::NotReady(self.driver.state().name()));
        }
        let serial = self.video_serial.unwrap();

        loop {
            let stream = self.streams.get_mut(&serial).unwrap();
            match self.driver.decode_next(self.stage.as_mut(), &mut stream.queue) {
                Err(error)
                    if matches!(
                        error.downcast_ref::<DriverError>(),
                        Some(DriverError::NoPacketAvailable)
                    ) =>
                {
                    if !self.pump()? {
                        bail!(DriverError::EndOfStream);
                    }
                }
                other => return other,
            }
        }
    }

    /// Extracts the current reconstructed picture as a packed pixel
    /// buffer; the buffer's lifetime is independent of the session.
    pub fn get_frame_image(&self) -> Result<PixelBuffer> {
        let Some(context) = &self.context else {
            bail!(DriverError::NotReady(self.driver.state().name()));
        };
        let Some(picture) = self.driver.picture() else {
            bail!(DriverError::NoFrameDecoded);
        };

        Ok(extract_image(picture, context, self.image_format)?)
    }

    /// The decode context, once headers have been read.
    pub fn context(&self) -> Option<&Arc<DecodeContext>> {
        self.context.as_ref()
    }

    /// The video stream's comment header, once headers have been read.
    pub fn comment(&self) -> Option<&CommentHeader> {
        self.header_parser.comment()
    }

    pub fn video_serial(&self) -> Option<u32> {
        self.video_serial
    }

    /// All logical streams discovered so far, the unrecognized ones
    /// included.
    pub fn streams(&self) -> impl Iterator<Item = &LogicalStream> {
        self.streams.values()
    }

    /// Frames decoded so far, repeats included.
    pub fn frames_decoded(&self) -> u64 {
        self.driver.frame_index()
    }

    pub fn pages_processed(&self) -> usize {
        self.demuxer.pages_processed()
    }

    pub fn container_errors(&self) -> usize {
        self.demuxer.error_count()
    }

    /// Reads one chunk of container data and routes every packet it
    /// completes. Returns `false` once the input is exhausted.
    fn pump(&mut self) -> Result<bool> {
        if self.input_done {
            return Ok(false);
        }

        let n = self.input.read(&mut self.chunk)?;
        if n == 0 {
            self.input_done = true;
            if let Some(error) = self.demuxer.finish() {
                log_or_err!(self, log::Level::Warn, anyhow::anyhow!(error));
            }
            return Ok(false);
        }

        self.demuxer.push_bytes(&self.chunk[..n]);
        self.drain_demuxer()?;
        Ok(true)
    }

    fn drain_demuxer(&mut self) -> Result<()> {
        loop {
            match self.demuxer.next() {
                Some(Ok(packet)) => self.route_packet(packet)?,
                Some(Err(DemuxError::InsufficientData)) | None => return Ok(()),
                Some(Err(error)) => {
                    // Framing corruption: the demuxer has already
                    // resynchronized, decoding continues past it.
                    log_or_err!(self, log::Level::Warn, anyhow::anyhow!(error));
                }
            }
        }
    }

    fn route_packet(&mut self, packet: Packet) -> Result<()> {
        let serial = packet.serial;

        if !self.streams.contains_key(&serial) {
            let kind = classify(&packet);
            if !packet.bos {
                debug!("Stream {serial:#010X} appeared without a beginning-of-stream page");
            }
            if kind == StreamKind::Video && self.video_serial.is_none() {
                info!("Selected video stream {serial:#010X}");
                self.video_serial = Some(serial);
            }
            self.streams
                .insert(serial, LogicalStream::new(serial, kind));
        }

        if Some(serial) == self.video_serial && !self.header_parser.is_complete() {
            // Header phase: packets go to the parser, never the queue.
            // A malformed header is fatal to the stream.
            if let Some(context) = self.header_parser.parse(&packet)? {
                let context = Arc::new(context);
                self.driver.attach_context(context.clone())?;
                self.context = Some(context);
            }
            let stream = self.streams.get_mut(&serial).unwrap();
            stream.packets_seen += 1;
            return Ok(());
        }

        self.streams.get_mut(&serial).unwrap().push(packet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::structs::headers::test_packets;
    use crate::structs::page::{FLAG_BOS, FLAG_EOS, GRANULE_NONE, build_page};

    /// One video stream: three header pages, then one frame per page
    /// (key frame first, inter frames after), eos on the last.
    fn build_container(serial: u32, frames: usize) -> Vec<u8> {
        let mut data = Vec::new();
        let ident = test_packets::ident_packet(45, 30, 704, 480, 8, 4, 6, 0);
        let comment = test_packets::comment_packet("ogv test", &["TITLE=synthetic"]);
        let setup = test_packets::setup_packet(&[0xAA; 8]);

        data.extend_from_slice(&build_page(
            serial,
            0,
            GRANULE_NONE,
            FLAG_BOS,
            &[(&ident, false)],
        ));
        data.extend_from_slice(&build_page(
            serial,
            1,
            GRANULE_NONE,
            0,
            &[(&comment, false), (&setup, false)],
        ));

        for i in 0..frames {
            let payload = [if i == 0 { 0x00 } else { 0x40 }, 0xBE, 0xEF];
            let flags = if i + 1 == frames { FLAG_EOS } else { 0 };
            data.extend_from_slice(&build_page(
                serial,
                2 + i as u32,
                (1 << 6) | i as i64,
                flags,
                &[(&payload[..], false)],
            ));
        }

        data
    }

    fn foreign_stream_page(serial: u32) -> Vec<u8> {
        let mut packet = vec![0x01];
        packet.extend_from_slice(b"vorbis");
        packet.extend_from_slice(&[0u8; 22]);

        build_page(serial, 0, GRANULE_NONE, FLAG_BOS, &[(&packet, false)])
    }

    #[test]
    fn end_to_end_single_frame() -> Result<()> {
        let mut session = Session::open(Cursor::new(build_container(0xF00D, 5)));

        let context = session.read_headers()?;
        assert_eq!(context.coded_width(), 720);
        assert_eq!(context.ident.pic_width, 704);
        assert_eq!(session.comment().unwrap().vendor, "ogv test");

        for _ in 0..5 {
            session.read_frame()?;
        }
        assert_eq!(session.frames_decoded(), 5);

        session.set_image_format(ImageFormat::Gray);
        let image = session.get_frame_image()?;
        assert_eq!((image.width, image.height, image.channels), (704, 480, 1));
        Ok(())
    }

    #[test]
    fn over_reading_short_stream_reports_exhaustion() -> Result<()> {
        // 50 frames, 1000 read attempts: every call past the 50th must
        // report end of stream, never read out of bounds.
        let mut session = Session::open(Cursor::new(build_container(1, 50)));
        session.read_headers()?;

        let mut decoded = 0;
        let mut exhausted = 0;
        for _ in 0..1000 {
            match session.read_frame() {
                Ok(()) => decoded += 1,
                Err(error) => {
                    assert!(matches!(
                        error.downcast_ref::<DriverError>(),
                        Some(DriverError::EndOfStream)
                    ));
                    exhausted += 1;
                }
            }
        }

        assert_eq!(decoded, 50);
        assert_eq!(exhausted, 950);

        // The last decoded frame is still extractable.
        let image = session.get_frame_image()?;
        assert_eq!(image.width, 704);
        Ok(())
    }

    #[test]
    fn read_frame_before_headers_is_a_state_error() {
        let mut session = Session::open(Cursor::new(build_container(1, 2)));

        let err = session.read_frame().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::NotReady("AwaitingHeaders"))
        ));
    }

    #[test]
    fn image_before_any_frame_is_a_state_error() -> Result<()> {
        let mut session = Session::open(Cursor::new(build_container(1, 2)));
        session.read_headers()?;

        let err = session.get_frame_image().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::NoFrameDecoded)
        ));
        Ok(())
    }

    #[test]
    fn container_without_video_rejected() {
        let mut session = Session::open(Cursor::new(foreign_stream_page(0x0B0E)));

        let err = session.read_headers().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HeaderError>(),
            Some(HeaderError::NoVideoStream { streams: 1 })
        ));
    }

    #[test]
    fn multiplexed_foreign_stream_is_tallied_not_decoded() -> Result<()> {
        let mut data = foreign_stream_page(0xAAAA);
        data.extend_from_slice(&build_container(0xBBBB, 3));

        let mut session = Session::open(Cursor::new(data));
        session.read_headers()?;
        session.read_frame()?;
        session.read_frame()?;

        assert_eq!(session.video_serial(), Some(0xBBBB));
        assert_eq!(session.streams().count(), 2);
        let foreign = session
            .streams()
            .find(|s| s.kind == StreamKind::Unrecognized)
            .unwrap();
        assert_eq!(foreign.packets_seen, 1);
        assert!(foreign.queue.is_empty());
        Ok(())
    }

    #[test]
    fn truncated_header_sequence_reported() {
        let serial = 7;
        let ident = test_packets::ident_packet(4, 4, 64, 64, 0, 0, 3, 0);
        let page = build_page(serial, 0, GRANULE_NONE, FLAG_BOS, &[(&ident, false)]);

        let mut session = Session::open(Cursor::new(page));
        let err = session.read_headers().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HeaderError>(),
            Some(HeaderError::MissingHeaders { parsed: 1 })
        ));
    }

    #[test]
    fn corrupt_page_mid_stream_decoding_continues() -> Result<()> {
        let serial = 11;
        let mut data = build_container(serial, 4);

        // Corrupt the body of the page carrying frame 2 (pages 0-1 are
        // headers, frames start at page 2).
        let frame2_payload = [0x40u8, 0xBE, 0xEF];
        let frame2_page = build_page(serial, 4, (1 << 6) | 2, 0, &[(&frame2_payload[..], false)]);
        let offset = data
            .windows(frame2_page.len())
            .position(|w| w == frame2_page)
            .unwrap();
        data[offset + frame2_page.len() - 1] ^= 0xFF;

        let mut session = Session::open(Cursor::new(data));
        session.read_headers()?;

        let mut decoded = 0;
        while session.read_frame().is_ok() {
            decoded += 1;
        }

        // Frame 2's page is lost; the three intact frames still decode.
        assert_eq!(decoded, 3);
        assert!(session.container_errors() > 0);
        Ok(())
    }
}
