use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use log::trace;

use crate::log_or_err;
use crate::structs::headers::DecodeContext;
use crate::structs::packet::Packet;
use crate::structs::picture::Picture;
use crate::utils::errors::DriverError;

/// The transform-domain collaborator: inverse quantization, inverse
/// transform, motion compensation and loop filtering live behind this
/// seam, entirely outside the container pipeline.
///
/// `reference` is a borrowed view of the previous reconstructed picture;
/// the stage never takes ownership of it. The returned picture must be at
/// the context's coded dimensions.
pub trait DecodeStage {
    fn decode_packet(
        &mut self,
        context: &DecodeContext,
        payload: &[u8],
        reference: Option<&Picture>,
    ) -> Result<Picture>;
}

/// Development decode stage: flat mid-level planes for key frames, a
/// copy of the reference for inter frames.
///
/// Keeps the pipeline drivable end to end without a transform decoder;
/// geometry, ordering and reference handling behave as they would with a
/// real one.
#[derive(Debug, Default)]
pub struct FlatStage;

impl DecodeStage for FlatStage {
    fn decode_packet(
        &mut self,
        context: &DecodeContext,
        payload: &[u8],
        reference: Option<&Picture>,
    ) -> Result<Picture> {
        let keyframe = payload.first().is_some_and(|&b| b & 0x40 == 0);
        if keyframe {
            Ok(Picture::filled(
                context.coded_width(),
                context.coded_height(),
                context.pixel_format(),
                0x50,
                0x80,
            ))
        } else {
            reference
                .cloned()
                .ok_or_else(|| anyhow!("inter frame without a reference picture"))
        }
    }
}

/// Decode driver states. `Decoding` is only ever observed by the stage
/// itself; every public call leaves the driver in `Ready` or `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    #[default]
    AwaitingHeaders,
    Ready,
    Decoding,
    Faulted,
}

impl DriverState {
    pub fn name(self) -> &'static str {
        match self {
            Self::AwaitingHeaders => "AwaitingHeaders",
            Self::Ready => "Ready",
            Self::Decoding => "Decoding",
            Self::Faulted => "Faulted",
        }
    }
}

/// Consumes frame packets in order and maintains the reconstructed
/// picture state.
///
/// Frames must be decoded strictly in packet order; inter-frame
/// prediction is stateful and order-dependent. Each decode call is
/// atomic: it either fully replaces the reconstructed picture or fails
/// without touching it.
///
/// Error policy: a corrupt frame degrades to a best-effort repeat of the
/// previous picture (escalatable to a failure in strict mode); a missing
/// prediction reference is surfaced, never papered over with blank data;
/// a header packet in the data sequence is fatal.
pub struct Driver {
    state: DriverState,
    context: Option<Arc<DecodeContext>>,
    picture: Option<Picture>,
    frame_index: u64,
    fail_level: log::Level,
}

impl Default for Driver {
    fn default() -> Self {
        Self {
            state: DriverState::AwaitingHeaders,
            context: None,
            picture: None,
            frame_index: 0,
            fail_level: log::Level::Error,
        }
    }
}

impl Driver {
    /// Installs the decode context. Transitions `AwaitingHeaders -> Ready`.
    pub fn attach_context(&mut self, context: Arc<DecodeContext>) -> Result<()> {
        if self.state != DriverState::AwaitingHeaders {
            bail!(DriverError::AlreadyConfigured);
        }

        self.context = Some(context);
        self.state = DriverState::Ready;
        Ok(())
    }

    /// Pops the next packet from `queue` and decodes it through `stage`.
    ///
    /// Fails with [`DriverError::NoPacketAvailable`] on an empty queue;
    /// the caller decides whether that means "supply more container data"
    /// or end of stream.
    pub fn decode_next(
        &mut self,
        stage: &mut dyn DecodeStage,
        queue: &mut VecDeque<Packet>,
    ) -> Result<()> {
        match self.state {
            DriverState::Ready => {}
            DriverState::Faulted => bail!(DriverError::Faulted),
            state => bail!(DriverError::NotReady(state.name())),
        }

        let Some(packet) = queue.pop_front() else {
            bail!(DriverError::NoPacketAvailable);
        };

        // Ready implies an attached context.
        let context = self.context.clone().unwrap();
        let payload = packet.as_ref();

        if payload.is_empty() {
            // Zero-length packet: legal repeat-previous-frame marker.
            let Some(picture) = self.picture.as_mut() else {
                bail!(DriverError::MissingReferenceFrame {
                    frame_index: self.frame_index,
                });
            };
            trace!("Frame {}: repeat marker", self.frame_index);
            picture.frame_index = self.frame_index;
            picture.keyframe = false;
            self.frame_index += 1;
            return Ok(());
        }

        if packet.is_header() {
            self.state = DriverState::Faulted;
            bail!(DriverError::HeaderInDataStream(payload[0]));
        }

        let keyframe = payload[0] & 0x40 == 0;
        if !keyframe && self.picture.is_none() {
            bail!(DriverError::MissingReferenceFrame {
                frame_index: self.frame_index,
            });
        }

        self.state = DriverState::Decoding;
        let decoded = stage.decode_packet(&context, payload, self.picture.as_ref());
        self.state = DriverState::Ready;

        match decoded {
            Ok(mut picture) => {
                let expected_width = context.coded_width() as usize;
                let expected_height = context.coded_height() as usize;
                if picture.planes[0].width != expected_width
                    || picture.planes[0].height != expected_height
                {
                    bail!(DriverError::StageOutputMismatch {
                        expected_width,
                        expected_height,
                        got_width: picture.planes[0].width,
                        got_height: picture.planes[0].height,
                    });
                }

                picture.frame_index = self.frame_index;
                picture.keyframe = keyframe;
                self.frame_index += 1;
                self.picture = Some(picture);
                Ok(())
            }
            Err(error) => {
                let Some(picture) = self.picture.as_mut() else {
                    return Err(error.context(format!("frame {}", self.frame_index)));
                };

                // Degrade a single corrupt frame to a repeat of the
                // previous picture; strict mode surfaces it instead.
                log_or_err!(self, log::Level::Warn, error);
                picture.frame_index = self.frame_index;
                picture.keyframe = false;
                self.frame_index += 1;
                Ok(())
            }
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// The current reconstructed picture, if any frame has been decoded.
    pub fn picture(&self) -> Option<&Picture> {
        self.picture.as_ref()
    }

    /// Number of frames decoded so far (repeats included).
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Sets the failure level for frame-level validation errors.
    ///
    /// - `log::Level::Error`: corrupt frames degrade to repeats (default)
    /// - `log::Level::Warn`: corrupt frames fail the decode call
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::headers::{HeaderParser, test_packet};
    use crate::structs::headers::test_packets;

    fn context() -> Arc<DecodeContext> {
        let mut parser = HeaderParser::default();
        parser
            .parse(&test_packet(
                1,
                true,
                test_packets::ident_packet(45, 30, 704, 480, 4, 2, 6, 0),
            ))
            .unwrap();
        parser
            .parse(&test_packet(1, false, test_packets::comment_packet("v", &[])))
            .unwrap();
        let context = parser
            .parse(&test_packet(1, false, test_packets::setup_packet(&[])))
            .unwrap()
            .unwrap();

        Arc::new(context)
    }

    fn frame_packet(keyframe: bool) -> Packet {
        let first = if keyframe { 0x00 } else { 0x40 };
        test_packet(1, false, vec![first, 0xDE, 0xAD])
    }

    fn repeat_packet() -> Packet {
        test_packet(1, false, Vec::new())
    }

    /// Fails every key frame; passes inter frames through.
    struct BrokenKeyframeStage(FlatStage);

    impl DecodeStage for BrokenKeyframeStage {
        fn decode_packet(
            &mut self,
            context: &DecodeContext,
            payload: &[u8],
            reference: Option<&Picture>,
        ) -> Result<Picture> {
            if payload.first().is_some_and(|&b| b & 0x40 == 0) {
                bail!("simulated corrupt key frame");
            }
            self.0.decode_packet(context, payload, reference)
        }
    }

    #[test]
    fn decode_before_headers_is_a_state_error() {
        let mut driver = Driver::default();
        let mut queue = VecDeque::from([frame_packet(true)]);

        let err = driver.decode_next(&mut FlatStage, &mut queue).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::NotReady("AwaitingHeaders"))
        ));
    }

    #[test]
    fn key_inter_and_repeat_sequence() -> Result<()> {
        let mut driver = Driver::default();
        driver.attach_context(context())?;
        assert_eq!(driver.state(), DriverState::Ready);

        let mut queue = VecDeque::from([frame_packet(true), frame_packet(false), repeat_packet()]);
        driver.decode_next(&mut FlatStage, &mut queue)?;
        assert!(driver.picture().unwrap().keyframe);
        assert_eq!(driver.picture().unwrap().frame_index, 0);

        driver.decode_next(&mut FlatStage, &mut queue)?;
        assert!(!driver.picture().unwrap().keyframe);

        driver.decode_next(&mut FlatStage, &mut queue)?;
        assert_eq!(driver.frame_index(), 3);
        assert_eq!(driver.state(), DriverState::Ready);

        let err = driver.decode_next(&mut FlatStage, &mut queue).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::NoPacketAvailable)
        ));
        Ok(())
    }

    #[test]
    fn missing_reference_surfaced_after_failed_keyframe() -> Result<()> {
        let mut driver = Driver::default();
        driver.attach_context(context())?;
        let mut stage = BrokenKeyframeStage(FlatStage);

        let mut queue = VecDeque::from([frame_packet(true), frame_packet(false)]);

        // The key frame fails with nothing to repeat: surfaced.
        assert!(driver.decode_next(&mut stage, &mut queue).is_err());
        assert!(driver.picture().is_none());
        assert_eq!(driver.state(), DriverState::Ready);

        // The following inter frame must fail loudly, never produce a
        // silently blank picture.
        let err = driver.decode_next(&mut stage, &mut queue).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::MissingReferenceFrame { frame_index: 0 })
        ));
        assert!(driver.picture().is_none());
        Ok(())
    }

    #[test]
    fn repeat_marker_without_reference_surfaced() -> Result<()> {
        let mut driver = Driver::default();
        driver.attach_context(context())?;

        let mut queue = VecDeque::from([repeat_packet()]);
        let err = driver.decode_next(&mut FlatStage, &mut queue).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::MissingReferenceFrame { .. })
        ));
        Ok(())
    }

    #[test]
    fn corrupt_frame_with_reference_repeats_previous() -> Result<()> {
        let mut driver = Driver::default();
        driver.attach_context(context())?;
        let mut stage = BrokenKeyframeStage(FlatStage);

        let mut queue = VecDeque::from([frame_packet(false), frame_packet(true)]);

        // Establish a reference with a working stage first.
        let mut good_queue = VecDeque::from([frame_packet(true)]);
        driver.decode_next(&mut FlatStage, &mut good_queue)?;

        driver.decode_next(&mut stage, &mut queue)?;
        // The corrupt key frame degrades to a repeat and decode goes on.
        driver.decode_next(&mut stage, &mut queue)?;
        assert_eq!(driver.frame_index(), 3);
        assert!(!driver.picture().unwrap().keyframe);
        assert_eq!(driver.state(), DriverState::Ready);
        Ok(())
    }

    #[test]
    fn strict_mode_surfaces_corrupt_frames() -> Result<()> {
        let mut driver = Driver::default();
        driver.attach_context(context())?;
        driver.set_fail_level(log::Level::Warn);
        let mut stage = BrokenKeyframeStage(FlatStage);

        let mut good_queue = VecDeque::from([frame_packet(true)]);
        driver.decode_next(&mut FlatStage, &mut good_queue)?;

        let mut queue = VecDeque::from([frame_packet(true)]);
        assert!(driver.decode_next(&mut stage, &mut queue).is_err());
        // The picture is untouched by the failed call.
        assert_eq!(driver.picture().unwrap().frame_index, 0);
        Ok(())
    }

    #[test]
    fn header_packet_in_data_stream_is_fatal() -> Result<()> {
        let mut driver = Driver::default();
        driver.attach_context(context())?;

        let mut queue = VecDeque::from([test_packet(1, false, vec![0x80, b't'])]);
        let err = driver.decode_next(&mut FlatStage, &mut queue).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::HeaderInDataStream(0x80))
        ));
        assert_eq!(driver.state(), DriverState::Faulted);

        let mut queue = VecDeque::from([frame_packet(true)]);
        let err = driver.decode_next(&mut FlatStage, &mut queue).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::Faulted)
        ));
        Ok(())
    }
}
