//! The call contract every module implements.

use crate::error::{Error, Result};
use crate::options::OptionString;
use serde::{Deserialize, Serialize};
use transcode_core::{Frame, Packet};

/// Where in the pipeline a filter is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    /// On the import thread, right after the frame is read.
    PreSync,
    /// On a worker thread, before the main processing.
    PreWorker,
    /// On a worker thread, after the main processing.
    PostWorker,
    /// On the encoder thread, right before encoding.
    PostSync,
}

/// Result of an encode or flush call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStatus {
    /// The output packet holds encoded data.
    Encoded,
    /// The encoder buffered the input and produced nothing yet.
    Delayed,
    /// Nothing left to drain.
    Drained,
}

/// Result of reading a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// The frame was filled.
    Frame,
    /// The source has no more frames.
    EndOfStream,
}

/// Stream parameters handed to every module at configuration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    /// Video frame rate.
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            fps: 25.0,
            width: 720,
            height: 576,
            sample_rate: 48000,
            channels: 2,
            bits_per_sample: 16,
        }
    }
}

impl SessionParams {
    /// Bytes of one raw YUV 4:2:0 video frame.
    pub fn video_frame_size(&self) -> usize {
        (self.width as usize * self.height as usize * 3).div_ceil(2)
    }

    /// Bytes of PCM audio per video frame.
    pub fn audio_frame_size(&self) -> usize {
        if self.fps <= 0.0 {
            return 0;
        }
        let bytes_per_second =
            self.sample_rate as f64 * self.channels as f64 * (self.bits_per_sample as f64 / 8.0);
        (bytes_per_second / self.fps).ceil() as usize
    }
}

/// A pluggable import, filter, codec or container module.
///
/// `init`, `fini`, `configure`, `stop` and `inspect` are mandatory. The
/// remaining operations depend on the features the module declares in its
/// [`ModuleInfo`](crate::ModuleInfo); the default bodies report
/// [`Error::NotImplemented`].
pub trait Module: Send {
    /// Set up per-instance state. Called once by the factory.
    fn init(&mut self) -> Result<()>;

    /// Release per-instance state. Called once by the factory.
    fn fini(&mut self) -> Result<()>;

    /// Apply options and session parameters.
    fn configure(&mut self, options: &OptionString, session: &SessionParams) -> Result<()>;

    /// Stop processing and drop stream state; the instance may be configured
    /// again afterwards.
    fn stop(&mut self) -> Result<()>;

    /// Answer a query about the current configuration. `help` is expected to
    /// describe the accepted options.
    fn inspect(&self, query: &str) -> Result<String>;

    /// Read the next raw video frame into `frame`.
    fn decode_video(&mut self, _frame: &mut Frame) -> Result<StreamStatus> {
        Err(Error::NotImplemented("decode_video"))
    }

    /// Read the next raw audio frame into `frame`.
    fn decode_audio(&mut self, _frame: &mut Frame) -> Result<StreamStatus> {
        Err(Error::NotImplemented("decode_audio"))
    }

    /// Process a video frame in place. Filters drop a frame by setting
    /// `SKIPPED` and request a repeat by setting `CLONED`.
    fn filter_video(&mut self, _frame: &mut Frame, _stage: FilterStage) -> Result<()> {
        Err(Error::NotImplemented("filter_video"))
    }

    /// Process an audio frame in place.
    fn filter_audio(&mut self, _frame: &mut Frame, _stage: FilterStage) -> Result<()> {
        Err(Error::NotImplemented("filter_audio"))
    }

    /// Encode a video frame into `packet`.
    fn encode_video(&mut self, _frame: &Frame, _packet: &mut Packet) -> Result<EncodeStatus> {
        Err(Error::NotImplemented("encode_video"))
    }

    /// Encode an audio frame into `packet`.
    fn encode_audio(&mut self, _frame: &Frame, _packet: &mut Packet) -> Result<EncodeStatus> {
        Err(Error::NotImplemented("encode_audio"))
    }

    /// Drain one buffered video packet.
    fn flush_video(&mut self, _packet: &mut Packet) -> Result<EncodeStatus> {
        Ok(EncodeStatus::Drained)
    }

    /// Drain one buffered audio packet.
    fn flush_audio(&mut self, _packet: &mut Packet) -> Result<EncodeStatus> {
        Ok(EncodeStatus::Drained)
    }

    /// Open an output sink.
    fn open(&mut self, _sink: &str) -> Result<()> {
        Err(Error::NotImplemented("open"))
    }

    /// Close the current output sink.
    fn close(&mut self) -> Result<()> {
        Err(Error::NotImplemented("close"))
    }

    /// Write encoded packets and return the number of bytes written.
    fn multiplex(&mut self, _video: Option<&Packet>, _audio: Option<&Packet>) -> Result<usize> {
        Err(Error::NotImplemented("multiplex"))
    }

    /// Read encoded packets and return the number of bytes read.
    fn demultiplex(
        &mut self,
        _video: Option<&mut Packet>,
        _audio: Option<&mut Packet>,
    ) -> Result<usize> {
        Err(Error::NotImplemented("demultiplex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcode_core::MediaKind;

    struct Bare;

    impl Module for Bare {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn fini(&mut self) -> Result<()> {
            Ok(())
        }
        fn configure(&mut self, _options: &OptionString, _session: &SessionParams) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn inspect(&self, _query: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_optional_operations_default() {
        let mut module = Bare;
        let mut frame = Frame::new(MediaKind::Video, 8);
        let mut packet = Packet::with_capacity(MediaKind::Video, 8);
        assert!(matches!(
            module.filter_video(&mut frame, FilterStage::PreWorker),
            Err(Error::NotImplemented("filter_video"))
        ));
        assert!(module.encode_audio(&frame, &mut packet).is_err());
        assert_eq!(module.flush_video(&mut packet).unwrap(), EncodeStatus::Drained);
        assert!(module.multiplex(None, None).is_err());
    }

    #[test]
    fn test_session_frame_sizes() {
        let session = SessionParams::default();
        assert_eq!(session.video_frame_size(), 720 * 576 * 3 / 2);
        assert_eq!(session.audio_frame_size(), 48000 * 4 / 25);

        let odd = SessionParams {
            fps: 0.0,
            ..SessionParams::default()
        };
        assert_eq!(odd.audio_frame_size(), 0);
    }
}
