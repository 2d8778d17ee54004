//! Output sinks and rotation.
//!
//! With rotation enabled the outputs are named `<base>-000<ext>`,
//! `<base>-001<ext>`, ...; a new chunk is started once the frames or bytes
//! written since the last switch reach the threshold.

use crate::config::{OutputConfig, RotationPolicy};
use crate::error::PipelineError;
use crate::filter::release;
use crate::Result;
use tracing::{debug, info, warn};
use transcode_core::{MediaKind, Packet};
use transcode_module::{ModuleFactory, ModuleInfo, ModuleInstance};

const BYTES_PER_MEGABYTE: u64 = 1024 * 1024;

/// Name of chunk `chunk` of an output.
pub fn chunk_name(base: &str, chunk: u32, extension: &str) -> String {
    format!("{}-{:03}{}", base, chunk, extension)
}

/// Rotation bookkeeping: chunk number and what was written to it.
#[derive(Debug, Clone)]
pub struct RotateContext {
    policy: RotationPolicy,
    enabled: bool,
    chunk: u32,
    encoded_frames: u64,
    encoded_bytes: u64,
}

impl RotateContext {
    /// Rotation is disabled for null outputs.
    pub fn new(policy: RotationPolicy, base: &str) -> Self {
        let null = base.is_empty() || base == "/dev/null";
        Self {
            policy,
            enabled: policy != RotationPolicy::Never && !null,
            chunk: 0,
            encoded_frames: 0,
            encoded_bytes: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current chunk number.
    pub fn chunk(&self) -> u32 {
        self.chunk
    }

    /// Name of the current output.
    pub fn output_name(&self, base: &str, extension: &str) -> String {
        if self.enabled {
            chunk_name(base, self.chunk, extension)
        } else {
            format!("{}{}", base, extension)
        }
    }

    /// Account for one multiplexed frame.
    pub fn record(&mut self, bytes: usize) {
        self.encoded_frames += 1;
        self.encoded_bytes += bytes as u64;
    }

    /// Whether the current chunk is complete.
    pub fn limit_reached(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match self.policy {
            RotationPolicy::Never => false,
            RotationPolicy::Frames { count } => self.encoded_frames >= count,
            RotationPolicy::Megabytes { size } => {
                self.encoded_bytes >= size.saturating_mul(BYTES_PER_MEGABYTE)
            }
        }
    }

    /// Move to the next chunk.
    pub fn advance(&mut self) {
        self.chunk += 1;
        self.encoded_frames = 0;
        self.encoded_bytes = 0;
    }
}

struct Sink {
    muxer: ModuleInstance,
    base: String,
    extension: String,
    open: bool,
}

impl Sink {
    fn open(&mut self, rotate: &RotateContext) -> Result<()> {
        let name = rotate.output_name(&self.base, &self.extension);
        self.muxer
            .open(&name)
            .map_err(|e| PipelineError::stage("multiplex", e))?;
        self.open = true;
        debug!(module = self.muxer.name(), output = %name, "Output opened");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.muxer
            .close()
            .map_err(|e| PipelineError::stage("multiplex", e))
    }
}

/// The multiplexer(s) writing the session output, with rotation.
pub struct Output {
    main: Sink,
    audio: Option<Sink>,
    rotate: RotateContext,
}

impl Output {
    /// Wrap the main and, if given, the separate audio multiplexer.
    pub(crate) fn new(config: &OutputConfig, muxer: ModuleInstance, audio_muxer: Option<ModuleInstance>) -> Self {
        let audio = audio_muxer.map(|muxer| Sink {
            muxer,
            base: config.audio_base.clone().unwrap_or_else(|| config.base.clone()),
            extension: config.audio_extension.clone(),
            open: false,
        });
        Self {
            main: Sink {
                muxer,
                base: config.base.clone(),
                extension: config.extension.clone(),
                open: false,
            },
            audio,
            rotate: RotateContext::new(config.rotation, &config.base),
        }
    }

    pub fn rotation(&self) -> &RotateContext {
        &self.rotate
    }

    /// Name of the current main output.
    pub fn current_name(&self) -> String {
        self.rotate.output_name(&self.main.base, &self.main.extension)
    }

    pub fn is_open(&self) -> bool {
        self.main.open
    }

    /// Descriptor of the multiplexer receiving packets of `kind`.
    pub fn muxer_info(&self, kind: MediaKind) -> &ModuleInfo {
        match (kind, &self.audio) {
            (MediaKind::Audio, Some(sink)) => sink.muxer.info(),
            _ => self.main.muxer.info(),
        }
    }

    /// Open the current chunk on every multiplexer.
    pub fn open(&mut self) -> Result<()> {
        self.main.open(&self.rotate)?;
        if let Some(audio) = &mut self.audio {
            audio.open(&self.rotate)?;
        }
        info!(output = %self.current_name(), "Writing output");
        Ok(())
    }

    /// Close every open multiplexer; all are closed even if one fails.
    pub fn close(&mut self) -> Result<()> {
        let main = self.main.close();
        let audio = match &mut self.audio {
            Some(audio) => audio.close(),
            None => Ok(()),
        };
        main.and(audio)
    }

    /// Multiplex one frame pair and return the bytes written.
    pub fn write(&mut self, video: Option<&Packet>, audio: Option<&Packet>) -> Result<usize> {
        let Some(sink) = &mut self.audio else {
            return self
                .main
                .muxer
                .multiplex(video, audio)
                .map_err(|e| PipelineError::stage("multiplex", e));
        };
        let mut written = 0;
        if video.is_some() {
            written += self
                .main
                .muxer
                .multiplex(video, None)
                .map_err(|e| PipelineError::stage("multiplex", e))?;
        }
        if audio.is_some() {
            written += sink
                .muxer
                .multiplex(None, audio)
                .map_err(|e| PipelineError::stage("multiplex", e))?;
        }
        Ok(written)
    }

    /// Account for a multiplexed frame and switch chunks if the threshold
    /// was crossed. Returns whether a rotation happened.
    pub fn record(&mut self, bytes: usize) -> Result<bool> {
        self.rotate.record(bytes);
        if !self.rotate.limit_reached() {
            return Ok(false);
        }
        let previous = self.current_name();
        self.close()?;
        self.rotate.advance();
        info!(from = %previous, to = %self.current_name(), "Rotating output");
        self.open()?;
        Ok(true)
    }

    /// Close and destroy the multiplexers.
    pub(crate) fn release(mut self, factory: &ModuleFactory) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Closing output failed");
        }
        release(factory, self.main.muxer);
        if let Some(audio) = self.audio {
            release(factory, audio.muxer);
        }
    }
}
