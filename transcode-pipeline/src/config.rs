//! Pipeline configuration.

use crate::error::PipelineError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use transcode_core::MediaKind;
use transcode_module::{ModuleClass, ModuleType, SessionParams};

/// Sinks that disable rotation.
const NULL_SINKS: [&str; 2] = ["", "/dev/null"];

/// A module to instantiate and its option string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSpec {
    /// `class:name` or a plain name; a plain name takes the class from the
    /// role the module is used in.
    pub module: String,
    /// `key=value:flag` options.
    pub options: String,
}

impl ModuleSpec {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            options: String::new(),
        }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// Resolve the module type for a role.
    pub fn module_type(&self, role: ModuleClass) -> Result<ModuleType> {
        let module_type = if self.module.contains(':') {
            self.module.parse::<ModuleType>()?
        } else {
            ModuleType::new(role, self.module.trim())
        };
        if module_type.class != role {
            return Err(PipelineError::InvalidConfig(format!(
                "module '{}' used as {}",
                module_type, role
            )));
        }
        if module_type.name.is_empty() {
            return Err(PipelineError::InvalidConfig(format!("empty {} module name", role)));
        }
        Ok(module_type)
    }
}

/// Per-media settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of frame slots (at least 1).
    pub pool_capacity: usize,
    /// Slot buffer size in bytes; 0 derives it from the session.
    pub frame_size: usize,
    /// Worker threads; 0 runs the filters on the encoder thread.
    pub workers: usize,
    /// Frame source. The media kind is disabled when unset.
    pub import: Option<ModuleSpec>,
    /// Filter chain, in order.
    pub filters: Vec<ModuleSpec>,
    /// Encoder.
    pub encoder: Option<ModuleSpec>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 16,
            frame_size: 0,
            workers: 1,
            import: None,
            filters: Vec::new(),
            encoder: None,
        }
    }
}

impl StreamConfig {
    pub fn with_import(mut self, spec: ModuleSpec) -> Self {
        self.import = Some(spec);
        self
    }

    pub fn with_encoder(mut self, spec: ModuleSpec) -> Self {
        self.encoder = Some(spec);
        self
    }

    pub fn with_filter(mut self, spec: ModuleSpec) -> Self {
        self.filters.push(spec);
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Whether frames of this kind flow through the pipeline.
    pub fn is_enabled(&self) -> bool {
        self.import.is_some()
    }
}

/// When to switch to a new output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Single output file.
    #[default]
    Never,
    /// After this many encoded frames.
    Frames { count: u64 },
    /// After this many megabytes written.
    Megabytes { size: u64 },
}

/// Output naming and rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Base name of the output; chunk numbers are appended when rotating.
    pub base: String,
    /// Extension including the dot, e.g. `.avi`.
    pub extension: String,
    pub rotation: RotationPolicy,
    /// Multiplexer for the main output.
    pub multiplex: Option<ModuleSpec>,
    /// Base name of a separate audio output.
    pub audio_base: Option<String>,
    pub audio_extension: String,
    /// Multiplexer for the separate audio output.
    pub audio_multiplex: Option<ModuleSpec>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base: "/dev/null".into(),
            extension: String::new(),
            rotation: RotationPolicy::Never,
            multiplex: None,
            audio_base: None,
            audio_extension: String::new(),
            audio_multiplex: None,
        }
    }
}

impl OutputConfig {
    /// Whether the main output goes nowhere.
    pub fn is_null(&self) -> bool {
        NULL_SINKS.contains(&self.base.as_str())
    }

    /// Whether audio is written through its own multiplexer.
    pub fn has_separate_audio(&self) -> bool {
        self.audio_multiplex.is_some()
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stream parameters passed to every module.
    pub session: SessionParams,
    pub video: StreamConfig,
    pub audio: StreamConfig,
    pub output: OutputConfig,
    /// Audio frames to drop (positive) or pad with silence (negative)
    /// at the start of the stream.
    pub audio_sync_offset: i64,
    /// Upper bound of every wait for a free slot or a ready frame.
    pub poll_delay_ms: u64,
    /// Log progress every this many encoded frames; 0 disables it.
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            session: SessionParams::default(),
            video: StreamConfig::default(),
            audio: StreamConfig::default(),
            output: OutputConfig::default(),
            audio_sync_offset: 0,
            poll_delay_ms: 10,
            progress_interval: 100,
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_session(mut self, session: SessionParams) -> Self {
        self.session = session;
        self
    }

    pub fn with_video(mut self, video: StreamConfig) -> Self {
        self.video = video;
        self
    }

    pub fn with_audio(mut self, audio: StreamConfig) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_output(mut self, base: impl Into<String>, extension: impl Into<String>) -> Self {
        self.output.base = base.into();
        self.output.extension = extension.into();
        self
    }

    pub fn with_multiplex(mut self, spec: ModuleSpec) -> Self {
        self.output.multiplex = Some(spec);
        self
    }

    /// Write audio to its own output.
    pub fn with_audio_output(
        mut self,
        base: impl Into<String>,
        extension: impl Into<String>,
        spec: ModuleSpec,
    ) -> Self {
        self.output.audio_base = Some(base.into());
        self.output.audio_extension = extension.into();
        self.output.audio_multiplex = Some(spec);
        self
    }

    pub fn with_rotation(mut self, rotation: RotationPolicy) -> Self {
        self.output.rotation = rotation;
        self
    }

    pub fn with_audio_sync_offset(mut self, frames: i64) -> Self {
        self.audio_sync_offset = frames;
        self
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_progress_interval(mut self, frames: u64) -> Self {
        self.progress_interval = frames;
        self
    }

    /// Settings of one media kind.
    pub fn stream(&self, kind: MediaKind) -> &StreamConfig {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    /// Slot buffer size for a media kind.
    pub fn frame_size(&self, kind: MediaKind) -> usize {
        match (kind, self.stream(kind).frame_size) {
            (MediaKind::Video, 0) => self.session.video_frame_size(),
            (MediaKind::Audio, 0) => self.session.audio_frame_size(),
            (_, size) => size,
        }
    }

    /// The media kind that drives the encoder loop and range checks.
    pub fn reference_kind(&self) -> Option<MediaKind> {
        MediaKind::ALL
            .into_iter()
            .find(|&kind| self.stream(kind).is_enabled())
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.reference_kind().is_none() {
            return Err(PipelineError::InvalidConfig(
                "neither video nor audio import configured".into(),
            ));
        }

        for kind in MediaKind::ALL {
            let stream = self.stream(kind);
            if !stream.is_enabled() {
                continue;
            }
            if stream.pool_capacity == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} pool capacity must be at least 1",
                    kind
                )));
            }
            if stream.encoder.is_none() {
                return Err(PipelineError::InvalidConfig(format!("no {} encoder configured", kind)));
            }
            if self.frame_size(kind) == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} frame size is zero",
                    kind
                )));
            }
        }

        if self.output.multiplex.is_none() {
            return Err(PipelineError::InvalidConfig("no multiplexer configured".into()));
        }
        if self.output.has_separate_audio() && self.output.audio_base.is_none() {
            return Err(PipelineError::InvalidConfig(
                "audio multiplexer without audio output name".into(),
            ));
        }

        match self.output.rotation {
            RotationPolicy::Frames { count: 0 } | RotationPolicy::Megabytes { size: 0 } => {
                return Err(PipelineError::InvalidConfig(
                    "rotation threshold must be non-zero".into(),
                ));
            }
            _ => {}
        }

        if self.poll_delay_ms == 0 {
            return Err(PipelineError::InvalidConfig("poll delay must be non-zero".into()));
        }

        Ok(())
    }
}
