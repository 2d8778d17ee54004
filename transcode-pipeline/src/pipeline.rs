//! Session facade: builds the stages, runs the encoder loop, tears down.

use crate::config::PipelineConfig;
use crate::context::{MediaQueue, PipelineContext};
use crate::counters::{CounterSnapshot, ProgressCounters};
use crate::encoder::{EncoderStage, MediaEncoder, RangeEnd};
use crate::error::PipelineError;
use crate::filter::{instantiate, release, FilterChain};
use crate::import::ImportStage;
use crate::rotate::Output;
use crate::worker::Worker;
use crate::Result;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use transcode_core::{FrameRanges, MediaKind};
use transcode_module::{
    check_pairing, Error as ModuleError, ModuleClass, ModuleFactory, ModuleInstance,
};

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipelineState {
    /// Threads are up; `run` may be called.
    Running,
    /// Every range was encoded and the encoders flushed.
    Finished,
    /// `run` returned early because a stop was requested.
    Interrupted,
    /// An encode or multiplex call failed.
    Failed,
    /// Threads joined and modules released.
    Stopped,
}

/// Requests a stop from another thread, e.g. a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    ctx: Arc<PipelineContext>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.ctx.request_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.ctx.stop_requested()
    }
}

/// Module instances created during setup, released together on failure.
#[derive(Default)]
struct Stages {
    imports: Vec<ImportStage>,
    workers: Vec<Worker>,
    video: Option<MediaEncoder>,
    audio: Option<MediaEncoder>,
    output: Option<Output>,
}

impl Stages {
    fn build(
        &mut self,
        config: &PipelineConfig,
        factory: &ModuleFactory,
        ctx: &Arc<PipelineContext>,
    ) -> Result<()> {
        let session = &config.session;

        let muxer_spec = config
            .output
            .multiplex
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidConfig("no multiplexer configured".into()))?;
        let muxer = instantiate(factory, ModuleClass::Multiplex, muxer_spec, session)?;
        let audio_muxer = match &config.output.audio_multiplex {
            Some(spec) => match instantiate(factory, ModuleClass::Multiplex, spec, session) {
                Ok(instance) => Some(instance),
                Err(e) => {
                    release(factory, muxer);
                    return Err(e);
                }
            },
            None => None,
        };
        let output = self
            .output
            .insert(Output::new(&config.output, muxer, audio_muxer));

        for kind in MediaKind::ALL {
            let stream = config.stream(kind);
            let (Some(import_spec), Some(encoder_spec)) = (&stream.import, &stream.encoder) else {
                continue;
            };
            let frame_size = config.frame_size(kind);

            let encoder = instantiate(factory, ModuleClass::Encode, encoder_spec, session)?;
            let checked = require_media(&encoder, kind, "encode")
                .and_then(|_| check_pairing(encoder.info(), output.muxer_info(kind)));
            if let Err(e) = checked {
                error!(
                    media = %kind,
                    encoder = %encoder.module_type(),
                    multiplexer = %output.muxer_info(kind).name,
                    error = %e,
                    "Encoder cannot feed multiplexer"
                );
                release(factory, encoder);
                return Err(e.into());
            }
            let filters = match FilterChain::create(factory, kind, &stream.filters, session) {
                Ok(filters) => filters,
                Err(e) => {
                    release(factory, encoder);
                    return Err(e);
                }
            };
            let media = MediaEncoder::new(encoder, filters, frame_size);
            match kind {
                MediaKind::Video => self.video = Some(media),
                MediaKind::Audio => self.audio = Some(media),
            }

            let module = instantiate(factory, ModuleClass::Import, import_spec, session)?;
            if let Err(e) = require_media(&module, kind, "decode") {
                release(factory, module);
                return Err(e.into());
            }
            let filters = match FilterChain::create(factory, kind, &stream.filters, session) {
                Ok(filters) => filters,
                Err(e) => {
                    release(factory, module);
                    return Err(e);
                }
            };
            self.imports.push(ImportStage::new(
                module,
                filters,
                Arc::clone(ctx),
                config.audio_sync_offset,
                frame_size,
                session.audio_frame_size(),
            ));

            for index in 0..stream.workers {
                let filters = FilterChain::create(factory, kind, &stream.filters, session)?;
                self.workers
                    .push(Worker::new(index, filters, Arc::clone(ctx)));
            }
            debug!(media = %kind, workers = stream.workers, frame_size, "Stages created");
        }
        Ok(())
    }

    fn release(self, factory: &ModuleFactory) {
        for import in self.imports {
            import.release(factory);
        }
        for worker in self.workers {
            worker.release(factory);
        }
        if let Some(output) = self.output {
            output.release(factory);
        }
        if let Some(video) = self.video {
            video.release(factory);
        }
        if let Some(audio) = self.audio {
            audio.release(factory);
        }
    }
}

fn require_media(
    instance: &ModuleInstance,
    kind: MediaKind,
    operation: &'static str,
) -> transcode_module::Result<()> {
    if instance.info().handles(kind) {
        Ok(())
    } else {
        Err(ModuleError::Unsupported {
            module: instance.module_type().to_string(),
            operation,
        })
    }
}

fn spawn(name: String, body: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new().name(name).spawn(body)?;
    Ok(handle)
}

/// One transcoding session.
///
/// `start` spawns the import and worker threads; `run` drives the encoder
/// on the calling thread; `stop` joins everything and releases every module
/// instance. Dropping a pipeline stops it.
pub struct Pipeline {
    factory: Arc<ModuleFactory>,
    ctx: Arc<PipelineContext>,
    encoder: Option<EncoderStage>,
    threads: Vec<JoinHandle<()>>,
    state: PipelineState,
}

impl Pipeline {
    /// Validate the configuration, create every module and start the
    /// import and worker threads.
    ///
    /// Nothing is left running if setup fails: created instances are
    /// destroyed and threads already started are joined.
    pub fn start(config: PipelineConfig, factory: Arc<ModuleFactory>) -> Result<Self> {
        config.validate()?;

        let queue = |kind: MediaKind| {
            let stream = config.stream(kind);
            if stream.is_enabled() {
                MediaQueue::new(kind, stream.pool_capacity, config.frame_size(kind), stream.workers)
            } else {
                MediaQueue::new(kind, 1, 0, 0)
            }
        };
        let ctx = Arc::new(PipelineContext::new(
            queue(MediaKind::Video),
            queue(MediaKind::Audio),
            config.poll_delay(),
            config.progress_interval,
        ));

        let mut stages = Stages::default();
        if let Err(e) = stages.build(&config, &factory, &ctx) {
            error!(error = %e, "Pipeline setup failed");
            stages.release(&factory);
            return Err(e);
        }
        let Some(output) = stages.output.take() else {
            stages.release(&factory);
            return Err(PipelineError::InvalidConfig("no multiplexer configured".into()));
        };
        let Stages {
            imports,
            workers,
            video,
            audio,
            ..
        } = stages;
        let mut encoder = EncoderStage::new(Arc::clone(&ctx), video, audio, output);

        let mut pipeline = Self {
            factory,
            ctx,
            encoder: None,
            threads: Vec::new(),
            state: PipelineState::Running,
        };

        if let Err(e) = encoder.open() {
            error!(error = %e, "Opening output failed");
            encoder.release(&pipeline.factory);
            for import in imports {
                import.release(&pipeline.factory);
            }
            for worker in workers {
                worker.release(&pipeline.factory);
            }
            pipeline.state = PipelineState::Stopped;
            return Err(e);
        }
        pipeline.encoder = Some(encoder);

        for import in &imports {
            pipeline.ctx.queue(import.kind()).set_import_active(true);
        }
        if let Err(e) = pipeline.spawn_stages(imports, workers) {
            error!(error = %e, "Starting stage threads failed");
            if let Err(stop) = pipeline.stop() {
                warn!(error = %stop, "Stopping after failed start");
            }
            return Err(e);
        }

        info!(
            threads = pipeline.threads.len(),
            plugins = pipeline.factory.plugin_count(),
            instances = pipeline.factory.instance_count(),
            "Pipeline started"
        );
        Ok(pipeline)
    }

    fn spawn_stages(&mut self, imports: Vec<ImportStage>, workers: Vec<Worker>) -> Result<()> {
        let mut workers = workers.into_iter();
        let mut imports = imports.into_iter();

        while let Some(mut worker) = workers.next() {
            let factory = Arc::clone(&self.factory);
            let name = format!("{}-worker-{}", worker.kind(), worker.index());
            let spawned = spawn(name, move || {
                worker.run();
                worker.release(&factory);
            });
            match spawned {
                Ok(handle) => self.threads.push(handle),
                Err(e) => {
                    self.release_unspawned(workers, imports);
                    return Err(e);
                }
            }
        }

        while let Some(mut import) = imports.next() {
            let factory = Arc::clone(&self.factory);
            let kind = import.kind();
            let spawned = spawn(format!("{}-import", kind), move || {
                import.run();
                import.release(&factory);
            });
            match spawned {
                Ok(handle) => self.threads.push(handle),
                Err(e) => {
                    self.ctx.queue(kind).set_import_active(false);
                    self.release_unspawned(std::iter::empty(), imports);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn release_unspawned(
        &self,
        workers: impl Iterator<Item = Worker>,
        imports: impl Iterator<Item = ImportStage>,
    ) {
        for worker in workers {
            worker.release(&self.factory);
        }
        for import in imports {
            self.ctx.queue(import.kind()).set_import_active(false);
            import.release(&self.factory);
        }
    }

    /// Encode the frames inside `ranges`, then flush the encoders.
    ///
    /// Frames between ranges are counted as skipped. Returns the counters
    /// at the end of the run; a requested stop ends the run early without
    /// an error.
    pub fn run(&mut self, ranges: &FrameRanges) -> Result<CounterSnapshot> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotStarted);
        }
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(PipelineError::NotStarted);
        };
        self.ctx.set_ranges(ranges.clone());

        let mut interrupted = false;
        for range in ranges.iter() {
            match encoder.encode_range(range) {
                Ok(RangeEnd::Finished) => {}
                Ok(RangeEnd::EndOfStream) => break,
                Ok(RangeEnd::Stopped) => {
                    interrupted = true;
                    break;
                }
                Err(e) => {
                    error!(range = %range, error = %e, "Encoding failed");
                    self.state = PipelineState::Failed;
                    return Err(e);
                }
            }
        }

        if interrupted {
            info!("Run interrupted by stop request");
            self.state = PipelineState::Interrupted;
        } else {
            if let Err(e) = encoder.flush() {
                error!(error = %e, "Flushing encoders failed");
                self.state = PipelineState::Failed;
                return Err(e);
            }
            self.state = PipelineState::Finished;
        }

        let snapshot = self.ctx.counters().snapshot();
        info!(
            encoded = snapshot.encoded,
            dropped = snapshot.dropped,
            skipped = snapshot.skipped,
            cloned = snapshot.cloned,
            "Run complete"
        );
        Ok(snapshot)
    }

    /// Stop every thread, release all module instances and empty the
    /// registries. Calling it again is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == PipelineState::Stopped {
            return Ok(());
        }
        self.ctx.request_stop();

        let mut result = Ok(());
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("stage").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Stage thread panicked");
                result = Err(PipelineError::Aborted(format!("{} thread panicked", name)));
            }
        }

        if let Some(encoder) = self.encoder.take() {
            encoder.release(&self.factory);
        }

        for kind in MediaKind::ALL {
            let queue = self.ctx.queue(kind);
            match queue.lock().flush() {
                Ok(0) => {}
                Ok(frames) => debug!(media = %kind, frames, "Registry flushed"),
                Err(e) => warn!(media = %kind, error = %e, "Registry flush failed"),
            }
            queue.counters().reset();
        }

        self.state = PipelineState::Stopped;
        info!(
            plugins = self.factory.plugin_count(),
            instances = self.factory.instance_count(),
            "Pipeline stopped"
        );
        result
    }

    /// Handle that stops this pipeline from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            ctx: Arc::clone(&self.ctx),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Shared session state, for diagnostics.
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn counters(&self) -> &ProgressCounters {
        self.ctx.counters()
    }

    /// Name of the output currently written, if the output is open.
    pub fn current_output(&self) -> Option<String> {
        self.encoder
            .as_ref()
            .map(|encoder| encoder.output())
            .filter(|output| output.is_open())
            .map(|output| output.current_name())
    }

    pub fn frames_encoded(&self) -> u64 {
        self.counters().encoded()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.counters().dropped()
    }

    pub fn frames_skipped(&self) -> u64 {
        self.counters().skipped()
    }

    pub fn frames_cloned(&self) -> u64 {
        self.counters().cloned()
    }

    /// Cloned minus skipped frames.
    pub fn frames_skipped_cloned(&self) -> i64 {
        self.counters().snapshot().skipped_cloned()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Pipeline stop on drop failed");
        }
    }
}
