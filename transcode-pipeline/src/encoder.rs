//! Encoder/multiplex stage.
//!
//! Consumes frames strictly from the registry heads: a head that is still
//! WAIT or LOCKED holds back every READY frame behind it. Video and audio
//! are taken in pairs, encoded, multiplexed, then disposed.

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::filter::{release, FilterChain};
use crate::rotate::Output;
use crate::worker::{settle, Disposition};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use transcode_core::{FrameAttributes, FrameRange, MediaKind, Packet, Retrieved, SlotId, SlotState};
use transcode_module::{EncodeStatus, FilterStage, ModuleFactory, ModuleInstance};

/// How an encoding pass over one range ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeEnd {
    /// The next frame lies past the range; it stays queued.
    Finished,
    /// The source has no more frames.
    EndOfStream,
    /// A stop was requested.
    Stopped,
}

enum Fetched {
    Frame(SlotId),
    EndOfStream,
    Stopped,
}

/// Encoder and post-processing for one media kind.
pub(crate) struct MediaEncoder {
    kind: MediaKind,
    encoder: ModuleInstance,
    filters: FilterChain,
    packet: Packet,
    /// Frame acquired but not yet disposed, e.g. held back as a clone.
    current: Option<SlotId>,
}

impl MediaEncoder {
    pub(crate) fn new(encoder: ModuleInstance, filters: FilterChain, packet_capacity: usize) -> Self {
        let kind = filters.kind();
        Self {
            kind,
            encoder,
            filters,
            packet: Packet::with_capacity(kind, packet_capacity),
            current: None,
        }
    }

    pub(crate) fn release(self, factory: &ModuleFactory) {
        let mut encoder = self.encoder;
        if let Err(e) = encoder.stop() {
            debug!(media = %self.kind, error = %e, "Encoder stop failed");
        }
        release(factory, encoder);
        self.filters.release(factory);
    }
}

/// The single consumer of both registries.
pub(crate) struct EncoderStage {
    ctx: Arc<PipelineContext>,
    video: Option<MediaEncoder>,
    audio: Option<MediaEncoder>,
    output: Output,
    flushed: bool,
}

impl EncoderStage {
    pub(crate) fn new(
        ctx: Arc<PipelineContext>,
        video: Option<MediaEncoder>,
        audio: Option<MediaEncoder>,
        output: Output,
    ) -> Self {
        Self {
            ctx,
            video,
            audio,
            output,
            flushed: false,
        }
    }

    pub(crate) fn output(&self) -> &Output {
        &self.output
    }

    /// Open the first output chunk.
    pub(crate) fn open(&mut self) -> Result<()> {
        self.output.open()
    }

    fn media(&mut self, kind: MediaKind) -> Option<&mut MediaEncoder> {
        match kind {
            MediaKind::Video => self.video.as_mut(),
            MediaKind::Audio => self.audio.as_mut(),
        }
    }

    fn reference(&self) -> MediaKind {
        if self.video.is_some() {
            MediaKind::Video
        } else {
            MediaKind::Audio
        }
    }

    /// Encode every frame of `range`. Frames before the range are counted
    /// as skipped; the first frame past it is left for the next range.
    ///
    /// On a stage failure the error flag is raised and the output closed.
    pub(crate) fn encode_range(&mut self, range: &FrameRange) -> Result<RangeEnd> {
        info!(range = %range, "Encoding range");
        let result = self.encode_loop(range);
        self.ctx.log_fill_levels("encoder");
        match result {
            Ok(end) => {
                debug!(range = %range, end = ?end, "Range done");
                Ok(end)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn fail(&mut self) {
        self.ctx.set_failed();
        if let Err(close) = self.output.close() {
            warn!(error = %close, "Closing output after failure failed");
        }
    }

    fn encode_loop(&mut self, range: &FrameRange) -> Result<RangeEnd> {
        let reference = self.reference();
        loop {
            let slot = match self.acquire(reference)? {
                Fetched::Frame(slot) => slot,
                Fetched::EndOfStream => return Ok(RangeEnd::EndOfStream),
                Fetched::Stopped => return Ok(RangeEnd::Stopped),
            };
            let id = self.ctx.queue(reference).lock().frame(slot)?.id();
            if id >= range.end {
                return Ok(RangeEnd::Finished);
            }

            let (video, audio) = if reference == MediaKind::Video && self.audio.is_some() {
                match self.acquire(MediaKind::Audio)? {
                    Fetched::Frame(audio) => (Some(slot), Some(audio)),
                    Fetched::EndOfStream => (Some(slot), None),
                    Fetched::Stopped => return Ok(RangeEnd::Stopped),
                }
            } else if reference == MediaKind::Video {
                (Some(slot), None)
            } else {
                (None, Some(slot))
            };

            if id < range.start {
                trace!(frame = id, "Skipping frame before range");
                self.dispose(MediaKind::Video)?;
                self.dispose(MediaKind::Audio)?;
                self.ctx.counters().add_skipped(1);
                continue;
            }

            self.encode_pair(video, audio)?;
            self.dispose(MediaKind::Video)?;
            self.dispose(MediaKind::Audio)?;
            self.ctx.counters().add_encoded(id, range);
        }
    }

    /// Wait for the registry head to become READY and run the encoder-side
    /// filters on it. Frames the filters drop are removed and the next head
    /// is awaited.
    fn acquire(&mut self, kind: MediaKind) -> Result<Fetched> {
        let ctx = Arc::clone(&self.ctx);
        let queue = ctx.queue(kind);
        let Some(media) = self.media(kind) else {
            return Ok(Fetched::EndOfStream);
        };
        if let Some(slot) = media.current {
            return Ok(Fetched::Frame(slot));
        }

        loop {
            let slot = {
                let mut registry = queue.lock();
                loop {
                    if ctx.stop_requested() {
                        return Ok(Fetched::Stopped);
                    }
                    match registry.retrieve_ready()? {
                        Retrieved::Ready(slot) => break slot,
                        Retrieved::Blocked(state) => {
                            trace!(media = %kind, state = %state, "Head not ready");
                        }
                        Retrieved::Empty if !queue.import_active() => {
                            debug!(media = %kind, "Import closed, registry empty");
                            return Ok(Fetched::EndOfStream);
                        }
                        Retrieved::Empty => {}
                    }
                    queue.wait_frame_ready(&mut registry, ctx.poll_delay());
                }
            };

            let inline = !queue.has_workers();
            let mut frame = queue.lock().take_frame(slot)?;
            if inline {
                queue.counters().begin();
                media.filters.process_or_skip(&mut frame, FilterStage::PreWorker);
                if !frame.has(FrameAttributes::SKIPPED) {
                    media.filters.process_or_skip(&mut frame, FilterStage::PostWorker);
                }
            }
            if !frame.has(FrameAttributes::SKIPPED) {
                media.filters.process_or_skip(&mut frame, FilterStage::PostSync);
            }

            let mut registry = queue.lock();
            registry.restore_frame(slot, frame)?;
            let disposition = match settle(&mut registry, slot, SlotState::Ready)? {
                Disposition::Requeued if inline => {
                    warn!(media = %kind, "No slot left to repeat a frame, clone request dropped");
                    registry.frame_mut(slot)?.attributes.remove(FrameAttributes::CLONED);
                    registry.set_state(slot, SlotState::Ready)?;
                    Disposition::Ready
                }
                other => other,
            };
            drop(registry);

            if inline {
                queue.counters().finish(disposition != Disposition::Dropped);
            }
            match disposition {
                Disposition::Dropped => {
                    ctx.counters().add_dropped(1);
                    queue.notify_slot_freed();
                }
                Disposition::Requeued => {
                    queue.notify_frame_waiting();
                }
                Disposition::Cloned | Disposition::Ready => {
                    if disposition == Disposition::Cloned {
                        ctx.counters().add_cloned(1);
                    }
                    queue.counters().export();
                    media.current = Some(slot);
                    return Ok(Fetched::Frame(slot));
                }
            }
        }
    }

    /// Encode one frame into the media's packet.
    fn encode_frame(&mut self, kind: MediaKind, slot: SlotId) -> Result<EncodeStatus> {
        let ctx = Arc::clone(&self.ctx);
        let queue = ctx.queue(kind);
        let Some(media) = self.media(kind) else {
            return Err(PipelineError::NotStarted);
        };
        let mut frame = queue.lock().take_frame(slot)?;
        let result = media.encoder.encode(&frame, &mut media.packet);
        if matches!(result, Ok(EncodeStatus::Delayed)) {
            frame.attributes.insert(FrameAttributes::DELAYED);
        }
        queue.lock().restore_frame(slot, frame)?;
        result.map_err(|e| PipelineError::stage("encode", e))
    }

    /// Clear the delay mark of an encoded frame and report whether it was set.
    fn take_delay(&self, kind: MediaKind, slot: SlotId) -> Result<bool> {
        let mut registry = self.ctx.queue(kind).lock();
        let frame = registry.frame_mut(slot)?;
        let delayed = frame.has(FrameAttributes::DELAYED);
        frame.attributes.remove(FrameAttributes::DELAYED);
        Ok(delayed)
    }

    fn encode_pair(&mut self, video: Option<SlotId>, audio: Option<SlotId>) -> Result<()> {
        let (video_status, video_delayed) = match video {
            Some(slot) => {
                let status = self.encode_frame(MediaKind::Video, slot)?;
                (Some(status), self.take_delay(MediaKind::Video, slot)?)
            }
            None => (None, false),
        };

        let audio_status = match audio {
            Some(slot) if video_delayed => {
                // Offer the same audio again with the next video frame.
                let mut registry = self.ctx.queue(MediaKind::Audio).lock();
                registry.frame_mut(slot)?.attributes.insert(FrameAttributes::CLONED);
                None
            }
            Some(slot) => Some(self.encode_frame(MediaKind::Audio, slot)?),
            None => None,
        };

        let video_packet = self
            .video
            .as_ref()
            .filter(|_| video_status == Some(EncodeStatus::Encoded))
            .map(|media| &media.packet);
        let audio_packet = self
            .audio
            .as_ref()
            .filter(|_| audio_status == Some(EncodeStatus::Encoded))
            .map(|media| &media.packet);
        if video_packet.is_none() && audio_packet.is_none() {
            return Ok(());
        }

        let bytes = self.output.write(video_packet, audio_packet)?;
        self.output.record(bytes)?;
        Ok(())
    }

    /// Release the current frame of a media kind. A frame marked CLONED is
    /// kept for the next pair instead.
    fn dispose(&mut self, kind: MediaKind) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let queue = ctx.queue(kind);
        let Some(media) = self.media(kind) else {
            return Ok(());
        };
        let Some(slot) = media.current else {
            return Ok(());
        };

        let mut registry = queue.lock();
        let frame = registry.frame_mut(slot)?;
        if frame.has(FrameAttributes::CLONED) {
            frame.attributes.remove(FrameAttributes::CLONED);
            frame.attributes.insert(FrameAttributes::WAS_CLONED);
            trace!(media = %kind, frame = frame.id(), "Frame kept as clone");
            drop(registry);
            ctx.counters().add_cloned(1);
            return Ok(());
        }

        registry.remove(slot)?;
        drop(registry);
        media.current = None;
        queue.notify_slot_freed();
        Ok(())
    }

    /// Drain the encoders, audio first, and multiplex what they return.
    /// The output does not rotate while draining.
    ///
    /// A failure raises the error flag and closes the output.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        let result = self.drain();
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn drain(&mut self) -> Result<()> {
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let Some(media) = (match kind {
                MediaKind::Video => self.video.as_mut(),
                MediaKind::Audio => self.audio.as_mut(),
            }) else {
                continue;
            };
            let mut packets = 0;
            loop {
                let status = media
                    .encoder
                    .flush(&mut media.packet)
                    .map_err(|e| PipelineError::stage("encode", e))?;
                if status != EncodeStatus::Encoded {
                    break;
                }
                match kind {
                    MediaKind::Video => self.output.write(Some(&media.packet), None)?,
                    MediaKind::Audio => self.output.write(None, Some(&media.packet))?,
                };
                packets += 1;
            }
            info!(media = %kind, packets, "Encoder flushed");
        }
        Ok(())
    }

    /// Close the output and destroy every module instance.
    pub(crate) fn release(self, factory: &ModuleFactory) {
        self.output.release(factory);
        if let Some(video) = self.video {
            video.release(factory);
        }
        if let Some(audio) = self.audio {
            audio.release(factory);
        }
    }
}
