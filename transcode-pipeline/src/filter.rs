//! Filter chains built from filter modules.
//!
//! Every thread that runs filters owns its own chain, created through the
//! factory, so a slow filter call on one thread never holds up another.

use crate::config::ModuleSpec;
use crate::error::PipelineError;
use crate::Result;
use tracing::{debug, warn};
use transcode_core::{Frame, FrameAttributes, MediaKind};
use transcode_module::{FilterStage, ModuleClass, ModuleFactory, ModuleInstance, SessionParams};

/// Create an instance for `spec` in the given role and configure it.
///
/// The instance is destroyed again if configuration fails.
pub(crate) fn instantiate(
    factory: &ModuleFactory,
    role: ModuleClass,
    spec: &ModuleSpec,
    session: &SessionParams,
) -> Result<ModuleInstance> {
    let module_type = spec.module_type(role)?;
    let mut instance = factory.create(module_type.class, &module_type.name)?;
    if let Err(e) = instance.configure(&spec.options, session) {
        release(factory, instance);
        return Err(e.into());
    }
    Ok(instance)
}

/// Destroy an instance, logging instead of failing.
pub(crate) fn release(factory: &ModuleFactory, instance: ModuleInstance) {
    let module = instance.module_type().to_string();
    if let Err(e) = factory.destroy(instance) {
        warn!(module = %module, error = %e, "Module shutdown failed");
    }
}

/// Filters applied in order to frames of one media kind.
pub struct FilterChain {
    kind: MediaKind,
    filters: Vec<ModuleInstance>,
}

impl FilterChain {
    /// Create an empty filter chain.
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            filters: Vec::new(),
        }
    }

    /// Instantiate every filter in `specs` that handles `kind`.
    pub fn create(
        factory: &ModuleFactory,
        kind: MediaKind,
        specs: &[ModuleSpec],
        session: &SessionParams,
    ) -> Result<Self> {
        let mut chain = Self::new(kind);
        for spec in specs {
            let instance = match instantiate(factory, ModuleClass::Filter, spec, session) {
                Ok(instance) => instance,
                Err(e) => {
                    chain.release(factory);
                    return Err(e);
                }
            };
            if instance.info().handles(kind) {
                chain.add(instance);
            } else {
                debug!(filter = instance.name(), media = %kind, "Filter does not handle media, skipped");
                release(factory, instance);
            }
        }
        Ok(chain)
    }

    /// Add a filter to the chain.
    pub fn add(&mut self, filter: ModuleInstance) {
        self.filters.push(filter);
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Get number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if chain is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter at `stage`. Frames that are out of range or mark
    /// the end of the stream are left alone; the chain stops early once a
    /// filter marks the frame skipped.
    pub fn process(&mut self, frame: &mut Frame, stage: FilterStage) -> Result<()> {
        if !frame.needs_processing() {
            return Ok(());
        }
        for filter in &mut self.filters {
            filter
                .filter(frame, stage)
                .map_err(|e| PipelineError::stage("filter", e))?;
            if frame.has(FrameAttributes::SKIPPED) {
                break;
            }
        }
        Ok(())
    }

    /// Run the chain and turn a filter failure into a skipped frame.
    pub(crate) fn process_or_skip(&mut self, frame: &mut Frame, stage: FilterStage) {
        if let Err(e) = self.process(frame, stage) {
            warn!(media = %self.kind, frame = frame.id(), error = %e, "Filter failed, frame dropped");
            frame.attributes.insert(FrameAttributes::SKIPPED);
        }
    }

    /// Stop and destroy every filter.
    pub fn release(self, factory: &ModuleFactory) {
        for mut filter in self.filters {
            if let Err(e) = filter.stop() {
                debug!(filter = filter.name(), error = %e, "Filter stop failed");
            }
            release(factory, filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcode_module::{Module, ModuleCatalog, ModuleFeatures, ModuleInfo, OptionString};

    struct Skipper {
        skip_id: u64,
    }

    impl Module for Skipper {
        fn init(&mut self) -> transcode_module::Result<()> {
            Ok(())
        }
        fn fini(&mut self) -> transcode_module::Result<()> {
            Ok(())
        }
        fn configure(
            &mut self,
            options: &OptionString,
            _session: &SessionParams,
        ) -> transcode_module::Result<()> {
            if let Some(id) = options.get::<u64>("skip")? {
                self.skip_id = id;
            }
            Ok(())
        }
        fn stop(&mut self) -> transcode_module::Result<()> {
            Ok(())
        }
        fn inspect(&self, _query: &str) -> transcode_module::Result<String> {
            Ok("skip=<frame>".into())
        }
        fn filter_video(&mut self, frame: &mut Frame, _stage: FilterStage) -> transcode_module::Result<()> {
            if frame.id() == self.skip_id {
                frame.attributes.insert(FrameAttributes::SKIPPED);
            }
            frame.data_mut().iter_mut().for_each(|b| *b = b.wrapping_add(1));
            Ok(())
        }
    }

    fn factory() -> ModuleFactory {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register(
                ModuleClass::Filter,
                ModuleInfo::new("skip", ModuleFeatures::FILTER | ModuleFeatures::VIDEO),
                || Box::new(Skipper { skip_id: u64::MAX }),
            )
            .unwrap();
        ModuleFactory::new(catalog)
    }

    #[test]
    fn test_chain_stops_at_skip() {
        let factory = factory();
        let specs = vec![
            ModuleSpec::new("skip").with_options("skip=0"),
            ModuleSpec::new("filter:skip"),
        ];
        let mut chain =
            FilterChain::create(&factory, MediaKind::Video, &specs, &SessionParams::default()).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(factory.refcount(ModuleClass::Filter, "skip"), Some(2));

        let mut frame = Frame::new(MediaKind::Video, 4);
        frame.fill_from(&[0, 0]).unwrap();
        chain.process(&mut frame, FilterStage::PreWorker).unwrap();
        // Only the first filter ran.
        assert!(frame.has(FrameAttributes::SKIPPED));
        assert_eq!(frame.data(), &[1, 1]);

        chain.release(&factory);
        assert_eq!(factory.plugin_count(), 0);
    }

    #[test]
    fn test_unhandled_media_is_left_out() {
        let factory = factory();
        let chain = FilterChain::create(
            &factory,
            MediaKind::Audio,
            &[ModuleSpec::new("skip")],
            &SessionParams::default(),
        )
        .unwrap();
        assert!(chain.is_empty());
        assert_eq!(factory.instance_count(), 0);
    }

    #[test]
    fn test_failed_configure_releases_everything() {
        let factory = factory();
        let specs = vec![
            ModuleSpec::new("skip"),
            ModuleSpec::new("skip").with_options("skip=notanumber"),
        ];
        assert!(FilterChain::create(&factory, MediaKind::Video, &specs, &SessionParams::default()).is_err());
        assert_eq!(factory.instance_count(), 0);
        assert_eq!(factory.plugin_count(), 0);
    }

    #[test]
    fn test_out_of_range_frames_untouched() {
        let factory = factory();
        let mut chain =
            FilterChain::create(&factory, MediaKind::Video, &[ModuleSpec::new("skip")], &SessionParams::default())
                .unwrap();
        let mut frame = Frame::new(MediaKind::Video, 4);
        frame.fill_from(&[5]).unwrap();
        frame.attributes.insert(FrameAttributes::OUT_OF_RANGE);
        chain.process(&mut frame, FilterStage::PreSync).unwrap();
        assert_eq!(frame.data(), &[5]);
        chain.release(&factory);
    }
}
