//! Module factory: loads module types on demand and hands out instances.
//!
//! Each distinct `(class, name)` pair occupies one handle in a bounded table.
//! The handle keeps its own copy of the module descriptor and a count of the
//! live instances created from it. A handle is released when its last
//! instance is destroyed; an explicit [`ModuleFactory::unload`] is refused
//! while instances are alive.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use transcode_core::{Frame, MediaKind, Packet};

use crate::catalog::{Constructor, ModuleCatalog};
use crate::error::{Error, Result};
use crate::info::{ModuleClass, ModuleFeatures, ModuleFlags, ModuleInfo};
use crate::module::{EncodeStatus, FilterStage, Module, SessionParams, StreamStatus};
use crate::options::OptionString;

/// Number of module types that can be loaded at the same time.
pub const MAX_HANDLES: usize = 16;

/// A module type, written `class:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleType {
    pub class: ModuleClass,
    pub name: String,
}

impl ModuleType {
    pub fn new(class: ModuleClass, name: impl Into<String>) -> Self {
        Self {
            class,
            name: name.into(),
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.name)
    }
}

impl FromStr for ModuleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (class, name) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidType(s.to_string()))?;
        if name.is_empty() {
            return Err(Error::InvalidType(s.to_string()));
        }
        Ok(Self::new(class.parse()?, name))
    }
}

/// Status of a handle table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// Unused.
    Free,
    /// Claimed, descriptor being copied in.
    Loaded,
    /// Usable for creating instances.
    Ready,
}

/// How two instances relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleComparison {
    /// Both refer to the same instance.
    SameInstance,
    /// Different instances of the same module type.
    SameType,
    /// Different module types.
    Different,
}

struct ModuleHandle {
    status: HandleStatus,
    generation: u32,
    module_type: Option<ModuleType>,
    info: Option<Arc<ModuleInfo>>,
    constructor: Option<Constructor>,
    refcount: usize,
}

impl ModuleHandle {
    fn free() -> Self {
        Self {
            status: HandleStatus::Free,
            generation: 0,
            module_type: None,
            info: None,
            constructor: None,
            refcount: 0,
        }
    }

    fn reset(&mut self) {
        self.status = HandleStatus::Free;
        self.module_type = None;
        self.info = None;
        self.constructor = None;
        self.refcount = 0;
    }

    fn is(&self, module_type: &ModuleType) -> bool {
        self.status == HandleStatus::Ready && self.module_type.as_ref() == Some(module_type)
    }
}

struct FactoryState {
    handles: Vec<ModuleHandle>,
    loaded: usize,
    instances: usize,
    next_instance_id: u64,
}

/// Creates and destroys module instances.
///
/// The factory is `Send + Sync`; share it with `Arc` when several threads
/// create or destroy instances.
pub struct ModuleFactory {
    catalog: RwLock<ModuleCatalog>,
    state: Mutex<FactoryState>,
}

impl ModuleFactory {
    /// Create a factory over a catalog.
    pub fn new(catalog: ModuleCatalog) -> Self {
        debug!(modules = catalog.count(), "Module factory created");
        Self {
            catalog: RwLock::new(catalog),
            state: Mutex::new(FactoryState {
                handles: (0..MAX_HANDLES).map(|_| ModuleHandle::free()).collect(),
                loaded: 0,
                instances: 0,
                next_instance_id: 0,
            }),
        }
    }

    /// Mutable access to the catalog. Already loaded handles keep the
    /// descriptor they were loaded with.
    pub fn with_catalog<R>(&self, f: impl FnOnce(&mut ModuleCatalog) -> R) -> R {
        f(&mut self.catalog.write())
    }

    /// Load a module type without creating an instance. Loading an already
    /// loaded type is a no-op.
    pub fn load(&self, class: ModuleClass, name: &str) -> Result<()> {
        let module_type = ModuleType::new(class, name);
        let mut state = self.state.lock();
        if state.handles.iter().any(|h| h.is(&module_type)) {
            return Ok(());
        }
        self.load_locked(&mut state, &module_type).map(|_| ())
    }

    fn load_locked(&self, state: &mut FactoryState, module_type: &ModuleType) -> Result<usize> {
        let Some(index) = state
            .handles
            .iter()
            .position(|h| h.status == HandleStatus::Free)
        else {
            error!(module = %module_type, max = MAX_HANDLES, "Cannot load module: handle table full");
            return Err(Error::TableFull { max: MAX_HANDLES });
        };

        let descriptor = {
            let catalog = self.catalog.read();
            match catalog.get(module_type.class, &module_type.name) {
                Some(descriptor) => descriptor.clone(),
                None => {
                    error!(module = %module_type, "Cannot load module: not in catalog");
                    return Err(Error::NotFound {
                        name: module_type.to_string(),
                    });
                }
            }
        };

        let handle = &mut state.handles[index];
        handle.status = HandleStatus::Loaded;
        handle.generation = handle.generation.wrapping_add(1);

        if let Err(e) = descriptor.info.validate(module_type.class) {
            error!(module = %module_type, error = %e, "Module descriptor rejected");
            handle.reset();
            return Err(e);
        }

        handle.module_type = Some(module_type.clone());
        handle.info = Some(Arc::new(descriptor.info.clone()));
        handle.constructor = Some(descriptor.constructor.clone());
        handle.status = HandleStatus::Ready;
        state.loaded += 1;

        info!(module = %module_type, handle = index, "Module loaded");
        Ok(index)
    }

    /// Unload a module type. Refused while the type has live instances.
    pub fn unload(&self, class: ModuleClass, name: &str) -> Result<()> {
        let module_type = ModuleType::new(class, name);
        let mut state = self.state.lock();
        let index = state
            .handles
            .iter()
            .position(|h| h.is(&module_type))
            .ok_or_else(|| Error::NotFound {
                name: module_type.to_string(),
            })?;
        Self::unload_locked(&mut state, index)
    }

    fn unload_locked(state: &mut FactoryState, index: usize) -> Result<()> {
        let handle = &mut state.handles[index];
        let module = handle
            .module_type
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        if handle.refcount > 0 {
            warn!(module = %module, refcount = handle.refcount, "Refusing to unload module in use");
            return Err(Error::InUse {
                module,
                refcount: handle.refcount,
            });
        }
        handle.reset();
        state.loaded -= 1;
        info!(module = %module, handle = index, "Module unloaded");
        Ok(())
    }

    /// Create an instance from a `class:name` type string.
    pub fn create_from_type(&self, module_type: &str) -> Result<ModuleInstance> {
        let module_type: ModuleType = module_type.parse()?;
        self.create(module_type.class, &module_type.name)
    }

    /// Create and initialise an instance, loading the module type first if
    /// needed.
    pub fn create(&self, class: ModuleClass, name: &str) -> Result<ModuleInstance> {
        let module_type = ModuleType::new(class, name);
        let mut state = self.state.lock();

        let existing = state.handles.iter().position(|h| h.is(&module_type));
        let (index, fresh) = match existing {
            Some(index) => (index, false),
            None => (self.load_locked(&mut state, &module_type)?, true),
        };

        let handle = &state.handles[index];
        let (Some(info), Some(constructor)) = (handle.info.clone(), handle.constructor.clone())
        else {
            return Err(Error::NotFound {
                name: module_type.to_string(),
            });
        };
        let generation = handle.generation;

        let mut module = (*constructor)();
        if let Err(e) = module.init() {
            error!(module = %module_type, error = %e, "Module init failed");
            if fresh {
                Self::unload_locked(&mut state, index)?;
            }
            return Err(Error::InitFailed {
                module: module_type.to_string(),
                message: e.to_string(),
            });
        }

        state.next_instance_id += 1;
        let id = state.next_instance_id;
        state.handles[index].refcount += 1;
        state.instances += 1;

        debug!(
            module = %module_type,
            instance = id,
            refcount = state.handles[index].refcount,
            "Module instance created"
        );

        Ok(ModuleInstance {
            id,
            handle: index,
            generation,
            module_type,
            info,
            configured: false,
            module,
        })
    }

    /// Finalise and drop an instance. When this was the last instance of its
    /// type the type is unloaded.
    ///
    /// The reference is released even if `fini` fails; the error is returned
    /// afterwards.
    pub fn destroy(&self, mut instance: ModuleInstance) -> Result<()> {
        let fini = instance.module.fini();
        if let Err(e) = &fini {
            error!(module = %instance.module_type, instance = instance.id, error = %e, "Module fini failed");
        }

        let mut state = self.state.lock();
        let handle = state
            .handles
            .get_mut(instance.handle)
            .filter(|h| h.generation == instance.generation && h.status == HandleStatus::Ready)
            .ok_or_else(|| Error::NotFound {
                name: instance.module_type.to_string(),
            })?;

        if handle.refcount == 0 {
            warn!(module = %instance.module_type, "Destroying instance of module with no references");
        } else {
            handle.refcount -= 1;
        }
        let remaining = handle.refcount;
        state.instances = state.instances.saturating_sub(1);

        debug!(
            module = %instance.module_type,
            instance = instance.id,
            refcount = remaining,
            "Module instance destroyed"
        );

        if remaining == 0 {
            Self::unload_locked(&mut state, instance.handle)?;
        }
        fini
    }

    /// Number of loaded module types.
    pub fn plugin_count(&self) -> usize {
        self.state.lock().loaded
    }

    /// Number of live instances.
    pub fn instance_count(&self) -> usize {
        self.state.lock().instances
    }

    /// Status of the handle holding a module type; `Free` when not loaded.
    pub fn handle_status(&self, class: ModuleClass, name: &str) -> HandleStatus {
        let module_type = ModuleType::new(class, name);
        self.state
            .lock()
            .handles
            .iter()
            .find(|h| h.module_type.as_ref() == Some(&module_type))
            .map(|h| h.status)
            .unwrap_or(HandleStatus::Free)
    }

    /// Live instance count of a loaded module type.
    pub fn refcount(&self, class: ModuleClass, name: &str) -> Option<usize> {
        let module_type = ModuleType::new(class, name);
        self.state
            .lock()
            .handles
            .iter()
            .find(|h| h.is(&module_type))
            .map(|h| h.refcount)
    }

    /// Descriptor a loaded module type was loaded with.
    pub fn loaded_info(&self, class: ModuleClass, name: &str) -> Option<Arc<ModuleInfo>> {
        let module_type = ModuleType::new(class, name);
        self.state
            .lock()
            .handles
            .iter()
            .find(|h| h.is(&module_type))
            .and_then(|h| h.info.clone())
    }

    /// Relate two instances.
    pub fn compare(a: &ModuleInstance, b: &ModuleInstance) -> ModuleComparison {
        if a.id == b.id {
            ModuleComparison::SameInstance
        } else if a.module_type == b.module_type {
            ModuleComparison::SameType
        } else {
            ModuleComparison::Different
        }
    }
}

impl Drop for ModuleFactory {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.loaded > 0 || state.instances > 0 {
            let leftover: Vec<String> = state
                .handles
                .iter()
                .filter_map(|h| h.module_type.as_ref().map(ToString::to_string))
                .collect();
            warn!(
                loaded = state.loaded,
                instances = state.instances,
                modules = ?leftover,
                "Module factory shut down with modules still loaded"
            );
        }
    }
}

/// A live module instance, owned by whoever created it.
///
/// The typed wrappers check the declared features before calling into the
/// module, so a contract mismatch surfaces as [`Error::Unsupported`].
pub struct ModuleInstance {
    id: u64,
    handle: usize,
    generation: u32,
    module_type: ModuleType,
    info: Arc<ModuleInfo>,
    configured: bool,
    module: Box<dyn Module>,
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("id", &self.id)
            .field("type", &self.module_type.to_string())
            .field("configured", &self.configured)
            .finish()
    }
}

impl ModuleInstance {
    /// Factory-wide instance id, starting at 1.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn module_type(&self) -> &ModuleType {
        &self.module_type
    }

    pub fn name(&self) -> &str {
        &self.module_type.name
    }

    pub fn class(&self) -> ModuleClass {
        self.module_type.class
    }

    /// Descriptor copied into the handle at load time.
    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// Whether `configure` has succeeded at least once.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Configure from an option string.
    pub fn configure(&mut self, options: &str, session: &SessionParams) -> Result<()> {
        let options = OptionString::parse(options)?;
        self.configure_with(&options, session)
    }

    /// Configure from parsed options. A second call needs the
    /// `RECONFIGURABLE` flag.
    pub fn configure_with(&mut self, options: &OptionString, session: &SessionParams) -> Result<()> {
        if self.configured && !self.info.flags.contains(ModuleFlags::RECONFIGURABLE) {
            return Err(Error::module(
                self.name(),
                "already configured and not reconfigurable",
            ));
        }
        self.module.configure(options, session)?;
        self.configured = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.module.stop()?;
        self.configured = false;
        Ok(())
    }

    pub fn inspect(&self, query: &str) -> Result<String> {
        self.module.inspect(query)
    }

    /// Read the next raw frame of `frame`'s media kind.
    pub fn decode(&mut self, frame: &mut Frame) -> Result<StreamStatus> {
        let kind = frame.kind();
        self.require(ModuleFeatures::DECODE, kind, "decode")?;
        match kind {
            MediaKind::Video => self.module.decode_video(frame),
            MediaKind::Audio => self.module.decode_audio(frame),
        }
    }

    /// Run the filter on a frame in place.
    pub fn filter(&mut self, frame: &mut Frame, stage: FilterStage) -> Result<()> {
        let kind = frame.kind();
        self.require(ModuleFeatures::FILTER, kind, "filter")?;
        match kind {
            MediaKind::Video => self.module.filter_video(frame, stage),
            MediaKind::Audio => self.module.filter_audio(frame, stage),
        }
    }

    /// Encode a frame into `packet`.
    pub fn encode(&mut self, frame: &Frame, packet: &mut Packet) -> Result<EncodeStatus> {
        let kind = frame.kind();
        self.require(ModuleFeatures::ENCODE, kind, "encode")?;
        packet.clear();
        packet.frame_id = frame.id();
        match kind {
            MediaKind::Video => self.module.encode_video(frame, packet),
            MediaKind::Audio => self.module.encode_audio(frame, packet),
        }
    }

    /// Drain one buffered packet of `packet`'s media kind.
    pub fn flush(&mut self, packet: &mut Packet) -> Result<EncodeStatus> {
        let kind = packet.kind();
        self.require(ModuleFeatures::ENCODE, kind, "flush")?;
        packet.clear();
        match kind {
            MediaKind::Video => self.module.flush_video(packet),
            MediaKind::Audio => self.module.flush_audio(packet),
        }
    }

    pub fn open(&mut self, sink: &str) -> Result<()> {
        self.require_capability(ModuleFeatures::MULTIPLEX, "open")?;
        self.module.open(sink)
    }

    pub fn close(&mut self) -> Result<()> {
        self.require_capability(ModuleFeatures::MULTIPLEX, "close")?;
        self.module.close()
    }

    /// Write packets; returns bytes written.
    pub fn multiplex(&mut self, video: Option<&Packet>, audio: Option<&Packet>) -> Result<usize> {
        self.require_capability(ModuleFeatures::MULTIPLEX, "multiplex")?;
        self.module.multiplex(video, audio)
    }

    /// Read packets; returns bytes read.
    pub fn demultiplex(
        &mut self,
        video: Option<&mut Packet>,
        audio: Option<&mut Packet>,
    ) -> Result<usize> {
        self.require_capability(ModuleFeatures::DEMULTIPLEX, "demultiplex")?;
        self.module.demultiplex(video, audio)
    }

    fn require(&self, feature: ModuleFeatures, kind: MediaKind, operation: &'static str) -> Result<()> {
        self.require_capability(feature | ModuleFeatures::media(kind), operation)
    }

    fn require_capability(&self, features: ModuleFeatures, operation: &'static str) -> Result<()> {
        if self.info.features.contains(features) {
            Ok(())
        } else {
            Err(Error::Unsupported {
                module: self.module_type.to_string(),
                operation,
            })
        }
    }
}
