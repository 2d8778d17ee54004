//! Build-time table of available modules.
//!
//! Modules are linked into the binary and registered here by class and name
//! together with a constructor. The factory looks modules up in the catalog
//! the first time a `(class, name)` pair is requested.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::info::{ModuleClass, ModuleInfo};
use crate::module::Module;

/// Creates a fresh, uninitialised module instance.
pub type Constructor = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// A catalog entry.
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub class: ModuleClass,
    pub info: ModuleInfo,
    pub(crate) constructor: Constructor,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("class", &self.class)
            .field("info", &self.info)
            .finish()
    }
}

/// Registered modules keyed by class and name.
#[derive(Default)]
pub struct ModuleCatalog {
    entries: BTreeMap<(ModuleClass, String), ModuleDescriptor>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. The name is taken from `info`.
    pub fn register<F>(&mut self, class: ModuleClass, info: ModuleInfo, constructor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        let key = (class, info.name.clone());
        if self.entries.contains_key(&key) {
            return Err(Error::AlreadyRegistered {
                name: format!("{}:{}", class, info.name),
            });
        }

        info!(
            class = %class,
            name = %info.name,
            version = %info.version,
            "Module registered"
        );

        self.entries.insert(
            key,
            ModuleDescriptor {
                class,
                info,
                constructor: Arc::new(constructor),
            },
        );
        Ok(())
    }

    /// Register a module, replacing any entry with the same class and name.
    pub fn replace<F>(&mut self, class: ModuleClass, info: ModuleInfo, constructor: F)
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        debug!(class = %class, name = %info.name, "Module entry replaced");
        self.entries.insert(
            (class, info.name.clone()),
            ModuleDescriptor {
                class,
                info,
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Remove a module.
    pub fn unregister(&mut self, class: ModuleClass, name: &str) -> Result<()> {
        self.entries
            .remove(&(class, name.to_string()))
            .ok_or_else(|| Error::NotFound {
                name: format!("{}:{}", class, name),
            })?;
        Ok(())
    }

    /// Look a module up.
    pub fn get(&self, class: ModuleClass, name: &str) -> Option<&ModuleDescriptor> {
        self.entries.get(&(class, name.to_string()))
    }

    /// All modules of a class, sorted by name.
    pub fn list_by_class(&self, class: ModuleClass) -> Vec<&ModuleInfo> {
        self.entries
            .values()
            .filter(|d| d.class == class)
            .map(|d| &d.info)
            .collect()
    }

    /// Number of registered modules.
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::ModuleFeatures;
    use crate::module::SessionParams;
    use crate::options::OptionString;

    struct Nop;

    impl Module for Nop {
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
            Ok("nop".into())
        }
    }

    fn info(name: &str) -> ModuleInfo {
        ModuleInfo::new(name, ModuleFeatures::FILTER | ModuleFeatures::VIDEO)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register(ModuleClass::Filter, info("null"), || Box::new(Nop))
            .unwrap();
        assert_eq!(catalog.count(), 1);
        assert!(catalog.get(ModuleClass::Filter, "null").is_some());
        assert!(catalog.get(ModuleClass::Encode, "null").is_none());
        assert_eq!(catalog.list_by_class(ModuleClass::Filter).len(), 1);

        let descriptor = catalog.get(ModuleClass::Filter, "null").unwrap();
        let module = (*descriptor.constructor)();
        assert_eq!(module.inspect("help").unwrap(), "nop");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register(ModuleClass::Filter, info("dup"), || Box::new(Nop))
            .unwrap();
        assert!(catalog
            .register(ModuleClass::Filter, info("dup"), || Box::new(Nop))
            .is_err());
        // Same name, other class.
        catalog
            .register(ModuleClass::Encode, info("dup"), || Box::new(Nop))
            .unwrap();
    }

    #[test]
    fn test_unregister() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register(ModuleClass::Filter, info("gone"), || Box::new(Nop))
            .unwrap();
        catalog.unregister(ModuleClass::Filter, "gone").unwrap();
        assert!(catalog.unregister(ModuleClass::Filter, "gone").is_err());
    }
}
