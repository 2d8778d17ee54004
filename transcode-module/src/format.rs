//! Format registry: which modules to use for a given format.
//!
//! The registry is a JSON document of the form
//!
//! ```json
//! { "avi": { "demultiplex": "avi", "decode": "xvid,raw", "multiplex": "avi" } }
//! ```
//!
//! Each value is a comma separated candidate list tried in order.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::factory::{ModuleFactory, ModuleInstance};
use crate::info::ModuleClass;

/// Maps format names to per-class module candidates.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    formats: BTreeMap<String, BTreeMap<ModuleClass, String>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a registry from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let formats: BTreeMap<String, BTreeMap<ModuleClass, String>> = serde_json::from_str(json)?;
        Ok(Self { formats })
    }

    /// Read a registry from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Reading format registry");
        Self::from_json_str(&text)
    }

    /// Set the candidate list for a format and class.
    pub fn insert(&mut self, format: &str, class: ModuleClass, candidates: &str) {
        self.formats
            .entry(format.to_string())
            .or_default()
            .insert(class, candidates.to_string());
    }

    /// Candidate module names for a format and class, in preference order.
    pub fn candidates(&self, class: ModuleClass, format: &str) -> Vec<&str> {
        self.formats
            .get(format)
            .and_then(|classes| classes.get(&class))
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Create the first candidate for `format` that the factory can create.
    pub fn module_for_format(
        &self,
        factory: &ModuleFactory,
        class: ModuleClass,
        format: &str,
    ) -> Result<ModuleInstance> {
        let candidates = self.candidates(class, format);
        if candidates.is_empty() {
            return Err(Error::NotFound {
                name: format!("{} module for format '{}'", class, format),
            });
        }
        let mut last_error = None;
        for name in candidates {
            match factory.create(class, name) {
                Ok(instance) => {
                    debug!(class = %class, format, module = name, "Module selected for format");
                    return Ok(instance);
                }
                Err(e) => {
                    warn!(class = %class, format, module = name, error = %e, "Candidate module unusable");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(Error::NotFound {
            name: format.to_string(),
        }))
    }

    /// Create a module by explicit name, falling back to the format's
    /// candidates when no name is given.
    pub fn module_most_fit(
        &self,
        factory: &ModuleFactory,
        class: ModuleClass,
        format: Option<&str>,
        name: Option<&str>,
    ) -> Result<ModuleInstance> {
        match (name, format) {
            (Some(name), _) => factory.create(class, name),
            (None, Some(format)) => self.module_for_format(factory, class, format),
            (None, None) => Err(Error::Config(format!(
                "neither module name nor format given for {}",
                class
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModuleCatalog;
    use crate::info::{ModuleFeatures, ModuleInfo};
    use crate::module::{Module, SessionParams};
    use crate::options::OptionString;
    use std::io::Write;

    struct Muxer;

    impl Module for Muxer {
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

    fn factory() -> ModuleFactory {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register(
                ModuleClass::Multiplex,
                ModuleInfo::new("avi", ModuleFeatures::MULTIPLEX | ModuleFeatures::VIDEO),
                || Box::new(Muxer),
            )
            .unwrap();
        ModuleFactory::new(catalog)
    }

    #[test]
    fn test_candidates_in_order() {
        // Class aliases are not accepted as keys.
        let err = FormatRegistry::from_json_str(r#"{"avi": {"mplex": "avi"}}"#).unwrap_err();
        assert!(matches!(err, Error::Json(_)));

        let registry =
            FormatRegistry::from_json_str(r#"{"avi": {"decode": "xvid, raw,", "multiplex": "avi"}}"#)
                .unwrap();
        assert_eq!(registry.candidates(ModuleClass::Decode, "avi"), vec!["xvid", "raw"]);
        assert!(registry.candidates(ModuleClass::Encode, "avi").is_empty());
        assert!(registry.candidates(ModuleClass::Decode, "mkv").is_empty());
    }

    #[test]
    fn test_first_loadable_candidate_wins() {
        let factory = factory();
        let mut registry = FormatRegistry::new();
        registry.insert("avi", ModuleClass::Multiplex, "missing,avi");

        let instance = registry
            .module_for_format(&factory, ModuleClass::Multiplex, "avi")
            .unwrap();
        assert_eq!(instance.name(), "avi");
        factory.destroy(instance).unwrap();

        assert!(registry
            .module_for_format(&factory, ModuleClass::Multiplex, "mkv")
            .is_err());
    }

    #[test]
    fn test_most_fit() {
        let factory = factory();
        let mut registry = FormatRegistry::new();
        registry.insert("avi", ModuleClass::Multiplex, "avi");

        let by_name = registry
            .module_most_fit(&factory, ModuleClass::Multiplex, Some("mkv"), Some("avi"))
            .unwrap();
        let by_format = registry
            .module_most_fit(&factory, ModuleClass::Multiplex, Some("avi"), None)
            .unwrap();
        assert_eq!(factory.instance_count(), 2);
        assert!(registry
            .module_most_fit(&factory, ModuleClass::Multiplex, None, None)
            .is_err());

        factory.destroy(by_name).unwrap();
        factory.destroy(by_format).unwrap();
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"wav": {{"multiplex": "wav"}}}}"#).unwrap();
        let registry = FormatRegistry::from_json_file(file.path()).unwrap();
        assert_eq!(registry.candidates(ModuleClass::Multiplex, "wav"), vec!["wav"]);
    }
}
