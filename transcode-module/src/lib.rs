//! Module runtime for the transcode pipeline.
//!
//! Every import, filter, encode and multiplex stage talks to its external
//! collaborator through the same contract, the [`Module`] trait. This crate
//! provides:
//!
//! - **Descriptors**: [`ModuleInfo`] with feature flags and codec lists, and
//!   [`info_match`] to check an encoder/multiplexer pairing
//! - **Catalog**: a build-time table mapping `(class, name)` to a constructor
//! - **Factory**: a bounded, reference-counted table of loaded module types
//!   handing out [`ModuleInstance`]s
//! - **Format registry**: preferred modules per format
//!
//! # Example
//!
//! ```
//! use transcode_module::{ModuleCatalog, ModuleClass, ModuleFactory};
//!
//! let factory = ModuleFactory::new(ModuleCatalog::new());
//! assert!(factory.create(ModuleClass::Filter, "null").is_err());
//! assert_eq!(factory.plugin_count(), 0);
//! ```

mod catalog;
mod error;
mod factory;
mod format;
mod info;
mod module;
mod options;

pub use catalog::{Constructor, ModuleCatalog, ModuleDescriptor};
pub use error::{Error, Result};
pub use factory::{
    HandleStatus, ModuleComparison, ModuleFactory, ModuleInstance, ModuleType, MAX_HANDLES,
};
pub use format::FormatRegistry;
pub use info::{check_pairing, info_match, ModuleClass, ModuleFeatures, ModuleFlags, ModuleInfo};
pub use module::{EncodeStatus, FilterStage, Module, SessionParams, StreamStatus};
pub use options::{OptionString, MAX_OPTIONS};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
