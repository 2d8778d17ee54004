//! # Transcode Pipeline
//!
//! The threaded core of a transcoding session:
//!
//! - one import thread per media kind reads raw frames into a bounded
//!   slot pool,
//! - worker threads run the filter chain on them, possibly out of order,
//! - the encoder consumes frames strictly in registry order, encodes and
//!   multiplexes them, rotating the output when a threshold is crossed.
//!
//! A frame still being filtered at the head of the registry holds back
//! every frame behind it, so output order always equals input order.
//!
//! ```no_run
//! use std::sync::Arc;
//! use transcode_core::FrameRanges;
//! use transcode_module::{ModuleCatalog, ModuleFactory};
//! use transcode_pipeline::{ModuleSpec, Pipeline, PipelineConfig, StreamConfig};
//!
//! # fn main() -> transcode_pipeline::Result<()> {
//! let factory = Arc::new(ModuleFactory::new(ModuleCatalog::new()));
//! let config = PipelineConfig::default()
//!     .with_video(
//!         StreamConfig::default()
//!             .with_import(ModuleSpec::new("raw"))
//!             .with_encoder(ModuleSpec::new("mpeg2"))
//!             .with_workers(2),
//!     )
//!     .with_output("movie", ".avi")
//!     .with_multiplex(ModuleSpec::new("avi"));
//!
//! let mut pipeline = Pipeline::start(config, factory)?;
//! let counters = pipeline.run(&FrameRanges::all())?;
//! pipeline.stop()?;
//! println!("{} frames encoded", counters.encoded);
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod counters;
mod encoder;
mod error;
mod filter;
mod import;
mod pipeline;
mod rotate;
mod worker;

pub use config::{ModuleSpec, OutputConfig, PipelineConfig, RotationPolicy, StreamConfig};
pub use context::{MediaQueue, PipelineContext, StageCounters, StageLevels};
pub use counters::{CounterSnapshot, ProgressCounters};
pub use error::{PipelineError, Result};
pub use filter::FilterChain;
pub use pipeline::{Pipeline, PipelineState, StopHandle};
pub use rotate::{chunk_name, RotateContext};
