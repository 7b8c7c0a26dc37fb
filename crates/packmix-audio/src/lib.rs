//! # packmix-audio
//!
//! Low-latency sample mixer for packmix.
//!
//! Features:
//! - Resource packs decoded up front or streamed per voice from a worker thread
//! - Fixed voice pool with one-shot voices and persistent players
//! - Allocation-free processing tick fed by a bounded command queue
//! - Pluggable output sinks, no device backend required

pub mod buffer;
pub mod command;
pub mod convert;
pub mod decode;
pub mod engine;
pub mod events;
pub mod lifecycle;
mod mixer;
pub mod output;
pub mod pack;
pub mod resample;
pub mod scheduler;
pub mod source;
pub mod stream;
pub mod voice;

pub use command::PlayerOp;
pub use engine::Engine;
pub use events::{DropReason, EngineEvent, StatsSnapshot};
pub use output::{CaptureSink, NullSink, OutputSink};
pub use pack::Pack;
pub use scheduler::{StopReason, TickScheduler, TickSummary};
pub use source::{AssetSource, DirectoryAssets, PackSource};
