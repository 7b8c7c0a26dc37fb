//! Core domain types for packmix.

pub mod ids;
pub mod sample;
pub mod status;

pub use ids::{PackId, PlayerId, SoundId, VoiceId};
pub use sample::SampleFormat;
pub use status::{EngineState, TickStatus};
