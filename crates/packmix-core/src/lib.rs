//! # packmix-core
//!
//! Core types, the resource pack container format, engine configuration and
//! error handling for packmix.

pub mod config;
pub mod error;
pub mod format;
pub mod types;

pub use config::{DuplicatePackPolicy, EngineConfig, PlayerEndPolicy};
pub use error::{Error, FormatError, Result};
pub use format::{PackBuilder, PackHeader, PackTable, SoundEntry};
pub use types::*;
