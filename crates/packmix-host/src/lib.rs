//! # packmix-host
//!
//! Host-facing glue for packmix: a primitive-typed bridge suitable for a
//! foreign-function boundary, application lifecycle hooks that own the tick
//! thread, a JSON configuration file and logging setup.

pub mod bridge;
pub mod config;
pub mod lifecycle;
pub mod logging;

pub use bridge::{HostBridge, SinkFactory};
pub use config::HostConfig;
pub use lifecycle::HostLifecycle;
pub use logging::init_logging;
