//! Engine lifecycle state and tick status codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an engine instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EngineState {
    #[default]
    Uninitialized = 0,
    Created = 1,
    Running = 2,
    Paused = 3,
    Terminated = 4,
}

impl EngineState {
    /// Decode the value stored in an atomic.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Created,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Terminated,
            _ => Self::Uninitialized,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether control operations (load, play, pause) are accepted.
    pub const fn accepts_control(self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Paused)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one mixer tick.
///
/// Only [`TickStatus::Fatal`] obliges the host to stop ticking and terminate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TickStatus {
    #[default]
    Nominal,
    /// At least one streaming voice ran dry this tick and emitted silence.
    Underrun,
    /// The engine is not running (terminated); the tick did nothing.
    Inactive,
    /// An internal invariant was violated.
    Fatal,
}

impl TickStatus {
    /// Integer code returned across the host boundary.
    pub const fn code(self) -> i32 {
        match self {
            Self::Nominal => 0,
            Self::Underrun => 1,
            Self::Inactive => 2,
            Self::Fatal => -1,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Nominal),
            1 => Some(Self::Underrun),
            2 => Some(Self::Inactive),
            -1 => Some(Self::Fatal),
            _ => None,
        }
    }

    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Combine two statuses, keeping the more severe one.
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        if self.severity() >= other.severity() {
            self
        } else {
            other
        }
    }

    const fn severity(self) -> u8 {
        match self {
            Self::Nominal => 0,
            Self::Inactive => 1,
            Self::Underrun => 2,
            Self::Fatal => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip_through_u8() {
        for state in [
            EngineState::Uninitialized,
            EngineState::Created,
            EngineState::Running,
            EngineState::Paused,
            EngineState::Terminated,
        ] {
            assert_eq!(EngineState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_accepts_control() {
        assert!(EngineState::Running.accepts_control());
        assert!(EngineState::Created.accepts_control());
        assert!(!EngineState::Terminated.accepts_control());
        assert!(!EngineState::Uninitialized.accepts_control());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TickStatus::Nominal.code(), 0);
        assert_eq!(TickStatus::Underrun.code(), 1);
        assert_eq!(TickStatus::Fatal.code(), -1);
        assert_eq!(TickStatus::from_code(2), Some(TickStatus::Inactive));
        assert_eq!(TickStatus::from_code(5), None);
    }

    #[test]
    fn test_worst_status() {
        assert_eq!(
            TickStatus::Nominal.worst(TickStatus::Underrun),
            TickStatus::Underrun
        );
        assert_eq!(TickStatus::Fatal.worst(TickStatus::Underrun), TickStatus::Fatal);
    }
}
