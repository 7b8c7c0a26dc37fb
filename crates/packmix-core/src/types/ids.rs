//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-assigned identifier of a loaded resource pack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackId(pub u16);

impl PackId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Convert a host-side integer, rejecting negatives and values past `max`.
    pub fn from_host(id: i64, max: usize) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .filter(|&i| i < max)
            .and_then(|i| u16::try_from(i).ok())
            .map(Self)
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local identifier of a sound entry within a pack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SoundId(pub u32);

impl SoundId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn from_host(id: i64) -> Option<Self> {
        u32::try_from(id).ok().map(Self)
    }
}

impl fmt::Display for SoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a persistent, caller-managed player.
///
/// Issued by the control thread at creation time so the caller can address
/// the player before the processing thread has allocated its voice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub u32);

impl PlayerId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

/// Slot in the voice pool plus the generation it was allocated under.
///
/// A stale id (whose slot has since been reused) never matches the live voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId {
    pub slot: u16,
    pub generation: u32,
}

impl VoiceId {
    pub const fn new(slot: u16, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub const fn slot(self) -> usize {
        self.slot as usize
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice#{}.{}", self.slot, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_id_from_host() {
        assert_eq!(PackId::from_host(3, 8), Some(PackId::new(3)));
        assert_eq!(PackId::from_host(8, 8), None);
        assert_eq!(PackId::from_host(-1, 8), None);
    }

    #[test]
    fn test_sound_id_from_host() {
        assert_eq!(SoundId::from_host(0), Some(SoundId::new(0)));
        assert_eq!(SoundId::from_host(-4), None);
    }

    #[test]
    fn test_voice_id_display() {
        assert_eq!(VoiceId::new(3, 9).to_string(), "voice#3.9");
    }
}
