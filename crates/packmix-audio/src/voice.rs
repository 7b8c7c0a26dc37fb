//! Fixed-capacity voice pool.

use std::sync::Arc;

use packmix_core::{PlayerId, SoundId, VoiceId};

use crate::pack::Pack;

/// Gain ceiling applied to caller-supplied gains.
pub const MAX_GAIN: f32 = 8.0;

/// Clamp a caller gain to `0.0..=MAX_GAIN`. NaN becomes silence.
pub fn sanitize_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, MAX_GAIN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Allocated but not started.
    Idle,
    Playing,
    Paused,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Fire-and-forget; reclaimed when finished.
    Transient,
    Player(PlayerId),
}

/// Where a voice pulls its samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSource {
    Resident,
    Streaming {
        /// Identifies the decode session feeding this voice's ring.
        epoch: u32,
        /// Set while the voice is starved, so the transition is logged once.
        underrun: bool,
        refill_requested: bool,
    },
}

/// Result of moving a voice's cursor forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Continue,
    /// A non-looping voice reached the end of its data.
    Ended,
}

#[derive(Debug)]
pub struct Voice {
    pub id: VoiceId,
    pub pack: Arc<Pack>,
    pub entry: usize,
    pub sound: SoundId,
    pub state: VoiceState,
    pub gain: f32,
    /// Frames consumed since the voice (or its last rewind) started.
    pub cursor: u64,
    pub persistence: Persistence,
    pub looping: bool,
    pub source: SampleSource,
    /// Start order, used to pick eviction victims.
    pub sequence: u64,
}

impl Voice {
    pub const fn is_transient(&self) -> bool {
        matches!(self.persistence, Persistence::Transient)
    }

    pub const fn player(&self) -> Option<PlayerId> {
        match self.persistence {
            Persistence::Player(id) => Some(id),
            Persistence::Transient => None,
        }
    }

    /// Move the cursor by `frames`.
    ///
    /// With a known `total`, looping voices wrap and other voices end once the
    /// cursor reaches it. Without one (streamed data) only the cursor moves.
    pub fn advance(&mut self, frames: u64, total: Option<u64>) -> Advance {
        self.cursor += frames;
        let Some(total) = total else {
            return Advance::Continue;
        };

        if self.cursor < total {
            Advance::Continue
        } else if self.looping && total > 0 {
            self.cursor %= total;
            Advance::Continue
        } else {
            self.cursor = total;
            Advance::Ended
        }
    }
}

/// What a voice needs at allocation time.
#[derive(Debug)]
pub struct VoiceSpec {
    pub pack: Arc<Pack>,
    pub entry: usize,
    pub sound: SoundId,
    pub persistence: Persistence,
    pub source: SampleSource,
    pub gain: f32,
    pub looping: bool,
    pub state: VoiceState,
}

/// Pool of voice slots sized once at engine creation.
#[derive(Debug)]
pub struct VoicePool {
    slots: Vec<Option<Voice>>,
    generations: Vec<u32>,
    next_sequence: u64,
}

impl VoicePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            generations: vec![0; capacity],
            next_sequence: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Take a free slot, or evict the oldest finished transient voice.
    ///
    /// Returns the new id and the evicted voice, if any.
    pub fn allocate(&mut self, spec: VoiceSpec) -> Option<(VoiceId, Option<Voice>)> {
        let slot = self.slots.iter().position(Option::is_none).or_else(|| {
            self.slots
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.as_ref().map(|v| (i, v)))
                .filter(|(_, v)| v.is_transient() && v.state == VoiceState::Finished)
                .min_by_key(|(_, v)| v.sequence)
                .map(|(i, _)| i)
        })?;

        let generation = self.generations[slot].wrapping_add(1);
        self.generations[slot] = generation;
        #[allow(clippy::cast_possible_truncation)]
        let id = VoiceId::new(slot as u16, generation);

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let voice = Voice {
            id,
            pack: spec.pack,
            entry: spec.entry,
            sound: spec.sound,
            state: spec.state,
            gain: sanitize_gain(spec.gain),
            cursor: 0,
            persistence: spec.persistence,
            looping: spec.looping,
            source: spec.source,
            sequence,
        };
        let evicted = self.slots[slot].replace(voice);
        Some((id, evicted))
    }

    /// Free a voice. Stale ids are ignored.
    pub fn release(&mut self, id: VoiceId) -> Option<Voice> {
        let slot = self.slots.get_mut(id.slot())?;
        if slot.as_ref().is_some_and(|v| v.id == id) {
            slot.take()
        } else {
            None
        }
    }

    pub fn get(&self, id: VoiceId) -> Option<&Voice> {
        self.slots
            .get(id.slot())
            .and_then(Option::as_ref)
            .filter(|v| v.id == id)
    }

    pub fn get_mut(&mut self, id: VoiceId) -> Option<&mut Voice> {
        self.slots
            .get_mut(id.slot())
            .and_then(Option::as_mut)
            .filter(|v| v.id == id)
    }

    pub fn find_player(&self, player: PlayerId) -> Option<VoiceId> {
        self.iter()
            .find(|v| v.player() == Some(player))
            .map(|v| v.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Raw slot access for the mixer's index loop.
    pub fn slot_mut(&mut self, slot: usize) -> Option<&mut Voice> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Free every slot.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::source::PackSource;
    use packmix_core::{EngineConfig, PackBuilder, PackId};

    fn pack() -> Arc<Pack> {
        let bytes = PackBuilder::new().pcm_s16(0, 1, 48_000, &[1, 2, 3, 4]).build();
        Arc::new(
            Pack::load(
                PackId::new(0),
                PackSource::Memory(bytes),
                false,
                &EngineConfig::default(),
            )
            .unwrap(),
        )
    }

    fn spec(pack: &Arc<Pack>, persistence: Persistence) -> VoiceSpec {
        VoiceSpec {
            pack: Arc::clone(pack),
            entry: 0,
            sound: SoundId::new(0),
            persistence,
            source: SampleSource::Resident,
            gain: 1.0,
            looping: false,
            state: VoiceState::Playing,
        }
    }

    #[test]
    fn test_gain_sanitizing() {
        assert!(sanitize_gain(f32::NAN).abs() < f32::EPSILON);
        assert!(sanitize_gain(-2.0).abs() < f32::EPSILON);
        assert!((sanitize_gain(0.5) - 0.5).abs() < f32::EPSILON);
        assert!((sanitize_gain(f32::INFINITY) - MAX_GAIN).abs() < f32::EPSILON);
    }

    #[test]
    fn test_allocate_until_full() {
        let pack = pack();
        let mut pool = VoicePool::new(2);

        let (a, _) = pool.allocate(spec(&pack, Persistence::Transient)).unwrap();
        let (b, _) = pool.allocate(spec(&pack, Persistence::Transient)).unwrap();
        assert_ne!(a.slot, b.slot);
        assert_eq!(pool.active_count(), 2);
        assert!(pool.allocate(spec(&pack, Persistence::Transient)).is_none());
    }

    #[test]
    fn test_evicts_oldest_finished_transient() {
        let pack = pack();
        let mut pool = VoicePool::new(3);

        let (first, _) = pool.allocate(spec(&pack, Persistence::Transient)).unwrap();
        let (second, _) = pool.allocate(spec(&pack, Persistence::Transient)).unwrap();
        let (player, _) = pool
            .allocate(spec(&pack, Persistence::Player(PlayerId::new(1))))
            .unwrap();

        pool.get_mut(second).unwrap().state = VoiceState::Finished;
        pool.get_mut(first).unwrap().state = VoiceState::Finished;
        pool.get_mut(player).unwrap().state = VoiceState::Finished;

        let (replacement, evicted) = pool.allocate(spec(&pack, Persistence::Transient)).unwrap();
        assert_eq!(evicted.unwrap().id, first);
        assert_eq!(replacement.slot, first.slot);
        assert_ne!(replacement.generation, first.generation);
    }

    #[test]
    fn test_players_are_never_evicted() {
        let pack = pack();
        let mut pool = VoicePool::new(1);
        let (player, _) = pool
            .allocate(spec(&pack, Persistence::Player(PlayerId::new(9))))
            .unwrap();
        pool.get_mut(player).unwrap().state = VoiceState::Finished;

        assert!(pool.allocate(spec(&pack, Persistence::Transient)).is_none());
        assert_eq!(pool.find_player(PlayerId::new(9)), Some(player));
    }

    #[test]
    fn test_stale_ids_are_ignored() {
        let pack = pack();
        let mut pool = VoicePool::new(1);

        let (old, _) = pool.allocate(spec(&pack, Persistence::Transient)).unwrap();
        assert!(pool.release(old).is_some());
        let (new, _) = pool.allocate(spec(&pack, Persistence::Transient)).unwrap();

        assert!(pool.get(old).is_none());
        assert!(pool.release(old).is_none());
        assert!(pool.get(new).is_some());
    }

    #[test]
    fn test_advance() {
        let pack = pack();
        let mut pool = VoicePool::new(1);
        let (id, _) = pool.allocate(spec(&pack, Persistence::Transient)).unwrap();
        let voice = pool.get_mut(id).unwrap();

        assert_eq!(voice.advance(3, Some(4)), Advance::Continue);
        assert_eq!(voice.advance(3, Some(4)), Advance::Ended);
        assert_eq!(voice.cursor, 4);

        voice.looping = true;
        voice.cursor = 3;
        assert_eq!(voice.advance(3, Some(4)), Advance::Continue);
        assert_eq!(voice.cursor, 2);

        assert_eq!(voice.advance(100, None), Advance::Continue);
        assert_eq!(voice.cursor, 102);
    }
}
