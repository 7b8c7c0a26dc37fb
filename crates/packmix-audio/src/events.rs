//! Notifications and counters published by the processing thread.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use packmix_core::{EngineState, PackId, PlayerId, SoundId, VoiceId};

/// Why a play or player creation was dropped on the processing thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownPack,
    UnknownSound,
    VoicePoolExhausted,
    /// The stream decoder's request queue was full.
    DecoderBusy,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    /// A load was applied and the pack is now playable.
    PackInstalled(PackId),
    PackUnloaded(PackId),
    VoiceStarted {
        voice: VoiceId,
        pack: PackId,
        sound: SoundId,
    },
    /// A transient voice reached the end of its sound.
    VoiceFinished(VoiceId),
    PlayDropped {
        pack: PackId,
        sound: SoundId,
        reason: DropReason,
    },
    PlayerCreated {
        player: PlayerId,
        voice: VoiceId,
    },
    PlayerFailed {
        player: PlayerId,
        reason: DropReason,
    },
    /// A non-looping player reached the end of its sound.
    PlayerFinished(PlayerId),
    StreamUnderrun(VoiceId),
    StateChanged(EngineState),
}

/// Counters readable from any thread.
#[derive(Debug, Default)]
pub struct EngineStats {
    ticks: AtomicU64,
    underrun_ticks: AtomicU64,
    active_voices: AtomicUsize,
    dropped_commands: AtomicU64,
    dropped_events: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub underrun_ticks: u64,
    pub active_voices: usize,
    pub dropped_commands: u64,
    pub dropped_events: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            underrun_ticks: self.underrun_ticks.load(Ordering::Relaxed),
            active_voices: self.active_voices.load(Ordering::Relaxed),
            dropped_commands: self.dropped_commands.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_tick(&self, underrun: bool, active_voices: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if underrun {
            self.underrun_ticks.fetch_add(1, Ordering::Relaxed);
        }
        self.active_voices.store(active_voices, Ordering::Relaxed);
    }

    pub(crate) fn set_active_voices(&self, active_voices: usize) {
        self.active_voices.store(active_voices, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_command(&self) {
        self.dropped_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_event(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Non-blocking event publisher. Events that do not fit are counted and dropped.
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: Sender<EngineEvent>,
    stats: Arc<EngineStats>,
}

impl EventSender {
    pub(crate) const fn new(tx: Sender<EngineEvent>, stats: Arc<EngineStats>) -> Self {
        Self { tx, stats }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => self.stats.record_dropped_event(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_full_channel_counts_dropped_events() {
        let stats = Arc::new(EngineStats::default());
        let (tx, rx) = bounded(1);
        let events = EventSender::new(tx, Arc::clone(&stats));

        events.emit(EngineEvent::PackInstalled(PackId::new(0)));
        events.emit(EngineEvent::PackInstalled(PackId::new(1)));

        assert_eq!(rx.len(), 1);
        assert_eq!(stats.snapshot().dropped_events, 1);
    }

    #[test]
    fn test_record_tick() {
        let stats = EngineStats::default();
        stats.record_tick(false, 3);
        stats.record_tick(true, 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.ticks, 2);
        assert_eq!(snapshot.underrun_ticks, 1);
        assert_eq!(snapshot.active_voices, 1);
    }
}
