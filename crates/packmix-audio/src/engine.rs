//! The engine: control surface plus the processing entry point.
//!
//! Control calls (`load`, `play`, player operations, `pause`) may come from any
//! thread. They validate what they can synchronously and then hand a
//! [`Command`] to the processing side through the bounded queue. `tick` is
//! meant to be called from a single processing thread.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver};
use packmix_core::{
    DuplicatePackPolicy, EngineConfig, EngineState, Error, PackId, PlayerId, Result, SoundId,
    TickStatus,
};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::command::{command_queue, Command, CommandSender, PlayerOp};
use crate::events::{EngineEvent, EngineStats, EventSender, StatsSnapshot};
use crate::lifecycle::Lifecycle;
use crate::mixer::Processor;
use crate::output::OutputSink;
use crate::pack::Pack;
use crate::source::PackSource;
use crate::stream::StreamDecoder;

/// Bookkeeping owned by the control side.
struct ControlState {
    /// Packs the processing side has been told about, indexed by pack id.
    packs: Vec<Option<Arc<Pack>>>,
    /// Replaced or unloaded packs, freed once nothing else references them.
    graveyard: Vec<Arc<Pack>>,
    players: HashSet<PlayerId>,
    next_player: u32,
}

impl ControlState {
    fn new(max_packs: usize) -> Self {
        Self {
            packs: (0..max_packs).map(|_| None).collect(),
            graveyard: Vec::new(),
            players: HashSet::new(),
            next_player: 1,
        }
    }

    fn pack(&self, id: PackId) -> Result<&Arc<Pack>> {
        self.packs
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(Error::UnknownPack(id))
    }

    fn sweep_graveyard(&mut self) {
        let before = self.graveyard.len();
        self.graveyard.retain(|pack| Arc::strong_count(pack) > 1);
        let freed = before - self.graveyard.len();
        if freed > 0 {
            debug!("Freed {} retired pack(s)", freed);
        }
    }
}

/// A mixing engine instance.
///
/// `Engine` is `Sync`; share it behind an `Arc` between the control thread(s)
/// and the thread that drives [`Engine::tick`].
pub struct Engine {
    config: EngineConfig,
    lifecycle: Arc<Lifecycle>,
    commands: CommandSender,
    events: Receiver<EngineEvent>,
    stats: Arc<EngineStats>,
    released_players: Receiver<PlayerId>,
    control: Mutex<ControlState>,
    processor: Mutex<Processor>,
    decoder: Mutex<Option<StreamDecoder>>,
}

impl Engine {
    /// Create an engine writing its mixed blocks to `sink`.
    ///
    /// The engine starts in [`EngineState::Created`] and moves to `Running`
    /// when the first pack is installed by a tick.
    pub fn new(config: EngineConfig, sink: Box<dyn OutputSink>) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(EngineStats::default());
        let lifecycle = Arc::new(Lifecycle::new(EngineState::Created));
        let (commands, command_rx) = command_queue(config.command_capacity, Arc::clone(&stats));
        let (event_tx, events) = bounded(config.event_capacity);
        let (released_tx, released_players) = bounded(config.max_players.max(1));
        let decoder = StreamDecoder::spawn(&config)?;

        let processor = Processor::new(
            config.clone(),
            command_rx,
            sink,
            decoder.slots(),
            decoder.sender(),
            EventSender::new(event_tx, Arc::clone(&stats)),
            Arc::clone(&stats),
            Arc::clone(&lifecycle),
            released_tx,
        );

        info!(
            "Engine created: {} Hz, {} channel(s), {} frames per block, {} voices",
            config.sample_rate, config.channels, config.block_frames, config.max_voices
        );

        Ok(Self {
            control: Mutex::new(ControlState::new(config.max_packs)),
            config,
            lifecycle,
            commands,
            events,
            stats,
            released_players,
            processor: Mutex::new(processor),
            decoder: Mutex::new(Some(decoder)),
        })
    }

    pub fn state(&self) -> EngineState {
        self.lifecycle.get()
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The event stream. Events that do not fit are dropped and counted.
    pub const fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    /// Whether `pack` is currently registered on the control side.
    pub fn is_loaded(&self, pack: PackId) -> bool {
        self.control.lock().pack(pack).is_ok()
    }

    /// Number of live player handles.
    pub fn player_count(&self) -> usize {
        let mut control = self.control.lock();
        self.sweep(&mut control);
        control.players.len()
    }

    /// Load a pack under `pack`.
    ///
    /// Validation and (for non-streaming packs) decoding happen on the calling
    /// thread; the processing side only swaps in the finished pack.
    pub fn load(&self, pack: PackId, source: PackSource, streaming: bool) -> Result<()> {
        self.ensure_accepting()?;
        if pack.index() >= self.config.max_packs {
            return Err(Error::InvalidPackId {
                id: i64::from(pack.0),
                max: self.config.max_packs,
            });
        }
        self.check_duplicate(&self.control.lock(), pack)?;

        let loaded = Arc::new(Pack::load(pack, source, streaming, &self.config)?);

        let mut control = self.control.lock();
        self.sweep(&mut control);
        // Another thread may have loaded the same id while we were decoding.
        self.check_duplicate(&control, pack)?;
        self.ensure_accepting()?;

        self.commands.push(Command::Load(Arc::clone(&loaded)))?;
        if let Some(previous) = control.packs[pack.index()].replace(loaded) {
            debug!("Pack {} replaced, old instance retired", pack);
            control.graveyard.push(previous);
        }
        Ok(())
    }

    /// Unload a pack. Voices already playing it run to their end.
    pub fn unload(&self, pack: PackId) -> Result<()> {
        self.ensure_accepting()?;
        let mut control = self.control.lock();
        self.sweep(&mut control);
        control.pack(pack)?;

        self.commands.push(Command::Unload(pack))?;
        if let Some(previous) = control.packs.get_mut(pack.index()).and_then(Option::take) {
            control.graveyard.push(previous);
        }
        Ok(())
    }

    /// Start a one-shot voice.
    ///
    /// Fails if the pack or sound is unknown; the engine is left untouched.
    pub fn play(&self, pack: PackId, sound: SoundId, gain: f32) -> Result<()> {
        self.ensure_accepting()?;
        {
            let mut control = self.control.lock();
            self.sweep(&mut control);
            check_sound(&control, pack, sound)?;
        }
        trace!("play {}:{} gain {}", pack, sound, gain);
        self.commands.push(Command::Play { pack, sound, gain })
    }

    /// Create a persistent player for `sound`. The player starts idle.
    pub fn create_player(&self, pack: PackId, sound: SoundId) -> Result<PlayerId> {
        self.ensure_accepting()?;
        let mut control = self.control.lock();
        self.sweep(&mut control);
        check_sound(&control, pack, sound)?;
        if control.players.len() >= self.config.max_players {
            return Err(Error::PlayerLimit(self.config.max_players));
        }

        let player = PlayerId(control.next_player);
        self.commands.push(Command::CreatePlayer {
            player,
            pack,
            sound,
        })?;
        control.next_player = control.next_player.wrapping_add(1).max(1);
        control.players.insert(player);
        debug!("Created {} for {}:{}", player, pack, sound);
        Ok(player)
    }

    /// Apply `op` to a player. `Release` frees the handle immediately.
    pub fn player_op(&self, player: PlayerId, op: PlayerOp) -> Result<()> {
        self.ensure_accepting()?;
        let mut control = self.control.lock();
        self.sweep(&mut control);
        if !control.players.contains(&player) {
            return Err(Error::UnknownPlayer(player));
        }

        self.commands.push(Command::Player { player, op })?;
        if op == PlayerOp::Release {
            control.players.remove(&player);
        }
        Ok(())
    }

    /// Pause or resume mixing. While paused ticks still apply commands and
    /// emit silence.
    pub fn pause(&self, paused: bool) -> Result<()> {
        self.ensure_accepting()?;
        self.commands.push(Command::Pause(paused))
    }

    /// Scale the whole mix by `gain` before clipping.
    ///
    /// Clamped like voice gains; NaN mutes.
    pub fn set_master_gain(&self, gain: f32) -> Result<()> {
        self.ensure_accepting()?;
        trace!("master gain {}", gain);
        self.commands.push(Command::SetMasterGain(gain))
    }

    /// Run one processing step and write one block to the sink.
    pub fn tick(&self) -> TickStatus {
        if self.lifecycle.is_terminated() {
            return TickStatus::Inactive;
        }
        match self.processor.try_lock() {
            Some(mut processor) => processor.tick(),
            None if self.lifecycle.is_terminated() => TickStatus::Inactive,
            None => {
                warn!("Concurrent tick skipped");
                TickStatus::Nominal
            }
        }
    }

    /// Stop (or resume) background decoding of streaming voices.
    ///
    /// Streaming voices underrun once their rings drain.
    pub fn suspend_stream_decoding(&self, suspended: bool) {
        if let Some(decoder) = self.decoder.lock().as_ref() {
            debug!("Stream decoding {}", if suspended { "suspended" } else { "resumed" });
            decoder.set_suspended(suspended);
        }
    }

    /// Shut the engine down.
    ///
    /// Waits for an in-flight tick, discards queued commands, releases every
    /// voice and pack, joins the decode worker and closes the sink. Calling it
    /// again is a no-op.
    pub fn terminate(&self) {
        let previous = self.lifecycle.terminate();
        if previous == EngineState::Terminated {
            return;
        }
        if let Err(e) = self.commands.push(Command::Terminate) {
            debug!("Terminate not queued ({e}), shutting down directly");
        }

        self.processor.lock().shutdown();
        if let Some(decoder) = self.decoder.lock().take() {
            decoder.shutdown();
        }

        let mut control = self.control.lock();
        // A load that got past its state check before the swap may have
        // queued after shutdown drained the queue.
        let late = self.processor.lock().discard_commands();
        if late > 0 {
            debug!("Discarded {} commands queued during shutdown", late);
        }
        control.packs.iter_mut().for_each(|pack| *pack = None);
        control.graveyard.clear();
        control.players.clear();
        while self.released_players.try_recv().is_ok() {}
        info!("Engine terminated (was {})", previous);
    }

    fn ensure_accepting(&self) -> Result<()> {
        let state = self.lifecycle.get();
        if state.accepts_control() {
            Ok(())
        } else {
            Err(Error::InvalidState(state.name()))
        }
    }

    fn check_duplicate(&self, control: &ControlState, pack: PackId) -> Result<()> {
        if control.pack(pack).is_ok() && self.config.duplicate_pack_policy == DuplicatePackPolicy::Reject {
            return Err(Error::DuplicatePack(pack));
        }
        Ok(())
    }

    fn sweep(&self, control: &mut ControlState) {
        for player in self.released_players.try_iter() {
            if control.players.remove(&player) {
                trace!("{} released by the processing side", player);
            }
        }
        control.sweep_graveyard();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn check_sound(control: &ControlState, pack: PackId, sound: SoundId) -> Result<()> {
    let loaded = control.pack(pack)?;
    if loaded.entry_index(sound).is_none() {
        return Err(Error::UnknownSound { pack, sound });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::output::{CaptureSink, NullSink};
    use packmix_core::PackBuilder;

    fn config() -> EngineConfig {
        EngineConfig {
            channels: 1,
            block_frames: 4,
            max_packs: 2,
            max_voices: 4,
            max_players: 2,
            stream_ring_frames: 64,
            stream_low_watermark_frames: 8,
            ..EngineConfig::default()
        }
    }

    fn pack_bytes(value: f32, frames: usize) -> PackSource {
        PackSource::Memory(
            PackBuilder::new()
                .pcm_f32(1, 1, 48_000, &vec![value; frames])
                .build(),
        )
    }

    #[test]
    fn test_engine_is_sync() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<Engine>();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            channels: 3,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::new(config, Box::new(NullSink)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_first_load_starts_engine() {
        let engine = Engine::new(config(), Box::new(NullSink)).unwrap();
        assert_eq!(engine.state(), EngineState::Created);

        engine.load(PackId::new(0), pack_bytes(0.5, 8), false).unwrap();
        assert_eq!(engine.state(), EngineState::Created);
        engine.tick();
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn test_pack_id_out_of_range() {
        let engine = Engine::new(config(), Box::new(NullSink)).unwrap();
        let err = engine.load(PackId::new(2), pack_bytes(0.5, 8), false).unwrap_err();
        assert!(matches!(err, Error::InvalidPackId { id: 2, max: 2 }));
    }

    #[test]
    fn test_player_limit_and_release() {
        let engine = Engine::new(config(), Box::new(NullSink)).unwrap();
        engine.load(PackId::new(0), pack_bytes(0.5, 8), false).unwrap();

        let a = engine.create_player(PackId::new(0), SoundId::new(1)).unwrap();
        let _b = engine.create_player(PackId::new(0), SoundId::new(1)).unwrap();
        assert!(matches!(
            engine.create_player(PackId::new(0), SoundId::new(1)),
            Err(Error::PlayerLimit(2))
        ));

        engine.player_op(a, PlayerOp::Release).unwrap();
        assert!(matches!(
            engine.player_op(a, PlayerOp::Play),
            Err(Error::UnknownPlayer(_))
        ));
        assert!(engine.create_player(PackId::new(0), SoundId::new(1)).is_ok());
    }

    #[test]
    fn test_unknown_sound_rejected() {
        let engine = Engine::new(config(), Box::new(NullSink)).unwrap();
        engine.load(PackId::new(0), pack_bytes(0.5, 8), false).unwrap();
        assert!(matches!(
            engine.play(PackId::new(0), SoundId::new(9), 1.0),
            Err(Error::UnknownSound { .. })
        ));
        assert!(matches!(
            engine.play(PackId::new(1), SoundId::new(1), 1.0),
            Err(Error::UnknownPack(_))
        ));
    }

    #[test]
    fn test_unloaded_pack_is_freed_after_processing_lets_go() {
        let engine = Engine::new(config(), Box::new(NullSink)).unwrap();
        engine.load(PackId::new(0), pack_bytes(0.5, 8), false).unwrap();
        engine.play(PackId::new(0), SoundId::new(1), 1.0).unwrap();
        engine.tick();

        engine.unload(PackId::new(0)).unwrap();
        assert!(!engine.is_loaded(PackId::new(0)));
        assert_eq!(engine.control.lock().graveyard.len(), 1);

        // The voice finishes its second block and drops its reference.
        engine.tick();
        engine.player_count();
        assert!(engine.control.lock().graveyard.is_empty());
    }

    #[test]
    fn test_terminate_closes_sink_and_rejects_control() {
        let capture = CaptureSink::new();
        let engine = Engine::new(config(), Box::new(capture.handle())).unwrap();
        engine.load(PackId::new(0), pack_bytes(0.5, 8), false).unwrap();
        engine.tick();

        engine.terminate();
        assert_eq!(engine.state(), EngineState::Terminated);
        assert!(capture.is_closed());
        assert_eq!(engine.tick(), TickStatus::Inactive);
        assert!(matches!(
            engine.play(PackId::new(0), SoundId::new(1), 1.0),
            Err(Error::InvalidState("terminated"))
        ));
        assert!(!engine.is_loaded(PackId::new(0)));

        engine.terminate();
        assert_eq!(engine.state(), EngineState::Terminated);
    }

    #[test]
    fn test_load_queued_after_shutdown_is_released_by_terminate() {
        let engine = Engine::new(config(), Box::new(NullSink)).unwrap();
        let pack = Arc::new(
            Pack::load(PackId::new(0), pack_bytes(0.5, 8), false, engine.config()).unwrap(),
        );

        // A load that slipped in after the processor drained its queue.
        engine.processor.lock().shutdown();
        engine.commands.push(Command::Load(Arc::clone(&pack))).unwrap();
        assert_eq!(Arc::strong_count(&pack), 2);

        engine.terminate();
        assert_eq!(Arc::strong_count(&pack), 1);
    }

    #[test]
    fn test_terminate_with_full_queue() {
        let capture = CaptureSink::new();
        let engine = Engine::new(config(), Box::new(capture.handle())).unwrap();
        while engine.pause(true).is_ok() {}
        assert!(engine.stats().dropped_commands > 0);

        engine.terminate();
        assert_eq!(engine.state(), EngineState::Terminated);
        assert!(capture.is_closed());
        assert_eq!(engine.processor.lock().discard_commands(), 0);
    }

    #[test]
    fn test_master_gain_after_terminate_rejected() {
        let engine = Engine::new(config(), Box::new(NullSink)).unwrap();
        engine.set_master_gain(0.5).unwrap();
        engine.terminate();
        assert!(matches!(
            engine.set_master_gain(1.0),
            Err(Error::InvalidState("terminated"))
        ));
    }
}
