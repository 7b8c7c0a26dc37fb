//! Primitive-typed host bridge.
//!
//! Every call takes and returns plain integers, floats, booleans and strings
//! so it can sit directly behind a foreign-function boundary. Failures are
//! logged and reported as `false`, `-1` or a silent no-op; nothing here
//! returns an error or panics.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use packmix_audio::{AssetSource, Engine, NullSink, OutputSink, PackSource, PlayerOp};
use packmix_core::{PackId, PlayerId, SoundId, TickStatus};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;

/// Builds the output sink for each new engine.
pub type SinkFactory = Box<dyn Fn() -> Box<dyn OutputSink> + Send + Sync>;

static GLOBAL: OnceCell<HostBridge> = OnceCell::new();

/// One engine context as seen by a host.
pub struct HostBridge {
    config: HostConfig,
    sinks: SinkFactory,
    engine: Mutex<Option<Arc<Engine>>>,
}

impl HostBridge {
    /// A bridge whose engines discard their output.
    pub fn new(config: HostConfig) -> Self {
        Self::with_sink(config, Box::new(|| -> Box<dyn OutputSink> { Box::new(NullSink) }))
    }

    pub fn with_sink(config: HostConfig, sinks: SinkFactory) -> Self {
        Self {
            config,
            sinks,
            engine: Mutex::new(None),
        }
    }

    /// The process-wide bridge, created on first use with `config`.
    ///
    /// Later calls return the existing bridge and ignore `config`.
    pub fn install_global(config: HostConfig) -> &'static Self {
        GLOBAL.get_or_init(|| Self::new(config))
    }

    pub fn global() -> Option<&'static Self> {
        GLOBAL.get()
    }

    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The live engine, if `create` succeeded and `terminate` has not run.
    pub fn engine(&self) -> Option<Arc<Engine>> {
        self.engine.lock().clone()
    }

    /// Create the engine. Returns false if one already exists or creation fails.
    pub fn create(&self) -> bool {
        let mut slot = self.engine.lock();
        if slot.is_some() {
            warn!("create: engine already exists");
            return false;
        }
        match Engine::new(self.config.engine.clone(), (self.sinks)()) {
            Ok(engine) => {
                info!("Engine created");
                *slot = Some(Arc::new(engine));
                true
            }
            Err(e) => {
                error!("Failed to create engine: {e}");
                false
            }
        }
    }

    /// Run one tick. Returns the tick status code; `2` when there is no engine.
    pub fn proc(&self) -> i32 {
        self.engine()
            .map_or(TickStatus::Inactive, |engine| engine.tick())
            .code()
    }

    pub fn pause(&self, pause: bool) {
        self.with_engine("pause", |engine| engine.pause(pause));
    }

    /// Master volume applied to the whole mix.
    pub fn set_gain(&self, gain: f32) {
        self.with_engine("set_gain", |engine| engine.set_master_gain(gain));
    }

    /// Terminate and drop the engine. A later `create` starts a fresh one.
    pub fn terminate(&self) {
        let engine = self.engine.lock().take();
        if let Some(engine) = engine {
            engine.terminate();
            info!("Engine terminated");
        }
    }

    /// Load a pack file. Relative names resolve against the configured resource root.
    pub fn load_resource_pack(&self, pack_id: i32, filename: &str, stream: bool) -> bool {
        let source = PackSource::file(self.config.resolve(filename));
        self.load(pack_id, source, stream)
    }

    /// Load a pack from the host's bundled assets.
    pub fn load_resource_pack_from_asset(
        &self,
        assets: Arc<dyn AssetSource>,
        pack_id: i32,
        filename: &str,
        stream: bool,
    ) -> bool {
        self.load(pack_id, PackSource::asset(assets, filename), stream)
    }

    /// Fire a one-shot sound. Unknown ids and a full queue are logged and dropped.
    pub fn play(&self, pack_id: i32, sound_id: i32, volume: f32) {
        let (Some(pack), Some(sound)) = (self.pack_id(pack_id), SoundId::from_host(i64::from(sound_id)))
        else {
            debug!("play: invalid ids {}:{}", pack_id, sound_id);
            return;
        };
        if let Some(engine) = self.engine() {
            match engine.play(pack, sound, volume) {
                Ok(()) => {}
                Err(e) if e.is_retryable() => warn!("play {}:{} dropped: {e}", pack, sound),
                Err(e) => debug!("play {}:{} dropped: {e}", pack, sound),
            }
        }
    }

    /// Create a looping player and start it. Returns the player handle, or -1.
    pub fn create_user_player(&self, pack_id: i32, sound_id: i32) -> i64 {
        let (Some(pack), Some(sound)) = (self.pack_id(pack_id), SoundId::from_host(i64::from(sound_id)))
        else {
            debug!("create_user_player: invalid ids {}:{}", pack_id, sound_id);
            return -1;
        };
        let Some(engine) = self.engine() else {
            return -1;
        };

        let started = engine.create_player(pack, sound).and_then(|player| {
            engine.player_op(player, PlayerOp::SetLooping(true))?;
            engine.player_op(player, PlayerOp::Play)?;
            Ok(player)
        });
        match started {
            Ok(player) => i64::from(player.0),
            Err(e) => {
                warn!("create_user_player {}:{} failed: {e}", pack, sound);
                -1
            }
        }
    }

    pub fn destroy_user_player(&self, handle: i64) {
        self.player_op("destroy_user_player", handle, PlayerOp::Release);
    }

    pub fn user_player_play(&self, handle: i64) {
        self.player_op("user_player_play", handle, PlayerOp::Play);
    }

    pub fn user_player_pause(&self, handle: i64) {
        self.player_op("user_player_pause", handle, PlayerOp::Pause);
    }

    pub fn user_player_set_gain(&self, handle: i64, gain: f32) {
        self.player_op("user_player_set_gain", handle, PlayerOp::SetGain(gain));
    }

    pub fn user_player_set_looping(&self, handle: i64, looping: bool) {
        self.player_op("user_player_set_looping", handle, PlayerOp::SetLooping(looping));
    }

    fn load(&self, pack_id: i32, source: PackSource, stream: bool) -> bool {
        let Some(pack) = self.pack_id(pack_id) else {
            warn!(
                "load_resource_pack: pack id {} outside 0..{}",
                pack_id, self.config.engine.max_packs
            );
            return false;
        };
        let Some(engine) = self.engine() else {
            warn!("load_resource_pack: no engine");
            return false;
        };
        match engine.load(pack, source, stream) {
            Ok(()) => true,
            Err(e) if e.is_resource_error() => {
                error!("Failed to load pack {}: {e}", pack);
                false
            }
            Err(e) => {
                warn!("load_resource_pack {} refused: {e}", pack);
                false
            }
        }
    }

    fn player_op(&self, what: &str, handle: i64, op: PlayerOp) {
        let Some(player) = u32::try_from(handle).ok().map(PlayerId) else {
            debug!("{}: invalid handle {}", what, handle);
            return;
        };
        self.with_engine(what, |engine| engine.player_op(player, op));
    }

    fn with_engine(&self, what: &str, f: impl FnOnce(&Engine) -> packmix_core::Result<()>) {
        match self.engine() {
            Some(engine) => {
                if let Err(e) = f(&engine) {
                    debug!("{} ignored: {e}", what);
                }
            }
            None => debug!("{}: no engine", what),
        }
    }

    fn pack_id(&self, pack_id: i32) -> Option<PackId> {
        PackId::from_host(i64::from(pack_id), self.config.engine.max_packs)
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use packmix_audio::{CaptureSink, DirectoryAssets};
    use packmix_core::{EngineConfig, EngineState, PackBuilder};

    fn bridge() -> (HostBridge, CaptureSink) {
        let capture = CaptureSink::new();
        let handle = capture.handle();
        let config = HostConfig {
            engine: EngineConfig {
                channels: 1,
                block_frames: 4,
                max_packs: 2,
                max_players: 1,
                max_voices: 4,
                stream_ring_frames: 64,
                stream_low_watermark_frames: 16,
                ..EngineConfig::default()
            },
            ..HostConfig::default()
        };
        let bridge = HostBridge::with_sink(
            config,
            Box::new(move || -> Box<dyn OutputSink> { Box::new(handle.handle()) }),
        );
        (bridge, capture)
    }

    fn write_pack(dir: &std::path::Path, name: &str, samples: &[f32]) {
        let bytes = PackBuilder::new().pcm_f32(1, 1, 48_000, samples).build();
        std::fs::write(dir.join(name), &bytes).unwrap();
    }

    #[test]
    fn test_global_bridge_installed_once() {
        let first = HostBridge::install_global(HostConfig::default());
        let second = HostBridge::install_global(HostConfig {
            tick_period_us: 5000,
            ..HostConfig::default()
        });
        assert!(std::ptr::eq(first, second));
        assert!(std::ptr::eq(HostBridge::global().unwrap(), first));
        assert_eq!(second.config().tick_period_us, 1000);
        assert_eq!(first.proc(), 2);
    }

    #[test]
    fn test_calls_without_engine_are_harmless() {
        let (bridge, _capture) = bridge();
        assert_eq!(bridge.proc(), 2);
        bridge.pause(true);
        bridge.play(0, 1, 1.0);
        assert!(!bridge.load_resource_pack(0, "missing.pmx", false));
        assert_eq!(bridge.create_user_player(0, 1), -1);
        bridge.destroy_user_player(1);
        bridge.terminate();
    }

    #[test]
    fn test_create_twice_fails() {
        let (bridge, _capture) = bridge();
        assert!(bridge.create());
        assert!(!bridge.create());
        bridge.terminate();
        assert!(bridge.create());
    }

    #[test]
    fn test_play_through_bridge() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "sfx.pmx", &[0.5; 4]);
        let (bridge, capture) = bridge();
        assert!(bridge.create());

        let path = dir.path().join("sfx.pmx");
        assert!(bridge.load_resource_pack(0, path.to_str().unwrap(), false));
        assert!(!bridge.load_resource_pack(0, path.to_str().unwrap(), false));
        assert!(!bridge.load_resource_pack(7, path.to_str().unwrap(), false));
        assert!(!bridge.load_resource_pack(-1, path.to_str().unwrap(), false));

        bridge.play(0, 1, 0.5);
        bridge.play(0, 99, 1.0);
        bridge.play(0, -3, 1.0);
        assert_eq!(bridge.proc(), 0);
        assert_eq!(capture.samples(), vec![0.25; 4]);
        assert_eq!(bridge.engine().unwrap().state(), EngineState::Running);
    }

    #[test]
    fn test_user_player_loops_until_destroyed() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "loop.pmx", &[0.1, 0.2]);
        let (bridge, capture) = bridge();
        assert!(bridge.create());
        assert!(bridge.load_resource_pack_from_asset(
            Arc::new(DirectoryAssets::new(dir.path())),
            1,
            "loop.pmx",
            false
        ));

        let handle = bridge.create_user_player(1, 1);
        assert!(handle > 0);
        // Only one player is allowed.
        assert_eq!(bridge.create_user_player(1, 1), -1);

        bridge.proc();
        bridge.user_player_set_gain(handle, 2.0);
        bridge.proc();
        bridge.destroy_user_player(handle);
        bridge.proc();

        let out = capture.samples();
        let expected = [0.1, 0.2, 0.1, 0.2, 0.2, 0.4, 0.2, 0.4, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(out.len(), expected.len());
        for (a, e) in out.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6);
        }
        assert!(bridge.create_user_player(1, 1) > 0);
    }

    #[test]
    fn test_master_gain_through_bridge() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "sfx.pmx", &[0.4; 8]);
        let (bridge, capture) = bridge();
        bridge.set_gain(0.5);
        assert!(bridge.create());

        let path = dir.path().join("sfx.pmx");
        assert!(bridge.load_resource_pack(0, path.to_str().unwrap(), false));
        bridge.set_gain(2.0);
        bridge.play(0, 1, 1.0);
        bridge.play(0, 1, 1.0);
        bridge.proc();
        bridge.set_gain(0.5);
        bridge.proc();

        let out = capture.samples();
        assert_eq!(out.len(), 8);
        // 0.8 summed, doubled and clipped; then halved.
        assert!(out[..4].iter().all(|s| (s - 1.0).abs() < 1e-6), "{out:?}");
        assert!(out[4..].iter().all(|s| (s - 0.4).abs() < 1e-6), "{out:?}");
    }

    #[test]
    fn test_terminate_closes_engine() {
        let (bridge, capture) = bridge();
        assert!(bridge.create());
        let engine = bridge.engine().unwrap();
        bridge.terminate();

        assert!(bridge.engine().is_none());
        assert_eq!(engine.state(), EngineState::Terminated);
        assert!(capture.is_closed());
        assert_eq!(bridge.proc(), 2);
    }
}
