//! The processing side: command application and block mixing.
//!
//! Everything here runs on the host's processing thread. Buffers are sized at
//! construction and the tick path never allocates; packs reach the processor
//! already decoded and are only ever released here while the control side
//! still holds a reference.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use packmix_core::{
    EngineConfig, EngineState, PackId, PlayerEndPolicy, PlayerId, SoundId, TickStatus, VoiceId,
};
use tracing::{debug, error, info, trace, warn};

use crate::command::{Command, PlayerOp};
use crate::events::{DropReason, EngineEvent, EngineStats, EventSender};
use crate::lifecycle::Lifecycle;
use crate::output::OutputSink;
use crate::pack::Pack;
use crate::stream::{DecodeRequest, StreamSlot};
use crate::voice::{
    sanitize_gain, Advance, Persistence, SampleSource, Voice, VoicePool, VoiceSpec, VoiceState,
};

/// What happened to one voice during a block.
enum MixOutcome {
    Continue,
    Ended,
    /// The voice's ring ran dry. `started` is set on the first starved block.
    Underrun { started: bool },
    Fatal(&'static str),
}

pub(crate) struct Processor {
    config: EngineConfig,
    commands: Receiver<Command>,
    /// Indexed by pack id.
    packs: Vec<Option<Arc<Pack>>>,
    voices: VoicePool,
    mix: Vec<f32>,
    scratch: Vec<f32>,
    sink: Box<dyn OutputSink>,
    streams: Arc<[StreamSlot]>,
    decode: Sender<DecodeRequest>,
    events: EventSender,
    stats: Arc<EngineStats>,
    lifecycle: Arc<Lifecycle>,
    released_players: Sender<PlayerId>,
    master_gain: f32,
    /// A pause received before the first pack was installed.
    pause_requested: bool,
    next_epoch: u32,
    closed: bool,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: EngineConfig,
        commands: Receiver<Command>,
        sink: Box<dyn OutputSink>,
        streams: Arc<[StreamSlot]>,
        decode: Sender<DecodeRequest>,
        events: EventSender,
        stats: Arc<EngineStats>,
        lifecycle: Arc<Lifecycle>,
        released_players: Sender<PlayerId>,
    ) -> Self {
        let block = config.block_samples();
        Self {
            packs: (0..config.max_packs).map(|_| None).collect(),
            voices: VoicePool::new(config.max_voices),
            mix: vec![0.0; block],
            scratch: vec![0.0; block],
            config,
            commands,
            sink,
            streams,
            decode,
            events,
            stats,
            lifecycle,
            released_players,
            master_gain: 1.0,
            pause_requested: false,
            next_epoch: 0,
            closed: false,
        }
    }

    /// Run one processing step.
    pub(crate) fn tick(&mut self) -> TickStatus {
        if self.closed || self.lifecycle.is_terminated() {
            return TickStatus::Inactive;
        }

        self.drain_commands();
        if self.lifecycle.is_terminated() {
            return TickStatus::Inactive;
        }

        self.mix.fill(0.0);
        let mut status = TickStatus::Nominal;
        if self.lifecycle.get() != EngineState::Paused {
            status = self.render();
            if status.is_fatal() {
                return status;
            }
            self.reclaim_finished();
        }

        let master = self.master_gain;
        for sample in &mut self.mix {
            let scaled = *sample * master;
            *sample = if scaled.is_nan() {
                0.0
            } else {
                scaled.clamp(-1.0, 1.0)
            };
        }

        if let Err(e) = self.sink.write(&self.mix) {
            error!("Output sink failed: {e}");
            return TickStatus::Fatal;
        }

        self.stats
            .record_tick(status == TickStatus::Underrun, self.voices.active_count());
        status
    }

    /// Release everything. Called once, under the processor lock, by terminate.
    pub(crate) fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        let discarded = self.discard_commands();
        self.voices.clear();
        self.packs.iter_mut().for_each(|pack| *pack = None);
        self.sink.close();
        self.closed = true;
        self.stats.set_active_voices(0);
        self.events
            .emit(EngineEvent::StateChanged(EngineState::Terminated));
        info!("Processor shut down, {} queued commands discarded", discarded);
    }

    /// Drop everything still queued. Returns how many commands were dropped.
    pub(crate) fn discard_commands(&mut self) -> usize {
        self.commands.try_iter().count()
    }

    fn drain_commands(&mut self) {
        for _ in 0..self.config.command_capacity {
            let Ok(command) = self.commands.try_recv() else {
                break;
            };
            if matches!(command, Command::Terminate) {
                debug!("Terminate reached the processor, ignoring the rest of the queue");
                break;
            }
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Load(pack) => self.install(pack),
            Command::Unload(id) => {
                if let Some(slot) = self.packs.get_mut(id.index()) {
                    if slot.take().is_some() {
                        debug!("Pack {} unloaded", id);
                        self.events.emit(EngineEvent::PackUnloaded(id));
                    }
                }
            }
            Command::Play { pack, sound, gain } => self.play(pack, sound, gain),
            Command::CreatePlayer {
                player,
                pack,
                sound,
            } => self.create_player(player, pack, sound),
            Command::Player { player, op } => self.player_op(player, op),
            Command::Pause(paused) => self.set_paused(paused),
            Command::SetMasterGain(gain) => {
                self.master_gain = sanitize_gain(gain);
                debug!("Master gain {}", self.master_gain);
            }
            Command::Terminate => {}
        }
    }

    fn install(&mut self, pack: Arc<Pack>) {
        let id = pack.id();
        let Some(slot) = self.packs.get_mut(id.index()) else {
            error!("Pack id {} outside the pack table", id);
            return;
        };
        let replaced = slot.replace(pack).is_some();
        debug!("Pack {} installed{}", id, if replaced { " (replaced)" } else { "" });
        self.events.emit(EngineEvent::PackInstalled(id));

        if self.lifecycle.get() == EngineState::Created {
            let next = if self.pause_requested {
                EngineState::Paused
            } else {
                EngineState::Running
            };
            if self.lifecycle.transition(EngineState::Created, next) {
                info!("Engine {}", next);
                self.events.emit(EngineEvent::StateChanged(next));
            }
        }
    }

    fn set_paused(&mut self, paused: bool) {
        let (from, to) = match (self.lifecycle.get(), paused) {
            (EngineState::Created, _) => {
                self.pause_requested = paused;
                return;
            }
            (EngineState::Running, true) => (EngineState::Running, EngineState::Paused),
            (EngineState::Paused, false) => (EngineState::Paused, EngineState::Running),
            _ => return,
        };
        if self.lifecycle.transition(from, to) {
            debug!("Engine {} -> {}", from, to);
            self.events.emit(EngineEvent::StateChanged(to));
        }
    }

    fn play(&mut self, pack: PackId, sound: SoundId, gain: f32) {
        match self.start_voice(pack, sound, Persistence::Transient, gain, VoiceState::Playing) {
            Ok(voice) => {
                trace!("Started {} for pack {} sound {}", voice, pack, sound);
                self.events
                    .emit(EngineEvent::VoiceStarted { voice, pack, sound });
            }
            Err(reason) => {
                debug!("Dropped play of pack {} sound {}: {:?}", pack, sound, reason);
                self.events
                    .emit(EngineEvent::PlayDropped { pack, sound, reason });
            }
        }
    }

    fn create_player(&mut self, player: PlayerId, pack: PackId, sound: SoundId) {
        match self.start_voice(pack, sound, Persistence::Player(player), 1.0, VoiceState::Idle) {
            Ok(voice) => {
                debug!("Created {} on {}", player, voice);
                self.events
                    .emit(EngineEvent::PlayerCreated { player, voice });
            }
            Err(reason) => {
                warn!("Failed to create {}: {:?}", player, reason);
                self.events
                    .emit(EngineEvent::PlayerFailed { player, reason });
                let _ = self.released_players.try_send(player);
            }
        }
    }

    fn player_op(&mut self, player: PlayerId, op: PlayerOp) {
        let Some(id) = self.voices.find_player(player) else {
            debug!("{:?} for unknown {}", op, player);
            return;
        };

        match op {
            PlayerOp::Release => {
                self.release_voice(id);
                debug!("Released {}", player);
            }
            PlayerOp::Play => {
                let finished = self
                    .voices
                    .get(id)
                    .is_some_and(|v| v.state == VoiceState::Finished);
                if finished && !self.restart(id) {
                    return;
                }
                if let Some(voice) = self.voices.get_mut(id) {
                    if voice.state != VoiceState::Playing {
                        voice.state = VoiceState::Playing;
                        let (pack, sound) = (voice.pack.id(), voice.sound);
                        self.events
                            .emit(EngineEvent::VoiceStarted { voice: id, pack, sound });
                    }
                }
            }
            PlayerOp::Pause => {
                if let Some(voice) = self.voices.get_mut(id) {
                    if voice.state == VoiceState::Playing {
                        voice.state = VoiceState::Paused;
                    }
                }
            }
            PlayerOp::SetGain(gain) => {
                if let Some(voice) = self.voices.get_mut(id) {
                    voice.gain = sanitize_gain(gain);
                }
            }
            PlayerOp::SetLooping(looping) => {
                if let Some(voice) = self.voices.get_mut(id) {
                    voice.looping = looping;
                    if let SampleSource::Streaming { epoch, .. } = voice.source {
                        let request = DecodeRequest::SetLooping {
                            slot: id.slot(),
                            epoch,
                            looping,
                        };
                        if self.decode.try_send(request).is_err() {
                            warn!("Decode queue full, looping change for {} not forwarded", id);
                        }
                    }
                }
            }
            PlayerOp::Rewind => {
                if self.restart(id) {
                    if let Some(voice) = self.voices.get_mut(id) {
                        if voice.state == VoiceState::Finished {
                            voice.state = VoiceState::Idle;
                        }
                    }
                }
            }
        }
    }

    /// Allocate and, for streamed packs, start feeding a voice.
    fn start_voice(
        &mut self,
        pack_id: PackId,
        sound: SoundId,
        persistence: Persistence,
        gain: f32,
        state: VoiceState,
    ) -> Result<VoiceId, DropReason> {
        let pack = self
            .packs
            .get(pack_id.index())
            .and_then(Option::as_ref)
            .ok_or(DropReason::UnknownPack)?;
        let entry = pack.entry_index(sound).ok_or(DropReason::UnknownSound)?;
        let pack = Arc::clone(pack);

        let streaming = pack.is_streaming();
        let source = if streaming {
            SampleSource::Streaming {
                epoch: self.next_epoch(),
                underrun: false,
                refill_requested: false,
            }
        } else {
            SampleSource::Resident
        };

        let (id, evicted) = self
            .voices
            .allocate(VoiceSpec {
                pack: Arc::clone(&pack),
                entry,
                sound,
                persistence,
                source,
                gain,
                looping: false,
                state,
            })
            .ok_or(DropReason::VoicePoolExhausted)?;

        if let Some(evicted) = evicted {
            trace!("Evicted finished {}", evicted.id);
            self.stop_stream(&evicted);
        }

        if let SampleSource::Streaming { epoch, .. } = source {
            let request = DecodeRequest::Start {
                slot: id.slot(),
                epoch,
                pack,
                entry,
                looping: false,
            };
            if self.decode.try_send(request).is_err() {
                self.voices.release(id);
                return Err(DropReason::DecoderBusy);
            }
        }

        Ok(id)
    }

    /// Rewind a voice to its first frame. Streamed voices get a new decode session.
    fn restart(&mut self, id: VoiceId) -> bool {
        let epoch = self.next_epoch();
        let Some(voice) = self.voices.get_mut(id) else {
            return false;
        };
        voice.cursor = 0;

        if matches!(voice.source, SampleSource::Streaming { .. }) {
            voice.source = SampleSource::Streaming {
                epoch,
                underrun: false,
                refill_requested: false,
            };
            let request = DecodeRequest::Start {
                slot: id.slot(),
                epoch,
                pack: Arc::clone(&voice.pack),
                entry: voice.entry,
                looping: voice.looping,
            };
            if self.decode.try_send(request).is_err() {
                warn!("Decode queue full, could not restart {}", id);
                voice.state = VoiceState::Finished;
                return false;
            }
        }
        true
    }

    fn next_epoch(&mut self) -> u32 {
        self.next_epoch = self.next_epoch.wrapping_add(1).max(1);
        self.next_epoch
    }

    fn stop_stream(&self, voice: &Voice) {
        if matches!(voice.source, SampleSource::Streaming { .. }) {
            let _ = self.decode.try_send(DecodeRequest::Stop {
                slot: voice.id.slot(),
            });
        }
    }

    fn release_voice(&mut self, id: VoiceId) {
        if let Some(voice) = self.voices.release(id) {
            self.stop_stream(&voice);
            if let Some(player) = voice.player() {
                let _ = self.released_players.try_send(player);
            }
        }
    }

    fn render(&mut self) -> TickStatus {
        let frames = self.config.block_frames;
        let channels = usize::from(self.config.channels);
        let watermark = self.config.stream_low_watermark_frames * channels;
        let mut status = TickStatus::Nominal;

        for slot in 0..self.voices.capacity() {
            let Some(voice) = self.voices.slot_mut(slot) else {
                continue;
            };
            if voice.state != VoiceState::Playing {
                continue;
            }
            let id = voice.id;

            let outcome = match voice.source {
                SampleSource::Resident => mix_resident(voice, &mut self.mix, frames, channels),
                SampleSource::Streaming { .. } => match self.streams.get(slot) {
                    Some(stream) => mix_stream(
                        voice,
                        stream,
                        &mut self.mix,
                        &mut self.scratch,
                        channels,
                        watermark,
                        &self.decode,
                    ),
                    None => MixOutcome::Fatal("voice slot has no stream ring"),
                },
            };

            match outcome {
                MixOutcome::Continue => {}
                MixOutcome::Ended => self.finish_voice(id),
                MixOutcome::Underrun { started } => {
                    status = status.worst(TickStatus::Underrun);
                    if started {
                        warn!("Stream underrun on {}", id);
                        self.events.emit(EngineEvent::StreamUnderrun(id));
                    }
                }
                MixOutcome::Fatal(reason) => {
                    error!("Fatal mixer error on {}: {}", id, reason);
                    return TickStatus::Fatal;
                }
            }
        }

        status
    }

    fn finish_voice(&mut self, id: VoiceId) {
        let Some(voice) = self.voices.get_mut(id) else {
            return;
        };
        match voice.persistence {
            Persistence::Transient => {
                voice.state = VoiceState::Finished;
                self.events.emit(EngineEvent::VoiceFinished(id));
            }
            Persistence::Player(player) => {
                self.events.emit(EngineEvent::PlayerFinished(player));
                match self.config.player_end_policy {
                    PlayerEndPolicy::Hold => voice.state = VoiceState::Finished,
                    PlayerEndPolicy::Release => self.release_voice(id),
                }
            }
        }
    }

    fn reclaim_finished(&mut self) {
        for slot in 0..self.voices.capacity() {
            let finished = self
                .voices
                .slot_mut(slot)
                .filter(|v| v.is_transient() && v.state == VoiceState::Finished)
                .map(|v| v.id);
            if let Some(id) = finished {
                self.release_voice(id);
            }
        }
    }
}

fn mix_resident(voice: &mut Voice, mix: &mut [f32], frames: usize, channels: usize) -> MixOutcome {
    let Some(sound) = voice.pack.resident(voice.entry) else {
        return MixOutcome::Fatal("resident voice on a pack without decoded audio");
    };
    let data = sound.samples();
    let total = sound.frames();
    let gain = voice.gain;

    let mut cursor = usize::try_from(voice.cursor).map_or(total, |c| c.min(total));
    let mut written = 0;
    while written < frames {
        if cursor >= total {
            if voice.looping && total > 0 {
                cursor = 0;
            } else {
                break;
            }
        }
        let n = (frames - written).min(total - cursor);
        let src = &data[cursor * channels..(cursor + n) * channels];
        let dst = &mut mix[written * channels..(written + n) * channels];
        for (out, sample) in dst.iter_mut().zip(src) {
            *out += sample * gain;
        }
        written += n;
        cursor += n;
    }

    match voice.advance(written as u64, Some(total as u64)) {
        Advance::Continue => MixOutcome::Continue,
        Advance::Ended => MixOutcome::Ended,
    }
}

fn mix_stream(
    voice: &mut Voice,
    stream: &StreamSlot,
    mix: &mut [f32],
    scratch: &mut [f32],
    channels: usize,
    watermark: usize,
    decode: &Sender<DecodeRequest>,
) -> MixOutcome {
    let SampleSource::Streaming {
        epoch,
        mut underrun,
        mut refill_requested,
    } = voice.source
    else {
        return MixOutcome::Fatal("streamed mix on a resident voice");
    };

    // Not primed yet: silence, no underrun.
    if !stream.is_ready(epoch) {
        return MixOutcome::Continue;
    }

    let exhausted = stream.is_exhausted(epoch);
    let want = scratch.len();
    let got = stream.ring().read(&mut scratch[..want]);
    for (out, sample) in mix[..got].iter_mut().zip(&scratch[..got]) {
        *out += sample * voice.gain;
    }
    voice.advance((got / channels) as u64, None);

    let outcome = if got < want {
        if exhausted {
            MixOutcome::Ended
        } else {
            let started = !underrun;
            underrun = true;
            MixOutcome::Underrun { started }
        }
    } else {
        if underrun {
            debug!("{} recovered from underrun", voice.id);
        }
        underrun = false;
        MixOutcome::Continue
    };

    if !exhausted {
        if stream.ring().available() < watermark {
            if !refill_requested && decode.try_send(DecodeRequest::Refill).is_ok() {
                refill_requested = true;
            }
        } else {
            refill_requested = false;
        }
    }

    voice.source = SampleSource::Streaming {
        epoch,
        underrun,
        refill_requested,
    };
    outcome
}
