//! Commands from the control thread to the processing thread.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use packmix_core::{Error, PackId, PlayerId, Result, SoundId};
use tracing::debug;

use crate::events::EngineStats;
use crate::pack::Pack;

/// Operations on a persistent player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerOp {
    /// Start or resume. A finished player restarts from the beginning.
    Play,
    Pause,
    SetGain(f32),
    SetLooping(bool),
    /// Move back to the start without changing play state.
    Rewind,
    /// Free the player's voice.
    Release,
}

#[derive(Debug)]
pub enum Command {
    Load(Arc<Pack>),
    Unload(PackId),
    Play {
        pack: PackId,
        sound: SoundId,
        gain: f32,
    },
    CreatePlayer {
        player: PlayerId,
        pack: PackId,
        sound: SoundId,
    },
    Player {
        player: PlayerId,
        op: PlayerOp,
    },
    Pause(bool),
    /// Scale the whole mix before clipping.
    SetMasterGain(f32),
    Terminate,
}

/// Producer side of the fixed-capacity command queue.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
    stats: Arc<EngineStats>,
}

impl CommandSender {
    /// Enqueue without blocking. A full queue rejects the new command.
    pub fn push(&self, command: Command) -> Result<()> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                self.stats.record_dropped_command();
                debug!("Command queue full, rejecting {:?}", command);
                Err(Error::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::InvalidState("processing side is gone"))
            }
        }
    }

}

/// Create the command queue.
pub fn command_queue(capacity: usize, stats: Arc<EngineStats>) -> (CommandSender, Receiver<Command>) {
    let (tx, rx) = bounded(capacity);
    (CommandSender { tx, stats }, rx)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    #[test]
    fn test_full_queue_rejects_newest() {
        let stats = Arc::new(EngineStats::default());
        let (tx, rx) = command_queue(2, Arc::clone(&stats));

        tx.push(Command::Pause(true)).unwrap();
        tx.push(Command::Pause(false)).unwrap();
        assert!(matches!(tx.push(Command::Terminate), Err(Error::QueueFull)));
        assert_eq!(stats.snapshot().dropped_commands, 1);

        assert!(matches!(rx.try_recv().unwrap(), Command::Pause(true)));
        assert!(matches!(rx.try_recv().unwrap(), Command::Pause(false)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_commands_arrive_in_order() {
        let stats = Arc::new(EngineStats::default());
        let (tx, rx) = command_queue(8, stats);
        for sound in 0..5 {
            tx.push(Command::Play {
                pack: PackId::new(0),
                sound: SoundId::new(sound),
                gain: 1.0,
            })
            .unwrap();
        }

        let order: Vec<u32> = rx
            .try_iter()
            .map(|c| match c {
                Command::Play { sound, .. } => sound.0,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }
}
