//! Stream decoder: a worker thread that keeps per-voice rings topped up.
//!
//! Every voice slot owns one ring. The mixer only reads a ring once the worker
//! has published the voice's epoch as `ready`, so a ring can be reset and
//! refilled for a new voice without the mixer ever seeing stale samples.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use packmix_core::{EngineConfig, Error, Result};
use tracing::{debug, info, trace, warn};

use crate::buffer::SampleRing;
use crate::convert::Converter;
use crate::decode::EntryDecoder;
use crate::pack::Pack;

/// Shared state of one stream slot.
pub struct StreamSlot {
    ring: SampleRing,
    ready_epoch: AtomicU32,
    exhausted_epoch: AtomicU32,
}

impl StreamSlot {
    fn new(capacity: usize) -> Self {
        Self {
            ring: SampleRing::new(capacity),
            ready_epoch: AtomicU32::new(0),
            exhausted_epoch: AtomicU32::new(0),
        }
    }

    pub const fn ring(&self) -> &SampleRing {
        &self.ring
    }

    /// Whether the worker has primed the ring for `epoch`.
    pub fn is_ready(&self, epoch: u32) -> bool {
        self.ready_epoch.load(Ordering::Acquire) == epoch
    }

    /// Whether every sample of `epoch` has been written to the ring.
    pub fn is_exhausted(&self, epoch: u32) -> bool {
        self.exhausted_epoch.load(Ordering::Acquire) == epoch
    }
}

/// Requests from the processing thread to the worker.
#[derive(Debug)]
pub enum DecodeRequest {
    Start {
        slot: usize,
        epoch: u32,
        pack: Arc<Pack>,
        entry: usize,
        looping: bool,
    },
    SetLooping {
        slot: usize,
        epoch: u32,
        looping: bool,
    },
    Stop {
        slot: usize,
    },
    /// A ring fell below the low watermark.
    Refill,
    Shutdown,
}

/// Handle to the decode worker thread.
pub struct StreamDecoder {
    requests: Sender<DecodeRequest>,
    slots: Arc<[StreamSlot]>,
    suspended: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl StreamDecoder {
    /// Allocate one ring per voice slot and start the worker.
    pub fn spawn(config: &EngineConfig) -> Result<Self> {
        let slots: Arc<[StreamSlot]> = (0..config.max_voices)
            .map(|_| StreamSlot::new(config.stream_ring_samples()))
            .collect();
        let (requests, rx) = bounded(config.max_voices * 4 + 16);
        let suspended = Arc::new(AtomicBool::new(false));

        let worker = DecodeWorker {
            requests: rx,
            slots: Arc::clone(&slots),
            suspended: Arc::clone(&suspended),
            streams: (0..config.max_voices).map(|_| None).collect(),
            output_rate: config.sample_rate,
            output_channels: usize::from(config.channels),
            idle: Duration::from_millis(config.decode_idle_ms.max(1)),
        };

        let handle = std::thread::Builder::new()
            .name("packmix-decode".to_string())
            .spawn(move || worker.run())
            .map_err(|e| Error::Internal(format!("Failed to spawn decode thread: {e}")))?;

        Ok(Self {
            requests,
            slots,
            suspended,
            worker: Some(handle),
        })
    }

    pub fn slots(&self) -> Arc<[StreamSlot]> {
        Arc::clone(&self.slots)
    }

    pub fn sender(&self) -> Sender<DecodeRequest> {
        self.requests.clone()
    }

    /// Stop (or resume) all decoding. Requests are still handled while suspended.
    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
        let _ = self.requests.try_send(DecodeRequest::Refill);
    }

    /// Stop the worker and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // A full queue still drains; fall back to a blocking send.
        if let Err(TrySendError::Full(request)) = self.requests.try_send(DecodeRequest::Shutdown) {
            let _ = self.requests.send(request);
        }
        if worker.join().is_err() {
            warn!("Decode worker panicked");
        }
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ActiveStream {
    epoch: u32,
    pack: Arc<Pack>,
    entry: usize,
    looping: bool,
    decoder: EntryDecoder,
    converter: Converter,
    /// Converted samples not yet accepted by the ring.
    pending: Vec<f32>,
    pending_pos: usize,
    primed: bool,
    /// The decoder is drained; once `pending` is written the stream is done.
    finished: bool,
    /// Samples produced since the decoder was last (re)opened.
    produced: usize,
}

enum Fill {
    Idle,
    Progress,
    Done,
}

struct DecodeWorker {
    requests: Receiver<DecodeRequest>,
    slots: Arc<[StreamSlot]>,
    suspended: Arc<AtomicBool>,
    streams: Vec<Option<ActiveStream>>,
    output_rate: u32,
    output_channels: usize,
    idle: Duration,
}

impl DecodeWorker {
    fn run(mut self) {
        info!("Decode worker started with {} stream slots", self.slots.len());
        let mut busy = false;

        loop {
            let first = if busy {
                self.requests.try_recv().map_err(|e| match e {
                    crossbeam_channel::TryRecvError::Empty => RecvTimeoutError::Timeout,
                    crossbeam_channel::TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
                })
            } else {
                self.requests.recv_timeout(self.idle)
            };

            match first {
                Ok(request) => {
                    if !self.handle(request) {
                        break;
                    }
                    let mut shutdown = false;
                    while let Ok(request) = self.requests.try_recv() {
                        if !self.handle(request) {
                            shutdown = true;
                            break;
                        }
                    }
                    if shutdown {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            busy = !self.suspended.load(Ordering::Acquire) && self.fill_all();
        }

        self.streams.iter_mut().for_each(|s| *s = None);
        info!("Decode worker stopped");
    }

    /// Returns false on shutdown.
    fn handle(&mut self, request: DecodeRequest) -> bool {
        match request {
            DecodeRequest::Start {
                slot,
                epoch,
                pack,
                entry,
                looping,
            } => self.start(slot, epoch, pack, entry, looping),
            DecodeRequest::SetLooping {
                slot,
                epoch,
                looping,
            } => {
                if let Some(stream) = self.streams.get_mut(slot).and_then(Option::as_mut) {
                    if stream.epoch == epoch {
                        stream.looping = looping;
                    }
                }
            }
            DecodeRequest::Stop { slot } => {
                if let Some(stream) = self.streams.get_mut(slot) {
                    *stream = None;
                }
            }
            DecodeRequest::Refill => {}
            DecodeRequest::Shutdown => return false,
        }
        true
    }

    fn start(&mut self, slot: usize, epoch: u32, pack: Arc<Pack>, entry: usize, looping: bool) {
        let Some(shared) = self.slots.get(slot) else {
            warn!("Start request for unknown stream slot {slot}");
            return;
        };
        shared.ring.reset();
        self.streams[slot] = None;

        let opened = pack.open_entry(entry).and_then(|decoder| {
            let converter = Converter::new(
                decoder.sample_rate(),
                usize::from(decoder.channels()),
                self.output_rate,
                self.output_channels,
            )?;
            Ok((decoder, converter))
        });

        match opened {
            Ok((decoder, converter)) => {
                debug!("Stream slot {} started for pack {} entry {}", slot, pack.id(), entry);
                self.streams[slot] = Some(ActiveStream {
                    epoch,
                    pack,
                    entry,
                    looping,
                    decoder,
                    converter,
                    pending: Vec::new(),
                    pending_pos: 0,
                    primed: false,
                    finished: false,
                    produced: 0,
                });
            }
            Err(e) => {
                warn!("Failed to open stream for pack {} entry {}: {e}", pack.id(), entry);
                // Nothing to play: the voice finishes as soon as it looks.
                shared.ready_epoch.store(epoch, Ordering::Release);
                shared.exhausted_epoch.store(epoch, Ordering::Release);
            }
        }
    }

    /// Top up every active ring. Returns true if any samples moved.
    fn fill_all(&mut self) -> bool {
        let mut progressed = false;
        for slot in 0..self.streams.len() {
            let Some(stream) = self.streams[slot].as_mut() else {
                continue;
            };
            let shared = &self.slots[slot];
            let fill = Self::fill(stream, shared);

            if !stream.primed {
                stream.primed = true;
                shared.ready_epoch.store(stream.epoch, Ordering::Release);
            }

            match fill {
                Fill::Idle => {}
                Fill::Progress => progressed = true,
                Fill::Done => {
                    shared.exhausted_epoch.store(stream.epoch, Ordering::Release);
                    trace!("Stream slot {} exhausted", slot);
                    self.streams[slot] = None;
                    progressed = true;
                }
            }
        }
        progressed
    }

    fn fill(stream: &mut ActiveStream, shared: &StreamSlot) -> Fill {
        let mut progressed = false;

        loop {
            if stream.pending_pos < stream.pending.len() {
                let written = shared.ring.write(&stream.pending[stream.pending_pos..]);
                stream.pending_pos += written;
                progressed |= written > 0;
                if stream.pending_pos < stream.pending.len() {
                    // Ring is full; keep the rest for the next pass.
                    break;
                }
            }
            stream.pending.clear();
            stream.pending_pos = 0;

            if stream.finished {
                return Fill::Done;
            }

            match stream.decoder.decode_next().and_then(|chunk| match chunk {
                Some(samples) => stream.converter.process(&samples).map(Some),
                None => stream.converter.flush().map(|tail| {
                    stream.pending = tail;
                    None
                }),
            }) {
                Ok(Some(converted)) => {
                    stream.produced += converted.len();
                    stream.pending = converted;
                }
                Ok(None) => {
                    stream.produced += stream.pending.len();
                    if stream.looping && stream.produced > 0 {
                        if let Err(e) = Self::rewind(stream) {
                            warn!("Failed to loop stream: {e}");
                            stream.finished = true;
                        }
                    } else {
                        stream.finished = true;
                    }
                }
                Err(e) => {
                    warn!("Stream decode failed, ending voice: {e}");
                    stream.finished = true;
                }
            }
        }

        if progressed {
            Fill::Progress
        } else {
            Fill::Idle
        }
    }

    fn rewind(stream: &mut ActiveStream) -> Result<()> {
        stream.decoder = stream.pack.open_entry(stream.entry)?;
        stream.converter.reset();
        stream.produced = 0;
        Ok(())
    }
}
