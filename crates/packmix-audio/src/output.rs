//! Output sinks: where mixed blocks go after each tick.
//!
//! A device backend implements [`OutputSink`]; the engine itself never talks
//! to audio hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use packmix_core::Result;
use parking_lot::Mutex;

/// Receives one interleaved block per tick on the processing thread.
pub trait OutputSink: Send {
    /// Consume a mixed block. An error is treated as fatal by the engine.
    fn write(&mut self, block: &[f32]) -> Result<()>;

    /// Called once when the engine terminates.
    fn close(&mut self) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(&mut self, _block: &[f32]) -> Result<()> {
        Ok(())
    }
}

/// Records every block into a shared buffer.
///
/// Grows its buffer on the processing thread, so it is meant for tests and
/// offline rendering.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    samples: Arc<Mutex<Vec<f32>>>,
    blocks: Arc<Mutex<usize>>,
    closed: Arc<AtomicBool>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A second handle onto the same recording.
    pub fn handle(&self) -> Self {
        self.clone()
    }

    /// Copy of everything recorded so far.
    pub fn samples(&self) -> Vec<f32> {
        self.samples.lock().clone()
    }

    /// Take the recording, leaving it empty.
    pub fn take(&self) -> Vec<f32> {
        std::mem::take(&mut *self.samples.lock())
    }

    pub fn blocks(&self) -> usize {
        *self.blocks.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl OutputSink for CaptureSink {
    fn write(&mut self, block: &[f32]) -> Result<()> {
        self.samples.lock().extend_from_slice(block);
        *self.blocks.lock() += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
