//! Drives [`Engine::tick`] from a dedicated thread at a fixed period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use packmix_core::{Error, Result, TickStatus};
use tracing::{debug, error, info, trace, warn};

use crate::engine::Engine;

/// Ticks this far behind schedule are dropped instead of caught up.
const MAX_LAG_PERIODS: u32 = 8;

/// Why the tick thread stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// [`TickScheduler::stop`] was called.
    Requested,
    /// A tick reported [`TickStatus::Fatal`].
    Fatal,
    /// The engine was terminated underneath the scheduler.
    Inactive,
}

/// What the tick thread did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub ticks: u64,
    pub underruns: u64,
    pub reason: StopReason,
}

/// Handle to a running tick thread.
pub struct TickScheduler {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<TickSummary>>,
}

impl TickScheduler {
    /// Start ticking `engine` roughly every `period`.
    pub fn spawn(engine: Arc<Engine>, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::Config("tick period must be positive".to_string()));
        }
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let worker = std::thread::Builder::new()
            .name("packmix-tick".to_string())
            .spawn(move || run(&engine, period, &flag))
            .map_err(|e| Error::Internal(format!("Failed to spawn tick thread: {e}")))?;

        info!("Tick scheduler started, period {:?}", period);
        Ok(Self {
            stop,
            worker: Some(worker),
        })
    }

    /// Whether the tick thread is still running.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop ticking and wait for the thread.
    pub fn stop(mut self) -> Result<TickSummary> {
        self.halt()
    }

    fn halt(&mut self) -> Result<TickSummary> {
        self.stop.store(true, Ordering::Release);
        let worker = self
            .worker
            .take()
            .ok_or_else(|| Error::Internal("tick thread already joined".to_string()))?;
        worker
            .join()
            .map_err(|_| Error::Internal("tick thread panicked".to_string()))
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.halt() {
                warn!("Tick scheduler: {e}");
            }
        }
    }
}

fn run(engine: &Engine, period: Duration, stop: &AtomicBool) -> TickSummary {
    let mut ticks = 0u64;
    let mut underruns = 0u64;
    let mut deadline = Instant::now();

    let reason = loop {
        if stop.load(Ordering::Acquire) {
            break StopReason::Requested;
        }

        match engine.tick() {
            TickStatus::Nominal => {}
            TickStatus::Underrun => {
                underruns += 1;
                trace!("Underrun on tick {}", ticks);
            }
            TickStatus::Inactive => break StopReason::Inactive,
            TickStatus::Fatal => {
                error!("Fatal tick status after {} ticks, scheduler stopping", ticks);
                break StopReason::Fatal;
            }
        }
        ticks += 1;

        deadline += period;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else if now - deadline > period * MAX_LAG_PERIODS {
            debug!("Tick scheduler fell behind by {:?}, resyncing", now - deadline);
            deadline = now;
        }
    };

    info!("Tick scheduler stopped ({:?}) after {} ticks", reason, ticks);
    TickSummary {
        ticks,
        underruns,
        reason,
    }
}
