//! Maps host application lifecycle callbacks onto the bridge and a tick thread.

use std::sync::Arc;

use packmix_audio::{StopReason, TickScheduler, TickSummary};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::bridge::HostBridge;

/// Owns a bridge plus the scheduler that ticks its engine.
pub struct HostLifecycle {
    bridge: Arc<HostBridge>,
    scheduler: Mutex<Option<TickScheduler>>,
}

impl HostLifecycle {
    pub fn new(bridge: Arc<HostBridge>) -> Self {
        Self {
            bridge,
            scheduler: Mutex::new(None),
        }
    }

    pub fn bridge(&self) -> &HostBridge {
        &self.bridge
    }

    /// Create the engine and start ticking it.
    pub fn on_create(&self) -> bool {
        if !self.bridge.create() {
            return false;
        }
        self.start_ticking()
    }

    pub fn on_pause(&self) {
        info!("Host paused");
        self.bridge.pause(true);
    }

    /// Resume the engine.
    ///
    /// A tick thread that stopped on a fatal status terminates the engine
    /// instead of ticking it again. Any other self-stopped thread is restarted.
    pub fn on_resume(&self) {
        info!("Host resumed");
        self.bridge.pause(false);

        let stopped = self
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(|scheduler| !scheduler.is_running());
        if !stopped {
            return;
        }
        match self.stop_ticking() {
            Some(TickSummary {
                reason: StopReason::Fatal,
                ..
            }) => {
                error!("Tick thread stopped on a fatal status, terminating engine");
                self.bridge.terminate();
            }
            _ => {
                warn!("Tick thread had stopped, restarting it");
                self.start_ticking();
            }
        }
    }

    /// Stop ticking and terminate the engine.
    pub fn on_destroy(&self) -> Option<TickSummary> {
        let summary = self.stop_ticking();
        self.bridge.terminate();
        summary
    }

    pub fn is_ticking(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .is_some_and(TickScheduler::is_running)
    }

    fn start_ticking(&self) -> bool {
        let Some(engine) = self.bridge.engine() else {
            return false;
        };
        match TickScheduler::spawn(engine, self.bridge.config().tick_period()) {
            Ok(scheduler) => {
                *self.scheduler.lock() = Some(scheduler);
                true
            }
            Err(e) => {
                error!("Failed to start tick thread: {e}");
                false
            }
        }
    }

    fn stop_ticking(&self) -> Option<TickSummary> {
        let scheduler = self.scheduler.lock().take()?;
        match scheduler.stop() {
            Ok(summary) => {
                info!(
                    "Tick thread stopped ({:?}): {} ticks, {} underruns",
                    summary.reason, summary.ticks, summary.underruns
                );
                Some(summary)
            }
            Err(e) => {
                error!("Tick thread: {e}");
                None
            }
        }
    }
}

impl Drop for HostLifecycle {
    fn drop(&mut self) {
        self.on_destroy();
    }
}
