//! Engine lifecycle state shared between threads.

use std::sync::atomic::{AtomicU8, Ordering};

use packmix_core::EngineState;

/// Atomic holder of the engine's [`EngineState`].
///
/// `Terminated` is absorbing: once set, no transition leaves it.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub const fn new(initial: EngineState) -> Self {
        Self {
            state: AtomicU8::new(initial.as_u8()),
        }
    }

    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Fails if the state changed underneath.
    pub fn transition(&self, from: EngineState, to: EngineState) -> bool {
        from != EngineState::Terminated
            && self
                .state
                .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Set `Terminated`, returning the previous state.
    pub fn terminate(&self) -> EngineState {
        EngineState::from_u8(
            self.state
                .swap(EngineState::Terminated.as_u8(), Ordering::AcqRel),
        )
    }

    pub fn is_terminated(&self) -> bool {
        self.get() == EngineState::Terminated
    }
}
