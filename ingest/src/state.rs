//! Engine state machine and per-session cancellation
//!
//! The engine's connected/reading/stopping status is one enumerated value held
//! in an atomic and changed only by compare-and-swap, so combinations such as
//! "reading while not connected" cannot be represented. The per-session stop
//! signal lives in a [`StopToken`] that is handed to every blocking
//! collaborator call.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Observable engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineState {
    /// Not connected, never stopped
    Idle = 0,
    /// Opening the connection
    Connecting = 1,
    /// Connection open, not reading
    Connected = 2,
    /// Connection open, read thread alive or terminating
    Reading = 3,
    /// Shutdown sequence in progress
    Stopping = 4,
    /// Disconnected after a connect or a shutdown
    Stopped = 5,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Idle,
            1 => EngineState::Connecting,
            2 => EngineState::Connected,
            3 => EngineState::Reading,
            4 => EngineState::Stopping,
            _ => EngineState::Stopped,
        }
    }

    /// Connection open (reading or not)
    pub fn is_connected(&self) -> bool {
        matches!(self, EngineState::Connected | EngineState::Reading)
    }

    pub fn is_reading(&self) -> bool {
        matches!(self, EngineState::Reading)
    }

    /// States in which the engine counts as stopping.
    ///
    /// After a stop the engine stays stopping until the next reading session.
    pub fn is_stopping(&self) -> bool {
        matches!(self, EngineState::Stopping | EngineState::Stopped)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Idle => "idle",
            EngineState::Connecting => "connecting",
            EngineState::Connected => "connected",
            EngineState::Reading => "reading",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Atomic cell holding an [`EngineState`]
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: EngineState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: EngineState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Unconditionally replace the state, returning the previous one
    pub fn swap(&self, state: EngineState) -> EngineState {
        EngineState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Move to `to` only from `from`
    pub fn compare_and_set(&self, from: EngineState, to: EngineState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `to` if the current state is one of `from`.
    ///
    /// Returns the state that was replaced, or the current state if it was not
    /// an allowed source.
    pub fn transition(&self, from: &[EngineState], to: EngineState) -> Result<EngineState, EngineState> {
        let mut current = self.get();
        loop {
            if !from.contains(&current) {
                return Err(current);
            }
            match self.0.compare_exchange(
                current as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = EngineState::from_u8(actual),
            }
        }
    }
}

#[derive(Debug, Default)]
struct TokenFlags {
    stopped: AtomicBool,
    interrupted: AtomicBool,
    abandoned: AtomicBool,
    failed: AtomicBool,
    finished: AtomicBool,
}

/// Cancellation context for one reading session.
///
/// `stop()` is the cooperative signal. `interrupt()` is the escalation used by
/// the shutdown sequence when the read thread has not finished in time; it
/// implies `stop()`. Both are one-way for the life of the token.
///
/// The read thread reports back through the same token: `finish()` when it has
/// exited and `fail()` when it ended on an unrecoverable error. A session that
/// shutdown gave up waiting for is marked `abandon()`ed so its thread, if it
/// ever wakes, leaves shared state alone.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flags: Arc<TokenFlags>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is already stopped
    pub fn stopped() -> Self {
        let token = Self::new();
        token.stop();
        token
    }

    /// Stopped and finished; stands in for the session before the first one
    pub fn idle() -> Self {
        let token = Self::stopped();
        token.finish();
        token
    }

    pub fn stop(&self) {
        self.flags.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stopped.load(Ordering::Acquire)
    }

    pub fn interrupt(&self) {
        self.flags.interrupted.store(true, Ordering::Release);
        self.stop();
    }

    pub fn is_interrupted(&self) -> bool {
        self.flags.interrupted.load(Ordering::Acquire)
    }

    /// Shutdown stopped waiting for this session's thread; implies `interrupt()`
    pub fn abandon(&self) {
        self.flags.abandoned.store(true, Ordering::Release);
        self.interrupt();
    }

    pub fn is_abandoned(&self) -> bool {
        self.flags.abandoned.load(Ordering::Acquire)
    }

    pub fn fail(&self) {
        self.flags.failed.store(true, Ordering::Release);
    }

    pub fn has_failed(&self) -> bool {
        self.flags.failed.load(Ordering::Acquire)
    }

    pub fn finish(&self) {
        self.flags.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.flags.finished.load(Ordering::Acquire)
    }
}
