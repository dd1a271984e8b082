//! Bounded shutdown of the read thread
//!
//! Stopping is two-phase. The session token is stopped and the link closed,
//! then the thread gets `read_join_wait` to finish. If it has not, the token is
//! interrupted, the connection told to abort and the active byte stream
//! force-closed, and the thread gets `read_join_wait * interrupt_wait_factor`.
//! A thread that still has not finished is detached; shutdown does not hang.
//! Its token is marked abandoned so that, if it ever wakes, it exits without
//! announcing anything on behalf of a later session.

use crate::config::IngestConfig;
use crate::engine::EngineCore;
use crate::reader::panic_message;
use crate::state::StopToken;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// How the read thread ended during `stop_reading`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerTermination {
    /// There was no read thread
    NotRunning,
    /// Finished within the first wait
    Terminated,
    /// Finished only after being interrupted
    TerminatedAfterInterrupt,
    /// Still running after both waits; detached
    Abandoned,
}

/// Handle to a running read thread
pub(crate) struct ReadWorker {
    handle: JoinHandle<()>,
    finished: Receiver<()>,
    token: StopToken,
    core: Arc<EngineCore>,
}

impl ReadWorker {
    pub(crate) fn new(
        handle: JoinHandle<()>,
        finished: Receiver<()>,
        token: StopToken,
        core: Arc<EngineCore>,
    ) -> Self {
        Self {
            handle,
            finished,
            token,
            core,
        }
    }

    #[cfg(test)]
    pub(crate) fn thread_name(&self) -> Option<String> {
        self.handle.thread().name().map(str::to_string)
    }

    /// Stop the thread, escalating to an interrupt if it does not finish
    pub(crate) fn shutdown(self, config: &IngestConfig) -> WorkerTermination {
        self.token.stop();
        info!("Waiting for telemetry read thread to terminate");
        if self.wait(config.read_join_wait()) {
            self.join();
            return WorkerTermination::Terminated;
        }

        info!(
            "Telemetry read thread still running after {:?}; interrupting",
            config.read_join_wait()
        );
        self.token.interrupt();
        self.core.interrupt_input();
        if self.wait(config.interrupt_join_wait()) {
            self.join();
            return WorkerTermination::TerminatedAfterInterrupt;
        }

        warn!("Telemetry read thread has not terminated. Exiting in any case");
        self.token.abandon();
        WorkerTermination::Abandoned
    }

    /// Wait for this worker's own completion signal
    fn wait(&self, timeout: Duration) -> bool {
        match self.finished.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    fn join(self) {
        if let Err(payload) = self.handle.join() {
            error!("Telemetry read thread panicked: {}", panic_message(&payload));
        }
    }
}
