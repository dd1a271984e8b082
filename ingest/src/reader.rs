//! Telemetry read thread
//!
//! One dedicated `std::thread` per reading session pulls units from the
//! connection and hands them to the stream processor. Transport I/O failures
//! are absorbed here (ignored or answered with a reconnect); anything else goes
//! through the bounded reset in [`crate::recovery`]. No error or panic leaves
//! the thread: the outcome is visible only through engine state, logs and
//! messenger events.

use crate::engine::{ActiveInput, EngineCore};
use crate::error::{IngestError, IngestResult, TransportError};
use crate::pipeline::Pipeline;
use crate::shutdown::ReadWorker;
use crate::state::StopToken;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Name given to the read thread
pub const READER_THREAD_NAME: &str = "tlm-reader";

/// Spawn the read thread for a new session
pub(crate) fn spawn(core: Arc<EngineCore>, token: StopToken) -> IngestResult<ReadWorker> {
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let thread_core = core.clone();
    let thread_token = token.clone();

    let handle = std::thread::Builder::new()
        .name(READER_THREAD_NAME.to_string())
        .spawn(move || {
            thread_core.run_session(&thread_token);
            let _ = done_tx.send(());
        })
        .map_err(|e| IngestError::WorkerSpawn(e.to_string()))?;

    Ok(ReadWorker::new(handle, done_rx, token, core))
}

/// Extract a human-readable message from a panic payload
pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

impl EngineCore {
    /// Body of the read thread
    fn run_session(&self, token: &StopToken) {
        info!("Telemetry read thread started");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.messenger.announce_flowing(true);
            self.read_loop(token)
        }))
        .unwrap_or_else(|payload| {
            Err(IngestError::Transport(TransportError::unexpected(format!(
                "panic in read thread: {}",
                panic_message(&payload)
            ))))
        });

        if let Err(e) = outcome {
            token.fail();
            error!("Telemetry read thread failed: {}", e);
        }

        // Shutdown has already moved on; a later session may own the messenger
        if token.is_abandoned() {
            token.finish();
            warn!("Abandoned telemetry read thread has finally stopped");
            return;
        }

        let announced = panic::catch_unwind(AssertUnwindSafe(|| {
            self.messenger.announce_flowing(false);
            self.messenger.announce_end_of_data();
        }));
        if announced.is_err() {
            warn!("Messenger panicked announcing end of data");
        }

        token.finish();
        info!("Telemetry read thread has now stopped");
    }

    /// Pump units until stopped, out of data, or recovery gives up
    fn read_loop(&self, token: &StopToken) -> IngestResult<()> {
        let mut exceptions: u32 = 0;

        while !token.is_stopped() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.pump(token)))
                .unwrap_or_else(|payload| {
                    Err(TransportError::unexpected(format!(
                        "panic while reading telemetry: {}",
                        panic_message(&payload)
                    )))
                });

            let mut failure = match outcome {
                Ok(()) => break,
                Err(e) => e,
            };

            if failure.is_io() {
                match self.recover_from_io(&failure, token) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(reconnect_failure) => failure = reconnect_failure,
                }
            }

            exceptions += 1;
            warn!(
                "Unexpected error reading telemetry ({} so far): {}",
                exceptions, failure
            );
            if !self.reset(exceptions, &failure, token)? {
                break;
            }
        }
        Ok(())
    }

    /// Read units from the current pipeline.
    ///
    /// `Ok(())` is a clean end of the session; an error is left to the caller
    /// to classify.
    fn pump(&self, token: &StopToken) -> Result<(), TransportError> {
        loop {
            let pipeline = self.require_pipeline()?;
            let loaded = !token.is_stopped() && pipeline.connection.load_data(token)?;
            // Stop may have landed while load_data was blocked
            if !loaded || token.is_stopped() {
                return Ok(());
            }

            let input = pipeline.connection.byte_stream()?;
            self.active_input
                .store(Some(Arc::new(ActiveInput::new(input.clone()))));

            let mut metadata = pipeline.connection.metadata().unwrap_or_default();
            metadata.default_format(self.config.input_format.data_format());

            pipeline.stream.process(input.as_ref(), &metadata, token)?;

            if token.is_stopped() || !pipeline.connection.is_continuous_stream() {
                return Ok(());
            }

            if pipeline.stream.hit_server_gone()
                && pipeline.connection.treats_end_of_stream_as_server_gone()
            {
                info!("Telemetry server went away; reconnecting");
                pipeline.stream.set_awaiting_first_data(true);
                if !self.reconnect(&pipeline, token)? {
                    return Ok(());
                }
            }
        }
    }

    /// Decide what a transport I/O failure means.
    ///
    /// `Ok(true)` keeps reading, `Ok(false)` ends the session cleanly. An error
    /// from the reconnect itself is returned for the reset path.
    fn recover_from_io(&self, failure: &TransportError, token: &StopToken) -> Result<bool, TransportError> {
        if token.is_stopped() {
            debug!("I/O failure during shutdown: {}", failure);
            return Ok(false);
        }
        let pipeline = self.require_pipeline()?;
        let server_gone = pipeline.connection.treats_end_of_stream_as_server_gone()
            && (failure.is_end_of_stream() || pipeline.stream.hit_server_gone());

        if !server_gone && pipeline.connection.is_connected() {
            debug!("Ignoring I/O failure on live connection: {}", failure);
            return Ok(true);
        }

        info!("Lost telemetry connection ({}); reconnecting", failure);
        pipeline.stream.set_awaiting_first_data(true);
        self.reconnect(&pipeline, token)
    }

    fn require_pipeline(&self) -> Result<Arc<Pipeline>, TransportError> {
        self.current_pipeline()
            .ok_or_else(|| TransportError::unexpected("no telemetry pipeline"))
    }
}
