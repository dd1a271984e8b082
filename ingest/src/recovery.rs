//! Reset and reconnection
//!
//! A reset throws away the connection and stream processor, builds fresh ones
//! and reconnects. It is bounded per reading session by
//! [`IngestConfig::exception_limit`](crate::config::IngestConfig::exception_limit).

use crate::engine::EngineCore;
use crate::error::{IngestError, IngestResult, TransportError};
use crate::pipeline::Pipeline;
use crate::state::StopToken;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl EngineCore {
    /// Re-establish the transport of `pipeline` and announce it.
    ///
    /// `Ok(false)` means the connection cannot be re-established and the read
    /// loop should end; it is not an error.
    pub(crate) fn reconnect(&self, pipeline: &Pipeline, token: &StopToken) -> Result<bool, TransportError> {
        if !pipeline.connection.reconnect(token)? {
            warn!("Unable to reconnect to {}", pipeline.describe());
            return Ok(false);
        }
        self.messenger.announce_connect(&pipeline.describe());
        Ok(true)
    }

    /// Replace the pipeline after an unexpected failure.
    ///
    /// `so_far` counts failures in this session, `cause` included. Returns
    /// `Ok(true)` when reading can continue and `Ok(false)` to end the session
    /// cleanly. An error means recovery is impossible.
    pub(crate) fn reset(&self, so_far: u32, cause: &TransportError, token: &StopToken) -> IngestResult<bool> {
        if token.is_stopped() {
            return Ok(false);
        }
        if so_far > self.config.exception_limit {
            error!(
                "Unable to reset telemetry input; too many errors ({}). Last: {}",
                self.config.exception_limit, cause
            );
            return Ok(false);
        }

        if let Some(old) = self.current_pipeline() {
            if let Err(e) = old.connection.close() {
                debug!("Discarding connection that failed to close: {}", e);
            }
        }

        let connection = self.factory.create_connection().map_err(|e| {
            IngestError::ConnectionUnavailable(format!("{:#}", e))
        })?;
        connection.set_remote_mode(self.config.remote_mode);
        let description = connection
            .description()
            .unwrap_or_else(|| "<unknown connection>".to_string());
        match connection.open() {
            Ok(true) => {}
            Ok(false) => return Err(IngestError::ReopenFailed(description)),
            Err(e) => return Err(IngestError::ReopenFailed(format!("{}: {}", description, e))),
        }

        let stream = self.factory.create_stream_processor().map_err(|e| {
            IngestError::ProcessorUnavailable(format!("{:#}", e))
        })?;
        self.configure_stream(stream.as_ref())
            .map_err(|e| IngestError::ProcessorUnavailable(e.to_string()))?;
        stream.set_awaiting_first_data(true);

        let pipeline = Arc::new(Pipeline::new(connection, stream));
        // A stopped session must not replace the pipeline a newer one may be using
        if token.is_stopped() {
            discard(&pipeline, &description);
            return Ok(false);
        }
        self.pipeline.store(Some(pipeline.clone()));

        if !self.reconnect(&pipeline, token)? {
            return Ok(false);
        }
        pipeline.connection.add_connection_listener(self.listener());

        if token.is_stopped() {
            discard(&pipeline, &description);
            return Ok(false);
        }

        info!("Telemetry input reset after: {}", cause);
        Ok(true)
    }
}

fn discard(pipeline: &Pipeline, description: &str) {
    debug!("Stopped during reset; closing {}", description);
    if let Err(e) = pipeline.connection.close() {
        warn!("Error closing telemetry connection: {}", e);
    }
}
