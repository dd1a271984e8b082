//! Collaborator construction and the swappable connection/processor pair

use crate::connection::Connection;
use crate::processor::{DataProcessor, DataProcessorHelper, StreamProcessor};
use std::sync::Arc;

/// Builds the engine's collaborators.
///
/// Called once by `start_service` and again by every reset, which needs a
/// brand-new connection and stream processor.
pub trait PipelineFactory: Send + Sync {
    fn create_connection(&self) -> anyhow::Result<Arc<dyn Connection>>;

    fn create_stream_processor(&self) -> anyhow::Result<Arc<dyn StreamProcessor>>;

    /// `Ok(None)` when the input format needs no data processor
    fn create_data_processor(&self) -> anyhow::Result<Option<Arc<dyn DataProcessor>>> {
        Ok(None)
    }

    fn create_helper(&self) -> Option<Arc<dyn DataProcessorHelper>> {
        None
    }
}

/// Connection and stream processor, always replaced together
pub struct Pipeline {
    pub connection: Arc<dyn Connection>,
    pub stream: Arc<dyn StreamProcessor>,
}

impl Pipeline {
    pub fn new(connection: Arc<dyn Connection>, stream: Arc<dyn StreamProcessor>) -> Self {
        Self { connection, stream }
    }

    /// Connection description for logs and connect announcements
    pub fn describe(&self) -> String {
        self.connection
            .description()
            .unwrap_or_else(|| "<unknown connection>".to_string())
    }
}
