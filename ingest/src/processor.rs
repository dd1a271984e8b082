//! Stream and data processor contracts
//!
//! The stream processor decodes the raw bytes handed to it by the read loop;
//! the optional data processor is the downstream sink it feeds.

use crate::connection::ByteStream;
use crate::error::TransportError;
use crate::metadata::{ConnectionKind, InputFormat, InputMetadata, StreamKind};
use crate::state::StopToken;
use std::sync::Arc;

/// Decodes a raw byte stream into telemetry units
pub trait StreamProcessor: Send + Sync {
    /// Prepare for a new reading session
    fn init(&self, format: InputFormat, remote_mode: bool) -> Result<(), TransportError>;

    /// Attach the downstream data processor
    fn set_data_processor(&self, processor: Arc<dyn DataProcessor>);

    /// Consume one unit of input. Blocks until the unit is exhausted or fails.
    fn process(
        &self,
        stream: &dyn ByteStream,
        metadata: &InputMetadata,
        token: &StopToken,
    ) -> Result<(), TransportError>;

    fn pause(&self);

    fn resume(&self);

    /// Record that the connection reported itself lost (or regained)
    fn mark_connection_lost(&self, lost: bool);

    /// Whether the last `process` ended on a "server went away" end of stream
    fn hit_server_gone(&self) -> bool;

    /// After reconnection, do not assume continuity with earlier data
    fn set_awaiting_first_data(&self, awaiting: bool);

    /// Interval, in milliseconds, at which input metering is reported
    fn set_meter_interval(&self, interval_ms: u64);

    fn stop(&self);
}

/// Helper handed to the data processor at initialisation
pub trait DataProcessorHelper: Send + Sync {
    fn name(&self) -> &str;
}

/// Downstream sink for decoded records
pub trait DataProcessor: Send + Sync {
    fn init(
        &self,
        helper: Arc<dyn DataProcessorHelper>,
        stream_kind: StreamKind,
        connection_kind: ConnectionKind,
    ) -> anyhow::Result<()>;

    fn start(&self);

    fn stop(&self);
}
