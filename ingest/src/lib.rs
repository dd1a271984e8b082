//! Resilient Telemetry Ingestion
//!
//! Reads a continuous downlink telemetry stream from an external transport and
//! feeds it to the decoding pipeline, recovering on its own from lost
//! connections and decoder faults.
//!
//! ## Features
//!
//! - One dedicated read thread per reading session
//! - Transport I/O failures absorbed or answered with a reconnect
//! - Bounded reset: fresh connection and stream processor after unexpected errors
//! - Two-phase bounded shutdown (cooperative stop, then interrupt)
//! - Lock-free state shared between the control and read threads
//! - Broadcast status events (connect, stop, flowing, end of data)

mod config;
mod connection;
mod engine;
mod error;
mod logging;
mod messenger;
mod metadata;
mod pipeline;
mod processor;
mod reader;
mod recovery;
mod shutdown;
mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::*;
pub use connection::{ByteStream, Connection, ConnectionListener, SharedByteStream};
pub use engine::IngestEngine;
pub use error::{IngestError, IngestResult, TransportError};
pub use logging::{init_logging, log_directory, LOG_FILE_PREFIX};
pub use messenger::{EventMessenger, IngestEvent, IngestEventKind, Messenger, MessengerStats};
pub use metadata::{ConnectionKind, DataFormat, InputFormat, InputMetadata, StreamKind};
pub use pipeline::{Pipeline, PipelineFactory};
pub use processor::{DataProcessor, DataProcessorHelper, StreamProcessor};
pub use reader::READER_THREAD_NAME;
pub use shutdown::WorkerTermination;
pub use state::{EngineState, StateCell, StopToken};
