//! Ingestion error types
//!
//! Two families of errors live here:
//!
//! - [`IngestError`]: what the engine's control surface returns to its caller
//! - [`TransportError`]: what a collaborator (connection, stream processor)
//!   raises from inside the read loop
//!
//! The read loop never lets a `TransportError` escape its thread. It classifies
//! each one as a transport I/O failure (silent continue or reconnect) or as an
//! unexpected failure (bounded reset).

use std::io;
use thiserror::Error;

/// Errors surfaced by the ingestion engine's control operations
#[derive(Error, Debug)]
pub enum IngestError {
    // =========================================================================
    // Illegal-state errors
    // =========================================================================
    #[error("Telemetry service not started: {0}")]
    NotInitialized(String),

    #[error("Telemetry source already connected")]
    AlreadyConnected,

    #[error("Telemetry source is not connected")]
    NotConnected,

    #[error("Telemetry is already being read")]
    AlreadyReading,

    #[error("No active input stream; no data to be cleared")]
    NoActiveInput,

    // =========================================================================
    // Connection errors
    // =========================================================================
    #[error("Unable to connect to telemetry source: {0}")]
    ConnectFailed(String),

    #[error("Null input connection description")]
    NullDescription,

    #[error("Unable to reopen telemetry connection: {0}")]
    ReopenFailed(String),

    // =========================================================================
    // Construction errors
    // =========================================================================
    #[error("Unable to initialize telemetry input service: {0}")]
    ServiceInit(String),

    #[error("Unable to create telemetry connection: {0}")]
    ConnectionUnavailable(String),

    #[error("Unable to create stream processor: {0}")]
    ProcessorUnavailable(String),

    #[error("Unable to initialize data processor: {0}")]
    DataProcessorInit(String),

    #[error("Unexpected error starting read thread: {0}")]
    WorkerSpawn(String),

    // =========================================================================
    // Wrapped errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// True for errors caused by calling an operation in the wrong state.
    ///
    /// These are caller errors and are never retried.
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            IngestError::NotInitialized(_)
                | IngestError::AlreadyConnected
                | IngestError::NotConnected
                | IngestError::AlreadyReading
                | IngestError::NoActiveInput
        )
    }
}

/// Result type for engine operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Failures raised by connections and stream processors
#[derive(Error, Debug)]
pub enum TransportError {
    /// The byte stream ended
    #[error("End of stream")]
    EndOfStream,

    /// Transport-level I/O failure
    #[error("Transport I/O failure: {0}")]
    Io(#[from] io::Error),

    /// Anything else; handled by the reset protocol
    #[error("{0}")]
    Unexpected(#[from] anyhow::Error),
}

impl TransportError {
    /// Build an unexpected failure from a message
    pub fn unexpected(msg: impl Into<String>) -> Self {
        TransportError::Unexpected(anyhow::anyhow!(msg.into()))
    }

    /// I/O failures, end-of-stream included
    pub fn is_io(&self) -> bool {
        matches!(self, TransportError::EndOfStream | TransportError::Io(_))
    }

    /// End-of-stream, either explicit or an `UnexpectedEof` I/O error
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            TransportError::EndOfStream => true,
            TransportError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            TransportError::Unexpected(_) => false,
        }
    }
}
