//! Engine configuration
//!
//! Loaded from JSON; every field has a default so partial documents are valid.

use crate::error::{IngestError, IngestResult};
use crate::metadata::{ConnectionKind, InputFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default upper bound on resets within one reading session
pub const DEFAULT_EXCEPTION_LIMIT: u32 = 1000;

/// Default first-phase wait for the read thread during shutdown
pub const DEFAULT_READ_JOIN_WAIT_MS: u64 = 5000;

/// Default multiplier applied to the join wait after interrupting the read thread
pub const DEFAULT_INTERRUPT_WAIT_FACTOR: u32 = 3;

/// Default capacity of the event broadcast channel
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;

/// Configuration for one telemetry ingestion engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Telemetry input type for this source
    pub input_format: InputFormat,
    /// Transport kind of the downlink connection
    pub connection_kind: ConnectionKind,
    /// Whether downstream storage is remote
    pub remote_mode: bool,
    /// Resets allowed per reading session before the read loop gives up (default: 1000)
    pub exception_limit: u32,
    /// Time to wait for the read thread before interrupting it (default: 5000ms)
    pub read_join_wait_ms: u64,
    /// The post-interrupt wait is `read_join_wait_ms * interrupt_wait_factor` (default: 3)
    pub interrupt_wait_factor: u32,
    /// Input meter interval forwarded to the stream processor, if set
    pub meter_interval_ms: Option<u64>,
    /// Capacity of the event messenger's broadcast channel (default: 1024)
    pub event_buffer_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_format: InputFormat::default(),
            connection_kind: ConnectionKind::default(),
            remote_mode: false,
            exception_limit: DEFAULT_EXCEPTION_LIMIT,
            read_join_wait_ms: DEFAULT_READ_JOIN_WAIT_MS,
            interrupt_wait_factor: DEFAULT_INTERRUPT_WAIT_FACTOR,
            meter_interval_ms: None,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl IngestConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> IngestResult<Self> {
        let config: IngestConfig = serde_json::from_str(json)
            .map_err(|e| IngestError::Config(format!("Invalid ingest configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> IngestResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json_str(&contents)?;
        tracing::debug!("Loaded ingest configuration from {}", path.display());
        Ok(config)
    }

    /// Reject values that would make shutdown or event delivery degenerate
    pub fn validate(&self) -> IngestResult<()> {
        if self.read_join_wait_ms == 0 {
            return Err(IngestError::Config(
                "read_join_wait_ms must be greater than zero".to_string(),
            ));
        }
        if self.interrupt_wait_factor == 0 {
            return Err(IngestError::Config(
                "interrupt_wait_factor must be greater than zero".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(IngestError::Config(
                "event_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// First-phase join wait as a Duration
    pub fn read_join_wait(&self) -> Duration {
        Duration::from_millis(self.read_join_wait_ms)
    }

    /// Post-interrupt join wait as a Duration
    pub fn interrupt_join_wait(&self) -> Duration {
        Duration::from_millis(
            self.read_join_wait_ms
                .saturating_mul(u64::from(self.interrupt_wait_factor)),
        )
    }
}
