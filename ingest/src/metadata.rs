//! Input format tags and per-read metadata

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Telemetry input type configured for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputFormat {
    #[default]
    RawTransferFrame,
    RawPacket,
    SfduTransferFrame,
    SfduPacket,
    CommandEcho,
    Unknown,
}

impl InputFormat {
    /// Data format tag stamped on metadata the connection left untagged
    pub fn data_format(&self) -> DataFormat {
        match self {
            InputFormat::RawTransferFrame => DataFormat::TransferFrame,
            InputFormat::RawPacket => DataFormat::Packet,
            InputFormat::SfduTransferFrame => DataFormat::SfduTransferFrame,
            InputFormat::SfduPacket => DataFormat::SfduPacket,
            InputFormat::CommandEcho => DataFormat::CommandEcho,
            InputFormat::Unknown => DataFormat::Unknown,
        }
    }

    /// Kind of stream a data processor is initialised for
    pub fn stream_kind(&self) -> StreamKind {
        match self {
            InputFormat::RawTransferFrame | InputFormat::SfduTransferFrame => {
                StreamKind::TransferFrame
            }
            InputFormat::RawPacket | InputFormat::SfduPacket => StreamKind::Packet,
            InputFormat::CommandEcho => StreamKind::CommandEcho,
            InputFormat::Unknown => StreamKind::Unknown,
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InputFormat::RawTransferFrame => "RAW_TF",
            InputFormat::RawPacket => "RAW_PKT",
            InputFormat::SfduTransferFrame => "SFDU_TF",
            InputFormat::SfduPacket => "SFDU_PKT",
            InputFormat::CommandEcho => "CMD_ECHO",
            InputFormat::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Format of the bytes delivered with one read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFormat {
    TransferFrame,
    Packet,
    SfduTransferFrame,
    SfduPacket,
    CommandEcho,
    Unknown,
}

/// Stream classification handed to the data processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    TransferFrame,
    Packet,
    CommandEcho,
    Unknown,
}

/// Transport kind of the downlink connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionKind {
    #[default]
    ClientSocket,
    ServerSocket,
    File,
    Database,
    Tds,
    Unknown,
}

/// Metadata obtained from the connection alongside each byte stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputMetadata {
    /// Format tag; defaulted from the configured input format when absent
    pub data_format: Option<DataFormat>,
    /// Per-read annotations supplied by the transport
    pub annotations: HashMap<String, String>,
}

impl InputMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(format: DataFormat) -> Self {
        Self {
            data_format: Some(format),
            annotations: HashMap::new(),
        }
    }

    /// Add an annotation, replacing any previous value for the key
    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Fill in the format tag if the connection did not supply one
    pub fn default_format(&mut self, format: DataFormat) {
        self.data_format.get_or_insert(format);
    }
}
