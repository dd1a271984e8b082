//! Status announcements for the rest of the ground system
//!
//! The engine reports connect, stop, flowing and end-of-data through the
//! [`Messenger`] trait. [`EventMessenger`] is the standard implementation: a
//! broadcast bus with sequence-numbered, timestamped events that any number of
//! subscribers can follow.

use crate::config::IngestConfig;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Outbound status events from the ingestion engine
pub trait Messenger: Send + Sync {
    /// A connection to `description` was established or re-established
    fn announce_connect(&self, description: &str);

    /// The connection was closed and the pipeline stopped
    fn announce_stop(&self);

    /// Data flow started (`true`) or ended (`false`)
    fn announce_flowing(&self, flowing: bool);

    /// The read loop has delivered everything it will deliver
    fn announce_end_of_data(&self);

    /// The service is shutting down; no further announcements will be made
    fn release(&self);
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestEventKind {
    Connected { description: String },
    Stopped,
    Flowing(bool),
    EndOfData,
    Released,
}

/// One published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    /// Monotonically increasing per messenger, starting at 1
    pub sequence: u64,
    /// Milliseconds since the UNIX epoch
    pub timestamp_ms: i64,
    pub kind: IngestEventKind,
}

/// Counters describing messenger activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessengerStats {
    pub events_published: u64,
    /// Announcements dropped because the messenger had been released
    pub events_discarded: u64,
    pub subscriber_count: usize,
}

/// Broadcast-backed messenger
pub struct EventMessenger {
    sender: broadcast::Sender<IngestEvent>,
    sequence: AtomicU64,
    events_published: AtomicU64,
    events_discarded: AtomicU64,
    released: AtomicBool,
}

impl EventMessenger {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: AtomicU64::new(1),
            events_published: AtomicU64::new(0),
            events_discarded: AtomicU64::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// Messenger with the channel capacity from `config`
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.event_buffer_size)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.sender.subscribe()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> MessengerStats {
        MessengerStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            subscriber_count: self.sender.receiver_count(),
        }
    }

    fn publish(&self, kind: IngestEventKind) {
        if self.is_released() {
            self.events_discarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Messenger released; dropping {:?}", kind);
            return;
        }
        self.emit(kind);
    }

    fn emit(&self, kind: IngestEventKind) {
        let event = IngestEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            kind,
        };
        self.events_published.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventMessenger {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl Messenger for EventMessenger {
    fn announce_connect(&self, description: &str) {
        tracing::info!("Connected to telemetry source {}", description);
        self.publish(IngestEventKind::Connected {
            description: description.to_string(),
        });
    }

    fn announce_stop(&self) {
        self.publish(IngestEventKind::Stopped);
    }

    fn announce_flowing(&self, flowing: bool) {
        self.publish(IngestEventKind::Flowing(flowing));
    }

    fn announce_end_of_data(&self) {
        self.publish(IngestEventKind::EndOfData);
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.emit(IngestEventKind::Released);
    }
}
