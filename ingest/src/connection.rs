//! Downlink connection contract
//!
//! A connection owns the physical transport (socket, file, message bus). The
//! engine only drives it through this trait. Methods take `&self` because the
//! control thread must be able to close a connection while the read thread is
//! blocked inside `load_data`.

use crate::error::TransportError;
use crate::metadata::InputMetadata;
use crate::state::StopToken;
use std::io;
use std::sync::{Arc, Weak};

/// Raw byte stream produced by a connection for one unit of input
pub trait ByteStream: Send + Sync {
    /// Read into `buf`, returning the number of bytes read (0 at end of stream)
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the underlying handle; a blocked `read` should return
    fn close(&self) -> io::Result<()>;

    /// Drop any bytes buffered but not yet consumed
    fn clear_buffer(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "input stream does not support clearing its buffer",
        ))
    }
}

/// Shared handle to the active byte stream
pub type SharedByteStream = Arc<dyn ByteStream>;

/// Receives connection-lost and connection-gained notifications.
///
/// Connections may invoke these from any thread.
pub trait ConnectionListener: Send + Sync {
    fn on_connection_lost(&self);
    fn on_connection_gained(&self);
}

/// Telemetry input connection
pub trait Connection: Send + Sync {
    /// Open the transport. `Ok(false)` means the open did not succeed.
    fn open(&self) -> Result<bool, TransportError>;

    /// Close the transport
    fn close(&self) -> Result<(), TransportError>;

    /// Re-establish the transport after it was lost.
    ///
    /// `Ok(false)` means reconnection is not possible for this transport
    /// (a file cannot be reconnected, for example) and the read loop should end.
    fn reconnect(&self, token: &StopToken) -> Result<bool, TransportError>;

    /// Block until the next unit of data is available.
    ///
    /// Returns `Ok(false)` when there is no more data or `token` was stopped.
    fn load_data(&self, token: &StopToken) -> Result<bool, TransportError>;

    /// Byte stream for the unit made available by the last `load_data`
    fn byte_stream(&self) -> Result<SharedByteStream, TransportError>;

    /// Metadata for the unit made available by the last `load_data`
    fn metadata(&self) -> Option<InputMetadata>;

    /// Whether the transport believes it is still connected
    fn is_connected(&self) -> bool;

    /// False for one-shot sources whose single unit is the whole input
    fn is_continuous_stream(&self) -> bool;

    /// Whether end-of-stream means the server went away for this transport kind
    fn treats_end_of_stream_as_server_gone(&self) -> bool;

    /// Human-readable connection string; `None` if it cannot be described
    fn description(&self) -> Option<String>;

    /// Register a listener for connection-lost/gained notifications
    fn add_connection_listener(&self, listener: Weak<dyn ConnectionListener>);

    /// Tell the connection whether downstream storage is remote
    fn set_remote_mode(&self, _remote: bool) {}

    /// Abort any blocking call in progress; used when cooperative stop has not worked
    fn interrupt(&self) {}
}
