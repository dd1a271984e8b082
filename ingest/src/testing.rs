//! Scripted collaborators for engine tests

use crate::config::IngestConfig;
use crate::connection::{ByteStream, Connection, ConnectionListener, SharedByteStream};
use crate::engine::IngestEngine;
use crate::error::TransportError;
use crate::messenger::{IngestEventKind, Messenger};
use crate::metadata::{ConnectionKind, DataFormat, InputFormat, InputMetadata, StreamKind};
use crate::pipeline::PipelineFactory;
use crate::processor::{DataProcessor, DataProcessorHelper, StreamProcessor};
use crate::state::StopToken;
use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Frame sync marker used as the payload of every scripted unit
pub(crate) const UNIT_BYTES: &[u8] = &[0x1a, 0xcf, 0xfc, 0x1d];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    EndOfStream,
    Io,
    Unexpected,
    Panic,
}

impl Failure {
    fn raise(self) -> Result<bool, TransportError> {
        match self {
            Failure::EndOfStream => Err(TransportError::EndOfStream),
            Failure::Io => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))),
            Failure::Unexpected => Err(TransportError::unexpected("scripted decoder fault")),
            Failure::Panic => panic!("scripted panic in load_data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Blocking {
    Never,
    /// Ignore the cooperative stop; return once the token is interrupted
    UntilInterrupted,
    /// Ignore stop and interrupt; return once `released` is set
    UntilReleased,
    /// First load behaves like `UntilReleased`, later ones like `UntilInterrupted`
    StuckThenUntilInterrupted,
}

#[derive(Debug, Clone)]
pub(crate) struct ConnectionScript {
    pub open_ok: bool,
    pub continuous: bool,
    pub server_gone_on_eos: bool,
    pub reconnect_ok: bool,
    /// Units delivered (across all connection instances) before reporting no more data
    pub units: Option<u32>,
    /// Fail on the n-th load (1-based, counted across instances)
    pub fail_on_load: Option<(u32, Failure)>,
    pub fail_every_load: Option<Failure>,
    /// Whether `is_connected` stays true after a scripted failure
    pub stays_connected_on_failure: bool,
    pub blocking: Blocking,
    pub description: Option<String>,
    pub unit_delay: Duration,
}

impl Default for ConnectionScript {
    fn default() -> Self {
        Self {
            open_ok: true,
            continuous: true,
            server_gone_on_eos: false,
            reconnect_ok: true,
            units: None,
            fail_on_load: None,
            fail_every_load: None,
            stays_connected_on_failure: false,
            blocking: Blocking::Never,
            description: Some("tcp://mock-station:5001".to_string()),
            unit_delay: Duration::from_millis(1),
        }
    }
}

/// Counters shared by every connection a factory creates
#[derive(Debug, Default)]
pub(crate) struct ConnectionCounters {
    pub created: AtomicU32,
    pub opens: AtomicU32,
    pub closes: AtomicU32,
    pub reconnects: AtomicU32,
    pub loads: AtomicU32,
    pub units: AtomicU32,
    pub interrupts: AtomicU32,
    pub listeners: AtomicU32,
    pub stream_closes: AtomicU32,
    pub buffer_clears: AtomicU32,
    pub released: AtomicBool,
}

pub(crate) struct MemoryStream {
    data: Mutex<io::Cursor<Vec<u8>>>,
    closed: AtomicBool,
    counters: Arc<ConnectionCounters>,
}

impl MemoryStream {
    fn new(bytes: &[u8], counters: Arc<ConnectionCounters>) -> Self {
        Self {
            data: Mutex::new(io::Cursor::new(bytes.to_vec())),
            closed: AtomicBool::new(false),
            counters,
        }
    }
}

impl ByteStream for MemoryStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed"));
        }
        self.data.lock().read(buf)
    }

    fn close(&self) -> io::Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.stream_closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn clear_buffer(&self) -> io::Result<()> {
        self.data.lock().get_mut().clear();
        self.counters.buffer_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct ScriptedConnection {
    script: ConnectionScript,
    counters: Arc<ConnectionCounters>,
    connected: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn ConnectionListener>>>,
}

impl ScriptedConnection {
    /// Fire a connection-lost notification at every registered listener
    pub fn notify_lost(&self) {
        for listener in self.listeners.lock().iter().filter_map(Weak::upgrade) {
            listener.on_connection_lost();
        }
    }

    pub fn notify_gained(&self) {
        for listener in self.listeners.lock().iter().filter_map(Weak::upgrade) {
            listener.on_connection_gained();
        }
    }

    fn block_until_interrupted(&self, token: &StopToken) -> bool {
        while !token.is_interrupted() {
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn block_until_released(&self) -> bool {
        while !self.counters.released.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn fail(&self, failure: Failure) -> Result<bool, TransportError> {
        if !self.script.stays_connected_on_failure {
            self.connected.store(false, Ordering::SeqCst);
        }
        failure.raise()
    }
}

impl Connection for ScriptedConnection {
    fn open(&self) -> Result<bool, TransportError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.connected.store(self.script.open_ok, Ordering::SeqCst);
        Ok(self.script.open_ok)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn reconnect(&self, _token: &StopToken) -> Result<bool, TransportError> {
        self.counters.reconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(self.script.reconnect_ok, Ordering::SeqCst);
        Ok(self.script.reconnect_ok)
    }

    fn load_data(&self, token: &StopToken) -> Result<bool, TransportError> {
        let n = self.counters.loads.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script.blocking {
            Blocking::UntilInterrupted => return Ok(self.block_until_interrupted(token)),
            Blocking::UntilReleased => return Ok(self.block_until_released()),
            Blocking::StuckThenUntilInterrupted if n == 1 => return Ok(self.block_until_released()),
            Blocking::StuckThenUntilInterrupted => return Ok(self.block_until_interrupted(token)),
            Blocking::Never => {}
        }
        if token.is_stopped() {
            return Ok(false);
        }
        if let Some(failure) = self.script.fail_every_load {
            std::thread::sleep(self.script.unit_delay);
            return self.fail(failure);
        }
        if let Some((at, failure)) = self.script.fail_on_load {
            if n == at {
                return self.fail(failure);
            }
        }
        if let Some(units) = self.script.units {
            if self.counters.units.load(Ordering::SeqCst) >= units {
                return Ok(false);
            }
        }
        std::thread::sleep(self.script.unit_delay);
        self.counters.units.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn byte_stream(&self) -> Result<SharedByteStream, TransportError> {
        Ok(Arc::new(MemoryStream::new(UNIT_BYTES, self.counters.clone())))
    }

    fn metadata(&self) -> Option<InputMetadata> {
        None
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_continuous_stream(&self) -> bool {
        self.script.continuous
    }

    fn treats_end_of_stream_as_server_gone(&self) -> bool {
        self.script.server_gone_on_eos
    }

    fn description(&self) -> Option<String> {
        self.script.description.clone()
    }

    fn add_connection_listener(&self, listener: Weak<dyn ConnectionListener>) {
        self.counters.listeners.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push(listener);
    }

    fn interrupt(&self) {
        self.counters.interrupts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counters shared by every stream processor a factory creates
#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    pub created: AtomicU32,
    pub inits: AtomicU32,
    pub processed: AtomicU32,
    pub bytes: AtomicU64,
    pub pauses: AtomicU32,
    pub resumes: AtomicU32,
    pub stops: AtomicU32,
    pub awaiting_first_data: AtomicU32,
    pub data_processors_set: AtomicU32,
    pub meter_interval_ms: AtomicU64,
    pub connection_lost: AtomicBool,
    /// `hit_server_gone` reports true right after this many units are processed (0 never)
    pub server_gone_at: AtomicU32,
    pub last_format: Mutex<Option<DataFormat>>,
}

pub(crate) struct RecordingStream {
    counters: Arc<StreamCounters>,
    panic_on_process: bool,
    paused: AtomicBool,
}

impl RecordingStream {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl StreamProcessor for RecordingStream {
    fn init(&self, _format: InputFormat, _remote_mode: bool) -> Result<(), TransportError> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_data_processor(&self, _processor: Arc<dyn DataProcessor>) {
        self.counters.data_processors_set.fetch_add(1, Ordering::SeqCst);
    }

    fn process(
        &self,
        stream: &dyn ByteStream,
        metadata: &InputMetadata,
        _token: &StopToken,
    ) -> Result<(), TransportError> {
        if self.panic_on_process {
            panic!("scripted panic in process");
        }
        *self.counters.last_format.lock() = metadata.data_format;
        let mut buf = [0u8; 64];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.counters.bytes.fetch_add(n as u64, Ordering::SeqCst);
        }
        self.counters.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.counters.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.counters.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_connection_lost(&self, lost: bool) {
        self.counters.connection_lost.store(lost, Ordering::SeqCst);
    }

    fn hit_server_gone(&self) -> bool {
        let at = self.counters.server_gone_at.load(Ordering::SeqCst);
        at != 0 && self.counters.processed.load(Ordering::SeqCst) == at
    }

    fn set_awaiting_first_data(&self, awaiting: bool) {
        if awaiting {
            self.counters.awaiting_first_data.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn set_meter_interval(&self, interval_ms: u64) {
        self.counters.meter_interval_ms.store(interval_ms, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingDataProcessor {
    pub inits: AtomicU32,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub fail_init: AtomicBool,
}

impl DataProcessor for RecordingDataProcessor {
    fn init(
        &self,
        _helper: Arc<dyn DataProcessorHelper>,
        _stream_kind: StreamKind,
        _connection_kind: ConnectionKind,
    ) -> anyhow::Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            anyhow::bail!("scripted data processor init failure");
        }
        Ok(())
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct NamedHelper;

impl DataProcessorHelper for NamedHelper {
    fn name(&self) -> &str {
        "test-helper"
    }
}

pub(crate) struct MockFactory {
    pub script: Mutex<ConnectionScript>,
    pub connections: Arc<ConnectionCounters>,
    pub streams: Arc<StreamCounters>,
    pub fail_connection: AtomicBool,
    pub fail_stream: AtomicBool,
    pub panic_on_process: AtomicBool,
    /// Stopped while the next stream processor is being built
    pub stop_on_stream: Mutex<Option<StopToken>>,
    pub data_processor: Option<Arc<RecordingDataProcessor>>,
    pub last_connection: Mutex<Option<Arc<ScriptedConnection>>>,
    pub last_stream: Mutex<Option<Arc<RecordingStream>>>,
}

impl MockFactory {
    pub fn new(script: ConnectionScript) -> Arc<Self> {
        Arc::new(Self::build(script, None))
    }

    pub fn with_data_processor(script: ConnectionScript) -> Arc<Self> {
        Arc::new(Self::build(script, Some(Arc::new(RecordingDataProcessor::default()))))
    }

    fn build(script: ConnectionScript, data_processor: Option<Arc<RecordingDataProcessor>>) -> Self {
        Self {
            script: Mutex::new(script),
            connections: Arc::new(ConnectionCounters::default()),
            streams: Arc::new(StreamCounters::default()),
            fail_connection: AtomicBool::new(false),
            fail_stream: AtomicBool::new(false),
            panic_on_process: AtomicBool::new(false),
            stop_on_stream: Mutex::new(None),
            data_processor,
            last_connection: Mutex::new(None),
            last_stream: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> Arc<ScriptedConnection> {
        self.last_connection
            .lock()
            .clone()
            .expect("no connection created yet")
    }

    pub fn stream(&self) -> Arc<RecordingStream> {
        self.last_stream.lock().clone().expect("no stream created yet")
    }
}

impl PipelineFactory for MockFactory {
    fn create_connection(&self) -> anyhow::Result<Arc<dyn Connection>> {
        if self.fail_connection.load(Ordering::SeqCst) {
            anyhow::bail!("scripted connection factory failure");
        }
        self.connections.created.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(ScriptedConnection {
            script: self.script.lock().clone(),
            counters: self.connections.clone(),
            connected: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        });
        *self.last_connection.lock() = Some(connection.clone());
        Ok(connection)
    }

    fn create_stream_processor(&self) -> anyhow::Result<Arc<dyn StreamProcessor>> {
        if self.fail_stream.load(Ordering::SeqCst) {
            anyhow::bail!("scripted stream processor factory failure");
        }
        if let Some(token) = self.stop_on_stream.lock().take() {
            token.stop();
        }
        self.streams.created.fetch_add(1, Ordering::SeqCst);
        let stream = Arc::new(RecordingStream {
            counters: self.streams.clone(),
            panic_on_process: self.panic_on_process.load(Ordering::SeqCst),
            paused: AtomicBool::new(false),
        });
        *self.last_stream.lock() = Some(stream.clone());
        Ok(stream)
    }

    fn create_data_processor(&self) -> anyhow::Result<Option<Arc<dyn DataProcessor>>> {
        Ok(self
            .data_processor
            .clone()
            .map(|dp| dp as Arc<dyn DataProcessor>))
    }

    fn create_helper(&self) -> Option<Arc<dyn DataProcessorHelper>> {
        self.data_processor
            .as_ref()
            .map(|_| Arc::new(NamedHelper) as Arc<dyn DataProcessorHelper>)
    }
}

#[derive(Default)]
pub(crate) struct RecordingMessenger {
    events: Mutex<Vec<IngestEventKind>>,
}

impl RecordingMessenger {
    pub fn events(&self) -> Vec<IngestEventKind> {
        self.events.lock().clone()
    }

    pub fn count(&self, wanted: impl Fn(&IngestEventKind) -> bool) -> usize {
        self.events.lock().iter().filter(|e| wanted(e)).count()
    }

    pub fn connects(&self) -> usize {
        self.count(|e| matches!(e, IngestEventKind::Connected { .. }))
    }

    pub fn stops(&self) -> usize {
        self.count(|e| *e == IngestEventKind::Stopped)
    }

    pub fn end_of_data(&self) -> usize {
        self.count(|e| *e == IngestEventKind::EndOfData)
    }

    fn push(&self, kind: IngestEventKind) {
        self.events.lock().push(kind);
    }
}

impl Messenger for RecordingMessenger {
    fn announce_connect(&self, description: &str) {
        self.push(IngestEventKind::Connected {
            description: description.to_string(),
        });
    }

    fn announce_stop(&self) {
        self.push(IngestEventKind::Stopped);
    }

    fn announce_flowing(&self, flowing: bool) {
        self.push(IngestEventKind::Flowing(flowing));
    }

    fn announce_end_of_data(&self) {
        self.push(IngestEventKind::EndOfData);
    }

    fn release(&self) {
        self.push(IngestEventKind::Released);
    }
}

/// Short shutdown waits and a small reset budget
pub(crate) fn fast_config() -> IngestConfig {
    IngestConfig {
        exception_limit: 5,
        read_join_wait_ms: 100,
        interrupt_wait_factor: 3,
        ..IngestConfig::default()
    }
}

pub(crate) fn engine_with(
    config: IngestConfig,
    factory: Arc<MockFactory>,
) -> (IngestEngine, Arc<RecordingMessenger>) {
    let messenger = Arc::new(RecordingMessenger::default());
    let engine = IngestEngine::new(config, factory, messenger.clone());
    (engine, messenger)
}

/// Start the service and connect, panicking on failure
pub(crate) fn connected_engine(
    script: ConnectionScript,
) -> (IngestEngine, Arc<MockFactory>, Arc<RecordingMessenger>) {
    let factory = MockFactory::new(script);
    let (engine, messenger) = engine_with(fast_config(), factory.clone());
    engine.start_service().unwrap();
    assert!(engine.connect().unwrap());
    (engine, factory, messenger)
}

/// Poll `condition` until it holds or `timeout` passes
pub(crate) fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
