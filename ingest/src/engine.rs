//! Telemetry input engine
//!
//! [`IngestEngine`] is the control surface for one telemetry source. It builds
//! the connection and processors, opens the link, runs the read thread and
//! tears everything down again. The read thread itself lives in
//! [`crate::reader`]; recovery in [`crate::recovery`]; the bounded join in
//! [`crate::shutdown`].
//!
//! State the read thread and the control thread share sits in [`EngineCore`]
//! behind an `Arc`. Everything the read thread touches there is an atomic or an
//! `arc_swap` handle, so a stop request never waits on the reader.

use crate::config::IngestConfig;
use crate::connection::{ConnectionListener, SharedByteStream};
use crate::error::{IngestError, IngestResult, TransportError};
use crate::messenger::{EventMessenger, Messenger};
use crate::pipeline::{Pipeline, PipelineFactory};
use crate::processor::{DataProcessor, StreamProcessor};
use crate::reader;
use crate::shutdown::{ReadWorker, WorkerTermination};
use crate::state::{EngineState, StateCell, StopToken};
use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, error, info, warn};

/// Meter interval value meaning "not configured"
const NO_METER_INTERVAL: u64 = 0;

/// The byte stream currently being consumed by the read thread
pub(crate) struct ActiveInput {
    stream: SharedByteStream,
}

impl ActiveInput {
    pub(crate) fn new(stream: SharedByteStream) -> Self {
        Self { stream }
    }

    fn close(&self) -> io::Result<()> {
        self.stream.close()
    }
}

/// State shared between the control thread and the read thread
pub(crate) struct EngineCore {
    pub(crate) config: IngestConfig,
    pub(crate) factory: Arc<dyn PipelineFactory>,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) state: StateCell,
    /// Connection and stream processor, replaced together on reset
    pub(crate) pipeline: ArcSwapOption<Pipeline>,
    pub(crate) active_input: ArcSwapOption<ActiveInput>,
    data_processor: OnceLock<Arc<dyn DataProcessor>>,
    session: ArcSwap<StopToken>,
    paused: AtomicBool,
    meter_interval_ms: AtomicU64,
    self_ref: Weak<EngineCore>,
}

impl EngineCore {
    pub(crate) fn current_pipeline(&self) -> Option<Arc<Pipeline>> {
        self.pipeline.load_full()
    }

    /// Weak listener handle, so a connection never keeps the engine alive
    pub(crate) fn listener(&self) -> Weak<dyn ConnectionListener> {
        let listener: Weak<dyn ConnectionListener> = self.self_ref.clone();
        listener
    }

    /// Init a stream processor and give it everything a running one has
    pub(crate) fn configure_stream(&self, stream: &dyn StreamProcessor) -> Result<(), TransportError> {
        stream.init(self.config.input_format, self.config.remote_mode)?;
        if let Some(dp) = self.data_processor.get() {
            stream.set_data_processor(dp.clone());
        }
        let interval = self.meter_interval_ms.load(Ordering::Acquire);
        if interval != NO_METER_INTERVAL {
            stream.set_meter_interval(interval);
        }
        if self.paused.load(Ordering::Acquire) {
            stream.pause();
        }
        Ok(())
    }

    /// Token of the current (or most recent) reading session
    fn session_token(&self) -> Arc<StopToken> {
        self.session.load_full()
    }

    /// Escalation used when the read thread ignores its stop token
    pub(crate) fn interrupt_input(&self) {
        if let Some(pipeline) = self.current_pipeline() {
            pipeline.connection.interrupt();
        }
        if let Some(input) = self.active_input.swap(None) {
            if let Err(e) = input.close() {
                debug!("Error force-closing input stream: {}", e);
            }
        }
    }

    /// Close the link and stop downstream processing.
    ///
    /// `prior` is the state the engine was in before the caller moved it; the
    /// processors and byte stream are only touched if it was connected.
    fn release_link(&self, prior: EngineState) -> IngestResult<()> {
        let pipeline = self.current_pipeline();
        if matches!(
            prior,
            EngineState::Connecting | EngineState::Connected | EngineState::Reading
        ) {
            if let Some(pipeline) = &pipeline {
                if let Err(e) = pipeline.connection.close() {
                    warn!("Error closing telemetry connection: {}", e);
                }
            }
        }
        if !prior.is_connected() {
            return Ok(());
        }

        if let Some(dp) = self.data_processor.get() {
            dp.stop();
        }
        if let Some(pipeline) = &pipeline {
            pipeline.stream.stop();
        }
        // Connection is closed first so the reader sees a deliberate shutdown
        let closed = match self.active_input.swap(None) {
            Some(input) => input.close(),
            None => Ok(()),
        };
        self.messenger.announce_stop();
        info!("Disconnected from telemetry source");
        closed.map_err(IngestError::from)
    }
}

impl ConnectionListener for EngineCore {
    fn on_connection_lost(&self) {
        if let Some(pipeline) = self.current_pipeline() {
            pipeline.stream.mark_connection_lost(true);
        }
    }

    fn on_connection_gained(&self) {
        if let Some(pipeline) = self.current_pipeline() {
            pipeline.stream.mark_connection_lost(false);
        }
    }
}

/// Resilient reader for one telemetry source.
///
/// Lifecycle: [`start_service`](Self::start_service) →
/// [`connect`](Self::connect) → [`start_reading`](Self::start_reading) →
/// [`stop_reading`](Self::stop_reading) → [`stop_service`](Self::stop_service).
/// Control methods may be called from any thread other than the read thread.
pub struct IngestEngine {
    core: Arc<EngineCore>,
    worker: Mutex<Option<ReadWorker>>,
}

impl IngestEngine {
    pub fn new(
        config: IngestConfig,
        factory: Arc<dyn PipelineFactory>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let meter_interval = config.meter_interval_ms.unwrap_or(NO_METER_INTERVAL);
        let core = Arc::new_cyclic(|self_ref| EngineCore {
            config,
            factory,
            messenger,
            state: StateCell::new(EngineState::Idle),
            pipeline: ArcSwapOption::empty(),
            active_input: ArcSwapOption::empty(),
            data_processor: OnceLock::new(),
            session: ArcSwap::from_pointee(StopToken::idle()),
            paused: AtomicBool::new(false),
            meter_interval_ms: AtomicU64::new(meter_interval),
            self_ref: self_ref.clone(),
        });
        Self {
            core,
            worker: Mutex::new(None),
        }
    }

    /// Engine publishing on a new [`EventMessenger`] sized from `config`
    pub fn with_event_messenger(
        config: IngestConfig,
        factory: Arc<dyn PipelineFactory>,
    ) -> (Self, Arc<EventMessenger>) {
        let messenger = Arc::new(EventMessenger::from_config(&config));
        let engine = Self::new(config, factory, messenger.clone());
        (engine, messenger)
    }

    /// Build the connection, stream processor and optional data processor
    pub fn start_service(&self) -> IngestResult<()> {
        let core = &self.core;
        let format = core.config.input_format;

        let connection = core.factory.create_connection().map_err(|e| {
            error!("Unable to create telemetry connection: {:#}", e);
            IngestError::ServiceInit(format!("no telemetry connection: {:#}", e))
        })?;
        connection.set_remote_mode(core.config.remote_mode);

        let stream = core.factory.create_stream_processor().map_err(|e| {
            error!("Unable to create stream processor: {:#}", e);
            IngestError::ServiceInit(format!("no stream processor: {:#}", e))
        })?;

        match core.factory.create_data_processor() {
            Ok(Some(dp)) => {
                match core.factory.create_helper() {
                    Some(helper) => dp
                        .init(helper, format.stream_kind(), core.config.connection_kind)
                        .map_err(|e| IngestError::DataProcessorInit(format!("{:#}", e)))?,
                    None => debug!("No data processor helper; data processor left uninitialized"),
                }
                if core.data_processor.set(dp).is_err() {
                    debug!("Data processor already created; keeping the existing one");
                }
            }
            Ok(None) => {
                debug!("No data processor. This is expected if the input format does not require one.")
            }
            Err(e) => debug!(
                "Unable to create data processor ({:#}). This is expected if the input format does not require one.",
                e
            ),
        }

        core.configure_stream(stream.as_ref()).map_err(|e| {
            error!("Unable to initialize stream processor: {}", e);
            IngestError::ServiceInit(format!("stream processor init failed: {}", e))
        })?;
        connection.add_connection_listener(core.listener());
        core.pipeline.store(Some(Arc::new(Pipeline::new(connection, stream))));

        info!(
            "Telemetry input service started: {} over {:?}",
            format, core.config.connection_kind
        );
        Ok(())
    }

    /// Open the connection.
    ///
    /// A failed open is an error only on an engine that has never been
    /// stopped. Once stopped, or if a stop lands while the open is in
    /// progress, it returns `Ok(false)`.
    pub fn connect(&self) -> IngestResult<bool> {
        let pipeline = self.core.current_pipeline().ok_or_else(|| {
            IngestError::NotInitialized("connect requires start_service".to_string())
        })?;

        let prior = match self
            .core
            .state
            .transition(&[EngineState::Idle, EngineState::Stopped], EngineState::Connecting)
        {
            Ok(prior) => prior,
            Err(EngineState::Stopping) => {
                debug!("Ignoring connect while the engine is stopping");
                return Ok(false);
            }
            Err(_) => return Err(IngestError::AlreadyConnected),
        };

        let opened = match pipeline.connection.open() {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Telemetry connection open failed: {}", e);
                false
            }
        };
        let description = pipeline.connection.description();

        if !opened {
            if !self.core.state.compare_and_set(EngineState::Connecting, prior) {
                debug!("Connection attempt abandoned; engine was stopped during open");
                return Ok(false);
            }
            if prior.is_stopping() {
                warn!("Unable to reopen {} after stop", pipeline.describe());
                return Ok(false);
            }
            return Err(IngestError::ConnectFailed(pipeline.describe()));
        }

        let Some(description) = description else {
            if let Err(e) = pipeline.connection.close() {
                warn!("Error closing undescribed connection: {}", e);
            }
            self.core.state.compare_and_set(EngineState::Connecting, prior);
            return Err(IngestError::NullDescription);
        };

        if !self
            .core
            .state
            .compare_and_set(EngineState::Connecting, EngineState::Connected)
        {
            debug!("Engine stopped while opening {}; closing it again", description);
            if let Err(e) = pipeline.connection.close() {
                warn!("Error closing telemetry connection: {}", e);
            }
            return Ok(false);
        }

        self.core.messenger.announce_connect(&description);
        Ok(true)
    }

    /// Spawn the read thread
    pub fn start_reading(&self) -> IngestResult<()> {
        if let Err(current) = self
            .core
            .state
            .transition(&[EngineState::Connected], EngineState::Reading)
        {
            return Err(if current.is_reading() {
                IngestError::AlreadyReading
            } else {
                IngestError::NotConnected
            });
        }

        match self.launch_reader() {
            Ok(worker) => {
                *self.worker.lock() = Some(worker);
                info!("Telemetry reading started");
                Ok(())
            }
            Err(e) => {
                error!("Unable to start reading telemetry: {}", e);
                self.core
                    .state
                    .compare_and_set(EngineState::Reading, EngineState::Connected);
                Err(e)
            }
        }
    }

    fn launch_reader(&self) -> IngestResult<ReadWorker> {
        let pipeline = self.core.current_pipeline().ok_or_else(|| {
            IngestError::NotInitialized("start_reading requires start_service".to_string())
        })?;
        pipeline
            .stream
            .init(self.core.config.input_format, self.core.config.remote_mode)?;
        if let Some(dp) = self.core.data_processor.get() {
            dp.start();
        }

        let token = StopToken::new();
        self.core.session.store(Arc::new(token.clone()));
        reader::spawn(self.core.clone(), token)
    }

    /// Stop the read thread and disconnect.
    ///
    /// Safe to call repeatedly and without a prior `start_reading`.
    pub fn stop_reading(&self) -> IngestResult<WorkerTermination> {
        let prior = self.core.state.swap(EngineState::Stopping);
        self.core.session_token().stop();
        debug!("Stop reading requested (was {})", prior);

        if let Err(e) = self.core.release_link(prior) {
            warn!("Error closing input stream: {}", e);
        }

        let worker = self.worker.lock().take();
        let termination = match worker {
            Some(worker) => worker.shutdown(&self.core.config),
            None => WorkerTermination::NotRunning,
        };

        self.core.state.set(EngineState::Stopped);
        Ok(termination)
    }

    /// Close the connection; while reading this runs the full `stop_reading`
    pub fn disconnect(&self) -> IngestResult<()> {
        if self.core.state.get().is_reading() {
            self.stop_reading()?;
            return Ok(());
        }
        match self.core.state.transition(
            &[EngineState::Connecting, EngineState::Connected],
            EngineState::Stopped,
        ) {
            Ok(prior) => self.core.release_link(prior),
            Err(current) => {
                debug!("Disconnect ignored; engine is {}", current);
                Ok(())
            }
        }
    }

    pub fn pause(&self) {
        if self
            .core
            .paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(pipeline) = self.core.current_pipeline() {
            pipeline.stream.pause();
        }
        info!("Telemetry input paused");
    }

    pub fn resume(&self) {
        if self
            .core
            .paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(pipeline) = self.core.current_pipeline() {
            pipeline.stream.resume();
        }
        info!("Telemetry input resumed");
    }

    /// Stop reading and release the messenger
    pub fn stop_service(&self) -> IngestResult<()> {
        let termination = self.stop_reading()?;
        debug!("Read thread shutdown: {:?}", termination);
        self.core.messenger.release();
        info!("Telemetry input service stopped");
        Ok(())
    }

    /// Drop bytes buffered in the active input stream
    pub fn clear_input_buffer(&self) -> IngestResult<()> {
        let input = self
            .core
            .active_input
            .load_full()
            .ok_or(IngestError::NoActiveInput)?;
        input.stream.clear_buffer()?;
        debug!("Cleared input stream buffer");
        Ok(())
    }

    /// Set the input meter interval; kept across resets
    pub fn set_meter_interval(&self, interval_ms: u64) {
        self.core.meter_interval_ms.store(interval_ms, Ordering::Release);
        if let Some(pipeline) = self.core.current_pipeline() {
            pipeline.stream.set_meter_interval(interval_ms);
        }
    }

    pub fn on_connection_lost(&self) {
        self.core.on_connection_lost();
    }

    pub fn on_connection_gained(&self) {
        self.core.on_connection_gained();
    }

    pub fn state(&self) -> EngineState {
        self.core.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_reading(&self) -> bool {
        self.state().is_reading()
    }

    pub fn is_paused(&self) -> bool {
        self.core.paused.load(Ordering::Acquire)
    }

    /// Whether the last read session ended on an unrecoverable error
    pub fn has_run_error(&self) -> bool {
        self.core.session_token().has_failed()
    }

    /// Whether the current session's read thread has exited
    pub fn is_worker_stopped(&self) -> bool {
        self.core.session_token().is_finished()
    }

    pub fn config(&self) -> &IngestConfig {
        &self.core.config
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.core.messenger
    }

    #[cfg(test)]
    pub(crate) fn core_for_test(&self) -> &Arc<EngineCore> {
        &self.core
    }

    #[cfg(test)]
    pub(crate) fn worker_thread_name(&self) -> Option<String> {
        self.worker.lock().as_ref().and_then(|w| w.thread_name())
    }
}

impl Drop for IngestEngine {
    fn drop(&mut self) {
        if self.worker.get_mut().is_none() && !self.core.state.get().is_connected() {
            self.core.session_token().stop();
            return;
        }
        match self.stop_reading() {
            Ok(termination) => debug!("Engine dropped; read thread {:?}", termination),
            Err(e) => warn!("Error stopping telemetry input on drop: {}", e),
        }
    }
}
