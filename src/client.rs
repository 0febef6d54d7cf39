//! The owning client context: configuration, lifecycle, connectors and the
//! control-thread API.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::capi::{CapabilityTable, LEGACY_API_VERSION, LegacyHost, ProcessorHost};
use crate::connector::{
    BufferId, ClientId, Connector, ConnectorDirectory, ConnectorKind, ConnectorType, Direction,
    Directions, PortId,
};
use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::handoff::{Handoff, HandoffState, Interrupted};
use crate::port::{Port, PortInfo};
use crate::procbuf::{BufferUsage, ConnectorCell, ProcessBuffer};
use crate::processor::{Processor, ProcessorDescriptor, ProcessorFault};
use crate::registry::{ProcessorEntry, ProcessorId, ProcessorInfo, ProcessorList};
use crate::{API_VERSION, init_tracing};

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Initial engine buffer size in frames.
    pub buffer_size: u32,
    /// Engine sample rate in Hertz.
    pub sample_rate: u32,
    /// MIDI connector capacity per frame, in bytes.
    pub midi_bytes_per_frame: usize,
    /// Capacity of the event channel.
    pub event_capacity: usize,
    /// How long a hand-off waiter sleeps before re-checking for shutdown.
    pub handoff_poll: Duration,
    /// Back connector arenas with locked anonymous mappings.
    pub lock_memory: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            sample_rate: 48_000,
            midi_bytes_per_frame: 32,
            event_capacity: 64,
            handoff_poll: Duration::from_millis(10),
            lock_memory: false,
        }
    }
}

impl ClientConfig {
    /// Set the initial buffer size.
    pub fn buffer_size(mut self, frames: u32) -> Self {
        self.buffer_size = frames;
        self
    }

    /// Set the sample rate.
    pub fn sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate = hz;
        self
    }

    /// Set the MIDI bytes reserved per frame.
    pub fn midi_bytes_per_frame(mut self, bytes: usize) -> Self {
        self.midi_bytes_per_frame = bytes;
        self
    }

    /// Set the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the hand-off poll interval.
    pub fn handoff_poll(mut self, poll: Duration) -> Self {
        self.handoff_poll = poll;
        self
    }

    /// Lock connector arenas into memory.
    pub fn lock_memory(mut self, lock: bool) -> Self {
        self.lock_memory = lock;
        self
    }
}

/// Asynchronous notifications from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// A processor returned an error from its process callback.
    ProcessorFailed {
        /// Offending registration.
        processor: ProcessorId,
        /// Returned code.
        code: i32,
    },
    /// Every unit was notified of a new buffer size.
    BufferSizeChanged(u32),
    /// The client was shut down.
    Shutdown {
        /// Human-readable diagnostic.
        reason: String,
    },
    /// The client was closed and its resources released.
    Closed,
}

/// ProcessBuffer description for status surfaces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    /// Buffer handle.
    pub id: BufferId,
    /// Content type.
    pub ty: ConnectorType,
    /// Binding counters.
    pub usage: BufferUsage,
}

/// Snapshot of a client for control surfaces.
#[derive(Clone, Debug)]
pub struct ClientStatus {
    /// Client name.
    pub name: String,
    /// Current buffer size in frames.
    pub buffer_size: u32,
    /// Sample rate in Hertz.
    pub sample_rate: u32,
    /// Frame time at the start of the next cycle.
    pub frame_time: u64,
    /// Whether the engine callback is running.
    pub active: bool,
    /// Whether a shutdown was requested.
    pub shutdown: bool,
    /// Whether a severe error occurred.
    pub severe: bool,
    /// Whether the client is closed.
    pub closed: bool,
    /// Registered processors in list order.
    pub processors: Vec<ProcessorInfo>,
    /// Registered ports.
    pub ports: Vec<PortInfo>,
    /// Live ProcessBuffers.
    pub buffers: Vec<BufferInfo>,
}

pub(crate) struct ClientFlags {
    active: AtomicBool,
    shutdown: AtomicBool,
    severe: AtomicBool,
    closed: AtomicBool,
    fault_code: AtomicI32,
    fault_serial: AtomicU64,
}

impl ClientFlags {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            severe: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fault_code: AtomicI32::new(0),
            fault_serial: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn is_severe(&self) -> bool {
        self.severe.load(Ordering::Acquire)
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.shutdown_requested() || self.closed.load(Ordering::Acquire)
    }

    fn record_fault(&self, serial: u64, code: i32) {
        if !self.severe.load(Ordering::Acquire) {
            self.fault_serial.store(serial, Ordering::Release);
            self.fault_code.store(code, Ordering::Release);
            self.severe.store(true, Ordering::Release);
        }
        self.shutdown.store(true, Ordering::Release);
    }
}

/// State guarded by the client mutex.
pub(crate) struct ClientState {
    pub(crate) processors: Arc<ProcessorList>,
    pub(crate) handoff: HandoffState,
    pub(crate) directory: ConnectorDirectory,
    pub(crate) buffer_size: u32,
    next_serial: u64,
    next_generation: u64,
    released: Vec<Arc<ProcessorEntry>>,
    closed: bool,
}

impl ClientState {
    pub(crate) fn next_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

pub(crate) struct ClientShared {
    pub(crate) id: ClientId,
    pub(crate) name: String,
    pub(crate) config: ClientConfig,
    pub(crate) state: Mutex<ClientState>,
    pub(crate) handoff: Handoff,
    pub(crate) ports: ArcSwap<Vec<Arc<Port>>>,
    pub(crate) flags: ClientFlags,
    pub(crate) frame_time: AtomicU64,
    shutdown_reason: Mutex<Option<String>>,
    dispatcher_taken: AtomicBool,
    events_tx: Sender<ClientEvent>,
    events_rx: Receiver<ClientEvent>,
}

impl ClientShared {
    /// Lock the client state, tearing the client down first if a shutdown is
    /// pending.
    pub(crate) fn lock_running(&self) -> Result<MutexGuard<'_, ClientState>, ClientError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ClientError::Closed);
        }
        if self.flags.shutdown_requested() {
            let reason = self.teardown(&mut state);
            return Err(ClientError::Shutdown(reason));
        }
        Ok(state)
    }

    pub(crate) fn publish(
        &self,
        state: &mut MutexGuard<'_, ClientState>,
        list: ProcessorList,
    ) -> Result<(), ClientError> {
        let generation = list.generation();
        match self
            .handoff
            .publish(state, Arc::new(list), &self.flags, self.config.handoff_poll)
        {
            Ok(()) => {
                debug!(client = %self.name, generation, "processor list confirmed");
                Ok(())
            }
            Err(Interrupted) => {
                warn!(client = %self.name, generation, "hand-off interrupted by shutdown");
                let reason = self.teardown(state);
                Err(ClientError::Shutdown(reason))
            }
        }
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        if self.events_tx.try_send(event).is_err() {
            debug!(client = %self.name, "event channel full, dropping event");
        }
    }

    /// Called from the audio thread when a process callback fails.
    pub(crate) fn processing_failed(&self, entry: &ProcessorEntry, fault: ProcessorFault) {
        self.flags.record_fault(entry.id().serial(), fault.0);
        let _ = self.events_tx.try_send(ClientEvent::ProcessorFailed {
            processor: entry.id(),
            code: fault.0,
        });
        self.handoff.wake();
    }

    /// Put the client into the severe-error state and tear it down now.
    pub(crate) fn fail(
        &self,
        state: &mut ClientState,
        fault: Option<(ProcessorId, ProcessorFault)>,
        reason: String,
    ) -> ClientError {
        match fault {
            Some((processor, fault)) => {
                self.flags.record_fault(processor.serial(), fault.0);
                self.emit(ClientEvent::ProcessorFailed {
                    processor,
                    code: fault.0,
                });
            }
            None => self.flags.record_fault(0, 0),
        }
        self.shutdown_reason.lock().get_or_insert(reason);
        ClientError::Shutdown(self.teardown(state))
    }

    fn shutdown_reason(&self, state: &ClientState) -> String {
        if let Some(reason) = self.shutdown_reason.lock().clone() {
            return reason;
        }
        if self.flags.is_severe() {
            let serial = self.flags.fault_serial.load(Ordering::Acquire);
            let code = self.flags.fault_code.load(Ordering::Acquire);
            let name = state
                .processors
                .entries()
                .iter()
                .find(|entry| entry.id().serial() == serial)
                .map(|entry| entry.name().to_owned())
                .unwrap_or_else(|| "<unregistered>".to_owned());
            return format!(
                "error {code} from process callback for processor '{name}' (processor#{}:{serial})",
                self.id
            );
        }
        "shutdown requested".to_owned()
    }

    /// Shut the client down: diagnostic, `Shutdown` event, then close.
    fn teardown(&self, state: &mut ClientState) -> String {
        let reason = self.shutdown_reason(state);
        if self.flags.is_severe() {
            error!(client = %self.name, "severe error, shutting down: {reason}");
        } else {
            warn!(client = %self.name, "shutting down: {reason}");
        }
        self.flags.shutdown.store(true, Ordering::Release);
        self.emit(ClientEvent::Shutdown {
            reason: reason.clone(),
        });
        self.close_locked(state);
        reason
    }

    fn close_locked(&self, state: &mut ClientState) {
        if state.closed {
            return;
        }
        state.closed = true;
        self.flags.closed.store(true, Ordering::Release);
        self.flags.active.store(false, Ordering::Release);

        let generation = state.next_generation();
        let closing = state.processors.clone();
        self.handoff
            .publish_detached(state, Arc::new(ProcessorList::empty(generation)));
        for entry in closing.entries() {
            entry.close();
        }
        state.released.extend(closing.entries().iter().cloned());

        let ports = state.directory.ports.drain();
        let buffers = state.directory.buffers.drain();
        self.ports.store(Arc::new(Vec::new()));
        drop(state.handoff.retired.take());
        self.handoff.wake();
        self.emit(ClientEvent::Closed);
        info!(
            client = %self.name,
            processors = closing.entries().len(),
            ports = ports.len(),
            buffers = buffers.len(),
            "client closed"
        );
    }

    pub(crate) fn release_dispatcher(&self) {
        self.dispatcher_taken.store(false, Ordering::Release);
    }

    fn refresh_port_table(&self, state: &ClientState) {
        let table: Vec<Arc<Port>> = state
            .directory
            .ports
            .iter()
            .map(|(_, port)| port.clone())
            .collect();
        self.ports.store(Arc::new(table));
    }

    fn new_cell(&self, state: &ClientState, ty: ConnectorType) -> Result<ConnectorCell, ClientError> {
        Ok(ConnectorCell::new(
            ty,
            state.buffer_size,
            self.config.midi_bytes_per_frame,
            self.config.lock_memory,
        )?)
    }
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        let released = {
            let mut state = self.state.lock();
            self.close_locked(&mut state);
            std::mem::take(&mut state.released)
        };
        for entry in &released {
            entry.release();
        }
        debug!(client = %self.name, processors = released.len(), "client released");
    }
}

/// Handle to an open client. Clones share the same client.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Open a client with the given configuration.
    pub fn open(name: impl Into<String>, config: ClientConfig) -> Result<Self, ClientError> {
        init_tracing();
        let name = name.into();
        if name.is_empty() {
            return Err(ClientError::ArgInvalid("client name is empty"));
        }
        if config.buffer_size == 0 {
            return Err(ClientError::ArgInvalid("buffer size must be positive"));
        }
        let id = ClientId::next();
        let initial = Arc::new(ProcessorList::empty(0));
        let (events_tx, events_rx) = bounded(config.event_capacity.max(1));
        let state = ClientState {
            processors: initial.clone(),
            handoff: HandoffState::new(0),
            directory: ConnectorDirectory::new(id),
            buffer_size: config.buffer_size,
            next_serial: 0,
            next_generation: 0,
            released: Vec::new(),
            closed: false,
        };
        info!(
            client = %name,
            id = id.raw(),
            buffer_size = config.buffer_size,
            sample_rate = config.sample_rate,
            "client opened"
        );
        Ok(Self {
            shared: Arc::new(ClientShared {
                id,
                name,
                config,
                state: Mutex::new(state),
                handoff: Handoff::new(initial),
                ports: ArcSwap::from_pointee(Vec::new()),
                flags: ClientFlags::new(),
                frame_time: AtomicU64::new(0),
                shutdown_reason: Mutex::new(None),
                dispatcher_taken: AtomicBool::new(false),
                events_tx,
                events_rx,
            }),
        })
    }

    /// Client identity.
    pub fn id(&self) -> ClientId {
        self.shared.id
    }

    /// Client name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Configuration the client was opened with.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Take the client's dispatcher. Returns `None` while another dispatcher
    /// is alive.
    pub fn take_dispatcher(&self) -> Option<Dispatcher> {
        if self
            .shared
            .dispatcher_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let current = Arc::new(ProcessorList::empty(0));
        Some(Dispatcher::new(self.shared.clone(), current))
    }

    /// Receiver for client events.
    pub fn events(&self) -> Receiver<ClientEvent> {
        self.shared.events_rx.clone()
    }

    /// Mark the engine callback as running. From now on list changes wait
    /// for the dispatcher to confirm them.
    pub fn activate(&self) -> Result<(), ClientError> {
        let _state = self.shared.lock_running()?;
        if !self.shared.flags.active.swap(true, Ordering::AcqRel) {
            info!(client = %self.shared.name, "client activated");
        }
        Ok(())
    }

    /// Mark the engine callback as stopped and release hand-off waiters.
    pub fn deactivate(&self) -> Result<(), ClientError> {
        let _state = self.shared.lock_running()?;
        if self.shared.flags.active.swap(false, Ordering::AcqRel) {
            info!(client = %self.shared.name, "client deactivated");
        }
        self.shared.handoff.wake();
        Ok(())
    }

    /// Whether the engine callback is running.
    pub fn is_active(&self) -> bool {
        self.shared.flags.is_active()
    }

    /// Register an engine port.
    pub fn register_port(
        &self,
        name: impl Into<String>,
        ty: ConnectorType,
        direction: Direction,
    ) -> Result<PortId, ClientError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ClientError::ArgInvalid("port name is empty"));
        }
        let mut state = self.shared.lock_running()?;
        if state.directory.ports.iter().any(|(_, port)| port.name() == name) {
            return Err(ClientError::ArgInvalid("port name already registered"));
        }
        let cell = self.shared.new_cell(&state, ty)?;
        let client = self.shared.id;
        let key = state.directory.ports.insert_with(|key| {
            Arc::new(Port::new(PortId::new(client, key), name, direction, cell))
        });
        let id = PortId::new(client, key);
        self.shared.refresh_port_table(&state);
        debug!(client = %self.shared.name, port = %id, ?ty, ?direction, "registered port");
        Ok(id)
    }

    /// Unregister a port no registration is bound to.
    pub fn unregister_port(&self, id: PortId) -> Result<(), ClientError> {
        let mut state = self.shared.lock_running()?;
        let port = state
            .directory
            .port(id)
            .ok_or(ClientError::UnknownPort(id))?;
        if port.is_bound() {
            warn!(client = %self.shared.name, port = %id, "unregister refused, port is bound");
            return Err(ClientError::PortInUse(id));
        }
        state.directory.ports.remove(id.key());
        self.shared.refresh_port_table(&state);
        debug!(client = %self.shared.name, port = %id, "unregistered port");
        Ok(())
    }

    /// Create a ProcessBuffer sized for the current buffer size.
    pub fn create_process_buffer(&self, ty: ConnectorType) -> Result<BufferId, ClientError> {
        let mut state = self.shared.lock_running()?;
        let cell = self.shared.new_cell(&state, ty)?;
        let client = self.shared.id;
        let key = state
            .directory
            .buffers
            .insert_with(|key| Arc::new(ProcessBuffer::new(BufferId::new(client, key), cell)));
        let id = BufferId::new(client, key);
        debug!(client = %self.shared.name, buffer = %id, ?ty, "created process buffer");
        Ok(id)
    }

    /// Release a ProcessBuffer no registration reads from. The handle stops
    /// resolving immediately.
    pub fn release_process_buffer(&self, id: BufferId) -> Result<(), ClientError> {
        let mut state = self.shared.lock_running()?;
        let buffer = state
            .directory
            .buffer(id)
            .ok_or(ClientError::UnknownBuffer(id))?;
        if buffer.usage.snapshot().inp_usage > 0 {
            warn!(client = %self.shared.name, buffer = %id, "release refused, buffer still read");
            return Err(ClientError::BufferInUse(id));
        }
        state.directory.buffers.remove(id.key());
        debug!(client = %self.shared.name, buffer = %id, "released process buffer");
        Ok(())
    }

    /// Usage and activation counters of a ProcessBuffer.
    pub fn buffer_usage(&self, id: BufferId) -> Result<BufferUsage, ClientError> {
        let state = self.shared.state.lock();
        state
            .directory
            .buffer(id)
            .map(|buffer| buffer.usage.snapshot())
            .ok_or(ClientError::UnknownBuffer(id))
    }

    /// What `connector` resolves to.
    pub fn classify(&self, connector: impl Into<Connector>) -> ConnectorKind {
        self.shared.state.lock().directory.classify(connector.into())
    }

    /// Content type of `connector`, if it resolves.
    pub fn connector_type(&self, connector: impl Into<Connector>) -> Option<ConnectorType> {
        self.shared
            .state
            .lock()
            .directory
            .connector_type(connector.into())
    }

    /// Directions `connector` can be bound with by a new registration.
    pub fn possible_directions(&self, connector: impl Into<Connector>) -> Directions {
        self.shared
            .state
            .lock()
            .directory
            .possible_directions(connector.into())
    }

    /// Register a processing unit. `connectors` are bound to the descriptor's
    /// slots in order. The unit starts deactivated.
    pub fn register(
        &self,
        descriptor: ProcessorDescriptor,
        connectors: &[Connector],
        processor: impl Processor + 'static,
    ) -> Result<ProcessorId, ClientError> {
        self.register_boxed(descriptor, connectors, Box::new(processor))
    }

    /// [`register`](Self::register) for an already boxed processor.
    pub fn register_boxed(
        &self,
        descriptor: ProcessorDescriptor,
        connectors: &[Connector],
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorId, ClientError> {
        self.shared.register(descriptor, connectors, processor)
    }

    /// Remove a registration. Fails while a ProcessBuffer it writes is read.
    pub fn unregister(&self, id: ProcessorId) -> Result<(), ClientError> {
        self.shared.unregister(id)
    }

    /// Start running a registration. Idempotent.
    pub fn activate_processor(&self, id: ProcessorId) -> Result<(), ClientError> {
        self.shared.activate_processor(id)
    }

    /// Stop running a registration. Idempotent.
    pub fn deactivate_processor(&self, id: ProcessorId) -> Result<(), ClientError> {
        self.shared.deactivate_processor(id)
    }

    /// Registrations in the published list, in order.
    pub fn processors(&self) -> Vec<ProcessorInfo> {
        self.shared
            .handoff
            .snapshot()
            .entries()
            .iter()
            .map(|entry| entry.info())
            .collect()
    }

    /// Registered ports.
    pub fn ports(&self) -> Vec<PortInfo> {
        self.shared
            .ports
            .load()
            .iter()
            .map(|port| PortInfo::from(port.as_ref()))
            .collect()
    }

    /// Engine notification that the client was shut down. Safe to call from
    /// any thread; waiters in a hand-off return with an error.
    pub fn notify_shutdown(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(client = %self.shared.name, "engine shutdown notification: {reason}");
        self.shared.shutdown_reason.lock().get_or_insert(reason);
        self.shared.flags.shutdown.store(true, Ordering::Release);
        self.shared.handoff.wake();
    }

    /// Tear the client down if a shutdown is pending. Returns the diagnostic
    /// when this call performed the teardown.
    pub fn handle_shutdown(&self) -> Option<String> {
        let mut state = self.shared.state.lock();
        if state.closed || !self.shared.flags.shutdown_requested() {
            return None;
        }
        Some(self.shared.teardown(&mut state))
    }

    /// Whether a shutdown was requested or performed.
    pub fn is_shutdown(&self) -> bool {
        self.shared.flags.shutdown_requested()
    }

    /// Whether a severe error occurred.
    pub fn is_severe(&self) -> bool {
        self.shared.flags.is_severe()
    }

    /// Whether the client is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.flags.closed.load(Ordering::Acquire)
    }

    /// Registration and code of the first processing fault. `None` when no
    /// processor failed, including severe errors raised by allocation.
    pub fn fault(&self) -> Option<(ProcessorId, i32)> {
        let flags = &self.shared.flags;
        if !flags.is_severe() {
            return None;
        }
        let serial = flags.fault_serial.load(Ordering::Acquire);
        if serial == 0 {
            return None;
        }
        let code = flags.fault_code.load(Ordering::Acquire);
        Some((ProcessorId::new(self.shared.id, serial), code))
    }

    /// Current engine buffer size.
    pub fn buffer_size(&self) -> u32 {
        self.shared.state.lock().buffer_size
    }

    /// Engine sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.shared.config.sample_rate
    }

    /// Frame time at the start of the next cycle.
    pub fn process_begin_frame_time(&self) -> u64 {
        self.shared.frame_time.load(Ordering::Acquire)
    }

    /// Status snapshot for control surfaces.
    pub fn status(&self) -> ClientStatus {
        let (buffer_size, buffers) = {
            let state = self.shared.state.lock();
            let buffers = state
                .directory
                .buffers
                .iter()
                .map(|(_, buffer)| BufferInfo {
                    id: buffer.id(),
                    ty: buffer.cell.ty(),
                    usage: buffer.usage.snapshot(),
                })
                .collect();
            (state.buffer_size, buffers)
        };
        let flags = &self.shared.flags;
        ClientStatus {
            name: self.shared.name.clone(),
            buffer_size,
            sample_rate: self.shared.config.sample_rate,
            frame_time: self.process_begin_frame_time(),
            active: flags.is_active(),
            shutdown: flags.shutdown_requested(),
            severe: flags.is_severe(),
            closed: self.is_closed(),
            processors: self.processors(),
            ports: self.ports(),
            buffers,
        }
    }

    /// Capability table exposing this client at [`API_VERSION`] and, port
    /// only, at [`LEGACY_API_VERSION`].
    pub fn capabilities(&self) -> CapabilityTable {
        let host: Arc<dyn ProcessorHost> = Arc::new(self.clone());
        let legacy: Arc<dyn ProcessorHost> = Arc::new(LegacyHost(self.clone()));
        CapabilityTable::new(API_VERSION, host).with_revision(LEGACY_API_VERSION, legacy)
    }

    /// Close the client: every registration receives `client_closed`, ports
    /// and ProcessBuffers are released. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        if self.shared.flags.shutdown_requested() {
            self.shared.teardown(&mut state);
        } else {
            self.shared.close_locked(&mut state);
        }
    }
}
