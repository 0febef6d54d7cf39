//! Authoritative processor list and the register / unregister / activate /
//! deactivate operations.
//!
//! The list is copy-on-write: every change builds a new [`ProcessorList`] and
//! hands it to the hand-off, so the list the audio thread iterates is never
//! mutated in place. Connector counters are only touched while the client
//! mutex is held.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::client::ClientShared;
use crate::connector::{BoundConnector, ClientId, Connector, ConnectorType, Direction};
use crate::error::{BindingErrorKind, ClientError};
use crate::processor::{MAX_CONNECTORS, Processor, ProcessorDescriptor};

/// Handle to a registered processing unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId {
    client: ClientId,
    serial: u64,
}

impl ProcessorId {
    pub(crate) fn new(client: ClientId, serial: u64) -> Self {
        Self { client, serial }
    }

    /// Client the registration belongs to.
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Registration serial, unique within the client.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "processor#{}:{}", self.client, self.serial)
    }
}

/// One bound connector slot of a registration. Immutable once registered.
pub(crate) struct ConnectorBinding {
    pub(crate) direction: Direction,
    pub(crate) ty: ConnectorType,
    pub(crate) target: BoundConnector,
}

pub(crate) struct ProcessorEntry {
    id: ProcessorId,
    name: String,
    pub(crate) bindings: Vec<ConnectorBinding>,
    pub(crate) processor: Mutex<Box<dyn Processor>>,
    activated: AtomicBool,
    needs_clear: AtomicBool,
    notified_frames: AtomicU32,
    closed: AtomicBool,
}

impl ProcessorEntry {
    fn new(
        id: ProcessorId,
        name: String,
        bindings: Vec<ConnectorBinding>,
        processor: Box<dyn Processor>,
        notified_frames: u32,
    ) -> Self {
        Self {
            id,
            name,
            bindings,
            processor: Mutex::new(processor),
            activated: AtomicBool::new(false),
            needs_clear: AtomicBool::new(true),
            notified_frames: AtomicU32::new(notified_frames),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ProcessorId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Consume the pending output clear, if any.
    pub(crate) fn take_needs_clear(&self) -> bool {
        self.needs_clear.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn notified_frames(&self) -> u32 {
        self.notified_frames.load(Ordering::Acquire)
    }

    pub(crate) fn set_notified_frames(&self, frames: u32) {
        self.notified_frames.store(frames, Ordering::Release);
    }

    pub(crate) fn outputs(&self) -> impl Iterator<Item = &ConnectorBinding> {
        self.bindings
            .iter()
            .filter(|binding| binding.direction == Direction::Out)
    }

    fn release_activation(&self) {
        for binding in &self.bindings {
            binding.target.usage().release(binding.direction, true);
        }
    }

    fn release_usage(&self) {
        for binding in &self.bindings {
            binding.target.usage().release(binding.direction, false);
        }
    }

    /// Deliver `client_closed` once and drop every counter this entry holds.
    pub(crate) fn close(&self) {
        let mut processor = self.processor.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.activated.swap(false, Ordering::AcqRel) {
            self.release_activation();
        }
        self.release_usage();
        processor.client_closed();
    }

    pub(crate) fn release(&self) {
        self.processor.lock().client_released();
    }

    pub(crate) fn info(&self) -> ProcessorInfo {
        ProcessorInfo {
            id: self.id,
            name: self.name.clone(),
            activated: self.is_activated(),
            buffer_frames: self.notified_frames(),
            connectors: self
                .bindings
                .iter()
                .map(|binding| (binding.direction, binding.target.handle()))
                .collect(),
        }
    }
}

/// Immutable snapshot of the registered units, in registration order.
pub(crate) struct ProcessorList {
    generation: u64,
    entries: Vec<Arc<ProcessorEntry>>,
}

impl ProcessorList {
    pub(crate) fn empty(generation: u64) -> Self {
        Self {
            generation,
            entries: Vec::new(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn entries(&self) -> &[Arc<ProcessorEntry>] {
        &self.entries
    }

    pub(crate) fn find(&self, id: ProcessorId) -> Option<&Arc<ProcessorEntry>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    fn with_added(&self, entry: Arc<ProcessorEntry>, generation: u64) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend(self.entries.iter().cloned());
        entries.push(entry);
        Self {
            generation,
            entries,
        }
    }

    fn without(&self, id: ProcessorId, generation: u64) -> Self {
        Self {
            generation,
            entries: self
                .entries
                .iter()
                .filter(|entry| entry.id != id)
                .cloned()
                .collect(),
        }
    }
}

/// Descriptive snapshot of a registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorInfo {
    /// Registration handle.
    pub id: ProcessorId,
    /// Name given at registration.
    pub name: String,
    /// Whether the unit is processing.
    pub activated: bool,
    /// Buffer size the unit was last notified of.
    pub buffer_frames: u32,
    /// Bound connectors in slot order.
    pub connectors: Vec<(Direction, Connector)>,
}

impl ClientShared {
    pub(crate) fn register(
        &self,
        descriptor: ProcessorDescriptor,
        connectors: &[Connector],
        mut processor: Box<dyn Processor>,
    ) -> Result<ProcessorId, ClientError> {
        if descriptor.name.is_empty() {
            return Err(ClientError::ArgInvalid("processor name is empty"));
        }
        if descriptor.slots.len() > MAX_CONNECTORS {
            return Err(ClientError::ArgInvalid("too many connector slots"));
        }
        if connectors.len() != descriptor.slots.len() {
            return Err(ClientError::ArgInvalid(
                "connector count does not match the declared slots",
            ));
        }

        let mut state = self.lock_running()?;

        let mut bindings: Vec<ConnectorBinding> = Vec::with_capacity(connectors.len());
        for (index, (slot, connector)) in descriptor.slots.iter().zip(connectors).enumerate() {
            let reused = bindings.iter().any(|earlier| {
                earlier.target.handle() == *connector
                    && (earlier.direction == Direction::Out || slot.direction == Direction::Out)
            });
            let resolved = if reused {
                Err(BindingErrorKind::WrongDirection)
            } else {
                state.directory.resolve(*connector, slot.direction, slot.ty)
            };
            let target = resolved.map_err(|kind| {
                warn!(
                    processor = %descriptor.name,
                    index,
                    %connector,
                    "rejecting connector binding: {kind}"
                );
                ClientError::Binding { index, kind }
            })?;
            bindings.push(ConnectorBinding {
                direction: slot.direction,
                ty: slot.ty,
                target,
            });
        }

        let frames = state.buffer_size;
        if let Err(fault) = processor.buffer_size_changed(frames) {
            warn!(
                processor = %descriptor.name,
                frames,
                code = fault.0,
                "processor rejected buffer size, registration rolled back"
            );
            return Err(ClientError::BufferSizeRejected {
                name: descriptor.name,
                code: fault.0,
            });
        }

        let id = ProcessorId::new(self.id, state.next_serial());
        let entry = Arc::new(ProcessorEntry::new(
            id,
            descriptor.name,
            bindings,
            processor,
            frames,
        ));
        for binding in &entry.bindings {
            binding.target.usage().acquire(binding.direction, false);
        }
        let generation = state.next_generation();
        let list = state.processors.with_added(entry.clone(), generation);
        self.publish(&mut state, list)?;
        debug!(processor = %id, name = entry.name(), generation, "registered processor");
        Ok(id)
    }

    pub(crate) fn unregister(&self, id: ProcessorId) -> Result<(), ClientError> {
        let mut state = self.lock_running()?;
        let entry = state
            .processors
            .find(id)
            .cloned()
            .ok_or(ClientError::NotRegistered)?;
        for binding in entry.outputs() {
            if let Some(buffer) = binding.target.as_buffer() {
                if buffer.usage.snapshot().inp_usage > 0 {
                    warn!(processor = %id, buffer = %buffer.id(), "unregister refused, buffer still read");
                    return Err(ClientError::BufferInUse(buffer.id()));
                }
            }
        }

        let generation = state.next_generation();
        let list = state.processors.without(id, generation);
        self.publish(&mut state, list)?;
        if entry.activated.swap(false, Ordering::AcqRel) {
            entry.release_activation();
        }
        entry.release_usage();
        debug!(processor = %id, name = entry.name(), generation, "unregistered processor");
        Ok(())
    }

    pub(crate) fn activate_processor(&self, id: ProcessorId) -> Result<(), ClientError> {
        let state = self.lock_running()?;
        let entry = state.processors.find(id).ok_or(ClientError::NotRegistered)?;
        if entry.is_activated() {
            return Ok(());
        }
        for binding in &entry.bindings {
            if binding.direction != Direction::In {
                continue;
            }
            if let Some(buffer) = binding.target.as_buffer() {
                if buffer.usage.snapshot().out_active < 1 {
                    warn!(processor = %id, buffer = %buffer.id(), "activation refused, no active producer");
                    return Err(ClientError::NoProducer(buffer.id()));
                }
            }
        }
        for binding in &entry.bindings {
            binding.target.usage().acquire(binding.direction, true);
        }
        entry.activated.store(true, Ordering::Release);
        info!(processor = %id, name = entry.name(), "activated processor");
        Ok(())
    }

    pub(crate) fn deactivate_processor(&self, id: ProcessorId) -> Result<(), ClientError> {
        let state = self.lock_running()?;
        let entry = state.processors.find(id).ok_or(ClientError::NotRegistered)?;
        if !entry.is_activated() {
            return Ok(());
        }
        for binding in entry.outputs() {
            if let Some(buffer) = binding.target.as_buffer() {
                if buffer.usage.snapshot().inp_active > 0 {
                    warn!(processor = %id, buffer = %buffer.id(), "deactivation refused, buffer still read");
                    return Err(ClientError::BufferActive(buffer.id()));
                }
            }
        }
        entry.needs_clear.store(true, Ordering::Release);
        entry.activated.store(false, Ordering::Release);
        entry.release_activation();
        info!(processor = %id, name = entry.name(), "deactivated processor");
        Ok(())
    }
}
