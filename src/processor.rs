//! Contract between the client and processing units.
use std::fmt;

use crate::connector::{ConnectorType, Direction};
use crate::dispatch::Cycle;

/// Maximum connector slots a single processing unit may declare.
pub const MAX_CONNECTORS: usize = 64;

/// Non-zero return code of a processor callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessorFault(pub i32);

impl fmt::Display for ProcessorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}", self.0)
    }
}

impl std::error::Error for ProcessorFault {}

/// A processing unit attached to a client.
///
/// `process` runs on the real-time thread and must not block or allocate.
/// Every other callback runs on a control thread or on the engine's
/// notification thread while the client mutex is held.
pub trait Processor: Send {
    /// Handle one cycle. Returning an error shuts the client down.
    fn process(&mut self, cycle: &mut Cycle<'_>) -> Result<(), ProcessorFault>;

    /// Called on registration and whenever the engine buffer size changes.
    /// Rejecting the size during registration aborts the registration;
    /// rejecting it later shuts the client down.
    fn buffer_size_changed(&mut self, frames: u32) -> Result<(), ProcessorFault> {
        let _ = frames;
        Ok(())
    }

    /// The client was closed or shut down. Called exactly once.
    fn client_closed(&mut self) {}

    /// The last reference to the closed client went away. Called exactly
    /// once, after [`client_closed`](Self::client_closed).
    fn client_released(&mut self) {}
}

/// Declared connector slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotSpec {
    /// Whether the unit reads or writes the slot.
    pub direction: Direction,
    /// Content the slot carries.
    pub ty: ConnectorType,
}

/// Name and connector slots of a processing unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessorDescriptor {
    /// Human-readable name used in diagnostics.
    pub name: String,
    /// Slots in binding order.
    pub slots: Vec<SlotSpec>,
}

impl ProcessorDescriptor {
    /// Start a descriptor with no slots.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: Vec::new(),
        }
    }

    /// Append an input slot.
    pub fn input(mut self, ty: ConnectorType) -> Self {
        self.slots.push(SlotSpec {
            direction: Direction::In,
            ty,
        });
        self
    }

    /// Append an output slot.
    pub fn output(mut self, ty: ConnectorType) -> Self {
        self.slots.push(SlotSpec {
            direction: Direction::Out,
            ty,
        });
        self
    }
}
