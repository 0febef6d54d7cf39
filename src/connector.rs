//! Connector handles and the directory that classifies and validates them.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arena::{SlotArena, SlotKey};
use crate::error::BindingErrorKind;
use crate::port::Port;
use crate::procbuf::{ConnectorCell, ProcessBuffer, UsageCounters};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an opened client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a port registered on a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId {
    client: ClientId,
    key: SlotKey,
}

/// Handle to a ProcessBuffer created on a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId {
    client: ClientId,
    key: SlotKey,
}

macro_rules! handle_impls {
    ($name:ident, $prefix:literal) => {
        impl $name {
            pub(crate) fn new(client: ClientId, key: SlotKey) -> Self {
                Self { client, key }
            }

            /// Client the handle belongs to.
            pub fn client(&self) -> ClientId {
                self.client
            }

            pub(crate) fn key(&self) -> SlotKey {
                self.key
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!($prefix, "{}:{}.{}"),
                    self.client,
                    self.key.index(),
                    self.key.generation()
                )
            }
        }
    };
}

handle_impls!(PortId, "port#");
handle_impls!(BufferId, "buffer#");

/// Opaque connector handle: a native port or a ProcessBuffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Connector {
    /// Engine-facing port.
    Port(PortId),
    /// Intra-client ProcessBuffer.
    Buffer(BufferId),
}

impl From<PortId> for Connector {
    fn from(id: PortId) -> Self {
        Connector::Port(id)
    }
}

impl From<BufferId> for Connector {
    fn from(id: BufferId) -> Self {
        Connector::Buffer(id)
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connector::Port(id) => id.fmt(f),
            Connector::Buffer(id) => id.fmt(f),
        }
    }
}

/// What a connector handle currently resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorKind {
    /// Stale, released or foreign handle.
    None,
    /// A live port.
    Port,
    /// A live ProcessBuffer.
    ProcessBuffer,
}

/// Content carried by a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectorType {
    /// Mono `f32` samples, one per frame.
    Audio,
    /// Timestamped MIDI events.
    Midi,
}

/// Direction of a binding, seen from the processing unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The unit reads from the connector.
    In,
    /// The unit writes to the connector.
    Out,
}

/// Set of directions a connector can be bound with right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Directions(u8);

impl Directions {
    /// No direction is usable.
    pub const NONE: Self = Self(0);
    /// Only reading is possible.
    pub const IN: Self = Self(1);
    /// Only writing is possible.
    pub const OUT: Self = Self(2);
    /// Both directions are possible.
    pub const BOTH: Self = Self(3);

    /// Whether `direction` is part of the set.
    pub fn contains(self, direction: Direction) -> bool {
        let bit = match direction {
            Direction::In => Self::IN.0,
            Direction::Out => Self::OUT.0,
        };
        self.0 & bit != 0
    }

    /// Whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Directions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Resolved target of a binding. Holding the `Arc` keeps the storage alive
/// for as long as any processor list references it.
#[derive(Clone)]
pub(crate) enum BoundConnector {
    Port(Arc<Port>),
    Buffer(Arc<ProcessBuffer>),
}

impl BoundConnector {
    pub(crate) fn cell(&self) -> &ConnectorCell {
        match self {
            BoundConnector::Port(port) => &port.cell,
            BoundConnector::Buffer(buffer) => &buffer.cell,
        }
    }

    pub(crate) fn usage(&self) -> &UsageCounters {
        match self {
            BoundConnector::Port(port) => &port.usage,
            BoundConnector::Buffer(buffer) => &buffer.usage,
        }
    }

    pub(crate) fn handle(&self) -> Connector {
        match self {
            BoundConnector::Port(port) => Connector::Port(port.id()),
            BoundConnector::Buffer(buffer) => Connector::Buffer(buffer.id()),
        }
    }

    pub(crate) fn as_buffer(&self) -> Option<&Arc<ProcessBuffer>> {
        match self {
            BoundConnector::Buffer(buffer) => Some(buffer),
            BoundConnector::Port(_) => None,
        }
    }
}

/// Live ports and ProcessBuffers owned by one client.
pub(crate) struct ConnectorDirectory {
    client: ClientId,
    pub(crate) ports: SlotArena<Arc<Port>>,
    pub(crate) buffers: SlotArena<Arc<ProcessBuffer>>,
}

impl ConnectorDirectory {
    pub(crate) fn new(client: ClientId) -> Self {
        Self {
            client,
            ports: SlotArena::new(),
            buffers: SlotArena::new(),
        }
    }

    pub(crate) fn port(&self, id: PortId) -> Option<&Arc<Port>> {
        if id.client() != self.client {
            return None;
        }
        self.ports.get(id.key())
    }

    pub(crate) fn buffer(&self, id: BufferId) -> Option<&Arc<ProcessBuffer>> {
        if id.client() != self.client {
            return None;
        }
        self.buffers.get(id.key())
    }

    pub(crate) fn classify(&self, connector: Connector) -> ConnectorKind {
        match connector {
            Connector::Port(id) if self.port(id).is_some() => ConnectorKind::Port,
            Connector::Buffer(id) if self.buffer(id).is_some() => ConnectorKind::ProcessBuffer,
            _ => ConnectorKind::None,
        }
    }

    pub(crate) fn connector_type(&self, connector: Connector) -> Option<ConnectorType> {
        match connector {
            Connector::Port(id) => self.port(id).map(|port| port.cell.ty()),
            Connector::Buffer(id) => self.buffer(id).map(|buffer| buffer.cell.ty()),
        }
    }

    pub(crate) fn possible_directions(&self, connector: Connector) -> Directions {
        match connector {
            Connector::Port(id) => self
                .port(id)
                .map(|port| port.possible_directions())
                .unwrap_or(Directions::NONE),
            Connector::Buffer(id) => match self.buffer(id) {
                // A reader may only depend on a buffer that already has its writer.
                Some(buffer) if buffer.usage.snapshot().out_usage == 0 => Directions::OUT,
                Some(_) => Directions::IN,
                None => Directions::NONE,
            },
        }
    }

    /// Check that `connector` can be bound with `direction` and `ty` by a new
    /// registration of this client and resolve it.
    ///
    /// A handle of another client can only be recognised by its owner, so it
    /// reports `ClientMismatch`. Own handles are checked for liveness, then
    /// direction, then type.
    pub(crate) fn resolve(
        &self,
        connector: Connector,
        direction: Direction,
        ty: ConnectorType,
    ) -> Result<BoundConnector, BindingErrorKind> {
        let owner = match connector {
            Connector::Port(id) => id.client(),
            Connector::Buffer(id) => id.client(),
        };
        if owner != self.client {
            return Err(BindingErrorKind::ClientMismatch);
        }
        let bound = match connector {
            Connector::Port(id) => self.port(id).cloned().map(BoundConnector::Port),
            Connector::Buffer(id) => self.buffer(id).cloned().map(BoundConnector::Buffer),
        }
        .ok_or(BindingErrorKind::ConnectorInvalid)?;
        if !self.possible_directions(connector).contains(direction) {
            return Err(BindingErrorKind::WrongDirection);
        }
        if bound.cell().ty() != ty {
            return Err(BindingErrorKind::WrongConnectorType);
        }
        Ok(bound)
    }
}
