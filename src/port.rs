//! In-process stand-in for engine ports.
//!
//! A port has a fixed direction relative to the client: input ports are filled
//! by the engine before a cycle and can only be bound as `In`; output ports are
//! read by the engine after a cycle and accept exactly one `Out` binding.
use crate::connector::{ConnectorType, Direction, Directions, PortId};
use crate::procbuf::{BufferUsage, ConnectorCell, UsageCounters};

pub(crate) struct Port {
    id: PortId,
    name: String,
    direction: Direction,
    pub(crate) cell: ConnectorCell,
    pub(crate) usage: UsageCounters,
}

impl Port {
    pub(crate) fn new(id: PortId, name: String, direction: Direction, cell: ConnectorCell) -> Self {
        Self {
            id,
            name,
            direction,
            cell,
            usage: UsageCounters::default(),
        }
    }

    pub(crate) fn id(&self) -> PortId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn possible_directions(&self) -> Directions {
        match self.direction {
            Direction::In => Directions::IN,
            Direction::Out if self.usage.snapshot().out_usage == 0 => Directions::OUT,
            Direction::Out => Directions::NONE,
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        let usage = self.usage.snapshot();
        usage.out_usage > 0 || usage.inp_usage > 0
    }
}

/// Descriptive snapshot of a registered port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortInfo {
    /// Port handle.
    pub id: PortId,
    /// Port name.
    pub name: String,
    /// Content type.
    pub ty: ConnectorType,
    /// Direction relative to the client.
    pub direction: Direction,
    /// Binding counters.
    pub usage: BufferUsage,
}

impl From<&Port> for PortInfo {
    fn from(port: &Port) -> Self {
        Self {
            id: port.id,
            name: port.name.clone(),
            ty: port.cell.ty(),
            direction: port.direction,
            usage: port.usage.snapshot(),
        }
    }
}
