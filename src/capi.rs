//! Versioned capability table for processing-unit implementations.
//!
//! Units written against one revision of the host interface look it up by
//! major version and the lowest minor version they need; the table answers
//! with the newest compatible revision it carries.
use std::fmt;
use std::sync::Arc;

use tracing::{error, info};

use crate::client::Client;
use crate::connector::{Connector, ConnectorKind, ConnectorType, Directions};
use crate::error::{BindingErrorKind, ClientError};
use crate::processor::{Processor, ProcessorDescriptor};
use crate::registry::ProcessorId;

/// Semantic version of the host interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiVersion {
    /// Incompatible revisions differ here.
    pub major: u16,
    /// Backwards compatible additions.
    pub minor: u16,
    /// Fixes without interface changes.
    pub patch: u16,
}

impl ApiVersion {
    /// Build a version triple.
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether a caller needing `major.min_minor` can use this revision.
    pub fn satisfies(&self, major: u16, min_minor: u16) -> bool {
        self.major == major && self.minor >= min_minor
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Host interface revision implemented by [`Client`].
pub const API_VERSION: ApiVersion = ApiVersion::new(1, 2, 0);

/// Older, port-only host interface revision. ProcessBuffers do not exist in
/// it: their handles classify as [`ConnectorKind::None`] and cannot be bound.
pub const LEGACY_API_VERSION: ApiVersion = ApiVersion::new(0, 1, 0);

/// Object-safe host interface handed to processing-unit implementations.
pub trait ProcessorHost: Send + Sync {
    /// What `connector` resolves to.
    fn classify(&self, connector: Connector) -> ConnectorKind;
    /// Content type of `connector`.
    fn connector_type(&self, connector: Connector) -> Option<ConnectorType>;
    /// Directions `connector` can currently be bound with.
    fn possible_directions(&self, connector: Connector) -> Directions;
    /// Register a processing unit.
    fn register(
        &self,
        descriptor: ProcessorDescriptor,
        connectors: &[Connector],
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorId, ClientError>;
    /// Remove a registration.
    fn unregister(&self, id: ProcessorId) -> Result<(), ClientError>;
    /// Start running a registration.
    fn activate(&self, id: ProcessorId) -> Result<(), ClientError>;
    /// Stop running a registration.
    fn deactivate(&self, id: ProcessorId) -> Result<(), ClientError>;
    /// Frame time at the start of the next cycle.
    fn process_begin_frame_time(&self) -> u64;
    /// Whether the host client is closed.
    fn is_closed(&self) -> bool;
    /// Report an error on the host's log.
    fn log_error(&self, message: &str);
    /// Report progress on the host's log.
    fn log_info(&self, message: &str);
}

impl ProcessorHost for Client {
    fn classify(&self, connector: Connector) -> ConnectorKind {
        Client::classify(self, connector)
    }

    fn connector_type(&self, connector: Connector) -> Option<ConnectorType> {
        Client::connector_type(self, connector)
    }

    fn possible_directions(&self, connector: Connector) -> Directions {
        Client::possible_directions(self, connector)
    }

    fn register(
        &self,
        descriptor: ProcessorDescriptor,
        connectors: &[Connector],
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorId, ClientError> {
        self.register_boxed(descriptor, connectors, processor)
    }

    fn unregister(&self, id: ProcessorId) -> Result<(), ClientError> {
        Client::unregister(self, id)
    }

    fn activate(&self, id: ProcessorId) -> Result<(), ClientError> {
        self.activate_processor(id)
    }

    fn deactivate(&self, id: ProcessorId) -> Result<(), ClientError> {
        self.deactivate_processor(id)
    }

    fn process_begin_frame_time(&self) -> u64 {
        Client::process_begin_frame_time(self)
    }

    fn is_closed(&self) -> bool {
        Client::is_closed(self)
    }

    fn log_error(&self, message: &str) {
        error!(client = self.name(), "{message}");
    }

    fn log_info(&self, message: &str) {
        info!(client = self.name(), "{message}");
    }
}

/// [`Client`] as seen by units built against [`LEGACY_API_VERSION`].
pub(crate) struct LegacyHost(pub(crate) Client);

impl LegacyHost {
    fn port_only(connector: Connector) -> Option<Connector> {
        match connector {
            Connector::Port(_) => Some(connector),
            Connector::Buffer(_) => None,
        }
    }
}

impl ProcessorHost for LegacyHost {
    fn classify(&self, connector: Connector) -> ConnectorKind {
        Self::port_only(connector)
            .map(|port| self.0.classify(port))
            .unwrap_or(ConnectorKind::None)
    }

    fn connector_type(&self, connector: Connector) -> Option<ConnectorType> {
        Self::port_only(connector).and_then(|port| self.0.connector_type(port))
    }

    fn possible_directions(&self, connector: Connector) -> Directions {
        Self::port_only(connector)
            .map(|port| self.0.possible_directions(port))
            .unwrap_or(Directions::NONE)
    }

    fn register(
        &self,
        descriptor: ProcessorDescriptor,
        connectors: &[Connector],
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorId, ClientError> {
        if let Some(index) = connectors
            .iter()
            .position(|connector| Self::port_only(*connector).is_none())
        {
            return Err(ClientError::Binding {
                index,
                kind: BindingErrorKind::ConnectorInvalid,
            });
        }
        self.0.register_boxed(descriptor, connectors, processor)
    }

    fn unregister(&self, id: ProcessorId) -> Result<(), ClientError> {
        self.0.unregister(id)
    }

    fn activate(&self, id: ProcessorId) -> Result<(), ClientError> {
        self.0.activate_processor(id)
    }

    fn deactivate(&self, id: ProcessorId) -> Result<(), ClientError> {
        self.0.deactivate_processor(id)
    }

    fn process_begin_frame_time(&self) -> u64 {
        self.0.process_begin_frame_time()
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    fn log_error(&self, message: &str) {
        ProcessorHost::log_error(&self.0, message);
    }

    fn log_info(&self, message: &str) {
        ProcessorHost::log_info(&self.0, message);
    }
}

/// One revision of the host interface.
#[derive(Clone)]
pub struct Revision {
    /// Version implemented by `host`.
    pub version: ApiVersion,
    /// The interface itself.
    pub host: Arc<dyn ProcessorHost>,
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Revision")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Set of host interface revisions that coexist.
#[derive(Clone, Debug, Default)]
pub struct CapabilityTable {
    revisions: Vec<Revision>,
}

impl CapabilityTable {
    /// Table with a single revision.
    pub fn new(version: ApiVersion, host: Arc<dyn ProcessorHost>) -> Self {
        Self {
            revisions: vec![Revision { version, host }],
        }
    }

    /// Add another revision.
    pub fn with_revision(mut self, version: ApiVersion, host: Arc<dyn ProcessorHost>) -> Self {
        self.revisions.push(Revision { version, host });
        self
    }

    /// Versions carried by the table.
    pub fn versions(&self) -> Vec<ApiVersion> {
        self.revisions.iter().map(|revision| revision.version).collect()
    }

    /// Newest revision with the same `major` and a minor of at least
    /// `min_minor`. Ties on minor go to the higher patch.
    pub fn select(&self, major: u16, min_minor: u16) -> Option<&Revision> {
        self.revisions
            .iter()
            .filter(|revision| revision.version.satisfies(major, min_minor))
            .max_by_key(|revision| (revision.version.minor, revision.version.patch))
    }
}
