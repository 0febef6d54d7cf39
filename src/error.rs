//! Error types surfaced by the client and the registration API.

use crate::connector::{BufferId, PortId};

/// Reason a single connector binding was refused during registration.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingErrorKind {
    /// Handle does not resolve to a live port or process buffer.
    #[error("invalid connector")]
    ConnectorInvalid,
    /// Connector belongs to a different client.
    #[error("connector belongs to another client")]
    ClientMismatch,
    /// Requested direction is not usable on this connector right now.
    #[error("wrong connector direction")]
    WrongDirection,
    /// Connector carries a different content type.
    #[error("wrong connector type")]
    WrongConnectorType,
}

/// Connector storage could not be allocated.
#[derive(thiserror::Error, Debug)]
#[error("cannot allocate {bytes} bytes of connector storage")]
pub struct AllocError {
    /// Requested arena size in bytes.
    pub bytes: usize,
    /// Underlying mapping failure, if the arena was memory mapped.
    #[source]
    pub source: Option<std::io::Error>,
}

/// Error enumeration surfaced by control-thread operations.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// Call arguments were malformed (missing name, connector arity mismatch).
    #[error("invalid arguments: {0}")]
    ArgInvalid(&'static str),
    /// A connector binding failed validation.
    #[error("connector {index}: {kind}")]
    Binding {
        /// Position of the failing connector in the request.
        index: usize,
        /// What was wrong with it.
        kind: BindingErrorKind,
    },
    /// A processor refused the buffer size while being registered.
    #[error("error {code} from buffer size callback for processor '{name}'")]
    BufferSizeRejected {
        /// Name of the processor that rejected the size.
        name: String,
        /// Code returned by the callback.
        code: i32,
    },
    /// Connector storage allocation failed.
    #[error(transparent)]
    OutOfMemory(#[from] AllocError),
    /// Registration handle is not part of the current processor list.
    #[error("processor is not registered")]
    NotRegistered,
    /// Process buffer output is still read by another registration.
    #[error("process buffer {0} data is used by another registered processor")]
    BufferInUse(BufferId),
    /// Reader activation without an activated producer.
    #[error("process buffer {0} has no activated processor for providing data")]
    NoProducer(BufferId),
    /// Producer deactivation while readers are still active.
    #[error("process buffer {0} data is used by another activated processor")]
    BufferActive(BufferId),
    /// Port is still bound by a registration.
    #[error("port {0} is used by a registered processor")]
    PortInUse(PortId),
    /// Port handle does not resolve.
    #[error("unknown port {0}")]
    UnknownPort(PortId),
    /// Process buffer handle does not resolve.
    #[error("unknown process buffer {0}")]
    UnknownBuffer(BufferId),
    /// The client was shut down, either by the engine or by a severe error.
    #[error("client shutdown: {0}")]
    Shutdown(String),
    /// The client has been closed.
    #[error("client is closed")]
    Closed,
}
