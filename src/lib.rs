#![deny(missing_docs)]

//! Real-time safe processor registry for a single audio client.
//!
//! Processing units are attached to and detached from a [`Client`] while its
//! audio callback keeps running. Control threads edit a copy-on-write
//! processor list and hand it to the audio thread through a published /
//! confirmed hand-off; the audio thread, driven through the client's
//! [`Dispatcher`], never blocks, allocates or frees while picking up a new
//! list. Units exchange data inside the client through ProcessBuffers, fixed
//! capacity arenas carrying audio samples or timestamped MIDI events.

use std::sync::Once;

/// Developer-facing control and TUI support.
pub mod control;
pub mod procbuf;
pub mod units;

mod arena;
mod buffer_size;
mod capi;
mod client;
mod connector;
mod dispatch;
mod error;
mod handoff;
mod port;
mod processor;
mod registry;

#[cfg(test)]
mod tests;

pub use capi::{
    API_VERSION, ApiVersion, CapabilityTable, LEGACY_API_VERSION, ProcessorHost, Revision,
};
pub use client::{BufferInfo, Client, ClientConfig, ClientEvent, ClientStatus};
pub use connector::{
    BufferId, ClientId, Connector, ConnectorKind, ConnectorType, Direction, Directions, PortId,
};
pub use dispatch::{Cycle, Dispatcher, MidiInput, MidiOutput};
pub use error::{AllocError, BindingErrorKind, ClientError};
pub use port::PortInfo;
pub use procbuf::{BufferUsage, MidiEvent};
pub use processor::{MAX_CONNECTORS, Processor, ProcessorDescriptor, ProcessorFault, SlotSpec};
pub use registry::{ProcessorId, ProcessorInfo};

static TRACING_INIT: Once = Once::new();

/// Install the fmt subscriber once. Does nothing if the host application
/// already installed its own.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}
