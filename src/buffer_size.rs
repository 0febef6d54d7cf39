//! Engine-driven buffer size changes.
use tracing::{error, info};

use crate::client::{ClientEvent, ClientShared};
use crate::error::ClientError;
use crate::procbuf::ConnectorCell;
use crate::registry::ProcessorList;

impl ClientShared {
    /// Resize every connector and notify the units whose last-notified size
    /// differs. Any failure tears the client down instead of leaving it
    /// partially resized.
    pub(crate) fn apply_buffer_size(
        &self,
        frames: u32,
        running: &ProcessorList,
    ) -> Result<(), ClientError> {
        if frames == 0 {
            return Err(ClientError::ArgInvalid("buffer size must be positive"));
        }
        let mut state = self.lock_running()?;
        let previous = state.buffer_size;
        state.buffer_size = frames;

        let midi_bytes_per_frame = self.config.midi_bytes_per_frame;
        let lock_memory = self.config.lock_memory;
        let resize = |cell: &ConnectorCell| unsafe {
            cell.resize(frames, midi_bytes_per_frame, lock_memory)
        };

        let directory_cells = state
            .directory
            .ports
            .iter()
            .map(|(_, port)| &port.cell)
            .chain(state.directory.buffers.iter().map(|(_, buffer)| &buffer.cell));
        let bound_cells = state
            .processors
            .entries()
            .iter()
            .chain(running.entries())
            .flat_map(|entry| entry.bindings.iter().map(|binding| binding.target.cell()));
        let resized = directory_cells
            .chain(bound_cells)
            .try_for_each(|cell| resize(cell));
        if let Err(err) = resized {
            let reason = format!("cannot resize connectors to {frames} frames: {err}");
            error!(client = %self.name, previous, frames, "{reason}");
            return Err(self.fail(&mut state, None, reason));
        }

        let entries = state.processors.clone();
        for entry in entries.entries() {
            if entry.notified_frames() == frames {
                continue;
            }
            let result = entry.processor.lock().buffer_size_changed(frames);
            match result {
                Ok(()) => entry.set_notified_frames(frames),
                Err(fault) => {
                    let reason = format!(
                        "error {} from buffer size callback for processor '{}' ({})",
                        fault.0,
                        entry.name(),
                        entry.id()
                    );
                    error!(client = %self.name, frames, "{reason}");
                    return Err(self.fail(&mut state, Some((entry.id(), fault)), reason));
                }
            }
        }

        self.emit(ClientEvent::BufferSizeChanged(frames));
        info!(client = %self.name, previous, frames, "buffer size changed");
        Ok(())
    }
}
