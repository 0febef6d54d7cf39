//! Audio-thread entry point.
//!
//! The engine owns the client's single [`Dispatcher`] and calls
//! [`Dispatcher::run_cycle`] once per period. Everything reachable from
//! `run_cycle` is free of blocking waits and allocation: the processor list is
//! picked up through [`Handoff::try_confirm`](crate::handoff::Handoff), each
//! unit's processor is only `try_lock`ed, and faults are reported through
//! atomics and a non-blocking channel send.
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::client::ClientShared;
use crate::connector::{ConnectorType, Direction, PortId};
use crate::error::ClientError;
use crate::port::Port;
use crate::procbuf::{MidiEvent, ScratchArena};
use crate::registry::{ConnectorBinding, ProcessorEntry, ProcessorList};

/// Per-client audio callback driver. Obtained from
/// [`Client::take_dispatcher`](crate::Client::take_dispatcher).
pub struct Dispatcher {
    shared: Arc<ClientShared>,
    current: Arc<ProcessorList>,
    frame_time: u64,
    primed: bool,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<ClientShared>, current: Arc<ProcessorList>) -> Self {
        let frame_time = shared.frame_time.load(Ordering::Acquire);
        Self {
            shared,
            current,
            frame_time,
            primed: false,
        }
    }

    /// Run one cycle of `frames` frames over the confirmed processor list.
    ///
    /// Activated units run in registration order. Inactive units get their
    /// outputs cleared once after registration or deactivation. A unit
    /// returning an error stops the cycle and puts the client into the
    /// severe-error state. Outputs of units that left the list are cleared
    /// when the new list is picked up.
    pub fn run_cycle(&mut self, frames: u32) {
        let shared = &*self.shared;
        if !self.primed {
            // The engine may hand the dispatcher to its audio thread after
            // creating it elsewhere.
            shared.handoff.prime();
            self.primed = true;
        }
        if shared.flags.is_halted() {
            for entry in self.current.entries() {
                clear_outputs(entry);
            }
            return;
        }

        shared
            .handoff
            .try_confirm(&shared.state, &mut self.current, clear_outputs);

        let frame_time = self.frame_time;
        for entry in self.current.entries() {
            if !entry.is_activated() {
                if entry.take_needs_clear() {
                    clear_outputs(entry);
                }
                continue;
            }
            let Some(mut processor) = entry.processor.try_lock() else {
                clear_outputs(entry);
                continue;
            };
            if entry.is_closed() {
                continue;
            }
            reset_midi_outputs(entry);
            let mut cycle = Cycle::new(frames, frame_time, &entry.bindings);
            if let Err(fault) = processor.process(&mut cycle) {
                drop(processor);
                shared.processing_failed(entry, fault);
                break;
            }
        }

        self.frame_time += u64::from(frames);
        shared.frame_time.store(self.frame_time, Ordering::Release);
    }

    /// Engine notification of a new buffer size.
    ///
    /// Reallocates every port and ProcessBuffer and notifies every unit whose
    /// last-notified size differs. Holding `&mut self` guarantees no cycle is
    /// running meanwhile. A rejection or allocation failure shuts the client
    /// down and is returned as [`ClientError::Shutdown`].
    pub fn buffer_size_changed(&mut self, frames: u32) -> Result<(), ClientError> {
        self.shared.apply_buffer_size(frames, &self.current)
    }

    /// Frame time at the beginning of the next cycle.
    pub fn frame_time(&self) -> u64 {
        self.frame_time
    }

    fn port(&self, id: PortId, direction: Direction, ty: ConnectorType) -> Result<Arc<Port>, ClientError> {
        let port = self
            .shared
            .ports
            .load()
            .iter()
            .find(|port| port.id() == id)
            .cloned()
            .ok_or(ClientError::UnknownPort(id))?;
        if port.direction() != direction {
            return Err(ClientError::ArgInvalid("port has the wrong direction"));
        }
        if port.cell.ty() != ty {
            return Err(ClientError::ArgInvalid("port has the wrong type"));
        }
        Ok(port)
    }

    /// Fill an audio input port for the next cycle. Returns the samples copied.
    pub fn write_port_audio(&mut self, id: PortId, samples: &[f32]) -> Result<usize, ClientError> {
        let port = self.port(id, Direction::In, ConnectorType::Audio)?;
        let arena = unsafe { port.cell.arena_mut() };
        let dest = arena.samples_mut();
        let count = dest.len().min(samples.len());
        dest[..count].copy_from_slice(&samples[..count]);
        dest[count..].fill(0.0);
        Ok(count)
    }

    /// Copy an audio output port after a cycle. Returns the samples copied.
    pub fn read_port_audio(&mut self, id: PortId, out: &mut [f32]) -> Result<usize, ClientError> {
        let port = self.port(id, Direction::Out, ConnectorType::Audio)?;
        let source = unsafe { port.cell.arena() }.samples();
        let count = source.len().min(out.len());
        out[..count].copy_from_slice(&source[..count]);
        Ok(count)
    }

    /// Replace the events of a MIDI input port for the next cycle. Returns how
    /// many events fit.
    pub fn write_port_midi(&mut self, id: PortId, events: &[(u32, &[u8])]) -> Result<usize, ClientError> {
        let port = self.port(id, Direction::In, ConnectorType::Midi)?;
        let arena = unsafe { port.cell.arena_mut() };
        arena.reset();
        let mut written = 0;
        for (time, data) in events {
            match arena.reserve_event(*time, data.len()) {
                Some(payload) => payload.copy_from_slice(data),
                None => break,
            }
            written += 1;
        }
        Ok(written)
    }

    /// Visit the events a MIDI output port received in the last cycle.
    pub fn read_port_midi(
        &mut self,
        id: PortId,
        mut visit: impl FnMut(MidiEvent<'_>),
    ) -> Result<usize, ClientError> {
        let port = self.port(id, Direction::Out, ConnectorType::Midi)?;
        let input = MidiInput {
            arena: unsafe { port.cell.arena() },
        };
        for event in input.iter() {
            visit(event);
        }
        Ok(input.len())
    }
}

fn clear_outputs(entry: &ProcessorEntry) {
    for binding in entry.outputs() {
        unsafe { binding.target.cell().clear() };
    }
}

fn reset_midi_outputs(entry: &ProcessorEntry) {
    for binding in entry.outputs() {
        if binding.ty == ConnectorType::Midi {
            unsafe { binding.target.cell().arena_mut() }.reset();
        }
    }
}

/// A processing unit's view of its connectors for one cycle.
pub struct Cycle<'a> {
    frames: u32,
    frame_time: u64,
    bindings: &'a [ConnectorBinding],
    taken: Cell<u64>,
}

impl<'a> Cycle<'a> {
    fn new(frames: u32, frame_time: u64, bindings: &'a [ConnectorBinding]) -> Self {
        Self {
            frames,
            frame_time,
            bindings,
            taken: Cell::new(0),
        }
    }

    /// Frames in this cycle.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Frame time at the start of this cycle.
    pub fn frame_time(&self) -> u64 {
        self.frame_time
    }

    /// Number of bound slots.
    pub fn slots(&self) -> usize {
        self.bindings.len()
    }

    fn binding(&self, slot: usize, direction: Direction, ty: ConnectorType) -> Option<&'a ConnectorBinding> {
        self.bindings
            .get(slot)
            .filter(|binding| binding.direction == direction && binding.ty == ty)
    }

    fn take(&self, slot: usize) -> bool {
        let bit = 1u64 << slot;
        let taken = self.taken.get();
        if taken & bit != 0 {
            return false;
        }
        self.taken.set(taken | bit);
        true
    }

    fn clamp(&self, len: usize) -> usize {
        len.min(self.frames as usize)
    }

    /// Samples of an audio input slot.
    pub fn audio_in(&self, slot: usize) -> Option<&'a [f32]> {
        let binding = self.binding(slot, Direction::In, ConnectorType::Audio)?;
        let samples = unsafe { binding.target.cell().arena() }.samples();
        Some(&samples[..self.clamp(samples.len())])
    }

    /// Samples of an audio output slot. Each slot can be taken once per cycle.
    #[allow(clippy::mut_from_ref)]
    pub fn audio_out(&self, slot: usize) -> Option<&'a mut [f32]> {
        let binding = self.binding(slot, Direction::Out, ConnectorType::Audio)?;
        if !self.take(slot) {
            return None;
        }
        let samples = unsafe { binding.target.cell().arena_mut() }.samples_mut();
        let len = self.clamp(samples.len());
        Some(&mut samples[..len])
    }

    /// Events of a MIDI input slot.
    pub fn midi_in(&self, slot: usize) -> Option<MidiInput<'a>> {
        let binding = self.binding(slot, Direction::In, ConnectorType::Midi)?;
        Some(MidiInput {
            arena: unsafe { binding.target.cell().arena() },
        })
    }

    /// Writer for a MIDI output slot. Each slot can be taken once per cycle.
    pub fn midi_out(&self, slot: usize) -> Option<MidiOutput<'a>> {
        let binding = self.binding(slot, Direction::Out, ConnectorType::Midi)?;
        if !self.take(slot) {
            return None;
        }
        Some(MidiOutput {
            arena: unsafe { binding.target.cell().arena_mut() },
        })
    }
}

/// Read-only view of a MIDI connector.
pub struct MidiInput<'a> {
    arena: &'a ScratchArena,
}

impl<'a> MidiInput<'a> {
    /// Number of events.
    pub fn len(&self) -> usize {
        self.arena.event_count()
    }

    /// Whether there are no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Event at `index`.
    pub fn get(&self, index: usize) -> Option<MidiEvent<'a>> {
        self.arena.event(index)
    }

    /// Events in reservation order.
    pub fn iter(&self) -> impl Iterator<Item = MidiEvent<'a>> + '_ {
        (0..self.len()).filter_map(|index| self.get(index))
    }
}

/// Writer for a MIDI connector, already reset for this cycle.
pub struct MidiOutput<'a> {
    arena: &'a mut ScratchArena,
}

impl MidiOutput<'_> {
    /// Reserve `size` payload bytes at frame `time`; `None` when full.
    pub fn reserve(&mut self, time: u32, size: usize) -> Option<&mut [u8]> {
        self.arena.reserve_event(time, size)
    }

    /// Copy `data` as one event. Returns `false` when the event was dropped
    /// because the connector is full.
    pub fn write(&mut self, time: u32, data: &[u8]) -> bool {
        match self.arena.reserve_event(time, data.len()) {
            Some(payload) => {
                payload.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Events written so far.
    pub fn len(&self) -> usize {
        self.arena.event_count()
    }

    /// Whether nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.release_dispatcher();
    }
}
