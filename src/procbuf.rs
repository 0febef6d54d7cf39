//! Intra-client scratch buffers carrying audio samples or timestamped MIDI
//! events from one processing unit to another.
//!
//! A [`ScratchArena`] is a flat byte arena sized from the engine buffer size.
//! Audio content views it as `f32` samples. MIDI content splits it into a
//! header array growing up from the start and a payload area growing down
//! from the end; the arena is full when the two regions would meet.
use std::cell::UnsafeCell;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

use memmap2::{MmapMut, MmapOptions};

use crate::ConnectorType;
use crate::connector::BufferId;
use crate::error::AllocError;

/// Bytes occupied by one event header: `time`, `size` and `offset`, each `u32`.
pub const EVENT_HEADER_SIZE: usize = 3 * size_of::<u32>();

/// Bytes per audio frame of a single-channel connector.
pub const AUDIO_FRAME_BYTES: usize = size_of::<f32>();

enum Storage {
    Heap(Vec<f32>),
    Mapped(MmapMut),
}

/// One MIDI event as seen by a consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent<'a> {
    /// Frame offset of the event inside the current cycle.
    pub time: u32,
    /// Raw MIDI bytes.
    pub data: &'a [u8],
}

/// Fixed-capacity byte arena reused every cycle.
pub struct ScratchArena {
    storage: Storage,
    bytes: usize,
    event_count: u32,
    header_top: usize,
    payload_bottom: usize,
}

impl ScratchArena {
    /// Allocate a zeroed arena of `bytes` bytes (rounded up to whole samples).
    ///
    /// With `lock_memory` the arena is an anonymous mapping locked into RAM so
    /// the audio thread never takes a page fault on it.
    pub fn allocate(bytes: usize, lock_memory: bool) -> Result<Self, AllocError> {
        let samples = bytes.div_ceil(AUDIO_FRAME_BYTES);
        let bytes = samples * AUDIO_FRAME_BYTES;
        let storage = if lock_memory {
            Storage::Mapped(map_locked(bytes)?)
        } else {
            let mut data: Vec<f32> = Vec::new();
            data.try_reserve_exact(samples)
                .map_err(|_| AllocError { bytes, source: None })?;
            data.resize(samples, 0.0);
            Storage::Heap(data)
        };
        Ok(Self {
            storage,
            bytes,
            event_count: 0,
            header_top: 0,
            payload_bottom: bytes,
        })
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes
    }

    fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Heap(data) => unsafe {
                std::slice::from_raw_parts(data.as_ptr() as *const u8, self.bytes)
            },
            Storage::Mapped(mmap) => &mmap[..self.bytes],
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let bytes = self.bytes;
        match &mut self.storage {
            Storage::Heap(data) => unsafe {
                std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut u8, bytes)
            },
            Storage::Mapped(mmap) => &mut mmap[..bytes],
        }
    }

    /// Audio view of the arena.
    pub fn samples(&self) -> &[f32] {
        match &self.storage {
            Storage::Heap(data) => &data[..],
            Storage::Mapped(mmap) => unsafe {
                std::slice::from_raw_parts(
                    mmap.as_ptr() as *const f32,
                    self.bytes / AUDIO_FRAME_BYTES,
                )
            },
        }
    }

    /// Mutable audio view of the arena.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        let len = self.bytes / AUDIO_FRAME_BYTES;
        match &mut self.storage {
            Storage::Heap(data) => &mut data[..],
            Storage::Mapped(mmap) => unsafe {
                std::slice::from_raw_parts_mut(mmap.as_mut_ptr() as *mut f32, len)
            },
        }
    }

    /// Zero the audio view.
    pub fn silence(&mut self) {
        self.samples_mut().fill(0.0);
    }

    /// Forget every event reserved so far. Payload bytes are left in place.
    pub fn reset(&mut self) {
        self.event_count = 0;
        self.header_top = 0;
        self.payload_bottom = self.bytes;
    }

    /// Reserve `size` payload bytes for an event at frame `time`.
    ///
    /// Returns `None` when the header array and the payload area would
    /// collide; the producer is expected to drop the event.
    pub fn reserve_event(&mut self, time: u32, size: usize) -> Option<&mut [u8]> {
        let header_end = self.header_top.checked_add(EVENT_HEADER_SIZE)?;
        let payload_start = self.payload_bottom.checked_sub(size)?;
        if header_end > payload_start {
            return None;
        }
        let at = self.header_top;
        let bytes = self.as_bytes_mut();
        write_u32(bytes, at, time);
        write_u32(bytes, at + 4, size as u32);
        write_u32(bytes, at + 8, payload_start as u32);
        self.header_top = header_end;
        self.payload_bottom = payload_start;
        self.event_count += 1;
        Some(&mut self.as_bytes_mut()[payload_start..payload_start + size])
    }

    /// Number of events reserved since the last [`reset`](Self::reset).
    pub fn event_count(&self) -> usize {
        self.event_count as usize
    }

    /// Event at `index`, or `None` when out of range.
    pub fn event(&self, index: usize) -> Option<MidiEvent<'_>> {
        if index >= self.event_count() {
            return None;
        }
        let bytes = self.as_bytes();
        let at = index * EVENT_HEADER_SIZE;
        let time = read_u32(bytes, at);
        let size = read_u32(bytes, at + 4) as usize;
        let offset = read_u32(bytes, at + 8) as usize;
        let data = bytes.get(offset..offset + size)?;
        Some(MidiEvent { time, data })
    }
}

fn map_locked(bytes: usize) -> Result<MmapMut, AllocError> {
    let mmap = MmapOptions::new()
        .len(bytes.max(1))
        .map_anon()
        .map_err(|err| AllocError {
            bytes,
            source: Some(err),
        })?;
    #[cfg(unix)]
    mmap.lock().map_err(|err| AllocError {
        bytes,
        source: Some(err),
    })?;
    Ok(mmap)
}

fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_ne_bytes());
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(raw)
}

/// Arena capacity in bytes for `frames` frames of the given content type.
pub(crate) fn capacity_for(ty: ConnectorType, frames: u32, midi_bytes_per_frame: usize) -> usize {
    let frames = frames.max(1) as usize;
    match ty {
        ConnectorType::Audio => frames * AUDIO_FRAME_BYTES,
        ConnectorType::Midi => frames * midi_bytes_per_frame.max(EVENT_HEADER_SIZE + 1),
    }
}

/// Arena shared between the control side and the audio thread.
///
/// The arena is only touched from the thread that owns the client's
/// dispatcher: inside a cycle, through the engine-side port accessors, or
/// while reallocating on a buffer size change. All three require
/// `&mut Dispatcher`, so accesses never overlap.
pub(crate) struct ConnectorCell {
    ty: ConnectorType,
    arena: UnsafeCell<ScratchArena>,
}

unsafe impl Send for ConnectorCell {}
unsafe impl Sync for ConnectorCell {}

impl ConnectorCell {
    pub(crate) fn new(
        ty: ConnectorType,
        frames: u32,
        midi_bytes_per_frame: usize,
        lock_memory: bool,
    ) -> Result<Self, AllocError> {
        let bytes = capacity_for(ty, frames, midi_bytes_per_frame);
        Ok(Self {
            ty,
            arena: UnsafeCell::new(ScratchArena::allocate(bytes, lock_memory)?),
        })
    }

    pub(crate) fn ty(&self) -> ConnectorType {
        self.ty
    }

    /// # Safety
    /// Caller must be the dispatcher's thread and hold no other reference
    /// into this arena.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn arena_mut(&self) -> &mut ScratchArena {
        unsafe { &mut *self.arena.get() }
    }

    /// # Safety
    /// Caller must be the dispatcher's thread and hold no mutable reference
    /// into this arena.
    pub(crate) unsafe fn arena(&self) -> &ScratchArena {
        unsafe { &*self.arena.get() }
    }

    /// Empty the connector: silence for audio, no events for MIDI.
    ///
    /// # Safety
    /// Same contract as [`arena_mut`](Self::arena_mut).
    pub(crate) unsafe fn clear(&self) {
        let arena = unsafe { self.arena_mut() };
        match self.ty {
            ConnectorType::Audio => arena.silence(),
            ConnectorType::Midi => arena.reset(),
        }
    }

    /// Replace the arena with a cleared one sized for `frames`. A no-op when
    /// the capacity already matches.
    ///
    /// # Safety
    /// Same contract as [`arena_mut`](Self::arena_mut).
    pub(crate) unsafe fn resize(
        &self,
        frames: u32,
        midi_bytes_per_frame: usize,
        lock_memory: bool,
    ) -> Result<(), AllocError> {
        let bytes = capacity_for(self.ty, frames, midi_bytes_per_frame);
        let wanted = bytes.div_ceil(AUDIO_FRAME_BYTES) * AUDIO_FRAME_BYTES;
        if unsafe { self.arena() }.capacity() != wanted {
            let fresh = ScratchArena::allocate(bytes, lock_memory)?;
            unsafe { *self.arena_mut() = fresh };
        }
        unsafe { self.clear() };
        Ok(())
    }
}

/// Usage and activation counters of a connector.
#[derive(Default)]
pub(crate) struct UsageCounters {
    out_usage: AtomicU32,
    inp_usage: AtomicU32,
    out_active: AtomicU32,
    inp_active: AtomicU32,
}

/// Snapshot of a connector's four counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferUsage {
    /// Registrations bound to the connector as a writer.
    pub out_usage: u32,
    /// Registrations bound to the connector as a reader.
    pub inp_usage: u32,
    /// Activated writers.
    pub out_active: u32,
    /// Activated readers.
    pub inp_active: u32,
}

impl UsageCounters {
    fn slot(&self, direction: crate::Direction, active: bool) -> &AtomicU32 {
        use crate::Direction::{In, Out};
        match (direction, active) {
            (Out, false) => &self.out_usage,
            (In, false) => &self.inp_usage,
            (Out, true) => &self.out_active,
            (In, true) => &self.inp_active,
        }
    }

    pub(crate) fn acquire(&self, direction: crate::Direction, active: bool) {
        self.slot(direction, active).fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self, direction: crate::Direction, active: bool) {
        let _ = self
            .slot(direction, active)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub(crate) fn snapshot(&self) -> BufferUsage {
        BufferUsage {
            out_usage: self.out_usage.load(Ordering::Acquire),
            inp_usage: self.inp_usage.load(Ordering::Acquire),
            out_active: self.out_active.load(Ordering::Acquire),
            inp_active: self.inp_active.load(Ordering::Acquire),
        }
    }
}

/// An intra-client ProcessBuffer: one producer binding, any number of
/// consumer bindings.
pub(crate) struct ProcessBuffer {
    id: BufferId,
    pub(crate) cell: ConnectorCell,
    pub(crate) usage: UsageCounters,
}

impl ProcessBuffer {
    pub(crate) fn new(id: BufferId, cell: ConnectorCell) -> Self {
        Self {
            id,
            cell,
            usage: UsageCounters::default(),
        }
    }

    pub(crate) fn id(&self) -> BufferId {
        self.id
    }
}
