//! Reference processing units.
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dasp_frame::Frame;
use dasp_signal::{ConstHz, Signal, Sine};

use crate::connector::ConnectorType;
use crate::dispatch::Cycle;
use crate::processor::{Processor, ProcessorDescriptor, ProcessorFault};

/// Returned when a unit is driven with slots it was not registered with.
pub const FAULT_MISSING_SLOT: ProcessorFault = ProcessorFault(-1);

/// Sine oscillator writing to one audio output.
pub struct SineSource {
    signal: Sine<ConstHz>,
    amplitude: f32,
}

impl SineSource {
    /// Oscillator at `frequency_hz` for the given sample rate.
    pub fn new(sample_rate: u32, frequency_hz: f64, amplitude: f32) -> Self {
        Self {
            signal: dasp_signal::rate(f64::from(sample_rate))
                .const_hz(frequency_hz)
                .sine(),
            amplitude,
        }
    }

    /// Slot layout: one audio output.
    pub fn descriptor(name: impl Into<String>) -> ProcessorDescriptor {
        ProcessorDescriptor::new(name).output(ConnectorType::Audio)
    }
}

impl Processor for SineSource {
    fn process(&mut self, cycle: &mut Cycle<'_>) -> Result<(), ProcessorFault> {
        let out = cycle.audio_out(0).ok_or(FAULT_MISSING_SLOT)?;
        for sample in out.iter_mut() {
            *sample = self.signal.next() as f32 * self.amplitude;
        }
        Ok(())
    }
}

/// Shared gain value, adjustable from control threads.
#[derive(Clone)]
pub struct GainHandle {
    bits: Arc<AtomicU32>,
}

impl GainHandle {
    /// Linear gain.
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Set the linear gain.
    pub fn set(&self, gain: f32) {
        self.bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Set the gain in decibels; anything at or below -120 dB mutes.
    pub fn set_db(&self, gain_db: f32) {
        let amplitude = if gain_db <= -120.0 {
            0.0
        } else {
            10f32.powf(gain_db / 20.0)
        };
        self.set(amplitude);
    }
}

/// Audio input scaled into an audio output.
pub struct Gain {
    handle: GainHandle,
}

impl Gain {
    /// Unit with the given linear gain.
    pub fn new(gain: f32) -> Self {
        Self {
            handle: GainHandle {
                bits: Arc::new(AtomicU32::new(gain.to_bits())),
            },
        }
    }

    /// Handle for adjusting the gain while the unit is registered.
    pub fn handle(&self) -> GainHandle {
        self.handle.clone()
    }

    /// Slot layout: audio input, audio output.
    pub fn descriptor(name: impl Into<String>) -> ProcessorDescriptor {
        ProcessorDescriptor::new(name)
            .input(ConnectorType::Audio)
            .output(ConnectorType::Audio)
    }
}

impl Processor for Gain {
    fn process(&mut self, cycle: &mut Cycle<'_>) -> Result<(), ProcessorFault> {
        let input = cycle.audio_in(0).ok_or(FAULT_MISSING_SLOT)?;
        let output = cycle.audio_out(1).ok_or(FAULT_MISSING_SLOT)?;
        let gain = self.handle.get();
        for (out, sample) in output.iter_mut().zip(input) {
            *out = Frame::scale_amp(*sample, gain);
        }
        Ok(())
    }
}

/// MIDI input copied to a MIDI output, with note numbers optionally
/// transposed. Events that do not fit are dropped.
pub struct MidiThrough {
    transpose: i8,
    dropped: u64,
}

impl MidiThrough {
    /// Pass events through unchanged.
    pub fn new() -> Self {
        Self::transposed(0)
    }

    /// Shift note-on and note-off messages by `semitones`.
    pub fn transposed(semitones: i8) -> Self {
        Self {
            transpose: semitones,
            dropped: 0,
        }
    }

    /// Events dropped because the output was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Slot layout: MIDI input, MIDI output.
    pub fn descriptor(name: impl Into<String>) -> ProcessorDescriptor {
        ProcessorDescriptor::new(name)
            .input(ConnectorType::Midi)
            .output(ConnectorType::Midi)
    }
}

impl Default for MidiThrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for MidiThrough {
    fn process(&mut self, cycle: &mut Cycle<'_>) -> Result<(), ProcessorFault> {
        let input = cycle.midi_in(0).ok_or(FAULT_MISSING_SLOT)?;
        let mut output = cycle.midi_out(1).ok_or(FAULT_MISSING_SLOT)?;
        for event in input.iter() {
            let Some(payload) = output.reserve(event.time, event.data.len()) else {
                self.dropped += 1;
                continue;
            };
            payload.copy_from_slice(event.data);
            if is_note_message(payload) && self.transpose != 0 {
                let note = i16::from(payload[1]) + i16::from(self.transpose);
                payload[1] = note.clamp(0, 127) as u8;
            }
        }
        Ok(())
    }
}

fn is_note_message(data: &[u8]) -> bool {
    data.len() == 3 && matches!(data[0] & 0xF0, 0x80 | 0x90)
}
