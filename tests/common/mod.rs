#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use patchrack::event::{EngineEvent, EventBuffer};
use patchrack::plugin::Plugin;
use patchrack::Sample;

/// Stereo gain stage.
pub struct Gain {
    pub id: u32,
    pub gain: Sample,
    pub enabled: bool,
}

impl Gain {
    pub fn new(id: u32, gain: Sample) -> Self {
        Self {
            id,
            gain,
            enabled: true,
        }
    }
}

impl Plugin for Gain {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        "Gain"
    }
    fn audio_in_count(&self) -> u32 {
        2
    }
    fn audio_out_count(&self) -> u32 {
        2
    }
    fn accepts_midi(&self) -> bool {
        false
    }
    fn produces_midi(&self) -> bool {
        false
    }
    fn is_enabled(&self) -> bool {
        self.enabled
    }
    fn try_lock(&self, _offline: bool) -> bool {
        true
    }
    fn unlock(&self) {}
    fn init_buffers(&mut self) {}

    fn process(
        &mut self,
        audio_in: &[&[Sample]],
        audio_out: &mut [&mut [Sample]],
        _events_in: &[EngineEvent],
        _events_out: &mut EventBuffer,
        frames: u32,
    ) {
        for c in 0..2 {
            for i in 0..frames as usize {
                audio_out[c][i] = audio_in[c][i] * self.gain;
            }
        }
    }
}

/// Mono-in/mono-out gain, for patchbay channel wiring.
pub struct MonoGain {
    pub id: u32,
    pub name: String,
    pub gain: Sample,
}

impl MonoGain {
    pub fn new(id: u32, name: &str, gain: Sample) -> Self {
        Self {
            id,
            name: name.to_string(),
            gain,
        }
    }
}

impl Plugin for MonoGain {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn audio_in_count(&self) -> u32 {
        1
    }
    fn audio_out_count(&self) -> u32 {
        1
    }
    fn accepts_midi(&self) -> bool {
        false
    }
    fn produces_midi(&self) -> bool {
        false
    }
    fn is_enabled(&self) -> bool {
        true
    }
    fn try_lock(&self, _offline: bool) -> bool {
        true
    }
    fn unlock(&self) {}
    fn init_buffers(&mut self) {}

    fn process(
        &mut self,
        audio_in: &[&[Sample]],
        audio_out: &mut [&mut [Sample]],
        _events_in: &[EngineEvent],
        _events_out: &mut EventBuffer,
        frames: u32,
    ) {
        for i in 0..frames as usize {
            audio_out[0][i] = audio_in[0][i] * self.gain;
        }
    }
}

/// A pure source: no audio inputs, writes a constant to both outputs.
pub struct Source {
    pub id: u32,
    pub value: Sample,
}

impl Plugin for Source {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        "Source"
    }
    fn audio_in_count(&self) -> u32 {
        0
    }
    fn audio_out_count(&self) -> u32 {
        2
    }
    fn accepts_midi(&self) -> bool {
        false
    }
    fn produces_midi(&self) -> bool {
        false
    }
    fn is_enabled(&self) -> bool {
        true
    }
    fn try_lock(&self, _offline: bool) -> bool {
        true
    }
    fn unlock(&self) {}
    fn init_buffers(&mut self) {}

    fn process(
        &mut self,
        _audio_in: &[&[Sample]],
        audio_out: &mut [&mut [Sample]],
        _events_in: &[EngineEvent],
        _events_out: &mut EventBuffer,
        frames: u32,
    ) {
        for channel in audio_out.iter_mut() {
            channel[..frames as usize].fill(self.value);
        }
    }
}

/// Records every event it receives.
pub struct MidiSink {
    pub id: u32,
    pub seen: Arc<Mutex<Vec<EngineEvent>>>,
}

impl MidiSink {
    pub fn new(id: u32) -> (Self, Arc<Mutex<Vec<EngineEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                id,
                seen: seen.clone(),
            },
            seen,
        )
    }
}

impl Plugin for MidiSink {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        "MidiSink"
    }
    fn audio_in_count(&self) -> u32 {
        0
    }
    fn audio_out_count(&self) -> u32 {
        0
    }
    fn accepts_midi(&self) -> bool {
        true
    }
    fn produces_midi(&self) -> bool {
        false
    }
    fn is_enabled(&self) -> bool {
        true
    }
    fn try_lock(&self, _offline: bool) -> bool {
        true
    }
    fn unlock(&self) {}
    fn init_buffers(&mut self) {}

    fn process(
        &mut self,
        _audio_in: &[&[Sample]],
        _audio_out: &mut [&mut [Sample]],
        events_in: &[EngineEvent],
        _events_out: &mut EventBuffer,
        _frames: u32,
    ) {
        self.seen.lock().extend_from_slice(events_in);
    }
}

/// Emits one fixed note-on per block.
pub struct MidiGen {
    pub id: u32,
    pub time: u32,
}

impl Plugin for MidiGen {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        "MidiGen"
    }
    fn audio_in_count(&self) -> u32 {
        0
    }
    fn audio_out_count(&self) -> u32 {
        0
    }
    fn accepts_midi(&self) -> bool {
        false
    }
    fn produces_midi(&self) -> bool {
        true
    }
    fn is_enabled(&self) -> bool {
        true
    }
    fn try_lock(&self, _offline: bool) -> bool {
        true
    }
    fn unlock(&self) {}
    fn init_buffers(&mut self) {}

    fn process(
        &mut self,
        _audio_in: &[&[Sample]],
        _audio_out: &mut [&mut [Sample]],
        _events_in: &[EngineEvent],
        events_out: &mut EventBuffer,
        _frames: u32,
    ) {
        let event = EngineEvent::from_raw_midi(self.time, &[0x90, 72, 101]).unwrap();
        events_out.push(event);
    }
}

/// A 1 kHz-style sine block.
pub fn sine(amplitude: Sample, frames: usize, sample_rate: Sample) -> Vec<Sample> {
    (0..frames)
        .map(|i| {
            amplitude * (2.0 * std::f32::consts::PI * 1000.0 * i as Sample / sample_rate).sin()
        })
        .collect()
}
