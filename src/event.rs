//! Engine events: the per-block event stream shared between the engine, the
//! graphs, and the plugins.

use crate::Sample;

/// Capacity of the per-block event buffers handed to the graphs.
pub const MAX_EVENT_COUNT: usize = 512;

/// Largest MIDI message carried inline across the realtime path. Longer
/// messages (sysex) are dropped at the producer with a warning.
pub const MAX_MIDI_DATA_SIZE: usize = 4;

/// A timestamped event inside one audio block.
///
/// `time` is the frame offset of the event within the current block and is
/// always in `[0, nframes)` once the event reaches a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineEvent {
    /// Frame offset within the current block.
    pub time: u32,
    /// MIDI channel the event applies to (0-15).
    pub channel: u8,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    /// Builds a MIDI event from raw bytes, splitting the channel out of the
    /// status byte for channel-voice messages.
    ///
    /// Returns `None` if the message is empty or too long to carry inline.
    pub fn from_raw_midi(time: u32, bytes: &[u8]) -> Option<Self> {
        let mut data = MidiData::new(bytes)?;
        let status = data.data[0];
        let channel = if status < 0xf0 {
            data.data[0] = status & 0xf0;
            status & 0x0f
        } else {
            0
        };
        data.port = 0;
        Some(Self {
            time,
            channel,
            kind: EngineEventKind::Midi(data),
        })
    }

    /// Builds a control event.
    pub fn control(time: u32, channel: u8, control: ControlEvent) -> Self {
        Self {
            time,
            channel,
            kind: EngineEventKind::Control(control),
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self.kind, EngineEventKind::Null)
    }

    /// Renders the event as raw MIDI bytes into `scratch`, returning the
    /// filled prefix. Returns `None` for events with no MIDI equivalent.
    pub fn to_raw_midi<'a>(&self, scratch: &'a mut [u8; MAX_MIDI_DATA_SIZE]) -> Option<&'a [u8]> {
        match &self.kind {
            EngineEventKind::Null => None,
            EngineEventKind::Midi(midi) => {
                let size = midi.size as usize;
                scratch[..size].copy_from_slice(midi.bytes());
                if scratch[0] < 0xf0 {
                    scratch[0] |= self.channel & 0x0f;
                }
                Some(&scratch[..size])
            }
            EngineEventKind::Control(control) => control.to_raw_midi(self.channel, scratch),
        }
    }
}

/// The payload of an [`EngineEvent`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum EngineEventKind {
    /// An empty slot.
    #[default]
    Null,
    /// A host-side control change.
    Control(ControlEvent),
    /// A raw MIDI message.
    Midi(MidiData),
}

/// A host-side control change that may be rendered to MIDI on the way out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    /// A parameter change by index. Indices in the 7-bit controller range
    /// convert to control-change messages.
    Parameter { index: u16, value: Sample },
    /// Bank select.
    MidiBank { bank: u16 },
    /// Program change.
    MidiProgram { program: u16 },
    AllSoundOff,
    AllNotesOff,
}

impl ControlEvent {
    /// Renders the control event as raw MIDI bytes into `scratch`.
    ///
    /// Parameter changes with indices outside the controller range have no
    /// MIDI equivalent and yield `None`.
    pub fn to_raw_midi<'a>(
        &self,
        channel: u8,
        scratch: &'a mut [u8; MAX_MIDI_DATA_SIZE],
    ) -> Option<&'a [u8]> {
        let channel = channel & 0x0f;
        match *self {
            ControlEvent::Parameter { index, value } => {
                if index >= 0x78 {
                    return None;
                }
                scratch[0] = 0xb0 | channel;
                scratch[1] = index as u8 & 0x7f;
                scratch[2] = (value.clamp(0.0, 1.0) * 127.0) as u8;
                Some(&scratch[..3])
            }
            ControlEvent::MidiBank { bank } => {
                scratch[0] = 0xb0 | channel;
                scratch[1] = 0x00;
                scratch[2] = (bank & 0x7f) as u8;
                Some(&scratch[..3])
            }
            ControlEvent::MidiProgram { program } => {
                scratch[0] = 0xc0 | channel;
                scratch[1] = (program & 0x7f) as u8;
                Some(&scratch[..2])
            }
            ControlEvent::AllSoundOff => {
                scratch[0] = 0xb0 | channel;
                scratch[1] = 0x78;
                scratch[2] = 0;
                Some(&scratch[..3])
            }
            ControlEvent::AllNotesOff => {
                scratch[0] = 0xb0 | channel;
                scratch[1] = 0x7b;
                scratch[2] = 0;
                Some(&scratch[..3])
            }
        }
    }
}

/// Inline MIDI bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiData {
    pub size: u8,
    pub data: [u8; MAX_MIDI_DATA_SIZE],
    /// Event-port index on multi-port plugins; 0 for the default port.
    pub port: u8,
}

impl MidiData {
    /// Copies `bytes` inline. Returns `None` for empty or oversized messages.
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_MIDI_DATA_SIZE {
            return None;
        }
        let mut data = [0; MAX_MIDI_DATA_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            size: bytes.len() as u8,
            data,
            port: 0,
        })
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }
}

/// A fixed-capacity event buffer.
///
/// Capacity is allocated up front; pushing into a full buffer drops the event
/// with a warning, so the audio thread never reallocates.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Box<[EngineEvent]>,
    len: usize,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBuffer {
    /// Creates a buffer with the engine's default capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_EVENT_COUNT)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: vec![EngineEvent::default(); capacity].into_boxed_slice(),
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Appends an event. Returns `false` (and logs) if the buffer is full.
    #[inline]
    pub fn push(&mut self, event: EngineEvent) -> bool {
        if self.len == self.events.len() {
            log::warn!("event buffer full, dropping event");
            return false;
        }
        self.events[self.len] = event;
        self.len += 1;
        true
    }

    #[inline]
    pub fn as_slice(&self) -> &[EngineEvent] {
        &self.events[..self.len]
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &EngineEvent> {
        self.as_slice().iter()
    }

    /// Replaces the contents with a copy of `other`, truncating if `other`
    /// holds more events than this buffer can take.
    pub fn copy_from(&mut self, other: &[EngineEvent]) {
        let n = other.len().min(self.events.len());
        if n < other.len() {
            log::warn!("event buffer copy truncated {} events", other.len() - n);
        }
        self.events[..n].copy_from_slice(&other[..n]);
        self.len = n;
    }

    /// Appends a copy of `other`, truncating on overflow.
    pub fn extend_from(&mut self, other: &[EngineEvent]) {
        let room = self.events.len() - self.len;
        let n = other.len().min(room);
        if n < other.len() {
            log::warn!("event buffer extend dropped {} events", other.len() - n);
        }
        self.events[self.len..self.len + n].copy_from_slice(&other[..n]);
        self.len += n;
    }

    /// Replaces the contents with the stable two-way merge of `a` and `b` by
    /// timestamp. Ties keep `a` first.
    pub fn merge_sorted(&mut self, a: &[EngineEvent], b: &[EngineEvent]) {
        self.len = 0;
        let (mut i, mut j) = (0, 0);
        while i < a.len() || j < b.len() {
            let take_a = match (a.get(i), b.get(j)) {
                (Some(ea), Some(eb)) => ea.time <= eb.time,
                (Some(_), None) => true,
                _ => false,
            };
            let event = if take_a {
                i += 1;
                a[i - 1]
            } else {
                j += 1;
                b[j - 1]
            };
            if !self.push(event) {
                return;
            }
        }
    }

    /// Sorts the contents in place by timestamp.
    pub fn sort_by_time(&mut self) {
        self.events[..self.len].sort_unstable_by_key(|event| event.time);
    }
}
