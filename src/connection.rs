//! Identifiers, the connection registry, and the patchbay port-id plane.

/// Highest number of plugin nodes a patchbay graph will address. Also the
/// base of the encoded port-id plane.
pub const MAX_PATCHBAY_PLUGINS: u32 = 255;

/// Base id for a node's audio-input ports.
pub const AUDIO_IN_PORT_OFFSET: u32 = MAX_PATCHBAY_PLUGINS;
/// Base id for a node's audio-output ports.
pub const AUDIO_OUT_PORT_OFFSET: u32 = MAX_PATCHBAY_PLUGINS * 2;
/// Id of a node's MIDI-input port.
pub const MIDI_IN_PORT_ID: u32 = MAX_PATCHBAY_PLUGINS * 3;
/// Id of a node's MIDI-output port.
pub const MIDI_OUT_PORT_ID: u32 = MAX_PATCHBAY_PLUGINS * 3 + 1;

/// A client in the topology: one of the built-in groups or a plugin node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

/// A port id, unique within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub u32);

/// Monotonic connection id. `0` is reserved for "invalid".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    pub const INVALID: ConnectionId = ConnectionId(0);

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Fixed ids for the built-in groups.
pub mod group {
    use super::GroupId;

    /// The host's own endpoints (the rack's fixed ports).
    pub const HOST: GroupId = GroupId(1);
    /// Hardware audio capture.
    pub const AUDIO_IN: GroupId = GroupId(2);
    /// Hardware audio playback.
    pub const AUDIO_OUT: GroupId = GroupId(3);
    /// Device MIDI inputs.
    pub const MIDI_IN: GroupId = GroupId(4);
    /// Device MIDI outputs.
    pub const MIDI_OUT: GroupId = GroupId(5);
    /// First id handed to a patchbay plugin node.
    pub const FIRST_PLUGIN: GroupId = GroupId(6);
}

/// The six fixed ports of the rack's host group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RackPort {
    AudioIn1 = 1,
    AudioIn2 = 2,
    AudioOut1 = 3,
    AudioOut2 = 4,
    MidiIn = 5,
    MidiOut = 6,
}

impl RackPort {
    pub fn from_id(port: PortId) -> Option<Self> {
        match port.0 {
            1 => Some(RackPort::AudioIn1),
            2 => Some(RackPort::AudioIn2),
            3 => Some(RackPort::AudioOut1),
            4 => Some(RackPort::AudioOut2),
            5 => Some(RackPort::MidiIn),
            6 => Some(RackPort::MidiOut),
            _ => None,
        }
    }

    #[inline]
    pub fn id(self) -> PortId {
        PortId(self as u32)
    }

    pub fn name(self) -> &'static str {
        match self {
            RackPort::AudioIn1 => "AudioIn1",
            RackPort::AudioIn2 => "AudioIn2",
            RackPort::AudioOut1 => "AudioOut1",
            RackPort::AudioOut2 => "AudioOut2",
            RackPort::MidiIn => "MidiIn",
            RackPort::MidiOut => "MidiOut",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AudioIn1" => Some(RackPort::AudioIn1),
            "AudioIn2" => Some(RackPort::AudioIn2),
            "AudioOut1" => Some(RackPort::AudioOut1),
            "AudioOut2" => Some(RackPort::AudioOut2),
            "MidiIn" => Some(RackPort::MidiIn),
            "MidiOut" => Some(RackPort::MidiOut),
            _ => None,
        }
    }

    /// `true` for ports that receive signal (relative to the host group).
    #[inline]
    pub fn is_input(self) -> bool {
        matches!(self, RackPort::AudioIn1 | RackPort::AudioIn2 | RackPort::MidiIn)
    }

    #[inline]
    pub fn is_audio(self) -> bool {
        !matches!(self, RackPort::MidiIn | RackPort::MidiOut)
    }
}

/// A patchbay port decoded from the offset-encoded id plane.
///
/// The encoding folds type and direction into the id: audio inputs live in
/// `[AUDIO_IN_PORT_OFFSET, AUDIO_OUT_PORT_OFFSET)`, audio outputs in
/// `[AUDIO_OUT_PORT_OFFSET, MIDI_IN_PORT_ID)`, and the two MIDI ports have
/// dedicated ids. A single `(group, port)` pair therefore fully addresses a
/// typed, directed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchPort {
    /// Audio input, 0-based channel.
    AudioIn(u32),
    /// Audio output, 0-based channel.
    AudioOut(u32),
    MidiIn,
    MidiOut,
}

impl PatchPort {
    pub fn encode(self) -> PortId {
        match self {
            PatchPort::AudioIn(channel) => PortId(AUDIO_IN_PORT_OFFSET + channel),
            PatchPort::AudioOut(channel) => PortId(AUDIO_OUT_PORT_OFFSET + channel),
            PatchPort::MidiIn => PortId(MIDI_IN_PORT_ID),
            PatchPort::MidiOut => PortId(MIDI_OUT_PORT_ID),
        }
    }

    pub fn decode(port: PortId) -> Option<Self> {
        match port.0 {
            id if (AUDIO_IN_PORT_OFFSET..AUDIO_OUT_PORT_OFFSET).contains(&id) => {
                Some(PatchPort::AudioIn(id - AUDIO_IN_PORT_OFFSET))
            }
            id if (AUDIO_OUT_PORT_OFFSET..MIDI_IN_PORT_ID).contains(&id) => {
                Some(PatchPort::AudioOut(id - AUDIO_OUT_PORT_OFFSET))
            }
            MIDI_IN_PORT_ID => Some(PatchPort::MidiIn),
            MIDI_OUT_PORT_ID => Some(PatchPort::MidiOut),
            _ => None,
        }
    }

    #[inline]
    pub fn is_input(self) -> bool {
        matches!(self, PatchPort::AudioIn(_) | PatchPort::MidiIn)
    }

    #[inline]
    pub fn is_output(self) -> bool {
        !self.is_input()
    }

    #[inline]
    pub fn is_midi(self) -> bool {
        matches!(self, PatchPort::MidiIn | PatchPort::MidiOut)
    }
}

/// A directed connection: `source` feeds `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub source_group: GroupId,
    pub source_port: PortId,
    pub target_group: GroupId,
    pub target_port: PortId,
}

impl Connection {
    /// The `"gA:pA:gB:pB"` payload carried by connection callbacks.
    pub fn payload(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.source_group.0, self.source_port.0, self.target_group.0, self.target_port.0
        )
    }

    /// `true` if either endpoint belongs to `group`.
    #[inline]
    pub fn touches(&self, group: GroupId) -> bool {
        self.source_group == group || self.target_group == group
    }
}

/// Name ↔ id record for an externally-named port (device MIDI ports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortNameToId {
    pub group: GroupId,
    pub port: PortId,
    pub name: String,
}

/// Ordered list of active connections with monotone ids.
///
/// Mutation happens on control threads only; the audio thread reads the
/// per-topology structures that are kept in sync with this list.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    list: Vec<Connection>,
    last_id: u32,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next connection id. Monotone non-decreasing for the
    /// registry's lifetime, including across [`clear`](Self::clear).
    pub fn next_id(&mut self) -> ConnectionId {
        self.last_id += 1;
        ConnectionId(self.last_id)
    }

    pub fn add(&mut self, connection: Connection) {
        debug_assert!(connection.id.is_valid());
        self.list.push(connection);
    }

    pub fn find(&self, id: ConnectionId) -> Option<&Connection> {
        self.list.iter().find(|c| c.id == id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let pos = self.list.iter().position(|c| c.id == id)?;
        Some(self.list.remove(pos))
    }

    /// Removes and returns every connection matching the predicate, keeping
    /// insertion order.
    pub fn take_matching(&mut self, mut pred: impl FnMut(&Connection) -> bool) -> Vec<Connection> {
        let mut taken = Vec::new();
        self.list.retain(|c| {
            if pred(c) {
                taken.push(*c);
                false
            } else {
                true
            }
        });
        taken
    }

    /// Empties the list. `last_id` is retained so ids stay monotone.
    pub fn clear(&mut self) {
        self.list.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn last_id(&self) -> u32 {
        self.last_id
    }
}
