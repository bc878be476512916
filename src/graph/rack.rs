//! The fixed-topology rack graph.
//!
//! Six host ports (stereo in, stereo out, MIDI in/out), hardware channels
//! wired to them through per-endpoint connection vectors, and a linear plugin
//! chain between the stereo pair. MIDI endpoints delegate the actual device
//! work to the engine facade through [`RackMidiIo`].

use itertools::izip;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::connection::{
    group, Connection, ConnectionId, ConnectionRegistry, GroupId, PortId, PortNameToId, RackPort,
};
use crate::engine::RtData;
use crate::event::EventBuffer;
use crate::graph::{signal_peak, GraphError, RackMidiIo};
use crate::host::{ClientIcon, HostEvent, HostHandle, PortFlags};
use crate::Sample;

/// Device-channel lists and the chain's scratch buffers.
///
/// The vectors are O(channels) and mutated under the mutex from control
/// threads; the audio thread takes the same mutex for the duration of
/// [`RackGraph::process_helper`], which is bounded work.
pub(crate) struct RackAudio {
    pub connected_in1: SmallVec<[u32; 2]>,
    pub connected_in2: SmallVec<[u32; 2]>,
    pub connected_out1: SmallVec<[u32; 2]>,
    pub connected_out2: SmallVec<[u32; 2]>,

    // staged hardware input, current chain input, current chain output
    stage_in: [Vec<Sample>; 2],
    chain_in: [Vec<Sample>; 2],
    chain_out: [Vec<Sample>; 2],
    events_scratch: EventBuffer,
}

impl RackAudio {
    fn new(buffer_size: usize) -> Self {
        Self {
            connected_in1: SmallVec::new(),
            connected_in2: SmallVec::new(),
            connected_out1: SmallVec::new(),
            connected_out2: SmallVec::new(),
            stage_in: [vec![0.0; buffer_size], vec![0.0; buffer_size]],
            chain_in: [vec![0.0; buffer_size], vec![0.0; buffer_size]],
            chain_out: [vec![0.0; buffer_size], vec![0.0; buffer_size]],
            events_scratch: EventBuffer::new(),
        }
    }

    fn resize(&mut self, buffer_size: usize) {
        for bufs in [
            &mut self.stage_in,
            &mut self.chain_in,
            &mut self.chain_out,
        ] {
            for buf in bufs.iter_mut() {
                *buf = vec![0.0; buffer_size];
            }
        }
    }
}

/// The rack graph: fixed ports, a linear chain, and a connection registry.
pub struct RackGraph {
    host: HostHandle,
    client_name: String,
    inputs: u32,
    outputs: u32,
    pub(crate) audio: Mutex<RackAudio>,
    registry: Mutex<ConnectionRegistry>,
    midi_in_names: Mutex<Vec<PortNameToId>>,
    midi_out_names: Mutex<Vec<PortNameToId>>,
}

impl RackGraph {
    pub fn new(
        host: HostHandle,
        client_name: impl Into<String>,
        buffer_size: u32,
        inputs: u32,
        outputs: u32,
    ) -> Self {
        Self {
            host,
            client_name: client_name.into(),
            inputs,
            outputs,
            audio: Mutex::new(RackAudio::new(buffer_size as usize)),
            registry: Mutex::new(ConnectionRegistry::new()),
            midi_in_names: Mutex::new(Vec::new()),
            midi_out_names: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn inputs(&self) -> u32 {
        self.inputs
    }

    #[inline]
    pub fn outputs(&self) -> u32 {
        self.outputs
    }

    /// Rebuilds the scratch buffers for a new block size. The engine quiesces
    /// the audio thread around this.
    pub fn set_buffer_size(&self, buffer_size: u32) {
        self.audio.lock().resize(buffer_size as usize);
    }

    /// Validates and records a connection.
    ///
    /// Exactly one endpoint must be a host port; the other names a hardware
    /// channel or device MIDI port matching the host port's type and
    /// direction. MIDI endpoints are opened through `midi_io` before the
    /// connection is registered.
    pub fn connect(
        &self,
        midi_io: &mut dyn RackMidiIo,
        source_group: GroupId,
        source_port: PortId,
        target_group: GroupId,
        target_port: PortId,
    ) -> Result<ConnectionId, GraphError> {
        let source_is_host = source_group == group::HOST;
        let target_is_host = target_group == group::HOST;
        if source_is_host == target_is_host {
            return Err(GraphError::InvalidRackConnection);
        }

        let (host_port, ext_group, ext_port) = if source_is_host {
            (source_port, target_group, target_port)
        } else {
            (target_port, source_group, source_port)
        };
        let rack_port = RackPort::from_id(host_port).ok_or(GraphError::InvalidRackConnection)?;

        // a host input receives, so the external side must be the source
        if rack_port.is_input() == source_is_host {
            return Err(GraphError::InvalidRackConnection);
        }

        match rack_port {
            RackPort::AudioIn1 | RackPort::AudioIn2 => {
                if ext_group != group::AUDIO_IN
                    || ext_port.0 < 1
                    || ext_port.0 > self.inputs
                {
                    return Err(GraphError::InvalidRackConnection);
                }
                let mut audio = self.audio.lock();
                let list = if rack_port == RackPort::AudioIn1 {
                    &mut audio.connected_in1
                } else {
                    &mut audio.connected_in2
                };
                if list.contains(&ext_port.0) {
                    return Err(GraphError::InvalidRackConnection);
                }
                list.push(ext_port.0);
            }
            RackPort::AudioOut1 | RackPort::AudioOut2 => {
                if ext_group != group::AUDIO_OUT
                    || ext_port.0 < 1
                    || ext_port.0 > self.outputs
                {
                    return Err(GraphError::InvalidRackConnection);
                }
                let mut audio = self.audio.lock();
                let list = if rack_port == RackPort::AudioOut1 {
                    &mut audio.connected_out1
                } else {
                    &mut audio.connected_out2
                };
                if list.contains(&ext_port.0) {
                    return Err(GraphError::InvalidRackConnection);
                }
                list.push(ext_port.0);
            }
            RackPort::MidiIn => {
                if ext_group != group::MIDI_IN {
                    return Err(GraphError::InvalidRackConnection);
                }
                let name = self
                    .midi_port_name(group::MIDI_IN, ext_port)
                    .ok_or(GraphError::InvalidRackConnection)?;
                if !midi_io.connect_midi_in(&name) {
                    return Err(GraphError::MidiPort(name));
                }
            }
            RackPort::MidiOut => {
                if ext_group != group::MIDI_OUT {
                    return Err(GraphError::InvalidRackConnection);
                }
                let name = self
                    .midi_port_name(group::MIDI_OUT, ext_port)
                    .ok_or(GraphError::InvalidRackConnection)?;
                if !midi_io.connect_midi_out(&name) {
                    return Err(GraphError::MidiPort(name));
                }
            }
        }

        let mut registry = self.registry.lock();
        let id = registry.next_id();
        let connection = Connection {
            id,
            source_group,
            source_port,
            target_group,
            target_port,
        };
        registry.add(connection);
        drop(registry);

        self.host.on_event(HostEvent::PatchbayConnectionAdded {
            id,
            payload: connection.payload(),
        });
        Ok(id)
    }

    /// Removes the connection with the given id, undoing the corresponding
    /// vector entry or device MIDI port.
    pub fn disconnect(
        &self,
        midi_io: &mut dyn RackMidiIo,
        id: ConnectionId,
    ) -> Result<(), GraphError> {
        let connection = self
            .registry
            .lock()
            .find(id)
            .copied()
            .ok_or(GraphError::ConnectionNotFound)?;

        let (host_port, ext_port) = if connection.source_group == group::HOST {
            (connection.source_port, connection.target_port)
        } else {
            (connection.target_port, connection.source_port)
        };
        let rack_port = RackPort::from_id(host_port).ok_or(GraphError::ConnectionNotFound)?;

        match rack_port {
            RackPort::AudioIn1 | RackPort::AudioIn2 | RackPort::AudioOut1 | RackPort::AudioOut2 => {
                let mut audio = self.audio.lock();
                let list = match rack_port {
                    RackPort::AudioIn1 => &mut audio.connected_in1,
                    RackPort::AudioIn2 => &mut audio.connected_in2,
                    RackPort::AudioOut1 => &mut audio.connected_out1,
                    _ => &mut audio.connected_out2,
                };
                match list.iter().position(|&p| p == ext_port.0) {
                    Some(pos) => {
                        list.remove(pos);
                    }
                    None => log::warn!(
                        "rack connection {} had no matching channel entry",
                        id.0
                    ),
                }
            }
            RackPort::MidiIn => {
                if let Some(name) = self.midi_port_name(group::MIDI_IN, ext_port) {
                    if !midi_io.disconnect_midi_in(&name) {
                        log::warn!("failed to close MIDI-in port \"{name}\"");
                    }
                }
            }
            RackPort::MidiOut => {
                if let Some(name) = self.midi_port_name(group::MIDI_OUT, ext_port) {
                    if !midi_io.disconnect_midi_out(&name) {
                        log::warn!("failed to close MIDI-out port \"{name}\"");
                    }
                }
            }
        }

        self.registry.lock().remove(id);
        self.host
            .on_event(HostEvent::PatchbayConnectionRemoved { id });
        Ok(())
    }

    /// Active connections as `(source, target)` full-name pairs, in insertion
    /// order.
    pub fn connections(&self) -> Vec<(String, String)> {
        let registry = self.registry.lock();
        registry
            .iter()
            .filter_map(|c| {
                let source = self.full_port_name(c.source_group, c.source_port).ok()?;
                let target = self.full_port_name(c.target_group, c.target_port).ok()?;
                Some((source, target))
            })
            .collect()
    }

    /// Re-announces every client, port, and connection. The device MIDI name
    /// tables are rebuilt with sequentially assigned port ids.
    pub fn refresh(&self, midi_in_ports: &[String], midi_out_ports: &[String]) {
        let mut events = Vec::new();
        let host = &mut events;

        host.push(HostEvent::PatchbayClientAdded {
            group: group::HOST,
            icon: ClientIcon::Host,
            plugin_id: None,
            name: self.client_name.clone(),
        });
        for port in [
            RackPort::AudioIn1,
            RackPort::AudioIn2,
            RackPort::AudioOut1,
            RackPort::AudioOut2,
            RackPort::MidiIn,
            RackPort::MidiOut,
        ] {
            let mut flags = if port.is_audio() {
                PortFlags::AUDIO
            } else {
                PortFlags::MIDI
            };
            if port.is_input() {
                flags = flags | PortFlags::INPUT;
            }
            host.push(HostEvent::PatchbayPortAdded {
                group: group::HOST,
                port: port.id(),
                flags,
                name: port.name().to_string(),
            });
        }

        host.push(HostEvent::PatchbayClientAdded {
            group: group::AUDIO_IN,
            icon: ClientIcon::Hardware,
            plugin_id: None,
            name: "AudioIn".to_string(),
        });
        for channel in 1..=self.inputs {
            host.push(HostEvent::PatchbayPortAdded {
                group: group::AUDIO_IN,
                port: PortId(channel),
                flags: PortFlags::AUDIO,
                name: channel.to_string(),
            });
        }

        host.push(HostEvent::PatchbayClientAdded {
            group: group::AUDIO_OUT,
            icon: ClientIcon::Hardware,
            plugin_id: None,
            name: "AudioOut".to_string(),
        });
        for channel in 1..=self.outputs {
            host.push(HostEvent::PatchbayPortAdded {
                group: group::AUDIO_OUT,
                port: PortId(channel),
                flags: PortFlags::AUDIO | PortFlags::INPUT,
                name: channel.to_string(),
            });
        }

        host.push(HostEvent::PatchbayClientAdded {
            group: group::MIDI_IN,
            icon: ClientIcon::Hardware,
            plugin_id: None,
            name: "MidiIn".to_string(),
        });
        {
            let mut names = self.midi_in_names.lock();
            names.clear();
            for (i, name) in midi_in_ports.iter().enumerate() {
                let port = PortId(i as u32 + 1);
                names.push(PortNameToId {
                    group: group::MIDI_IN,
                    port,
                    name: name.clone(),
                });
                host.push(HostEvent::PatchbayPortAdded {
                    group: group::MIDI_IN,
                    port,
                    flags: PortFlags::MIDI,
                    name: name.clone(),
                });
            }
        }

        host.push(HostEvent::PatchbayClientAdded {
            group: group::MIDI_OUT,
            icon: ClientIcon::Hardware,
            plugin_id: None,
            name: "MidiOut".to_string(),
        });
        {
            let mut names = self.midi_out_names.lock();
            names.clear();
            for (i, name) in midi_out_ports.iter().enumerate() {
                let port = PortId(i as u32 + 1);
                names.push(PortNameToId {
                    group: group::MIDI_OUT,
                    port,
                    name: name.clone(),
                });
                host.push(HostEvent::PatchbayPortAdded {
                    group: group::MIDI_OUT,
                    port,
                    flags: PortFlags::MIDI | PortFlags::INPUT,
                    name: name.clone(),
                });
            }
        }

        {
            let registry = self.registry.lock();
            for connection in registry.iter() {
                host.push(HostEvent::PatchbayConnectionAdded {
                    id: connection.id,
                    payload: connection.payload(),
                });
            }
        }

        for event in events {
            self.host.on_event(event);
        }
    }

    /// Encodes `(group, port)` as the full name announced for it.
    pub fn full_port_name(&self, group_id: GroupId, port: PortId) -> Result<String, GraphError> {
        match group_id {
            group::HOST => {
                let rack_port =
                    RackPort::from_id(port).ok_or(GraphError::InvalidPortId(port.0))?;
                Ok(format!("{}:{}", self.client_name, rack_port.name()))
            }
            group::AUDIO_IN => Ok(format!("AudioIn:{}", port.0)),
            group::AUDIO_OUT => Ok(format!("AudioOut:{}", port.0)),
            group::MIDI_IN => {
                let name = self
                    .midi_port_name(group::MIDI_IN, port)
                    .ok_or(GraphError::InvalidPortId(port.0))?;
                Ok(format!("MidiIn:{name}"))
            }
            group::MIDI_OUT => {
                let name = self
                    .midi_port_name(group::MIDI_OUT, port)
                    .ok_or(GraphError::InvalidPortId(port.0))?;
                Ok(format!("MidiOut:{name}"))
            }
            other => Err(GraphError::UnknownGroup(other.0)),
        }
    }

    /// Exact inverse of [`full_port_name`](Self::full_port_name).
    pub fn group_and_port_from_name(&self, full: &str) -> Result<(GroupId, PortId), GraphError> {
        let unknown = || GraphError::UnknownPortName(full.to_string());
        let (client, port) = full.split_once(':').ok_or_else(unknown)?;
        if client == self.client_name {
            let rack_port = RackPort::from_name(port).ok_or_else(unknown)?;
            return Ok((group::HOST, rack_port.id()));
        }
        match client {
            "AudioIn" => {
                let channel: u32 = port.parse().map_err(|_| unknown())?;
                Ok((group::AUDIO_IN, PortId(channel)))
            }
            "AudioOut" => {
                let channel: u32 = port.parse().map_err(|_| unknown())?;
                Ok((group::AUDIO_OUT, PortId(channel)))
            }
            "MidiIn" => self
                .midi_port_id(group::MIDI_IN, port)
                .map(|id| (group::MIDI_IN, id))
                .ok_or_else(unknown),
            "MidiOut" => self
                .midi_port_id(group::MIDI_OUT, port)
                .map(|id| (group::MIDI_OUT, id))
                .ok_or_else(unknown),
            _ => Err(unknown()),
        }
    }

    fn midi_names(&self, group_id: GroupId) -> &Mutex<Vec<PortNameToId>> {
        if group_id == group::MIDI_IN {
            &self.midi_in_names
        } else {
            &self.midi_out_names
        }
    }

    fn midi_port_name(&self, group_id: GroupId, port: PortId) -> Option<String> {
        self.midi_names(group_id)
            .lock()
            .iter()
            .find(|entry| entry.port == port)
            .map(|entry| entry.name.clone())
    }

    fn midi_port_id(&self, group_id: GroupId, name: &str) -> Option<PortId> {
        self.midi_names(group_id)
            .lock()
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.port)
    }

    /// The audio-thread entry point. Mixes hardware channels into the host's
    /// stereo pair, runs the chain, then distributes the result.
    ///
    /// Holds the `audio` mutex for the whole call; the chain below runs under
    /// it.
    pub fn process_helper(
        &self,
        rt: &mut RtData,
        ins: &[&[Sample]],
        outs: &mut [&mut [Sample]],
        frames: u32,
        offline: bool,
    ) {
        let n = frames as usize;
        let mut audio = self.audio.lock();
        let audio = &mut *audio;

        stage_input(&audio.connected_in1, ins, &mut audio.stage_in[0], n);
        stage_input(&audio.connected_in2, ins, &mut audio.stage_in[1], n);

        self.process(audio, rt, frames, offline);

        for (list, channel) in [
            (&audio.connected_out1, &audio.chain_out[0]),
            (&audio.connected_out2, &audio.chain_out[1]),
        ] {
            for &port in list.iter() {
                if let Some(out) = outs.get_mut(port as usize - 1) {
                    let len = n.min(out.len());
                    for (d, s) in izip!(&mut out[..len], &channel[..len]) {
                        *d += *s;
                    }
                }
            }
        }
    }

    /// The plugin chain between the host's stereo input and output. Runs
    /// under the `audio` mutex held by `process_helper`.
    fn process(&self, audio: &mut RackAudio, rt: &mut RtData, frames: u32, offline: bool) {
        let n = frames as usize;

        for c in 0..2 {
            audio.chain_in[c][..n].copy_from_slice(&audio.stage_in[c][..n]);
            audio.chain_out[c][..n].fill(0.0);
        }
        rt.events_out.clear();

        let mut processed = false;
        let mut prev_midi_out = 0u32;

        for slot in rt.plugins.iter_mut() {
            let Some(plugin) = slot.plugin.as_mut() else {
                continue;
            };
            if !plugin.is_enabled() || !plugin.try_lock(offline) {
                continue;
            }

            if processed {
                // the previous plugin's output feeds this one
                for c in 0..2 {
                    audio.chain_in[c][..n].copy_from_slice(&audio.chain_out[c][..n]);
                    audio.chain_out[c][..n].fill(0.0);
                }
                if prev_midi_out == 0 && !rt.events_in.is_empty() {
                    // upstream MIDI survives a plugin with no event output:
                    // merge it with whatever already accumulated, by time
                    audio
                        .events_scratch
                        .merge_sorted(rt.events_in.as_slice(), rt.events_out.as_slice());
                    rt.events_in.copy_from(audio.events_scratch.as_slice());
                } else {
                    rt.events_in.copy_from(rt.events_out.as_slice());
                }
                rt.events_out.clear();
            }

            let old_audio_in = plugin.audio_in_count();
            prev_midi_out = plugin.midi_out_count();

            plugin.init_buffers();
            {
                let ins: [&[Sample]; 2] =
                    [&audio.chain_in[0][..n], &audio.chain_in[1][..n]];
                let [out_l, out_r] = &mut audio.chain_out;
                let mut outs: [&mut [Sample]; 2] = [&mut out_l[..n], &mut out_r[..n]];
                plugin.process(
                    &ins,
                    &mut outs,
                    rt.events_in.as_slice(),
                    &mut rt.events_out,
                    frames,
                );
            }
            plugin.unlock();

            if old_audio_in == 0 {
                // a pure source keeps the upstream signal underneath it
                for c in 0..2 {
                    for (d, s) in izip!(&mut audio.chain_out[c][..n], &audio.chain_in[c][..n]) {
                        *d += *s;
                    }
                }
            }

            let has_audio_out = plugin.audio_out_count() > 0;
            for c in 0..2 {
                slot.ins_peak[c] = if old_audio_in > 0 {
                    signal_peak(&audio.chain_in[c][..n])
                } else {
                    0.0
                };
                slot.outs_peak[c] = if has_audio_out {
                    signal_peak(&audio.chain_out[c][..n])
                } else {
                    0.0
                };
            }

            processed = true;
        }

        if !processed {
            // nothing ran: the rack degenerates to a wire
            for c in 0..2 {
                audio.chain_out[c][..n].copy_from_slice(&audio.chain_in[c][..n]);
            }
        }
    }
}

/// Mixes the listed hardware channels into `dst`: the first source copies,
/// later sources add, and an empty list silences the channel.
fn stage_input(list: &[u32], ins: &[&[Sample]], dst: &mut [Sample], n: usize) {
    let mut first = true;
    for &port in list {
        let Some(src) = ins.get(port as usize - 1) else {
            continue;
        };
        let len = n.min(src.len());
        if first {
            dst[..len].copy_from_slice(&src[..len]);
            dst[len..n].fill(0.0);
            first = false;
        } else {
            for (d, s) in izip!(&mut dst[..len], &src[..len]) {
                *d += *s;
            }
        }
    }
    if first {
        dst[..n].fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullHostCallback;
    use std::sync::Arc;

    struct NoMidi;

    impl RackMidiIo for NoMidi {
        fn connect_midi_in(&mut self, _name: &str) -> bool {
            false
        }
        fn connect_midi_out(&mut self, _name: &str) -> bool {
            false
        }
        fn disconnect_midi_in(&mut self, _name: &str) -> bool {
            false
        }
        fn disconnect_midi_out(&mut self, _name: &str) -> bool {
            false
        }
    }

    fn rack() -> RackGraph {
        RackGraph::new(Arc::new(NullHostCallback), "Carla", 64, 2, 2)
    }

    #[test]
    fn connect_requires_exactly_one_host_endpoint() {
        let rack = rack();
        let mut midi = NoMidi;
        assert_eq!(
            rack.connect(
                &mut midi,
                group::HOST,
                RackPort::AudioOut1.id(),
                group::HOST,
                RackPort::AudioIn1.id()
            ),
            Err(GraphError::InvalidRackConnection)
        );
        assert_eq!(
            rack.connect(&mut midi, group::AUDIO_IN, PortId(1), group::AUDIO_OUT, PortId(1)),
            Err(GraphError::InvalidRackConnection)
        );
    }

    #[test]
    fn connect_rejects_wrong_direction_and_range() {
        let rack = rack();
        let mut midi = NoMidi;
        // host audio-in must be the target, not the source
        assert_eq!(
            rack.connect(
                &mut midi,
                group::HOST,
                RackPort::AudioIn1.id(),
                group::AUDIO_IN,
                PortId(1)
            ),
            Err(GraphError::InvalidRackConnection)
        );
        // channel out of range for a 2-in device
        assert_eq!(
            rack.connect(
                &mut midi,
                group::AUDIO_IN,
                PortId(3),
                group::HOST,
                RackPort::AudioIn1.id()
            ),
            Err(GraphError::InvalidRackConnection)
        );
    }

    #[test]
    fn duplicate_channel_entries_are_rejected() {
        let rack = rack();
        let mut midi = NoMidi;
        rack.connect(
            &mut midi,
            group::AUDIO_IN,
            PortId(1),
            group::HOST,
            RackPort::AudioIn1.id(),
        )
        .unwrap();
        assert_eq!(
            rack.connect(
                &mut midi,
                group::AUDIO_IN,
                PortId(1),
                group::HOST,
                RackPort::AudioIn1.id()
            ),
            Err(GraphError::InvalidRackConnection)
        );
    }

    #[test]
    fn disconnect_unknown_id_fails() {
        let rack = rack();
        let mut midi = NoMidi;
        assert_eq!(
            rack.disconnect(&mut midi, ConnectionId(99)),
            Err(GraphError::ConnectionNotFound)
        );
    }

    #[test]
    fn full_names_round_trip() {
        let rack = rack();
        rack.refresh(&["Keystation".to_string()], &["Synth DIN".to_string()]);
        for (group_id, port) in [
            (group::HOST, RackPort::AudioIn1.id()),
            (group::HOST, RackPort::MidiOut.id()),
            (group::AUDIO_IN, PortId(2)),
            (group::AUDIO_OUT, PortId(1)),
            (group::MIDI_IN, PortId(1)),
            (group::MIDI_OUT, PortId(1)),
        ] {
            let full = rack.full_port_name(group_id, port).unwrap();
            assert_eq!(
                rack.group_and_port_from_name(&full).unwrap(),
                (group_id, port),
                "round trip failed for {full}"
            );
        }
    }

    #[test]
    fn midi_connect_failure_is_not_registered() {
        let rack = rack();
        rack.refresh(&["Keystation".to_string()], &[]);
        let mut midi = NoMidi;
        let result = rack.connect(
            &mut midi,
            group::MIDI_IN,
            PortId(1),
            group::HOST,
            RackPort::MidiIn.id(),
        );
        assert!(matches!(result, Err(GraphError::MidiPort(_))));
        assert!(rack.connections().is_empty());
    }
}
