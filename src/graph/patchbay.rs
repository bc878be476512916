//! The general patchbay graph.
//!
//! A thin facade over [`ProcessorGraph`]: it translates the offset-encoded
//! port ids of the public API into raw channels, keeps the connection
//! registry in sync with the underlying edge set, and publishes topology
//! events. Control threads mutate under the locks; the audio thread only
//! try-locks and produces silence for the block when it loses the race.

use parking_lot::Mutex;

use crate::connection::{
    group, Connection, ConnectionId, ConnectionRegistry, GroupId, PatchPort, PortId,
    MAX_PATCHBAY_PLUGINS,
};
use crate::engine::RtData;
use crate::graph::processor::{NodeKind, PatchNode, ProcessorGraph, MIDI_CHANNEL};
use crate::graph::GraphError;
use crate::host::{ClientIcon, HostEvent, HostHandle, PortFlags};
use crate::plugin::Plugin;
use crate::Sample;

struct PatchbayControl {
    registry: ConnectionRegistry,
    next_group: u32,
}

/// The patchbay graph: plugin nodes, hardware pseudo-nodes, and arbitrary
/// type-compatible connections between them.
pub struct PatchbayGraph {
    host: HostHandle,
    inner: Mutex<ProcessorGraph>,
    ctl: Mutex<PatchbayControl>,
    inputs: u32,
    outputs: u32,
}

impl PatchbayGraph {
    pub fn new(host: HostHandle, buffer_size: u32, inputs: u32, outputs: u32) -> Self {
        let inputs = inputs.min(MAX_PATCHBAY_PLUGINS - 2);
        let outputs = outputs.min(MAX_PATCHBAY_PLUGINS - 2);
        Self {
            host,
            inner: Mutex::new(ProcessorGraph::new(
                buffer_size as usize,
                inputs as usize,
                outputs as usize,
            )),
            ctl: Mutex::new(PatchbayControl {
                registry: ConnectionRegistry::new(),
                next_group: group::FIRST_PLUGIN.0,
            }),
            inputs,
            outputs,
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

    /// Rebuilds every node's buffers for a new block size. The engine
    /// quiesces the audio thread around this.
    pub fn set_buffer_size(&self, buffer_size: u32) {
        self.inner.lock().set_buffer_size(buffer_size as usize);
    }

    /// Connects two encoded ports: `(source_group, source_port)` must address
    /// an output, the target an input of the same type.
    pub fn connect(
        &self,
        source_group: GroupId,
        source_port: PortId,
        target_group: GroupId,
        target_port: PortId,
    ) -> Result<ConnectionId, GraphError> {
        let source = PatchPort::decode(source_port).ok_or(GraphError::InvalidPortId(source_port.0))?;
        let target = PatchPort::decode(target_port).ok_or(GraphError::InvalidPortId(target_port.0))?;
        if !source.is_output() || !target.is_input() {
            return Err(GraphError::IncompatibleDirections);
        }
        if source.is_midi() != target.is_midi() {
            return Err(GraphError::IncompatibleTypes);
        }

        let id;
        let payload;
        {
            let mut ctl = self.ctl.lock();
            let mut inner = self.inner.lock();
            inner.connect(source_group, raw_channel(source), target_group, raw_channel(target))?;
            id = ctl.registry.next_id();
            let connection = Connection {
                id,
                source_group,
                source_port,
                target_group,
                target_port,
            };
            ctl.registry.add(connection);
            payload = connection.payload();
        }
        self.host
            .on_event(HostEvent::PatchbayConnectionAdded { id, payload });
        Ok(id)
    }

    /// Removes the connection with the given id from the underlying graph and
    /// the registry.
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), GraphError> {
        {
            let mut ctl = self.ctl.lock();
            let connection = ctl
                .registry
                .find(id)
                .copied()
                .ok_or(GraphError::ConnectionNotFound)?;
            let source =
                PatchPort::decode(connection.source_port).ok_or(GraphError::ConnectionNotFound)?;
            let target =
                PatchPort::decode(connection.target_port).ok_or(GraphError::ConnectionNotFound)?;
            let mut inner = self.inner.lock();
            if let Err(err) = inner.disconnect(
                connection.source_group,
                raw_channel(source),
                connection.target_group,
                raw_channel(target),
            ) {
                log::warn!("registry held an edge the graph no longer has: {err}");
            }
            ctl.registry.remove(id);
        }
        self.host
            .on_event(HostEvent::PatchbayConnectionRemoved { id });
        Ok(())
    }

    /// Drops every registry entry touching `group_id` and fires the removal
    /// callbacks, leaving the underlying edges alone.
    ///
    /// Only call this when the node is about to be removed; node removal is
    /// what actually clears the edges.
    pub fn disconnect_group(&self, group_id: GroupId) {
        let removed = self
            .ctl
            .lock()
            .registry
            .take_matching(|c| c.touches(group_id));
        for connection in removed {
            self.host
                .on_event(HostEvent::PatchbayConnectionRemoved { id: connection.id });
        }
    }

    /// Wraps the plugin in a node, adds it to the graph, and announces the
    /// new client with its ports. Returns the node's group id.
    pub fn add_plugin(&self, plugin: Box<dyn Plugin>) -> Result<GroupId, GraphError> {
        let plugin_id = plugin.id();
        let mut events = Vec::new();
        let group_id;
        {
            let mut ctl = self.ctl.lock();
            let mut inner = self.inner.lock();
            group_id = GroupId(ctl.next_group);
            ctl.next_group += 1;
            inner.add_plugin_node(group_id, plugin, plugin_id);
            node_added_events(&inner, group_id, &mut events);
        }
        for event in events {
            self.host.on_event(event);
        }
        Ok(group_id)
    }

    /// Removes the node carrying `plugin_id`, its connections, and keeps the
    /// remaining plugin ids dense.
    pub fn remove_plugin(&self, plugin_id: u32) -> Result<(), GraphError> {
        let mut events = Vec::new();
        {
            let mut ctl = self.ctl.lock();
            let mut inner = self.inner.lock();
            let group_id = inner
                .find_plugin_group(plugin_id)
                .ok_or(GraphError::UnknownPlugin(plugin_id))?;
            for connection in ctl.registry.take_matching(|c| c.touches(group_id)) {
                events.push(HostEvent::PatchbayConnectionRemoved { id: connection.id });
            }
            node_removed_events(&inner, group_id, &mut events);
            inner.remove_node(group_id);
            inner.reindex_plugins_above(plugin_id);
        }
        for event in events {
            self.host.on_event(event);
        }
        Ok(())
    }

    /// Swaps in `replacement` under the node id currently carrying the same
    /// plugin index. Existing connections are dropped, not re-established.
    pub fn replace_plugin(&self, replacement: Box<dyn Plugin>) -> Result<GroupId, GraphError> {
        let plugin_id = replacement.id();
        let mut events = Vec::new();
        let group_id;
        {
            let mut ctl = self.ctl.lock();
            let mut inner = self.inner.lock();
            group_id = inner
                .find_plugin_group(plugin_id)
                .ok_or(GraphError::UnknownPlugin(plugin_id))?;
            for connection in ctl.registry.take_matching(|c| c.touches(group_id)) {
                events.push(HostEvent::PatchbayConnectionRemoved { id: connection.id });
            }
            node_removed_events(&inner, group_id, &mut events);
            inner.remove_node(group_id);
            inner.add_plugin_node(group_id, replacement, plugin_id);
            node_added_events(&inner, group_id, &mut events);
        }
        for event in events {
            self.host.on_event(event);
        }
        Ok(group_id)
    }

    /// Rebuilds the observable state from the underlying graph: clears the
    /// registry, prunes illegal edges, re-announces every node, then
    /// re-announces every edge under freshly issued connection ids.
    pub fn refresh(&self) {
        let mut events = Vec::new();
        {
            let mut ctl = self.ctl.lock();
            let mut inner = self.inner.lock();
            ctl.registry.clear();
            inner.prune_illegal_edges();

            for group_id in inner.groups_sorted() {
                node_added_events(&inner, group_id, &mut events);
            }
            for (source_group, source_raw, target_group, target_raw) in inner.edges() {
                let connection = Connection {
                    id: ctl.registry.next_id(),
                    source_group,
                    source_port: encode_output(source_raw),
                    target_group,
                    target_port: encode_input(target_raw),
                };
                ctl.registry.add(connection);
                events.push(HostEvent::PatchbayConnectionAdded {
                    id: connection.id,
                    payload: connection.payload(),
                });
            }
        }
        for event in events {
            self.host.on_event(event);
        }
    }

    /// Active connections as `(source, target)` full-name pairs.
    pub fn connections(&self) -> Vec<(String, String)> {
        let ctl = self.ctl.lock();
        let inner = self.inner.lock();
        ctl.registry
            .iter()
            .filter_map(|c| {
                let source = full_port_name_in(&inner, c.source_group, c.source_port).ok()?;
                let target = full_port_name_in(&inner, c.target_group, c.target_port).ok()?;
                Some((source, target))
            })
            .collect()
    }

    /// Encodes `(group, port)` as the full name announced for it.
    pub fn full_port_name(&self, group_id: GroupId, port: PortId) -> Result<String, GraphError> {
        full_port_name_in(&self.inner.lock(), group_id, port)
    }

    /// Exact inverse of [`full_port_name`](Self::full_port_name).
    pub fn group_and_port_from_name(&self, full: &str) -> Result<(GroupId, PortId), GraphError> {
        let unknown = || GraphError::UnknownPortName(full.to_string());
        let (client, port_name) = full.split_once(':').ok_or_else(unknown)?;
        let inner = self.inner.lock();
        let group_id = inner
            .groups_sorted()
            .into_iter()
            .find(|&g| inner.node(g).map(|n| n.name() == client).unwrap_or(false))
            .ok_or_else(unknown)?;
        let node = inner.node(group_id).ok_or_else(unknown)?;
        let port = port_from_name(node, port_name).ok_or_else(unknown)?;
        Ok((group_id, port))
    }

    /// The audio-thread entry point. On lock contention the block stays
    /// silent and nothing else happens.
    pub fn process(
        &self,
        rt: &mut RtData,
        ins: &[&[Sample]],
        outs: &mut [&mut [Sample]],
        frames: u32,
        offline: bool,
    ) {
        let Some(mut inner) = self.inner.try_lock() else {
            return;
        };
        inner.process(
            ins,
            outs,
            rt.events_in.as_slice(),
            &mut rt.events_out,
            frames,
            offline,
        );
    }
}

#[inline]
fn raw_channel(port: PatchPort) -> u32 {
    match port {
        PatchPort::AudioIn(channel) | PatchPort::AudioOut(channel) => channel,
        PatchPort::MidiIn | PatchPort::MidiOut => MIDI_CHANNEL,
    }
}

fn encode_output(raw: u32) -> PortId {
    if raw == MIDI_CHANNEL {
        PatchPort::MidiOut.encode()
    } else {
        PatchPort::AudioOut(raw).encode()
    }
}

fn encode_input(raw: u32) -> PortId {
    if raw == MIDI_CHANNEL {
        PatchPort::MidiIn.encode()
    } else {
        PatchPort::AudioIn(raw).encode()
    }
}

fn audio_in_port_name(node: &PatchNode, channel: usize) -> String {
    match node.kind {
        NodeKind::AudioOut => format!("playback_{}", channel + 1),
        _ => format!("audio-in-{}", channel + 1),
    }
}

fn audio_out_port_name(node: &PatchNode, channel: usize) -> String {
    match node.kind {
        NodeKind::AudioIn => format!("capture_{}", channel + 1),
        _ => format!("audio-out-{}", channel + 1),
    }
}

fn midi_in_port_name(node: &PatchNode) -> &'static str {
    match node.kind {
        NodeKind::MidiOut => "events",
        _ => "events-in",
    }
}

fn midi_out_port_name(node: &PatchNode) -> &'static str {
    match node.kind {
        NodeKind::MidiIn => "events",
        _ => "events-out",
    }
}

fn full_port_name_in(
    inner: &ProcessorGraph,
    group_id: GroupId,
    port: PortId,
) -> Result<String, GraphError> {
    let node = inner
        .node(group_id)
        .ok_or(GraphError::UnknownGroup(group_id.0))?;
    let patch_port = PatchPort::decode(port).ok_or(GraphError::InvalidPortId(port.0))?;
    let port_name = match patch_port {
        PatchPort::AudioIn(channel) => {
            if channel as usize >= node.audio_in_count() {
                return Err(GraphError::InvalidPortId(port.0));
            }
            audio_in_port_name(node, channel as usize)
        }
        PatchPort::AudioOut(channel) => {
            if channel as usize >= node.audio_out_count() {
                return Err(GraphError::InvalidPortId(port.0));
            }
            audio_out_port_name(node, channel as usize)
        }
        PatchPort::MidiIn => {
            if !node.accepts_midi() {
                return Err(GraphError::InvalidPortId(port.0));
            }
            midi_in_port_name(node).to_string()
        }
        PatchPort::MidiOut => {
            if !node.produces_midi() {
                return Err(GraphError::InvalidPortId(port.0));
            }
            midi_out_port_name(node).to_string()
        }
    };
    Ok(format!("{}:{}", node.name(), port_name))
}

fn port_from_name(node: &PatchNode, name: &str) -> Option<PortId> {
    let parse_channel = |name: &str, prefix: &str| -> Option<u32> {
        let n: u32 = name.strip_prefix(prefix)?.parse().ok()?;
        (n >= 1).then(|| n - 1)
    };
    match node.kind {
        NodeKind::AudioIn => {
            let channel = parse_channel(name, "capture_")?;
            ((channel as usize) < node.audio_out_count())
                .then(|| PatchPort::AudioOut(channel).encode())
        }
        NodeKind::AudioOut => {
            let channel = parse_channel(name, "playback_")?;
            ((channel as usize) < node.audio_in_count())
                .then(|| PatchPort::AudioIn(channel).encode())
        }
        NodeKind::MidiIn => (name == "events").then(|| PatchPort::MidiOut.encode()),
        NodeKind::MidiOut => (name == "events").then(|| PatchPort::MidiIn.encode()),
        NodeKind::Plugin(_) => {
            if name == "events-in" {
                return node.accepts_midi().then(|| PatchPort::MidiIn.encode());
            }
            if name == "events-out" {
                return node.produces_midi().then(|| PatchPort::MidiOut.encode());
            }
            if let Some(channel) = parse_channel(name, "audio-in-") {
                return ((channel as usize) < node.audio_in_count())
                    .then(|| PatchPort::AudioIn(channel).encode());
            }
            let channel = parse_channel(name, "audio-out-")?;
            ((channel as usize) < node.audio_out_count())
                .then(|| PatchPort::AudioOut(channel).encode())
        }
    }
}

fn node_added_events(inner: &ProcessorGraph, group_id: GroupId, events: &mut Vec<HostEvent>) {
    let Some(node) = inner.node(group_id) else {
        return;
    };
    let icon = match node.kind {
        NodeKind::Plugin(_) => ClientIcon::Plugin,
        _ => ClientIcon::Hardware,
    };
    events.push(HostEvent::PatchbayClientAdded {
        group: group_id,
        icon,
        plugin_id: node.plugin_id(),
        name: node.name().to_string(),
    });
    for channel in 0..node.audio_in_count() {
        events.push(HostEvent::PatchbayPortAdded {
            group: group_id,
            port: PatchPort::AudioIn(channel as u32).encode(),
            flags: PortFlags::AUDIO | PortFlags::INPUT,
            name: audio_in_port_name(node, channel),
        });
    }
    for channel in 0..node.audio_out_count() {
        events.push(HostEvent::PatchbayPortAdded {
            group: group_id,
            port: PatchPort::AudioOut(channel as u32).encode(),
            flags: PortFlags::AUDIO,
            name: audio_out_port_name(node, channel),
        });
    }
    if node.accepts_midi() {
        events.push(HostEvent::PatchbayPortAdded {
            group: group_id,
            port: PatchPort::MidiIn.encode(),
            flags: PortFlags::MIDI | PortFlags::INPUT,
            name: midi_in_port_name(node).to_string(),
        });
    }
    if node.produces_midi() {
        events.push(HostEvent::PatchbayPortAdded {
            group: group_id,
            port: PatchPort::MidiOut.encode(),
            flags: PortFlags::MIDI,
            name: midi_out_port_name(node).to_string(),
        });
    }
}

fn node_removed_events(inner: &ProcessorGraph, group_id: GroupId, events: &mut Vec<HostEvent>) {
    let Some(node) = inner.node(group_id) else {
        return;
    };
    for channel in 0..node.audio_in_count() {
        events.push(HostEvent::PatchbayPortRemoved {
            group: group_id,
            port: PatchPort::AudioIn(channel as u32).encode(),
        });
    }
    for channel in 0..node.audio_out_count() {
        events.push(HostEvent::PatchbayPortRemoved {
            group: group_id,
            port: PatchPort::AudioOut(channel as u32).encode(),
        });
    }
    if node.accepts_midi() {
        events.push(HostEvent::PatchbayPortRemoved {
            group: group_id,
            port: PatchPort::MidiIn.encode(),
        });
    }
    if node.produces_midi() {
        events.push(HostEvent::PatchbayPortRemoved {
            group: group_id,
            port: PatchPort::MidiOut.encode(),
        });
    }
    events.push(HostEvent::PatchbayClientRemoved { group: group_id });
}
