//! The patchbay's underlying audio-processor graph.
//!
//! Nodes are the four hardware pseudo-clients plus one node per plugin; edges
//! carry raw channel indices, with a sentinel index for MIDI. Scheduling is a
//! cached topological order rebuilt on every structural change, so block
//! processing just walks the cache and forwards buffers.

use hashbrown::HashMap;
use petgraph::algo::has_path_connecting;
use petgraph::prelude::{Direction, EdgeRef, StableDiGraph};
use petgraph::visit::{DfsPostOrder, IntoEdgeReferences};
use rustc_hash::FxBuildHasher;

use crate::connection::GroupId;
use crate::event::{EngineEvent, EventBuffer, MAX_EVENT_COUNT};
use crate::graph::GraphError;
use crate::plugin::Plugin;
use crate::Sample;

pub(crate) type GraphIx = u32;
pub(crate) type NodeIndex = petgraph::graph::NodeIndex<GraphIx>;

pub(crate) type DiGraph = StableDiGraph<PatchNode, PortEdge, GraphIx>;

/// Sentinel channel index carrying MIDI through the graph.
pub(crate) const MIDI_CHANNEL: u32 = u32::MAX;

/// Hard cap on audio channels per node; the per-block slice tables live on
/// the stack.
pub(crate) const MAX_NODE_CHANNELS: usize = 64;

/// An edge between two raw node channels.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PortEdge {
    pub source_port: u32,
    pub target_port: u32,
}

impl std::fmt::Debug for PortEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_port = |port: u32| -> String {
            if port == MIDI_CHANNEL {
                "midi".to_string()
            } else {
                port.to_string()
            }
        };
        write!(f, "{}->{}", fmt_port(self.source_port), fmt_port(self.target_port))
    }
}

/// What a node wraps: a hardware pseudo-client or a plugin.
pub(crate) enum NodeKind {
    AudioIn,
    AudioOut,
    MidiIn,
    MidiOut,
    Plugin(PluginNode),
}

pub(crate) struct PluginNode {
    pub instance: Box<dyn Plugin>,
    /// Dense plugin index, kept in `[0, count)` by the patchbay.
    pub plugin_id: u32,
}

/// A node plus its channel buffers.
///
/// `audio_in` is the summing scratch the graph merges sources into;
/// `audio_out` is what downstream nodes read. The hardware pseudo-nodes leave
/// one side empty: capture has no inputs, playback no outputs.
pub(crate) struct PatchNode {
    pub group: GroupId,
    pub kind: NodeKind,
    pub audio_in: Vec<Vec<Sample>>,
    pub audio_out: Vec<Vec<Sample>>,
    pub events_in: EventBuffer,
    pub events_out: EventBuffer,
}

impl std::fmt::Debug for PatchNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (group {})", self.name(), self.group.0)
    }
}

impl PatchNode {
    fn new(
        group: GroupId,
        kind: NodeKind,
        audio_ins: usize,
        audio_outs: usize,
        buffer_size: usize,
        event_capacity: usize,
    ) -> Self {
        let audio_ins = audio_ins.min(MAX_NODE_CHANNELS);
        let audio_outs = audio_outs.min(MAX_NODE_CHANNELS);
        Self {
            group,
            kind,
            audio_in: vec![vec![0.0; buffer_size]; audio_ins],
            audio_out: vec![vec![0.0; buffer_size]; audio_outs],
            events_in: EventBuffer::with_capacity(event_capacity),
            events_out: EventBuffer::with_capacity(event_capacity),
        }
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::AudioIn => "AudioIn",
            NodeKind::AudioOut => "AudioOut",
            NodeKind::MidiIn => "MidiIn",
            NodeKind::MidiOut => "MidiOut",
            NodeKind::Plugin(node) => node.instance.name(),
        }
    }

    #[inline]
    pub fn audio_in_count(&self) -> usize {
        self.audio_in.len()
    }

    #[inline]
    pub fn audio_out_count(&self) -> usize {
        self.audio_out.len()
    }

    pub fn accepts_midi(&self) -> bool {
        match &self.kind {
            NodeKind::MidiOut => true,
            NodeKind::Plugin(node) => node.instance.accepts_midi(),
            _ => false,
        }
    }

    pub fn produces_midi(&self) -> bool {
        match &self.kind {
            NodeKind::MidiIn => true,
            NodeKind::Plugin(node) => node.instance.produces_midi(),
            _ => false,
        }
    }

    pub fn plugin_id(&self) -> Option<u32> {
        match &self.kind {
            NodeKind::Plugin(node) => Some(node.plugin_id),
            _ => None,
        }
    }

    /// Rebuilds the channel buffers for a new block size (build-then-swap;
    /// callers hold the graph lock so no block observes the transition).
    fn resize(&mut self, buffer_size: usize) {
        for buffer in self.audio_in.iter_mut() {
            *buffer = vec![0.0; buffer_size];
        }
        for buffer in self.audio_out.iter_mut() {
            *buffer = vec![0.0; buffer_size];
        }
    }

    /// Runs the node for one block. Inputs have already been merged into
    /// `audio_in`/`events_in` by the graph.
    fn process(&mut self, frames: u32, offline: bool) {
        let n = frames as usize;
        let NodeKind::Plugin(plugin_node) = &mut self.kind else {
            // pseudo-nodes are staged and collected by the graph itself
            return;
        };
        let plugin = plugin_node.instance.as_mut();

        self.events_out.clear();
        if !plugin.is_enabled() || !plugin.try_lock(offline) {
            for buffer in self.audio_out.iter_mut() {
                buffer[..n].fill(0.0);
            }
            self.events_in.clear();
            return;
        }

        plugin.init_buffers();

        let mut in_refs: [&[Sample]; MAX_NODE_CHANNELS] = [&[]; MAX_NODE_CHANNELS];
        for (slot, buffer) in in_refs.iter_mut().zip(self.audio_in.iter()) {
            *slot = &buffer[..n];
        }
        let audio_in_len = self.audio_in.len();
        let audio_out_len = self.audio_out.len();
        let mut out_iter = self.audio_out.iter_mut();
        let mut out_refs: [&mut [Sample]; MAX_NODE_CHANNELS] =
            std::array::from_fn(|_| match out_iter.next() {
                Some(buffer) => &mut buffer[..n],
                None => &mut [],
            });

        plugin.process(
            &in_refs[..audio_in_len],
            &mut out_refs[..audio_out_len],
            self.events_in.as_slice(),
            &mut self.events_out,
            frames,
        );
        plugin.unlock();
    }
}

fn port_is_valid(node: &PatchNode, port: u32, output: bool) -> bool {
    if port == MIDI_CHANNEL {
        if output {
            node.produces_midi()
        } else {
            node.accepts_midi()
        }
    } else if output {
        (port as usize) < node.audio_out_count()
    } else {
        (port as usize) < node.audio_in_count()
    }
}

/// The processor graph itself. All mutation runs on control threads under the
/// owning patchbay's lock; `process` runs on the audio thread.
pub(crate) struct ProcessorGraph {
    digraph: DiGraph,
    nodes: HashMap<GroupId, NodeIndex, FxBuildHasher>,

    // cached schedule and per-block edge scratch, so process() never allocates
    order: Vec<NodeIndex>,
    edge_cache: Vec<(NodeIndex, PortEdge)>,

    buffer_size: usize,
    num_outputs: usize,

    audio_in: NodeIndex,
    audio_out: NodeIndex,
    midi_in: NodeIndex,
    midi_out: NodeIndex,
}

impl ProcessorGraph {
    pub fn new(buffer_size: usize, inputs: usize, outputs: usize) -> Self {
        use crate::connection::group;

        let mut digraph = DiGraph::default();
        let mut nodes = HashMap::default();

        // the two MIDI pseudo-nodes carry double-capacity buffers so merged
        // streams survive a full block of events on both sides
        let audio_in = digraph.add_node(PatchNode::new(
            group::AUDIO_IN,
            NodeKind::AudioIn,
            0,
            inputs,
            buffer_size,
            MAX_EVENT_COUNT,
        ));
        let audio_out = digraph.add_node(PatchNode::new(
            group::AUDIO_OUT,
            NodeKind::AudioOut,
            outputs,
            0,
            buffer_size,
            MAX_EVENT_COUNT,
        ));
        let midi_in = digraph.add_node(PatchNode::new(
            group::MIDI_IN,
            NodeKind::MidiIn,
            0,
            0,
            buffer_size,
            MAX_EVENT_COUNT * 2,
        ));
        let midi_out = digraph.add_node(PatchNode::new(
            group::MIDI_OUT,
            NodeKind::MidiOut,
            0,
            0,
            buffer_size,
            MAX_EVENT_COUNT * 2,
        ));
        nodes.insert(group::AUDIO_IN, audio_in);
        nodes.insert(group::AUDIO_OUT, audio_out);
        nodes.insert(group::MIDI_IN, midi_in);
        nodes.insert(group::MIDI_OUT, midi_out);

        let mut graph = Self {
            digraph,
            nodes,
            order: Vec::new(),
            edge_cache: Vec::new(),
            buffer_size,
            num_outputs: outputs,
            audio_in,
            audio_out,
            midi_in,
            midi_out,
        };
        graph.rebuild_order();
        graph
    }

    pub fn node_index(&self, group: GroupId) -> Option<NodeIndex> {
        self.nodes.get(&group).copied()
    }

    pub fn node(&self, group: GroupId) -> Option<&PatchNode> {
        self.node_index(group).map(|index| &self.digraph[index])
    }

    /// Group ids of every node, built-ins first, ascending.
    pub fn groups_sorted(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.nodes.keys().copied().collect();
        groups.sort();
        groups
    }

    pub fn add_plugin_node(&mut self, group: GroupId, instance: Box<dyn Plugin>, plugin_id: u32) {
        let audio_ins = instance.audio_in_count() as usize;
        let audio_outs = instance.audio_out_count() as usize;
        let node = PatchNode::new(
            group,
            NodeKind::Plugin(PluginNode { instance, plugin_id }),
            audio_ins,
            audio_outs,
            self.buffer_size,
            MAX_EVENT_COUNT,
        );
        let index = self.digraph.add_node(node);
        self.nodes.insert(group, index);
        self.rebuild_order();
    }

    /// Removes a node together with its edges.
    pub fn remove_node(&mut self, group: GroupId) -> Option<PatchNode> {
        let index = self.nodes.remove(&group)?;
        let node = self.digraph.remove_node(index);
        self.rebuild_order();
        node
    }

    pub fn find_plugin_group(&self, plugin_id: u32) -> Option<GroupId> {
        self.digraph.node_indices().find_map(|index| {
            let node = &self.digraph[index];
            (node.plugin_id() == Some(plugin_id)).then(|| node.group)
        })
    }

    /// Keeps plugin ids dense after `removed_id` went away.
    pub fn reindex_plugins_above(&mut self, removed_id: u32) {
        let indices: Vec<NodeIndex> = self.digraph.node_indices().collect();
        for index in indices {
            if let NodeKind::Plugin(plugin_node) = &mut self.digraph[index].kind {
                if plugin_node.plugin_id > removed_id {
                    plugin_node.plugin_id -= 1;
                }
            }
        }
    }

    /// Adds an edge between raw ports, validating existence, range, type
    /// compatibility, duplicates, and acyclicity.
    pub fn connect(
        &mut self,
        source_group: GroupId,
        source_port: u32,
        target_group: GroupId,
        target_port: u32,
    ) -> Result<(), GraphError> {
        let source = self
            .node_index(source_group)
            .ok_or(GraphError::UnknownGroup(source_group.0))?;
        let target = self
            .node_index(target_group)
            .ok_or(GraphError::UnknownGroup(target_group.0))?;
        if source == target {
            return Err(GraphError::FeedbackLoop);
        }
        if (source_port == MIDI_CHANNEL) != (target_port == MIDI_CHANNEL) {
            return Err(GraphError::IncompatibleTypes);
        }
        if !port_is_valid(&self.digraph[source], source_port, true)
            || !port_is_valid(&self.digraph[target], target_port, false)
        {
            return Err(GraphError::PortOutOfRange);
        }
        for edge in self.digraph.edges_directed(target, Direction::Incoming) {
            let weight = edge.weight();
            if edge.source() == source
                && weight.source_port == source_port
                && weight.target_port == target_port
            {
                return Err(GraphError::DuplicateConnection);
            }
        }
        if has_path_connecting(&self.digraph, target, source, None) {
            return Err(GraphError::FeedbackLoop);
        }

        self.digraph.add_edge(
            source,
            target,
            PortEdge {
                source_port,
                target_port,
            },
        );
        self.rebuild_order();
        Ok(())
    }

    /// Removes the edge between raw ports.
    pub fn disconnect(
        &mut self,
        source_group: GroupId,
        source_port: u32,
        target_group: GroupId,
        target_port: u32,
    ) -> Result<(), GraphError> {
        let source = self
            .node_index(source_group)
            .ok_or(GraphError::UnknownGroup(source_group.0))?;
        let target = self
            .node_index(target_group)
            .ok_or(GraphError::UnknownGroup(target_group.0))?;
        let edge = self
            .digraph
            .edges_directed(target, Direction::Incoming)
            .find(|edge| {
                let weight = edge.weight();
                edge.source() == source
                    && weight.source_port == source_port
                    && weight.target_port == target_port
            })
            .map(|edge| edge.id())
            .ok_or(GraphError::ConnectionNotFound)?;
        self.digraph.remove_edge(edge);
        self.rebuild_order();
        Ok(())
    }

    /// Every edge as `(source group, source port, target group, target port)`.
    pub fn edges(&self) -> Vec<(GroupId, u32, GroupId, u32)> {
        self.digraph
            .edge_references()
            .map(|edge| {
                let weight = edge.weight();
                (
                    self.digraph[edge.source()].group,
                    weight.source_port,
                    self.digraph[edge.target()].group,
                    weight.target_port,
                )
            })
            .collect()
    }

    /// Drops edges that no longer address valid ports (e.g. a plugin whose
    /// channel counts shrank). Returns how many were removed.
    pub fn prune_illegal_edges(&mut self) -> usize {
        let mut bad = Vec::new();
        for edge in self.digraph.edge_references() {
            let source = &self.digraph[edge.source()];
            let target = &self.digraph[edge.target()];
            let weight = edge.weight();
            let type_ok = (weight.source_port == MIDI_CHANNEL) == (weight.target_port == MIDI_CHANNEL);
            if !type_ok
                || !port_is_valid(source, weight.source_port, true)
                || !port_is_valid(target, weight.target_port, false)
            {
                bad.push(edge.id());
            }
        }
        let count = bad.len();
        for id in bad {
            self.digraph.remove_edge(id);
        }
        if count > 0 {
            log::warn!("removed {count} illegal patchbay edges");
            self.rebuild_order();
        }
        count
    }

    /// Rebuilds every node's channel buffers for a new block size.
    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        self.buffer_size = buffer_size;
        let indices: Vec<NodeIndex> = self.digraph.node_indices().collect();
        for index in indices {
            self.digraph[index].resize(buffer_size);
        }
    }

    /// Recomputes the cached topological order and the edge-scratch capacity.
    ///
    /// DFS post-order from the incoming-external roots, reversed. Cycles are
    /// rejected at connect time, so every node appears exactly once.
    fn rebuild_order(&mut self) {
        self.order.clear();
        let mut visitor = DfsPostOrder::empty(&self.digraph);
        for node in self.digraph.externals(Direction::Incoming) {
            visitor.stack.push(node);
        }
        while let Some(node) = visitor.next(&self.digraph) {
            self.order.push(node);
        }
        self.order.reverse();

        let mut max_edges = 0;
        for node in self.digraph.node_indices() {
            max_edges = max_edges.max(
                self.digraph
                    .edges_directed(node, Direction::Incoming)
                    .count(),
            );
        }
        if self.edge_cache.capacity() < max_edges {
            self.edge_cache.reserve(max_edges);
        }
    }

    /// Processes one block: stage the hardware sources, walk the schedule
    /// merging inputs additively and running each node, then collect the
    /// hardware sinks.
    pub fn process(
        &mut self,
        ins: &[&[Sample]],
        outs: &mut [&mut [Sample]],
        events_in: &[EngineEvent],
        events_out: &mut EventBuffer,
        frames: u32,
        offline: bool,
    ) {
        let n = frames as usize;

        {
            let node = &mut self.digraph[self.audio_in];
            for (channel, buffer) in node.audio_out.iter_mut().enumerate() {
                match ins.get(channel) {
                    Some(src) if src.len() >= n => buffer[..n].copy_from_slice(&src[..n]),
                    _ => buffer[..n].fill(0.0),
                }
            }
        }
        {
            let node = &mut self.digraph[self.midi_in];
            node.events_out.clear();
            node.events_out.extend_from(events_in);
        }

        for i in 0..self.order.len() {
            let node_id = self.order[i];

            self.edge_cache.clear();
            self.edge_cache.extend(
                self.digraph
                    .edges_directed(node_id, Direction::Incoming)
                    .map(|edge| (edge.source(), *edge.weight())),
            );

            {
                let node = &mut self.digraph[node_id];
                for buffer in node.audio_in.iter_mut() {
                    buffer[..n].fill(0.0);
                }
                node.events_in.clear();
            }

            let mut midi_sources = 0;
            for k in 0..self.edge_cache.len() {
                let (source_id, edge) = self.edge_cache[k];
                let (source, target) = self.digraph.index_twice_mut(source_id, node_id);
                if edge.target_port == MIDI_CHANNEL {
                    target.events_in.extend_from(source.events_out.as_slice());
                    midi_sources += 1;
                } else {
                    let src = &source.audio_out[edge.source_port as usize];
                    let dst = &mut target.audio_in[edge.target_port as usize];
                    for (d, s) in dst[..n].iter_mut().zip(&src[..n]) {
                        *d += *s;
                    }
                }
            }

            let node = &mut self.digraph[node_id];
            if midi_sources > 1 {
                node.events_in.sort_by_time();
            }
            node.process(frames, offline);
        }

        {
            let node = &self.digraph[self.audio_out];
            for (channel, out) in outs.iter_mut().enumerate().take(self.num_outputs) {
                if let Some(src) = node.audio_in.get(channel) {
                    let len = n.min(out.len());
                    out[..len].copy_from_slice(&src[..len]);
                }
            }
        }
        {
            let node = &self.digraph[self.midi_out];
            events_out.extend_from(node.events_in.as_slice());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::group;

    struct Gain {
        id: u32,
        factor: Sample,
    }

    impl Plugin for Gain {
        fn id(&self) -> u32 {
            self.id
        }
        fn name(&self) -> &str {
            "Gain"
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
                audio_out[0][i] = audio_in[0][i] * self.factor;
            }
        }
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = ProcessorGraph::new(64, 1, 1);
        graph.add_plugin_node(GroupId(6), Box::new(Gain { id: 0, factor: 1.0 }), 0);
        graph.add_plugin_node(GroupId(7), Box::new(Gain { id: 1, factor: 1.0 }), 1);
        graph.connect(GroupId(6), 0, GroupId(7), 0).unwrap();
        assert_eq!(
            graph.connect(GroupId(7), 0, GroupId(6), 0),
            Err(GraphError::FeedbackLoop)
        );
    }

    #[test]
    fn duplicate_edges_are_rejected() {
        let mut graph = ProcessorGraph::new(64, 1, 1);
        graph.add_plugin_node(GroupId(6), Box::new(Gain { id: 0, factor: 1.0 }), 0);
        graph.connect(group::AUDIO_IN, 0, GroupId(6), 0).unwrap();
        assert_eq!(
            graph.connect(group::AUDIO_IN, 0, GroupId(6), 0),
            Err(GraphError::DuplicateConnection)
        );
    }

    #[test]
    fn sources_merge_additively() {
        let mut graph = ProcessorGraph::new(4, 2, 1);
        graph.connect(group::AUDIO_IN, 0, group::AUDIO_OUT, 0).unwrap();
        graph.connect(group::AUDIO_IN, 1, group::AUDIO_OUT, 0).unwrap();

        let left = [0.25; 4];
        let right = [0.5; 4];
        let mut out = [0.0; 4];
        let mut events_out = EventBuffer::new();
        graph.process(
            &[&left[..], &right[..]],
            &mut [&mut out[..]],
            &[],
            &mut events_out,
            4,
            false,
        );
        assert_eq!(out, [0.75; 4]);
    }

    #[test]
    fn chained_plugins_run_in_topological_order() {
        let mut graph = ProcessorGraph::new(4, 1, 1);
        graph.add_plugin_node(GroupId(6), Box::new(Gain { id: 0, factor: 2.0 }), 0);
        graph.add_plugin_node(GroupId(7), Box::new(Gain { id: 1, factor: 3.0 }), 1);
        // connect out of order on purpose
        graph.connect(GroupId(7), 0, group::AUDIO_OUT, 0).unwrap();
        graph.connect(group::AUDIO_IN, 0, GroupId(6), 0).unwrap();
        graph.connect(GroupId(6), 0, GroupId(7), 0).unwrap();

        let input = [0.1; 4];
        let mut out = [0.0; 4];
        let mut events_out = EventBuffer::new();
        graph.process(
            &[&input[..]],
            &mut [&mut out[..]],
            &[],
            &mut events_out,
            4,
            false,
        );
        for sample in out {
            assert!((sample - 0.6).abs() < 1e-6);
        }
    }

    #[test]
    fn removing_a_node_drops_its_edges() {
        let mut graph = ProcessorGraph::new(4, 1, 1);
        graph.add_plugin_node(GroupId(6), Box::new(Gain { id: 0, factor: 2.0 }), 0);
        graph.connect(group::AUDIO_IN, 0, GroupId(6), 0).unwrap();
        graph.connect(GroupId(6), 0, group::AUDIO_OUT, 0).unwrap();
        assert_eq!(graph.edges().len(), 2);
        graph.remove_node(GroupId(6));
        assert!(graph.edges().is_empty());
    }
}
