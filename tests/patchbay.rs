//! Patchbay-mode scenarios: graph wiring, plugin lifecycle, refresh, and the
//! registry properties.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use common::MonoGain;
use patchrack::connection::{group, ConnectionId, GroupId, PatchPort};
use patchrack::driver::DummyDriver;
use patchrack::engine::{Engine, EngineOptions, Topology};
use patchrack::graph::PatchbayGraph;
use patchrack::host::{HostEvent, HostHandle, NullHostCallback};

const BLOCK: u32 = 256;

fn null_host() -> HostHandle {
    Arc::new(NullHostCallback)
}

fn recording_host() -> (HostHandle, Arc<Mutex<Vec<HostEvent>>>) {
    let events: Arc<Mutex<Vec<HostEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handle: HostHandle = Arc::new(move |event: HostEvent| sink.lock().push(event));
    (handle, events)
}

/// A patchbay with two mono plugins (groups 6 and 7) and 1-in/1-out hardware.
fn two_plugin_graph(host: HostHandle) -> PatchbayGraph {
    let graph = PatchbayGraph::new(host, BLOCK, 1, 1);
    graph.add_plugin(Box::new(MonoGain::new(0, "A", 2.0))).unwrap();
    graph.add_plugin(Box::new(MonoGain::new(1, "B", 3.0))).unwrap();
    graph
}

fn patchbay_engine(inputs: u32, outputs: u32) -> Engine {
    let driver = DummyDriver::new(48000.0, BLOCK, inputs, outputs);
    let mut engine = Engine::new(
        Box::new(driver),
        EngineOptions {
            topology: Topology::Patchbay,
        },
        null_host(),
    );
    engine.init("Carla").unwrap();
    engine
}

#[test]
fn s4_removing_a_plugin_drops_its_connections_and_silences_the_chain() {
    let mut engine = patchbay_engine(1, 1);
    engine.add_plugin(Box::new(MonoGain::new(0, "A", 1.0))).unwrap();
    engine.add_plugin(Box::new(MonoGain::new(1, "B", 1.0))).unwrap();

    let a = GroupId(6);
    let b = GroupId(7);
    engine
        .patchbay_connect(
            group::AUDIO_IN,
            PatchPort::AudioOut(0).encode(),
            a,
            PatchPort::AudioIn(0).encode(),
        )
        .unwrap();
    engine
        .patchbay_connect(
            a,
            PatchPort::AudioOut(0).encode(),
            b,
            PatchPort::AudioIn(0).encode(),
        )
        .unwrap();
    engine
        .patchbay_connect(
            b,
            PatchPort::AudioOut(0).encode(),
            group::AUDIO_OUT,
            PatchPort::AudioIn(0).encode(),
        )
        .unwrap();

    let input = vec![0.5f32; BLOCK as usize];
    let mut out = vec![0.0f32; BLOCK as usize];
    engine.run_block(&[&input], &mut [&mut out]).unwrap();
    assert!(out.iter().all(|&s| s == 0.5));

    engine.remove_plugin(0).unwrap();

    let names = engine.get_patchbay_connections();
    assert_eq!(names, vec!["B:audio-out-1", "AudioOut:playback_1"]);

    out.fill(1.0);
    engine.run_block(&[&input], &mut [&mut out]).unwrap();
    assert!(out.iter().all(|&s| s == 0.0), "orphaned B must go silent");
}

#[test]
fn replace_plugin_keeps_the_node_id_but_not_the_connections() {
    let (host, events) = recording_host();
    let graph = two_plugin_graph(host);
    let a = GroupId(6);
    graph
        .connect(
            group::AUDIO_IN,
            PatchPort::AudioOut(0).encode(),
            a,
            PatchPort::AudioIn(0).encode(),
        )
        .unwrap();

    events.lock().clear();
    graph
        .replace_plugin(Box::new(MonoGain::new(0, "A2", 5.0)))
        .unwrap();

    assert!(graph.connections().is_empty());
    let events = events.lock();
    assert!(events
        .iter()
        .any(|e| matches!(e, HostEvent::PatchbayConnectionRemoved { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        HostEvent::PatchbayClientAdded { group, name, .. } if *group == a && name == "A2"
    )));
}

#[test]
fn refresh_is_idempotent_on_a_quiescent_graph() {
    let graph = two_plugin_graph(null_host());
    let a = GroupId(6);
    let b = GroupId(7);
    graph
        .connect(
            group::AUDIO_IN,
            PatchPort::AudioOut(0).encode(),
            a,
            PatchPort::AudioIn(0).encode(),
        )
        .unwrap();
    graph
        .connect(
            a,
            PatchPort::AudioOut(0).encode(),
            b,
            PatchPort::AudioIn(0).encode(),
        )
        .unwrap();

    graph.refresh();
    let mut first = graph.connections();
    graph.refresh();
    let mut second = graph.connections();
    first.sort();
    second.sort();
    assert_eq!(first, second);
}

#[test]
fn refresh_publishes_every_node_before_any_edge() {
    let (host, events) = recording_host();
    let graph = two_plugin_graph(host);
    graph
        .connect(
            GroupId(6),
            PatchPort::AudioOut(0).encode(),
            GroupId(7),
            PatchPort::AudioIn(0).encode(),
        )
        .unwrap();

    events.lock().clear();
    graph.refresh();

    let events = events.lock();
    let last_client = events
        .iter()
        .rposition(|e| matches!(e, HostEvent::PatchbayClientAdded { .. }))
        .unwrap();
    let first_edge = events
        .iter()
        .position(|e| matches!(e, HostEvent::PatchbayConnectionAdded { .. }))
        .unwrap();
    assert!(last_client < first_edge);
}

#[test]
fn port_names_round_trip_for_every_announced_port() {
    let (host, events) = recording_host();
    let graph = two_plugin_graph(host);
    graph.refresh();

    let events = events.lock();
    let mut checked = 0;
    for event in events.iter() {
        if let HostEvent::PatchbayPortAdded { group, port, .. } = event {
            let full = graph.full_port_name(*group, *port).unwrap();
            assert_eq!(
                graph.group_and_port_from_name(&full).unwrap(),
                (*group, *port),
                "round trip failed for {full}"
            );
            checked += 1;
        }
    }
    // hardware capture/playback, both plugins' audio ports, the MIDI pair
    assert!(checked >= 6, "expected a real port set, saw {checked}");
}

#[test]
fn midi_ports_connect_and_route_type_safely() {
    let graph = PatchbayGraph::new(null_host(), BLOCK, 1, 1);
    // hardware MIDI source to hardware MIDI sink is legal
    graph
        .connect(
            group::MIDI_IN,
            PatchPort::MidiOut.encode(),
            group::MIDI_OUT,
            PatchPort::MidiIn.encode(),
        )
        .unwrap();
    // audio into a MIDI port is not
    assert!(graph
        .connect(
            group::AUDIO_IN,
            PatchPort::AudioOut(0).encode(),
            group::MIDI_OUT,
            PatchPort::MidiIn.encode(),
        )
        .is_err());
    // nor input-to-input
    assert!(graph
        .connect(
            group::AUDIO_OUT,
            PatchPort::AudioIn(0).encode(),
            group::MIDI_OUT,
            PatchPort::MidiIn.encode(),
        )
        .is_err());
}

/// The candidate edges form a DAG, so any subset connects cleanly.
fn edge_pool() -> Vec<(GroupId, PatchPort, GroupId, PatchPort)> {
    let a = GroupId(6);
    let b = GroupId(7);
    vec![
        (group::AUDIO_IN, PatchPort::AudioOut(0), a, PatchPort::AudioIn(0)),
        (group::AUDIO_IN, PatchPort::AudioOut(0), b, PatchPort::AudioIn(0)),
        (a, PatchPort::AudioOut(0), b, PatchPort::AudioIn(0)),
        (a, PatchPort::AudioOut(0), group::AUDIO_OUT, PatchPort::AudioIn(0)),
        (b, PatchPort::AudioOut(0), group::AUDIO_OUT, PatchPort::AudioIn(0)),
    ]
}

proptest! {
    #[test]
    fn connect_then_disconnect_always_returns_to_empty(
        mut picks in proptest::collection::vec(0usize..5, 0..5),
        rotation in 0usize..5,
    ) {
        picks.sort();
        picks.dedup();

        let graph = two_plugin_graph(null_host());
        let pool = edge_pool();
        let mut ids: Vec<ConnectionId> = Vec::new();
        for &pick in &picks {
            let (sg, sp, tg, tp) = pool[pick];
            ids.push(graph.connect(sg, sp.encode(), tg, tp.encode()).unwrap());
        }

        // disconnect in an arbitrary rotation of insertion order
        if !ids.is_empty() {
            let cut = rotation % ids.len();
            ids.rotate_left(cut);
        }
        for id in ids {
            graph.disconnect(id).unwrap();
        }
        prop_assert!(graph.connections().is_empty());
    }

    #[test]
    fn connection_ids_are_strictly_increasing(count in 1usize..20) {
        let graph = two_plugin_graph(null_host());
        let a = GroupId(6);
        let mut last = ConnectionId(0);
        for _ in 0..count {
            let id = graph
                .connect(
                    group::AUDIO_IN,
                    PatchPort::AudioOut(0).encode(),
                    a,
                    PatchPort::AudioIn(0).encode(),
                )
                .unwrap();
            prop_assert!(id > last);
            last = id;
            graph.disconnect(id).unwrap();
        }
    }
}
