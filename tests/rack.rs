//! Rack-mode scenarios: wiring, chain processing, MIDI timing, and the
//! realtime discipline under connection churn.

mod common;

use std::sync::Arc;

use approx::assert_abs_diff_eq;

use common::{sine, Gain, MidiGen, MidiSink, Source};
use patchrack::connection::{group, PortId, RackPort};
use patchrack::driver::DummyDriver;
use patchrack::engine::{Engine, EngineOptions, RtData, Topology};
use patchrack::graph::{RackGraph, RackMidiIo};
use patchrack::host::NullHostCallback;
use patchrack::midi_queue::RtMidiEvent;
use patchrack::plugin::PluginSlot;

const SAMPLE_RATE: f64 = 48000.0;
const BLOCK: usize = 1024;

fn rack_engine(inputs: u32, outputs: u32) -> Engine {
    let driver = DummyDriver::new(SAMPLE_RATE, BLOCK as u32, inputs, outputs);
    let mut engine = Engine::new(
        Box::new(driver),
        EngineOptions {
            topology: Topology::Rack,
        },
        Arc::new(NullHostCallback),
    );
    engine.init("Carla").unwrap();
    engine
}

fn wire_stereo_channel_1(engine: &mut Engine) {
    engine
        .patchbay_connect(
            group::AUDIO_IN,
            PortId(1),
            group::HOST,
            RackPort::AudioIn1.id(),
        )
        .unwrap();
    engine
        .patchbay_connect(
            group::HOST,
            RackPort::AudioOut1.id(),
            group::AUDIO_OUT,
            PortId(1),
        )
        .unwrap();
}

#[test]
fn s1_empty_rack_passes_audio_through() {
    let mut engine = rack_engine(2, 2);
    wire_stereo_channel_1(&mut engine);

    let input = sine(0.5, BLOCK, SAMPLE_RATE as f32);
    let silent = vec![0.0f32; BLOCK];
    let mut out1 = vec![0.0f32; BLOCK];
    let mut out2 = vec![0.0f32; BLOCK];
    engine
        .run_block(&[&input, &silent], &mut [&mut out1, &mut out2])
        .unwrap();

    // bit-identical on the wired channel, silence on the other
    assert_eq!(out1, input);
    assert!(out2.iter().all(|&s| s == 0.0));
}

#[test]
fn s2_gain_plugin_doubles_the_signal() {
    let mut engine = rack_engine(2, 2);
    wire_stereo_channel_1(&mut engine);
    engine.add_plugin(Box::new(Gain::new(0, 2.0))).unwrap();

    let input = sine(0.25, BLOCK, SAMPLE_RATE as f32);
    let silent = vec![0.0f32; BLOCK];
    let mut out1 = vec![0.0f32; BLOCK];
    let mut out2 = vec![0.0f32; BLOCK];
    engine
        .run_block(&[&input, &silent], &mut [&mut out1, &mut out2])
        .unwrap();

    for (o, i) in out1.iter().zip(&input) {
        assert_abs_diff_eq!(*o, i * 2.0, epsilon = 1e-6);
    }
}

#[test]
fn s3_two_sources_sum_into_one_host_input() {
    let mut engine = rack_engine(2, 2);
    engine
        .patchbay_connect(
            group::AUDIO_IN,
            PortId(1),
            group::HOST,
            RackPort::AudioIn1.id(),
        )
        .unwrap();
    engine
        .patchbay_connect(
            group::AUDIO_IN,
            PortId(2),
            group::HOST,
            RackPort::AudioIn1.id(),
        )
        .unwrap();
    engine
        .patchbay_connect(
            group::HOST,
            RackPort::AudioOut1.id(),
            group::AUDIO_OUT,
            PortId(1),
        )
        .unwrap();

    let a = sine(0.3, BLOCK, SAMPLE_RATE as f32);
    let b = sine(0.3, BLOCK, SAMPLE_RATE as f32);
    let mut out1 = vec![0.0f32; BLOCK];
    let mut out2 = vec![0.0f32; BLOCK];
    engine
        .run_block(&[&a, &b], &mut [&mut out1, &mut out2])
        .unwrap();

    for (o, i) in out1.iter().zip(&a) {
        assert_abs_diff_eq!(*o, i * 2.0, epsilon = 1e-6);
    }
}

#[test]
fn bypass_rule_keeps_the_upstream_signal_under_a_source() {
    let mut engine = rack_engine(2, 2);
    wire_stereo_channel_1(&mut engine);
    engine
        .add_plugin(Box::new(Source { id: 0, value: 0.25 }))
        .unwrap();

    let input = sine(0.3, BLOCK, SAMPLE_RATE as f32);
    let silent = vec![0.0f32; BLOCK];
    let mut out1 = vec![0.0f32; BLOCK];
    let mut out2 = vec![0.0f32; BLOCK];
    engine
        .run_block(&[&input, &silent], &mut [&mut out1, &mut out2])
        .unwrap();

    // linearity: output = input + the source's contribution
    for (o, i) in out1.iter().zip(&input) {
        assert_abs_diff_eq!(*o, i + 0.25, epsilon = 1e-6);
    }
}

#[test]
fn disabled_plugins_are_skipped_entirely() {
    let mut engine = rack_engine(2, 2);
    wire_stereo_channel_1(&mut engine);
    let mut muted = Gain::new(0, 2.0);
    muted.enabled = false;
    engine.add_plugin(Box::new(muted)).unwrap();

    let input = sine(0.5, BLOCK, SAMPLE_RATE as f32);
    let silent = vec![0.0f32; BLOCK];
    let mut out1 = vec![0.0f32; BLOCK];
    let mut out2 = vec![0.0f32; BLOCK];
    engine
        .run_block(&[&input, &silent], &mut [&mut out1, &mut out2])
        .unwrap();

    assert_eq!(out1, input);
}

#[test]
fn chain_peaks_are_recorded_per_plugin() {
    let mut engine = rack_engine(2, 2);
    wire_stereo_channel_1(&mut engine);
    engine.add_plugin(Box::new(Gain::new(0, 2.0))).unwrap();

    let input = vec![0.25f32; BLOCK];
    let silent = vec![0.0f32; BLOCK];
    let mut out1 = vec![0.0f32; BLOCK];
    let mut out2 = vec![0.0f32; BLOCK];
    engine
        .run_block(&[&input, &silent], &mut [&mut out1, &mut out2])
        .unwrap();

    let ins = engine.input_peaks(0);
    let outs = engine.output_peaks(0);
    assert_abs_diff_eq!(ins[0], 0.25, epsilon = 1e-6);
    assert_abs_diff_eq!(outs[0], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(ins[1], 0.0, epsilon = 1e-6);
}

#[test]
fn s5_midi_timestamps_normalise_and_clamp() {
    let mut engine = rack_engine(2, 2);
    let (sink, seen) = MidiSink::new(0);
    engine.add_plugin(Box::new(sink)).unwrap();

    let queue = engine.midi_in_queue();
    // first block starts at frame 0
    queue.push(RtMidiEvent::new((BLOCK - 1) as u64, &[0x90, 60, 100]).unwrap());
    queue.push(RtMidiEvent::new((BLOCK + 10) as u64, &[0x90, 61, 100]).unwrap());

    let input = vec![0.0f32; BLOCK];
    let mut out1 = vec![0.0f32; BLOCK];
    let mut out2 = vec![0.0f32; BLOCK];
    engine
        .run_block(&[&input, &input], &mut [&mut out1, &mut out2])
        .unwrap();

    let times: Vec<u32> = seen.lock().iter().map(|e| e.time).collect();
    // in-range event keeps its offset, the late one clamps to the block end
    assert_eq!(times, vec![(BLOCK - 1) as u32, (BLOCK - 1) as u32]);
}

#[test]
fn s6_connection_ids_grow_across_reconnects() {
    let mut engine = rack_engine(2, 2);
    let first = engine
        .patchbay_connect(
            group::AUDIO_IN,
            PortId(1),
            group::HOST,
            RackPort::AudioIn1.id(),
        )
        .unwrap();
    engine.patchbay_disconnect(first).unwrap();
    let second = engine
        .patchbay_connect(
            group::AUDIO_IN,
            PortId(1),
            group::HOST,
            RackPort::AudioIn1.id(),
        )
        .unwrap();
    assert!(second > first);
}

#[test]
fn upstream_midi_survives_a_plugin_without_midi_output() {
    let mut engine = rack_engine(2, 2);
    engine.add_plugin(Box::new(Gain::new(0, 1.0))).unwrap();
    let (sink, seen) = MidiSink::new(1);
    engine.add_plugin(Box::new(sink)).unwrap();

    engine
        .midi_in_queue()
        .push(RtMidiEvent::new(10, &[0x90, 60, 100]).unwrap());

    let input = vec![0.0f32; BLOCK];
    let mut out1 = vec![0.0f32; BLOCK];
    let mut out2 = vec![0.0f32; BLOCK];
    engine
        .run_block(&[&input, &input], &mut [&mut out1, &mut out2])
        .unwrap();

    let times: Vec<u32> = seen.lock().iter().map(|e| e.time).collect();
    assert_eq!(times, vec![10]);
}

#[test]
fn a_midi_producer_replaces_the_engine_input_for_the_next_plugin() {
    let mut engine = rack_engine(2, 2);
    engine.add_plugin(Box::new(MidiGen { id: 0, time: 7 })).unwrap();
    let (sink, seen) = MidiSink::new(1);
    engine.add_plugin(Box::new(sink)).unwrap();

    // the generator has a MIDI output, so the engine-level event is consumed
    engine
        .midi_in_queue()
        .push(RtMidiEvent::new(3, &[0x90, 60, 100]).unwrap());

    let input = vec![0.0f32; BLOCK];
    let mut out1 = vec![0.0f32; BLOCK];
    let mut out2 = vec![0.0f32; BLOCK];
    engine
        .run_block(&[&input, &input], &mut [&mut out1, &mut out2])
        .unwrap();

    let times: Vec<u32> = seen.lock().iter().map(|e| e.time).collect();
    assert_eq!(times, vec![7]);
}

#[test]
fn connection_churn_never_blocks_the_audio_path() {
    let host = Arc::new(NullHostCallback);
    let rack = Arc::new(RackGraph::new(host, "Carla", 64, 2, 2));

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

    let flapper = {
        let rack = rack.clone();
        std::thread::spawn(move || {
            let mut midi = NoMidi;
            for _ in 0..2000 {
                let id = rack
                    .connect(
                        &mut midi,
                        group::AUDIO_IN,
                        PortId(1),
                        group::HOST,
                        RackPort::AudioIn1.id(),
                    )
                    .unwrap();
                rack.disconnect(&mut midi, id).unwrap();
            }
        })
    };

    let mut rt = RtData::new();
    rt.plugins.push(PluginSlot::new(Box::new(Gain::new(0, 1.0))));
    let input = vec![0.25f32; 64];
    let mut out1 = vec![0.0f32; 64];
    let mut out2 = vec![0.0f32; 64];
    for _ in 0..2000 {
        out1.fill(0.0);
        out2.fill(0.0);
        rack.process_helper(
            &mut rt,
            &[&input, &input],
            &mut [&mut out1, &mut out2],
            64,
            false,
        );
    }

    flapper.join().unwrap();
}
