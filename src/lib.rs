//! patchrack - an audio/MIDI routing engine for plugin hosts.
//!
//! The engine sits between a hardware audio device callback and a collection
//! of audio plugins. It routes audio and MIDI through one of two topologies:
//!
//! - **Rack**: a fixed six-port topology with a linear plugin chain between
//!   the host's stereo inputs and outputs.
//! - **Patchbay**: a general directed processing graph in which every plugin
//!   is a node with typed ports, scheduled per audio block in topological
//!   order.
//!
//! Topology changes (connect, disconnect, add/remove plugin) are driven from
//! control threads while the audio thread keeps processing; every lock the
//! audio thread takes is a try-lock, and contention degrades to silence or a
//! deferred MIDI drain rather than blocking.

use cpal::traits::{DeviceTrait, HostTrait};

use driver::{AudioBackend, DriverError};

pub mod connection;
pub mod driver;
pub mod engine;
pub mod event;
pub mod graph;
pub mod host;
pub mod midi_io;
pub mod midi_queue;
pub mod plugin;

/// The floating-point sample type processed by the engine.
pub type Sample = f32;

#[allow(unused_imports)]
pub mod prelude {
    pub use crate::connection::{
        group, Connection, ConnectionId, ConnectionRegistry, GroupId, PatchPort, PortId, RackPort,
    };
    pub use crate::driver::{AudioBackend, CpalDriver, DeviceSelector, Driver, DummyDriver};
    pub use crate::engine::{Engine, EngineError, EngineOptions, RtData, Topology};
    pub use crate::event::{ControlEvent, EngineEvent, EngineEventKind, EventBuffer, MidiData};
    pub use crate::graph::{GraphError, PatchbayGraph, RackGraph};
    pub use crate::host::{ClientIcon, HostCallback, HostEvent, HostHandle, PortFlags};
    pub use crate::midi_queue::{MidiInQueue, RtMidiEvent};
    pub use crate::plugin::{Plugin, PluginSlot};
    pub use crate::Sample;
}

/// Returns the audio backends available on this machine.
pub fn available_backends() -> Vec<AudioBackend> {
    let mut backends = vec![AudioBackend::Default];
    for host in cpal::available_hosts() {
        match host {
            #[cfg(all(target_os = "linux", feature = "jack"))]
            cpal::HostId::Jack => {
                backends.push(AudioBackend::Jack);
            }
            #[cfg(target_os = "linux")]
            cpal::HostId::Alsa => {
                backends.push(AudioBackend::Alsa);
            }
            #[cfg(target_os = "windows")]
            cpal::HostId::Wasapi => {
                backends.push(AudioBackend::Wasapi);
            }
            #[allow(unreachable_patterns)]
            _ => {}
        }
    }

    backends
}

/// Returns the default audio backend for the current platform.
pub fn default_backend() -> AudioBackend {
    AudioBackend::Default
}

/// Returns the names of the output devices offered by the given backend.
pub fn output_devices(backend: AudioBackend) -> Result<Vec<String>, DriverError> {
    let host = cpal::host_from_id(backend.host_id()?)?;
    let mut names = Vec::new();
    for device in host.output_devices()? {
        names.push(device.name()?);
    }
    Ok(names)
}
