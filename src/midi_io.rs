//! Device MIDI adapters owned by the engine facade.
//!
//! Input adapters run on midir's callback thread and feed the engine's
//! staging queue, stamping each message with the engine's published frame
//! clock. Output adapters take raw bytes at the end of each audio block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::driver::DriverError;
use crate::event::MAX_MIDI_DATA_SIZE;
use crate::midi_queue::{MidiInQueue, RtMidiEvent};

/// An open device MIDI input, pushing into the staging queue.
pub struct MidiInConnection {
    pub name: String,
    connection: Option<midir::MidiInputConnection<()>>,
}

impl MidiInConnection {
    /// Opens the first input port whose name contains `port_name`.
    pub fn open(
        port_name: &str,
        queue: Arc<MidiInQueue>,
        frame_clock: Arc<AtomicU64>,
    ) -> Result<Self, DriverError> {
        let input = midir::MidiInput::new("patchrack midi-in")?;
        let port = input
            .ports()
            .into_iter()
            .find(|port| {
                input
                    .port_name(port)
                    .map(|name| name.contains(port_name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| DriverError::MidiPortUnavailable(port_name.to_string()))?;
        let name = input
            .port_name(&port)
            .unwrap_or_else(|_| port_name.to_string());

        log::info!("Opening MIDI-in port: {name}");

        let connection = input.connect(
            &port,
            "patchrack midi-in",
            move |_stamp, bytes, _data| {
                if bytes.len() > MAX_MIDI_DATA_SIZE {
                    log::warn!("dropping {}-byte MIDI message (sysex?)", bytes.len());
                    return;
                }
                let time = frame_clock.load(Ordering::Relaxed);
                if let Some(event) = RtMidiEvent::new(time, bytes) {
                    queue.push(event);
                }
            },
            (),
        )?;

        Ok(Self {
            name,
            connection: Some(connection),
        })
    }

    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

impl Drop for MidiInConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// An open device MIDI output.
pub struct MidiOutConnection {
    pub name: String,
    connection: Option<midir::MidiOutputConnection>,
}

impl MidiOutConnection {
    /// Opens the first output port whose name contains `port_name`.
    pub fn open(port_name: &str) -> Result<Self, DriverError> {
        let output = midir::MidiOutput::new("patchrack midi-out")?;
        let port = output
            .ports()
            .into_iter()
            .find(|port| {
                output
                    .port_name(port)
                    .map(|name| name.contains(port_name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| DriverError::MidiPortUnavailable(port_name.to_string()))?;
        let name = output
            .port_name(&port)
            .unwrap_or_else(|_| port_name.to_string());

        log::info!("Opening MIDI-out port: {name}");

        let connection = output.connect(&port, "patchrack midi-out")?;
        Ok(Self {
            name,
            connection: Some(connection),
        })
    }

    /// Sends raw bytes. `block_offset` is the event's position within the
    /// current block in `[0.0, 1.0)`; midir has no scheduling, so the bytes
    /// go out immediately.
    pub fn send(&mut self, bytes: &[u8], _block_offset: f64) {
        if let Some(connection) = &mut self.connection {
            if let Err(err) = connection.send(bytes) {
                log::warn!("MIDI send to \"{}\" failed: {err}", self.name);
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

impl Drop for MidiOutConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Names of the MIDI input ports visible to midir.
pub fn midi_in_port_names() -> Vec<String> {
    let Ok(input) = midir::MidiInput::new("patchrack midi enum") else {
        return Vec::new();
    };
    input
        .ports()
        .iter()
        .filter_map(|port| input.port_name(port).ok())
        .collect()
}

/// Names of the MIDI output ports visible to midir.
pub fn midi_out_port_names() -> Vec<String> {
    let Ok(output) = midir::MidiOutput::new("patchrack midi enum") else {
        return Vec::new();
    };
    output
        .ports()
        .iter()
        .filter_map(|port| output.port_name(port).ok())
        .collect()
}
