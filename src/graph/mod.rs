//! The two routing topologies: the fixed rack and the general patchbay.

use crate::Sample;

pub mod patchbay;
pub(crate) mod processor;
pub mod rack;

pub use patchbay::PatchbayGraph;
pub use rack::RackGraph;

/// An error raised while mutating or querying a graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum GraphError {
    /// The endpoints do not form a valid rack connection.
    #[error("Invalid rack connection")]
    InvalidRackConnection,

    /// No connection with the given id exists.
    #[error("Failed to find connection")]
    ConnectionNotFound,

    /// The port id does not decode to a known port.
    #[error("Invalid port id: {0}")]
    InvalidPortId(u32),

    /// The group id does not name a known client.
    #[error("Unknown group: {0}")]
    UnknownGroup(u32),

    /// Audio and MIDI ports cannot be connected to each other.
    #[error("Ports have incompatible types")]
    IncompatibleTypes,

    /// The source must be an output port and the target an input port.
    #[error("Ports have incompatible directions")]
    IncompatibleDirections,

    /// The connection already exists.
    #[error("Connection already exists")]
    DuplicateConnection,

    /// The connection would close a cycle in the processing graph.
    #[error("Connection would create a feedback loop")]
    FeedbackLoop,

    /// The channel index is out of range for the node.
    #[error("Port is out of range for this node")]
    PortOutOfRange,

    /// Opening or closing a device MIDI port failed.
    #[error("Failed to connect rack MIDI port \"{0}\"")]
    MidiPort(String),

    /// A full port name did not resolve to a known port.
    #[error("Unknown port name: \"{0}\"")]
    UnknownPortName(String),

    /// No patchbay node carries the given plugin index.
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(u32),
}

/// Device-MIDI operations the rack delegates to the engine facade.
///
/// The rack validates and records MIDI connections but does not talk to
/// devices itself; opening and closing ports is the facade's job.
pub trait RackMidiIo {
    fn connect_midi_in(&mut self, name: &str) -> bool;
    fn connect_midi_out(&mut self, name: &str) -> bool;
    fn disconnect_midi_in(&mut self, name: &str) -> bool;
    fn disconnect_midi_out(&mut self, name: &str) -> bool;
}

/// Peak absolute value over a block, clamped to 1.0.
#[inline]
pub(crate) fn signal_peak(buffer: &[Sample]) -> f32 {
    buffer
        .iter()
        .fold(0.0f32, |peak, sample| peak.max(sample.abs()))
        .min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_is_absolute_and_clamped() {
        assert_eq!(signal_peak(&[0.0, -0.5, 0.25]), 0.5);
        assert_eq!(signal_peak(&[2.0, -3.0]), 1.0);
        assert_eq!(signal_peak(&[]), 0.0);
    }
}
