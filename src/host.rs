//! Host-callback events published by the engine and the graphs.

use std::ops::BitOr;
use std::sync::Arc;

use crate::connection::{ConnectionId, GroupId, PortId};

/// Icon hint for a patchbay client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientIcon {
    Hardware,
    Host,
    Plugin,
}

/// Port flags carried by [`HostEvent::PatchbayPortAdded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortFlags(pub u32);

impl PortFlags {
    pub const AUDIO: PortFlags = PortFlags(1 << 0);
    pub const MIDI: PortFlags = PortFlags(1 << 1);
    /// Set when the port receives signal.
    pub const INPUT: PortFlags = PortFlags(1 << 2);

    #[inline]
    pub fn contains(self, other: PortFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PortFlags {
    type Output = PortFlags;

    fn bitor(self, rhs: PortFlags) -> PortFlags {
        PortFlags(self.0 | rhs.0)
    }
}

/// Topology and lifecycle events published to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    PatchbayClientAdded {
        group: GroupId,
        icon: ClientIcon,
        /// Plugin index for plugin clients, `None` for built-ins.
        plugin_id: Option<u32>,
        name: String,
    },
    PatchbayClientRemoved {
        group: GroupId,
    },
    PatchbayPortAdded {
        group: GroupId,
        port: PortId,
        flags: PortFlags,
        name: String,
    },
    PatchbayPortRemoved {
        group: GroupId,
        port: PortId,
    },
    PatchbayConnectionAdded {
        id: ConnectionId,
        /// `"gA:pA:gB:pB"`.
        payload: String,
    },
    PatchbayConnectionRemoved {
        id: ConnectionId,
    },
    EngineStarted {
        driver: String,
        sample_rate: f64,
        buffer_size: u32,
    },
    Error {
        message: String,
    },
}

/// The sink the engine publishes [`HostEvent`]s into.
///
/// Callbacks fire on control threads, never on the audio thread.
pub trait HostCallback: Send + Sync {
    fn on_event(&self, event: HostEvent);
}

/// Shared handle to the host-callback sink.
pub type HostHandle = Arc<dyn HostCallback>;

/// A sink that discards every event.
#[derive(Debug, Default)]
pub struct NullHostCallback;

impl HostCallback for NullHostCallback {
    fn on_event(&self, _event: HostEvent) {}
}

impl<F> HostCallback for F
where
    F: Fn(HostEvent) + Send + Sync,
{
    fn on_event(&self, event: HostEvent) {
        self(event)
    }
}
