//! The plugin capability consumed by the graphs.

use crate::event::{EngineEvent, EventBuffer};
use crate::Sample;

/// An audio plugin as seen by the routing engine.
///
/// The engine does not know or care how a plugin is hosted; it needs channel
/// counts, an enable flag, a realtime lock, and a block processor. Plugin
/// loading lives outside this crate.
pub trait Plugin: Send {
    /// Stable plugin index within the engine.
    fn id(&self) -> u32;

    /// Display name, used for patchbay clients and port names.
    fn name(&self) -> &str;

    /// Number of audio inputs (0 or more).
    fn audio_in_count(&self) -> u32;

    /// Number of audio outputs.
    fn audio_out_count(&self) -> u32;

    /// `true` if the plugin has a default event-in port.
    fn accepts_midi(&self) -> bool;

    /// `true` if the plugin has a default event-out port.
    fn produces_midi(&self) -> bool;

    fn midi_in_count(&self) -> u32 {
        u32::from(self.accepts_midi())
    }

    fn midi_out_count(&self) -> u32 {
        u32::from(self.produces_midi())
    }

    /// Disabled plugins are bypassed: their outputs are silenced and incoming
    /// MIDI is cleared for the block.
    fn is_enabled(&self) -> bool;

    /// Wait-free in realtime mode; may block in offline mode. A `true` return
    /// must be paired with [`unlock`](Self::unlock).
    fn try_lock(&self, offline: bool) -> bool;

    /// Matches a successful [`try_lock`](Self::try_lock).
    fn unlock(&self);

    /// Called once per block before [`process`](Self::process).
    fn init_buffers(&mut self);

    /// Processes one block.
    ///
    /// `audio_in`/`audio_out` carry at least
    /// [`audio_in_count`](Self::audio_in_count) /
    /// [`audio_out_count`](Self::audio_out_count) channels of `frames`
    /// samples. `events_in` holds the block's incoming events sorted by time;
    /// the plugin appends its own output events to `events_out`.
    fn process(
        &mut self,
        audio_in: &[&[Sample]],
        audio_out: &mut [&mut [Sample]],
        events_in: &[EngineEvent],
        events_out: &mut EventBuffer,
        frames: u32,
    );
}

/// A registered plugin plus the meters the rack chain maintains for it.
pub struct PluginSlot {
    pub plugin: Option<Box<dyn Plugin>>,
    /// Peak absolute input level per stereo channel, clamped to 1.0.
    pub ins_peak: [f32; 2],
    /// Peak absolute output level per stereo channel, clamped to 1.0.
    pub outs_peak: [f32; 2],
}

impl PluginSlot {
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        Self {
            plugin: Some(plugin),
            ins_peak: [0.0; 2],
            outs_peak: [0.0; 2],
        }
    }
}

impl std::fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "PluginSlot({})", plugin.name()),
            None => f.write_str("PluginSlot(empty)"),
        }
    }
}
