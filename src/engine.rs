//! The engine facade.
//!
//! Owns the driver, the active graph (rack or patchbay, never both), the
//! device MIDI adapters, and the realtime state shared with the audio
//! callback. Control threads drive topology through the patchbay API while
//! the callback keeps running; the only locks the audio thread takes are
//! try-locks plus the brief, bounded mutexes the graphs document.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::{ConnectionId, GroupId, PortId};
use crate::driver::{Driver, DriverError, ProcessCallback};
use crate::event::{EventBuffer, MAX_MIDI_DATA_SIZE};
use crate::graph::{GraphError, PatchbayGraph, RackGraph, RackMidiIo};
use crate::host::{HostEvent, HostHandle};
use crate::midi_io::{MidiInConnection, MidiOutConnection};
use crate::midi_queue::MidiInQueue;
use crate::plugin::{Plugin, PluginSlot};
use crate::Sample;

/// Which topology the engine processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// Fixed six-port rack with a linear plugin chain.
    #[default]
    Rack,
    /// General processing graph.
    Patchbay,
}

/// Options fixed at [`Engine::init`] time.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub topology: Topology,
}

/// An error surfaced by the facade. Every failure is also recorded in
/// [`Engine::last_error`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("Invalid client name")]
    InvalidName,

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine is not running")]
    NotRunning,

    #[error("External patchbay refresh is not supported by this driver")]
    ExternalPatchbayUnsupported,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Realtime state owned by the audio thread between blocks. Control threads
/// lock it only for plugin list changes and meter reads.
pub struct RtData {
    /// Running sample counter, advanced once per processed block.
    pub frame: u64,
    pub events_in: EventBuffer,
    pub events_out: EventBuffer,
    /// The rack chain, in registration order. Unused in patchbay mode (the
    /// patchbay owns its plugins inside the graph nodes).
    pub plugins: Vec<PluginSlot>,
}

impl RtData {
    pub fn new() -> Self {
        Self {
            frame: 0,
            events_in: EventBuffer::new(),
            events_out: EventBuffer::new(),
            plugins: Vec::new(),
        }
    }
}

impl Default for RtData {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct EngineShared {
    pub rt: Mutex<RtData>,
    pub midi_in: Arc<MidiInQueue>,
    pub midi_outs: Mutex<Vec<MidiOutConnection>>,
    /// Cleared while the engine is quiesced (buffer-size or sample-rate
    /// changes); the audio thread produces silence while it is false.
    pub is_ready: AtomicBool,
    /// Mirror of `RtData::frame` readable from producer threads.
    pub frame_clock: Arc<AtomicU64>,
    pub buffer_size: AtomicU32,
    pub sample_rate: AtomicU64,
}

#[derive(Clone)]
enum GraphHandle {
    Rack(Arc<RackGraph>),
    Patchbay(Arc<PatchbayGraph>),
}

/// The audio/MIDI routing engine.
pub struct Engine {
    driver: Box<dyn Driver>,
    options: EngineOptions,
    host: HostHandle,
    shared: Arc<EngineShared>,
    graph: Option<GraphHandle>,
    midi_ins: Vec<MidiInConnection>,
    client_name: String,
    last_error: Mutex<String>,
}

impl Engine {
    pub fn new(driver: Box<dyn Driver>, options: EngineOptions, host: HostHandle) -> Self {
        let buffer_size = driver.buffer_size();
        let sample_rate = driver.sample_rate();
        Self {
            driver,
            options,
            host,
            shared: Arc::new(EngineShared {
                rt: Mutex::new(RtData::new()),
                midi_in: Arc::new(MidiInQueue::new()),
                midi_outs: Mutex::new(Vec::new()),
                is_ready: AtomicBool::new(false),
                frame_clock: Arc::new(AtomicU64::new(0)),
                buffer_size: AtomicU32::new(buffer_size),
                sample_rate: AtomicU64::new(sample_rate.to_bits()),
            }),
            graph: None,
            midi_ins: Vec::new(),
            client_name: String::new(),
            last_error: Mutex::new(String::new()),
        }
    }

    /// Creates the graph for the configured topology, starts the driver, and
    /// announces the topology.
    pub fn init(&mut self, client_name: &str) -> Result<(), EngineError> {
        let result = self.init_inner(client_name);
        self.record(result)
    }

    fn init_inner(&mut self, client_name: &str) -> Result<(), EngineError> {
        if client_name.is_empty() {
            return Err(EngineError::InvalidName);
        }
        if self.graph.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let buffer_size = self.driver.buffer_size();
        let inputs = self.driver.num_inputs();
        let outputs = self.driver.num_outputs();

        let graph = match self.options.topology {
            Topology::Rack => GraphHandle::Rack(Arc::new(RackGraph::new(
                self.host.clone(),
                client_name,
                buffer_size,
                inputs,
                outputs,
            ))),
            Topology::Patchbay => GraphHandle::Patchbay(Arc::new(PatchbayGraph::new(
                self.host.clone(),
                buffer_size,
                inputs,
                outputs,
            ))),
        };

        self.shared.buffer_size.store(buffer_size, Ordering::Release);
        self.shared.is_ready.store(true, Ordering::Release);

        let callback =
            make_process_callback(self.shared.clone(), graph.clone(), self.driver.is_offline());
        self.driver.start(callback)?;

        self.client_name = client_name.to_string();
        self.graph = Some(graph);

        self.host.on_event(HostEvent::EngineStarted {
            driver: self.driver.name().to_string(),
            sample_rate: self.driver.sample_rate(),
            buffer_size,
        });
        self.refresh_inner()?;
        Ok(())
    }

    /// Stops the driver and tears the topology down.
    pub fn close(&mut self) -> Result<(), EngineError> {
        let result = self.close_inner();
        self.record(result)
    }

    fn close_inner(&mut self) -> Result<(), EngineError> {
        if self.graph.is_none() {
            return Err(EngineError::NotRunning);
        }
        self.shared.is_ready.store(false, Ordering::Release);
        if self.driver.is_running() {
            self.driver.stop()?;
        }
        self.midi_ins.clear();
        self.shared.midi_outs.lock().clear();
        {
            let mut rt = self.shared.rt.lock();
            rt.plugins.clear();
            rt.events_in.clear();
            rt.events_out.clear();
        }
        self.graph = None;
        Ok(())
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.graph.is_some()
    }

    #[inline]
    pub fn is_offline(&self) -> bool {
        self.driver.is_offline()
    }

    pub fn current_driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// The client name passed to [`init`](Self::init).
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn sample_rate(&self) -> f64 {
        f64::from_bits(self.shared.sample_rate.load(Ordering::Acquire))
    }

    pub fn buffer_size(&self) -> u32 {
        self.shared.buffer_size.load(Ordering::Acquire)
    }

    /// The staging queue drivers feed incoming device MIDI into.
    pub fn midi_in_queue(&self) -> Arc<MidiInQueue> {
        self.shared.midi_in.clone()
    }

    /// The last recorded failure, as text. Empty when nothing failed yet.
    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    /// Connects two ports of the active graph.
    pub fn patchbay_connect(
        &mut self,
        source_group: GroupId,
        source_port: PortId,
        target_group: GroupId,
        target_port: PortId,
    ) -> Result<ConnectionId, EngineError> {
        let result = self.connect_inner(source_group, source_port, target_group, target_port);
        self.record(result)
    }

    fn connect_inner(
        &mut self,
        source_group: GroupId,
        source_port: PortId,
        target_group: GroupId,
        target_port: PortId,
    ) -> Result<ConnectionId, EngineError> {
        let graph = self.graph.clone().ok_or(EngineError::NotRunning)?;
        match graph {
            GraphHandle::Rack(rack) => {
                let mut midi_io = EngineMidiIo {
                    driver: self.driver.as_mut(),
                    shared: &self.shared,
                    midi_ins: &mut self.midi_ins,
                };
                Ok(rack.connect(
                    &mut midi_io,
                    source_group,
                    source_port,
                    target_group,
                    target_port,
                )?)
            }
            GraphHandle::Patchbay(patchbay) => {
                Ok(patchbay.connect(source_group, source_port, target_group, target_port)?)
            }
        }
    }

    /// Removes the connection with the given id.
    pub fn patchbay_disconnect(&mut self, id: ConnectionId) -> Result<(), EngineError> {
        let result = self.disconnect_inner(id);
        self.record(result)
    }

    fn disconnect_inner(&mut self, id: ConnectionId) -> Result<(), EngineError> {
        let graph = self.graph.clone().ok_or(EngineError::NotRunning)?;
        match graph {
            GraphHandle::Rack(rack) => {
                let mut midi_io = EngineMidiIo {
                    driver: self.driver.as_mut(),
                    shared: &self.shared,
                    midi_ins: &mut self.midi_ins,
                };
                Ok(rack.disconnect(&mut midi_io, id)?)
            }
            GraphHandle::Patchbay(patchbay) => Ok(patchbay.disconnect(id)?),
        }
    }

    /// Re-announces the topology. `external` is only meaningful on drivers
    /// that own their own patchbay, which this engine's drivers do not.
    pub fn patchbay_refresh(&mut self, external: bool) -> Result<(), EngineError> {
        let result = if external {
            Err(EngineError::ExternalPatchbayUnsupported)
        } else {
            self.refresh_inner()
        };
        self.record(result)
    }

    fn refresh_inner(&mut self) -> Result<(), EngineError> {
        let graph = self.graph.clone().ok_or(EngineError::NotRunning)?;
        match graph {
            GraphHandle::Rack(rack) => {
                let midi_ins = self.driver.midi_in_ports();
                let midi_outs = self.driver.midi_out_ports();
                rack.refresh(&midi_ins, &midi_outs);
            }
            GraphHandle::Patchbay(patchbay) => patchbay.refresh(),
        }
        Ok(())
    }

    /// Active connections as a flat `[src1, dst1, src2, dst2, ...]` list of
    /// full port names.
    pub fn get_patchbay_connections(&self) -> Vec<String> {
        let pairs = match &self.graph {
            Some(GraphHandle::Rack(rack)) => rack.connections(),
            Some(GraphHandle::Patchbay(patchbay)) => patchbay.connections(),
            None => Vec::new(),
        };
        pairs
            .into_iter()
            .flat_map(|(source, target)| [source, target])
            .collect()
    }

    /// Decodes two full port names and connects them.
    pub fn restore_patchbay_connection(
        &mut self,
        source: &str,
        target: &str,
    ) -> Result<ConnectionId, EngineError> {
        let result = (|| {
            let graph = self.graph.clone().ok_or(EngineError::NotRunning)?;
            let decode = |name: &str| -> Result<(GroupId, PortId), EngineError> {
                match &graph {
                    GraphHandle::Rack(rack) => Ok(rack.group_and_port_from_name(name)?),
                    GraphHandle::Patchbay(patchbay) => {
                        Ok(patchbay.group_and_port_from_name(name)?)
                    }
                }
            };
            let (source_group, source_port) = decode(source)?;
            let (target_group, target_port) = decode(target)?;
            self.connect_inner(source_group, source_port, target_group, target_port)
        })();
        self.record(result)
    }

    /// Registers a plugin: appended to the chain in rack mode, wrapped in a
    /// node in patchbay mode.
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) -> Result<(), EngineError> {
        let result = (|| {
            let graph = self.graph.clone().ok_or(EngineError::NotRunning)?;
            match graph {
                GraphHandle::Rack(_) => {
                    self.shared.rt.lock().plugins.push(PluginSlot::new(plugin));
                    Ok(())
                }
                GraphHandle::Patchbay(patchbay) => {
                    patchbay.add_plugin(plugin)?;
                    Ok(())
                }
            }
        })();
        self.record(result)
    }

    /// Removes the plugin with the given stable index.
    pub fn remove_plugin(&mut self, plugin_id: u32) -> Result<(), EngineError> {
        let result = (|| {
            let graph = self.graph.clone().ok_or(EngineError::NotRunning)?;
            match graph {
                GraphHandle::Rack(_) => {
                    let mut rt = self.shared.rt.lock();
                    let index = rt
                        .plugins
                        .iter()
                        .position(|slot| {
                            slot.plugin.as_ref().map(|p| p.id()) == Some(plugin_id)
                        })
                        .ok_or(GraphError::UnknownPlugin(plugin_id))?;
                    rt.plugins.remove(index);
                    Ok(())
                }
                GraphHandle::Patchbay(patchbay) => {
                    patchbay.remove_plugin(plugin_id)?;
                    Ok(())
                }
            }
        })();
        self.record(result)
    }

    /// Swaps in a new instance for the plugin with the same stable index. In
    /// patchbay mode the node id is kept but connections are not
    /// re-established.
    pub fn replace_plugin(&mut self, replacement: Box<dyn Plugin>) -> Result<(), EngineError> {
        let result = (|| {
            let graph = self.graph.clone().ok_or(EngineError::NotRunning)?;
            match graph {
                GraphHandle::Rack(_) => {
                    let plugin_id = replacement.id();
                    let mut rt = self.shared.rt.lock();
                    let slot = rt
                        .plugins
                        .iter_mut()
                        .find(|slot| {
                            slot.plugin.as_ref().map(|p| p.id()) == Some(plugin_id)
                        })
                        .ok_or(GraphError::UnknownPlugin(plugin_id))?;
                    *slot = PluginSlot::new(replacement);
                    Ok(())
                }
                GraphHandle::Patchbay(patchbay) => {
                    patchbay.replace_plugin(replacement)?;
                    Ok(())
                }
            }
        })();
        self.record(result)
    }

    /// Peak input levels of the chain plugin at `plugin_index` (rack mode).
    pub fn input_peaks(&self, plugin_index: usize) -> [f32; 2] {
        let rt = self.shared.rt.lock();
        rt.plugins
            .get(plugin_index)
            .map(|slot| slot.ins_peak)
            .unwrap_or([0.0; 2])
    }

    /// Peak output levels of the chain plugin at `plugin_index` (rack mode).
    pub fn output_peaks(&self, plugin_index: usize) -> [f32; 2] {
        let rt = self.shared.rt.lock();
        rt.plugins
            .get(plugin_index)
            .map(|slot| slot.outs_peak)
            .unwrap_or([0.0; 2])
    }

    /// Changes the block size. The engine is quiesced for the duration: the
    /// ready flag drops, the in-flight block finishes, buffers are rebuilt
    /// and swapped, and the flag is restored.
    pub fn set_buffer_size(&mut self, buffer_size: u32) -> Result<(), EngineError> {
        let result = (|| {
            let graph = self.graph.clone().ok_or(EngineError::NotRunning)?;
            self.shared.is_ready.store(false, Ordering::Release);
            {
                let _rt = self.shared.rt.lock();
                match &graph {
                    GraphHandle::Rack(rack) => rack.set_buffer_size(buffer_size),
                    GraphHandle::Patchbay(patchbay) => patchbay.set_buffer_size(buffer_size),
                }
                self.shared.buffer_size.store(buffer_size, Ordering::Release);
            }
            self.shared.is_ready.store(true, Ordering::Release);
            Ok(())
        })();
        self.record(result)
    }

    /// Changes the sample rate, quiesced the same way as
    /// [`set_buffer_size`](Self::set_buffer_size).
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<(), EngineError> {
        let result = (|| {
            self.graph.as_ref().ok_or(EngineError::NotRunning)?;
            self.shared.is_ready.store(false, Ordering::Release);
            {
                let _rt = self.shared.rt.lock();
                self.shared
                    .sample_rate
                    .store(sample_rate.to_bits(), Ordering::Release);
            }
            self.shared.is_ready.store(true, Ordering::Release);
            Ok(())
        })();
        self.record(result)
    }

    /// Renders one block through an offline driver.
    pub fn run_block(
        &mut self,
        ins: &[&[Sample]],
        outs: &mut [&mut [Sample]],
    ) -> Result<(), EngineError> {
        let result = self.driver.render(ins, outs).map_err(EngineError::from);
        self.record(result)
    }

    fn record<T>(&self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &result {
            *self.last_error.lock() = err.to_string();
            if let EngineError::Driver(_) = err {
                self.host.on_event(HostEvent::Error {
                    message: err.to_string(),
                });
            }
        }
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.graph.is_some() {
            let _ = self.close_inner();
        }
    }
}

/// Borrowed view the rack uses to open and close device MIDI ports.
struct EngineMidiIo<'a> {
    driver: &'a mut dyn Driver,
    shared: &'a EngineShared,
    midi_ins: &'a mut Vec<MidiInConnection>,
}

impl RackMidiIo for EngineMidiIo<'_> {
    fn connect_midi_in(&mut self, name: &str) -> bool {
        if self.midi_ins.iter().any(|c| c.name == name) {
            return false;
        }
        match self.driver.connect_midi_in(
            name,
            self.shared.midi_in.clone(),
            self.shared.frame_clock.clone(),
        ) {
            Ok(connection) => {
                self.midi_ins.push(connection);
                true
            }
            Err(err) => {
                log::warn!("MIDI-in connect to \"{name}\" failed: {err}");
                false
            }
        }
    }

    fn connect_midi_out(&mut self, name: &str) -> bool {
        let mut midi_outs = self.shared.midi_outs.lock();
        if midi_outs.iter().any(|c| c.name == name) {
            return false;
        }
        match self.driver.connect_midi_out(name) {
            Ok(connection) => {
                midi_outs.push(connection);
                true
            }
            Err(err) => {
                log::warn!("MIDI-out connect to \"{name}\" failed: {err}");
                false
            }
        }
    }

    fn disconnect_midi_in(&mut self, name: &str) -> bool {
        match self.midi_ins.iter().position(|c| c.name == name) {
            Some(index) => {
                self.midi_ins.remove(index);
                true
            }
            None => false,
        }
    }

    fn disconnect_midi_out(&mut self, name: &str) -> bool {
        let mut midi_outs = self.shared.midi_outs.lock();
        match midi_outs.iter().position(|c| c.name == name) {
            Some(index) => {
                midi_outs.remove(index);
                true
            }
            None => false,
        }
    }
}

fn make_process_callback(
    shared: Arc<EngineShared>,
    graph: GraphHandle,
    offline: bool,
) -> ProcessCallback {
    Box::new(move |ins, outs, frames| {
        process_block(&shared, &graph, ins, outs, frames, offline)
    })
}

/// One block of the audio callback: silence gates, event staging, graph
/// processing, and MIDI-out dispatch.
fn process_block(
    shared: &EngineShared,
    graph: &GraphHandle,
    ins: &[&[Sample]],
    outs: &mut [&mut [Sample]],
    frames: u32,
    offline: bool,
) {
    for out in outs.iter_mut() {
        out.fill(0.0);
    }
    if !shared.is_ready.load(Ordering::Acquire) {
        return;
    }
    let expected = shared.buffer_size.load(Ordering::Acquire);
    if frames != expected {
        log::error!("driver delivered {frames} frames, engine expects {expected}");
        return;
    }
    let Some(mut rt) = shared.rt.try_lock() else {
        // a control thread owns the realtime state right now; skip the block
        return;
    };
    let rt = &mut *rt;

    rt.events_in.clear();
    rt.events_out.clear();
    shared.midi_in.drain_into(&mut rt.events_in, rt.frame, frames);

    match graph {
        GraphHandle::Rack(rack) => rack.process_helper(rt, ins, outs, frames, offline),
        GraphHandle::Patchbay(patchbay) => patchbay.process(rt, ins, outs, frames, offline),
    }

    if !rt.events_out.is_empty() {
        let mut ports = shared.midi_outs.lock();
        if !ports.is_empty() {
            let mut scratch = [0u8; MAX_MIDI_DATA_SIZE];
            for event in rt.events_out.iter() {
                let Some(bytes) = event.to_raw_midi(&mut scratch) else {
                    continue;
                };
                let offset = event.time as f64 / frames as f64;
                for port in ports.iter_mut() {
                    port.send(bytes, offset);
                }
            }
        }
    }

    rt.frame += frames as u64;
    shared.frame_clock.store(rt.frame, Ordering::Release);
}
