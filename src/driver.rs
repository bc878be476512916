//! Audio drivers: the capability the engine runs on.
//!
//! The engine owns the graph; a driver owns the device callback and upcalls
//! into the engine once per block with deinterleaved channel buffers.
//! [`CpalDriver`] is the realtime implementation; [`DummyDriver`] is an
//! offline driver pumped by hand.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};

use crate::midi_io::{self, MidiInConnection, MidiOutConnection};
use crate::midi_queue::MidiInQueue;
use crate::Sample;

/// Per-block upcall: `(inputs, outputs, nframes)`, channel-deinterleaved.
pub type ProcessCallback = Box<dyn FnMut(&[&[Sample]], &mut [&mut [Sample]], u32) + Send + 'static>;

/// An error that occurred inside a driver.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
#[error("Driver error")]
pub enum DriverError {
    /// An error occurred while accessing the audio stream.
    StreamError(#[from] cpal::StreamError),

    /// An error occurred while accessing audio devices.
    DevicesError(#[from] cpal::DevicesError),

    /// An error occurred during audio host configuration (host unavailable).
    HostUnavailable(#[from] cpal::HostUnavailable),

    /// An error occurred during audio device configuration (device unavailable).
    #[error("Requested device is unavailable: {0:?}")]
    DeviceUnavailable(DeviceSelector),

    /// An error occurred during audio device configuration (error getting the device's name).
    DeviceNameError(#[from] cpal::DeviceNameError),

    /// An error occurred during audio device configuration (error getting the default stream configuration).
    DefaultStreamConfigError(#[from] cpal::DefaultStreamConfigError),

    /// An error occurred while building the audio stream.
    BuildStreamError(#[from] cpal::BuildStreamError),

    /// An error occurred while starting the audio stream.
    PlayStreamError(#[from] cpal::PlayStreamError),

    /// An error occurred during audio device configuration (invalid sample format).
    #[error("Unsupported sample format: {0}")]
    UnsupportedSampleFormat(cpal::SampleFormat),

    /// An error occurred during MIDI device configuration (error initializing).
    MidirInitError(#[from] midir::InitError),

    /// An error occurred during MIDI device configuration (port unavailable).
    #[error("MIDI port unavailable: {0}")]
    MidiPortUnavailable(String),

    /// An error occurred while connecting to a MIDI input port.
    MidiInConnectError(#[from] midir::ConnectError<midir::MidiInput>),

    /// An error occurred while connecting to a MIDI output port.
    MidiOutConnectError(#[from] midir::ConnectError<midir::MidiOutput>),

    /// The driver is already running.
    #[error("Driver is already running")]
    AlreadyRunning,

    /// The driver is not running.
    #[error("Driver is not running")]
    NotRunning,

    /// The operation is not supported by this driver.
    #[error("Operation not supported by this driver")]
    NotSupported,
}

/// The audio backend to use.
#[derive(Default, Debug, Clone)]
pub enum AudioBackend {
    /// Default audio backend for the current platform.
    #[default]
    Default,
    #[cfg(all(target_os = "linux", feature = "jack"))]
    /// JACK Audio Connection Kit
    Jack,
    #[cfg(target_os = "linux")]
    /// Advanced Linux Sound Architecture
    Alsa,
    #[cfg(target_os = "windows")]
    /// Windows Audio Session API
    Wasapi,
}

impl AudioBackend {
    /// Resolves the backend to a cpal host id.
    pub fn host_id(&self) -> Result<cpal::HostId, DriverError> {
        match self {
            AudioBackend::Default => Ok(cpal::default_host().id()),
            #[cfg(all(target_os = "linux", feature = "jack"))]
            AudioBackend::Jack => cpal::available_hosts()
                .into_iter()
                .find(|h| *h == cpal::HostId::Jack)
                .ok_or(DriverError::HostUnavailable(cpal::HostUnavailable)),
            #[cfg(target_os = "linux")]
            AudioBackend::Alsa => cpal::available_hosts()
                .into_iter()
                .find(|h| *h == cpal::HostId::Alsa)
                .ok_or(DriverError::HostUnavailable(cpal::HostUnavailable)),
            #[cfg(target_os = "windows")]
            AudioBackend::Wasapi => cpal::available_hosts()
                .into_iter()
                .find(|h| *h == cpal::HostId::Wasapi)
                .ok_or(DriverError::HostUnavailable(cpal::HostUnavailable)),
        }
    }
}

/// How to pick the audio device.
#[derive(Default, Debug, Clone)]
pub enum DeviceSelector {
    /// The platform default device.
    #[default]
    Default,
    /// The device at the given index.
    Index(usize),
    /// Substring of the device name to match; the first device whose name
    /// contains it is used.
    Name(String),
}

/// The capability the engine runs on.
pub trait Driver: Send {
    fn name(&self) -> &'static str;
    fn sample_rate(&self) -> f64;
    fn buffer_size(&self) -> u32;
    fn num_inputs(&self) -> u32;
    fn num_outputs(&self) -> u32;
    fn is_running(&self) -> bool;

    /// Offline drivers render on demand instead of in realtime; plugin locks
    /// may block in this mode.
    fn is_offline(&self) -> bool {
        false
    }

    /// Starts the device callback, invoking `callback` once per block.
    fn start(&mut self, callback: ProcessCallback) -> Result<(), DriverError>;

    fn stop(&mut self) -> Result<(), DriverError>;

    /// Renders one block by hand. Only offline drivers support this.
    fn render(
        &mut self,
        _ins: &[&[Sample]],
        _outs: &mut [&mut [Sample]],
    ) -> Result<(), DriverError> {
        Err(DriverError::NotSupported)
    }

    /// Names of the MIDI input ports this driver can open.
    fn midi_in_ports(&self) -> Vec<String>;

    /// Names of the MIDI output ports this driver can open.
    fn midi_out_ports(&self) -> Vec<String>;

    fn connect_midi_in(
        &mut self,
        port_name: &str,
        queue: Arc<MidiInQueue>,
        frame_clock: Arc<AtomicU64>,
    ) -> Result<MidiInConnection, DriverError>;

    fn connect_midi_out(&mut self, port_name: &str) -> Result<MidiOutConnection, DriverError>;
}

// device channels are deinterleaved into stack-held slice tables
const MAX_DEVICE_CHANNELS: usize = 32;

/// The cpal-backed realtime driver. MIDI goes through midir.
pub struct CpalDriver {
    device: cpal::Device,
    device_name: String,
    config: cpal::SupportedStreamConfig,
    input_device: Option<cpal::Device>,
    input_config: Option<cpal::SupportedStreamConfig>,
    buffer_size: u32,
    stop_tx: Option<Sender<()>>,
}

impl CpalDriver {
    /// Selects a host and device and reads their default configurations.
    /// Capture is enabled when a default input device exists and offers f32
    /// samples.
    pub fn new(
        backend: AudioBackend,
        selector: DeviceSelector,
        buffer_size: u32,
    ) -> Result<Self, DriverError> {
        let host = cpal::host_from_id(backend.host_id()?)?;
        log::info!("Using host: {:?}", host.id());

        let device = match &selector {
            DeviceSelector::Default => host.default_output_device(),
            DeviceSelector::Index(index) => host.output_devices()?.nth(*index),
            DeviceSelector::Name(name) => host
                .output_devices()?
                .find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false)),
        }
        .ok_or(DriverError::DeviceUnavailable(selector))?;
        let device_name = device.name()?;
        log::info!("Using device: {device_name}");

        let config = device.default_output_config()?;
        log::info!("Configuration: {config:#?}");

        let input_device = host.default_input_device();
        let input_config = match &input_device {
            Some(input) => match input.default_input_config() {
                Ok(config) if config.sample_format() == cpal::SampleFormat::F32 => Some(config),
                Ok(config) => {
                    log::warn!(
                        "capture disabled: input device offers {:?}, not f32",
                        config.sample_format()
                    );
                    None
                }
                Err(err) => {
                    log::warn!("capture disabled: {err}");
                    None
                }
            },
            None => None,
        };
        let input_device = input_config.as_ref().and(input_device);

        Ok(Self {
            device,
            device_name,
            config,
            input_device,
            input_config,
            buffer_size,
            stop_tx: None,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Driver for CpalDriver {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn sample_rate(&self) -> f64 {
        self.config.sample_rate().0 as f64
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    fn num_inputs(&self) -> u32 {
        self.input_config
            .as_ref()
            .map(|c| c.channels() as u32)
            .unwrap_or(0)
    }

    fn num_outputs(&self) -> u32 {
        self.config.channels() as u32
    }

    fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn start(&mut self, callback: ProcessCallback) -> Result<(), DriverError> {
        if self.stop_tx.is_some() {
            return Err(DriverError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), DriverError>>(1);

        let device = self.device.clone();
        let config = self.config.clone();
        let input_device = self.input_device.clone();
        let input_config = self.input_config.clone();
        let block_frames = self.buffer_size as usize;

        // cpal streams are not Send; they live on their own thread for the
        // whole run
        std::thread::spawn(move || {
            let in_channels = input_config.as_ref().map(|c| c.channels() as usize).unwrap_or(0);
            let ring = HeapRb::<Sample>::new((block_frames * in_channels.max(1) * 8).max(1));
            let (producer, consumer) = ring.split();

            let input_stream = match (&input_device, &input_config) {
                (Some(input), Some(config)) => {
                    match build_input_stream(input, &config.config(), block_frames as u32, producer)
                    {
                        Ok(stream) => Some(stream),
                        Err(err) => {
                            log::warn!("capture stream failed, running without input: {err}");
                            None
                        }
                    }
                }
                _ => None,
            };

            let output_stream = match config.sample_format() {
                cpal::SampleFormat::I8 => build_output_stream::<i8>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                cpal::SampleFormat::I16 => build_output_stream::<i16>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                cpal::SampleFormat::I32 => build_output_stream::<i32>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                cpal::SampleFormat::I64 => build_output_stream::<i64>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                cpal::SampleFormat::U8 => build_output_stream::<u8>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                cpal::SampleFormat::U16 => build_output_stream::<u16>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                cpal::SampleFormat::U32 => build_output_stream::<u32>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                cpal::SampleFormat::U64 => build_output_stream::<u64>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                cpal::SampleFormat::F32 => build_output_stream::<f32>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                cpal::SampleFormat::F64 => build_output_stream::<f64>(
                    &device, &config, block_frames, in_channels, consumer, callback,
                ),
                format => Err(DriverError::UnsupportedSampleFormat(format)),
            };

            let output_stream = match output_stream {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // park until stop() fires or the driver is dropped
            let _ = stop_rx.recv();
            drop(output_stream);
            drop(input_stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(DriverError::NotRunning),
        }
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        let stop_tx = self.stop_tx.take().ok_or(DriverError::NotRunning)?;
        let _ = stop_tx.send(());
        Ok(())
    }

    fn midi_in_ports(&self) -> Vec<String> {
        midi_io::midi_in_port_names()
    }

    fn midi_out_ports(&self) -> Vec<String> {
        midi_io::midi_out_port_names()
    }

    fn connect_midi_in(
        &mut self,
        port_name: &str,
        queue: Arc<MidiInQueue>,
        frame_clock: Arc<AtomicU64>,
    ) -> Result<MidiInConnection, DriverError> {
        MidiInConnection::open(port_name, queue, frame_clock)
    }

    fn connect_midi_out(&mut self, port_name: &str) -> Result<MidiOutConnection, DriverError> {
        MidiOutConnection::open(port_name)
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    block_frames: u32,
    mut producer: HeapProd<Sample>,
) -> Result<cpal::Stream, DriverError> {
    let mut config = config.clone();
    config.buffer_size = cpal::BufferSize::Fixed(block_frames);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _info: &cpal::InputCallbackInfo| {
            // overruns drop the newest samples; the output side fills with
            // silence on underrun
            let _ = producer.push_slice(data);
        },
        |err| log::error!("an error occurred on the input stream: {err}"),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    block_frames: usize,
    in_channels: usize,
    mut consumer: HeapCons<Sample>,
    mut callback: ProcessCallback,
) -> Result<cpal::Stream, DriverError>
where
    T: cpal::SizedSample + cpal::FromSample<Sample>,
{
    let out_channels = config.channels() as usize;
    let mut stream_config = config.config();
    stream_config.buffer_size = cpal::BufferSize::Fixed(block_frames as u32);

    let mut in_interleaved = vec![0.0 as Sample; block_frames * in_channels.max(1)];
    let mut in_bufs = vec![vec![0.0 as Sample; block_frames]; in_channels];
    let mut out_bufs = vec![vec![0.0 as Sample; block_frames]; out_channels];

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            for chunk in data.chunks_mut(block_frames * out_channels) {
                let frames = chunk.len() / out_channels;

                if in_channels > 0 {
                    let want = frames * in_channels;
                    let got = consumer.pop_slice(&mut in_interleaved[..want]);
                    in_interleaved[got..want].fill(0.0);
                    for (f, frame) in in_interleaved[..want].chunks(in_channels).enumerate() {
                        for (c, &sample) in frame.iter().enumerate() {
                            in_bufs[c][f] = sample;
                        }
                    }
                }

                let mut in_refs: [&[Sample]; MAX_DEVICE_CHANNELS] = [&[]; MAX_DEVICE_CHANNELS];
                for (slot, buf) in in_refs.iter_mut().zip(in_bufs.iter()) {
                    *slot = &buf[..frames];
                }
                let mut out_iter = out_bufs.iter_mut();
                let mut out_refs: [&mut [Sample]; MAX_DEVICE_CHANNELS] =
                    std::array::from_fn(|_| match out_iter.next() {
                        Some(buf) => &mut buf[..frames],
                        None => &mut [],
                    });

                callback(
                    &in_refs[..in_channels.min(MAX_DEVICE_CHANNELS)],
                    &mut out_refs[..out_channels.min(MAX_DEVICE_CHANNELS)],
                    frames as u32,
                );

                for (f, frame) in chunk.chunks_mut(out_channels).enumerate() {
                    for (c, sample) in frame.iter_mut().enumerate() {
                        *sample = T::from_sample(out_bufs[c][f]);
                    }
                }
            }
        },
        |err| log::error!("an error occurred on the output stream: {err}"),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

/// An offline driver pumped by hand through [`Driver::render`]. Useful for
/// rendering faster than realtime and for tests.
pub struct DummyDriver {
    sample_rate: f64,
    buffer_size: u32,
    inputs: u32,
    outputs: u32,
    callback: Option<ProcessCallback>,
    running: bool,
}

impl DummyDriver {
    pub fn new(sample_rate: f64, buffer_size: u32, inputs: u32, outputs: u32) -> Self {
        Self {
            sample_rate,
            buffer_size,
            inputs,
            outputs,
            callback: None,
            running: false,
        }
    }
}

impl Driver for DummyDriver {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    fn num_inputs(&self) -> u32 {
        self.inputs
    }

    fn num_outputs(&self) -> u32 {
        self.outputs
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn is_offline(&self) -> bool {
        true
    }

    fn start(&mut self, callback: ProcessCallback) -> Result<(), DriverError> {
        if self.running {
            return Err(DriverError::AlreadyRunning);
        }
        self.callback = Some(callback);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }
        self.callback = None;
        self.running = false;
        Ok(())
    }

    fn render(
        &mut self,
        ins: &[&[Sample]],
        outs: &mut [&mut [Sample]],
    ) -> Result<(), DriverError> {
        let callback = self.callback.as_mut().ok_or(DriverError::NotRunning)?;
        callback(ins, outs, self.buffer_size);
        Ok(())
    }

    fn midi_in_ports(&self) -> Vec<String> {
        Vec::new()
    }

    fn midi_out_ports(&self) -> Vec<String> {
        Vec::new()
    }

    fn connect_midi_in(
        &mut self,
        _port_name: &str,
        _queue: Arc<MidiInQueue>,
        _frame_clock: Arc<AtomicU64>,
    ) -> Result<MidiInConnection, DriverError> {
        Err(DriverError::NotSupported)
    }

    fn connect_midi_out(&mut self, _port_name: &str) -> Result<MidiOutConnection, DriverError> {
        Err(DriverError::NotSupported)
    }
}
