//! CPAL-based audio driver
//!
//! Real hardware through the default input and output devices of the
//! default CPAL host. CPAL streams are not `Send` on every platform, so each
//! opened stream lives on a dedicated thread that owns the CPAL objects and
//! receives play/pause commands over a channel.
//!
//! CPAL offers no voice-processing unit and no route-change notifications;
//! configuration listeners only fire through
//! [`CpalDriver::notify_configuration_change`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{AudioDriver, ConfigurationListener, DriverStream, InputProc, ListenerId, OutputProc, StreamRequest};
use crate::delegate::RenderContext;
use crate::error::{AudioError, AudioResult};
use crate::format::{AudioFormat, SampleBuffer, SampleBufferMut, SampleFormat, INPUT_BUS, OUTPUT_BUS};

/// Driver over the default CPAL host
#[derive(Default)]
pub struct CpalDriver {
    listeners: Mutex<HashMap<ListenerId, ConfigurationListener>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for CpalDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalDriver")
            .field("host", &cpal::default_host().id().name())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl CpalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the default devices, for logs
    pub fn describe_devices(&self) -> String {
        let host = cpal::default_host();
        let name = |device: Option<Device>| {
            device
                .and_then(|d| d.name().ok())
                .unwrap_or_else(|| "none".to_string())
        };
        format!(
            "host={} input={} output={}",
            host.id().name(),
            name(host.default_input_device()),
            name(host.default_output_device())
        )
    }

    /// Tell registered listeners that the default devices may have changed
    pub fn notify_configuration_change(&self) {
        let listeners: Vec<ConfigurationListener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }
}

fn default_format(device: Option<Device>, input: bool) -> AudioFormat {
    let config = device.and_then(|d| {
        if input {
            d.default_input_config().ok()
        } else {
            d.default_output_config().ok()
        }
    });
    match config {
        Some(config) => AudioFormat::new(f64::from(config.sample_rate().0), config.channels(), true, SampleFormat::F32),
        None => AudioFormat::new(0.0, 0, true, SampleFormat::F32),
    }
}

fn stream_config(format: &AudioFormat) -> AudioResult<StreamConfig> {
    if format.sample_format != SampleFormat::F32 || !format.interleaved {
        return Err(AudioError::configuration(format!(
            "cpal streams carry interleaved f32 samples, got {}",
            format
        )));
    }
    Ok(StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate as u32),
        buffer_size: cpal::BufferSize::Default,
    })
}

impl AudioDriver for CpalDriver {
    fn name(&self) -> &str {
        "cpal"
    }

    fn hardware_input_format(&self) -> AudioFormat {
        default_format(cpal::default_host().default_input_device(), true)
    }

    fn hardware_output_format(&self) -> AudioFormat {
        default_format(cpal::default_host().default_output_device(), false)
    }

    fn supports_voice_processing(&self) -> bool {
        false
    }

    fn open(
        &self,
        request: StreamRequest,
        input: Option<InputProc>,
        output: Option<OutputProc>,
    ) -> AudioResult<Box<dyn DriverStream>> {
        if request.voice_processing {
            return Err(AudioError::unsupported("voice processing on cpal devices"));
        }
        let input_config = request.input.as_ref().map(stream_config).transpose()?;
        let output_config = request.output.as_ref().map(stream_config).transpose()?;

        let (command_tx, command_rx) = crossbeam_channel::unbounded::<StreamCommand>();
        let (ready_tx, ready_rx) = oneshot::channel::<AudioResult<()>>();
        let max_frames = request.max_frames;

        let thread = std::thread::Builder::new()
            .name("cpal-stream".to_string())
            .spawn(move || {
                let streams = match build_streams(input_config, output_config, input, output, max_frames) {
                    Ok(streams) => {
                        let _ = ready_tx.send(Ok(()));
                        streams
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Streams are dropped, and so closed, once the handle goes away
                while let Ok(command) = command_rx.recv() {
                    let result = streams.apply(&command);
                    command.reply(result);
                }
                debug!("cpal stream thread exiting");
            })
            .map_err(|e| AudioError::platform(format!("failed to spawn cpal stream thread: {}", e)))?;

        match ready_rx.blocking_recv() {
            Ok(Ok(())) => {
                info!("Opened cpal stream ({})", self.describe_devices());
                Ok(Box::new(CpalStream {
                    commands: Some(command_tx),
                    running: Arc::new(AtomicBool::new(false)),
                    thread: Some(thread),
                }))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::platform("cpal stream thread exited during setup"))
            }
        }
    }

    fn add_configuration_listener(&self, listener: ConfigurationListener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().insert(id, listener);
        id
    }

    fn remove_configuration_listener(&self, id: ListenerId) {
        self.listeners.lock().remove(&id);
    }
}

enum StreamCommand {
    Play(oneshot::Sender<AudioResult<()>>),
    Pause(oneshot::Sender<AudioResult<()>>),
}

impl StreamCommand {
    fn reply(self, result: AudioResult<()>) {
        let tx = match self {
            StreamCommand::Play(tx) | StreamCommand::Pause(tx) => tx,
        };
        let _ = tx.send(result);
    }
}

struct OwnedStreams {
    input: Option<Stream>,
    output: Option<Stream>,
}

impl OwnedStreams {
    fn apply(&self, command: &StreamCommand) -> AudioResult<()> {
        for stream in self.input.iter().chain(self.output.iter()) {
            match command {
                StreamCommand::Play(_) => stream
                    .play()
                    .map_err(|e| AudioError::start(format!("cpal play failed: {}", e)))?,
                StreamCommand::Pause(_) => stream
                    .pause()
                    .map_err(|e| AudioError::platform(format!("cpal pause failed: {}", e)))?,
            }
        }
        Ok(())
    }
}

fn build_streams(
    input_config: Option<StreamConfig>,
    output_config: Option<StreamConfig>,
    input: Option<InputProc>,
    output: Option<OutputProc>,
    max_frames: usize,
) -> AudioResult<OwnedStreams> {
    let host = cpal::default_host();

    let input_stream = match (input_config, input) {
        (Some(config), Some(mut callback)) => {
            let device = host
                .default_input_device()
                .ok_or_else(|| AudioError::allocation("no default input device"))?;
            let channels = usize::from(config.channels.max(1));
            let chunk = max_frames * channels;
            let mut sample_time = 0u64;
            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        for samples in data.chunks(chunk) {
                            let frames = samples.len() / channels;
                            let context = RenderContext {
                                sample_time,
                                frames,
                                bus: INPUT_BUS,
                            };
                            sample_time += frames as u64;
                            let _ = callback(&context, SampleBuffer::F32(samples));
                        }
                    },
                    |err| error!("Audio capture error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::allocation(format!("failed to build input stream: {}", e)))?;
            Some(stream)
        }
        _ => None,
    };

    let output_stream = match (output_config, output) {
        (Some(config), Some(mut callback)) => {
            let device = host
                .default_output_device()
                .ok_or_else(|| AudioError::allocation("no default output device"))?;
            let channels = usize::from(config.channels.max(1));
            let chunk = max_frames * channels;
            let mut sample_time = 0u64;
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for samples in data.chunks_mut(chunk) {
                            let frames = samples.len() / channels;
                            let context = RenderContext {
                                sample_time,
                                frames,
                                bus: OUTPUT_BUS,
                            };
                            sample_time += frames as u64;
                            if callback(&context, SampleBufferMut::F32(&mut *samples)).is_err() {
                                samples.fill(0.0);
                            }
                        }
                    },
                    |err| error!("Audio playback error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::allocation(format!("failed to build output stream: {}", e)))?;
            Some(stream)
        }
        _ => None,
    };

    Ok(OwnedStreams {
        input: input_stream,
        output: output_stream,
    })
}

/// Handle to streams owned by their thread
struct CpalStream {
    commands: Option<crossbeam_channel::Sender<StreamCommand>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn send(&self, command: impl FnOnce(oneshot::Sender<AudioResult<()>>) -> StreamCommand) -> AudioResult<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| AudioError::invalid_state("cpal stream closed"))?;
        let (tx, rx) = oneshot::channel();
        commands
            .send(command(tx))
            .map_err(|_| AudioError::platform("cpal stream thread is gone"))?;
        rx.blocking_recv()
            .map_err(|_| AudioError::platform("cpal stream thread dropped the reply"))?
    }
}

impl DriverStream for CpalStream {
    fn start(&mut self) -> AudioResult<()> {
        self.send(StreamCommand::Play)?;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.running.store(false, Ordering::SeqCst);
        self.send(StreamCommand::Pause)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("cpal stream thread panicked");
            }
        }
    }
}
