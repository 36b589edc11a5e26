//! Deterministic in-process audio hardware
//!
//! [`SimulatedHardware`] behaves like a single duplex device: it reports
//! float32 non-interleaved hardware formats, opens streams whose procedures
//! are driven either synchronously by [`SimulatedHardware::render_cycle`] or
//! by a timer thread ([`SimulatedHardware::start_clock`]), records what is
//! played and counts every driver call. Faults can be injected to exercise
//! the error paths of the layers above.
//!
//! The matching session collaborator is
//! [`SimulatedSession`](crate::session::SimulatedSession), which shares
//! state with the hardware it was created from.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{AudioDriver, ConfigurationListener, DriverStream, InputProc, ListenerId, OutputProc, StreamRequest};
use crate::delegate::RenderContext;
use crate::error::{AudioError, AudioResult};
use crate::format::{AudioFormat, SampleBuffer, SampleBufferMut, SampleFormat, INPUT_BUS, OUTPUT_BUS};
use crate::session::{SessionCategory, SessionEvent, SessionMode};

/// Playout samples retained by [`SimulatedHardware::recorded_output`]
pub const RECORDED_OUTPUT_CAPACITY: usize = 48_000 * 10;

/// What the simulated microphone picks up
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputSignal {
    Silence,
    Sine { frequency: f64, amplitude: f32 },
    /// First channel of the previous playout cycle
    Loopback,
}

/// Initial device and session state
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareProfile {
    pub sample_rate: f64,
    pub io_buffer_duration: f64,
    pub input_channels: u16,
    pub output_channels: u16,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub input_latency: f64,
    pub output_latency: f64,
    pub voice_processing: bool,
    pub category: SessionCategory,
    pub mode: SessionMode,
}

impl Default for HardwareProfile {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            io_buffer_duration: 0.01,
            input_channels: 1,
            output_channels: 2,
            max_input_channels: 2,
            max_output_channels: 2,
            input_latency: 0.005,
            output_latency: 0.01,
            voice_processing: true,
            category: SessionCategory::PlayAndRecord,
            mode: SessionMode::VoiceChat,
        }
    }
}

/// Snapshot of the driver call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareCounters {
    pub opens: u64,
    pub closes: u64,
    pub starts: u64,
    pub stops: u64,
    pub cycles: u64,
    pub render_errors: u64,
}

#[derive(Default)]
struct AtomicCounters {
    opens: AtomicU64,
    closes: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    cycles: AtomicU64,
    render_errors: AtomicU64,
}

impl AtomicCounters {
    fn snapshot(&self) -> HardwareCounters {
        HardwareCounters {
            opens: self.opens.load(Ordering::SeqCst),
            closes: self.closes.load(Ordering::SeqCst),
            starts: self.starts.load(Ordering::SeqCst),
            stops: self.stops.load(Ordering::SeqCst),
            cycles: self.cycles.load(Ordering::SeqCst),
            render_errors: self.render_errors.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Faults {
    pub fail_open: bool,
    pub fail_start: bool,
    pub fail_preferred_sample_rate: bool,
    pub fail_preferred_io_buffer_duration: bool,
    pub fail_stereo_input: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct DeviceState {
    pub profile: HardwareProfile,
    pub input_available: bool,
    pub preferred_sample_rate: Option<f64>,
    pub preferred_io_buffer_duration: Option<f64>,
    pub stereo_input_configured: bool,
    pub signal: InputSignal,
}

struct StreamIo {
    input: Option<InputProc>,
    output: Option<OutputProc>,
    input_buffer: Vec<f32>,
    output_buffer: Vec<f32>,
    sample_time: u64,
    phase: f64,
}

struct StreamCore {
    id: u64,
    generation: u64,
    request: StreamRequest,
    running: AtomicBool,
    bypassed: AtomicBool,
    io: Mutex<StreamIo>,
}

pub(crate) struct Shared {
    pub state: Mutex<DeviceState>,
    pub faults: Mutex<Faults>,
    streams: Mutex<Vec<Weak<StreamCore>>>,
    listeners: Mutex<Vec<(ListenerId, ConfigurationListener)>>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
    counters: AtomicCounters,
    recorded: Mutex<Vec<f32>>,
    loopback: Mutex<Vec<f32>>,
    generation: AtomicU64,
    next_id: AtomicU64,
    clock_running: Arc<AtomicBool>,
}

/// Simulated duplex audio device
#[derive(Clone)]
pub struct SimulatedHardware {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for SimulatedHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedHardware")
            .field("profile", &self.shared.state.lock().profile)
            .field("counters", &self.counters())
            .finish()
    }
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new(HardwareProfile::default())
    }
}

impl SimulatedHardware {
    pub fn new(profile: HardwareProfile) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DeviceState {
                    profile,
                    input_available: true,
                    preferred_sample_rate: None,
                    preferred_io_buffer_duration: None,
                    stereo_input_configured: false,
                    signal: InputSignal::Sine {
                        frequency: 440.0,
                        amplitude: 0.25,
                    },
                }),
                faults: Mutex::new(Faults::default()),
                streams: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
                counters: AtomicCounters::default(),
                recorded: Mutex::new(Vec::new()),
                loopback: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                clock_running: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Current profile, including route changes applied since creation
    pub fn profile(&self) -> HardwareProfile {
        self.shared.state.lock().profile.clone()
    }

    pub fn counters(&self) -> HardwareCounters {
        self.shared.counters.snapshot()
    }

    /// Streams that are open and not invalidated
    pub fn open_streams(&self) -> usize {
        self.live_streams().len()
    }

    /// Streams currently running
    pub fn running_streams(&self) -> usize {
        self.live_streams()
            .iter()
            .filter(|s| s.running.load(Ordering::SeqCst))
            .count()
    }

    pub fn set_input_signal(&self, signal: InputSignal) {
        self.shared.state.lock().signal = signal;
    }

    /// Change the hardware sample rate; takes effect for streams opened later
    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.shared.state.lock().profile.sample_rate = sample_rate;
    }

    pub fn set_input_channels(&self, channels: u16) {
        self.shared.state.lock().profile.input_channels = channels;
    }

    pub fn set_output_channels(&self, channels: u16) {
        self.shared.state.lock().profile.output_channels = channels;
    }

    pub fn set_input_available(&self, available: bool) {
        self.shared.state.lock().input_available = available;
    }

    pub fn set_voice_processing_supported(&self, supported: bool) {
        self.shared.state.lock().profile.voice_processing = supported;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.shared.faults.lock().fail_open = fail;
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.shared.faults.lock().fail_start = fail;
    }

    /// Whether an open voice-processing stream has its echo canceller bypassed
    pub fn is_voice_processing_bypassed(&self) -> bool {
        self.live_streams().iter().any(|s| s.bypassed.load(Ordering::SeqCst))
    }

    /// Samples of the first output channel played so far
    pub fn recorded_output(&self) -> Vec<f32> {
        self.shared.recorded.lock().clone()
    }

    pub fn clear_recorded_output(&self) {
        self.shared.recorded.lock().clear();
    }

    /// Run one real-time cycle of `frames` frames on every running stream,
    /// synchronously on the calling thread. Returns the number of streams
    /// that were rendered.
    pub fn render_cycle(&self, frames: usize) -> usize {
        let signal = self.shared.state.lock().signal;
        let streams: Vec<Arc<StreamCore>> = self
            .live_streams()
            .into_iter()
            .filter(|s| s.running.load(Ordering::SeqCst))
            .collect();

        for stream in &streams {
            let mut io = stream.io.lock();
            self.render_stream(stream, &mut io, frames, signal);
        }
        self.shared.counters.cycles.fetch_add(1, Ordering::SeqCst);
        streams.len()
    }

    /// Drive [`render_cycle`](Self::render_cycle) from a timer thread at
    /// the hardware rate until [`stop_clock`](Self::stop_clock)
    pub fn start_clock(&self, frames_per_cycle: usize) -> AudioResult<()> {
        if self.shared.clock_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let running = self.shared.clock_running.clone();
        let weak = Arc::downgrade(&self.shared);
        std::thread::Builder::new()
            .name("simulated-hw-clock".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    let hardware = SimulatedHardware { shared };
                    let rate = hardware.shared.state.lock().profile.sample_rate.max(1.0);
                    hardware.render_cycle(frames_per_cycle);
                    drop(hardware);
                    std::thread::sleep(Duration::from_secs_f64(frames_per_cycle as f64 / rate));
                }
            })
            .map_err(|e| AudioError::platform(format!("failed to spawn hardware clock: {}", e)))?;
        info!("Simulated hardware clock started ({} frames per cycle)", frames_per_cycle);
        Ok(())
    }

    pub fn stop_clock(&self) {
        if self.shared.clock_running.swap(false, Ordering::SeqCst) {
            info!("Simulated hardware clock stopped");
        }
    }

    /// Invoke every registered configuration listener
    pub fn notify_configuration_change(&self) {
        let listeners: Vec<ConfigurationListener> =
            self.shared.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        debug!("Notifying {} configuration listeners", listeners.len());
        for listener in listeners {
            listener();
        }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn add_subscriber(&self, sender: Sender<SessionEvent>) {
        self.shared.subscribers.lock().push(sender);
    }

    /// Stop every running stream as the system does on an interruption
    pub(crate) fn interrupt_streams(&self) {
        for stream in self.live_streams() {
            stream.running.store(false, Ordering::SeqCst);
        }
    }

    /// Invalidate every open stream as a media server restart does
    pub(crate) fn invalidate_streams(&self) {
        self.interrupt_streams();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn live_streams(&self) -> Vec<Arc<StreamCore>> {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let mut streams = self.shared.streams.lock();
        streams.retain(|s| s.strong_count() > 0);
        streams
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|s| s.generation == generation)
            .collect()
    }

    fn render_stream(&self, stream: &StreamCore, io: &mut StreamIo, frames: usize, signal: InputSignal) {
        let frames = frames.min(stream.request.max_frames);
        if frames == 0 {
            return;
        }
        let counters = &self.shared.counters;

        if let (Some(format), true) = (stream.request.input, io.input.is_some()) {
            let samples = format.samples_for(frames);
            match signal {
                InputSignal::Silence => io.input_buffer[..samples].fill(0.0),
                InputSignal::Sine { frequency, amplitude } => {
                    let step = TAU * frequency / format.sample_rate;
                    for frame in 0..frames {
                        let value = (io.phase + step * frame as f64).sin() as f32 * amplitude;
                        for channel in 0..format.channels as usize {
                            io.input_buffer[format.sample_index(frames, frame, channel)] = value;
                        }
                    }
                    io.phase = (io.phase + step * frames as f64) % TAU;
                }
                InputSignal::Loopback => {
                    let loopback = self.shared.loopback.lock();
                    for frame in 0..frames {
                        let value = loopback.get(frame).copied().unwrap_or(0.0);
                        for channel in 0..format.channels as usize {
                            io.input_buffer[format.sample_index(frames, frame, channel)] = value;
                        }
                    }
                }
            }
            let context = RenderContext {
                sample_time: io.sample_time,
                frames,
                bus: INPUT_BUS,
            };
            let StreamIo {
                input, input_buffer, ..
            } = &mut *io;
            if let Some(callback) = input.as_mut() {
                if callback(&context, SampleBuffer::F32(&input_buffer[..samples])).is_err() {
                    counters.render_errors.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        if let (Some(format), true) = (stream.request.output, io.output.is_some()) {
            let samples = format.samples_for(frames);
            let context = RenderContext {
                sample_time: io.sample_time,
                frames,
                bus: OUTPUT_BUS,
            };
            let StreamIo {
                output, output_buffer, ..
            } = &mut *io;
            output_buffer[..samples].fill(0.0);
            if let Some(callback) = output.as_mut() {
                if callback(&context, SampleBufferMut::F32(&mut output_buffer[..samples])).is_err() {
                    counters.render_errors.fetch_add(1, Ordering::SeqCst);
                }
            }

            let mut loopback = self.shared.loopback.lock();
            loopback.clear();
            loopback.extend((0..frames).map(|frame| output_buffer[format.sample_index(frames, frame, 0)]));

            let mut recorded = self.shared.recorded.lock();
            let room = RECORDED_OUTPUT_CAPACITY.saturating_sub(recorded.len());
            recorded.extend(loopback.iter().take(room));
        }

        io.sample_time += frames as u64;
    }

    fn validate_request(&self, request: &StreamRequest) -> AudioResult<()> {
        let state = self.shared.state.lock();
        let profile = &state.profile;
        let directions = [
            (request.input, profile.input_channels, "input"),
            (request.output, profile.output_channels, "output"),
        ];
        for (format, channels, label) in directions {
            let Some(format) = format else {
                continue;
            };
            if format.sample_format != SampleFormat::F32 || format.sample_rate != profile.sample_rate {
                return Err(AudioError::hardware(format!(
                    "{} format {} does not match the hardware",
                    label, format
                )));
            }
            if format.channels == 0 || format.channels > channels {
                return Err(AudioError::hardware(format!(
                    "{} format requests {} channels, hardware has {}",
                    label, format.channels, channels
                )));
            }
        }
        if request.input.is_some() && !state.input_available {
            return Err(AudioError::hardware("no input route available"));
        }
        if request.voice_processing && !profile.voice_processing {
            return Err(AudioError::unsupported("voice processing"));
        }
        Ok(())
    }
}

impl AudioDriver for SimulatedHardware {
    fn name(&self) -> &str {
        "simulated"
    }

    fn hardware_input_format(&self) -> AudioFormat {
        let state = self.shared.state.lock();
        let channels = if state.input_available {
            state.profile.input_channels
        } else {
            0
        };
        AudioFormat::hardware_f32(state.profile.sample_rate, channels)
    }

    fn hardware_output_format(&self) -> AudioFormat {
        let state = self.shared.state.lock();
        AudioFormat::hardware_f32(state.profile.sample_rate, state.profile.output_channels)
    }

    fn supports_voice_processing(&self) -> bool {
        self.shared.state.lock().profile.voice_processing
    }

    fn open(
        &self,
        request: StreamRequest,
        input: Option<InputProc>,
        output: Option<OutputProc>,
    ) -> AudioResult<Box<dyn DriverStream>> {
        if self.shared.faults.lock().fail_open {
            return Err(AudioError::hardware("injected open failure"));
        }
        self.validate_request(&request)?;

        let input_samples = request.input.map(|f| f.samples_for(request.max_frames)).unwrap_or(0);
        let output_samples = request.output.map(|f| f.samples_for(request.max_frames)).unwrap_or(0);
        let core = Arc::new(StreamCore {
            id: self.shared.next_id.fetch_add(1, Ordering::SeqCst),
            generation: self.shared.generation.load(Ordering::SeqCst),
            request,
            running: AtomicBool::new(false),
            bypassed: AtomicBool::new(request.voice_processing && request.voice_processing_bypassed),
            io: Mutex::new(StreamIo {
                input,
                output,
                input_buffer: vec![0.0; input_samples],
                output_buffer: vec![0.0; output_samples],
                sample_time: 0,
                phase: 0.0,
            }),
        });
        self.shared.streams.lock().push(Arc::downgrade(&core));
        self.shared.counters.opens.fetch_add(1, Ordering::SeqCst);
        debug!("Opened simulated stream {} ({:?})", core.id, request);

        Ok(Box::new(SimulatedStream {
            core,
            shared: Arc::downgrade(&self.shared),
        }))
    }

    fn add_configuration_listener(&self, listener: ConfigurationListener) -> ListenerId {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.listeners.lock().push((id, listener));
        id
    }

    fn remove_configuration_listener(&self, id: ListenerId) {
        self.shared.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}

struct SimulatedStream {
    core: Arc<StreamCore>,
    shared: Weak<Shared>,
}

impl SimulatedStream {
    fn is_current(&self, shared: &Shared) -> bool {
        self.core.generation == shared.generation.load(Ordering::SeqCst)
    }
}

impl DriverStream for SimulatedStream {
    fn start(&mut self) -> AudioResult<()> {
        let Some(shared) = self.shared.upgrade() else {
            return Err(AudioError::platform("hardware is gone"));
        };
        if !self.is_current(&shared) {
            return Err(AudioError::platform("stream invalidated by media services reset"));
        }
        if shared.faults.lock().fail_start {
            return Err(AudioError::start("injected start failure"));
        }
        self.core.running.store(true, Ordering::SeqCst);
        shared.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.core.running.store(false, Ordering::SeqCst);
        if let Some(shared) = self.shared.upgrade() {
            shared.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    fn set_voice_processing_bypassed(&mut self, bypassed: bool) -> AudioResult<()> {
        if !self.core.request.voice_processing {
            return Err(AudioError::invalid_state("stream does not use voice processing"));
        }
        self.core.bypassed.store(bypassed, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        self.core.running.store(false, Ordering::SeqCst);
        if let Some(shared) = self.shared.upgrade() {
            shared.counters.closes.fetch_add(1, Ordering::SeqCst);
            debug!("Closed simulated stream {}", self.core.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn duplex_request(hw: &SimulatedHardware) -> StreamRequest {
        StreamRequest {
            input: Some(hw.hardware_input_format()),
            output: Some(hw.hardware_output_format()),
            max_frames: 256,
            voice_processing: false,
            voice_processing_bypassed: false,
        }
    }

    #[test]
    fn test_render_cycle_drives_running_streams_only() {
        let hw = SimulatedHardware::default();
        let captured = Arc::new(AtomicUsize::new(0));
        let seen = captured.clone();
        let input: InputProc = Box::new(move |ctx, samples| {
            assert_eq!(samples.len(), ctx.frames);
            seen.fetch_add(ctx.frames, Ordering::SeqCst);
            Ok(())
        });

        let mut stream = hw.open(duplex_request(&hw), Some(input), None).unwrap();
        assert_eq!(hw.render_cycle(128), 0);

        stream.start().unwrap();
        assert_eq!(hw.render_cycle(128), 1);
        assert_eq!(captured.load(Ordering::SeqCst), 128);

        stream.stop().unwrap();
        drop(stream);
        let counters = hw.counters();
        assert_eq!((counters.opens, counters.starts, counters.stops, counters.closes), (1, 1, 1, 1));
        assert_eq!(hw.open_streams(), 0);
    }

    #[test]
    fn test_output_is_recorded_and_looped_back() {
        let hw = SimulatedHardware::default();
        hw.set_input_signal(InputSignal::Loopback);

        let output: OutputProc = Box::new(|_, samples| {
            if let SampleBufferMut::F32(out) = samples {
                out.fill(0.5);
            }
            Ok(())
        });
        let heard = Arc::new(Mutex::new(Vec::new()));
        let sink = heard.clone();
        let input: InputProc = Box::new(move |_, samples| {
            if let SampleBuffer::F32(data) = samples {
                sink.lock().extend_from_slice(data);
            }
            Ok(())
        });

        let mut stream = hw.open(duplex_request(&hw), Some(input), Some(output)).unwrap();
        stream.start().unwrap();
        hw.render_cycle(64);
        hw.render_cycle(64);

        assert_eq!(hw.recorded_output().len(), 128);
        assert!(hw.recorded_output().iter().all(|s| *s == 0.5));
        // Second cycle hears the first cycle's playout
        assert!(heard.lock()[64..].iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_fault_injection() {
        let hw = SimulatedHardware::default();
        hw.set_fail_open(true);
        assert!(hw.open(duplex_request(&hw), None, None).is_err());
        hw.set_fail_open(false);

        hw.set_fail_start(true);
        let mut stream = hw.open(duplex_request(&hw), None, None).unwrap();
        assert!(matches!(stream.start(), Err(AudioError::HardwareStart { .. })));
        assert!(!stream.is_running());
    }

    #[test]
    fn test_voice_processing_requires_support() {
        let hw = SimulatedHardware::default();
        hw.set_voice_processing_supported(false);
        let request = StreamRequest {
            voice_processing: true,
            ..duplex_request(&hw)
        };
        assert!(matches!(
            hw.open(request, None, None),
            Err(AudioError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_echo_canceller_bypass_follows_stream() {
        let hw = SimulatedHardware::default();
        let request = StreamRequest {
            voice_processing: true,
            voice_processing_bypassed: true,
            ..duplex_request(&hw)
        };
        let mut stream = hw.open(request, None, None).unwrap();
        assert!(hw.is_voice_processing_bypassed());

        stream.set_voice_processing_bypassed(false).unwrap();
        assert!(!hw.is_voice_processing_bypassed());

        let mut plain = hw.open(duplex_request(&hw), None, None).unwrap();
        assert!(plain.set_voice_processing_bypassed(true).is_err());
        drop(stream);
        assert!(!hw.is_voice_processing_bypassed());
    }

    #[test]
    fn test_invalidated_streams_cannot_restart() {
        let hw = SimulatedHardware::default();
        let mut stream = hw.open(duplex_request(&hw), None, None).unwrap();
        stream.start().unwrap();
        hw.invalidate_streams();
        assert!(!stream.is_running());
        assert!(stream.start().is_err());
        assert_eq!(hw.open_streams(), 0);
    }

    #[test]
    fn test_request_must_match_hardware_rate() {
        let hw = SimulatedHardware::default();
        let request = StreamRequest {
            input: Some(AudioFormat::hardware_f32(16000.0, 1)),
            output: None,
            max_frames: 256,
            voice_processing: false,
            voice_processing_bypassed: false,
        };
        assert!(hw.open(request, None, None).is_err());
    }

    #[test]
    fn test_configuration_listeners() {
        let hw = SimulatedHardware::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = hw.add_configuration_listener(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        hw.notify_configuration_change();
        hw.remove_configuration_listener(id);
        hw.notify_configuration_change();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
