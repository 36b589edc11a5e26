//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rtcaudio_device::backend::{CallbackSlot, CaptureCallback, PlayoutCallback};
use rtcaudio_device::platform::{AudioDriver, ConfigurationListener};
use rtcaudio_device::{
    AudioDeviceDelegate, AudioError, AudioFormat, AudioResult, BackendFactory, BackendKind, BackendOptions,
    ControlTask, Direction, HardwareBackend, PlayoutData, RecordedData, RenderContext, RenderError,
    SampleBuffer, SampleBufferMut, SimulatedHardware, INPUT_BUS, OUTPUT_BUS,
};

/// Value the test delegate plays, as a 16-bit sample
pub const PLAYOUT_VALUE: i16 = 8192;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelegateEvent {
    InputChanged(AudioFormat),
    OutputChanged(AudioFormat),
    InputInterrupted,
    OutputInterrupted,
}

/// Delegate recording every call, with a control queue that only runs when
/// the test pumps it (or inline when created with [`TestDelegate::inline`])
pub struct TestDelegate {
    events: Mutex<Vec<DelegateEvent>>,
    tasks: Mutex<VecDeque<ControlTask>>,
    inline: bool,
    pub recorded_calls: AtomicUsize,
    pub recorded_samples: AtomicUsize,
    pub last_recorded_format: Mutex<Option<AudioFormat>>,
    pub last_recorded_peak: Mutex<i16>,
    pub playout_calls: AtomicUsize,
    pub fail_playout: AtomicBool,
    pub preferred_sample_rate: f64,
    pub preferred_io_buffer_duration: f64,
}

impl TestDelegate {
    fn build(inline: bool) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            tasks: Mutex::new(VecDeque::new()),
            inline,
            recorded_calls: AtomicUsize::new(0),
            recorded_samples: AtomicUsize::new(0),
            last_recorded_format: Mutex::new(None),
            last_recorded_peak: Mutex::new(0),
            playout_calls: AtomicUsize::new(0),
            fail_playout: AtomicBool::new(false),
            preferred_sample_rate: 48000.0,
            preferred_io_buffer_duration: 0.01,
        })
    }

    /// Scheduled tasks wait for [`run_pending`](Self::run_pending)
    pub fn manual() -> Arc<Self> {
        Self::build(false)
    }

    /// Scheduled tasks run immediately on the scheduling thread
    pub fn inline() -> Arc<Self> {
        Self::build(true)
    }

    pub fn as_delegate(self: &Arc<Self>) -> Arc<dyn AudioDeviceDelegate> {
        self.clone()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run queued tasks, including ones they queue, until none is left
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.tasks.lock().pop_front();
            let Some(task) = task else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    pub fn events(&self) -> Vec<DelegateEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn count(&self, event: impl Fn(&DelegateEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| event(e)).count()
    }
}

impl AudioDeviceDelegate for TestDelegate {
    fn deliver_recorded_data(&self, data: &RecordedData<'_>) -> Result<(), RenderError> {
        self.recorded_calls.fetch_add(1, Ordering::SeqCst);
        self.recorded_samples.fetch_add(data.samples.len(), Ordering::SeqCst);
        *self.last_recorded_format.lock() = Some(*data.format);
        if let SampleBuffer::I16(samples) = data.samples {
            let peak = samples.iter().map(|s| s.saturating_abs()).max().unwrap_or(0);
            *self.last_recorded_peak.lock() = peak;
        }
        Ok(())
    }

    fn get_playout_data(&self, data: &mut PlayoutData<'_>) -> Result<(), RenderError> {
        self.playout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_playout.load(Ordering::SeqCst) {
            return Err(RenderError::Delegate(-1));
        }
        match &mut data.samples {
            SampleBufferMut::I16(samples) => samples.fill(PLAYOUT_VALUE),
            SampleBufferMut::F32(samples) => samples.fill(f32::from(PLAYOUT_VALUE) / 32768.0),
        }
        data.silence = false;
        Ok(())
    }

    fn notify_input_parameters_changed(&self, format: &AudioFormat) {
        self.events.lock().push(DelegateEvent::InputChanged(*format));
    }

    fn notify_output_parameters_changed(&self, format: &AudioFormat) {
        self.events.lock().push(DelegateEvent::OutputChanged(*format));
    }

    fn notify_input_interrupted(&self) {
        self.events.lock().push(DelegateEvent::InputInterrupted);
    }

    fn notify_output_interrupted(&self) {
        self.events.lock().push(DelegateEvent::OutputInterrupted);
    }

    fn preferred_input_sample_rate(&self) -> f64 {
        self.preferred_sample_rate
    }

    fn preferred_input_io_buffer_duration(&self) -> f64 {
        self.preferred_io_buffer_duration
    }

    fn preferred_output_sample_rate(&self) -> f64 {
        self.preferred_sample_rate
    }

    fn preferred_output_io_buffer_duration(&self) -> f64 {
        self.preferred_io_buffer_duration
    }

    fn dispatch_async(&self, task: ControlTask) {
        if self.inline {
            task();
        } else {
            self.tasks.lock().push_back(task);
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Wait until the event thread has queued at least `count` tasks
pub fn wait_for_tasks(delegate: &TestDelegate, count: usize) -> bool {
    wait_for(Duration::from_secs(2), || delegate.pending_tasks() >= count)
}

/// Every call a [`MockBackend`] received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendLog {
    pub created: usize,
    pub dropped: usize,
    pub starts: usize,
    pub stops: usize,
    pub allocations: usize,
    pub releases: usize,
    pub flag_changes: usize,
    pub format_changes: usize,
    pub capture_installs: usize,
    pub capture_removals: usize,
    pub playout_installs: usize,
    pub playout_removals: usize,
    pub bypass_changes: usize,
}

impl BackendLog {
    /// Calls that touch hardware state
    pub fn hardware_ops(&self) -> usize {
        self.starts
            + self.stops
            + self.allocations
            + self.releases
            + self.flag_changes
            + self.format_changes
            + self.capture_installs
            + self.capture_removals
            + self.playout_installs
            + self.playout_removals
            + self.bypass_changes
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockFaults {
    pub fail_create: bool,
    pub fail_allocate: bool,
    pub fail_start: bool,
}

#[derive(Default)]
struct MockShared {
    log: Mutex<BackendLog>,
    faults: Mutex<MockFaults>,
    running: Mutex<bool>,
    has_capture: Mutex<bool>,
    has_playout: Mutex<bool>,
}

/// Factory for [`MockBackend`]s reading live formats from simulated hardware
#[derive(Clone)]
pub struct MockFactory {
    hardware: SimulatedHardware,
    shared: Arc<MockShared>,
}

impl MockFactory {
    pub fn new(hardware: &SimulatedHardware) -> Self {
        Self {
            hardware: hardware.clone(),
            shared: Arc::new(MockShared::default()),
        }
    }

    pub fn log(&self) -> BackendLog {
        self.shared.log.lock().clone()
    }

    pub fn set_faults(&self, faults: MockFaults) {
        *self.shared.faults.lock() = faults;
    }

    /// Running state of the most recent backend
    pub fn is_running(&self) -> bool {
        *self.shared.running.lock()
    }

    pub fn has_capture_callback(&self) -> bool {
        *self.shared.has_capture.lock()
    }

    pub fn has_playout_callback(&self) -> bool {
        *self.shared.has_playout.lock()
    }
}

impl BackendFactory for MockFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::FusedUnit
    }

    fn supports_voice_processing(&self) -> bool {
        self.hardware.supports_voice_processing()
    }

    fn create(&self, options: BackendOptions) -> AudioResult<Box<dyn HardwareBackend>> {
        if self.shared.faults.lock().fail_create {
            return Err(AudioError::hardware("injected create failure"));
        }
        self.shared.log.lock().created += 1;
        let input = self.hardware.hardware_input_format();
        let output = self.hardware.hardware_output_format();
        Ok(Box::new(MockBackend {
            hardware: self.hardware.clone(),
            shared: self.shared.clone(),
            options,
            sample_rate: output.sample_rate,
            input_enabled: false,
            output_enabled: true,
            input_client: input,
            output_client: output,
            capture: Arc::new(Mutex::new(None)),
            playout: Arc::new(Mutex::new(None)),
            allocated: false,
            running: false,
            bypassed: false,
        }))
    }
}

/// Backend that does no audio and counts every call
pub struct MockBackend {
    hardware: SimulatedHardware,
    shared: Arc<MockShared>,
    options: BackendOptions,
    sample_rate: f64,
    input_enabled: bool,
    output_enabled: bool,
    input_client: AudioFormat,
    output_client: AudioFormat,
    capture: CallbackSlot<CaptureCallback>,
    playout: CallbackSlot<PlayoutCallback>,
    allocated: bool,
    running: bool,
    bypassed: bool,
}

impl MockBackend {
    fn record(&self, update: impl FnOnce(&mut BackendLog)) {
        update(&mut self.shared.log.lock());
    }

    fn ensure_released(&self) -> AudioResult<()> {
        if self.allocated {
            Err(AudioError::invalid_state("render resources are allocated"))
        } else {
            Ok(())
        }
    }

    fn set_running(&mut self, running: bool) {
        self.running = running;
        *self.shared.running.lock() = running;
    }

    /// Run one capture cycle of silence through the installed callback
    pub fn capture_cycle(&self, frames: usize) -> Result<(), RenderError> {
        let samples = vec![0.0f32; frames * self.input_client.channels as usize];
        let context = RenderContext {
            sample_time: 0,
            frames,
            bus: INPUT_BUS,
        };
        match self.capture.lock().as_mut() {
            Some(callback) => callback(&context, SampleBuffer::F32(&samples)),
            None => Ok(()),
        }
    }

    pub fn output_context(frames: usize) -> RenderContext {
        RenderContext {
            sample_time: 0,
            frames,
            bus: OUTPUT_BUS,
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.record(|log| log.dropped += 1);
        *self.shared.running.lock() = false;
        *self.shared.has_capture.lock() = false;
        *self.shared.has_playout.lock() = false;
    }
}

impl HardwareBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FusedUnit
    }

    fn is_input_enabled(&self) -> bool {
        self.input_enabled
    }

    fn set_input_enabled(&mut self, enabled: bool) -> AudioResult<()> {
        if self.input_enabled != enabled {
            self.ensure_released()?;
            self.input_enabled = enabled;
            self.record(|log| log.flag_changes += 1);
        }
        Ok(())
    }

    fn is_output_enabled(&self) -> bool {
        self.output_enabled
    }

    fn set_output_enabled(&mut self, enabled: bool) -> AudioResult<()> {
        if self.output_enabled != enabled {
            self.ensure_released()?;
            self.output_enabled = enabled;
            self.record(|log| log.flag_changes += 1);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn render_resources_allocated(&self) -> bool {
        self.allocated
    }

    fn allocate_resources(&mut self) -> AudioResult<()> {
        if self.shared.faults.lock().fail_allocate {
            return Err(AudioError::allocation("injected allocation failure"));
        }
        self.allocated = true;
        self.record(|log| log.allocations += 1);
        Ok(())
    }

    fn release_resources(&mut self) {
        if self.running {
            self.stop();
        }
        if self.allocated {
            self.allocated = false;
            self.record(|log| log.releases += 1);
        }
    }

    fn start(&mut self) -> AudioResult<()> {
        if !self.allocated {
            return Err(AudioError::invalid_state("render resources are not allocated"));
        }
        if self.shared.faults.lock().fail_start {
            return Err(AudioError::start("injected start failure"));
        }
        self.set_running(true);
        self.record(|log| log.starts += 1);
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.set_running(false);
            self.record(|log| log.stops += 1);
        }
    }

    fn native_input_format(&self, bus: u32) -> AudioFormat {
        if bus == INPUT_BUS {
            self.hardware.hardware_input_format()
        } else {
            self.input_client
        }
    }

    fn native_output_format(&self, bus: u32) -> AudioFormat {
        if bus == OUTPUT_BUS {
            self.hardware.hardware_output_format()
        } else {
            self.output_client
        }
    }

    fn hardware_sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn accepts_client_format(&self, _direction: Direction) -> bool {
        true
    }

    fn client_format(&self, direction: Direction) -> AudioFormat {
        match direction {
            Direction::Input => self.input_client,
            Direction::Output => self.output_client,
        }
    }

    fn set_client_format(&mut self, direction: Direction, format: AudioFormat) -> AudioResult<()> {
        self.ensure_released()?;
        match direction {
            Direction::Input => self.input_client = format,
            Direction::Output => self.output_client = format,
        }
        self.record(|log| log.format_changes += 1);
        Ok(())
    }

    fn install_capture_callback(&mut self, callback: CaptureCallback) -> AudioResult<()> {
        *self.capture.lock() = Some(callback);
        *self.shared.has_capture.lock() = true;
        self.record(|log| log.capture_installs += 1);
        Ok(())
    }

    fn remove_capture_callback(&mut self) -> bool {
        let removed = self.capture.lock().take().is_some();
        if removed {
            *self.shared.has_capture.lock() = false;
            self.record(|log| log.capture_removals += 1);
        }
        removed
    }

    fn has_capture_callback(&self) -> bool {
        self.capture.lock().is_some()
    }

    fn install_playout_callback(&mut self, callback: PlayoutCallback) -> AudioResult<()> {
        *self.playout.lock() = Some(callback);
        *self.shared.has_playout.lock() = true;
        self.record(|log| log.playout_installs += 1);
        Ok(())
    }

    fn remove_playout_callback(&mut self) -> bool {
        let removed = self.playout.lock().take().is_some();
        if removed {
            *self.shared.has_playout.lock() = false;
            self.record(|log| log.playout_removals += 1);
        }
        removed
    }

    fn has_playout_callback(&self) -> bool {
        self.playout.lock().is_some()
    }

    fn supports_builtin_echo_cancellation(&self) -> bool {
        self.hardware.supports_voice_processing()
    }

    fn is_echo_cancellation_enabled(&self) -> bool {
        self.options.voice_processing
    }

    fn is_echo_cancellation_bypassed(&self) -> bool {
        self.bypassed
    }

    fn set_echo_cancellation_bypassed(&mut self, bypassed: bool) {
        if self.bypassed != bypassed {
            self.bypassed = bypassed;
            self.record(|log| log.bypass_changes += 1);
        }
    }

    fn set_configuration_change_listener(&mut self, listener: Option<ConfigurationListener>) {
        drop(listener);
    }

    fn describe(&self) -> String {
        format!(
            "mock backend: running={} allocated={} input={} output={}",
            self.running, self.allocated, self.input_enabled, self.output_enabled
        )
    }
}
