//! Audio device adapter
//!
//! [`AudioDeviceAdapter`] owns at most one [`HardwareBackend`] and converges
//! it onto the desired state (play/record on or off, interrupted or not)
//! through a single routine, [`AudioDeviceAdapter::reconcile`]. Every public
//! start/stop call and every session event ends up in that routine, and
//! passes are strictly serialized by the adapter's core lock.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──initialize──▶ Initialized ──terminate──▶ Terminated
//! ```
//!
//! `Terminated` is final: `initialize` and the start/stop calls return false
//! afterwards.
//!
//! # Threads
//!
//! - Control context: public calls and reconcile passes. Asynchronous work is
//!   scheduled through [`AudioDeviceDelegate::dispatch_async`].
//! - Event thread: the [`SessionEventBus`] thread. It only flips the
//!   interruption flag and schedules a reconcile.
//! - Real-time thread: owned by the hardware. It only runs the installed
//!   bridges and never touches adapter state.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rtcaudio_device::adapter::AudioDeviceAdapter;
//! use rtcaudio_device::config::AdapterConfig;
//! use rtcaudio_device::delegate::AudioDeviceDelegate;
//! use rtcaudio_device::platform::SimulatedHardware;
//!
//! # fn example(delegate: Arc<dyn AudioDeviceDelegate>) -> Result<(), Box<dyn std::error::Error>> {
//! let hardware = SimulatedHardware::default();
//! let adapter = AudioDeviceAdapter::with_simulated_hardware(AdapterConfig::default(), &hardware)?;
//!
//! assert!(adapter.initialize(&delegate));
//! adapter.start_recording();
//! adapter.start_playout();
//! // ... audio flows through the delegate ...
//! adapter.terminate();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::backend::{
    checked_format, BackendFactory, BackendOptions, BridgeStats, BridgeStatsSnapshot, CaptureBridge,
    DriverBackendFactory, HardwareBackend, PlayoutBridge,
};
use crate::config::{AdapterConfig, StereoInputPolicy};
use crate::delegate::AudioDeviceDelegate;
use crate::error::AudioResult;
use crate::events::{SessionEventBus, SessionEventHandler};
use crate::format::{AudioFormat, Direction, INPUT_BUS, OUTPUT_BUS};
use crate::platform::{AudioDriver, ConfigurationListener, SimulatedHardware};
use crate::session::{AudioSession, RouteChangeReason, SimulatedSession};
use crate::utils::measure_time;

/// Adapter lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Terminated,
}

/// What the transport layer asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub should_play: bool,
    pub should_record: bool,
}

/// Snapshot of the hardware-facing state after the last reconcile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    pub is_interrupted: bool,
    pub is_hardware_running: bool,
    pub has_backend: bool,
    pub input_format: Option<AudioFormat>,
    pub output_format: Option<AudioFormat>,
    pub input_latency: f64,
    pub output_latency: f64,
}

#[derive(Debug, Clone, Copy)]
enum Notification {
    InputChanged(AudioFormat),
    OutputChanged(AudioFormat),
    InputInterrupted,
    OutputInterrupted,
}

struct ControlState {
    lifecycle: Lifecycle,
    desired: DesiredState,
}

struct InstalledBridge {
    pipeline: AudioFormat,
    client: AudioFormat,
    stats: Arc<BridgeStats>,
}

#[derive(Default)]
struct DirectionState {
    format: Option<AudioFormat>,
    latency: f64,
    bridge: Option<InstalledBridge>,
}

impl DirectionState {
    fn bridge_matches(&self, pipeline: AudioFormat, client: AudioFormat) -> bool {
        self.bridge
            .as_ref()
            .map_or(false, |b| b.pipeline == pipeline && b.client == client)
    }
}

#[derive(Default)]
struct AdapterCore {
    backend: Option<Box<dyn HardwareBackend>>,
    capture: DirectionState,
    playout: DirectionState,
    preferred_sample_rate: Option<f64>,
    preferred_io_buffer_duration: Option<f64>,
}

#[derive(Default)]
struct RuntimeCache {
    state: RuntimeState,
    capture_stats: Option<Arc<BridgeStats>>,
    playout_stats: Option<Arc<BridgeStats>>,
}

struct AdapterInner {
    config: AdapterConfig,
    session: Arc<dyn AudioSession>,
    factory: Arc<dyn BackendFactory>,
    events: SessionEventBus,
    delegate: RwLock<Option<Weak<dyn AudioDeviceDelegate>>>,
    control: Mutex<ControlState>,
    interrupted: AtomicBool,
    backend_stale: AtomicBool,
    reconcile_pending: AtomicBool,
    runtime: RwLock<RuntimeCache>,
    core: Mutex<AdapterCore>,
    self_ref: Weak<AdapterInner>,
}

/// Coordinator between the transport layer and the audio hardware
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct AudioDeviceAdapter {
    inner: Arc<AdapterInner>,
}

impl fmt::Debug for AudioDeviceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDeviceAdapter")
            .field("backend", &self.inner.config.backend)
            .field("lifecycle", &self.lifecycle())
            .field("desired", &self.desired_state())
            .field("runtime", &self.runtime_state())
            .finish()
    }
}

impl AudioDeviceAdapter {
    /// Create an adapter over an injected session and backend factory
    pub fn new(
        config: AdapterConfig,
        session: Arc<dyn AudioSession>,
        factory: Arc<dyn BackendFactory>,
    ) -> AudioResult<Self> {
        config.validate()?;
        if factory.kind() != config.backend {
            warn!(
                "Backend factory builds {} but the configuration asks for {}",
                factory.kind(),
                config.backend
            );
        }
        let inner = Arc::new_cyclic(|self_ref| AdapterInner {
            config,
            session,
            factory,
            events: SessionEventBus::new(),
            delegate: RwLock::new(None),
            control: Mutex::new(ControlState {
                lifecycle: Lifecycle::Uninitialized,
                desired: DesiredState::default(),
            }),
            interrupted: AtomicBool::new(false),
            backend_stale: AtomicBool::new(false),
            reconcile_pending: AtomicBool::new(false),
            runtime: RwLock::new(RuntimeCache::default()),
            core: Mutex::new(AdapterCore::default()),
            self_ref: self_ref.clone(),
        });
        Ok(Self { inner })
    }

    /// Adapter over a driver, building the configured backend kind
    pub fn with_driver(
        config: AdapterConfig,
        session: Arc<dyn AudioSession>,
        driver: Arc<dyn AudioDriver>,
    ) -> AudioResult<Self> {
        let factory = Arc::new(DriverBackendFactory::new(config.backend, driver));
        Self::new(config, session, factory)
    }

    /// Adapter over simulated hardware and its session
    pub fn with_simulated_hardware(config: AdapterConfig, hardware: &SimulatedHardware) -> AudioResult<Self> {
        let session = Arc::new(SimulatedSession::new(hardware));
        Self::with_driver(config, session, Arc::new(hardware.clone()))
    }

    /// Store the delegate and start receiving session events
    ///
    /// Returns false if the adapter was already initialized or terminated.
    /// Only a weak reference to `delegate` is kept.
    pub fn initialize(&self, delegate: &Arc<dyn AudioDeviceDelegate>) -> bool {
        let inner = &self.inner;
        let mut control = inner.control.lock();
        if control.lifecycle != Lifecycle::Uninitialized {
            warn!("initialize called in state {:?}", control.lifecycle);
            return false;
        }

        *inner.delegate.write() = Some(Arc::downgrade(delegate));
        let handler: Weak<dyn SessionEventHandler> = inner.self_ref.clone();
        if let Err(e) = inner.events.subscribe(inner.session.as_ref(), handler) {
            error!("Failed to subscribe to session events: {}", e);
            *inner.delegate.write() = None;
            return false;
        }
        control.lifecycle = Lifecycle::Initialized;
        info!("Audio device adapter initialized ({} backend)", inner.config.backend);
        true
    }

    /// Stop everything, tear the backend down and drop the delegate
    ///
    /// Always returns true. No delegate method is called after this returns.
    pub fn terminate(&self) -> bool {
        let inner = &self.inner;
        inner.events.unsubscribe();
        {
            let mut control = inner.control.lock();
            control.desired = DesiredState::default();
        }

        let notifications = {
            let mut core = inner.core.lock();
            let mut notes = Vec::new();
            inner.reconcile_locked(&mut core, &mut notes);
            if core.backend.is_some() {
                measure_time("Tear down hardware backend", || inner.teardown(&mut core, &mut notes));
            }
            inner.control.lock().lifecycle = Lifecycle::Terminated;
            inner.publish_runtime(&core);
            notes
        };
        inner.notify(notifications);
        *inner.delegate.write() = None;
        info!("Audio device adapter terminated");
        true
    }

    pub fn start_playout(&self) -> bool {
        self.update_desired(|d| d.should_play = true)
    }

    pub fn stop_playout(&self) -> bool {
        self.update_desired(|d| d.should_play = false)
    }

    pub fn start_recording(&self) -> bool {
        self.update_desired(|d| d.should_record = true)
    }

    pub fn stop_recording(&self) -> bool {
        self.update_desired(|d| d.should_record = false)
    }

    fn update_desired(&self, update: impl FnOnce(&mut DesiredState)) -> bool {
        {
            let mut control = self.inner.control.lock();
            if control.lifecycle == Lifecycle::Terminated {
                return false;
            }
            update(&mut control.desired);
        }
        self.inner.reconcile();
        true
    }

    /// Converge hardware onto the desired state
    pub fn reconcile(&self) {
        self.inner.reconcile();
    }

    pub fn is_playing(&self) -> bool {
        self.inner.control.lock().desired.should_play
    }

    pub fn is_recording(&self) -> bool {
        self.inner.control.lock().desired.should_record
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle() == Lifecycle::Initialized
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.control.lock().lifecycle
    }

    pub fn desired_state(&self) -> DesiredState {
        self.inner.control.lock().desired
    }

    pub fn runtime_state(&self) -> RuntimeState {
        let mut state = self.inner.runtime.read().state.clone();
        state.is_interrupted = self.is_interrupted();
        state
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Whether a backend instance is alive (possibly stopped)
    pub fn has_backend(&self) -> bool {
        self.inner.runtime.read().state.has_backend
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    /// Negotiated capture format if hardware is live, else the session rate
    pub fn input_sample_rate(&self) -> f64 {
        self.live_format(Direction::Input)
            .map_or_else(|| self.inner.session.sample_rate(), |f| f.sample_rate)
    }

    pub fn output_sample_rate(&self) -> f64 {
        self.live_format(Direction::Output)
            .map_or_else(|| self.inner.session.sample_rate(), |f| f.sample_rate)
    }

    pub fn input_io_buffer_duration(&self) -> f64 {
        self.inner.session.io_buffer_duration()
    }

    pub fn output_io_buffer_duration(&self) -> f64 {
        self.inner.session.io_buffer_duration()
    }

    pub fn input_channels(&self) -> u16 {
        self.live_format(Direction::Input).map_or_else(
            || {
                self.inner
                    .session
                    .input_channels()
                    .min(self.inner.config.max_input_channels)
                    .max(1)
            },
            |f| f.channels,
        )
    }

    pub fn output_channels(&self) -> u16 {
        self.live_format(Direction::Output).map_or_else(
            || {
                self.inner
                    .session
                    .output_channels()
                    .min(self.inner.config.max_output_channels)
                    .max(1)
            },
            |f| f.channels,
        )
    }

    pub fn input_latency(&self) -> f64 {
        let (running, configured, latency) = {
            let runtime = self.inner.runtime.read();
            (
                runtime.state.is_hardware_running,
                runtime.state.input_format.is_some(),
                runtime.state.input_latency,
            )
        };
        if configured && self.hardware_running(running) {
            latency
        } else {
            self.inner.session.input_latency()
        }
    }

    pub fn output_latency(&self) -> f64 {
        let (running, configured, latency) = {
            let runtime = self.inner.runtime.read();
            (
                runtime.state.is_hardware_running,
                runtime.state.output_format.is_some(),
                runtime.state.output_latency,
            )
        };
        if configured && self.hardware_running(running) {
            latency
        } else {
            self.inner.session.output_latency()
        }
    }

    /// Counters of the installed capture bridge
    pub fn capture_stats(&self) -> Option<BridgeStatsSnapshot> {
        self.inner.runtime.read().capture_stats.as_ref().map(|s| s.snapshot())
    }

    /// Counters of the installed playout bridge
    pub fn playout_stats(&self) -> Option<BridgeStatsSnapshot> {
        self.inner.runtime.read().playout_stats.as_ref().map(|s| s.snapshot())
    }

    fn live_format(&self, direction: Direction) -> Option<AudioFormat> {
        let (running, format) = {
            let runtime = self.inner.runtime.read();
            let format = match direction {
                Direction::Input => runtime.state.input_format,
                Direction::Output => runtime.state.output_format,
            };
            (runtime.state.is_hardware_running, format)
        };
        format.filter(|_| self.hardware_running(running))
    }

    /// Ask the backend whether it is running
    ///
    /// Hardware stopped by an interruption is seen before the next reconcile
    /// publishes it. Falls back to `cached` while a reconcile holds the core.
    fn hardware_running(&self, cached: bool) -> bool {
        match self.inner.core.try_lock() {
            Some(core) => core.backend.as_deref().map_or(false, |b| b.is_running()),
            None => cached,
        }
    }
}

impl AdapterInner {
    fn delegate(&self) -> Option<Arc<dyn AudioDeviceDelegate>> {
        self.delegate.read().as_ref().and_then(Weak::upgrade)
    }

    fn reconcile(&self) {
        let notifications = {
            let mut core = self.core.lock();
            let mut notes = Vec::new();
            self.reconcile_locked(&mut core, &mut notes);
            self.publish_runtime(&core);
            notes
        };
        self.notify(notifications);
    }

    fn reconcile_locked(&self, core: &mut AdapterCore, notes: &mut Vec<Notification>) {
        let (lifecycle, desired) = {
            let control = self.control.lock();
            (control.lifecycle, control.desired)
        };
        let interrupted = self.interrupted.load(Ordering::SeqCst);
        let delegate = self.delegate();
        let active = lifecycle == Lifecycle::Initialized
            && delegate.is_some()
            && (desired.should_play || desired.should_record)
            && !interrupted;

        debug!(
            "Reconcile: play={} record={} interrupted={} active={}",
            desired.should_play, desired.should_record, interrupted, active
        );

        let Some(delegate) = delegate.filter(|_| active) else {
            self.quiesce(core, notes);
            return;
        };

        match self.configure(core, desired, &delegate, notes) {
            Ok(()) => {
                if let Some(backend) = core.backend.as_deref() {
                    debug!("Hardware after reconcile: {}", backend.describe());
                }
            }
            Err(e) if e.quiesces_hardware() => {
                error!("Audio hardware configuration failed: {}", e);
                self.quiesce(core, notes);
            }
            Err(e) => {
                warn!("Audio hardware not running, retrying on next event: {}", e);
            }
        }
    }

    /// Stop hardware, detach every callback and release render resources.
    /// The backend instance itself is kept.
    fn quiesce(&self, core: &mut AdapterCore, notes: &mut Vec<Notification>) {
        let Some(backend) = core.backend.as_deref_mut() else {
            return;
        };
        if backend.is_running() {
            measure_time("Stop audio hardware", || backend.stop());
        }
        if backend.remove_capture_callback() {
            notes.push(Notification::InputInterrupted);
        }
        if backend.remove_playout_callback() {
            notes.push(Notification::OutputInterrupted);
        }
        if backend.render_resources_allocated() {
            backend.release_resources();
        }
        core.capture.bridge = None;
        core.playout.bridge = None;
    }

    fn teardown(&self, core: &mut AdapterCore, notes: &mut Vec<Notification>) {
        self.quiesce(core, notes);
        if let Some(mut backend) = core.backend.take() {
            backend.set_configuration_change_listener(None);
        }
    }

    fn configure(
        &self,
        core: &mut AdapterCore,
        desired: DesiredState,
        delegate: &Arc<dyn AudioDeviceDelegate>,
        notes: &mut Vec<Notification>,
    ) -> AudioResult<()> {
        if self.config.apply_preferred_parameters {
            self.apply_preferred_parameters(core, delegate.as_ref());
        }

        let voice_processing = self
            .config
            .echo_cancellation
            .resolve(self.session.supports_voice_processing() && self.factory.supports_voice_processing());

        let stale = self.backend_stale.swap(false, Ordering::SeqCst);
        if let Some(backend) = core.backend.as_deref() {
            let reason = if stale {
                Some("media services were reset")
            } else if backend.hardware_sample_rate() != self.session.sample_rate() {
                Some("hardware sample rate changed")
            } else if backend.is_echo_cancellation_enabled() != voice_processing {
                Some("echo cancellation mode changed")
            } else {
                None
            };
            if let Some(reason) = reason {
                info!("Recreating hardware backend: {}", reason);
                self.teardown(core, notes);
            }
        }

        if core.backend.is_none() {
            if !voice_processing {
                self.configure_stereo_input();
            }
            let options = BackendOptions {
                voice_processing,
                maximum_frames_to_render: self.config.maximum_frames_to_render,
            };
            let mut backend = measure_time("Create hardware backend", || self.factory.create(options))?;
            backend.set_configuration_change_listener(Some(self.configuration_listener()));
            debug!("Created hardware backend: {}", backend.describe());
            core.backend = Some(backend);
        }

        let delegate_ref = Arc::downgrade(delegate);
        let AdapterCore {
            backend, capture, playout, ..
        } = core;
        let Some(backend) = backend.as_deref_mut() else {
            return Ok(());
        };

        if backend.is_echo_cancellation_enabled() {
            let bypass = desired.should_record && !desired.should_play;
            if backend.is_echo_cancellation_bypassed() != bypass {
                measure_time("Change echo cancellation bypass", || {
                    backend.set_echo_cancellation_bypassed(bypass)
                });
            }
        }

        if backend.is_input_enabled() != desired.should_record || backend.is_output_enabled() != desired.should_play {
            release_for_reconfiguration(backend);
            measure_time("Change input/output enabled", || -> AudioResult<()> {
                backend.set_input_enabled(desired.should_record)?;
                backend.set_output_enabled(desired.should_play)
            })?;
        }

        if desired.should_record {
            self.configure_capture(backend, capture, &delegate_ref, notes)?;
        } else if backend.remove_capture_callback() {
            capture.bridge = None;
            notes.push(Notification::InputInterrupted);
        }

        if desired.should_play {
            self.configure_playout(backend, playout, &delegate_ref, notes)?;
        } else if backend.remove_playout_callback() {
            playout.bridge = None;
            notes.push(Notification::OutputInterrupted);
        }

        if !backend.render_resources_allocated() {
            measure_time("Allocate render resources", || backend.allocate_resources())?;
        }
        if !backend.is_running() {
            measure_time("Start audio hardware", || backend.start())?;
            if desired.should_play {
                if let Err(e) = backend.start_background_audio() {
                    warn!("Failed to start background audio: {}", e);
                }
            }
        }
        Ok(())
    }

    fn pipeline_format(&self, direction: Direction, hardware: &AudioFormat) -> AudioFormat {
        let max_channels = match direction {
            Direction::Input => self.config.max_input_channels,
            Direction::Output => self.config.max_output_channels,
        };
        AudioFormat::new(
            hardware.sample_rate,
            hardware.channels.min(max_channels),
            self.config.pipeline_interleaved,
            self.config.pipeline_sample_format,
        )
    }

    fn configure_capture(
        &self,
        backend: &mut dyn HardwareBackend,
        state: &mut DirectionState,
        delegate: &Weak<dyn AudioDeviceDelegate>,
        notes: &mut Vec<Notification>,
    ) -> AudioResult<()> {
        let hardware = checked_format(Direction::Input, backend.native_input_format(INPUT_BUS))?;
        let pipeline = self.pipeline_format(Direction::Input, &hardware);
        release_if_route_changed(backend, Direction::Input, &hardware);

        if backend.accepts_client_format(Direction::Input) && backend.client_format(Direction::Input) != pipeline {
            release_for_reconfiguration(backend);
            if backend.remove_capture_callback() {
                state.bridge = None;
            }
            backend.set_client_format(Direction::Input, pipeline)?;
        }
        let client = backend.client_format(Direction::Input);

        let mut changed = state.format != Some(pipeline);
        state.format = Some(pipeline);

        if !state.bridge_matches(pipeline, client) || !backend.has_capture_callback() {
            let bridge = CaptureBridge::new(delegate.clone(), client, pipeline, self.config.maximum_frames_to_render)?;
            let stats = bridge.stats();
            measure_time("Install capture bridge", || {
                backend.install_capture_callback(bridge.into_callback())
            })?;
            state.bridge = Some(InstalledBridge {
                pipeline,
                client,
                stats,
            });
        }

        let latency = self.session.input_latency();
        if latency != state.latency {
            state.latency = latency;
            changed = true;
        }
        if changed {
            info!("Capture format: {} (latency {:.4}s)", pipeline, latency);
            notes.push(Notification::InputChanged(pipeline));
        }
        Ok(())
    }

    fn configure_playout(
        &self,
        backend: &mut dyn HardwareBackend,
        state: &mut DirectionState,
        delegate: &Weak<dyn AudioDeviceDelegate>,
        notes: &mut Vec<Notification>,
    ) -> AudioResult<()> {
        let hardware = checked_format(Direction::Output, backend.native_output_format(OUTPUT_BUS))?;
        let pipeline = self.pipeline_format(Direction::Output, &hardware);
        release_if_route_changed(backend, Direction::Output, &hardware);

        if backend.accepts_client_format(Direction::Output) && backend.client_format(Direction::Output) != pipeline {
            release_for_reconfiguration(backend);
            if backend.remove_playout_callback() {
                state.bridge = None;
            }
            backend.set_client_format(Direction::Output, pipeline)?;
        }
        let client = backend.client_format(Direction::Output);

        let mut changed = state.format != Some(pipeline);
        state.format = Some(pipeline);

        if !state.bridge_matches(pipeline, client) || !backend.has_playout_callback() {
            let bridge = PlayoutBridge::new(delegate.clone(), pipeline, client, self.config.maximum_frames_to_render)?;
            let stats = bridge.stats();
            measure_time("Install playout bridge", || {
                backend.install_playout_callback(bridge.into_callback())
            })?;
            state.bridge = Some(InstalledBridge {
                pipeline,
                client,
                stats,
            });
        }

        let latency = self.session.output_latency();
        if latency != state.latency {
            state.latency = latency;
            changed = true;
        }
        if changed {
            info!("Playout format: {} (latency {:.4}s)", pipeline, latency);
            notes.push(Notification::OutputChanged(pipeline));
        }
        Ok(())
    }

    fn apply_preferred_parameters(&self, core: &mut AdapterCore, delegate: &dyn AudioDeviceDelegate) {
        let sample_rate = delegate
            .preferred_input_sample_rate()
            .max(delegate.preferred_output_sample_rate());
        if sample_rate > 0.0 && core.preferred_sample_rate != Some(sample_rate) {
            core.preferred_sample_rate = Some(sample_rate);
            match self.session.set_preferred_sample_rate(sample_rate) {
                Ok(()) => debug!("Requested preferred sample rate {}", sample_rate),
                Err(e) => warn!("Preferred sample rate not applied: {}", e),
            }
        }

        let duration = delegate
            .preferred_input_io_buffer_duration()
            .min(delegate.preferred_output_io_buffer_duration());
        if duration > 0.0 && core.preferred_io_buffer_duration != Some(duration) {
            core.preferred_io_buffer_duration = Some(duration);
            match self.session.set_preferred_io_buffer_duration(duration) {
                Ok(()) => debug!("Requested preferred IO buffer duration {}", duration),
                Err(e) => warn!("Preferred IO buffer duration not applied: {}", e),
            }
        }
    }

    fn configure_stereo_input(&self) {
        match self.config.stereo_input {
            StereoInputPolicy::Disabled => {}
            StereoInputPolicy::Preferred => {
                if let Err(e) = self.session.configure_stereo_input() {
                    warn!("Stereo input not configured: {}", e);
                }
            }
            StereoInputPolicy::Required => {
                if let Err(e) = self.session.configure_stereo_input() {
                    error!("Stereo input is required but could not be configured: {}", e);
                    panic!("stereo input configuration failed: {}", e);
                }
            }
        }
    }

    fn configuration_listener(&self) -> ConfigurationListener {
        let weak = self.self_ref.clone();
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.schedule_reconcile("hardware configuration changed");
            }
        })
    }

    /// Queue a reconcile on the control context unless one is already queued
    fn schedule_reconcile(&self, reason: &str) {
        if self.reconcile_pending.swap(true, Ordering::SeqCst) {
            debug!("Reconcile already queued, coalescing '{}'", reason);
            return;
        }
        let Some(delegate) = self.delegate() else {
            self.reconcile_pending.store(false, Ordering::SeqCst);
            return;
        };
        debug!("Scheduling reconcile: {}", reason);
        let weak = self.self_ref.clone();
        delegate.dispatch_async(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile_pending.store(false, Ordering::SeqCst);
                inner.reconcile();
            }
        }));
    }

    fn publish_runtime(&self, core: &AdapterCore) {
        let mut runtime = self.runtime.write();
        runtime.state = RuntimeState {
            is_interrupted: self.interrupted.load(Ordering::SeqCst),
            is_hardware_running: core.backend.as_deref().map_or(false, |b| b.is_running()),
            has_backend: core.backend.is_some(),
            input_format: core.capture.format,
            output_format: core.playout.format,
            input_latency: core.capture.latency,
            output_latency: core.playout.latency,
        };
        runtime.capture_stats = core.capture.bridge.as_ref().map(|b| b.stats.clone());
        runtime.playout_stats = core.playout.bridge.as_ref().map(|b| b.stats.clone());
    }

    fn notify(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let Some(delegate) = self.delegate() else {
            return;
        };
        for notification in notifications {
            match notification {
                Notification::InputChanged(format) => delegate.notify_input_parameters_changed(&format),
                Notification::OutputChanged(format) => delegate.notify_output_parameters_changed(&format),
                Notification::InputInterrupted => delegate.notify_input_interrupted(),
                Notification::OutputInterrupted => delegate.notify_output_interrupted(),
            }
        }
    }
}

/// Drop a stream still running with the format of a previous route
fn release_if_route_changed(backend: &mut dyn HardwareBackend, direction: Direction, hardware: &AudioFormat) {
    if let Some(allocated) = backend.allocated_hardware_format(direction) {
        if allocated != *hardware {
            info!("{:?} hardware format changed from {} to {}", direction, allocated, hardware);
            release_for_reconfiguration(backend);
        }
    }
}

fn release_for_reconfiguration(backend: &mut dyn HardwareBackend) {
    if backend.is_running() {
        measure_time("Stop audio hardware for reconfiguration", || backend.stop());
    }
    if backend.render_resources_allocated() {
        backend.release_resources();
    }
}

impl SessionEventHandler for AdapterInner {
    fn handle_interruption_began(&self, was_app_suspended: bool) {
        if was_app_suspended {
            info!("Ignoring interruption caused by app suspension");
            return;
        }
        info!("Audio session interrupted");
        self.interrupted.store(true, Ordering::SeqCst);
        self.schedule_reconcile("interruption began");
    }

    fn handle_interruption_ended(&self, should_resume: bool) {
        info!("Audio session interruption ended (should resume: {})", should_resume);
        self.interrupted.store(false, Ordering::SeqCst);
        self.schedule_reconcile("interruption ended");
    }

    fn handle_route_change(&self, reason: RouteChangeReason) {
        info!("Audio route changed: {}", reason);
        debug!("Session after route change: {}", self.session.described_state());
        self.schedule_reconcile("route changed");
    }

    fn handle_media_services_reset(&self) {
        warn!("Media services were reset, hardware backend will be recreated");
        self.backend_stale.store(true, Ordering::SeqCst);
        self.schedule_reconcile("media services reset");
    }

    fn handle_media_services_lost(&self) {
        warn!("Media services were lost, audio unavailable until reset");
        self.backend_stale.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{ControlTask, PlayoutData, RecordedData};
    use crate::error::RenderError;

    #[derive(Default)]
    struct InlineDelegate {
        changes: Mutex<Vec<String>>,
    }

    impl AudioDeviceDelegate for InlineDelegate {
        fn deliver_recorded_data(&self, _data: &RecordedData<'_>) -> Result<(), RenderError> {
            Ok(())
        }
        fn get_playout_data(&self, data: &mut PlayoutData<'_>) -> Result<(), RenderError> {
            data.samples.fill_silence();
            data.silence = true;
            Ok(())
        }
        fn notify_input_parameters_changed(&self, format: &AudioFormat) {
            self.changes.lock().push(format!("input {}", format.channels));
        }
        fn notify_output_parameters_changed(&self, format: &AudioFormat) {
            self.changes.lock().push(format!("output {}", format.channels));
        }
        fn notify_input_interrupted(&self) {
            self.changes.lock().push("input interrupted".to_string());
        }
        fn notify_output_interrupted(&self) {
            self.changes.lock().push("output interrupted".to_string());
        }
        fn preferred_input_sample_rate(&self) -> f64 {
            16000.0
        }
        fn preferred_input_io_buffer_duration(&self) -> f64 {
            0.02
        }
        fn preferred_output_sample_rate(&self) -> f64 {
            48000.0
        }
        fn preferred_output_io_buffer_duration(&self) -> f64 {
            0.01
        }
        fn dispatch_async(&self, task: ControlTask) {
            task();
        }
    }

    fn setup(config: AdapterConfig) -> (SimulatedHardware, AudioDeviceAdapter, Arc<InlineDelegate>, Arc<dyn AudioDeviceDelegate>) {
        let hw = SimulatedHardware::default();
        let adapter = AudioDeviceAdapter::with_simulated_hardware(config, &hw).unwrap();
        let probe = Arc::new(InlineDelegate::default());
        let delegate: Arc<dyn AudioDeviceDelegate> = probe.clone();
        (hw, adapter, probe, delegate)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (_hw, adapter, _probe, delegate) = setup(AdapterConfig::default());
        assert_eq!(adapter.lifecycle(), Lifecycle::Uninitialized);
        assert!(adapter.initialize(&delegate));
        assert!(!adapter.initialize(&delegate));
        assert!(adapter.is_initialized());
        assert!(adapter.terminate());
        assert_eq!(adapter.lifecycle(), Lifecycle::Terminated);
        assert!(!adapter.initialize(&delegate));
        assert!(!adapter.start_playout());
        assert!(adapter.terminate());
    }

    #[test]
    fn test_nothing_starts_without_delegate() {
        let (hw, adapter, _probe, _delegate) = setup(AdapterConfig::default());
        assert!(adapter.start_playout());
        assert!(adapter.is_playing());
        assert!(!adapter.has_backend());
        assert_eq!(hw.counters().opens, 0);
    }

    #[test]
    fn test_preferred_parameters_take_max_rate_and_min_duration() {
        let (hw, adapter, _probe, delegate) = setup(AdapterConfig::default());
        let session = SimulatedSession::new(&hw);
        adapter.initialize(&delegate);
        adapter.start_playout();
        assert_eq!(session.preferred_sample_rate(), Some(48000.0));
        assert_eq!(session.preferred_io_buffer_duration(), Some(0.01));
    }

    #[test]
    fn test_pipeline_channels_are_capped() {
        let (hw, adapter, probe, delegate) = setup(AdapterConfig::voice_chat());
        adapter.initialize(&delegate);
        adapter.start_playout();
        assert_eq!(hw.profile().output_channels, 2);
        assert_eq!(adapter.output_channels(), 1);
        assert_eq!(*probe.changes.lock(), vec!["output 1".to_string()]);
    }

    #[test]
    fn test_echo_cancellation_bypassed_when_only_recording() {
        let (_hw, adapter, _probe, delegate) = setup(AdapterConfig::voice_chat());
        adapter.initialize(&delegate);
        adapter.start_recording();
        {
            let core = adapter.inner.core.lock();
            let backend = core.backend.as_deref().unwrap();
            assert!(backend.is_echo_cancellation_enabled());
            assert!(backend.is_echo_cancellation_bypassed());
        }
        adapter.start_playout();
        let core = adapter.inner.core.lock();
        assert!(!core.backend.as_deref().unwrap().is_echo_cancellation_bypassed());
    }
}
