//! Session collaborator backed by [`SimulatedHardware`]
//!
//! Reads the live route state of the hardware it was created from and lets
//! tests and the demo inject the lifecycle events a real session emits.

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use super::{
    AudioSession, InterruptionOptions, InterruptionReason, RouteChangeReason, SessionCategory, SessionEvent,
    SessionMode,
};
use crate::error::{AudioError, AudioResult};
use crate::platform::SimulatedHardware;

/// Fake audio session sharing state with a [`SimulatedHardware`]
#[derive(Debug, Clone)]
pub struct SimulatedSession {
    hardware: SimulatedHardware,
}

impl SimulatedSession {
    pub fn new(hardware: &SimulatedHardware) -> Self {
        Self {
            hardware: hardware.clone(),
        }
    }

    pub fn hardware(&self) -> &SimulatedHardware {
        &self.hardware
    }

    pub fn set_category(&self, category: SessionCategory, mode: SessionMode) {
        let mut state = self.hardware.shared.state.lock();
        state.profile.category = category;
        state.profile.mode = mode;
    }

    /// Last preferred sample rate requested
    pub fn preferred_sample_rate(&self) -> Option<f64> {
        self.hardware.shared.state.lock().preferred_sample_rate
    }

    /// Last preferred IO buffer duration requested
    pub fn preferred_io_buffer_duration(&self) -> Option<f64> {
        self.hardware.shared.state.lock().preferred_io_buffer_duration
    }

    pub fn is_stereo_input_configured(&self) -> bool {
        self.hardware.shared.state.lock().stereo_input_configured
    }

    pub fn set_fail_preferred_sample_rate(&self, fail: bool) {
        self.hardware.shared.faults.lock().fail_preferred_sample_rate = fail;
    }

    pub fn set_fail_preferred_io_buffer_duration(&self, fail: bool) {
        self.hardware.shared.faults.lock().fail_preferred_io_buffer_duration = fail;
    }

    pub fn set_fail_stereo_input(&self, fail: bool) {
        self.hardware.shared.faults.lock().fail_stereo_input = fail;
    }

    /// Another session takes the hardware; running streams stop
    pub fn begin_interruption(&self, reason: InterruptionReason) {
        info!("Simulated interruption began ({:?})", reason);
        if reason != InterruptionReason::AppWasSuspended {
            self.hardware.interrupt_streams();
        }
        self.hardware.emit(SessionEvent::InterruptionBegan {
            reason: Some(reason),
            was_suspended: false,
        });
    }

    /// Interruption as reported by platforms that only carry the legacy
    /// suspended flag
    pub fn begin_legacy_interruption(&self, was_suspended: bool) {
        info!("Simulated interruption began (was_suspended={})", was_suspended);
        if !was_suspended {
            self.hardware.interrupt_streams();
        }
        self.hardware.emit(SessionEvent::InterruptionBegan {
            reason: None,
            was_suspended,
        });
    }

    pub fn end_interruption(&self, should_resume: bool) {
        info!("Simulated interruption ended (should_resume={})", should_resume);
        self.hardware.emit(SessionEvent::InterruptionEnded {
            options: InterruptionOptions { should_resume },
        });
    }

    /// Announce a route change; apply any route setters on the hardware first
    pub fn change_route(&self, reason: RouteChangeReason) {
        info!("Simulated route change: {}", reason);
        self.hardware.notify_configuration_change();
        self.hardware.emit(SessionEvent::RouteChanged { reason });
    }

    /// Media server restarted; every open stream is invalid
    pub fn reset_media_services(&self) {
        info!("Simulated media services reset");
        self.hardware.invalidate_streams();
        self.hardware.emit(SessionEvent::MediaServicesReset);
    }

    /// Media server died; every open stream is invalid until a reset
    pub fn lose_media_services(&self) {
        info!("Simulated media services lost");
        self.hardware.invalidate_streams();
        self.hardware.emit(SessionEvent::MediaServicesLost);
    }
}

impl AudioSession for SimulatedSession {
    fn category(&self) -> SessionCategory {
        self.hardware.shared.state.lock().profile.category
    }

    fn mode(&self) -> SessionMode {
        self.hardware.shared.state.lock().profile.mode
    }

    fn sample_rate(&self) -> f64 {
        self.hardware.shared.state.lock().profile.sample_rate
    }

    fn io_buffer_duration(&self) -> f64 {
        self.hardware.shared.state.lock().profile.io_buffer_duration
    }

    fn input_channels(&self) -> u16 {
        self.hardware.shared.state.lock().profile.input_channels
    }

    fn output_channels(&self) -> u16 {
        self.hardware.shared.state.lock().profile.output_channels
    }

    fn max_input_channels(&self) -> u16 {
        self.hardware.shared.state.lock().profile.max_input_channels
    }

    fn max_output_channels(&self) -> u16 {
        self.hardware.shared.state.lock().profile.max_output_channels
    }

    fn input_latency(&self) -> f64 {
        self.hardware.shared.state.lock().profile.input_latency
    }

    fn output_latency(&self) -> f64 {
        self.hardware.shared.state.lock().profile.output_latency
    }

    fn is_input_available(&self) -> bool {
        self.hardware.shared.state.lock().input_available
    }

    fn set_preferred_sample_rate(&self, sample_rate: f64) -> AudioResult<()> {
        if self.hardware.shared.faults.lock().fail_preferred_sample_rate {
            return Err(AudioError::configuration(format!(
                "preferred sample rate {} rejected",
                sample_rate
            )));
        }
        debug!("Preferred sample rate set to {}", sample_rate);
        self.hardware.shared.state.lock().preferred_sample_rate = Some(sample_rate);
        Ok(())
    }

    fn set_preferred_io_buffer_duration(&self, duration: f64) -> AudioResult<()> {
        if self.hardware.shared.faults.lock().fail_preferred_io_buffer_duration {
            return Err(AudioError::configuration(format!(
                "preferred IO buffer duration {} rejected",
                duration
            )));
        }
        debug!("Preferred IO buffer duration set to {}", duration);
        self.hardware.shared.state.lock().preferred_io_buffer_duration = Some(duration);
        Ok(())
    }

    fn configure_stereo_input(&self) -> AudioResult<()> {
        if self.hardware.shared.faults.lock().fail_stereo_input {
            return Err(AudioError::configuration("no stereo capable input data source"));
        }
        let mut state = self.hardware.shared.state.lock();
        if state.profile.max_input_channels < 2 {
            return Err(AudioError::configuration("input route has a single channel"));
        }
        state.profile.input_channels = 2;
        state.stereo_input_configured = true;
        Ok(())
    }

    fn subscribe_events(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.hardware.add_subscriber(tx);
        rx
    }
}
