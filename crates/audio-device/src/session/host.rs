//! Session collaborator for hosts without a platform audio session
//!
//! Desktop hosts have no system-wide category or interruption service.
//! [`HostSession`] derives the live values from an [`AudioDriver`], records
//! preferred values without applying them and lets the embedding
//! application announce lifecycle events itself.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use super::{AudioSession, SessionCategory, SessionEvent, SessionMode};
use crate::error::{AudioError, AudioResult};
use crate::platform::AudioDriver;

#[derive(Debug, Clone, Copy)]
struct Preferences {
    category: SessionCategory,
    mode: SessionMode,
    io_buffer_duration: f64,
    sample_rate: Option<f64>,
}

/// Session backed by a driver's hardware formats
pub struct HostSession {
    driver: Arc<dyn AudioDriver>,
    preferences: Mutex<Preferences>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("driver", &self.driver.name())
            .field("preferences", &*self.preferences.lock())
            .finish()
    }
}

impl HostSession {
    pub fn new(driver: Arc<dyn AudioDriver>) -> Self {
        Self {
            driver,
            preferences: Mutex::new(Preferences {
                category: SessionCategory::PlayAndRecord,
                mode: SessionMode::Default,
                io_buffer_duration: 0.01,
                sample_rate: None,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mode(self, mode: SessionMode) -> Self {
        self.preferences.lock().mode = mode;
        self
    }

    /// Sample rate last requested through the session
    pub fn preferred_sample_rate(&self) -> Option<f64> {
        self.preferences.lock().sample_rate
    }

    /// Announce an event to every subscriber
    pub fn emit(&self, event: SessionEvent) {
        debug!("Host session event: {:?}", event);
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl AudioSession for HostSession {
    fn category(&self) -> SessionCategory {
        self.preferences.lock().category
    }

    fn mode(&self) -> SessionMode {
        self.preferences.lock().mode
    }

    fn sample_rate(&self) -> f64 {
        self.driver.hardware_output_format().sample_rate
    }

    fn io_buffer_duration(&self) -> f64 {
        self.preferences.lock().io_buffer_duration
    }

    fn input_channels(&self) -> u16 {
        self.driver.hardware_input_format().channels
    }

    fn output_channels(&self) -> u16 {
        self.driver.hardware_output_format().channels
    }

    fn max_input_channels(&self) -> u16 {
        self.input_channels()
    }

    fn max_output_channels(&self) -> u16 {
        self.output_channels()
    }

    fn input_latency(&self) -> f64 {
        self.io_buffer_duration()
    }

    fn output_latency(&self) -> f64 {
        self.io_buffer_duration()
    }

    fn is_input_available(&self) -> bool {
        self.driver.hardware_input_format().channels > 0
    }

    fn set_preferred_sample_rate(&self, sample_rate: f64) -> AudioResult<()> {
        self.preferences.lock().sample_rate = Some(sample_rate);
        Ok(())
    }

    fn set_preferred_io_buffer_duration(&self, duration: f64) -> AudioResult<()> {
        if !(duration > 0.0 && duration.is_finite()) {
            return Err(AudioError::configuration(format!("invalid IO buffer duration {}", duration)));
        }
        self.preferences.lock().io_buffer_duration = duration;
        Ok(())
    }

    fn configure_stereo_input(&self) -> AudioResult<()> {
        if self.input_channels() >= 2 {
            Ok(())
        } else {
            Err(AudioError::unsupported("stereo input on this device"))
        }
    }

    fn subscribe_events(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}
